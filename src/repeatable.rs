//! Repeatable State Machine
//!
//! Owns the ordered item keys of one repeatable group and a per-group
//! counter. Keys are `k{counter}`; the counter only ever grows, so a key is
//! never handed out twice for the lifetime of the form, even after its item
//! was removed. Display order lives in `order` alone; values stay under their
//! composite keys no matter where the item moves.
//!
//! The machine does not pre-populate `min` items. That is up to the caller
//! (see `FormState`).

use serde_json::{Map, Value};
use tracing::debug;

use crate::composite_key::build_composite_key;
use crate::config::RepeatableFieldConfig;
use crate::store::{FieldStore, StoreEvent};

pub const ITEM_KEY_PREFIX: &str = "k";

pub fn item_key(n: u64) -> String {
    format!("{}{}", ITEM_KEY_PREFIX, n)
}

fn item_key_number(key: &str) -> Option<u64> {
    key.strip_prefix(ITEM_KEY_PREFIX)?.parse().ok()
}

#[derive(Debug, Clone)]
pub struct RepeatableState {
    config: RepeatableFieldConfig,
    order: Vec<String>,
    next_key: u64,
}

impl RepeatableState {
    pub fn new(config: RepeatableFieldConfig) -> Self {
        Self {
            config,
            order: Vec::new(),
            next_key: 0,
        }
    }

    /// Adopt items that already live in the store (e.g. after flattening).
    ///
    /// The counter is raised past every `k{n}` key in `order`, so a stale
    /// `next_key` can never cause a key to be reissued.
    pub fn with_items(config: RepeatableFieldConfig, order: Vec<String>, next_key: u64) -> Self {
        let floor = order
            .iter()
            .filter_map(|k| item_key_number(k))
            .map(|n| n + 1)
            .max()
            .unwrap_or(0);
        Self {
            config,
            order,
            next_key: next_key.max(floor),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &RepeatableFieldConfig {
        &self.config
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn next_key(&self) -> u64 {
        self.next_key
    }

    pub fn contains(&self, item_key: &str) -> bool {
        self.order.iter().any(|k| k == item_key)
    }

    pub fn can_append(&self) -> bool {
        self.config.max.map_or(true, |max| self.order.len() < max)
    }

    pub fn can_remove(&self) -> bool {
        self.config.min.map_or(true, |min| self.order.len() > min)
    }

    /// Composite keys of every template field of one item.
    pub fn field_keys(&self, item_key: &str) -> Vec<String> {
        self.config
            .all_fields
            .iter()
            .map(|f| build_composite_key(&self.config.id, item_key, &f.id))
            .collect()
    }

    /// Add an item at the end. `None` when the group is full.
    pub fn append<S: FieldStore + ?Sized>(
        &mut self,
        store: &mut S,
        default_value: Option<&Map<String, Value>>,
    ) -> Option<String> {
        let index = self.order.len();
        self.insert(store, index, default_value)
    }

    /// Add an item at `index`, clamped to `0..=len`. `None` when the group is full.
    pub fn insert<S: FieldStore + ?Sized>(
        &mut self,
        store: &mut S,
        index: usize,
        default_value: Option<&Map<String, Value>>,
    ) -> Option<String> {
        if !self.can_append() {
            debug!(repeatable = %self.config.id, max = ?self.config.max, "item rejected, group is full");
            return None;
        }

        let key = item_key(self.next_key);
        self.next_key += 1;
        self.seed_item(store, &key, default_value);

        let index = index.min(self.order.len());
        self.order.insert(index, key.clone());

        store.mark_dirty();
        store.notify(StoreEvent::OrderChanged {
            repeatable_id: self.config.id.clone(),
        });
        debug!(repeatable = %self.config.id, item = %key, index, "item added");
        Some(key)
    }

    /// Seed values: explicit default, then group default, then the template's
    /// own default, then null.
    fn seed_item<S: FieldStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        default_value: Option<&Map<String, Value>>,
    ) {
        let defaults = default_value.or(self.config.default_value.as_ref());
        for field in &self.config.all_fields {
            let value = defaults
                .and_then(|map| map.get(&field.id).cloned())
                .or_else(|| field.default_value.clone())
                .unwrap_or(Value::Null);
            store.set_value(&build_composite_key(&self.config.id, key, &field.id), value);
        }
    }

    /// Remove an item and every store entry it owns. `false` when the key is
    /// unknown or the group is at its minimum.
    pub fn remove<S: FieldStore + ?Sized>(&mut self, store: &mut S, item_key: &str) -> bool {
        if !self.can_remove() {
            debug!(repeatable = %self.config.id, min = ?self.config.min, "item kept, group at minimum");
            return false;
        }
        let Some(position) = self.order.iter().position(|k| k == item_key) else {
            return false;
        };

        for key in self.field_keys(item_key) {
            store.remove_entry(&key);
        }
        self.order.remove(position);

        store.mark_dirty();
        store.recompute_validity();
        store.notify(StoreEvent::OrderChanged {
            repeatable_id: self.config.id.clone(),
        });
        debug!(repeatable = %self.config.id, item = %item_key, "item removed");
        true
    }

    /// Reorder only. Invalid or equal indices are a no-op and return `false`.
    pub fn move_item<S: FieldStore + ?Sized>(&mut self, store: &mut S, from: usize, to: usize) -> bool {
        let len = self.order.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        let key = self.order.remove(from);
        self.order.insert(to, key);
        store.notify(StoreEvent::OrderChanged {
            repeatable_id: self.config.id.clone(),
        });
        debug!(repeatable = %self.config.id, from, to, "item moved");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldConfig, FieldRow};
    use crate::store::{FieldError, FormStore};
    use serde_json::json;

    fn items_config(min: Option<usize>, max: Option<usize>) -> RepeatableFieldConfig {
        RepeatableFieldConfig::new(
            "items",
            vec![FieldRow {
                id: "line".to_string(),
                fields: vec![
                    FieldConfig::new("name", "text"),
                    FieldConfig::new("qty", "number").with_default(1),
                ],
            }],
        )
        .with_bounds(min, max)
    }

    #[test]
    fn test_append_seeds_defaults() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(
            items_config(None, None).with_default_value(
                json!({ "name": "New item" }).as_object().cloned().unwrap(),
            ),
        );

        let key = state.append(&mut store, None).unwrap();
        assert_eq!(key, "k0");
        assert_eq!(store.value("items[k0].name"), Some(&json!("New item")));
        assert_eq!(store.value("items[k0].qty"), Some(&json!(1)));
        assert!(store.is_dirty());

        let explicit = json!({ "name": "Gadget", "qty": 5 });
        let key = state.append(&mut store, explicit.as_object()).unwrap();
        assert_eq!(key, "k1");
        assert_eq!(store.value("items[k1].qty"), Some(&json!(5)));
    }

    #[test]
    fn test_missing_defaults_are_null() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config(None, None));
        state.append(&mut store, Some(&Map::new()));
        assert_eq!(store.value("items[k0].name"), Some(&Value::Null));
        assert_eq!(store.value("items[k0].qty"), Some(&json!(1)));
    }

    #[test]
    fn test_insert_clamps_index() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config(None, None));
        state.append(&mut store, None);
        state.append(&mut store, None);
        assert_eq!(state.insert(&mut store, 0, None).as_deref(), Some("k2"));
        assert_eq!(state.insert(&mut store, 99, None).as_deref(), Some("k3"));
        assert_eq!(state.order(), ["k2", "k0", "k1", "k3"]);
    }

    #[test]
    fn test_insert_respects_max() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config(None, Some(1)));
        state.insert(&mut store, 0, None).unwrap();
        assert_eq!(state.insert(&mut store, 0, None), None);
        assert_eq!(state.next_key(), 1);
    }

    #[test]
    fn test_remove_purges_entries_and_keeps_order() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config(None, None));
        for _ in 0..3 {
            state.append(&mut store, None);
        }
        store.set_errors("items[k1].name", vec![FieldError::new("required", "Required")]);
        store.recompute_validity();
        assert!(!store.is_valid());

        assert!(state.remove(&mut store, "k1"));
        assert_eq!(state.order(), ["k0", "k2"]);
        assert!(store.value("items[k1].name").is_none());
        assert!(store.value("items[k1].qty").is_none());
        assert!(store.errors("items[k1].name").is_empty());
        assert!(store.is_valid());
        assert!(store.value("items[k2].qty").is_some());
    }

    #[test]
    fn test_remove_unknown_key() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config(None, None));
        state.append(&mut store, None);
        assert!(!state.remove(&mut store, "k7"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_move_bounds() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config(None, None));
        state.append(&mut store, None);
        state.append(&mut store, None);
        state.append(&mut store, None);

        assert!(!state.move_item(&mut store, 0, 3));
        assert!(!state.move_item(&mut store, 5, 0));
        assert!(!state.move_item(&mut store, 1, 1));
        assert_eq!(state.order(), ["k0", "k1", "k2"]);

        assert!(state.move_item(&mut store, 2, 0));
        assert_eq!(state.order(), ["k2", "k0", "k1"]);
    }

    #[test]
    fn test_with_items_raises_counter() {
        let state = RepeatableState::with_items(
            items_config(None, None),
            vec!["k0".to_string(), "k4".to_string()],
            2,
        );
        assert_eq!(state.next_key(), 5);
        let state = RepeatableState::with_items(items_config(None, None), vec![], 3);
        assert_eq!(state.next_key(), 3);
    }
}
