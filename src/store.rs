//! Flat Form Store
//!
//! One map from field id (or composite key) to value, shared by global fields
//! and every repeatable item, plus the per-key bookkeeping a form needs:
//! errors, touched flags, validation state, evaluated conditions.
//!
//! The core only talks to the narrow [`FieldStore`] trait. Change events are
//! queued while a mutation runs and handed to subscribers by [`FormStore::flush`],
//! so a listener never observes a half-applied update.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::field_conditions::FieldConditions;

pub type FlatValues = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,
    pub code: String,
}

impl FieldError {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            message: message.to_string(),
            code: code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationState {
    #[default]
    Idle,
    Validating,
    Valid,
    Invalid,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENTS & SUBSCRIPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreEvent {
    ValueChanged { key: String },
    EntryRemoved { key: String },
    OrderChanged { repeatable_id: String },
    ConditionsChanged { key: String },
    ErrorsChanged { key: String },
    ValidationChanged { key: String },
    StatusChanged,
}

/// What a subscriber listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Everything about one key: value, removal, conditions, errors, validation.
    Field(String),
    /// Any value write or removal.
    Values,
    /// Order changes of one repeatable group.
    Repeatable(String),
    /// Any change of evaluated conditions.
    Conditions,
    /// Dirty / valid flags.
    Status,
    All,
}

impl Topic {
    pub fn matches(&self, event: &StoreEvent) -> bool {
        match (self, event) {
            (Topic::All, _) => true,
            (
                Topic::Field(key),
                StoreEvent::ValueChanged { key: k }
                | StoreEvent::EntryRemoved { key: k }
                | StoreEvent::ConditionsChanged { key: k }
                | StoreEvent::ErrorsChanged { key: k }
                | StoreEvent::ValidationChanged { key: k },
            ) => key == k,
            (Topic::Values, StoreEvent::ValueChanged { .. } | StoreEvent::EntryRemoved { .. }) => {
                true
            }
            (Topic::Repeatable(id), StoreEvent::OrderChanged { repeatable_id }) => {
                id == repeatable_id
            }
            (Topic::Conditions, StoreEvent::ConditionsChanged { .. }) => true,
            (Topic::Status, StoreEvent::StatusChanged) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&StoreEvent)>;

#[derive(Default)]
struct Notifier {
    listeners: Vec<(SubscriptionId, Topic, Listener)>,
    pending: Vec<StoreEvent>,
    next_id: u64,
    batch_depth: u32,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.len())
            .field("pending", &self.pending)
            .field("batch_depth", &self.batch_depth)
            .finish()
    }
}

impl Notifier {
    fn push(&mut self, event: StoreEvent) {
        if !self.pending.contains(&event) {
            self.pending.push(event);
        }
    }

    fn flush(&mut self) {
        if self.batch_depth > 0 || self.pending.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.pending);
        for event in &events {
            for (_, topic, listener) in self.listeners.iter_mut() {
                if topic.matches(event) {
                    listener(event);
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// The store operations the repeatable state machine relies on.
pub trait FieldStore {
    fn value(&self, key: &str) -> Option<&Value>;
    fn values(&self) -> &FlatValues;
    fn set_value(&mut self, key: &str, value: Value);
    /// Drop every per-key entry: value, errors, touched, validation state, conditions.
    fn remove_entry(&mut self, key: &str);
    fn mark_dirty(&mut self);
    fn recompute_validity(&mut self);
    fn notify(&mut self, event: StoreEvent);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FORM STORE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct FormStore {
    values: FlatValues,
    errors: HashMap<String, Vec<FieldError>>,
    touched: HashSet<String>,
    validation: HashMap<String, ValidationState>,
    conditions: HashMap<String, FieldConditions>,
    dirty: bool,
    valid: bool,
    notifier: Notifier,
}

impl Default for FormStore {
    fn default() -> Self {
        Self {
            values: FlatValues::new(),
            errors: HashMap::new(),
            touched: HashSet::new(),
            validation: HashMap::new(),
            conditions: HashMap::new(),
            dirty: false,
            valid: true,
            notifier: Notifier::default(),
        }
    }
}

impl FormStore {
    pub fn new(values: FlatValues) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Forget pending changes, e.g. once a freshly built form is seeded.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
        self.notifier.pending.clear();
    }

    pub fn errors(&self, key: &str) -> &[FieldError] {
        self.errors.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_errors(&mut self, key: &str, errors: Vec<FieldError>) {
        let changed = self.errors(key) != errors.as_slice();
        if errors.is_empty() {
            self.errors.remove(key);
        } else {
            self.errors.insert(key.to_string(), errors);
        }
        if changed {
            self.notifier.push(StoreEvent::ErrorsChanged {
                key: key.to_string(),
            });
        }
    }

    pub fn validation_state(&self, key: &str) -> ValidationState {
        self.validation.get(key).copied().unwrap_or_default()
    }

    pub fn set_validation_state(&mut self, key: &str, state: ValidationState) {
        if self.validation.insert(key.to_string(), state) != Some(state) {
            self.notifier.push(StoreEvent::ValidationChanged {
                key: key.to_string(),
            });
        }
    }

    pub fn is_touched(&self, key: &str) -> bool {
        self.touched.contains(key)
    }

    pub fn touch(&mut self, key: &str) {
        self.touched.insert(key.to_string());
    }

    pub fn conditions(&self, key: &str) -> Option<FieldConditions> {
        self.conditions.get(key).copied()
    }

    pub fn all_conditions(&self) -> &HashMap<String, FieldConditions> {
        &self.conditions
    }

    /// Store evaluated conditions, emitting an event only for keys that changed.
    pub fn set_conditions(&mut self, key: &str, conditions: FieldConditions) {
        if self.conditions.get(key) != Some(&conditions) {
            self.conditions.insert(key.to_string(), conditions);
            self.notifier.push(StoreEvent::ConditionsChanged {
                key: key.to_string(),
            });
        }
    }

    /// Keys currently in any validating state.
    pub fn validating_keys(&self) -> impl Iterator<Item = &String> {
        self.validation
            .iter()
            .filter(|(_, state)| **state == ValidationState::Validating)
            .map(|(key, _)| key)
    }

    /// Keys that currently carry at least one error.
    pub fn error_keys(&self) -> impl Iterator<Item = &String> {
        self.errors.keys()
    }

    pub fn subscribe<F>(&mut self, topic: Topic, listener: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + 'static,
    {
        let id = SubscriptionId(self.notifier.next_id);
        self.notifier.next_id += 1;
        self.notifier.listeners.push((id, topic, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.notifier.listeners.len();
        self.notifier.listeners.retain(|(sid, _, _)| *sid != id);
        self.notifier.listeners.len() != before
    }

    pub fn begin_batch(&mut self) {
        self.notifier.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        self.notifier.batch_depth = self.notifier.batch_depth.saturating_sub(1);
        self.notifier.flush();
    }

    /// Deliver queued events unless a batch is still open.
    pub fn flush(&mut self) {
        self.notifier.flush();
    }
}

impl FieldStore for FormStore {
    fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn values(&self) -> &FlatValues {
        &self.values
    }

    fn set_value(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
        self.notifier.push(StoreEvent::ValueChanged {
            key: key.to_string(),
        });
    }

    fn remove_entry(&mut self, key: &str) {
        self.values.remove(key);
        self.errors.remove(key);
        self.touched.remove(key);
        self.validation.remove(key);
        self.conditions.remove(key);
        self.notifier.push(StoreEvent::EntryRemoved {
            key: key.to_string(),
        });
    }

    fn mark_dirty(&mut self) {
        if !self.dirty {
            self.dirty = true;
            self.notifier.push(StoreEvent::StatusChanged);
        }
    }

    fn recompute_validity(&mut self) {
        let valid = self.errors.values().all(Vec::is_empty)
            && !self
                .validation
                .values()
                .any(|state| *state == ValidationState::Invalid);
        if valid != self.valid {
            self.valid = valid;
            self.notifier.push(StoreEvent::StatusChanged);
        }
    }

    fn notify(&mut self, event: StoreEvent) {
        self.notifier.push(event);
    }
}
