//! Safety Gate Tests for Formstate Invariants
//!
//! These tests pin the structural guarantees the rest of the engine leans on:
//! - Composite keys parse back into their parts
//! - Flatten and structure are inverse for well-formed data
//! - Item keys are never reused; min/max bounds hold
//! - Scoping only touches template references
//! - Orphaned composite keys never reach the payload

#[cfg(test)]
mod tests {
    use crate::composite_key::{build_composite_key, parse_composite_key, CompositeKey};
    use crate::condition::{when, ConditionConfig};
    use crate::config::{FieldConfig, FieldRow, RepeatableFieldConfig};
    use crate::evaluate::evaluate_condition;
    use crate::repeatable::RepeatableState;
    use crate::scope::ConditionScoper;
    use crate::store::{FieldStore, FlatValues, FormStore};
    use crate::transform::{flatten_values, structure_values};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::{json, Map, Value};
    use std::collections::{HashMap, HashSet};

    fn items_config() -> RepeatableFieldConfig {
        RepeatableFieldConfig::new(
            "items",
            vec![FieldRow {
                id: "line".to_string(),
                fields: vec![FieldConfig::new("name", "text"), FieldConfig::new("qty", "number")],
            }],
        )
    }

    fn configs() -> HashMap<String, RepeatableFieldConfig> {
        HashMap::from([("items".to_string(), items_config())])
    }

    fn values(pairs: &[(&str, Value)]) -> FlatValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // COMPOSITE KEYS
    // ═══════════════════════════════════════════════════════════════════════════════

    proptest! {
        #[test]
        fn prop_composite_key_round_trip(
            r in "[A-Za-z_][A-Za-z0-9_.-]{0,12}",
            k in "[A-Za-z0-9_]{1,6}",
            f in "[A-Za-z_][A-Za-z0-9_.]{0,12}",
        ) {
            let key = build_composite_key(&r, &k, &f);
            prop_assert_eq!(parse_composite_key(&key), Some(CompositeKey::new(&r, &k, &f)));
        }
    }

    #[test]
    fn test_plain_ids_are_not_composite() {
        assert_eq!(parse_composite_key("customerName"), None);
        assert_eq!(parse_composite_key("items[k0]"), None);
        assert_eq!(parse_composite_key("items[].name"), None);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FLATTEN / STRUCTURE
    // ═══════════════════════════════════════════════════════════════════════════════

    fn nested_strategy() -> impl Strategy<Value = Map<String, Value>> {
        (
            "[A-Za-z ]{0,10}",
            proptest::collection::vec(("[A-Za-z ]{0,10}", any::<i32>()), 1..6),
        )
            .prop_map(|(customer, lines)| {
                let items: Vec<Value> = lines
                    .into_iter()
                    .map(|(name, qty)| json!({ "name": name, "qty": qty }))
                    .collect();
                let mut map = Map::new();
                map.insert("customerName".to_string(), json!(customer));
                map.insert("items".to_string(), Value::Array(items));
                map
            })
    }

    proptest! {
        #[test]
        fn prop_flatten_structure_round_trip(nested in nested_strategy()) {
            let flat = flatten_values(&nested, &configs());
            let back = structure_values(&flat.values, &configs(), &flat.order);
            prop_assert_eq!(back, nested);
        }
    }

    #[test]
    fn test_order_example_round_trip() {
        let nested = json!({
            "customerName": "John",
            "items": [{ "name": "Widget", "qty": 2 }, { "name": "Gadget", "qty": 1 }]
        });
        let nested = nested.as_object().cloned().unwrap();

        let flat = flatten_values(&nested, &configs());
        assert_eq!(flat.values["items[k1].name"], json!("Gadget"));
        assert_eq!(flat.order["items"], vec!["k0", "k1"]);

        let back = structure_values(&flat.values, &configs(), &flat.order);
        assert_eq!(back, nested);
    }

    #[test]
    fn test_orphan_keys_are_excluded() {
        let flat = values(&[
            ("items[k0].name", json!("Widget")),
            ("items[k0].qty", json!(2)),
            ("items[k5].name", json!("Orphan")),
        ]);
        let order = HashMap::from([("items".to_string(), vec!["k0".to_string()])]);

        let nested = structure_values(&flat, &configs(), &order);

        assert_eq!(
            Value::Object(nested),
            json!({ "items": [{ "name": "Widget", "qty": 2 }] })
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // REPEATABLE BOUNDS & KEYS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_item_keys_are_never_reused() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config());

        let first = state.append(&mut store, None).unwrap();
        let second = state.append(&mut store, None).unwrap();
        assert!(state.remove(&mut store, &first));
        assert!(state.remove(&mut store, &second));

        assert_eq!(state.append(&mut store, None).as_deref(), Some("k2"));
    }

    #[test]
    fn test_max_is_enforced() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config().with_bounds(None, Some(2)));

        assert!(state.append(&mut store, None).is_some());
        assert!(state.append(&mut store, None).is_some());
        assert_eq!(state.append(&mut store, None), None);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_min_is_enforced() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config().with_bounds(Some(1), None));

        let key = state.append(&mut store, None).unwrap();
        assert!(!state.remove(&mut store, &key));
        assert_eq!(state.order(), [key.as_str()]);
        assert!(store.value("items[k0].name").is_some());
    }

    #[test]
    fn test_move_preserves_values() {
        let mut store = FormStore::default();
        let mut state = RepeatableState::new(items_config());
        state.append(&mut store, json!({ "name": "Widget" }).as_object());
        state.append(&mut store, json!({ "name": "Gadget" }).as_object());

        assert!(state.move_item(&mut store, 0, 1));

        assert_eq!(state.order(), ["k1", "k0"]);
        assert_eq!(store.value("items[k0].name"), Some(&json!("Widget")));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CONDITIONS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_scoping_is_selective() {
        let template_ids: HashSet<String> =
            ["type", "qty"].iter().map(|s| s.to_string()).collect();
        let condition = when("type").equals("custom").and(when("country").equals("DE"));

        let scoped = ConditionScoper::new("items", "k2", &template_ids).scope_condition(&condition);

        assert_eq!(
            scoped,
            when("items[k2].type")
                .equals("custom")
                .and(when("country").equals("DE"))
        );
    }

    #[test]
    fn test_and_or_semantics() {
        let values = values(&[("a", json!(1))]);
        let yes = when("a").equals(1);
        let no = when("a").equals(2);

        assert!(!evaluate_condition(
            &ConditionConfig::all(vec![yes.clone(), no.clone()]),
            &values
        ));
        assert!(evaluate_condition(&ConditionConfig::any(vec![yes, no]), &values));
    }
}
