//! Field Conditions Aggregator
//!
//! Maps every live field id to its conditional behavior and evaluates it.
//! Global fields keep their template behavior as written. Each live
//! repeatable item gets its own scoped copy of every template behavior,
//! built once when the item appears and dropped when it goes away.
//!
//! A reverse index from referenced key to dependent field ids lets a value
//! change re-evaluate only the fields that read it. Filtered and eager
//! recomputation produce the same map.

#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::composite_key::build_composite_key;
use crate::condition::{ConditionAxis, ConditionalBehavior};
use crate::config::{RepeatableFieldConfig, ResolvedForm};
use crate::evaluate::Evaluator;
use crate::scope::ConditionScoper;
use crate::store::FlatValues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
pub struct FieldConditions {
    pub visible: bool,
    pub disabled: bool,
    pub required: bool,
    pub readonly: bool,
}

impl Default for FieldConditions {
    fn default() -> Self {
        Self {
            visible: ConditionAxis::Visible.default_value(),
            disabled: ConditionAxis::Disabled.default_value(),
            required: ConditionAxis::Required.default_value(),
            readonly: ConditionAxis::Readonly.default_value(),
        }
    }
}

impl FieldConditions {
    fn set(&mut self, axis: ConditionAxis, value: bool) {
        match axis {
            ConditionAxis::Visible => self.visible = value,
            ConditionAxis::Disabled => self.disabled = value,
            ConditionAxis::Required => self.required = value,
            ConditionAxis::Readonly => self.readonly = value,
        }
    }
}

/// Evaluate every axis of one behavior; absent axes take their default.
pub fn evaluate_behavior(
    behavior: &ConditionalBehavior,
    values: &FlatValues,
    evaluator: &Evaluator,
) -> FieldConditions {
    let mut result = FieldConditions::default();
    for axis in ConditionAxis::ALL {
        if let Some(condition) = behavior.axis(axis) {
            result.set(axis, evaluator.evaluate(condition, values));
        }
    }
    result
}

#[derive(Debug, Clone, Default)]
pub struct FieldConditionsAggregator {
    behaviors: HashMap<String, ConditionalBehavior>,
    dependents: HashMap<String, BTreeSet<String>>,
}

impl FieldConditionsAggregator {
    /// Build behaviors for all global fields and every item listed in `orders`.
    pub fn build(form: &ResolvedForm, orders: &HashMap<String, Vec<String>>) -> Self {
        let mut aggregator = Self::default();
        for field in &form.fields {
            aggregator.insert(
                field.id.clone(),
                field.conditions.clone().unwrap_or_default(),
            );
        }
        for group_id in &form.repeatable_ids {
            let (Some(config), Some(order)) = (form.repeatables.get(group_id), orders.get(group_id))
            else {
                continue;
            };
            for item_key in order {
                aggregator.add_item(config, item_key);
            }
        }
        aggregator
    }

    /// Register the scoped behaviors of one repeatable item.
    pub fn add_item(&mut self, config: &RepeatableFieldConfig, item_key: &str) {
        let template_ids = config.template_field_ids();
        let scoper = ConditionScoper::new(&config.id, item_key, &template_ids);
        for field in &config.all_fields {
            let key = build_composite_key(&config.id, item_key, &field.id);
            let behavior = field
                .conditions
                .as_ref()
                .map(|b| scoper.scope_behavior(b))
                .unwrap_or_default();
            self.insert(key, behavior);
        }
    }

    /// Drop the behaviors of one removed repeatable item.
    pub fn remove_item(&mut self, config: &RepeatableFieldConfig, item_key: &str) {
        for field in &config.all_fields {
            let key = build_composite_key(&config.id, item_key, &field.id);
            self.remove(&key);
        }
    }

    fn insert(&mut self, field_id: String, behavior: ConditionalBehavior) {
        for referenced in behavior.referenced_fields() {
            self.dependents
                .entry(referenced)
                .or_default()
                .insert(field_id.clone());
        }
        self.behaviors.insert(field_id, behavior);
    }

    fn remove(&mut self, field_id: &str) {
        if let Some(behavior) = self.behaviors.remove(field_id) {
            for referenced in behavior.referenced_fields() {
                if let Some(set) = self.dependents.get_mut(&referenced) {
                    set.remove(field_id);
                    if set.is_empty() {
                        self.dependents.remove(&referenced);
                    }
                }
            }
        }
    }

    pub fn behaviors(&self) -> &HashMap<String, ConditionalBehavior> {
        &self.behaviors
    }

    pub fn behavior(&self, field_id: &str) -> Option<&ConditionalBehavior> {
        self.behaviors.get(field_id)
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.behaviors.contains_key(field_id)
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Field ids whose conditions read `key`.
    pub fn dependents_of(&self, key: &str) -> impl Iterator<Item = &String> {
        self.dependents.get(key).into_iter().flatten()
    }

    /// Recompute every live field.
    pub fn evaluate_all(
        &self,
        values: &FlatValues,
        evaluator: &Evaluator,
    ) -> HashMap<String, FieldConditions> {
        self.behaviors
            .iter()
            .map(|(id, behavior)| (id.clone(), evaluate_behavior(behavior, values, evaluator)))
            .collect()
    }

    /// Recompute only the fields that read one of `changed`.
    pub fn evaluate_affected<'k, I>(
        &self,
        changed: I,
        values: &FlatValues,
        evaluator: &Evaluator,
    ) -> HashMap<String, FieldConditions>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut affected: HashSet<&String> = HashSet::new();
        for key in changed {
            affected.extend(self.dependents_of(key));
        }
        affected
            .into_iter()
            .filter_map(|id| {
                self.behaviors
                    .get(id)
                    .map(|b| (id.clone(), evaluate_behavior(b, values, evaluator)))
            })
            .collect()
    }
}

/// One-shot aggregation: build every live behavior and evaluate it.
pub fn compute_field_conditions(
    form: &ResolvedForm,
    orders: &HashMap<String, Vec<String>>,
    values: &FlatValues,
    evaluator: &Evaluator,
) -> HashMap<String, FieldConditions> {
    FieldConditionsAggregator::build(form, orders).evaluate_all(values, evaluator)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn compute_field_conditions_native(
    config_json: serde_json::Value,
    values_json: serde_json::Value,
    order_json: serde_json::Value,
) -> napi::Result<serde_json::Value> {
    let form = crate::validate::parse_form_config(config_json, None)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let values: FlatValues = serde_json::from_value(values_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid values: {}", e)))?;
    let orders: HashMap<String, Vec<String>> = serde_json::from_value(order_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid order: {}", e)))?;
    let result = compute_field_conditions(&form, &orders, &values, &Evaluator::new());
    serde_json::to_value(result).map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::when;
    use crate::config::{FieldConfig, FieldRow, FormConfig, RowConfig};
    use crate::validate::validate_form_config;
    use serde_json::json;

    fn order_form() -> ResolvedForm {
        let config = FormConfig {
            id: "order".to_string(),
            rows: vec![
                RowConfig::Fields(FieldRow {
                    id: "head".to_string(),
                    fields: vec![
                        FieldConfig::new("country", "select"),
                        FieldConfig::new("vatId", "text").with_conditions(ConditionalBehavior {
                            visible: Some(when("country").is_in(vec![json!("DE"), json!("AT")])),
                            required: Some(when("country").exists()),
                            ..Default::default()
                        }),
                    ],
                }),
                RowConfig::Repeatable(RepeatableFieldConfig::new(
                    "items",
                    vec![FieldRow {
                        id: "line".to_string(),
                        fields: vec![
                            FieldConfig::new("type", "select"),
                            FieldConfig::new("note", "text").with_conditions(
                                ConditionalBehavior {
                                    visible: Some(
                                        when("type")
                                            .equals("custom")
                                            .and(when("country").equals("DE")),
                                    ),
                                    ..Default::default()
                                },
                            ),
                        ],
                    }],
                )),
            ],
        };
        validate_form_config(&config, None).unwrap()
    }

    fn orders(keys: &[&str]) -> HashMap<String, Vec<String>> {
        HashMap::from([(
            "items".to_string(),
            keys.iter().map(|k| k.to_string()).collect(),
        )])
    }

    #[test]
    fn test_every_live_field_gets_an_entry() {
        let form = order_form();
        let result = compute_field_conditions(
            &form,
            &orders(&["k0", "k3"]),
            &FlatValues::new(),
            &Evaluator::new(),
        );
        let mut ids: Vec<&String> = result.keys().collect();
        ids.sort();
        assert_eq!(
            ids,
            vec![
                "country",
                "items[k0].note",
                "items[k0].type",
                "items[k3].note",
                "items[k3].type",
                "vatId"
            ]
        );
        assert_eq!(result["country"], FieldConditions::default());
    }

    #[test]
    fn test_scoped_items_evaluate_independently() {
        let form = order_form();
        let values: FlatValues = [
            ("country".to_string(), json!("DE")),
            ("items[k0].type".to_string(), json!("custom")),
            ("items[k1].type".to_string(), json!("standard")),
        ]
        .into_iter()
        .collect();

        let result =
            compute_field_conditions(&form, &orders(&["k0", "k1"]), &values, &Evaluator::new());

        assert!(result["items[k0].note"].visible);
        assert!(!result["items[k1].note"].visible);
        assert!(result["vatId"].visible);
        assert!(result["vatId"].required);
        assert!(!result["vatId"].disabled);
    }

    #[test]
    fn test_filtered_recompute_converges_with_eager() {
        let form = order_form();
        let aggregator = FieldConditionsAggregator::build(&form, &orders(&["k0", "k1"]));
        let evaluator = Evaluator::new();

        let mut values: FlatValues = [
            ("country".to_string(), json!("FR")),
            ("items[k0].type".to_string(), json!("custom")),
        ]
        .into_iter()
        .collect();
        let mut current = aggregator.evaluate_all(&values, &evaluator);

        values.insert("country".to_string(), json!("DE"));
        let affected = aggregator.evaluate_affected(["country"], &values, &evaluator);
        let mut affected_ids: Vec<&String> = affected.keys().collect();
        affected_ids.sort();
        assert_eq!(affected_ids, vec!["items[k0].note", "items[k1].note", "vatId"]);
        current.extend(affected);

        assert_eq!(current, aggregator.evaluate_all(&values, &evaluator));
    }

    #[test]
    fn test_remove_item_cleans_dependents() {
        let form = order_form();
        let mut aggregator = FieldConditionsAggregator::build(&form, &orders(&["k0"]));
        let items = form.repeatable("items").unwrap();
        assert_eq!(aggregator.dependents_of("items[k0].type").count(), 1);

        aggregator.remove_item(items, "k0");
        assert!(!aggregator.contains("items[k0].note"));
        assert_eq!(aggregator.dependents_of("items[k0].type").count(), 0);
        assert_eq!(aggregator.dependents_of("country").count(), 1);

        aggregator.add_item(items, "k1");
        assert_eq!(aggregator.len(), 4);
    }
}
