//! Value Structuring / Flattening
//!
//! Converts between nested form data, where a repeatable group is an array of
//! objects, and the flat store, where each item field sits under its own
//! composite key. `structure` output is the submission payload.

#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::composite_key::{build_composite_key, is_composite_key};
use crate::config::RepeatableFieldConfig;
use crate::repeatable::item_key;
use crate::store::FlatValues;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlattenedValues {
    pub values: FlatValues,
    pub order: HashMap<String, Vec<String>>,
    pub next_keys: HashMap<String, u64>,
}

/// Nested data to flat store. Arrays under a known group id get sequential
/// keys `k0..kN`; everything else passes through unchanged.
pub fn flatten_values(
    nested: &Map<String, Value>,
    configs: &HashMap<String, RepeatableFieldConfig>,
) -> FlattenedValues {
    let mut out = FlattenedValues::default();

    for (key, value) in nested {
        let items = match value {
            Value::Array(items) if configs.contains_key(key) => items,
            _ => {
                out.values.insert(key.clone(), value.clone());
                continue;
            }
        };

        let mut order = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let k = item_key(index as u64);
            if let Value::Object(fields) = item {
                for (field_id, field_value) in fields {
                    out.values
                        .insert(build_composite_key(key, &k, field_id), field_value.clone());
                }
            }
            order.push(k);
        }

        out.next_keys.insert(key.clone(), items.len() as u64);
        out.order.insert(key.clone(), order);
    }

    out
}

/// Flat store to nested data. `order` decides which items exist and in
/// which sequence; composite keys of items missing from it are dropped.
pub fn structure_values(
    flat: &FlatValues,
    configs: &HashMap<String, RepeatableFieldConfig>,
    order: &HashMap<String, Vec<String>>,
) -> Map<String, Value> {
    let mut out = Map::new();
    let mut groups: HashSet<&str> = HashSet::new();

    for (group_id, keys) in order {
        if keys.is_empty() {
            continue;
        }
        let Some(config) = configs.get(group_id) else {
            continue;
        };

        let items: Vec<Value> = keys
            .iter()
            .map(|k| {
                let mut item = Map::new();
                for field in &config.all_fields {
                    if let Some(v) = flat.get(&build_composite_key(group_id, k, &field.id)) {
                        item.insert(field.id.clone(), v.clone());
                    }
                }
                Value::Object(item)
            })
            .collect();

        groups.insert(group_id.as_str());
        out.insert(group_id.clone(), Value::Array(items));
    }

    for (key, value) in flat {
        if is_composite_key(key) || groups.contains(key.as_str()) {
            continue;
        }
        out.insert(key.clone(), value.clone());
    }

    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
fn parse_configs(configs_json: serde_json::Value) -> napi::Result<HashMap<String, RepeatableFieldConfig>> {
    let list: Vec<RepeatableFieldConfig> = serde_json::from_value(configs_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid repeatable configs: {}", e)))?;
    Ok(list
        .into_iter()
        .map(|mut c| {
            c.normalize();
            (c.id.clone(), c)
        })
        .collect())
}

#[cfg(feature = "napi")]
#[napi]
pub fn flatten_values_native(
    data_json: serde_json::Value,
    configs_json: serde_json::Value,
) -> napi::Result<serde_json::Value> {
    let data: Map<String, Value> = serde_json::from_value(data_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid data: {}", e)))?;
    let configs = parse_configs(configs_json)?;
    serde_json::to_value(flatten_values(&data, &configs))
        .map_err(|e| napi::Error::from_reason(e.to_string()))
}

#[cfg(feature = "napi")]
#[napi]
pub fn structure_values_native(
    values_json: serde_json::Value,
    configs_json: serde_json::Value,
    order_json: serde_json::Value,
) -> napi::Result<serde_json::Value> {
    let values: FlatValues = serde_json::from_value(values_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid values: {}", e)))?;
    let order: HashMap<String, Vec<String>> = serde_json::from_value(order_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid order: {}", e)))?;
    let configs = parse_configs(configs_json)?;
    Ok(Value::Object(structure_values(&values, &configs, &order)))
}
