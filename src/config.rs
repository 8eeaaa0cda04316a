//! Form Configuration Model
//!
//! Declarative schema as authored by the host: rows of fields and
//! repeatable groups. Deserializes from camelCase JSON with `kind`-tagged rows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::condition::ConditionalBehavior;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    pub id: String,
    pub component_id: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    /// Rule configuration handed to the external validator as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionalBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl FieldConfig {
    pub fn new(id: &str, component_id: &str) -> Self {
        Self {
            id: id.to_string(),
            component_id: component_id.to_string(),
            props: Map::new(),
            validation: None,
            conditions: None,
            default_value: None,
        }
    }

    pub fn with_conditions(mut self, conditions: ConditionalBehavior) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_validation(mut self, rules: Value) -> Self {
        self.validation = Some(rules);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRow {
    pub id: String,
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatableFieldConfig {
    pub id: String,
    #[serde(default)]
    pub rows: Vec<FieldRow>,
    /// Field templates. Derived from `rows` when left empty.
    #[serde(default)]
    pub all_fields: Vec<FieldConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Map<String, Value>>,
}

impl RepeatableFieldConfig {
    pub fn new(id: &str, rows: Vec<FieldRow>) -> Self {
        let all_fields = rows.iter().flat_map(|r| r.fields.iter().cloned()).collect();
        Self {
            id: id.to_string(),
            rows,
            all_fields,
            min: None,
            max: None,
            default_value: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_default_value(mut self, value: Map<String, Value>) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn template_field_ids(&self) -> HashSet<String> {
        self.all_fields.iter().map(|f| f.id.clone()).collect()
    }

    pub(crate) fn normalize(&mut self) {
        if self.all_fields.is_empty() {
            self.all_fields = self
                .rows
                .iter()
                .flat_map(|r| r.fields.iter().cloned())
                .collect();
        }
    }
}

/// A row is either a plain line of fields or a repeatable group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RowConfig {
    Fields(FieldRow),
    Repeatable(RepeatableFieldConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormConfig {
    pub id: String,
    pub rows: Vec<RowConfig>,
}

/// Component ids a form may reference.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: HashSet<String>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_components<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn register(&mut self, id: &str) {
        self.components.insert(id.to_string());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.components.contains(id)
    }
}

/// Internal configuration built from a validated [`FormConfig`].
#[derive(Debug, Clone)]
pub struct ResolvedForm {
    pub id: String,
    /// Global fields in declaration order.
    pub fields: Vec<FieldConfig>,
    pub repeatables: HashMap<String, RepeatableFieldConfig>,
    /// Repeatable ids in declaration order.
    pub repeatable_ids: Vec<String>,
}

impl ResolvedForm {
    pub fn field(&self, id: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn repeatable(&self, id: &str) -> Option<&RepeatableFieldConfig> {
        self.repeatables.get(id)
    }
}
