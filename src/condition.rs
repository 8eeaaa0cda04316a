//! Condition Data Model
//!
//! Conditions are a closed tree: a leaf compares one field's current value,
//! a group combines children with `and` / `or`. A node is a group exactly
//! when it carries `logicalOperator`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Comparison applied by a leaf condition.
///
/// Unknown names are kept as `Custom` so they can be resolved against
/// operators registered on an [`Evaluator`](crate::evaluate::Evaluator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    In,
    NotIn,
    Exists,
    NotExists,
    StartsWith,
    EndsWith,
    Matches,
    IsEmpty,
    IsNotEmpty,
    Custom(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "notEquals",
            Operator::Contains => "contains",
            Operator::GreaterThan => "greaterThan",
            Operator::LessThan => "lessThan",
            Operator::GreaterThanOrEqual => "greaterThanOrEqual",
            Operator::LessThanOrEqual => "lessThanOrEqual",
            Operator::In => "in",
            Operator::NotIn => "notIn",
            Operator::Exists => "exists",
            Operator::NotExists => "notExists",
            Operator::StartsWith => "startsWith",
            Operator::EndsWith => "endsWith",
            Operator::Matches => "matches",
            Operator::IsEmpty => "isEmpty",
            Operator::IsNotEmpty => "isNotEmpty",
            Operator::Custom(name) => name,
        }
    }
}

impl From<String> for Operator {
    fn from(name: String) -> Self {
        match name.as_str() {
            "equals" => Operator::Equals,
            "notEquals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "greaterThan" => Operator::GreaterThan,
            "lessThan" => Operator::LessThan,
            "greaterThanOrEqual" => Operator::GreaterThanOrEqual,
            "lessThanOrEqual" => Operator::LessThanOrEqual,
            "in" => Operator::In,
            "notIn" => Operator::NotIn,
            "exists" => Operator::Exists,
            "notExists" => Operator::NotExists,
            "startsWith" => Operator::StartsWith,
            "endsWith" => Operator::EndsWith,
            "matches" => Operator::Matches,
            "isEmpty" => Operator::IsEmpty,
            "isNotEmpty" => Operator::IsNotEmpty,
            _ => Operator::Custom(name),
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONDITION TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafCondition {
    /// Plain id for global fields, composite key for repeatable-scoped fields.
    pub field: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionGroup {
    pub logical_operator: LogicalOperator,
    pub conditions: Vec<ConditionConfig>,
}

/// A node of a condition tree.
///
/// `Group` is listed first so that untagged deserialization only falls back
/// to `Leaf` when `logicalOperator` is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionConfig {
    Group(ConditionGroup),
    Leaf(LeafCondition),
}

impl ConditionConfig {
    pub fn leaf(field: impl Into<String>, operator: Operator, value: Option<Value>) -> Self {
        ConditionConfig::Leaf(LeafCondition {
            field: field.into(),
            operator,
            value,
        })
    }

    pub fn all(conditions: Vec<ConditionConfig>) -> Self {
        ConditionConfig::Group(ConditionGroup {
            logical_operator: LogicalOperator::And,
            conditions,
        })
    }

    pub fn any(conditions: Vec<ConditionConfig>) -> Self {
        ConditionConfig::Group(ConditionGroup {
            logical_operator: LogicalOperator::Or,
            conditions,
        })
    }

    /// Combine with another condition under `and`, flattening an existing `and` group.
    pub fn and(self, other: impl Into<ConditionConfig>) -> Self {
        self.combine(LogicalOperator::And, other.into())
    }

    /// Combine with another condition under `or`, flattening an existing `or` group.
    pub fn or(self, other: impl Into<ConditionConfig>) -> Self {
        self.combine(LogicalOperator::Or, other.into())
    }

    fn combine(self, op: LogicalOperator, other: ConditionConfig) -> Self {
        match self {
            ConditionConfig::Group(mut group) if group.logical_operator == op => {
                group.conditions.push(other);
                ConditionConfig::Group(group)
            }
            node => ConditionConfig::Group(ConditionGroup {
                logical_operator: op,
                conditions: vec![node, other],
            }),
        }
    }
}

/// Collect every field id read by a condition tree.
pub fn referenced_fields(condition: &ConditionConfig) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    collect_fields(condition, &mut fields);
    fields
}

fn collect_fields(condition: &ConditionConfig, fields: &mut BTreeSet<String>) {
    match condition {
        ConditionConfig::Leaf(leaf) => {
            fields.insert(leaf.field.clone());
        }
        ConditionConfig::Group(group) => {
            for child in &group.conditions {
                collect_fields(child, fields);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONDITIONAL BEHAVIOR
// ═══════════════════════════════════════════════════════════════════════════════

/// One of the independently evaluated flags of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionAxis {
    Visible,
    Disabled,
    Required,
    Readonly,
}

impl ConditionAxis {
    pub const ALL: [ConditionAxis; 4] = [
        ConditionAxis::Visible,
        ConditionAxis::Disabled,
        ConditionAxis::Required,
        ConditionAxis::Readonly,
    ];

    /// Value used when the axis has no condition.
    pub fn default_value(self) -> bool {
        matches!(self, ConditionAxis::Visible)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalBehavior {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<ConditionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<ConditionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<ConditionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<ConditionConfig>,
}

impl ConditionalBehavior {
    pub fn axis(&self, axis: ConditionAxis) -> Option<&ConditionConfig> {
        match axis {
            ConditionAxis::Visible => self.visible.as_ref(),
            ConditionAxis::Disabled => self.disabled.as_ref(),
            ConditionAxis::Required => self.required.as_ref(),
            ConditionAxis::Readonly => self.readonly.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        ConditionAxis::ALL.iter().all(|axis| self.axis(*axis).is_none())
    }

    /// Every field id read by any axis.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        for axis in ConditionAxis::ALL {
            if let Some(condition) = self.axis(axis) {
                collect_fields(condition, &mut fields);
            }
        }
        fields
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Start a leaf condition on `field`: `when("country").equals(json!("DE"))`.
pub fn when(field: impl Into<String>) -> ConditionBuilder {
    ConditionBuilder {
        field: field.into(),
    }
}

pub struct ConditionBuilder {
    field: String,
}

impl ConditionBuilder {
    fn finish(self, operator: Operator, value: Option<Value>) -> ConditionConfig {
        ConditionConfig::leaf(self.field, operator, value)
    }

    pub fn equals(self, value: impl Into<Value>) -> ConditionConfig {
        self.finish(Operator::Equals, Some(value.into()))
    }

    pub fn not_equals(self, value: impl Into<Value>) -> ConditionConfig {
        self.finish(Operator::NotEquals, Some(value.into()))
    }

    pub fn contains(self, value: impl Into<Value>) -> ConditionConfig {
        self.finish(Operator::Contains, Some(value.into()))
    }

    pub fn greater_than(self, value: impl Into<Value>) -> ConditionConfig {
        self.finish(Operator::GreaterThan, Some(value.into()))
    }

    pub fn less_than(self, value: impl Into<Value>) -> ConditionConfig {
        self.finish(Operator::LessThan, Some(value.into()))
    }

    pub fn greater_than_or_equal(self, value: impl Into<Value>) -> ConditionConfig {
        self.finish(Operator::GreaterThanOrEqual, Some(value.into()))
    }

    pub fn less_than_or_equal(self, value: impl Into<Value>) -> ConditionConfig {
        self.finish(Operator::LessThanOrEqual, Some(value.into()))
    }

    pub fn is_in(self, values: Vec<Value>) -> ConditionConfig {
        self.finish(Operator::In, Some(Value::Array(values)))
    }

    pub fn not_in(self, values: Vec<Value>) -> ConditionConfig {
        self.finish(Operator::NotIn, Some(Value::Array(values)))
    }

    pub fn exists(self) -> ConditionConfig {
        self.finish(Operator::Exists, None)
    }

    pub fn not_exists(self) -> ConditionConfig {
        self.finish(Operator::NotExists, None)
    }

    pub fn matches(self, pattern: &str) -> ConditionConfig {
        self.finish(Operator::Matches, Some(Value::String(pattern.to_string())))
    }

    pub fn custom(self, name: &str, value: Option<Value>) -> ConditionConfig {
        self.finish(Operator::Custom(name.to_string()), value)
    }
}
