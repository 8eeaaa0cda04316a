//! Condition Evaluator
//!
//! Evaluates a condition tree against the flat value map. Evaluation is
//! total: a node that cannot be evaluated (unknown custom operator, bad
//! pattern) counts as `false` and emits a warning. `try_evaluate` exposes
//! the underlying error for callers that want it.

#[cfg(feature = "napi")]
use napi_derive::napi;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

use crate::condition::{ConditionConfig, LeafCondition, LogicalOperator, Operator};
use crate::store::FlatValues;

static NULL: Value = Value::Null;

lazy_static! {
    static ref DEFAULT_EVALUATOR: Evaluator = Evaluator::new();
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("Unknown operator '{operator}' on field '{field}'")]
    UnknownOperator { field: String, operator: String },

    #[error("Invalid pattern '{pattern}' on field '{field}': {reason}")]
    InvalidPattern {
        field: String,
        pattern: String,
        reason: String,
    },

    #[error("Operator 'matches' on field '{0}' requires a string pattern")]
    PatternNotString(String),

    #[error("Condition leaf has an empty field reference")]
    EmptyField,

    #[error("Condition group has no children")]
    EmptyGroup,
}

/// Signature of a registered operator: `(field value, condition value) -> bool`.
pub type OperatorFn = dyn Fn(&Value, &Value) -> bool + Send + Sync;

#[derive(Clone, Default)]
pub struct Evaluator {
    custom: HashMap<String, Arc<OperatorFn>>,
    patterns: Arc<Mutex<HashMap<String, Regex>>>,
}

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("Evaluator")
            .field("custom_operators", &names)
            .finish()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a custom operator by name.
    pub fn register_operator<F>(&mut self, name: &str, op: F)
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.custom.insert(name.to_string(), Arc::new(op));
    }

    pub fn has_operator(&self, name: &str) -> bool {
        self.custom.contains_key(name)
    }

    /// Permissive evaluation: failures are logged and count as `false`.
    pub fn evaluate(&self, condition: &ConditionConfig, values: &FlatValues) -> bool {
        match self.try_evaluate(condition, values) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "condition evaluation failed, treating as false");
                false
            }
        }
    }

    /// Empty `and` groups are vacuously true, empty `or` groups vacuously false.
    pub fn try_evaluate(
        &self,
        condition: &ConditionConfig,
        values: &FlatValues,
    ) -> Result<bool, EvalError> {
        match condition {
            ConditionConfig::Leaf(leaf) => self.evaluate_leaf(leaf, values),
            ConditionConfig::Group(group) => match group.logical_operator {
                LogicalOperator::And => {
                    for child in &group.conditions {
                        if !self.try_evaluate(child, values)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                LogicalOperator::Or => {
                    for child in &group.conditions {
                        if self.try_evaluate(child, values)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            },
        }
    }

    /// Check a tree up front without evaluating it: every operator resolves,
    /// every pattern compiles, no empty references or groups.
    pub fn check(&self, condition: &ConditionConfig) -> Result<(), EvalError> {
        match condition {
            ConditionConfig::Leaf(leaf) => {
                if leaf.field.is_empty() {
                    return Err(EvalError::EmptyField);
                }
                match &leaf.operator {
                    Operator::Custom(name) if !self.has_operator(name) => {
                        Err(EvalError::UnknownOperator {
                            field: leaf.field.clone(),
                            operator: name.clone(),
                        })
                    }
                    Operator::Matches => {
                        let pattern = leaf.value.as_ref().unwrap_or(&NULL);
                        self.with_pattern(&leaf.field, pattern, |_| ())
                    }
                    _ => Ok(()),
                }
            }
            ConditionConfig::Group(group) => {
                if group.conditions.is_empty() {
                    return Err(EvalError::EmptyGroup);
                }
                group.conditions.iter().try_for_each(|c| self.check(c))
            }
        }
    }

    fn evaluate_leaf(&self, leaf: &LeafCondition, values: &FlatValues) -> Result<bool, EvalError> {
        if leaf.field.is_empty() {
            return Err(EvalError::EmptyField);
        }
        let actual = values.get(&leaf.field).unwrap_or(&NULL);
        let expected = leaf.value.as_ref().unwrap_or(&NULL);

        let result = match &leaf.operator {
            Operator::Equals => strict_equals(actual, expected),
            Operator::NotEquals => !strict_equals(actual, expected),
            Operator::Contains => contains(actual, expected),
            Operator::GreaterThan => compare_numbers(actual, expected, |a, b| a > b),
            Operator::LessThan => compare_numbers(actual, expected, |a, b| a < b),
            Operator::GreaterThanOrEqual => compare_numbers(actual, expected, |a, b| a >= b),
            Operator::LessThanOrEqual => compare_numbers(actual, expected, |a, b| a <= b),
            Operator::In => is_member(actual, expected),
            Operator::NotIn => !is_member(actual, expected),
            Operator::Exists => !actual.is_null(),
            Operator::NotExists => actual.is_null(),
            Operator::StartsWith => match (actual, expected) {
                (Value::String(a), Value::String(b)) => a.starts_with(b.as_str()),
                _ => false,
            },
            Operator::EndsWith => match (actual, expected) {
                (Value::String(a), Value::String(b)) => a.ends_with(b.as_str()),
                _ => false,
            },
            Operator::Matches => self.with_pattern(&leaf.field, expected, |re| match actual {
                Value::String(s) => re.is_match(s),
                _ => false,
            })?,
            Operator::IsEmpty => is_empty(actual),
            Operator::IsNotEmpty => !is_empty(actual),
            Operator::Custom(name) => match self.custom.get(name) {
                Some(op) => op(actual, expected),
                None => {
                    return Err(EvalError::UnknownOperator {
                        field: leaf.field.clone(),
                        operator: name.clone(),
                    })
                }
            },
        };

        Ok(result)
    }

    fn with_pattern<R>(
        &self,
        field: &str,
        pattern: &Value,
        f: impl FnOnce(&Regex) -> R,
    ) -> Result<R, EvalError> {
        let pattern = match pattern {
            Value::String(p) => p,
            _ => return Err(EvalError::PatternNotString(field.to_string())),
        };

        // Poisoned cache: compile again.
        if let Ok(cache) = self.patterns.lock() {
            if let Some(re) = cache.get(pattern) {
                return Ok(f(re));
            }
        }

        let re = Regex::new(pattern).map_err(|e| EvalError::InvalidPattern {
            field: field.to_string(),
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        let result = f(&re);
        if let Ok(mut cache) = self.patterns.lock() {
            cache.insert(pattern.clone(), re);
        }
        Ok(result)
    }
}

/// Evaluate with the built-in operator set only.
pub fn evaluate_condition(condition: &ConditionConfig, values: &FlatValues) -> bool {
    DEFAULT_EVALUATOR.evaluate(condition, values)
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE SEMANTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Equality without coercion. Numbers compare by value so `1` equals `1.0`.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| strict_equals(a, b))
        }
        _ => a == b,
    }
}

fn array_contains(items: &[Value], needle: &Value) -> bool {
    items.iter().any(|item| strict_equals(item, needle))
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), Value::Array(needles)) => {
            needles.iter().all(|needle| array_contains(items, needle))
        }
        (Value::Array(items), scalar) => array_contains(items, scalar),
        (scalar, Value::Array(items)) if !scalar.is_null() => array_contains(items, scalar),
        _ => false,
    }
}

fn is_member(actual: &Value, set: &Value) -> bool {
    let set = match set {
        Value::Array(items) => items,
        _ => return false,
    };
    match actual {
        Value::Array(selected) => selected.iter().any(|v| array_contains(set, v)),
        scalar => array_contains(set, scalar),
    }
}

fn compare_numbers(actual: &Value, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        },
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn evaluate_condition_native(
    condition_json: serde_json::Value,
    values_json: serde_json::Value,
) -> napi::Result<bool> {
    let condition: ConditionConfig = serde_json::from_value(condition_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid condition: {}", e)))?;
    let values: FlatValues = serde_json::from_value(values_json)
        .map_err(|e| napi::Error::from_reason(format!("Invalid values: {}", e)))?;
    Ok(evaluate_condition(&condition, &values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::when;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> FlatValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_equals_is_strict() {
        let v = values(&[("qty", json!(2)), ("code", json!("2"))]);
        assert!(evaluate_condition(&when("qty").equals(2), &v));
        assert!(evaluate_condition(&when("qty").equals(2.0), &v));
        assert!(!evaluate_condition(&when("code").equals(2), &v));
        assert!(evaluate_condition(&when("code").not_equals(2), &v));
    }

    #[test]
    fn test_missing_field_equals_null() {
        let v = FlatValues::new();
        assert!(evaluate_condition(&when("ghost").equals(Value::Null), &v));
        assert!(!evaluate_condition(&when("ghost").equals(""), &v));
    }

    #[test]
    fn test_contains_variants() {
        let v = values(&[
            ("tags", json!(["a", "b", "c"])),
            ("name", json!("Widget Pro")),
            ("tier", json!("gold")),
        ]);
        assert!(evaluate_condition(&when("tags").contains("b"), &v));
        assert!(!evaluate_condition(&when("tags").contains("z"), &v));
        assert!(evaluate_condition(&when("tags").contains(json!(["a", "c"])), &v));
        assert!(!evaluate_condition(&when("tags").contains(json!(["a", "z"])), &v));
        assert!(evaluate_condition(&when("name").contains("Pro"), &v));
        assert!(evaluate_condition(&when("tier").contains(json!(["gold", "silver"])), &v));
        assert!(!evaluate_condition(&when("ghost").contains(json!([null])), &v));
    }

    #[test]
    fn test_numeric_comparisons() {
        let v = values(&[("age", json!(18)), ("label", json!("18"))]);
        assert!(evaluate_condition(&when("age").greater_than_or_equal(18), &v));
        assert!(!evaluate_condition(&when("age").greater_than(18), &v));
        assert!(evaluate_condition(&when("age").less_than(18.5), &v));
        assert!(evaluate_condition(&when("age").less_than_or_equal(18), &v));
        assert!(!evaluate_condition(&when("label").greater_than(1), &v));
        assert!(!evaluate_condition(&when("ghost").less_than(1), &v));
    }

    #[test]
    fn test_membership() {
        let v = values(&[("country", json!("DE")), ("langs", json!(["fr", "it"]))]);
        assert!(evaluate_condition(&when("country").is_in(vec![json!("DE"), json!("AT")]), &v));
        assert!(evaluate_condition(&when("country").not_in(vec![json!("US")]), &v));
        assert!(evaluate_condition(&when("langs").is_in(vec![json!("it")]), &v));
        let scalar_set = ConditionConfig::leaf("country", Operator::In, Some(json!("DE")));
        assert!(!evaluate_condition(&scalar_set, &v));
        let scalar_not_in = ConditionConfig::leaf("country", Operator::NotIn, Some(json!("DE")));
        assert!(evaluate_condition(&scalar_not_in, &v));
    }

    #[test]
    fn test_exists_counts_empty_string() {
        let v = values(&[("note", json!("")), ("gone", Value::Null)]);
        assert!(evaluate_condition(&when("note").exists(), &v));
        assert!(evaluate_condition(&when("gone").not_exists(), &v));
        assert!(evaluate_condition(&when("missing").not_exists(), &v));
    }

    #[test]
    fn test_and_or_semantics() {
        let v = values(&[("a", json!(1))]);
        let t = when("a").equals(1);
        let f = when("a").equals(2);
        assert!(!evaluate_condition(&ConditionConfig::all(vec![t.clone(), f.clone()]), &v));
        assert!(evaluate_condition(&ConditionConfig::any(vec![t, f]), &v));
    }

    #[test]
    fn test_empty_groups_policy() {
        let v = FlatValues::new();
        assert!(evaluate_condition(&ConditionConfig::all(vec![]), &v));
        assert!(!evaluate_condition(&ConditionConfig::any(vec![]), &v));
    }

    #[test]
    fn test_string_operators() {
        let v = values(&[("email", json!("ops@example.com")), ("blank", json!(""))]);
        let starts = ConditionConfig::leaf("email", Operator::StartsWith, Some(json!("ops")));
        let ends = ConditionConfig::leaf("email", Operator::EndsWith, Some(json!(".org")));
        assert!(evaluate_condition(&starts, &v));
        assert!(!evaluate_condition(&ends, &v));
        assert!(evaluate_condition(&when("email").matches(r"^[^@]+@example\.com$"), &v));
        let empty = ConditionConfig::leaf("blank", Operator::IsEmpty, None);
        assert!(evaluate_condition(&empty, &v));
    }

    #[test]
    fn test_failures_are_false_and_reported() {
        let v = values(&[("email", json!("x"))]);
        let bad_pattern = when("email").matches("([");
        assert!(!evaluate_condition(&bad_pattern, &v));
        assert!(matches!(
            DEFAULT_EVALUATOR.try_evaluate(&bad_pattern, &v),
            Err(EvalError::InvalidPattern { .. })
        ));

        let unknown = when("email").custom("isPalindrome", None);
        assert!(!evaluate_condition(&unknown, &v));
        let guarded = ConditionConfig::any(vec![unknown, when("email").exists()]);
        assert!(!evaluate_condition(&guarded, &v));
    }

    #[test]
    fn test_custom_operator() {
        let mut evaluator = Evaluator::new();
        evaluator.register_operator("isEven", |actual, _| {
            actual.as_i64().map(|n| n % 2 == 0).unwrap_or(false)
        });
        let v = values(&[("n", json!(4))]);
        assert!(evaluator.evaluate(&when("n").custom("isEven", None), &v));
        assert!(evaluator.check(&when("n").custom("isEven", None)).is_ok());
        assert!(Evaluator::new().check(&when("n").custom("isEven", None)).is_err());
    }

    #[test]
    fn test_check_flags_empty_group() {
        let evaluator = Evaluator::new();
        assert_eq!(
            evaluator.check(&ConditionConfig::all(vec![])),
            Err(EvalError::EmptyGroup)
        );
        assert!(evaluator.check(&when("a").matches("^a+$")).is_ok());
    }
}
