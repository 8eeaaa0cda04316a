//! Condition Scoper
//!
//! A repeatable template's conditions are written against bare field ids.
//! Instantiating the template for one item rewrites every reference that
//! names a template field into that item's composite key. References to
//! anything else (global fields, other groups) are left alone, which is how
//! a template condition can still read a form-level field.

use std::collections::HashSet;

use crate::composite_key::build_composite_key;
use crate::condition::{ConditionConfig, ConditionGroup, ConditionalBehavior, LeafCondition};

/// Rewrites field references for a single `(repeatable_id, item_key)` pair.
pub struct ConditionScoper<'a> {
    pub repeatable_id: &'a str,
    pub item_key: &'a str,
    pub template_field_ids: &'a HashSet<String>,
}

impl<'a> ConditionScoper<'a> {
    pub fn new(
        repeatable_id: &'a str,
        item_key: &'a str,
        template_field_ids: &'a HashSet<String>,
    ) -> Self {
        Self {
            repeatable_id,
            item_key,
            template_field_ids,
        }
    }

    /// Resolve a single reference: template fields become composite keys.
    pub fn resolve(&self, field: &str) -> String {
        if self.template_field_ids.contains(field) {
            build_composite_key(self.repeatable_id, self.item_key, field)
        } else {
            field.to_string()
        }
    }

    /// Always returns a freshly built tree.
    pub fn scope_condition(&self, condition: &ConditionConfig) -> ConditionConfig {
        match condition {
            ConditionConfig::Leaf(leaf) => ConditionConfig::Leaf(LeafCondition {
                field: self.resolve(&leaf.field),
                operator: leaf.operator.clone(),
                value: leaf.value.clone(),
            }),
            ConditionConfig::Group(group) => ConditionConfig::Group(ConditionGroup {
                logical_operator: group.logical_operator,
                conditions: group
                    .conditions
                    .iter()
                    .map(|child| self.scope_condition(child))
                    .collect(),
            }),
        }
    }

    pub fn scope_behavior(&self, behavior: &ConditionalBehavior) -> ConditionalBehavior {
        ConditionalBehavior {
            visible: behavior.visible.as_ref().map(|c| self.scope_condition(c)),
            disabled: behavior.disabled.as_ref().map(|c| self.scope_condition(c)),
            required: behavior.required.as_ref().map(|c| self.scope_condition(c)),
            readonly: behavior.readonly.as_ref().map(|c| self.scope_condition(c)),
        }
    }
}

pub fn scope_conditional_behavior(
    behavior: &ConditionalBehavior,
    repeatable_id: &str,
    item_key: &str,
    template_field_ids: &HashSet<String>,
) -> ConditionalBehavior {
    ConditionScoper::new(repeatable_id, item_key, template_field_ids).scope_behavior(behavior)
}
