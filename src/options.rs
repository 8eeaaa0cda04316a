use serde::{Deserialize, Serialize};

/// Runtime switches for a [`FormState`](crate::form::FormState).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    /// Reject forms whose condition trees cannot be evaluated (unknown
    /// operators, bad patterns, empty groups) instead of letting them fall
    /// back to `false` at runtime.
    pub strict_conditions: bool,
    /// On a value change, re-evaluate only fields whose conditions read it.
    /// Off means every live field is re-evaluated.
    pub dependency_tracking: bool,
    /// Seed `min` items into repeatable groups that start out empty.
    pub prefill_min_items: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strict_conditions: false,
            dependency_tracking: true,
            prefill_min_items: true,
        }
    }
}

impl EngineOptions {
    pub fn strict() -> Self {
        Self {
            strict_conditions: true,
            ..Self::default()
        }
    }
}
