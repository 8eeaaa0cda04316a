//! # Formstate Engine Ground Truth
//!
//! ## Value Invariants
//!
//! 1. **One Flat Store**: every value lives in a single map. Global fields sit
//!    under their own id, repeatable item fields under a composite key
//!    `{repeatableId}[{itemKey}].{fieldId}`.
//!
//! 2. **Stable Item Keys**: item keys are `k0, k1, ...` from a per-group
//!    counter that only grows. A key is never reissued, so values never move
//!    when items are reordered or removed.
//!
//! 3. **Order Is Separate**: display order is a list of item keys held by the
//!    group. Moving an item rewrites that list and nothing else.
//!
//! 4. **Removal Purges**: removing an item deletes every store entry it owns
//!    (value, errors, touched, validation state, conditions) before any
//!    subscriber is told.
//!
//! ## Condition Invariants
//!
//! 1. **Scoped Templates**: a template condition that names a sibling template
//!    field is rewritten per item to that item's composite key. Any other
//!    reference stays global.
//!
//! 2. **Permissive Runtime**: an unknown operator or bad pattern evaluates to
//!    `false` and logs a warning. Strict checking happens at build time only
//!    (`EngineOptions::strict_conditions`).
//!
//! 3. **Hidden Means Valid**: an invisible field carries no errors and can
//!    never block submission.
//!
//! ## Notification
//!
//! Mutations apply fully, then queued events are delivered. `batch` defers
//! delivery until the outermost batch ends.

#[cfg(feature = "napi")]
use napi_derive::napi;

mod composite_key;
mod condition;
mod config;
mod evaluate;
mod field_conditions;
mod form;
mod options;
mod repeatable;
mod scope;
mod store;
mod transform;
mod validate;

#[cfg(test)]
mod safety_tests;

pub use composite_key::{
    build_composite_key, contains_reserved_chars, is_composite_key, parse_composite_key,
    CompositeKey,
};
pub use condition::{
    referenced_fields, when, ConditionAxis, ConditionBuilder, ConditionConfig, ConditionGroup,
    ConditionalBehavior, LeafCondition, LogicalOperator, Operator,
};
pub use config::{
    ComponentRegistry, FieldConfig, FieldRow, FormConfig, RepeatableFieldConfig, ResolvedForm,
    RowConfig,
};
pub use evaluate::{evaluate_condition, strict_equals, EvalError, Evaluator};
pub use field_conditions::{
    compute_field_conditions, evaluate_behavior, FieldConditions, FieldConditionsAggregator,
};
pub use form::{FormState, SubmitError, ValidationTicket};
pub use options::EngineOptions;
pub use repeatable::{item_key, RepeatableState, ITEM_KEY_PREFIX};
pub use scope::{scope_conditional_behavior, ConditionScoper};
pub use store::{
    FieldError, FieldStore, FlatValues, FormStore, StoreEvent, SubscriptionId, Topic,
    ValidationState,
};
pub use transform::{flatten_values, structure_values, FlattenedValues};
pub use validate::*;

#[cfg(feature = "napi")]
pub use composite_key::{build_composite_key_native, parse_composite_key_native};
#[cfg(feature = "napi")]
pub use evaluate::evaluate_condition_native;
#[cfg(feature = "napi")]
pub use field_conditions::compute_field_conditions_native;
#[cfg(feature = "napi")]
pub use transform::{flatten_values_native, structure_values_native};

#[cfg(feature = "napi")]
#[napi]
pub fn engine_bridge() -> String {
    "Formstate Native Bridge Connected".to_string()
}
