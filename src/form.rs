//! Form State
//!
//! One live form instance: the flat store, one state machine per repeatable
//! group, the condition aggregator and the evaluator, kept consistent by
//! applying every mutation synchronously and only then notifying subscribers.
//!
//! Hidden fields never show errors. When a field turns invisible its errors
//! are cleared, its validation state is forced to `Valid`, and any validation
//! still in flight for it is invalidated, so a late result cannot bring the
//! error back.

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ComponentRegistry, FormConfig, ResolvedForm};
use crate::evaluate::Evaluator;
use crate::field_conditions::{FieldConditions, FieldConditionsAggregator};
use crate::options::EngineOptions;
use crate::repeatable::RepeatableState;
use crate::store::{
    FieldError, FieldStore, FlatValues, FormStore, StoreEvent, SubscriptionId, Topic,
    ValidationState,
};
use crate::transform::{flatten_values, structure_values};
use crate::validate::{check_conditions, validate_form_config, ConfigError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Validation still running for: {}", .fields.join(", "))]
    Validating { fields: Vec<String> },

    #[error("Form has errors on: {}", .fields.join(", "))]
    Invalid { fields: Vec<String> },
}

/// Handle for one asynchronous validation run of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTicket {
    key: String,
    generation: u64,
}

impl ValidationTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug)]
pub struct FormState {
    form: ResolvedForm,
    store: FormStore,
    repeatables: HashMap<String, RepeatableState>,
    aggregator: FieldConditionsAggregator,
    evaluator: Evaluator,
    options: EngineOptions,
    generations: HashMap<String, u64>,
}

impl FormState {
    pub fn new(
        form: ResolvedForm,
        initial: &Map<String, Value>,
        options: EngineOptions,
    ) -> Result<Self, ConfigError> {
        Self::with_evaluator(form, initial, options, Evaluator::new())
    }

    /// Validate `config` and build a form from it.
    pub fn from_config(
        config: &FormConfig,
        registry: Option<&ComponentRegistry>,
        initial: &Map<String, Value>,
        options: EngineOptions,
    ) -> Result<Self, ConfigError> {
        let form = validate_form_config(config, registry)?;
        Self::new(form, initial, options)
    }

    pub fn with_evaluator(
        form: ResolvedForm,
        initial: &Map<String, Value>,
        options: EngineOptions,
        evaluator: Evaluator,
    ) -> Result<Self, ConfigError> {
        if options.strict_conditions {
            check_conditions(&form, &evaluator)?;
        }

        let flattened = flatten_values(initial, &form.repeatables);
        let mut values = flattened.values;
        for field in &form.fields {
            if let Some(default) = &field.default_value {
                values
                    .entry(field.id.clone())
                    .or_insert_with(|| default.clone());
            }
        }

        let mut store = FormStore::new(values);
        let mut repeatables = HashMap::new();
        for group_id in &form.repeatable_ids {
            let Some(config) = form.repeatables.get(group_id) else {
                continue;
            };
            let mut state = match flattened.order.get(group_id) {
                Some(order) => RepeatableState::with_items(
                    config.clone(),
                    order.clone(),
                    flattened.next_keys.get(group_id).copied().unwrap_or(0),
                ),
                None => RepeatableState::new(config.clone()),
            };
            if options.prefill_min_items && state.is_empty() {
                for _ in 0..config.min.unwrap_or(0) {
                    state.append(&mut store, None);
                }
            }
            repeatables.insert(group_id.clone(), state);
        }

        let orders = repeatables
            .iter()
            .map(|(id, state)| (id.clone(), state.order().to_vec()))
            .collect();
        let aggregator = FieldConditionsAggregator::build(&form, &orders);

        let mut state = FormState {
            form,
            store,
            repeatables,
            aggregator,
            evaluator,
            options,
            generations: HashMap::new(),
        };
        state.recompute_all();
        state.store.mark_clean();
        debug!(form = %state.form.id, fields = state.aggregator.len(), "form state ready");
        Ok(state)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────────────────

    pub fn form(&self) -> &ResolvedForm {
        &self.form
    }

    pub fn store(&self) -> &FormStore {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.store.value(key)
    }

    pub fn values(&self) -> &FlatValues {
        self.store.values()
    }

    /// Evaluated flags of a live field.
    pub fn conditions(&self, key: &str) -> Option<FieldConditions> {
        self.store.conditions(key)
    }

    pub fn is_visible(&self, key: &str) -> bool {
        self.conditions(key).map_or(false, |c| c.visible)
    }

    pub fn is_live(&self, key: &str) -> bool {
        self.aggregator.contains(key)
    }

    pub fn errors(&self, key: &str) -> &[FieldError] {
        self.store.errors(key)
    }

    pub fn validation_state(&self, key: &str) -> ValidationState {
        self.store.validation_state(key)
    }

    pub fn is_touched(&self, key: &str) -> bool {
        self.store.is_touched(key)
    }

    pub fn is_valid(&self) -> bool {
        self.store.is_valid()
    }

    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    pub fn order(&self, repeatable_id: &str) -> Option<&[String]> {
        self.repeatables.get(repeatable_id).map(|s| s.order())
    }

    pub fn orders(&self) -> HashMap<String, Vec<String>> {
        self.repeatables
            .iter()
            .map(|(id, state)| (id.clone(), state.order().to_vec()))
            .collect()
    }

    pub fn repeatable(&self, repeatable_id: &str) -> Option<&RepeatableState> {
        self.repeatables.get(repeatable_id)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Values
    // ───────────────────────────────────────────────────────────────────────────

    pub fn set_value(&mut self, key: &str, value: Value) {
        self.store.set_value(key, value);
        self.store.mark_dirty();
        if self.options.dependency_tracking {
            let results =
                self.aggregator
                    .evaluate_affected([key], self.store.values(), &self.evaluator);
            self.apply_conditions(results);
        } else {
            self.recompute_all();
        }
        self.store.flush();
    }

    pub fn touch(&mut self, key: &str) {
        self.store.touch(key);
    }

    /// Register a custom operator and re-evaluate every field.
    pub fn register_operator<F>(&mut self, name: &str, op: F)
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.evaluator.register_operator(name, op);
        self.recompute_all();
        self.store.flush();
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Repeatable groups
    // ───────────────────────────────────────────────────────────────────────────

    pub fn append(
        &mut self,
        repeatable_id: &str,
        default_value: Option<&Map<String, Value>>,
    ) -> Option<String> {
        let state = self.repeatables.get_mut(repeatable_id)?;
        let key = state.append(&mut self.store, default_value)?;
        self.aggregator.add_item(state.config(), &key);
        self.recompute_all();
        self.store.flush();
        Some(key)
    }

    pub fn insert(
        &mut self,
        repeatable_id: &str,
        index: usize,
        default_value: Option<&Map<String, Value>>,
    ) -> Option<String> {
        let state = self.repeatables.get_mut(repeatable_id)?;
        let key = state.insert(&mut self.store, index, default_value)?;
        self.aggregator.add_item(state.config(), &key);
        self.recompute_all();
        self.store.flush();
        Some(key)
    }

    pub fn remove(&mut self, repeatable_id: &str, item_key: &str) -> bool {
        let Some(state) = self.repeatables.get_mut(repeatable_id) else {
            return false;
        };
        if !state.remove(&mut self.store, item_key) {
            return false;
        }
        for key in state.field_keys(item_key) {
            self.generations.remove(&key);
        }
        self.aggregator.remove_item(state.config(), item_key);
        self.recompute_all();
        self.store.flush();
        true
    }

    pub fn move_item(&mut self, repeatable_id: &str, from: usize, to: usize) -> bool {
        let Some(state) = self.repeatables.get_mut(repeatable_id) else {
            return false;
        };
        if !state.move_item(&mut self.store, from, to) {
            return false;
        }
        self.recompute_all();
        self.store.flush();
        true
    }

    /// Run several mutations; subscribers hear about them once, at the end.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.store.begin_batch();
        let result = f(self);
        self.store.end_batch();
        result
    }

    pub fn subscribe<F>(&mut self, topic: Topic, listener: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + 'static,
    {
        self.store.subscribe(topic, listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Conditions
    // ───────────────────────────────────────────────────────────────────────────

    fn recompute_all(&mut self) {
        let results = self
            .aggregator
            .evaluate_all(self.store.values(), &self.evaluator);
        self.apply_conditions(results);
    }

    fn apply_conditions(&mut self, results: HashMap<String, FieldConditions>) {
        for (key, conditions) in results {
            self.store.set_conditions(&key, conditions);
            if !conditions.visible {
                self.hide_field(&key);
            }
        }
        self.store.recompute_validity();
    }

    fn hide_field(&mut self, key: &str) {
        self.store.set_errors(key, Vec::new());
        self.store
            .set_validation_state(key, ValidationState::Valid);
        *self.generations.entry(key.to_string()).or_insert(0) += 1;
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Validation lifecycle
    // ───────────────────────────────────────────────────────────────────────────

    /// Mark a field as validating. `None` for fields that are not live or not
    /// visible; those stay `Valid`.
    pub fn begin_validation(&mut self, key: &str) -> Option<ValidationTicket> {
        if !self.is_live(key) || !self.is_visible(key) {
            return None;
        }
        let generation = self.generations.entry(key.to_string()).or_insert(0);
        *generation += 1;
        let ticket = ValidationTicket {
            key: key.to_string(),
            generation: *generation,
        };
        self.store
            .set_validation_state(key, ValidationState::Validating);
        self.store.flush();
        Some(ticket)
    }

    /// Apply the result of a validation run. Results for superseded runs,
    /// removed items, or fields hidden in the meantime are dropped.
    pub fn complete_validation(
        &mut self,
        ticket: ValidationTicket,
        errors: Vec<FieldError>,
    ) -> bool {
        let current = self.generations.get(&ticket.key).copied();
        if current != Some(ticket.generation) || !self.is_visible(&ticket.key) {
            warn!(field = %ticket.key, "discarding stale validation result");
            return false;
        }
        self.write_errors(&ticket.key, errors);
        true
    }

    /// Record the outcome of a synchronous validator. Ignored for hidden fields.
    pub fn set_errors(&mut self, key: &str, errors: Vec<FieldError>) -> bool {
        if !self.is_live(key) || !self.is_visible(key) {
            return false;
        }
        *self.generations.entry(key.to_string()).or_insert(0) += 1;
        self.write_errors(key, errors);
        true
    }

    pub fn clear_errors(&mut self, key: &str) {
        self.store.set_errors(key, Vec::new());
        if self.store.validation_state(key) == ValidationState::Invalid {
            self.store.set_validation_state(key, ValidationState::Valid);
        }
        self.store.recompute_validity();
        self.store.flush();
    }

    fn write_errors(&mut self, key: &str, errors: Vec<FieldError>) {
        let state = if errors.is_empty() {
            ValidationState::Valid
        } else {
            ValidationState::Invalid
        };
        self.store.set_errors(key, errors);
        self.store.set_validation_state(key, state);
        self.store.recompute_validity();
        self.store.flush();
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Submission
    // ───────────────────────────────────────────────────────────────────────────

    /// Nested payload with repeatable groups as arrays in display order.
    pub fn submit_payload(&self) -> Map<String, Value> {
        structure_values(self.store.values(), &self.form.repeatables, &self.orders())
    }

    /// Hand the payload to `on_submit` when no visible field is validating or invalid.
    pub fn submit<R>(
        &self,
        on_submit: impl FnOnce(Map<String, Value>) -> R,
    ) -> Result<R, SubmitError> {
        let mut validating: Vec<String> = self
            .store
            .validating_keys()
            .filter(|k| self.is_visible(k))
            .cloned()
            .collect();
        if !validating.is_empty() {
            validating.sort();
            return Err(SubmitError::Validating { fields: validating });
        }

        let mut invalid: Vec<String> = self
            .store
            .error_keys()
            .filter(|k| self.is_visible(k))
            .cloned()
            .collect();
        if !invalid.is_empty() {
            invalid.sort();
            return Err(SubmitError::Invalid { fields: invalid });
        }

        Ok(on_submit(self.submit_payload()))
    }
}
