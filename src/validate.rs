#[cfg(feature = "napi")]
use napi_derive::napi;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::composite_key::contains_reserved_chars;
use crate::condition::{ConditionAxis, ConditionalBehavior};
use crate::config::{ComponentRegistry, FieldConfig, FormConfig, ResolvedForm, RowConfig};
use crate::evaluate::Evaluator;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const CFG_DUPLICATE_ID: &str = "F-ERR-CONFIG-001";
pub const CFG_RESERVED_CHARS: &str = "F-ERR-CONFIG-002";
pub const CFG_MIN_EXCEEDS_MAX: &str = "F-ERR-CONFIG-003";
pub const CFG_EMPTY_REPEATABLE: &str = "F-ERR-CONFIG-004";
pub const CFG_UNREGISTERED_COMPONENT: &str = "F-ERR-CONFIG-005";
pub const CFG_EMPTY_ID: &str = "F-ERR-CONFIG-006";
pub const CFG_INVALID_CONDITION: &str = "F-ERR-CONFIG-007";
pub const CFG_INVALID_SCHEMA: &str = "F-ERR-CONFIG-008";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        CFG_DUPLICATE_ID => "Every field and repeatable group addresses exactly one store entry.",
        CFG_RESERVED_CHARS => {
            "Composite keys `group[item].field` can always be parsed back into their parts."
        }
        CFG_MIN_EXCEEDS_MAX => "A repeatable group always has a satisfiable item count.",
        CFG_EMPTY_REPEATABLE => "Every repeatable item owns at least one field.",
        CFG_UNREGISTERED_COMPONENT => "Every field renders through a registered component.",
        CFG_EMPTY_ID => "Every field and repeatable group is addressable by id.",
        CFG_INVALID_CONDITION => "Every condition tree evaluates without falling back to false.",
        CFG_INVALID_SCHEMA => "Form configuration is well-formed data.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIG ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// Fatal configuration problem. Construction aborts; there is no partial form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct ConfigError {
    pub code: String,
    pub message: String,
    pub guarantee: String,
    pub id: Option<String>,
    pub hints: Vec<String>,
}

impl ConfigError {
    pub fn new(code: &str, message: &str, id: Option<&str>) -> Self {
        Self::with_hints(code, message, id, vec![])
    }

    pub fn with_hints(code: &str, message: &str, id: Option<&str>, hints: Vec<String>) -> Self {
        ConfigError {
            code: code.to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            id: id.map(|s| s.to_string()),
            hints,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FORM VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Check a form configuration and build its internal representation.
///
/// Without a registry, component references are not checked.
pub fn validate_form_config(
    config: &FormConfig,
    registry: Option<&ComponentRegistry>,
) -> Result<ResolvedForm, ConfigError> {
    check_id(&config.id, "form")?;

    let mut global_ids: HashSet<String> = HashSet::new();
    let mut fields = Vec::new();
    let mut repeatables = HashMap::new();
    let mut repeatable_ids = Vec::new();

    for row in &config.rows {
        match row {
            RowConfig::Fields(row) => {
                for field in &row.fields {
                    check_field(field, registry)?;
                    claim_id(&mut global_ids, &field.id, "field")?;
                    fields.push(field.clone());
                }
            }
            RowConfig::Repeatable(group) => {
                check_id(&group.id, "repeatable group")?;
                claim_id(&mut global_ids, &group.id, "repeatable group")?;

                let mut group = group.clone();
                group.normalize();

                if group.all_fields.is_empty() {
                    return Err(ConfigError::with_hints(
                        CFG_EMPTY_REPEATABLE,
                        &format!("Repeatable group \"{}\" has no fields.", group.id),
                        Some(&group.id),
                        vec!["Add at least one row with a field to the group.".to_string()],
                    ));
                }

                if let (Some(min), Some(max)) = (group.min, group.max) {
                    if min > max {
                        return Err(ConfigError::new(
                            CFG_MIN_EXCEEDS_MAX,
                            &format!(
                                "Repeatable group \"{}\" has min ({}) greater than max ({}).",
                                group.id, min, max
                            ),
                            Some(&group.id),
                        ));
                    }
                }

                let mut template_ids = HashSet::new();
                for field in &group.all_fields {
                    check_field(field, registry)?;
                    claim_id(&mut template_ids, &field.id, "template field")?;
                }

                repeatable_ids.push(group.id.clone());
                repeatables.insert(group.id.clone(), group);
            }
        }
    }

    Ok(ResolvedForm {
        id: config.id.clone(),
        fields,
        repeatables,
        repeatable_ids,
    })
}

fn check_field(field: &FieldConfig, registry: Option<&ComponentRegistry>) -> Result<(), ConfigError> {
    check_id(&field.id, "field")?;
    if let Some(registry) = registry {
        if !registry.contains(&field.component_id) {
            return Err(ConfigError::with_hints(
                CFG_UNREGISTERED_COMPONENT,
                &format!(
                    "Field \"{}\" uses unregistered component \"{}\".",
                    field.id, field.component_id
                ),
                Some(&field.id),
                vec!["Register the component before building the form.".to_string()],
            ));
        }
    }
    Ok(())
}

fn check_id(id: &str, what: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::new(
            CFG_EMPTY_ID,
            &format!("A {} has an empty id.", what),
            None,
        ));
    }
    if contains_reserved_chars(id) {
        return Err(ConfigError::with_hints(
            CFG_RESERVED_CHARS,
            &format!("The {} id \"{}\" contains '[' or ']'.", what, id),
            Some(id),
            vec!["Square brackets are reserved for composite keys.".to_string()],
        ));
    }
    Ok(())
}

fn claim_id(seen: &mut HashSet<String>, id: &str, what: &str) -> Result<(), ConfigError> {
    if !seen.insert(id.to_string()) {
        return Err(ConfigError::new(
            CFG_DUPLICATE_ID,
            &format!("Duplicate {} id \"{}\".", what, id),
            Some(id),
        ));
    }
    Ok(())
}

/// Strict mode: every condition tree must be evaluable by `evaluator`.
pub fn check_conditions(form: &ResolvedForm, evaluator: &Evaluator) -> Result<(), ConfigError> {
    let templates = form
        .repeatable_ids
        .iter()
        .filter_map(|id| form.repeatables.get(id))
        .flat_map(|group| group.all_fields.iter());

    for field in form.fields.iter().chain(templates) {
        if let Some(behavior) = &field.conditions {
            check_behavior(&field.id, behavior, evaluator)?;
        }
    }
    Ok(())
}

fn check_behavior(
    field_id: &str,
    behavior: &ConditionalBehavior,
    evaluator: &Evaluator,
) -> Result<(), ConfigError> {
    for axis in ConditionAxis::ALL {
        if let Some(condition) = behavior.axis(axis) {
            evaluator.check(condition).map_err(|e| {
                ConfigError::new(
                    CFG_INVALID_CONDITION,
                    &format!("Field \"{}\" has an invalid {:?} condition: {}", field_id, axis, e),
                    Some(field_id),
                )
            })?;
        }
    }
    Ok(())
}

/// Parse and validate a JSON form configuration.
pub fn parse_form_config(
    config_json: serde_json::Value,
    registry: Option<&ComponentRegistry>,
) -> Result<ResolvedForm, ConfigError> {
    let config: FormConfig = serde_json::from_value(config_json).map_err(|e| {
        ConfigError::new(
            CFG_INVALID_SCHEMA,
            &format!("Failed to parse form configuration: {}", e),
            None,
        )
    })?;
    validate_form_config(&config, registry)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn validate_form_config_native(
    config_json: serde_json::Value,
    components: Option<Vec<String>>,
) -> Option<ConfigError> {
    let registry = components.map(ComponentRegistry::with_components);
    parse_form_config(config_json, registry.as_ref()).err()
}
