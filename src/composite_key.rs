//! Composite Key Codec
//!
//! Flat-store address of one template field inside one repeatable item:
//! `repeatableId[itemKey].fieldId`. The field id may itself contain dots,
//! so parsing uses a fixed three-group pattern instead of splitting.

#[cfg(feature = "napi")]
use napi_derive::napi;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref COMPOSITE_KEY_RE: Regex = Regex::new(r"^([^\[\]]+)\[([^\]]+)\]\.(.+)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "napi", napi(object))]
#[serde(rename_all = "camelCase")]
pub struct CompositeKey {
    pub repeatable_id: String,
    pub item_key: String,
    pub field_id: String,
}

impl CompositeKey {
    pub fn new(repeatable_id: &str, item_key: &str, field_id: &str) -> Self {
        Self {
            repeatable_id: repeatable_id.to_string(),
            item_key: item_key.to_string(),
            field_id: field_id.to_string(),
        }
    }

    pub fn build(&self) -> String {
        build_composite_key(&self.repeatable_id, &self.item_key, &self.field_id)
    }
}

pub fn build_composite_key(repeatable_id: &str, item_key: &str, field_id: &str) -> String {
    format!("{}[{}].{}", repeatable_id, item_key, field_id)
}

pub fn parse_composite_key(key: &str) -> Option<CompositeKey> {
    let caps = COMPOSITE_KEY_RE.captures(key)?;
    Some(CompositeKey {
        repeatable_id: caps[1].to_string(),
        item_key: caps[2].to_string(),
        field_id: caps[3].to_string(),
    })
}

pub fn is_composite_key(key: &str) -> bool {
    COMPOSITE_KEY_RE.is_match(key)
}

/// True when `id` would collide with composite-key syntax.
pub fn contains_reserved_chars(id: &str) -> bool {
    id.contains('[') || id.contains(']')
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAPI ENTRY POINTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "napi")]
#[napi]
pub fn build_composite_key_native(repeatable_id: String, item_key: String, field_id: String) -> String {
    build_composite_key(&repeatable_id, &item_key, &field_id)
}

#[cfg(feature = "napi")]
#[napi]
pub fn parse_composite_key_native(key: String) -> Option<CompositeKey> {
    parse_composite_key(&key)
}
