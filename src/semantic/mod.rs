//! Per-provider body summarization: pure, side-effect-free, tolerant of
//! malformed input. Every function reads a permissive `serde_json::Value`
//! and returns a typed summary with `#[serde(default)]`-safe fields —
//! missing keys degrade to empty strings, zeros, or empty lists, never a
//! parse failure.

pub mod anthropic;
pub mod google;
pub mod mcp;
pub mod openai;

use serde_json::Value;

/// Documented approximation, not a semantic invariant: chars / 4.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64) / 4
}

pub(crate) fn str_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

pub(crate) fn u64_field(v: &Value, key: &str) -> u64 {
    v.get(key).and_then(Value::as_u64).unwrap_or(0)
}

pub(crate) fn bool_field(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn arr<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key).and_then(Value::as_array).map(|a| a.as_slice()).unwrap_or(&[])
}
