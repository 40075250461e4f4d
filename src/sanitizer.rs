//! Redaction of sensitive fields before data is logged or displayed.

use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";
pub const MAX_DEPTH_MARKER: &str = "[MAX_DEPTH]";

/// Substrings that mark a key as sensitive (matched case-insensitively)
pub const SENSITIVE_KEY_PARTS: [&str; 6] = ["password", "token", "secret", "key", "auth", "credential"];

/// Nesting below this depth is replaced by `MAX_DEPTH_MARKER`
pub const MAX_DEPTH: usize = 32;

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| lower.contains(part))
}

/// Return a copy of `value` with every sensitive key's value redacted
pub fn sanitize(value: &Value) -> Value {
    sanitize_at(value, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH && (value.is_object() || value.is_array()) {
        return Value::String(MAX_DEPTH_MARKER.to_string());
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                let cleaned = if is_sensitive_key(k) {
                    Value::String(REDACTED.to_string())
                } else {
                    sanitize_at(v, depth + 1)
                };
                out.insert(k.clone(), cleaned);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| sanitize_at(v, depth + 1)).collect()),
        other => other.clone(),
    }
}
