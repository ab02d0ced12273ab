//! Payload sanitization: sensitive-field redaction and string truncation
//! (spec §4.4 pipeline stage 5).

use serde_json::{Map, Value};

const SENSITIVE_SUBSTRINGS: &[&str] = &["password", "token", "secret", "key", "auth"];
const MAX_STRING_BYTES: usize = 1000;
const TRUNCATION_SUFFIX: &str = " ... [TRUNCATED]";
const REDACTED: &str = "[REDACTED]";

pub fn sanitize_payload(payload: &mut Map<String, Value>) {
    let keys: Vec<String> = payload.keys().cloned().collect();
    for key in keys {
        let sensitive = is_sensitive_key(&key);
        if let Some(value) = payload.get_mut(&key) {
            if sensitive {
                *value = Value::String(REDACTED.to_string());
            } else {
                sanitize_value(value);
            }
        }
    }
}

fn sanitize_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let sensitive = is_sensitive_key(&key);
                if let Some(v) = map.get_mut(&key) {
                    if sensitive {
                        *v = Value::String(REDACTED.to_string());
                    } else {
                        sanitize_value(v);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize_value(item);
            }
        }
        Value::String(s) => truncate_string(s),
        _ => {}
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_SUBSTRINGS.iter().any(|needle| lower.contains(needle))
}

/// Truncates a string over `MAX_STRING_BYTES` bytes, keeping the first 999
/// bytes (on a char boundary) and appending the 16-byte suffix so the total
/// length matches spec scenario B (`1000`-byte threshold, `1015`-byte result).
fn truncate_string(s: &mut String) {
    if s.len() <= MAX_STRING_BYTES {
        return;
    }
    let mut boundary = MAX_STRING_BYTES - 1;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let mut truncated = s[..boundary].to_string();
    truncated.push_str(TRUNCATION_SUFFIX);
    *s = truncated;
}
