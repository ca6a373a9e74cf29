//! Redaction of request parameters before they reach the usage log.
//!
//! Usage logs are long-lived plaintext audit records, so any field whose
//! key looks like a secret is blanked before persisting, and oversized
//! string values are truncated.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Keys whose values are never persisted.
static SECRET_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(token|secret|password|passwd|api[-_]?key|authorization|credential)").unwrap()
});

const REDACTED: &str = "[REDACTED]";

/// Longest string value kept verbatim; anything longer is cut.
const MAX_VALUE_LEN: usize = 256;

/// Produce a copy of `params` safe to persist: secret-keyed fields blanked
/// (recursively, arrays included), long strings truncated.
pub fn redact_params(params: &Value) -> Value {
    let mut clone = params.clone();
    redact_value(&mut clone);
    clone
}

fn redact_value(v: &mut Value) {
    match v {
        Value::Object(obj) => {
            for (key, val) in obj.iter_mut() {
                if SECRET_KEY_RE.is_match(key) {
                    *val = Value::String(REDACTED.to_string());
                } else {
                    redact_value(val);
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                redact_value(item);
            }
        }
        Value::String(s) => {
            if s.chars().count() > MAX_VALUE_LEN {
                let mut truncated: String = s.chars().take(MAX_VALUE_LEN).collect();
                truncated.push('…');
                *s = truncated;
            }
        }
        _ => {}
    }
}
