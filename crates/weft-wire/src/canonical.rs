//! Canonical JSON serialization.
//!
//! Produces the byte-exact encoding used as Ed25519 signing input. Two
//! structurally equal values canonicalize to identical bytes regardless of
//! object insertion order.
//!
//! ## Rules
//!
//! - UTF-8 output, no insignificant whitespace
//! - Object keys emitted in ascending Unicode codepoint order at every depth
//! - Array element order preserved
//! - Numbers and strings in standard serde_json form (lowercase exponent,
//!   minimal escapes)

use serde_json::Value;

use crate::{Result, WireError};

/// Serialize a JSON value to its canonical byte form.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Serialize a JSON value to its canonical string form.
pub fn canonical_string(value: &Value) -> Result<String> {
    let bytes = canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|_| WireError::InvalidValue)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(WireError::InvalidValue);
                }
            }
            serde_json::to_writer(&mut *out, n)
                .map_err(|e| WireError::Serialization(e.to_string()))?;
        }
        Value::String(s) => {
            serde_json::to_writer(&mut *out, s)
                .map_err(|e| WireError::Serialization(e.to_string()))?;
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // UTF-8 byte order equals Unicode codepoint order.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)
                    .map_err(|e| WireError::Serialization(e.to_string()))?;
                out.push(b':');
                let value = map
                    .get(*key)
                    .ok_or_else(|| WireError::Serialization("key vanished".into()))?;
                write_value(value, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}
