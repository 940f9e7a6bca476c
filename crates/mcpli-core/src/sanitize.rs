//! Deep sanitization of untrusted JSON parameters.
//!
//! Requests arrive as attacker-controllable JSON and are eventually handed
//! to an MCP server that may be implemented in a dynamic language. Keys that
//! collide with prototype machinery are stripped from every object before
//! the value crosses a trust boundary.

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// Keys rejected on any input-to-map merge.
pub const UNSAFE_KEYS: [&str; 3] = ["__proto__", "prototype", "constructor"];

/// Maximum nesting depth accepted for inbound parameter objects.
pub const MAX_DEPTH: usize = 128;

/// Whether a key must not be merged into a map from untrusted input.
#[must_use]
pub fn is_unsafe_key(key: &str) -> bool {
    UNSAFE_KEYS.contains(&key)
}

/// Recursively sanitize an untrusted JSON value.
///
/// Objects are rebuilt with unsafe keys dropped, arrays are recursed, and
/// scalars pass through unchanged. Nesting deeper than [`MAX_DEPTH`] is
/// rejected rather than recursed.
///
/// # Errors
///
/// Returns a validation error if the value nests deeper than [`MAX_DEPTH`].
pub fn deep_sanitize(value: &Value) -> CoreResult<Value> {
    sanitize_at(value, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> CoreResult<Value> {
    if depth > MAX_DEPTH {
        return Err(CoreError::Validation(format!(
            "parameters nest deeper than {MAX_DEPTH} levels"
        )));
    }
    let next = depth.saturating_add(1);

    match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(sanitize_at(item, next)?);
            }
            Ok(Value::Array(out))
        },
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                if is_unsafe_key(key) {
                    continue;
                }
                out.insert(key.clone(), sanitize_at(item, next)?);
            }
            Ok(Value::Object(out))
        },
        scalar => Ok(scalar.clone()),
    }
}
