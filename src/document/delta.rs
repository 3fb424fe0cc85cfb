//! JSON bodies and deltas
//!
//! Deltas are JSON merge-patches (RFC 7386): objects merge key by key, a
//! `null` member deletes the key and any other value replaces the target.

use serde_json::{Map, Value};

use crate::errors::{RevError, RevResult};

fn parse(data: &[u8], what: &str) -> RevResult<Value> {
    serde_json::from_slice(data).map_err(|e| RevError::CorruptDelta(format!("invalid {}: {}", what, e)))
}

/// Apply `delta` to `base`
pub fn apply_json_delta(base: &[u8], delta: &[u8]) -> RevResult<Vec<u8>> {
    let mut target = parse(base, "delta base")?;
    let patch = parse(delta, "delta")?;
    merge_patch(&mut target, &patch);
    serde_json::to_vec(&target).map_err(|e| RevError::CorruptDelta(e.to_string()))
}

/// Merge-patch turning `old` into `new`. Values set to `null` in `new` cannot
/// be expressed and are dropped when the patch is applied.
pub fn create_json_delta(old: &[u8], new: &[u8]) -> RevResult<Vec<u8>> {
    let old = parse(old, "old body")?;
    let new = parse(new, "new body")?;
    let patch = diff(&old, &new).unwrap_or_else(|| Value::Object(Map::new()));
    serde_json::to_vec(&patch).map_err(|e| RevError::CorruptDelta(e.to_string()))
}

/// Whether the body holds a value to be encrypted (`"@type": "encryptable"`)
pub fn contains_encryptable(body: &[u8]) -> bool {
    fn scan(value: &Value) -> bool {
        match value {
            Value::Object(map) => {
                map.get("@type").and_then(Value::as_str) == Some("encryptable") || map.values().any(scan)
            }
            Value::Array(items) => items.iter().any(scan),
            _ => false,
        }
    }
    serde_json::from_slice::<Value>(body).is_ok_and(|v| scan(&v))
}

fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(members) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in members {
            if value.is_null() {
                map.remove(key);
            } else {
                merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, old_value) in old {
                match new.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new_value) => {
                        if let Some(d) = diff(old_value, new_value) {
                            patch.insert(key.clone(), d);
                        }
                    }
                }
            }
            for (key, new_value) in new {
                if !old.contains_key(key) {
                    patch.insert(key.clone(), new_value.clone());
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        _ if old == new => None,
        _ => Some(new.clone()),
    }
}
