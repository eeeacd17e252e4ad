//! Canonical request keys

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Serialize a value to JSON with every object's keys in sorted order
///
/// Two values that differ only in field order produce the same string.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&sort_keys(value))
}

/// Cache key for a request: hex SHA-256 of its canonical JSON
pub fn request_key<T: Serialize + ?Sized>(request: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(request)?;
    let digest = Sha256::digest(canonical.as_bytes());
    let key = format!("{:x}", digest);
    debug!(%key, canonical_len = canonical.len(), "request_key: computed");
    Ok(key)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_order_does_not_change_key() {
        let a = json!({"model": "m", "params": {"temperature": 0, "max_tokens": 10}});
        let b = json!({"params": {"max_tokens": 10, "temperature": 0}, "model": "m"});
        assert_eq!(request_key(&a).unwrap(), request_key(&b).unwrap());
    }

    #[test]
    fn test_different_parameters_produce_different_keys() {
        let a = json!({"model": "m", "max_tokens": 10});
        let b = json!({"model": "m", "max_tokens": 11});
        assert_ne!(request_key(&a).unwrap(), request_key(&b).unwrap());
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = json!({"messages": ["one", "two"]});
        let b = json!({"messages": ["two", "one"]});
        assert_ne!(request_key(&a).unwrap(), request_key(&b).unwrap());
    }

    #[test]
    fn test_nested_objects_in_arrays_are_sorted() {
        let a = json!([{"b": 1, "a": 2}]);
        assert_eq!(canonical_json(&a).unwrap(), r#"[{"a":2,"b":1}]"#);
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let key = request_key(&json!({"a": 1})).unwrap();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
