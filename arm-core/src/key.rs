//! Stable hashing of structured cache keys

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Trim, convert `\` to `/` and sort. Duplicates are kept; an empty input
/// always yields an empty list.
pub fn normalize_patterns(patterns: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = patterns
        .iter()
        .map(|p| p.trim().replace('\\', "/"))
        .collect();
    normalized.sort();
    normalized
}

/// SHA-256 hex digest of the canonical JSON form of `key` (object keys sorted)
pub fn generate_key<T: Serialize + ?Sized>(key: &T) -> Result<String> {
    let value = serde_json::to_value(key).context("Failed to serialize cache key")?;
    let canonical = canonical_json(&value);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_patterns() {
        let normalized = normalize_patterns(&strings(&[" b/**/*.yml", "a\\*.yml ", "b/**/*.yml"]));
        assert_eq!(normalized, strings(&["a/*.yml", "b/**/*.yml", "b/**/*.yml"]));
        assert!(normalize_patterns(&[]).is_empty());
    }

    #[test]
    fn test_key_is_independent_of_field_order() {
        let one = json!({"version": "1.0.0", "include": ["a"], "exclude": []});
        let two = json!({"exclude": [], "include": ["a"], "version": "1.0.0"});
        assert_eq!(generate_key(&one).unwrap(), generate_key(&two).unwrap());
    }

    #[test]
    fn test_key_is_independent_of_pattern_order() {
        let forward = normalize_patterns(&strings(&["**/*.yml", "rules/**", " docs/*.md"]));
        let backward = normalize_patterns(&strings(&["docs/*.md", "rules/**", "**/*.yml"]));

        let one = generate_key(&json!({"include": forward})).unwrap();
        let two = generate_key(&json!({"include": backward})).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn test_key_distinguishes_values() {
        let one = generate_key(&json!({"version": "1.0.0"})).unwrap();
        let two = generate_key(&json!({"version": "1.0.1"})).unwrap();
        assert_ne!(one, two);
        assert_eq!(one.len(), 64);
    }

    #[test]
    fn test_nested_objects_sorted() {
        let one = json!({"outer": {"b": 1, "a": 2}});
        let two = json!({"outer": {"a": 2, "b": 1}});
        assert_eq!(generate_key(&one).unwrap(), generate_key(&two).unwrap());
    }
}
