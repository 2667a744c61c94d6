//! Hash derivation for hash-keyed entities.
//!
//! Canonicalization is: sort object keys, lower-case names, trim whitespace,
//! then digest. The digest itself is a fixed non-cryptographic-strength hash
//! (the first 8 bytes of SHA-256, reduced to a signed i64 so it fits the
//! `BIGINT` hash columns) — stable across releases as required, without
//! pulling in a second hashing crate purely for speed.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively canonicalize a JSON value: object keys sorted, string values
/// lower-cased and trimmed. Arrays and scalars other than strings are left
/// in place — order inside arrays is identity-bearing (e.g. Edge upstream
/// lists) and must not be reordered.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), canonicalize(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        other => other.clone(),
    }
}

/// Hash an already-canonical string (e.g. a command template, a node-args
/// canonical JSON string) into the fixed-width digest used for hash-keyed
/// entity identity.
pub fn hash_str(canonical: &str) -> i64 {
    let digest = Sha256::digest(canonical.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    i64::from_be_bytes(bytes)
}

/// Canonicalize then hash a JSON value.
pub fn hash_json(value: &Value) -> i64 {
    let canonical = canonicalize(value);
    hash_str(&canonical.to_string())
}

/// Hash a tuple of parts by joining their canonical forms with a NUL
/// separator, which cannot appear in a canonicalized string, so that e.g.
/// `(task_template_id=1, command="a b")` never collides with
/// `(task_template_id=1, command="a", extra="b")`.
pub fn hash_parts(parts: &[&str]) -> i64 {
    let joined = parts.join("\u{0}");
    hash_str(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalize_sorts_keys_and_lowercases_strings() {
        let a = json!({ "B": "  Foo ", "a": 1 });
        let b = json!({ "a": 1, "b": "foo" });
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn hash_determinism_matches_canonical_equality() {
        let a = json!({ "queue": "all.q", "Name": "Step 1 " });
        let b = json!({ "Name": "step 1", "queue": "ALL.Q" });
        assert_eq!(hash_json(&a), hash_json(&b));
    }

    #[test]
    fn distinct_canonical_values_hash_differently() {
        let a = hash_json(&json!({ "x": 1 }));
        let b = hash_json(&json!({ "x": 2 }));
        assert_ne!(a, b);
    }

    #[test]
    fn array_order_is_identity_bearing() {
        let a = hash_json(&json!({ "upstream": [1, 2] }));
        let b = hash_json(&json!({ "upstream": [2, 1] }));
        assert_ne!(a, b);
    }
}
