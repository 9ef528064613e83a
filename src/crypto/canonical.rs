//! Canonical JSON serialization used for signature hashing.
//!
//! Keys are sorted lexicographically at every level; arrays preserve order.
//! The result is hashed with SHA-256 and encoded base64url without padding,
//! the same encoding style `hack-ink-jwks-cache` uses for its SPKI
//! fingerprints, generalized from a fixed 32-byte fingerprint to an arbitrary
//! digest.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively re-order object keys so two structurally-equal JSON values
/// always serialize to the same bytes.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` to canonical JSON bytes (sorted keys at every level).
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(value)).expect("canonicalized JSON always serializes")
}

/// SHA-256 of the canonical JSON serialization, base64url (no padding) encoded.
pub fn canonical_hash(value: &Value) -> String {
    let bytes = canonical_bytes(value);
    let digest = Sha256::digest(&bytes);
    URL_SAFE_NO_PAD.encode(digest)
}

/// Returns a copy of `value` with the top-level `signature` field removed.
/// `value` must be a JSON object; any other shape is returned unchanged.
pub fn without_signature_field(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut copy = map.clone();
            copy.remove("signature");
            Value::Object(copy)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalize_is_idempotent() {
        let v = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let once = canonicalize(&v);
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn permuting_keys_yields_same_bytes() {
        let a = json!({"a": 1, "b": 2, "c": [1, 2, 3]});
        let b = json!({"c": [1, 2, 3], "b": 2, "a": 1});
        assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn array_order_is_preserved() {
        let a = json!({"x": [1, 2, 3]});
        let b = json!({"x": [3, 2, 1]});
        assert_ne!(canonical_bytes(&a), canonical_bytes(&b));
    }

    #[test]
    fn nested_objects_are_sorted_at_every_level() {
        let v = json!({"z": {"y": 1, "x": 2}, "a": 1});
        let bytes = canonical_bytes(&v);
        let s = String::from_utf8(bytes).unwrap();
        // top-level "a" before "z", and within the nested object "x" before "y"
        assert!(s.find("\"a\"").unwrap() < s.find("\"z\"").unwrap());
        assert!(s.find("\"x\"").unwrap() < s.find("\"y\"").unwrap());
    }

    #[test]
    fn without_signature_field_strips_only_that_key() {
        let v = json!({"a": 1, "signature": {"sig": "x"}});
        let stripped = without_signature_field(&v);
        assert_eq!(stripped, json!({"a": 1}));
    }

    #[test]
    fn hash_is_base64url_no_padding() {
        let h = canonical_hash(&json!({"a": 1}));
        assert!(!h.contains('+'));
        assert!(!h.contains('/'));
        assert!(!h.contains('='));
    }
}
