//! Hashing - SHA-256 over Canonical JSON
//!
//! Gives every resolved document a reproducible digest so infrastructure
//! diffs can tell "same input" from "changed input" without a byte compare.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{:02x}", byte);
            out
        })
}

/// Compact JSON with object keys in byte order at every depth.
///
/// Documents keep declaration order when printed, so hashing cannot rely on
/// the serializer's key order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&canonicalize(serde_json::to_value(value)?))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, inner)| (key, canonicalize(inner)))
                .collect();
            Value::Object(ordered.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        scalar => scalar,
    }
}

/// Digest of a resolved document
pub fn compute_document_hash<T: Serialize>(document: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(document)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Idempotency key for submitting a document to the provisioning engine:
/// SHA-256 of `prefix:account_id:region:document_hash:engine_version`.
pub fn compute_run_key(
    prefix: &str,
    account_id: &str,
    region: &str,
    document_hash: &str,
    engine_version: &str,
) -> String {
    let scope = [prefix, account_id, region, document_hash, engine_version].join(":");
    sha256_hex(scope.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": {"y": 1, "b": 2}});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":{"b":2,"y":1},"z":1}"#);
    }

    #[test]
    fn test_objects_inside_arrays_sorted() {
        let tags = json!([{"Value": "prod", "Key": "Environment"}]);
        assert_eq!(
            canonical_json(&tags).unwrap(),
            r#"[{"Key":"Environment","Value":"prod"}]"#
        );
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_document_hash_ignores_key_order() {
        let a = json!({"resources": [], "parameters": {}});
        let b = json!({"parameters": {}, "resources": []});
        assert_eq!(
            compute_document_hash(&a).unwrap(),
            compute_document_hash(&b).unwrap()
        );
    }

    #[test]
    fn test_run_key_changes_with_region() {
        let a = compute_run_key("workload", "123456789012", "us-east-1", "abc", "1.0.0");
        let b = compute_run_key("workload", "123456789012", "us-west-2", "abc", "1.0.0");
        assert_ne!(a, b);
    }
}
