//! Canonical serialization and content hashing.
//!
//! A fact's hash is SHA-512 over a canonical JSON-like text, encoded as
//! standard base64. Fields are sorted by name, roles are sorted by name, and
//! multi-valued predecessor sets are sorted by (hash, type), so the hash is
//! independent of construction order.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha512};

use super::record::Predecessor;
use super::reference::FactReference;
use super::value::FieldValue;

/// Canonical text for a fact's fields and predecessors.
#[must_use]
pub fn canonicalize(
    fields: &BTreeMap<String, FieldValue>,
    predecessors: &BTreeMap<String, Predecessor>,
) -> String {
    let mut out = String::from("{\"fields\":{");
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_key(&mut out, name);
        out.push_str(&value.canonical());
    }
    out.push_str("},\"predecessors\":{");
    for (i, (role, predecessor)) in predecessors.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_key(&mut out, role);
        match predecessor {
            Predecessor::Single(reference) => push_reference(&mut out, reference),
            Predecessor::Multiple(references) => {
                let mut sorted: Vec<&FactReference> = references.iter().collect();
                sorted.sort();
                out.push('[');
                for (j, reference) in sorted.into_iter().enumerate() {
                    if j > 0 {
                        out.push(',');
                    }
                    push_reference(&mut out, reference);
                }
                out.push(']');
            }
        }
    }
    out.push_str("}}");
    out
}

/// Content hash of a fact's fields and predecessors.
#[must_use]
pub fn compute_hash(
    fields: &BTreeMap<String, FieldValue>,
    predecessors: &BTreeMap<String, Predecessor>,
) -> String {
    hash_text(&canonicalize(fields, predecessors))
}

/// SHA-512 of arbitrary text, base64 encoded.
#[must_use]
pub fn hash_text(text: &str) -> String {
    let digest = Sha512::digest(text.as_bytes());
    BASE64.encode(digest)
}

fn push_key(out: &mut String, key: &str) {
    out.push_str(&serde_json::Value::String(key.to_string()).to_string());
    out.push(':');
}

fn push_reference(out: &mut String, reference: &FactReference) {
    let hash = serde_json::Value::String(reference.hash.clone());
    let fact_type = serde_json::Value::String(reference.fact_type.clone());
    // Writing to a String cannot fail.
    let _ = write!(out, "{{\"hash\":{hash},\"type\":{fact_type}}}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fact_vector() {
        let hash = compute_hash(&BTreeMap::new(), &BTreeMap::new());
        assert_eq!(
            hash,
            "fSS1hK7OGAeSX4ocN3acuFF87jvzCdPN3vLFUtcej0lOAsVV859UIYZLRcHUoMbyd/J31TdVn5QuE7094oqUPg=="
        );
    }

    #[test]
    fn test_single_field_vector() {
        let mut fields = BTreeMap::new();
        fields.insert("identifier".to_string(), FieldValue::from("contoso"));
        assert_eq!(
            canonicalize(&fields, &BTreeMap::new()),
            r#"{"fields":{"identifier":"contoso"},"predecessors":{}}"#
        );
        assert_eq!(
            compute_hash(&fields, &BTreeMap::new()),
            "M2BrSspxPmU9hZq/0OGXCKIIFuS/wVhjbv2TaQYAL3yodutMRzqvtGC9IFM5/0WQ7YxrpHAER7zAfRUMAfQ7Cw=="
        );
    }

    #[test]
    fn test_predecessor_sets_are_sorted() {
        let a = FactReference::new("User", "b");
        let b = FactReference::new("User", "a");
        let mut first = BTreeMap::new();
        first.insert("members".to_string(), Predecessor::Multiple(vec![a.clone(), b.clone()]));
        let mut second = BTreeMap::new();
        second.insert("members".to_string(), Predecessor::Multiple(vec![b, a]));

        let text = canonicalize(&BTreeMap::new(), &first);
        assert_eq!(
            text,
            r#"{"fields":{},"predecessors":{"members":[{"hash":"a","type":"User"},{"hash":"b","type":"User"}]}}"#
        );
        assert_eq!(text, canonicalize(&BTreeMap::new(), &second));
    }
}
