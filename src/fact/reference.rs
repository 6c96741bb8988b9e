//! Fact identity.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A fact's stable identity: its type and content hash.
///
/// Equality and hashing are by value. Ordering is by hash, then type, which
/// is the order used when canonicalizing predecessor sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct FactReference {
    #[serde(rename = "type")]
    pub fact_type: String,
    pub hash: String,
}

impl FactReference {
    /// Creates a reference from a type name and a base64 hash.
    #[must_use]
    pub fn new(fact_type: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            fact_type: fact_type.into(),
            hash: hash.into(),
        }
    }
}

impl Ord for FactReference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| self.fact_type.cmp(&other.fact_type))
    }
}

impl PartialOrd for FactReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fact_type, self.hash)
    }
}
