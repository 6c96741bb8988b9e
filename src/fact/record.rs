//! Facts: immutable, typed, content-addressed records.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FactError;

use super::hash::compute_hash;
use super::reference::FactReference;
use super::value::FieldValue;

fn type_name_regex() -> &'static Regex {
    static TYPE_NAME: OnceLock<Regex> = OnceLock::new();
    TYPE_NAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .unwrap_or_else(|e| unreachable!("type name pattern is valid: {e}"))
    })
}

/// Validates a dotted fact type name such as `Corporate.Office.Closure`.
pub fn validate_type_name(name: &str) -> Result<(), FactError> {
    if type_name_regex().is_match(name) {
        Ok(())
    } else {
        Err(FactError::InvalidTypeName {
            name: name.to_string(),
        })
    }
}

/// A predecessor edge: a single reference or an ordered set of references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predecessor {
    Single(FactReference),
    Multiple(Vec<FactReference>),
}

impl Predecessor {
    /// All references on this edge.
    pub fn references(&self) -> impl Iterator<Item = &FactReference> {
        let slice = match self {
            Self::Single(r) => std::slice::from_ref(r),
            Self::Multiple(rs) => rs.as_slice(),
        };
        slice.iter()
    }

    fn normalized(self) -> Self {
        match self {
            Self::Single(r) => Self::Single(r),
            Self::Multiple(rs) => {
                let set: BTreeSet<FactReference> = rs.into_iter().collect();
                Self::Multiple(set.into_iter().collect())
            }
        }
    }
}

/// An immutable fact.
///
/// Facts are created through [`Fact::new`] or [`Fact::builder`], which
/// compute the content hash. No field is ever mutated after creation.
///
/// # Examples
///
/// ```
/// use kyrofact::Fact;
///
/// let company = Fact::builder("Company").field("identifier", "contoso").build().unwrap();
/// let office = Fact::builder("Office")
///     .predecessor("company", company.reference())
///     .field("city", "Dallas")
///     .build()
///     .unwrap();
///
/// assert_eq!(office.reference().fact_type, "Office");
/// assert_eq!(office.predecessor_references().count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    reference: FactReference,
    fields: BTreeMap<String, FieldValue>,
    predecessors: BTreeMap<String, Predecessor>,
}

impl Fact {
    /// Creates a fact, computing its hash.
    pub fn new(
        fact_type: impl Into<String>,
        fields: BTreeMap<String, FieldValue>,
        predecessors: BTreeMap<String, Predecessor>,
    ) -> Result<Self, FactError> {
        let fact_type = fact_type.into();
        validate_type_name(&fact_type)?;
        if predecessors.keys().any(|role| role.trim().is_empty()) {
            return Err(FactError::EmptyRole);
        }
        let predecessors: BTreeMap<String, Predecessor> = predecessors
            .into_iter()
            .map(|(role, p)| (role, p.normalized()))
            .collect();
        let hash = compute_hash(&fields, &predecessors);
        Ok(Self {
            reference: FactReference::new(fact_type, hash),
            fields,
            predecessors,
        })
    }

    /// Start building a fact of `fact_type`.
    pub fn builder(fact_type: impl Into<String>) -> FactBuilder {
        FactBuilder::new(fact_type)
    }

    /// Type and hash of this fact.
    #[must_use]
    pub const fn reference(&self) -> &FactReference {
        &self.reference
    }

    /// The fact type name.
    #[must_use]
    pub fn fact_type(&self) -> &str {
        &self.reference.fact_type
    }

    /// The content hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.reference.hash
    }

    /// Fields in canonical (sorted) order.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// One field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Predecessors by role.
    #[must_use]
    pub const fn predecessors(&self) -> &BTreeMap<String, Predecessor> {
        &self.predecessors
    }

    /// References reachable through one role.
    pub fn predecessors_by_role<'a>(&'a self, role: &str) -> impl Iterator<Item = &'a FactReference> + 'a {
        self.predecessors
            .get(role)
            .into_iter()
            .flat_map(|p| p.references())
    }

    /// Every (role, reference) edge of this fact.
    pub fn predecessor_references(&self) -> impl Iterator<Item = (&str, &FactReference)> {
        self.predecessors
            .iter()
            .flat_map(|(role, p)| p.references().map(move |r| (role.as_str(), r)))
    }

    /// Recomputes the hash and compares it to the stored one.
    ///
    /// Facts received from untrusted sources are verified before they are admitted.
    pub fn verify_hash(&self) -> Result<(), FactError> {
        let actual = compute_hash(&self.fields, &self.predecessors);
        if actual == self.reference.hash {
            Ok(())
        } else {
            Err(FactError::HashMismatch {
                expected: self.reference.hash.clone(),
                actual,
            })
        }
    }
}

/// Fluent builder for [`Fact`].
#[derive(Debug, Clone)]
pub struct FactBuilder {
    fact_type: String,
    fields: BTreeMap<String, FieldValue>,
    predecessors: BTreeMap<String, Predecessor>,
}

impl FactBuilder {
    fn new(fact_type: impl Into<String>) -> Self {
        Self {
            fact_type: fact_type.into(),
            fields: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        }
    }

    /// Set a field, replacing any previous value.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a single-valued predecessor.
    #[must_use]
    pub fn predecessor(mut self, role: impl Into<String>, reference: &FactReference) -> Self {
        self.predecessors
            .insert(role.into(), Predecessor::Single(reference.clone()));
        self
    }

    /// Set a multi-valued predecessor. Order and duplicates do not matter.
    #[must_use]
    pub fn predecessors<'a>(
        mut self,
        role: impl Into<String>,
        references: impl IntoIterator<Item = &'a FactReference>,
    ) -> Self {
        self.predecessors.insert(
            role.into(),
            Predecessor::Multiple(references.into_iter().cloned().collect()),
        );
        self
    }

    /// Hash the fact. Fails if a field or role name is empty.
    pub fn build(self) -> Result<Fact, FactError> {
        Fact::new(self.fact_type, self.fields, self.predecessors)
    }
}

/// A signature over a fact hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct FactSignature {
    pub public_key: String,
    pub signature: String,
}

/// A fact together with the signatures collected for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct FactEnvelope {
    pub fact: Fact,
    #[serde(default)]
    pub signatures: BTreeSet<FactSignature>,
}

impl FactEnvelope {
    /// Wrap a fact with no signatures.
    #[must_use]
    pub fn unsigned(fact: Fact) -> Self {
        Self {
            fact,
            signatures: BTreeSet::new(),
        }
    }
}

impl From<Fact> for FactEnvelope {
    fn from(fact: Fact) -> Self {
        Self::unsigned(fact)
    }
}
