//! Result rows and projection composition.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::{KyroFactError, KyroFactResult};
use crate::fact::{Fact, FactReference, FieldValue};
use crate::query::ResultDescription;
use crate::specification::{Label, Projection};

use super::traits::{FactStore, StorageError};

/// One result row: labels bound to facts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Product(BTreeMap<String, FactReference>);

impl Product {
    /// An empty product.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The row holding only the given facts.
    #[must_use]
    pub fn from_given(given: &[Label], start: &[FactReference]) -> Self {
        given
            .iter()
            .zip(start)
            .map(|(l, r)| (l.name.clone(), r.clone()))
            .collect()
    }

    /// The fact bound to `label`.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&FactReference> {
        self.0.get(label)
    }

    /// Bind `label`.
    pub fn insert(&mut self, label: impl Into<String>, reference: FactReference) {
        self.0.insert(label.into(), reference);
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bindings in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FactReference)> {
        self.0.iter().map(|(l, r)| (l.as_str(), r))
    }

    /// This row with `other`'s bindings added.
    #[must_use]
    pub fn merged(&self, other: &Product) -> Product {
        let mut merged = self.clone();
        merged.0.extend(other.0.iter().map(|(l, r)| (l.clone(), r.clone())));
        merged
    }

    /// Only the bindings for `labels`.
    #[must_use]
    pub fn restrict<S: AsRef<str>>(&self, labels: &[S]) -> Product {
        labels
            .iter()
            .filter_map(|l| {
                self.0
                    .get_key_value(l.as_ref())
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
            .collect()
    }

    /// True when every binding of `parent` is also in this row.
    #[must_use]
    pub fn extends(&self, parent: &Product) -> bool {
        parent.0.iter().all(|(l, r)| self.0.get(l) == Some(r))
    }

    /// A stable identity for deduplication.
    #[must_use]
    pub fn key(&self) -> String {
        let mut text = String::new();
        for (label, reference) in &self.0 {
            let _ = writeln!(text, "{label}={}:{}", reference.fact_type, reference.hash);
        }
        blake3::hash(text.as_bytes()).to_hex().to_string()
    }
}

impl FromIterator<(String, FactReference)> for Product {
    fn from_iter<I: IntoIterator<Item = (String, FactReference)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A projected value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProjectedValue {
    Fact(Fact),
    Field(FieldValue),
    Hash(String),
    Composite(Vec<(String, ProjectedValue)>),
    Collection(Vec<ProjectedResult>),
}

impl ProjectedValue {
    /// A named component of a composite value.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ProjectedValue> {
        match self {
            Self::Composite(components) => components.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// The fact, for a simple projection.
    #[must_use]
    pub const fn as_fact(&self) -> Option<&Fact> {
        match self {
            Self::Fact(f) => Some(f),
            _ => None,
        }
    }

    /// The field value, for a field projection.
    #[must_use]
    pub const fn as_field(&self) -> Option<&FieldValue> {
        match self {
            Self::Field(v) => Some(v),
            _ => None,
        }
    }

    /// The hash, for a hash projection.
    #[must_use]
    pub fn as_hash(&self) -> Option<&str> {
        match self {
            Self::Hash(h) => Some(h),
            _ => None,
        }
    }

    /// The rows, for a collection projection.
    #[must_use]
    pub fn as_collection(&self) -> Option<&[ProjectedResult]> {
        match self {
            Self::Collection(rows) => Some(rows),
            _ => None,
        }
    }
}

/// A row together with its projected value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct ProjectedResult {
    pub tuple: Product,
    pub result: ProjectedValue,
}

/// Run a compiled description and compose its projection.
pub fn project_results<S: FactStore + ?Sized>(
    store: &S,
    given: &Product,
    description: &ResultDescription,
) -> KyroFactResult<Vec<ProjectedResult>> {
    if !description.is_satisfiable() {
        return Ok(Vec::new());
    }
    let rows = store
        .query(&description.query)?
        .into_iter()
        .map(|row| given.merged(&row))
        .collect();
    project_rows(store, given, description, rows)
}

/// Compose the projection of `description` for rows already fetched.
pub fn project_rows<S: FactStore + ?Sized>(
    store: &S,
    given: &Product,
    description: &ResultDescription,
    rows: Vec<Product>,
) -> KyroFactResult<Vec<ProjectedResult>> {
    let mut children = Vec::with_capacity(description.children.len());
    for (name, child) in &description.children {
        children.push((name.as_str(), project_results(store, given, child)?));
    }
    rows.into_iter()
        .map(|tuple| {
            let result = compose(store, &description.projection, &tuple, &children)?;
            Ok(ProjectedResult { tuple, result })
        })
        .collect()
}

fn reference<'p>(tuple: &'p Product, label: &str) -> KyroFactResult<&'p FactReference> {
    tuple
        .get(label)
        .ok_or_else(|| KyroFactError::internal(format!("label '{label}' is not bound in the result row")))
}

fn load<S: FactStore + ?Sized>(store: &S, tuple: &Product, label: &str) -> KyroFactResult<Fact> {
    let reference = reference(tuple, label)?;
    Ok(store
        .get(reference)?
        .ok_or_else(|| StorageError::FactNotFound(reference.clone()))?)
}

fn compose<S: FactStore + ?Sized>(
    store: &S,
    projection: &Projection,
    tuple: &Product,
    children: &[(&str, Vec<ProjectedResult>)],
) -> KyroFactResult<ProjectedValue> {
    Ok(match projection {
        Projection::Simple { label } => ProjectedValue::Fact(load(store, tuple, label)?),
        Projection::Field { label, field } => {
            ProjectedValue::Field(load(store, tuple, label)?.field(field).cloned().unwrap_or_default())
        }
        Projection::Hash { label } => ProjectedValue::Hash(reference(tuple, label)?.hash.clone()),
        Projection::Compound { components } => {
            let mut values = Vec::with_capacity(components.len());
            for c in components {
                let value = if let Projection::Collection { .. } = c.projection {
                    let rows: Vec<ProjectedResult> = children
                        .iter()
                        .find(|(name, _)| *name == c.name)
                        .map(|(_, rows)| rows.iter().filter(|r| r.tuple.extends(tuple)).cloned().collect())
                        .unwrap_or_default();
                    ProjectedValue::Collection(rows)
                } else {
                    compose(store, &c.projection, tuple, &[])?
                };
                values.push((c.name.clone(), value));
            }
            ProjectedValue::Composite(values)
        }
        Projection::Collection { .. } => {
            return Err(KyroFactError::internal("a collection can only be projected as a named component"))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(t: &str, h: &str) -> FactReference {
        FactReference::new(t, h)
    }

    #[test]
    fn test_key_is_order_independent() {
        let mut a = Product::new();
        a.insert("office", r("Office", "1"));
        a.insert("company", r("Company", "2"));
        let mut b = Product::new();
        b.insert("company", r("Company", "2"));
        b.insert("office", r("Office", "1"));
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().len(), 64);
    }

    #[test]
    fn test_extends_and_restrict() {
        let parent: Product = [("office".to_string(), r("Office", "1"))].into_iter().collect();
        let mut child = parent.clone();
        child.insert("manager", r("Manager", "3"));
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
        assert_eq!(child.restrict(&["office"]), parent);
    }

    #[test]
    fn test_component_lookup() {
        let value = ProjectedValue::Composite(vec![
            ("id".to_string(), ProjectedValue::Hash("abc".to_string())),
            ("city".to_string(), ProjectedValue::Field(FieldValue::from("Dallas"))),
        ]);
        assert_eq!(value.component("id").and_then(ProjectedValue::as_hash), Some("abc"));
        assert_eq!(
            value.component("city").and_then(ProjectedValue::as_field),
            Some(&FieldValue::from("Dallas"))
        );
        assert!(value.component("missing").is_none());
    }
}
