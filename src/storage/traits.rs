//! Abstract storage traits for KyroFact.
//!
//! A store persists facts, executes compiled plans, and deletes facts on
//! behalf of purge conditions. Reads compose on top of those primitives,
//! so a backend only implements the primitives.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::info;

use crate::error::{ExecutionError, FactError, KyroFactError, KyroFactResult};
use crate::fact::{Fact, FactEnvelope, FactGraph, FactReference};
use crate::purge::{purge_plan, PurgeConditions};
use crate::query::{QueryDescription, ResultDescriptionBuilder, SchemaMap};
use crate::specification::Specification;

use super::projection::{project_results, Product, ProjectedResult};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Fact not found.
    #[error("Fact not found: {0}")]
    FactNotFound(FactReference),

    /// A fact failed verification on save.
    #[error("Invalid fact: {0}")]
    InvalidFact(#[from] FactError),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

impl From<StorageError> for KyroFactError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidFact(e) => Self::Fact(e),
            other => Self::Execution(ExecutionError::Storage {
                message: other.to_string(),
            }),
        }
    }
}

/// Storage trait for facts.
///
/// # Safety Considerations
/// - `save` must be idempotent: saving a stored fact only merges signatures
/// - Implementations should handle concurrent access safely
pub trait FactStore: Send + Sync {
    /// Persist every fact of `graph`. Returns the envelopes that were not
    /// stored before, in topological order.
    fn save(&self, graph: &FactGraph) -> Result<Vec<FactEnvelope>, StorageError>;

    /// The predecessor closure of `references`. Unknown references are skipped.
    fn load(&self, references: &[FactReference]) -> Result<FactGraph, StorageError>;

    /// Get one fact.
    fn get(&self, reference: &FactReference) -> Result<Option<Fact>, StorageError>;

    /// The subset of `references` that is stored.
    fn which_exist(&self, references: &[FactReference]) -> Result<Vec<FactReference>, StorageError>;

    /// Every stored fact of one type.
    fn facts_of_type(&self, fact_type: &str) -> Result<Vec<FactReference>, StorageError>;

    /// Direct successors of a fact through any role.
    fn successors(&self, reference: &FactReference) -> Result<Vec<FactReference>, StorageError>;

    /// A snapshot of the fact-type and role identifiers.
    fn schema(&self) -> Result<SchemaMap, StorageError>;

    /// Execute a compiled plan. Each row maps output labels to facts.
    fn query(&self, description: &QueryDescription) -> Result<Vec<Product>, StorageError>;

    /// Delete facts. Returns how many were removed.
    fn delete(&self, references: &BTreeSet<FactReference>) -> Result<usize, StorageError>;

    /// Compile and run `spec` for the given facts, composing projections.
    fn read(&self, start: &[FactReference], spec: &Specification) -> KyroFactResult<Vec<ProjectedResult>> {
        let schema = self.schema()?;
        let description = ResultDescriptionBuilder::new(&schema).build(start, spec)?;
        let given = Product::from_given(&spec.given, start);
        project_results(self, &given, &description)
    }

    /// Apply purge conditions: for every fact of a purged type whose trigger
    /// exists, delete its successors except the triggers and their ancestors.
    ///
    /// Returns how many facts were removed.
    fn purge(&self, conditions: &PurgeConditions) -> KyroFactResult<usize> {
        let mut removed = 0;
        for condition in conditions.specifications() {
            let (Some(root_label), Some(trigger)) = (condition.given.first(), condition.matches.first()) else {
                continue;
            };
            let schema = self.schema()?;
            let builder = ResultDescriptionBuilder::new(&schema);
            for root in self.facts_of_type(&root_label.fact_type)? {
                let description = builder.build(std::slice::from_ref(&root), condition)?;
                if !description.is_satisfiable() {
                    // The trigger type or role has never been stored.
                    break;
                }
                let triggers: Vec<FactReference> = self
                    .query(&description.query)?
                    .iter()
                    .filter_map(|p| p.get(&trigger.unknown.name).cloned())
                    .collect();
                if triggers.is_empty() {
                    continue;
                }
                let plan = purge_plan(
                    &root,
                    &triggers,
                    |r| Ok(self.successors(r)?),
                    |r| {
                        Ok(self
                            .get(r)?
                            .map(|f| f.predecessor_references().map(|(_, p)| p.clone()).collect())
                            .unwrap_or_default())
                    },
                )?;
                let count = self.delete(&plan.doomed)?;
                info!(
                    root = %root,
                    triggers = triggers.len(),
                    removed = count,
                    "purged successors"
                );
                removed += count;
            }
        }
        Ok(removed)
    }
}
