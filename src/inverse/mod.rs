//! Specification inversion.
//!
//! An observer watching `(given) { matches } => projection` must learn which
//! result rows change when a single new fact arrives. Inverting the
//! specification produces one query per match, each rooted at that match's
//! unknown: run with the new fact as its only given, it returns the rows
//! of the original query that the fact participates in.
//!
//! Matches nested in existential conditions are flattened into ordinary
//! joins for their own inverse. Their effect on the outer row flips with
//! each level of negation, so the operation is carried down the nesting
//! through [`InverseOperation::nested`]. Operations prefixed with `Maybe`
//! must be confirmed by re-reading the original query.

mod reroot;

use serde::Serialize;
use tracing::debug;

use crate::specification::{Condition, Match, Projection, Specification};

use reroot::reroot;

/// What the arrival of a fact means for the rows an inverse returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InverseOperation {
    /// The rows are new results.
    Add,
    /// The rows may have become results.
    MaybeAdd,
    /// The rows are no longer results.
    Remove,
    /// The rows may have stopped being results.
    MaybeRemove,
}

impl InverseOperation {
    /// The operation for a match nested one existential level below `self`.
    #[must_use]
    pub const fn nested(self, exists: bool) -> Self {
        match (self, exists) {
            (Self::Add | Self::MaybeAdd, true) | (Self::Remove | Self::MaybeRemove, false) => {
                Self::MaybeAdd
            }
            (Self::Add, false) => Self::Remove,
            (Self::Remove | Self::MaybeRemove, true) | (Self::MaybeAdd, false) => {
                Self::MaybeRemove
            }
        }
    }

    /// Whether rows must be confirmed against the original query.
    #[must_use]
    pub const fn needs_confirmation(self) -> bool {
        matches!(self, Self::MaybeAdd | Self::MaybeRemove)
    }

    /// Whether the operation adds rows.
    #[must_use]
    pub const fn is_add(self) -> bool {
        matches!(self, Self::Add | Self::MaybeAdd)
    }
}

/// One inverse query together with how to apply its rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecificationInverse {
    /// Its first given has the triggering fact type. Any further givens are
    /// original givens bound from the subscriber's inputs.
    pub inverse_specification: Specification,
    /// Whether rows of this inverse add or remove results.
    pub operation: InverseOperation,
    /// Labels of the original givens, matched against the subscriber's inputs.
    pub initial_subset: Vec<String>,
    /// Labels that identify an affected result row.
    pub final_subset: Vec<String>,
    /// Labels that identify the enclosing row, for collection inverses.
    pub parent_subset: Vec<String>,
    /// Collection names from the top-level projection down to the affected one.
    pub collection_identifiers: Vec<String>,
}

impl SpecificationInverse {
    /// Type of fact that triggers this inverse.
    #[must_use]
    pub fn given_type(&self) -> &str {
        self.inverse_specification
            .given
            .first()
            .map_or("", |g| g.fact_type.as_str())
    }

    /// True when the inverse affects rows of a nested collection.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        !self.collection_identifiers.is_empty()
    }
}

#[derive(Debug, Clone)]
struct InverterContext {
    /// How many leading entries of the match list are original givens.
    givens: usize,
    initial_subset: Vec<String>,
    parent_subset: Vec<String>,
    final_subset: Vec<String>,
    collection_identifiers: Vec<String>,
}

/// Compute the inverses of a specification.
///
/// Every match in the specification, whether top-level, inside an
/// existential condition, or inside a collection, yields one inverse
/// unless the triggering label cannot reach the rest of the query.
#[must_use]
pub fn invert_specification(specification: &Specification) -> Vec<SpecificationInverse> {
    let initial_subset: Vec<String> = specification.given.iter().map(|g| g.name.clone()).collect();
    let context = InverterContext {
        givens: specification.given.len(),
        parent_subset: initial_subset.clone(),
        final_subset: specification.result_labels(),
        initial_subset,
        collection_identifiers: Vec::new(),
    };
    let all: Vec<Match> = specification
        .given
        .iter()
        .map(|g| Match {
            unknown: g.clone(),
            conditions: Vec::new(),
        })
        .chain(specification.matches.iter().cloned())
        .collect();

    let mut inverses = Vec::new();
    invert_matches(&all, specification.given.len(), &context, &mut inverses);
    invert_projection(&all, &specification.projection, &context, &mut inverses);
    debug!(
        matches = specification.all_matches().len(),
        inverses = inverses.len(),
        "inverted specification"
    );
    inverses
}

fn invert_matches(
    all: &[Match],
    first: usize,
    context: &InverterContext,
    out: &mut Vec<SpecificationInverse>,
) {
    for index in first..all.len() {
        push_inverse(all, index, InverseOperation::Add, context, out);
        invert_existentials(all, index, InverseOperation::Add, context, out);
    }
}

fn invert_existentials(
    all: &[Match],
    owner: usize,
    operation: InverseOperation,
    context: &InverterContext,
    out: &mut Vec<SpecificationInverse>,
) {
    let existentials: Vec<(usize, bool, &[Match])> = all[owner]
        .conditions
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match c {
            Condition::Existential(e) => {
                Some((i, e.exists, e.matches.as_slice()))
            }
            Condition::Path(_) => None,
        })
        .collect();

    for (condition_index, exists, matches) in existentials {
        let mut flattened = all.to_vec();
        flattened[owner].conditions.remove(condition_index);
        let start = flattened.len();
        flattened.extend(matches.iter().cloned());
        let nested = operation.nested(exists);
        for index in start..flattened.len() {
            push_inverse(&flattened, index, nested, context, out);
            invert_existentials(&flattened, index, nested, context, out);
        }
    }
}

fn invert_projection(
    all: &[Match],
    projection: &Projection,
    context: &InverterContext,
    out: &mut Vec<SpecificationInverse>,
) {
    for (name, matches, inner) in projection.collections() {
        let mut extended = all.to_vec();
        let first = extended.len();
        extended.extend(matches.iter().cloned());

        let mut final_subset = context.final_subset.clone();
        final_subset.extend(matches.iter().map(|m| m.unknown.name.clone()));
        let mut collection_identifiers = context.collection_identifiers.clone();
        collection_identifiers.push(name.to_string());
        let child = InverterContext {
            givens: context.givens,
            initial_subset: context.initial_subset.clone(),
            parent_subset: context.final_subset.clone(),
            final_subset,
            collection_identifiers,
        };

        invert_matches(&extended, first, &child, out);
        invert_projection(&extended, inner, &child, out);
    }
}

fn push_inverse(
    all: &[Match],
    target: usize,
    operation: InverseOperation,
    context: &InverterContext,
    out: &mut Vec<SpecificationInverse>,
) {
    let Some(inverse_specification) = reroot(all, context.givens, target) else {
        debug!(label = %all[target].unknown.name, "no inverse for unreachable label");
        return;
    };
    out.push(SpecificationInverse {
        inverse_specification,
        operation,
        initial_subset: context.initial_subset.clone(),
        final_subset: context.final_subset.clone(),
        parent_subset: context.parent_subset.clone(),
        collection_identifiers: context.collection_identifiers.clone(),
    });
}
