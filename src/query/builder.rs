//! Compile a specification and a given tuple into join plans.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{CompileError, KyroFactResult, SpecificationError};
use crate::fact::FactReference;
use crate::specification::{Label, Match, PathCondition, Projection, Specification};

use super::description::QueryDescription;
use super::schema::Schema;

/// A compiled specification: the plan for the top-level rows plus one
/// child plan per named collection in the projection.
///
/// A child plan extends its parent's plan, so each child row carries the
/// parent's outputs and can be correlated back to its parent row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultDescription {
    /// Plan for the top-level rows.
    pub query: QueryDescription,
    /// What to project from each row.
    pub projection: Projection,
    /// Child plans, one per named collection, in projection order.
    pub children: Vec<(String, ResultDescription)>,
}

impl ResultDescription {
    /// False when no row can ever match, so the query is skipped.
    #[must_use]
    pub fn is_satisfiable(&self) -> bool {
        self.query.is_satisfiable()
    }

    /// The child plan for a named collection.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&ResultDescription> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }
}

#[derive(Debug, Clone)]
struct KnownFact {
    fact_index: usize,
    fact_type: String,
}

type KnownFacts = BTreeMap<String, KnownFact>;

struct Given<'g> {
    labels: &'g [Label],
    start: &'g [FactReference],
}

impl Given<'_> {
    fn find(&self, name: &str) -> Option<(&Label, &FactReference)> {
        self.labels
            .iter()
            .position(|l| l.name == name)
            .map(|i| (&self.labels[i], &self.start[i]))
    }
}

/// Builds [`ResultDescription`]s against a schema snapshot.
///
/// Compilation is a pure function of (specification, given tuple, schema):
/// it performs no I/O and never fails because of data. Fact types and roles
/// absent from the schema make the affected branch unsatisfiable.
pub struct ResultDescriptionBuilder<'s, S: Schema + ?Sized> {
    schema: &'s S,
}

impl<'s, S: Schema + ?Sized> ResultDescriptionBuilder<'s, S> {
    /// A builder that interns names in `schema`.
    #[must_use]
    pub const fn new(schema: &'s S) -> Self {
        Self { schema }
    }

    /// Compile `spec` for the given facts in `start`.
    pub fn build(&self, start: &[FactReference], spec: &Specification) -> KyroFactResult<ResultDescription> {
        spec.validate()?;
        if start.len() != spec.given.len() {
            return Err(CompileError::ArityMismatch {
                expected: spec.given.len(),
                actual: start.len(),
            }
            .into());
        }
        for (label, reference) in spec.given.iter().zip(start) {
            if label.fact_type != reference.fact_type {
                return Err(CompileError::TypeMismatch {
                    label: label.name.clone(),
                    expected: label.fact_type.clone(),
                    actual: reference.fact_type.clone(),
                }
                .into());
            }
        }

        let given = Given {
            labels: &spec.given,
            start,
        };
        let (mut query, mut known) =
            self.add_edges(QueryDescription::unsatisfiable(), &given, KnownFacts::new(), &[], &spec.matches)?;
        if spec.matches.is_empty() {
            (query, known) = self.bind_givens(query, &given, known);
        }
        self.result_description(query, &given, known, &spec.projection)
    }

    fn result_description(
        &self,
        query: QueryDescription,
        given: &Given<'_>,
        known: KnownFacts,
        projection: &Projection,
    ) -> KyroFactResult<ResultDescription> {
        let mut children = Vec::new();
        if query.is_satisfiable() {
            for (name, matches, child_projection) in projection.collections() {
                let (child_query, child_known) =
                    self.add_edges(query.clone(), given, known.clone(), &[], matches)?;
                let child = self.result_description(child_query, given, child_known, child_projection)?;
                children.push((name.to_string(), child));
            }
        } else {
            debug!("specification is unsatisfiable against the current schema");
        }
        Ok(ResultDescription {
            query,
            projection: projection.clone(),
            children,
        })
    }

    fn bind_givens(&self, mut query: QueryDescription, given: &Given<'_>, mut known: KnownFacts) -> (QueryDescription, KnownFacts) {
        for (label, reference) in given.labels.iter().zip(given.start) {
            if known.contains_key(&label.name) {
                continue;
            }
            let Some(type_id) = self.schema.fact_type_id(&label.fact_type) else {
                debug!(fact_type = %label.fact_type, "given type is not in the schema");
                return (QueryDescription::unsatisfiable(), KnownFacts::new());
            };
            let (next, fact_index) = query.with_input_parameter(label, type_id, &reference.hash, &[]);
            query = next;
            known.insert(
                label.name.clone(),
                KnownFact {
                    fact_index,
                    fact_type: label.fact_type.clone(),
                },
            );
        }
        (query, known)
    }

    fn add_edges(
        &self,
        mut query: QueryDescription,
        given: &Given<'_>,
        mut known: KnownFacts,
        path: &[usize],
        matches: &[Match],
    ) -> KyroFactResult<(QueryDescription, KnownFacts)> {
        for m in matches {
            // Conditions joining to already-placed vertices go first.
            let mut conditions: Vec<&PathCondition> = m.path_conditions().collect();
            conditions.sort_by_key(|c| !known.contains_key(&c.label_right));
            for condition in conditions {
                (query, known) = self.add_path_condition(query, given, known, path, &m.unknown, condition)?;
                if !query.is_satisfiable() {
                    return Ok((query, known));
                }
            }

            for existential in m.existential_conditions() {
                let (with_condition, nested_path) = query.with_existential_condition(existential.exists, path);
                let (conditional, _) =
                    self.add_edges(with_condition, given, known.clone(), &nested_path, &existential.matches)?;
                if conditional.is_satisfiable() {
                    query = conditional;
                } else if existential.exists {
                    debug!(label = %m.unknown.name, "positive existential condition is unsatisfiable");
                    return Ok((QueryDescription::unsatisfiable(), KnownFacts::new()));
                } else {
                    debug!(label = %m.unknown.name, "negative existential condition is always true");
                }
            }
        }
        Ok((query, known))
    }

    fn add_path_condition(
        &self,
        mut query: QueryDescription,
        given: &Given<'_>,
        mut known: KnownFacts,
        path: &[usize],
        unknown: &Label,
        condition: &PathCondition,
    ) -> KyroFactResult<(QueryDescription, KnownFacts)> {
        let unsatisfiable = || -> KyroFactResult<(QueryDescription, KnownFacts)> {
            Ok((QueryDescription::unsatisfiable(), KnownFacts::new()))
        };

        if !known.contains_key(&condition.label_right) {
            let Some((label, reference)) = given.find(&condition.label_right) else {
                return Err(SpecificationError::UnknownLabel {
                    label: condition.label_right.clone(),
                    known: known.keys().cloned().collect(),
                }
                .into());
            };
            let Some(type_id) = self.schema.fact_type_id(&label.fact_type) else {
                debug!(fact_type = %label.fact_type, "given type is not in the schema");
                return unsatisfiable();
            };
            let (next, fact_index) = query.with_input_parameter(label, type_id, &reference.hash, path);
            query = next;
            known.insert(
                label.name.clone(),
                KnownFact {
                    fact_index,
                    fact_type: label.fact_type.clone(),
                },
            );
        }

        let known_unknown = known.get(&unknown.name).map(|k| k.fact_index);
        let role_count = condition.roles_left.len() + condition.roles_right.len();
        let right = &known[&condition.label_right];
        let mut fact_index = right.fact_index;
        let mut fact_type = right.fact_type.clone();

        // Walk up the right-hand chain through predecessor joins.
        for (i, role) in condition.roles_right.iter().enumerate() {
            let Some(type_id) = self.schema.fact_type_id(&fact_type) else {
                debug!(fact_type = %fact_type, "fact type is not in the schema");
                return unsatisfiable();
            };
            let Some(role_id) = self.schema.role_id(type_id, &role.name) else {
                debug!(fact_type = %fact_type, role = %role.name, "role is not in the schema");
                return unsatisfiable();
            };
            match known_unknown {
                Some(target) if i == role_count - 1 => {
                    query = query.with_edge(target, fact_index, &role.name, role_id, path);
                    fact_index = target;
                }
                _ => {
                    let (next, predecessor) = query.with_fact(&role.predecessor_type);
                    query = next.with_edge(predecessor, fact_index, &role.name, role_id, path);
                    fact_index = predecessor;
                }
            }
            fact_type.clone_from(&role.predecessor_type);
        }

        // Walk up the left-hand chain, then replay it in successor direction.
        let mut left_type = unknown.fact_type.clone();
        let mut left_edges = Vec::with_capacity(condition.roles_left.len());
        for role in &condition.roles_left {
            let Some(type_id) = self.schema.fact_type_id(&left_type) else {
                debug!(fact_type = %left_type, "fact type is not in the schema");
                return unsatisfiable();
            };
            let Some(role_id) = self.schema.role_id(type_id, &role.name) else {
                debug!(fact_type = %left_type, role = %role.name, "role is not in the schema");
                return unsatisfiable();
            };
            left_edges.push((role.name.as_str(), role_id, left_type.clone()));
            left_type.clone_from(&role.predecessor_type);
        }
        if left_type != fact_type {
            return Err(SpecificationError::RoleTypeMismatch {
                left: format!("{}.{}", unknown.name, left_type),
                right: format!("{}.{}", condition.label_right, fact_type),
            }
            .into());
        }
        for (i, (role, role_id, declaring_type)) in left_edges.into_iter().rev().enumerate() {
            match known_unknown {
                Some(target) if condition.roles_right.len() + i == role_count - 1 => {
                    query = query.with_edge(fact_index, target, role, role_id, path);
                    fact_index = target;
                }
                _ => {
                    let (next, successor) = query.with_fact(&declaring_type);
                    query = next.with_edge(fact_index, successor, role, role_id, path);
                    fact_index = successor;
                }
            }
        }

        match known_unknown {
            None => {
                known.insert(
                    unknown.name.clone(),
                    KnownFact {
                        fact_index,
                        fact_type: unknown.fact_type.clone(),
                    },
                );
                // Rows materialize only top-level labels.
                if path.is_empty() {
                    query = query.with_output(&unknown.name, &unknown.fact_type, fact_index);
                }
            }
            Some(target) if target != fact_index => {
                return Err(CompileError::KnownLabelsNotJoinable {
                    left: unknown.name.clone(),
                    right: condition.label_right.clone(),
                }
                .into());
            }
            Some(_) => {}
        }
        Ok((query, known))
    }
}
