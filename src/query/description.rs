//! The compiler's logical join plan.
//!
//! A [`QueryDescription`] is an arena of typed fact vertices (1-based
//! indices) joined by edges. Inputs pin vertices to concrete facts, outputs
//! name the vertices to materialize, and existential condition descriptions
//! nest correlated sub-plans. Every `with_*` method returns a new value;
//! a plan is never mutated once built.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::specification::Label;

/// A bound query parameter, in `$n` order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum QueryParameter {
    Integer(i64),
    Text(String),
}

/// A vertex pinned to one given fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct InputDescription {
    pub label: String,
    pub fact_type: String,
    pub fact_index: usize,
    pub fact_type_parameter: usize,
    pub fact_hash_parameter: usize,
}

/// A typed join vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct FactDescription {
    pub fact_type: String,
    pub fact_index: usize,
}

/// A predecessor edge between two vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct EdgeDescription {
    pub edge_index: usize,
    pub predecessor_fact_index: usize,
    pub successor_fact_index: usize,
    pub role: String,
    pub role_parameter: usize,
}

/// A vertex to materialize in each result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct OutputDescription {
    pub label: String,
    pub fact_type: String,
    pub fact_index: usize,
}

/// A correlated sub-plan that must (or must not) produce a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct ExistentialConditionDescription {
    pub exists: bool,
    pub inputs: Vec<InputDescription>,
    pub edges: Vec<EdgeDescription>,
    pub existential_conditions: Vec<ExistentialConditionDescription>,
}

impl ExistentialConditionDescription {
    fn edge_count(&self) -> usize {
        self.edges.len() + count_edges(&self.existential_conditions)
    }
}

fn count_edges(conditions: &[ExistentialConditionDescription]) -> usize {
    conditions.iter().map(ExistentialConditionDescription::edge_count).sum()
}

/// The join plan for one (specification, given tuple) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct QueryDescription {
    pub inputs: Vec<InputDescription>,
    pub parameters: Vec<QueryParameter>,
    pub outputs: Vec<OutputDescription>,
    pub facts: Vec<FactDescription>,
    pub edges: Vec<EdgeDescription>,
    pub existential_conditions: Vec<ExistentialConditionDescription>,
}

struct Level<'a> {
    inputs: &'a mut Vec<InputDescription>,
    edges: &'a mut Vec<EdgeDescription>,
    existential_conditions: &'a mut Vec<ExistentialConditionDescription>,
}

impl QueryDescription {
    /// A plan that can produce no rows. Also the starting point for building.
    #[must_use]
    pub const fn unsatisfiable() -> Self {
        Self {
            inputs: Vec::new(),
            parameters: Vec::new(),
            outputs: Vec::new(),
            facts: Vec::new(),
            edges: Vec::new(),
            existential_conditions: Vec::new(),
        }
    }

    /// A plan is satisfiable once it is anchored to at least one input.
    #[must_use]
    pub fn is_satisfiable(&self) -> bool {
        !self.inputs.is_empty()
    }

    fn level(&mut self, path: &[usize]) -> Level<'_> {
        let mut level = Level {
            inputs: &mut self.inputs,
            edges: &mut self.edges,
            existential_conditions: &mut self.existential_conditions,
        };
        for &i in path {
            let Level {
                existential_conditions,
                ..
            } = level;
            let condition = &mut existential_conditions[i];
            level = Level {
                inputs: &mut condition.inputs,
                edges: &mut condition.edges,
                existential_conditions: &mut condition.existential_conditions,
            };
        }
        level
    }

    /// Pin a new vertex to the given fact `(type_id, hash)`.
    #[must_use]
    pub fn with_input_parameter(
        &self,
        label: &Label,
        type_id: i64,
        hash: &str,
        path: &[usize],
    ) -> (Self, usize) {
        let mut next = self.clone();
        let fact_index = next.facts.len() + 1;
        next.facts.push(FactDescription {
            fact_type: label.fact_type.clone(),
            fact_index,
        });
        next.parameters.push(QueryParameter::Integer(type_id));
        let fact_type_parameter = next.parameters.len();
        next.parameters.push(QueryParameter::Text(hash.to_string()));
        let fact_hash_parameter = next.parameters.len();
        next.level(path).inputs.push(InputDescription {
            label: label.name.clone(),
            fact_type: label.fact_type.clone(),
            fact_index,
            fact_type_parameter,
            fact_hash_parameter,
        });
        (next, fact_index)
    }

    /// Allocate an unconstrained vertex of `fact_type`.
    #[must_use]
    pub fn with_fact(&self, fact_type: &str) -> (Self, usize) {
        let mut next = self.clone();
        let fact_index = next.facts.len() + 1;
        next.facts.push(FactDescription {
            fact_type: fact_type.to_string(),
            fact_index,
        });
        (next, fact_index)
    }

    /// Join two vertices through `role`.
    #[must_use]
    pub fn with_edge(
        &self,
        predecessor_fact_index: usize,
        successor_fact_index: usize,
        role: &str,
        role_id: i64,
        path: &[usize],
    ) -> Self {
        let mut next = self.clone();
        let edge_index = next.edges.len() + count_edges(&next.existential_conditions) + 1;
        next.parameters.push(QueryParameter::Integer(role_id));
        let role_parameter = next.parameters.len();
        next.level(path).edges.push(EdgeDescription {
            edge_index,
            predecessor_fact_index,
            successor_fact_index,
            role: role.to_string(),
            role_parameter,
        });
        next
    }

    /// Materialize a vertex under `label`.
    #[must_use]
    pub fn with_output(&self, label: &str, fact_type: &str, fact_index: usize) -> Self {
        let mut next = self.clone();
        next.outputs.push(OutputDescription {
            label: label.to_string(),
            fact_type: fact_type.to_string(),
            fact_index,
        });
        next
    }

    /// Open a nested condition under `path`, returning the path to it.
    #[must_use]
    pub fn with_existential_condition(&self, exists: bool, path: &[usize]) -> (Self, Vec<usize>) {
        let mut next = self.clone();
        let conditions = next.level(path).existential_conditions;
        conditions.push(ExistentialConditionDescription {
            exists,
            inputs: Vec::new(),
            edges: Vec::new(),
            existential_conditions: Vec::new(),
        });
        let mut nested = path.to_vec();
        nested.push(conditions.len() - 1);
        (next, nested)
    }

    /// The fact type of a vertex.
    #[must_use]
    pub fn fact_type(&self, fact_index: usize) -> Option<&str> {
        self.facts
            .get(fact_index.wrapping_sub(1))
            .map(|f| f.fact_type.as_str())
    }

    /// The value of a 1-based parameter.
    #[must_use]
    pub fn parameter(&self, index: usize) -> Option<&QueryParameter> {
        self.parameters.get(index.wrapping_sub(1))
    }

    /// The hash an input is pinned to.
    #[must_use]
    pub fn input_hash(&self, input: &InputDescription) -> Option<&str> {
        match self.parameter(input.fact_hash_parameter) {
            Some(QueryParameter::Text(hash)) => Some(hash),
            _ => None,
        }
    }

    /// The vertex every join walk starts from.
    ///
    /// This is the input touched by the first edge, or the first input when
    /// no edge touches one.
    #[must_use]
    pub fn root_fact_index(&self) -> Option<usize> {
        let is_input = |i: usize| self.inputs.iter().any(|input| input.fact_index == i);
        self.edges
            .first()
            .and_then(|e| {
                [e.predecessor_fact_index, e.successor_fact_index]
                    .into_iter()
                    .find(|&i| is_input(i))
            })
            .or_else(|| self.inputs.first().map(|i| i.fact_index))
    }
}

/// One step of a join walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStep<'a> {
    /// From a written predecessor to a new successor.
    Successor(&'a EdgeDescription),
    /// From a written successor to a new predecessor.
    Predecessor(&'a EdgeDescription),
    /// Both endpoints written: the edge only filters.
    Closing(&'a EdgeDescription),
    /// A vertex no written vertex reaches.
    Cross(usize),
}

/// Order `edges` so that every step extends already-written vertices.
///
/// `written` holds the vertices bound before the walk and is updated with
/// every vertex the walk binds. Stored plans and generated SQL share this
/// order so both produce rows in the same shape.
pub fn plan_joins<'a>(
    edges: &'a [EdgeDescription],
    inputs: &[InputDescription],
    written: &mut BTreeSet<usize>,
) -> Vec<JoinStep<'a>> {
    let mut steps = Vec::with_capacity(edges.len());
    let mut remaining: Vec<&EdgeDescription> = edges.iter().collect();
    while !remaining.is_empty() {
        let before = remaining.len();
        remaining.retain(|edge| {
            let predecessor = written.contains(&edge.predecessor_fact_index);
            let successor = written.contains(&edge.successor_fact_index);
            match (predecessor, successor) {
                (true, true) => steps.push(JoinStep::Closing(edge)),
                (true, false) => {
                    written.insert(edge.successor_fact_index);
                    steps.push(JoinStep::Successor(edge));
                }
                (false, true) => {
                    written.insert(edge.predecessor_fact_index);
                    steps.push(JoinStep::Predecessor(edge));
                }
                (false, false) => return true,
            }
            false
        });
        if remaining.len() == before {
            let touches = |i: usize| {
                remaining
                    .iter()
                    .any(|e| e.predecessor_fact_index == i || e.successor_fact_index == i)
            };
            let next = inputs
                .iter()
                .map(|i| i.fact_index)
                .find(|&i| !written.contains(&i) && touches(i))
                .unwrap_or(remaining[0].predecessor_fact_index);
            written.insert(next);
            steps.push(JoinStep::Cross(next));
        }
    }
    for input in inputs {
        if written.insert(input.fact_index) {
            steps.push(JoinStep::Cross(input.fact_index));
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods_do_not_mutate() {
        let empty = QueryDescription::unsatisfiable();
        let (with_input, index) =
            empty.with_input_parameter(&Label::new("company", "Company"), 1, "abc", &[]);
        assert!(!empty.is_satisfiable());
        assert!(with_input.is_satisfiable());
        assert_eq!(index, 1);
        assert_eq!(with_input.parameters.len(), 2);
        assert_eq!(with_input.input_hash(&with_input.inputs[0]), Some("abc"));
    }

    #[test]
    fn test_edges_are_numbered_across_levels() {
        let (q, company) = QueryDescription::unsatisfiable().with_input_parameter(
            &Label::new("company", "Company"),
            1,
            "abc",
            &[],
        );
        let (q, office) = q.with_fact("Office");
        let q = q.with_edge(company, office, "company", 7, &[]);
        let (q, path) = q.with_existential_condition(false, &[]);
        let (q, closure) = q.with_fact("Office.Closure");
        let q = q.with_edge(office, closure, "office", 8, &path);

        assert_eq!(path, vec![0]);
        assert_eq!(q.edges.len(), 1);
        let nested = &q.existential_conditions[0];
        assert_eq!(nested.edges[0].edge_index, 2);
        assert_eq!(nested.edges[0].role_parameter, 4);
        assert_eq!(q.parameter(4), Some(&QueryParameter::Integer(8)));
        assert_eq!(q.fact_type(closure), Some("Office.Closure"));
    }

    #[test]
    fn test_plan_joins_follows_written_vertices() {
        let (q, company) = QueryDescription::unsatisfiable().with_input_parameter(
            &Label::new("company", "Company"),
            1,
            "abc",
            &[],
        );
        let (q, office) = q.with_fact("Office");
        let (q, manager) = q.with_fact("Manager");
        // Declared out of walk order.
        let q = q.with_edge(office, manager, "office", 3, &[]);
        let q = q.with_edge(company, office, "company", 2, &[]);

        let mut written = BTreeSet::from([q.root_fact_index().unwrap()]);
        let steps = plan_joins(&q.edges, &q.inputs, &mut written);
        assert_eq!(
            steps,
            vec![JoinStep::Successor(&q.edges[1]), JoinStep::Successor(&q.edges[0])]
        );
        assert!(written.contains(&manager));
    }

    #[test]
    fn test_plan_joins_cross_joins_disconnected_inputs() {
        let (q, a) = QueryDescription::unsatisfiable().with_input_parameter(
            &Label::new("a", "A"),
            1,
            "x",
            &[],
        );
        let (q, b) = q.with_input_parameter(&Label::new("b", "B"), 2, "y", &[]);
        let mut written = BTreeSet::from([a]);
        let steps = plan_joins(&q.edges, &q.inputs, &mut written);
        assert_eq!(steps, vec![JoinStep::Cross(b)]);
    }
}
