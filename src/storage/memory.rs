//! In-memory storage backend.
//!
//! This module provides a thread-safe in-memory [`FactStore`]. It is intended
//! for embedded usage, tests, and as a reference implementation: compiled
//! plans run directly over predecessor and successor indexes, in the same
//! join order the generated SQL uses.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use tracing::debug;

use crate::fact::{Fact, FactEnvelope, FactGraph, FactReference};
use crate::query::{
    plan_joins, ExistentialConditionDescription, InputDescription, JoinStep, QueryDescription,
    SchemaMap,
};
use crate::storage::projection::Product;
use crate::storage::traits::{FactStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

type Row = BTreeMap<usize, FactReference>;

#[derive(Debug, Default)]
struct FactState {
    facts: HashMap<FactReference, FactEnvelope>,
    successors: HashMap<FactReference, Vec<(String, FactReference)>>,
    by_type: HashMap<String, BTreeSet<FactReference>>,
}

impl FactState {
    fn insert(&mut self, envelope: FactEnvelope) {
        let reference = envelope.fact.reference().clone();
        for (role, predecessor) in envelope.fact.predecessor_references() {
            self.successors
                .entry(predecessor.clone())
                .or_default()
                .push((role.to_string(), reference.clone()));
        }
        self.by_type
            .entry(reference.fact_type.clone())
            .or_default()
            .insert(reference.clone());
        self.facts.insert(reference, envelope);
    }

    fn remove(&mut self, reference: &FactReference) -> bool {
        let Some(envelope) = self.facts.remove(reference) else {
            return false;
        };
        for (_, predecessor) in envelope.fact.predecessor_references() {
            if let Some(list) = self.successors.get_mut(predecessor) {
                list.retain(|(_, s)| s != reference);
            }
        }
        self.successors.remove(reference);
        if let Some(set) = self.by_type.get_mut(&reference.fact_type) {
            set.remove(reference);
        }
        true
    }

    fn fact(&self, reference: &FactReference) -> Option<&Fact> {
        self.facts.get(reference).map(|e| &e.fact)
    }

    /// The vertex at `fact_index` may bind `reference` only if it is not
    /// pinned to a different fact by an input of this level.
    fn admits(inputs: &[InputDescription], description: &QueryDescription, fact_index: usize, reference: &FactReference) -> bool {
        inputs
            .iter()
            .filter(|i| i.fact_index == fact_index)
            .all(|i| description.input_hash(i) == Some(reference.hash.as_str()) && i.fact_type == reference.fact_type)
    }

    fn pinned(inputs: &[InputDescription], description: &QueryDescription, fact_index: usize) -> Option<FactReference> {
        inputs
            .iter()
            .find(|i| i.fact_index == fact_index)
            .and_then(|i| description.input_hash(i).map(|h| FactReference::new(i.fact_type.clone(), h)))
    }

    fn extend(&self, description: &QueryDescription, inputs: &[InputDescription], step: &JoinStep<'_>, row: Row) -> Vec<Row> {
        let bind = |fact_index: usize, reference: &FactReference| {
            let mut next = row.clone();
            next.insert(fact_index, reference.clone());
            next
        };
        match step {
            JoinStep::Successor(e) => {
                let Some(predecessor) = row.get(&e.predecessor_fact_index) else {
                    return Vec::new();
                };
                let successor_type = description.fact_type(e.successor_fact_index);
                self.successors
                    .get(predecessor)
                    .into_iter()
                    .flatten()
                    .filter(|(role, s)| *role == e.role && Some(s.fact_type.as_str()) == successor_type)
                    .filter(|(_, s)| Self::admits(inputs, description, e.successor_fact_index, s))
                    .map(|(_, s)| bind(e.successor_fact_index, s))
                    .collect()
            }
            JoinStep::Predecessor(e) => {
                let Some(fact) = row.get(&e.successor_fact_index).and_then(|s| self.fact(s)) else {
                    return Vec::new();
                };
                let predecessor_type = description.fact_type(e.predecessor_fact_index);
                fact.predecessors_by_role(&e.role)
                    .filter(|p| Some(p.fact_type.as_str()) == predecessor_type)
                    .filter(|p| self.facts.contains_key(*p))
                    .filter(|p| Self::admits(inputs, description, e.predecessor_fact_index, p))
                    .map(|p| bind(e.predecessor_fact_index, p))
                    .collect()
            }
            JoinStep::Closing(e) => {
                let joined = row
                    .get(&e.successor_fact_index)
                    .and_then(|s| self.fact(s))
                    .zip(row.get(&e.predecessor_fact_index))
                    .is_some_and(|(fact, p)| fact.predecessors_by_role(&e.role).any(|r| r == p));
                if joined {
                    vec![row]
                } else {
                    Vec::new()
                }
            }
            JoinStep::Cross(fact_index) => {
                if let Some(reference) = Self::pinned(inputs, description, *fact_index) {
                    if self.facts.contains_key(&reference) {
                        return vec![bind(*fact_index, &reference)];
                    }
                    return Vec::new();
                }
                let Some(fact_type) = description.fact_type(*fact_index) else {
                    return Vec::new();
                };
                self.by_type
                    .get(fact_type)
                    .into_iter()
                    .flatten()
                    .map(|r| bind(*fact_index, r))
                    .collect()
            }
        }
    }

    fn walk(&self, description: &QueryDescription, inputs: &[InputDescription], steps: &[JoinStep<'_>], mut rows: Vec<Row>) -> Vec<Row> {
        for step in steps {
            rows = rows
                .into_iter()
                .flat_map(|row| self.extend(description, inputs, step, row))
                .collect();
            if rows.is_empty() {
                break;
            }
        }
        rows
    }

    fn satisfies(
        &self,
        description: &QueryDescription,
        condition: &ExistentialConditionDescription,
        row: &Row,
        outer: &BTreeSet<usize>,
    ) -> bool {
        let mut written = outer.clone();
        let steps = plan_joins(&condition.edges, &condition.inputs, &mut written);
        let rows = self.walk(description, &condition.inputs, &steps, vec![row.clone()]);
        let found = rows.iter().any(|r| {
            condition
                .existential_conditions
                .iter()
                .all(|c| self.satisfies(description, c, r, &written))
        });
        found == condition.exists
    }

    fn execute(&self, description: &QueryDescription) -> Vec<Product> {
        let Some(root) = description.root_fact_index() else {
            return Vec::new();
        };
        let Some(start) = Self::pinned(&description.inputs, description, root) else {
            return Vec::new();
        };
        if !self.facts.contains_key(&start) {
            return Vec::new();
        }
        let mut written = BTreeSet::from([root]);
        let steps = plan_joins(&description.edges, &description.inputs, &mut written);
        let rows = self.walk(description, &description.inputs, &steps, vec![Row::from([(root, start)])]);

        let mut seen = HashSet::new();
        rows.into_iter()
            .filter(|row| {
                description
                    .existential_conditions
                    .iter()
                    .all(|c| self.satisfies(description, c, row, &written))
            })
            .filter_map(|row| {
                let product: Product = description
                    .outputs
                    .iter()
                    .filter_map(|o| row.get(&o.fact_index).map(|r| (o.label.clone(), r.clone())))
                    .collect();
                seen.insert(product.clone()).then_some(product)
            })
            .collect()
    }

    /// Predecessor closure of `roots`, predecessors first.
    fn closure(&self, roots: &[FactReference]) -> Vec<FactReference> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            let mut stack = vec![(root, false)];
            while let Some((current, expanded)) = stack.pop() {
                if expanded {
                    order.push(current.clone());
                    continue;
                }
                let Some(fact) = self.fact(current) else {
                    continue;
                };
                if !visited.insert(current) {
                    continue;
                }
                stack.push((current, true));
                for (_, p) in fact.predecessor_references() {
                    if !visited.contains(p) {
                        stack.push((p, false));
                    }
                }
            }
        }
        order
    }
}

/// Thread-safe in-memory fact store.
#[derive(Debug, Default)]
pub struct InMemoryFactStore {
    state: RwLock<FactState>,
    schema: RwLock<SchemaMap>,
}

impl InMemoryFactStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored facts.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.state.read().map_err(|_| lock_err("facts"))?.facts.len())
    }

    /// True when no facts are stored.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl FactStore for InMemoryFactStore {
    fn save(&self, graph: &FactGraph) -> Result<Vec<FactEnvelope>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("facts"))?;
        let mut schema = self.schema.write().map_err(|_| lock_err("schema"))?;

        // Validate the whole graph before writing anything.
        let mut admitted: HashSet<&FactReference> = HashSet::new();
        for envelope in graph.envelopes() {
            envelope.fact.verify_hash()?;
            if let Some((_, missing)) = envelope
                .fact
                .predecessor_references()
                .find(|(_, p)| !state.facts.contains_key(*p) && !admitted.contains(*p))
            {
                return Err(StorageError::FactNotFound(missing.clone()));
            }
            admitted.insert(envelope.fact.reference());
        }

        let mut saved = Vec::new();
        for envelope in graph.envelopes() {
            let reference = envelope.fact.reference();
            if let Some(existing) = state.facts.get_mut(reference) {
                existing.signatures.extend(envelope.signatures.iter().cloned());
                continue;
            }
            schema.register_fact(&envelope.fact);
            state.insert(envelope.clone());
            saved.push(envelope.clone());
        }
        debug!(offered = graph.len(), saved = saved.len(), "saved facts");
        Ok(saved)
    }

    fn load(&self, references: &[FactReference]) -> Result<FactGraph, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts"))?;
        let mut graph = FactGraph::new();
        for reference in state.closure(references) {
            if let Some(envelope) = state.facts.get(&reference) {
                graph.add(envelope.clone())?;
            }
        }
        Ok(graph)
    }

    fn get(&self, reference: &FactReference) -> Result<Option<Fact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts"))?;
        Ok(state.fact(reference).cloned())
    }

    fn which_exist(&self, references: &[FactReference]) -> Result<Vec<FactReference>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts"))?;
        Ok(references
            .iter()
            .filter(|r| state.facts.contains_key(*r))
            .cloned()
            .collect())
    }

    fn facts_of_type(&self, fact_type: &str) -> Result<Vec<FactReference>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts"))?;
        Ok(state
            .by_type
            .get(fact_type)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn successors(&self, reference: &FactReference) -> Result<Vec<FactReference>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts"))?;
        let mut out: Vec<FactReference> = state
            .successors
            .get(reference)
            .into_iter()
            .flatten()
            .map(|(_, s)| s.clone())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn schema(&self) -> Result<SchemaMap, StorageError> {
        Ok(self.schema.read().map_err(|_| lock_err("schema"))?.clone())
    }

    fn query(&self, description: &QueryDescription) -> Result<Vec<Product>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("facts"))?;
        Ok(state.execute(description))
    }

    fn delete(&self, references: &BTreeSet<FactReference>) -> Result<usize, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("facts"))?;
        Ok(references.iter().filter(|r| state.remove(r)).count())
    }
}
