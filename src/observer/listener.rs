//! Per-observer incremental state, owned by the dispatcher worker.

use std::collections::{HashMap, HashSet};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::error::{KyroFactError, KyroFactResult};
use crate::fact::FactReference;
use crate::inverse::{invert_specification, InverseOperation, SpecificationInverse};
use crate::network::CancellationToken;
use crate::query::{ResultDescription, ResultDescriptionBuilder, SchemaMap};
use crate::specification::Specification;
use crate::storage::{project_results, project_rows, FactStore, Product, ProjectedResult, ProjectedValue};

use super::events::ObservationEvent;

/// Rows known to the observer, per collection path. The empty path holds
/// the top-level rows.
type Known = HashMap<Vec<String>, HashMap<String, Product>>;

struct Candidate {
    operation: InverseOperation,
    collection: Vec<String>,
    parent_subset: Vec<String>,
    tuple: Product,
}

pub(super) struct Listener {
    start: Vec<FactReference>,
    given: Product,
    specification: Specification,
    inverses: Vec<SpecificationInverse>,
    known: Known,
    pub(super) cancel: CancellationToken,
    pub(super) tx: Sender<ObservationEvent>,
}

fn child_description<'d>(description: &'d ResultDescription, path: &[String]) -> KyroFactResult<&'d ResultDescription> {
    path.iter().try_fold(description, |d, name| {
        d.child(name)
            .ok_or_else(|| KyroFactError::internal(format!("no collection named '{name}'")))
    })
}

impl Listener {
    pub(super) fn new(
        start: Vec<FactReference>,
        specification: Specification,
        cancel: CancellationToken,
        tx: Sender<ObservationEvent>,
    ) -> Self {
        Self {
            given: Product::from_given(&specification.given, &start),
            inverses: invert_specification(&specification),
            start,
            specification,
            known: Known::new(),
            cancel,
            tx,
        }
    }

    pub(super) fn initial_load(&mut self, store: &dyn FactStore) -> KyroFactResult<Vec<ProjectedResult>> {
        let results = store.read(&self.start, &self.specification)?;
        for result in &results {
            self.record(&[], result);
        }
        Ok(results)
    }

    fn record(&mut self, path: &[String], result: &ProjectedResult) {
        self.known
            .entry(path.to_vec())
            .or_default()
            .insert(result.tuple.key(), result.tuple.clone());
        if let ProjectedValue::Composite(components) = &result.result {
            for (name, value) in components {
                if let Some(rows) = value.as_collection() {
                    let mut child = path.to_vec();
                    child.push(name.clone());
                    for row in rows {
                        self.record(&child, row);
                    }
                }
            }
        }
    }

    /// Drop a row and every nested row beneath it.
    fn forget(&mut self, path: &[String], tuple: &Product) {
        if let Some(rows) = self.known.get_mut(path) {
            rows.remove(&tuple.key());
        }
        for (nested, rows) in &mut self.known {
            if nested.len() > path.len() && nested.starts_with(path) {
                rows.retain(|_, row| !row.extends(tuple));
            }
        }
    }

    fn is_known(&self, path: &[String], tuple: &Product) -> bool {
        self.known
            .get(path)
            .is_some_and(|rows| rows.contains_key(&tuple.key()))
    }

    fn matches_given(&self, row: &Product, initial_subset: &[String]) -> bool {
        initial_subset.iter().all(|label| match row.get(label) {
            Some(reference) => self.given.get(label) == Some(reference),
            None => true,
        })
    }

    /// The triggering fact followed by the subscriber's facts for any
    /// further givens the inverse keeps.
    fn inverse_inputs(&self, inverse: &SpecificationInverse, fact: &FactReference) -> Option<Vec<FactReference>> {
        let mut inputs = vec![fact.clone()];
        for label in inverse.inverse_specification.given.iter().skip(1) {
            inputs.push(self.given.get(&label.name)?.clone());
        }
        Some(inputs)
    }

    fn candidates(
        &self,
        store: &dyn FactStore,
        builder: &ResultDescriptionBuilder<'_, SchemaMap>,
        facts: &[FactReference],
    ) -> KyroFactResult<Vec<Candidate>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for fact in facts {
            for inverse in self.inverses.iter().filter(|i| i.given_type() == fact.fact_type) {
                let Some(inputs) = self.inverse_inputs(inverse, fact) else {
                    continue;
                };
                let description = builder.build(&inputs, &inverse.inverse_specification)?;
                if !description.is_satisfiable() {
                    continue;
                }
                let start = Product::from_given(&inverse.inverse_specification.given, &inputs);
                for row in store.query(&description.query)? {
                    let row = start.merged(&row);
                    if !self.matches_given(&row, &inverse.initial_subset) {
                        continue;
                    }
                    let tuple = self.given.merged(&row).restrict(&inverse.final_subset);
                    if tuple.len() != inverse.final_subset.len() {
                        continue;
                    }
                    if seen.insert((inverse.operation, inverse.collection_identifiers.clone(), tuple.key())) {
                        out.push(Candidate {
                            operation: inverse.operation,
                            collection: inverse.collection_identifiers.clone(),
                            parent_subset: inverse.parent_subset.clone(),
                            tuple,
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Work out how newly saved facts change the observed results.
    pub(super) fn on_saved(
        &mut self,
        store: &dyn FactStore,
        facts: &[FactReference],
    ) -> KyroFactResult<Vec<ObservationEvent>> {
        if !facts
            .iter()
            .any(|f| self.inverses.iter().any(|i| i.given_type() == f.fact_type))
        {
            return Ok(Vec::new());
        }
        let schema = store.schema()?;
        let builder = ResultDescriptionBuilder::new(&schema);
        let description = builder.build(&self.start, &self.specification)?;
        let candidates = self.candidates(store, &builder, facts)?;
        debug!(facts = facts.len(), candidates = candidates.len(), "evaluated inverses");

        // Current rows per collection path, read only when a Maybe operation needs them.
        let mut current: HashMap<Vec<String>, HashMap<String, ProjectedResult>> = HashMap::new();
        let mut events = Vec::new();

        for candidate in candidates {
            let path = candidate.collection;
            let parent = match path.split_last() {
                Some((_, parent_path)) => {
                    let parent = candidate.tuple.restrict(&candidate.parent_subset);
                    if !self.is_known(parent_path, &parent) {
                        continue;
                    }
                    Some(parent)
                }
                None => None,
            };
            let known = self.is_known(&path, &candidate.tuple);
            let key = candidate.tuple.key();

            let added = match candidate.operation {
                InverseOperation::Add if !known => {
                    let d = child_description(&description, &path)?;
                    project_rows(store, &self.given, d, vec![candidate.tuple.clone()])?.pop()
                }
                InverseOperation::MaybeAdd if !known => {
                    let rows = self.current(store, &description, &path, &mut current)?;
                    rows.get(&key).cloned()
                }
                _ => None,
            };
            if let Some(result) = added {
                self.record(&path, &result);
                events.push(match parent {
                    Some(parent) => ObservationEvent::ChildAdded {
                        collection: path,
                        parent,
                        result,
                    },
                    None => ObservationEvent::Added { result },
                });
                continue;
            }

            let removed = match candidate.operation {
                InverseOperation::Remove => known,
                InverseOperation::MaybeRemove if known => {
                    !self.current(store, &description, &path, &mut current)?.contains_key(&key)
                }
                _ => false,
            };
            if removed {
                self.forget(&path, &candidate.tuple);
                events.push(match parent {
                    Some(parent) => ObservationEvent::ChildRemoved {
                        collection: path,
                        parent,
                        tuple: candidate.tuple,
                    },
                    None => ObservationEvent::Removed { tuple: candidate.tuple },
                });
            }
        }
        Ok(events)
    }

    fn current<'c>(
        &self,
        store: &dyn FactStore,
        description: &ResultDescription,
        path: &[String],
        cache: &'c mut HashMap<Vec<String>, HashMap<String, ProjectedResult>>,
    ) -> KyroFactResult<&'c HashMap<String, ProjectedResult>> {
        if !cache.contains_key(path) {
            let d = child_description(description, path)?;
            let rows = project_results(store, &self.given, d)?
                .into_iter()
                .map(|r| (r.tuple.key(), r))
                .collect();
            cache.insert(path.to_vec(), rows);
        }
        cache
            .get(path)
            .ok_or_else(|| KyroFactError::internal("current rows missing from cache"))
    }
}
