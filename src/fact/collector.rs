//! Object-graph front end for fact creation.
//!
//! Applications often hold facts as a web of drafts that point at each other
//! before any hash exists. The collector hashes such a web bottom-up and
//! produces a [`FactGraph`]. Drafts name their predecessors by local key; a
//! cycle among keys is rejected, since facts are a DAG by construction.

use std::collections::{BTreeMap, HashMap};

use crate::error::FactError;

use super::graph::FactGraph;
use super::record::{Fact, FactEnvelope, Predecessor};
use super::reference::FactReference;
use super::value::FieldValue;

#[derive(Debug, Clone)]
enum DraftEdge {
    Single(String),
    Multiple(Vec<String>),
}

/// A fact under construction whose predecessors are named by local key.
#[derive(Debug, Clone)]
pub struct Draft {
    fact_type: String,
    fields: BTreeMap<String, FieldValue>,
    predecessors: BTreeMap<String, DraftEdge>,
}

impl Draft {
    /// Start a draft of `fact_type`.
    #[must_use]
    pub fn new(fact_type: impl Into<String>) -> Self {
        Self {
            fact_type: fact_type.into(),
            fields: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        }
    }

    /// Set a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Point `role` at the draft stored under `key`.
    #[must_use]
    pub fn predecessor(mut self, role: impl Into<String>, key: impl Into<String>) -> Self {
        self.predecessors
            .insert(role.into(), DraftEdge::Single(key.into()));
        self
    }

    /// Point `role` at every draft stored under `keys`.
    #[must_use]
    pub fn predecessors<S: Into<String>>(
        mut self,
        role: impl Into<String>,
        keys: impl IntoIterator<Item = S>,
    ) -> Self {
        self.predecessors.insert(
            role.into(),
            DraftEdge::Multiple(keys.into_iter().map(Into::into).collect()),
        );
        self
    }
}

/// Hashes a web of drafts into a fact graph.
#[derive(Debug, Clone, Default)]
pub struct Collector {
    drafts: BTreeMap<String, Draft>,
}

/// Output of [`Collector::collect`].
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Collected {
    pub graph: FactGraph,
    pub references: BTreeMap<String, FactReference>,
}

impl Collector {
    /// An empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a draft under a local key.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, draft: Draft) -> Self {
        self.drafts.insert(key.into(), draft);
        self
    }

    /// Register a draft in place.
    pub fn insert(&mut self, key: impl Into<String>, draft: Draft) {
        self.drafts.insert(key.into(), draft);
    }

    /// Hash every draft, predecessors first.
    pub fn collect(&self) -> Result<Collected, FactError> {
        let mut state = CollectState {
            drafts: &self.drafts,
            done: HashMap::new(),
            visiting: Vec::new(),
            graph: FactGraph::new(),
        };
        for key in self.drafts.keys() {
            state.visit(key)?;
        }
        let references = state
            .done
            .into_iter()
            .map(|(k, r)| (k.to_string(), r))
            .collect();
        Ok(Collected {
            graph: state.graph,
            references,
        })
    }
}

struct CollectState<'a> {
    drafts: &'a BTreeMap<String, Draft>,
    done: HashMap<&'a str, FactReference>,
    visiting: Vec<&'a str>,
    graph: FactGraph,
}

impl<'a> CollectState<'a> {
    fn visit(&mut self, key: &'a str) -> Result<FactReference, FactError> {
        if let Some(r) = self.done.get(key) {
            return Ok(r.clone());
        }
        if let Some(start) = self.visiting.iter().position(|k| *k == key) {
            let mut path: Vec<String> = self.visiting[start..].iter().map(|k| (*k).to_string()).collect();
            path.push(key.to_string());
            return Err(FactError::CyclicGraph { path });
        }
        let drafts = self.drafts;
        let Some((stored_key, draft)) = drafts.get_key_value(key) else {
            let owner = self.visiting.last().copied().unwrap_or_default();
            return Err(FactError::MissingPredecessor {
                fact: owner.to_string(),
                predecessor: key.to_string(),
            });
        };

        self.visiting.push(stored_key.as_str());
        let mut predecessors = BTreeMap::new();
        for (role, edge) in &draft.predecessors {
            let predecessor = match edge {
                DraftEdge::Single(k) => Predecessor::Single(self.visit(k)?),
                DraftEdge::Multiple(ks) => {
                    let mut refs = Vec::with_capacity(ks.len());
                    for k in ks {
                        refs.push(self.visit(k)?);
                    }
                    Predecessor::Multiple(refs)
                }
            };
            predecessors.insert(role.clone(), predecessor);
        }
        self.visiting.pop();

        let fact = Fact::new(draft.fact_type.clone(), draft.fields.clone(), predecessors)?;
        let reference = fact.reference().clone();
        self.graph.add(FactEnvelope::unsigned(fact))?;
        self.done.insert(stored_key.as_str(), reference.clone());
        Ok(reference)
    }
}
