//! Fact graphs: predecessor-closed sets of facts with signatures.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::FactError;

use super::record::{Fact, FactEnvelope, FactSignature};
use super::reference::FactReference;

/// An immutable set of facts closed under predecessor reachability.
///
/// Facts are kept in a topological order: no fact precedes any of its
/// predecessors. Equality ignores that order and compares the set of
/// (reference, signatures) pairs, so merge is commutative and idempotent.
#[derive(Debug, Clone, Default)]
pub struct FactGraph {
    entries: HashMap<FactReference, FactEnvelope>,
    order: Vec<FactReference>,
}

impl FactGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from facts already in topological order.
    pub fn from_facts(facts: impl IntoIterator<Item = Fact>) -> Result<Self, FactError> {
        let mut graph = Self::new();
        for fact in facts {
            graph.add(FactEnvelope::unsigned(fact))?;
        }
        Ok(graph)
    }

    /// Number of facts in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when the graph holds no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// True when `reference` is in the graph.
    #[must_use]
    pub fn contains(&self, reference: &FactReference) -> bool {
        self.entries.contains_key(reference)
    }

    /// The fact stored under `reference`, if any.
    #[must_use]
    pub fn get(&self, reference: &FactReference) -> Option<&Fact> {
        self.entries.get(reference).map(|e| &e.fact)
    }

    /// The fact under `reference` with its signatures.
    #[must_use]
    pub fn envelope(&self, reference: &FactReference) -> Option<&FactEnvelope> {
        self.entries.get(reference)
    }

    /// References in topological order.
    #[must_use]
    pub fn references(&self) -> &[FactReference] {
        &self.order
    }

    /// Envelopes in topological order.
    pub fn envelopes(&self) -> impl Iterator<Item = &FactEnvelope> {
        self.order.iter().filter_map(|r| self.entries.get(r))
    }

    /// Facts in topological order.
    pub fn facts(&self) -> impl Iterator<Item = &Fact> {
        self.envelopes().map(|e| &e.fact)
    }

    /// True when every predecessor of `fact` is already present.
    #[must_use]
    pub fn can_add(&self, fact: &Fact) -> bool {
        fact.predecessor_references()
            .all(|(_, r)| self.entries.contains_key(r))
    }

    /// Add a fact with its signatures.
    ///
    /// Adding a fact that is already present merges the signatures.
    /// Returns `true` if the fact was new.
    pub fn add(&mut self, envelope: FactEnvelope) -> Result<bool, FactError> {
        let reference = envelope.fact.reference().clone();
        if let Some(existing) = self.entries.get_mut(&reference) {
            existing.signatures.extend(envelope.signatures);
            return Ok(false);
        }
        if let Some((_, missing)) = envelope
            .fact
            .predecessor_references()
            .find(|(_, r)| !self.entries.contains_key(*r))
        {
            return Err(FactError::MissingPredecessor {
                fact: reference.to_string(),
                predecessor: missing.to_string(),
            });
        }
        self.order.push(reference.clone());
        self.entries.insert(reference, envelope);
        Ok(true)
    }

    /// Add signatures to a fact already in the graph.
    pub fn add_signatures(
        &mut self,
        reference: &FactReference,
        signatures: impl IntoIterator<Item = FactSignature>,
    ) -> bool {
        match self.entries.get_mut(reference) {
            Some(entry) => {
                entry.signatures.extend(signatures);
                true
            }
            None => false,
        }
    }

    /// Union of two graphs. Commutative and idempotent up to equality.
    #[must_use]
    pub fn merge(&self, other: &FactGraph) -> FactGraph {
        let mut merged = self.clone();
        for envelope in other.envelopes() {
            let reference = envelope.fact.reference();
            if let Some(existing) = merged.entries.get_mut(reference) {
                existing.signatures.extend(envelope.signatures.iter().cloned());
            } else {
                // Other's order is topological and every earlier fact of other is
                // now present, so predecessors are satisfied.
                merged.order.push(reference.clone());
                merged.entries.insert(reference.clone(), envelope.clone());
            }
        }
        merged
    }

    /// The transitive-predecessor closure rooted at `reference`.
    #[must_use]
    pub fn subgraph(&self, reference: &FactReference) -> FactGraph {
        let mut keep: HashSet<&FactReference> = HashSet::new();
        let mut stack = vec![reference];
        while let Some(current) = stack.pop() {
            let Some(entry) = self.entries.get(current) else {
                continue;
            };
            if !keep.insert(current) {
                continue;
            }
            stack.extend(entry.fact.predecessor_references().map(|(_, r)| r));
        }

        let mut sub = FactGraph::new();
        for r in &self.order {
            if keep.contains(r) {
                if let Some(entry) = self.entries.get(r) {
                    sub.order.push(r.clone());
                    sub.entries.insert(r.clone(), entry.clone());
                }
            }
        }
        sub
    }

    /// The predecessor closure of several roots.
    #[must_use]
    pub fn subgraph_of<'a>(&self, references: impl IntoIterator<Item = &'a FactReference>) -> FactGraph {
        references
            .into_iter()
            .fold(FactGraph::new(), |acc, r| acc.merge(&self.subgraph(r)))
    }
}

impl PartialEq for FactGraph {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(r, e)| {
                other
                    .entries
                    .get(r)
                    .is_some_and(|o| o.signatures == e.signatures)
            })
    }
}

/// Admits facts in any order, holding back those whose predecessors have
/// not arrived yet.
///
/// Each successful admission retries the reserve queue until a full pass
/// admits nothing.
#[derive(Debug, Default)]
pub struct FactGraphBuilder {
    graph: FactGraph,
    reserve: Vec<FactEnvelope>,
}

impl FactGraphBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a fact to the graph.
    pub fn add(&mut self, envelope: impl Into<FactEnvelope>) {
        let envelope = envelope.into();
        if self.graph.can_add(&envelope.fact) {
            // can_add guarantees the add succeeds.
            let _ = self.graph.add(envelope);
            self.drain_reserve();
        } else {
            self.reserve.push(envelope);
        }
    }

    fn drain_reserve(&mut self) {
        loop {
            let before = self.reserve.len();
            let pending = std::mem::take(&mut self.reserve);
            for envelope in pending {
                if self.graph.can_add(&envelope.fact) {
                    let _ = self.graph.add(envelope);
                } else {
                    self.reserve.push(envelope);
                }
            }
            if self.reserve.len() == before {
                break;
            }
        }
    }

    /// The admitted graph and the references that could never be admitted.
    #[must_use]
    pub fn build(self) -> (FactGraph, Vec<FactReference>) {
        let unresolved: BTreeSet<FactReference> = self
            .reserve
            .iter()
            .map(|e| e.fact.reference().clone())
            .collect();
        (self.graph, unresolved.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Fact, Fact, Fact) {
        let company = Fact::builder("Company").field("identifier", "contoso").build().unwrap();
        let office = Fact::builder("Office")
            .predecessor("company", company.reference())
            .field("city", "Dallas")
            .build()
            .unwrap();
        let closure = Fact::builder("Office.Closure")
            .predecessor("office", office.reference())
            .field("date", "2024-01-01")
            .build()
            .unwrap();
        (company, office, closure)
    }

    fn signature(key: &str) -> FactSignature {
        FactSignature {
            public_key: key.to_string(),
            signature: format!("sig-{key}"),
        }
    }

    #[test]
    fn test_add_requires_predecessors() {
        let (_, office, _) = chain();
        let mut graph = FactGraph::new();
        let err = graph.add(office.into()).unwrap_err();
        assert!(matches!(err, FactError::MissingPredecessor { .. }));
    }

    #[test]
    fn test_add_is_idempotent_and_merges_signatures() {
        let (company, _, _) = chain();
        let mut graph = FactGraph::new();
        let mut first = FactEnvelope::unsigned(company.clone());
        first.signatures.insert(signature("a"));
        let mut second = FactEnvelope::unsigned(company.clone());
        second.signatures.insert(signature("b"));

        assert!(graph.add(first).unwrap());
        assert!(!graph.add(second).unwrap());
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.envelope(company.reference()).unwrap().signatures.len(), 2);
    }

    #[test]
    fn test_subgraph_is_predecessor_closure() {
        let (company, office, closure) = chain();
        let other = Fact::builder("Company").field("identifier", "fabrikam").build().unwrap();
        let graph = FactGraph::from_facts([company.clone(), other, office.clone(), closure]).unwrap();

        let sub = graph.subgraph(office.reference());
        assert_eq!(sub.references(), &[company.reference().clone(), office.reference().clone()]);
    }

    #[test]
    fn test_merge_keeps_topological_order() {
        let (company, office, closure) = chain();
        let a = FactGraph::from_facts([company.clone(), office.clone()]).unwrap();
        let b = FactGraph::from_facts([company.clone(), office.clone(), closure.clone()]).unwrap();
        let merged = b.merge(&a);
        let positions: HashMap<_, _> = merged
            .references()
            .iter()
            .enumerate()
            .map(|(i, r)| (r.clone(), i))
            .collect();
        for fact in merged.facts() {
            for (_, p) in fact.predecessor_references() {
                assert!(positions[p] < positions[fact.reference()]);
            }
        }
    }

    #[test]
    fn test_builder_admits_out_of_order_facts() {
        let (company, office, closure) = chain();
        let mut builder = FactGraphBuilder::new();
        builder.add(closure.clone());
        builder.add(office.clone());
        builder.add(company.clone());
        let (graph, unresolved) = builder.build();
        assert!(unresolved.is_empty());
        assert_eq!(
            graph.references(),
            &[
                company.reference().clone(),
                office.reference().clone(),
                closure.reference().clone()
            ]
        );
    }

    #[test]
    fn test_builder_reports_unresolved() {
        let (_, office, closure) = chain();
        let mut builder = FactGraphBuilder::new();
        builder.add(closure.clone());
        builder.add(office);
        let (graph, unresolved) = builder.build();
        assert!(graph.is_empty());
        assert_eq!(unresolved.len(), 2);
        assert!(unresolved.contains(closure.reference()));
    }
}
