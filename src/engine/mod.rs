//! The fact engine.
//!
//! [`FactEngine`] ties a store, its purge conditions, live observers, and a
//! remote peer together. Reads are checked against the purge conditions
//! before they run; saves are persisted, announced to observers, and queued
//! for upload.

mod config;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::{FactError, KyroFactError, KyroFactResult};
use crate::fact::{Fact, FactEnvelope, FactGraph, FactGraphBuilder, FactReference};
use crate::network::{CancellationToken, Network, NetworkNoOp, SaveQueue, UserProfile};
use crate::observer::{Observer, ObserverSystem};
use crate::purge::PurgeConditions;
use crate::specification::Specification;
use crate::storage::{FactStore, InMemoryFactStore, ProjectedResult};

pub use config::FactEngineConfig;

/// Embedded fact engine.
pub struct FactEngine {
    store: Arc<dyn FactStore>,
    network: Arc<dyn Network>,
    purge_conditions: PurgeConditions,
    observers: ObserverSystem,
    save_queue: SaveQueue,
    bookmarks: RwLock<HashMap<String, String>>,
}

impl std::fmt::Debug for FactEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactEngine")
            .field("purge_conditions", &self.purge_conditions.len())
            .field("observers", &self.observers)
            .field("save_queue", &self.save_queue)
            .finish_non_exhaustive()
    }
}

impl FactEngine {
    /// Create an engine. Fails if a purge condition is invalid.
    pub fn new(
        store: Arc<dyn FactStore>,
        network: Arc<dyn Network>,
        purge_conditions: PurgeConditions,
        cfg: FactEngineConfig,
    ) -> KyroFactResult<Self> {
        purge_conditions.validate()?;
        let observers = ObserverSystem::new(cfg.observer, Arc::clone(&store))?;
        let save_queue = SaveQueue::new(cfg.save_queue, Arc::clone(&network))?;
        Ok(Self {
            store,
            network,
            purge_conditions,
            observers,
            save_queue,
            bookmarks: RwLock::new(HashMap::new()),
        })
    }

    /// A local-only engine over an in-memory store.
    pub fn in_memory(purge_conditions: PurgeConditions) -> KyroFactResult<Self> {
        Self::new(
            Arc::new(InMemoryFactStore::new()),
            Arc::new(NetworkNoOp),
            purge_conditions,
            FactEngineConfig::default(),
        )
    }

    /// The local store behind this engine.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    /// The purge conditions registered at build time.
    #[must_use]
    pub const fn purge_conditions(&self) -> &PurgeConditions {
        &self.purge_conditions
    }

    /// The observer system that feeds subscriptions.
    #[must_use]
    pub const fn observers(&self) -> &ObserverSystem {
        &self.observers
    }

    /// Persist a graph, notify observers, and queue the new facts for upload.
    ///
    /// Returns the facts that were not stored before. Once they are stored
    /// the save succeeds; a failure to queue the upload is only logged.
    pub fn save(&self, graph: &FactGraph) -> KyroFactResult<Vec<FactEnvelope>> {
        let saved = self.save_local(graph)?;
        if let Err(err) = self.save_queue.enqueue(saved.clone()) {
            warn!(facts = saved.len(), error = %err, "saved locally but could not queue upload");
        }
        Ok(saved)
    }

    /// Save facts given in any order. Predecessors may already be stored.
    pub fn save_facts(&self, facts: impl IntoIterator<Item = Fact>) -> KyroFactResult<Vec<FactEnvelope>> {
        let facts: Vec<Fact> = facts.into_iter().collect();
        let predecessors: Vec<FactReference> = facts
            .iter()
            .flat_map(|f| f.predecessor_references().map(|(_, r)| r.clone()))
            .collect();

        let mut builder = FactGraphBuilder::new();
        for envelope in self.store.load(&predecessors)?.envelopes() {
            builder.add(envelope.clone());
        }
        for fact in &facts {
            builder.add(fact.clone());
        }
        let (graph, unresolved) = builder.build();
        if let Some(fact) = facts.iter().find(|f| unresolved.contains(f.reference())) {
            let missing = fact
                .predecessor_references()
                .find(|(_, r)| !graph.contains(r))
                .map(|(_, r)| r.to_string())
                .unwrap_or_default();
            return Err(FactError::MissingPredecessor {
                fact: fact.reference().to_string(),
                predecessor: missing,
            }
            .into());
        }
        self.save(&graph)
    }

    fn save_local(&self, graph: &FactGraph) -> KyroFactResult<Vec<FactEnvelope>> {
        let saved = self.store.save(graph)?;
        if !saved.is_empty() {
            info!(offered = graph.len(), saved = saved.len(), "saved facts");
            self.observers
                .notify_saved(saved.iter().map(|e| e.fact.reference().clone()).collect());
        }
        Ok(saved)
    }

    /// Run a read after checking it against the purge conditions.
    pub fn query(&self, start: &[FactReference], spec: &Specification) -> KyroFactResult<Vec<ProjectedResult>> {
        self.purge_conditions.check_compliance(spec)?;
        self.store.read(start, spec)
    }

    /// Observe a read. Fails like [`query`](Self::query) for a non-compliant specification.
    pub fn watch(&self, start: &[FactReference], spec: &Specification) -> KyroFactResult<Observer> {
        self.watch_with_cancel(start, spec, CancellationToken::new())
    }

    /// Observe a read, stopping when `cancel` fires.
    pub fn watch_with_cancel(
        &self,
        start: &[FactReference],
        spec: &Specification,
        cancel: CancellationToken,
    ) -> KyroFactResult<Observer> {
        self.purge_conditions.check_compliance(spec)?;
        self.observers.watch(start, spec, cancel)
    }

    /// Pull the facts `spec` reaches from `start` off the network.
    ///
    /// Each feed is read page by page from its last bookmark. References not
    /// yet stored are loaded with their predecessors and saved locally.
    /// Returns how many facts were new.
    pub fn fetch(
        &self,
        start: &[FactReference],
        spec: &Specification,
        cancel: &CancellationToken,
    ) -> KyroFactResult<usize> {
        let mut fetched = 0;
        for feed in self.network.feeds(start, spec)? {
            let mut bookmark = self
                .bookmarks
                .read()
                .map_err(|_| KyroFactError::internal("bookmark lock poisoned"))?
                .get(&feed)
                .cloned()
                .unwrap_or_default();
            loop {
                cancel.check()?;
                let page = self.network.fetch_feed(&feed, &bookmark).map_err(|err| {
                    warn!(feed = %feed, error = %err, "feed fetch failed");
                    err
                })?;
                if page.references.is_empty() {
                    break;
                }
                let present = self.store.which_exist(&page.references)?;
                let missing: Vec<FactReference> = page
                    .references
                    .iter()
                    .filter(|r| !present.contains(r))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    let graph = self.network.load(&missing)?;
                    fetched += self.save_local(&graph)?.len();
                }
                debug!(feed = %feed, references = page.references.len(), "fetched page");
                bookmark = page.bookmark;
                self.bookmarks
                    .write()
                    .map_err(|_| KyroFactError::internal("bookmark lock poisoned"))?
                    .insert(feed.clone(), bookmark.clone());
            }
        }
        Ok(fetched)
    }

    /// Apply the registered purge conditions. Returns how many facts were removed.
    pub fn purge(&self) -> KyroFactResult<usize> {
        self.store.purge(&self.purge_conditions)
    }

    /// Log in to the peer and keep the user fact locally.
    pub fn login(&self) -> KyroFactResult<(Fact, UserProfile)> {
        let (user, profile) = self.network.login()?;
        let mut graph = FactGraph::new();
        graph.add(user.clone().into())?;
        self.save_local(&graph)?;
        debug!(user = %user.reference(), "logged in");
        Ok((user, profile))
    }

    /// Upload everything queued so far.
    pub fn flush(&self) -> KyroFactResult<()> {
        self.save_queue.flush()
    }
}
