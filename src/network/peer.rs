//! A peer backed by another fact store in the same process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{KyroFactError, KyroFactResult, TransportError};
use crate::fact::{hash_text, Fact, FactEnvelope, FactGraph, FactGraphBuilder, FactReference};
use crate::specification::Specification;
use crate::storage::{FactStore, ProjectedResult, ProjectedValue};

use super::{feed_identifier, FeedResponse, Network, UserProfile};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug)]
struct Feed {
    start: Vec<FactReference>,
    specification: Specification,
    /// Every reference served so far, in discovery order. Bookmarks index into it.
    log: Vec<FactReference>,
}

/// Serves feeds straight from a [`FactStore`].
///
/// Each feed is bound to the given facts it was requested for, so the same
/// specification watched from two companies yields two feeds.
pub struct StoreNetwork {
    store: Arc<dyn FactStore>,
    feeds: RwLock<HashMap<String, Feed>>,
    page_size: usize,
    user: Option<(Fact, UserProfile)>,
}

impl std::fmt::Debug for StoreNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreNetwork")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

fn lock_err(context: &str) -> KyroFactError {
    TransportError::ConnectionFailed {
        message: format!("{context} lock poisoned"),
    }
    .into()
}

fn collect_references(results: &[ProjectedResult], seen: &mut HashSet<FactReference>, out: &mut Vec<FactReference>) {
    for result in results {
        for (_, reference) in result.tuple.iter() {
            if seen.insert(reference.clone()) {
                out.push(reference.clone());
            }
        }
        if let ProjectedValue::Composite(components) = &result.result {
            for (_, value) in components {
                if let Some(rows) = value.as_collection() {
                    collect_references(rows, seen, out);
                }
            }
        }
    }
}

impl StoreNetwork {
    /// A peer backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self {
            store,
            feeds: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            user: None,
        }
    }

    /// Accept logins as `user`.
    #[must_use]
    pub fn with_user(mut self, user: Fact, profile: UserProfile) -> Self {
        self.user = Some((user, profile));
        self
    }

    /// Limit how many references each page carries.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl Network for StoreNetwork {
    fn feeds(&self, start: &[FactReference], spec: &Specification) -> KyroFactResult<Vec<String>> {
        let types: Vec<&str> = start.iter().map(|r| r.fact_type.as_str()).collect();
        let mut text = feed_identifier(&types, spec);
        for r in start {
            text.push('\n');
            text.push_str(&r.hash);
        }
        let feed = hash_text(&text);
        let mut feeds = self.feeds.write().map_err(|_| lock_err("feeds"))?;
        feeds.entry(feed.clone()).or_insert_with(|| Feed {
            start: start.to_vec(),
            specification: spec.clone(),
            log: Vec::new(),
        });
        Ok(vec![feed])
    }

    fn fetch_feed(&self, feed: &str, bookmark: &str) -> KyroFactResult<FeedResponse> {
        let offset: usize = if bookmark.is_empty() {
            0
        } else {
            bookmark.parse().map_err(|_| TransportError::ServerError {
                code: 400,
                message: format!("invalid bookmark '{bookmark}'"),
            })?
        };

        let mut feeds = self.feeds.write().map_err(|_| lock_err("feeds"))?;
        let state = feeds.get_mut(feed).ok_or_else(|| TransportError::FeedNotFound {
            feed: feed.to_string(),
        })?;

        let results = self.store.read(&state.start, &state.specification)?;
        let mut seen: HashSet<FactReference> = state.log.iter().cloned().collect();
        let mut discovered = Vec::new();
        collect_references(&results, &mut seen, &mut discovered);
        state.log.extend(discovered);

        let offset = offset.min(state.log.len());
        let end = (offset + self.page_size).min(state.log.len());
        Ok(FeedResponse {
            references: state.log[offset..end].to_vec(),
            bookmark: end.to_string(),
        })
    }

    fn load(&self, references: &[FactReference]) -> KyroFactResult<FactGraph> {
        Ok(self.store.load(references)?)
    }

    fn save(&self, envelopes: &[FactEnvelope]) -> KyroFactResult<()> {
        let mut builder = FactGraphBuilder::new();
        for envelope in envelopes {
            builder.add(envelope.clone());
        }
        let (graph, _unresolved) = builder.build();
        self.store.save(&graph)?;
        Ok(())
    }

    fn login(&self) -> KyroFactResult<(Fact, UserProfile)> {
        let (user, profile) = self.user.clone().ok_or_else(|| TransportError::Unauthorized {
            message: "peer has no user configured".to_string(),
        })?;
        let mut graph = FactGraph::new();
        graph.add(user.clone().into())?;
        self.store.save(&graph)?;
        Ok((user, profile))
    }
}
