//! The network boundary.
//!
//! A [`Network`] is the remote side of a replica: it accepts uploaded facts
//! and serves feeds, which are resumable cursors over the facts a
//! specification reaches from a tuple of given facts. Sync is fetch and
//! merge, never agreement.

mod cancel;
mod peer;
mod save_queue;

use serde::{Deserialize, Serialize};

use crate::error::{KyroFactResult, TransportError};
use crate::fact::{hash_text, Fact, FactEnvelope, FactGraph, FactReference};
use crate::specification::Specification;

pub use cancel::CancellationToken;
pub use peer::StoreNetwork;
pub use save_queue::{SaveQueue, SaveQueueConfig};

/// One page of a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedResponse {
    /// References new since the requested bookmark. Empty at the end of the feed.
    pub references: Vec<FactReference>,
    /// Pass back to continue after this page.
    pub bookmark: String,
}

/// What the peer knows about the logged-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Name shown for the user. May be empty.
    pub display_name: String,
}

/// Remote peer contract.
pub trait Network: Send + Sync {
    /// Feed identifiers covering `spec` evaluated from `start`.
    fn feeds(&self, start: &[FactReference], spec: &Specification) -> KyroFactResult<Vec<String>>;

    /// The page of `feed` following `bookmark` (empty string for the first page).
    fn fetch_feed(&self, feed: &str, bookmark: &str) -> KyroFactResult<FeedResponse>;

    /// Predecessor closure of `references` held by the peer.
    fn load(&self, references: &[FactReference]) -> KyroFactResult<FactGraph>;

    /// Upload facts.
    fn save(&self, envelopes: &[FactEnvelope]) -> KyroFactResult<()>;

    /// The user fact this replica acts as, with its profile.
    fn login(&self) -> KyroFactResult<(Fact, UserProfile)>;
}

/// A network with no peer. Feeds are empty and uploads are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkNoOp;

impl Network for NetworkNoOp {
    fn feeds(&self, _start: &[FactReference], _spec: &Specification) -> KyroFactResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn fetch_feed(&self, _feed: &str, bookmark: &str) -> KyroFactResult<FeedResponse> {
        Ok(FeedResponse {
            references: Vec::new(),
            bookmark: bookmark.to_string(),
        })
    }

    fn load(&self, _references: &[FactReference]) -> KyroFactResult<FactGraph> {
        Ok(FactGraph::new())
    }

    fn save(&self, _envelopes: &[FactEnvelope]) -> KyroFactResult<()> {
        Ok(())
    }

    fn login(&self) -> KyroFactResult<(Fact, UserProfile)> {
        Err(TransportError::Unauthorized {
            message: "no peer to log in to".to_string(),
        }
        .into())
    }
}

/// Stable identity of a feed: the descriptive text of `spec` plus the
/// given types, hashed like a fact.
#[must_use]
pub fn feed_identifier(given_types: &[&str], spec: &Specification) -> String {
    let mut text = spec.to_string();
    for t in given_types {
        text.push('\n');
        text.push_str(t);
    }
    hash_text(&text)
}
