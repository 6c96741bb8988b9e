//! Observer identities and the events streamed to observers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{Product, ProjectedResult};

/// Unique identifier for an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(Uuid);

impl ObserverId {
    /// Create a new random observer id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing id.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A change to an observed result set.
///
/// Rows are identified by their tuple of labeled facts. Collection events
/// name the collection path from the top-level projection down and carry
/// the tuple of the enclosing row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObservationEvent {
    Added {
        result: ProjectedResult,
    },
    Removed {
        tuple: Product,
    },
    ChildAdded {
        collection: Vec<String>,
        parent: Product,
        result: ProjectedResult,
    },
    ChildRemoved {
        collection: Vec<String>,
        parent: Product,
        tuple: Product,
    },
}

impl ObservationEvent {
    /// The tuple of the row this event is about.
    #[must_use]
    pub const fn tuple(&self) -> &Product {
        match self {
            Self::Added { result } | Self::ChildAdded { result, .. } => &result.tuple,
            Self::Removed { tuple } | Self::ChildRemoved { tuple, .. } => tuple,
        }
    }

    /// True for an added row.
    #[must_use]
    pub const fn is_added(&self) -> bool {
        matches!(self, Self::Added { .. } | Self::ChildAdded { .. })
    }
}
