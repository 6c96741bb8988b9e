//! Error types for KyroFact.
//!
//! Errors are strongly typed using thiserror and split by class:
//! structural faults in facts and specifications, binding faults in the
//! compiler, purge policy violations, and runtime execution/transport faults.
//!
//! Unsatisfiable queries are deliberately absent from this module: a
//! specification that names a fact type or role the store has never seen
//! compiles to an empty plan and yields zero rows.

use thiserror::Error;

/// Faults in the content-addressed fact graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactError {
    #[error("Cyclic object graph detected: {}", path.join(" -> "))]
    CyclicGraph {
        path: Vec<String>,
    },

    #[error("Fact {fact} references missing predecessor {predecessor}")]
    MissingPredecessor {
        fact: String,
        predecessor: String,
    },

    #[error("Invalid fact type name '{name}'")]
    InvalidTypeName {
        name: String,
    },

    #[error("Role name cannot be empty")]
    EmptyRole,

    #[error("Fact hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch {
        expected: String,
        actual: String,
    },
}

/// Structural faults in a specification.
///
/// These indicate a malformed specification; they are programmer errors,
/// not data conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecificationError {
    #[error("Label '{label}' is not defined. Known labels: {}", known.join(", "))]
    UnknownLabel {
        label: String,
        known: Vec<String>,
    },

    #[error("Label '{label}' is defined more than once")]
    DuplicateLabel {
        label: String,
    },

    #[error("Match for '{label}' has no path condition joining it to a prior label")]
    MatchWithoutPath {
        label: String,
    },

    #[error("Type mismatch: {left} is compared to {right}")]
    RoleTypeMismatch {
        left: String,
        right: String,
    },

    #[error("Parse error at offset {position}: {message}")]
    Parse {
        position: usize,
        message: String,
    },

    #[error("Invalid projection: {reason}")]
    InvalidProjection {
        reason: String,
    },
}

/// Faults binding a specification to concrete given facts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Expected {expected} given facts, received {actual}")]
    ArityMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("Given '{label}' expects a fact of type {expected}, received {actual}")]
    TypeMismatch {
        label: String,
        expected: String,
        actual: String,
    },

    #[error("Labels '{left}' and '{right}' are both bound and have no role path between them")]
    KnownLabelsNotJoinable {
        left: String,
        right: String,
    },
}

/// Purge policy violations, raised at registration or specification build time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PurgeError {
    #[error("The purge condition would reverse the purge of {purged} with {trigger}:\n{description}")]
    ReversiblePurge {
        purged: String,
        trigger: String,
        description: String,
    },

    #[error("The specification does not comply with purge conditions:\n{}", reasons.join("\n"))]
    NonCompliant {
        reasons: Vec<String>,
    },

    #[error("Invalid purge condition: {reason}")]
    InvalidCondition {
        reason: String,
    },
}

/// Execution errors that occur at runtime.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Queue full on {path} (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Errors at the network boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Feed not found: {feed}")]
    FeedNotFound {
        feed: String,
    },

    #[error("Not logged in: {message}")]
    Unauthorized {
        message: String,
    },

    #[error("Server error (code {code}): {message}")]
    ServerError {
        code: u32,
        message: String,
    },
}

/// Top-level error type for KyroFact.
#[derive(Debug, Error)]
pub enum KyroFactError {
    #[error("Fact error: {0}")]
    Fact(#[from] FactError),

    #[error("Specification error: {0}")]
    Specification(#[from] SpecificationError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Purge error: {0}")]
    Purge(#[from] PurgeError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl KyroFactError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true for malformed facts or specifications (programmer errors).
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Fact(_) | Self::Specification(_) | Self::Compile(_)
        )
    }

    /// Returns true for purge policy violations.
    #[must_use]
    pub const fn is_policy(&self) -> bool {
        matches!(self, Self::Purge(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Execution(e) => matches!(e, ExecutionError::Timeout { .. }),
            Self::Transport(e) => match e {
                TransportError::ConnectionFailed { .. } => true,
                TransportError::ServerError { code, .. } => *code >= 500,
                TransportError::FeedNotFound { .. } | TransportError::Unauthorized { .. } => false,
            },
            _ => false,
        }
    }
}

/// Result type alias for KyroFact operations.
pub type KyroFactResult<T> = Result<T, KyroFactError>;
