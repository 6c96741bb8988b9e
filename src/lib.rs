//! # KyroFact - An embedded, local-first fact store
//!
//! Applications assert immutable, content-addressed facts that reference
//! their causal predecessors, query them with a declarative specification
//! language, receive incremental updates as new facts arrive, and reclaim
//! storage for facts that purge conditions prove are no longer needed.
//!
//! ## Core Concepts
//!
//! - **Fact**: an immutable, typed record identified by the hash of its content
//! - **Specification**: given inputs, a sequence of joined and filtered matches, and a projection
//! - **QueryDescription**: the compiled join plan for a specification bound to concrete facts
//! - **Inverse**: a small query that detects which results a newly arrived fact changes
//! - **Purge condition**: a specification stating when a fact's successors may be deleted
//!
//! ## Usage
//!
//! ```rust
//! use kyrofact::{Fact, FactEngine, PurgeConditions, Specification};
//!
//! let engine = FactEngine::in_memory(PurgeConditions::new()).unwrap();
//!
//! let company = Fact::builder("Company").field("identifier", "contoso").build().unwrap();
//! let office = Fact::builder("Office")
//!     .predecessor("company", company.reference())
//!     .field("city", "Dallas")
//!     .build()
//!     .unwrap();
//! engine.save_facts([company.clone(), office]).unwrap();
//!
//! let spec = Specification::parse(
//!     "(company: Company) {
//!         office: Office [
//!             office->company: Company = company
//!         ]
//!     } => office.city",
//! )
//! .unwrap();
//! let results = engine.query(&[company.reference().clone()], &spec).unwrap();
//! assert_eq!(results.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod error;
pub mod fact;
pub mod specification;

// Compiler and execution
pub mod query;
pub mod storage;

// Incremental views and purge policy
pub mod inverse;
pub mod observer;
pub mod purge;

// Runtime
pub mod engine;
pub mod network;

// Re-export primary types at crate root for convenience
pub use engine::{FactEngine, FactEngineConfig};
pub use error::{
    CompileError, ExecutionError, FactError, KyroFactError, KyroFactResult, PurgeError, SpecificationError,
    TransportError,
};
pub use fact::{Fact, FactEnvelope, FactGraph, FactGraphBuilder, FactReference, FieldValue};
pub use inverse::{invert_specification, InverseOperation, SpecificationInverse};
pub use network::{feed_identifier, CancellationToken, Network, NetworkNoOp, UserProfile};
pub use observer::{ObservationEvent, Observer, ObserverSystem, ObserverSystemConfig};
pub use purge::PurgeConditions;
pub use query::{generate_sql, QueryDescription, ResultDescription, ResultDescriptionBuilder, SchemaMap};
pub use specification::{Label, Match, Projection, Role, Specification, SpecificationBuilder};
pub use storage::{FactStore, InMemoryFactStore, Product, ProjectedResult, ProjectedValue, StorageError};
