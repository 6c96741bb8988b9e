//! The fact graph: immutable, hash-addressed facts and their signatures.

mod collector;
mod graph;
mod hash;
mod record;
mod reference;
mod value;

pub use collector::{Collected, Collector, Draft};
pub use graph::{FactGraph, FactGraphBuilder};
pub use hash::{canonicalize, compute_hash, hash_text};
pub use record::{validate_type_name, Fact, FactBuilder, FactEnvelope, FactSignature, Predecessor};
pub use reference::FactReference;
pub use value::FieldValue;
