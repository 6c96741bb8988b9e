//! Fact storage.
//!
//! [`FactStore`] is the store contract; [`InMemoryFactStore`] is the
//! embedded backend.

mod memory;
mod projection;
mod traits;

pub use memory::InMemoryFactStore;
pub use projection::{project_results, project_rows, Product, ProjectedResult, ProjectedValue};
pub use traits::{FactStore, StorageError};
