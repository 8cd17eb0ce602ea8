//! # fedfhir-storage
//!
//! Store abstraction shared by reference resolution and batch execution.
//! Backends live in their own crates; `fedfhir-db-memory` is the one
//! shipped here.
//!
//! Resolution needs three things from a store: reads and versioned reads,
//! searches whose match count can be trusted, and transactions that see
//! their own writes.
//!
//! ```ignore
//! use fedfhir_storage::{SearchParams, StorageResult, TotalMode, Transaction};
//!
//! async fn count_matches(tx: &dyn Transaction, criteria: &str) -> StorageResult<u32> {
//!     let params = SearchParams::from_query(criteria)
//!         .with_count(1)
//!         .with_total(TotalMode::Accurate);
//!     let page = tx.search("Organization", &params).await?;
//!     Ok(page.total.unwrap_or(0))
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::StorageError;
pub use traits::{FhirStorage, Transaction};
pub use types::{SearchParams, SearchResult, StoredResource, TotalMode};

pub type StorageResult<T> = Result<T, StorageError>;

/// Shared handle to a store.
pub type DynStorage = std::sync::Arc<dyn FhirStorage>;
