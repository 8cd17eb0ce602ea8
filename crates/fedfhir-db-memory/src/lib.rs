//! Process-local resource store.
//!
//! Keeps every version of every resource behind one lock. A transaction
//! buffers its writes in an overlay that its own reads and searches consult
//! first, so a bundle can reference resources created earlier in the same
//! bundle before anything is committed.
//!
//! ```ignore
//! use fedfhir_db_memory::InMemoryStorage;
//! use fedfhir_storage::FhirStorage;
//!
//! let storage = InMemoryStorage::with_supported_types(["Organization", "Endpoint"]);
//! let mut tx = storage.begin_transaction().await?;
//! tx.create(&serde_json::json!({
//!     "resourceType": "Organization",
//!     "identifier": [{"system": "http://example.org/sid/org", "value": "42"}]
//! }))
//! .await?;
//! tx.commit().await?;
//! ```

mod fhir_impl;
pub mod query;
pub mod storage;

pub use fhir_impl::InMemoryTransaction;
pub use query::SearchQuery;
pub use storage::{InMemoryStorage, StorageKey};
