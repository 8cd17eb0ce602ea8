//! Store traits used by reference resolution and batch execution.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{SearchParams, SearchResult, StoredResource};

/// A FHIR resource store.
///
/// Reference resolution only reads through a [`Transaction`], so every
/// backend has to offer one; the direct methods here serve callers that do
/// not need read-your-writes.
#[async_trait]
pub trait FhirStorage: Send + Sync {
    /// Stores a new resource, assigning an id when the document has none.
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Current version, `None` for unknown or deleted resources.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Upsert by `id`. A given `if_match` has to equal the current version.
    async fn update(
        &self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError>;

    /// Idempotent.
    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError>;

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Fails with [`StorageError::UnsupportedSearchParameter`] for parameters
    /// the backend cannot evaluate for `resource_type`.
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;

    /// Whether resources of this type can be stored and thus referenced.
    fn supports_resource_type(&self, resource_type: &str) -> bool;
}

/// Unit of work over a [`FhirStorage`].
///
/// Nothing is visible to other callers before [`Transaction::commit`], while
/// reads and searches through the transaction itself already see its writes.
/// This is what lets a bundle entry reference a resource created by an
/// earlier entry of the same bundle.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;

    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError>;

    async fn update(&mut self, resource: &Value) -> Result<StoredResource, StorageError>;

    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<(), StorageError>;

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;

    fn supports_resource_type(&self, resource_type: &str) -> bool;
}
