//! Implementation of the FhirStorage trait for InMemoryStorage.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use fedfhir_storage::{
    FhirStorage, SearchParams, SearchResult, StorageError, StoredResource,
    Transaction as FhirTransaction,
};

use crate::query::SearchQuery;
use crate::storage::{
    InMemoryStorage, ResourceRecord, StorageKey, build_version, extract_identity,
    make_storage_key,
};

#[async_trait]
impl FhirStorage for InMemoryStorage {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        let (resource_type, id) = extract_identity(self, resource)?;
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = make_storage_key(&resource_type, &id);

        let mut state = self.state.write().await;
        let record = state.records.entry(key).or_default();
        if record.current().is_some() {
            return Err(StorageError::already_exists(&resource_type, &id));
        }

        let stored = build_version(&resource_type, &id, record.versions.last(), resource);
        record.versions.push(stored.clone());
        record.deleted = false;

        tracing::debug!(resource_type = %resource_type, id = %id, "Created resource");
        Ok(stored)
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(&make_storage_key(resource_type, id))
            .and_then(ResourceRecord::current)
            .cloned())
    }

    async fn update(
        &self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError> {
        let (resource_type, id) = extract_identity(self, resource)?;
        let id = id.ok_or_else(|| StorageError::invalid_resource("Missing id field for update"))?;
        let key = make_storage_key(&resource_type, &id);

        let mut state = self.state.write().await;
        let record = state.records.entry(key).or_default();

        if let Some(expected_version) = if_match {
            let actual_version = record.current().map_or("", |c| c.version_id.as_str());
            if actual_version != expected_version {
                return Err(StorageError::version_conflict(expected_version, actual_version));
            }
        }

        let stored = build_version(&resource_type, &id, record.versions.last(), resource);
        record.versions.push(stored.clone());
        record.deleted = false;
        Ok(stored)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if let Some(record) = state.records.get_mut(&make_storage_key(resource_type, id)) {
            record.deleted = true;
        }
        Ok(())
    }

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .get(&make_storage_key(resource_type, id))
            .and_then(|r| r.version(version))
            .cloned())
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        let query = SearchQuery::compile(resource_type, params)?;
        Ok(query.execute(self.all_of_type(resource_type).await))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn FhirTransaction>, StorageError> {
        Ok(Box::new(InMemoryTransaction::new(self.clone())))
    }

    fn supports_resource_type(&self, resource_type: &str) -> bool {
        self.is_supported(resource_type)
    }
}

/// Writes buffered by a transaction for one resource.
#[derive(Debug, Default)]
struct PendingWrite {
    /// Latest committed version id when the transaction first touched the resource
    base_version: Option<String>,
    /// Versions written by this transaction, oldest first
    versions: Vec<StoredResource>,
    deleted: bool,
    /// Last committed version, used to continue version numbering
    committed_last: Option<StoredResource>,
}

impl PendingWrite {
    fn current(&self) -> Option<&StoredResource> {
        if self.deleted {
            None
        } else {
            self.versions.last().or(self.committed_last.as_ref())
        }
    }

    fn last_version(&self) -> Option<&StoredResource> {
        self.versions.last().or(self.committed_last.as_ref())
    }
}

/// In-memory transaction.
///
/// Writes are buffered in an overlay and applied under a single write lock on
/// commit. Reads and searches see the overlay first. Commit fails if another
/// writer changed a touched resource in the meantime.
pub struct InMemoryTransaction {
    storage: InMemoryStorage,
    pending: IndexMap<StorageKey, PendingWrite>,
}

impl InMemoryTransaction {
    fn new(storage: InMemoryStorage) -> Self {
        Self {
            storage,
            pending: IndexMap::new(),
        }
    }

    async fn pending_entry(&mut self, resource_type: &str, id: &str) -> &mut PendingWrite {
        let key = make_storage_key(resource_type, id);
        let snapshot = if self.pending.contains_key(&key) {
            None
        } else {
            Some(self.snapshot(&key).await)
        };
        self.pending
            .entry(key)
            .or_insert_with(|| snapshot.unwrap_or_default())
    }

    async fn snapshot(&self, key: &str) -> PendingWrite {
        let state = self.storage.state.read().await;
        let record = state.records.get(key);
        PendingWrite {
            base_version: record.and_then(|r| r.latest_version_id().map(String::from)),
            versions: Vec::new(),
            deleted: record.is_some_and(|r| r.deleted),
            committed_last: record.and_then(|r| r.versions.last().cloned()),
        }
    }
}

#[async_trait]
impl FhirTransaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let InMemoryTransaction { storage, pending } = *self;
        let mut state = storage.state.write().await;

        for (key, write) in &pending {
            let committed = state.records.get(key).and_then(|r| r.latest_version_id());
            if committed != write.base_version.as_deref() {
                return Err(StorageError::transaction_error(format!(
                    "Concurrent modification of {key}"
                )));
            }
        }

        let count = pending.len();
        for (key, write) in pending {
            let record = state.records.entry(key).or_default();
            record.versions.extend(write.versions);
            record.deleted = write.deleted;
        }

        tracing::debug!(resources = count, "Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        tracing::debug!(
            resources = self.pending.len(),
            "Rolled back in-memory transaction"
        );
        Ok(())
    }

    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        let (resource_type, id) = extract_identity(&self.storage, resource)?;
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let write = self.pending_entry(&resource_type, &id).await;
        if write.current().is_some() {
            return Err(StorageError::already_exists(&resource_type, &id));
        }

        let stored = build_version(&resource_type, &id, write.last_version(), resource);
        write.versions.push(stored.clone());
        write.deleted = false;
        Ok(stored)
    }

    async fn update(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        let (resource_type, id) = extract_identity(&self.storage, resource)?;
        let id = id.ok_or_else(|| StorageError::invalid_resource("Missing id field for update"))?;

        let write = self.pending_entry(&resource_type, &id).await;
        let stored = build_version(&resource_type, &id, write.last_version(), resource);
        write.versions.push(stored.clone());
        write.deleted = false;
        Ok(stored)
    }

    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        let write = self.pending_entry(resource_type, id).await;
        if write.current().is_some() {
            write.deleted = true;
        }
        Ok(())
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        match self.pending.get(&make_storage_key(resource_type, id)) {
            Some(write) => Ok(write.current().cloned()),
            None => self.storage.read(resource_type, id).await,
        }
    }

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        if let Some(found) = self
            .pending
            .get(&make_storage_key(resource_type, id))
            .and_then(|w| w.versions.iter().find(|v| v.version_id == version))
        {
            return Ok(Some(found.clone()));
        }
        self.storage.vread(resource_type, id, version).await
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        let query = SearchQuery::compile(resource_type, params)?;

        let mut candidates: IndexMap<StorageKey, StoredResource> = self
            .storage
            .all_of_type(resource_type)
            .await
            .into_iter()
            .map(|r| (make_storage_key(&r.resource_type, &r.id), r))
            .collect();

        for (key, write) in &self.pending {
            match write.current() {
                Some(current) if current.resource_type == resource_type => {
                    candidates.insert(key.clone(), current.clone());
                }
                _ => {
                    candidates.shift_remove(key);
                }
            }
        }

        Ok(query.execute(candidates.into_values()))
    }

    fn supports_resource_type(&self, resource_type: &str) -> bool {
        self.storage.is_supported(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn as_fhir_storage(storage: &InMemoryStorage) -> &dyn FhirStorage {
        storage
    }

    #[tokio::test]
    async fn test_create_read() {
        let storage = InMemoryStorage::new();
        let fhir = as_fhir_storage(&storage);

        let created = fhir
            .create(&json!({"resourceType": "Organization", "name": "Hospital"}))
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(&created.id).is_ok());
        assert_eq!(created.version_id, "1");
        assert_eq!(created.resource["meta"]["versionId"], "1");

        let read = fhir.read("Organization", &created.id).await.unwrap().unwrap();
        assert_eq!(read.resource["name"], "Hospital");
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let storage = InMemoryStorage::new();
        let org = json!({"resourceType": "Organization", "id": "o1"});
        assert_ok!(storage.create(&org).await);
        assert!(storage.create(&org).await.unwrap_err().is_already_exists());
    }

    #[tokio::test]
    async fn test_update_versions_and_if_match() {
        let storage = InMemoryStorage::new();
        let org = json!({"resourceType": "Organization", "id": "o1", "name": "A"});
        storage.create(&org).await.unwrap();

        let updated = storage
            .update(&json!({"resourceType": "Organization", "id": "o1", "name": "B"}), Some("1"))
            .await
            .unwrap();
        assert_eq!(updated.version_id, "2");

        let err = storage.update(&org, Some("1")).await.unwrap_err();
        assert!(err.is_version_conflict());

        let v1 = storage.vread("Organization", "o1", "1").await.unwrap().unwrap();
        assert_eq!(v1.resource["name"], "A");
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = InMemoryStorage::new();
        storage
            .create(&json!({"resourceType": "Organization", "id": "o1"}))
            .await
            .unwrap();
        storage.delete("Organization", "o1").await.unwrap();
        assert!(storage.read("Organization", "o1").await.unwrap().is_none());
        assert_ok!(storage.delete("Organization", "missing").await);

        let recreated = storage
            .create(&json!({"resourceType": "Organization", "id": "o1"}))
            .await
            .unwrap();
        assert_eq!(recreated.version_id, "2");
    }

    #[tokio::test]
    async fn test_unsupported_type() {
        let storage = InMemoryStorage::with_supported_types(["Organization"]);
        assert!(storage.supports_resource_type("Organization"));
        assert!(!storage.supports_resource_type("Patient"));
        let err = storage
            .create(&json!({"resourceType": "Patient"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidResource { .. }));
    }

    #[tokio::test]
    async fn test_transaction_read_your_writes() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();

        let org = tx
            .create(&json!({
                "resourceType": "Organization",
                "identifier": [{"system": "http://sys", "value": "42"}]
            }))
            .await
            .unwrap();

        assert!(tx.read("Organization", &org.id).await.unwrap().is_some());
        assert!(tx.vread("Organization", &org.id, "1").await.unwrap().is_some());
        let found = tx
            .search(
                "Organization",
                &SearchParams::new().with_param("identifier", "http://sys|42"),
            )
            .await
            .unwrap();
        assert_eq!(found.total, Some(1));

        // Not visible outside the transaction until commit
        assert!(storage.read("Organization", &org.id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(storage.read("Organization", &org.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_writes() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.create(&json!({"resourceType": "Organization", "id": "o1"}))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_transaction_delete_hides_committed_resource_from_search() {
        let storage = InMemoryStorage::new();
        storage
            .create(&json!({"resourceType": "Organization", "id": "o1", "status": "active"}))
            .await
            .unwrap();

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.delete("Organization", "o1").await.unwrap();
        let result = tx
            .search("Organization", &SearchParams::new().with_param("status", "active"))
            .await
            .unwrap();
        assert_eq!(result.total, Some(0));
        tx.commit().await.unwrap();

        assert!(storage.read("Organization", "o1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_conflict_on_concurrent_write() {
        let storage = InMemoryStorage::new();
        storage
            .create(&json!({"resourceType": "Organization", "id": "o1"}))
            .await
            .unwrap();

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.update(&json!({"resourceType": "Organization", "id": "o1", "name": "tx"}))
            .await
            .unwrap();

        storage
            .update(&json!({"resourceType": "Organization", "id": "o1", "name": "other"}), None)
            .await
            .unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::TransactionError { .. }));
        let current = storage.read("Organization", "o1").await.unwrap().unwrap();
        assert_eq!(current.resource["name"], "other");
    }
}
