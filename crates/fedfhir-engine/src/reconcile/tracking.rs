//! Tracking of which process declared which server resource.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use fedfhir_storage::StorageError;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::processes_resource::ProcessesResource;
use super::resource_info::ResourceInfo;
use super::state::ProcessKeyAndVersion;

/// Persistent `(process, criteria) -> resource id` rows.
#[async_trait]
pub trait ProcessResourceStore: Send + Sync {
    /// All rows grouped by process, read as one snapshot.
    async fn read_all(
        &self,
    ) -> Result<HashMap<ProcessKeyAndVersion, Vec<ResourceInfo>>, StorageError>;

    /// Applies one reconciliation result atomically.
    ///
    /// Upserts a row per owner of every resource with a known id, then removes
    /// rows of `deleted_ids`, then every row of `excluded_processes`. An empty
    /// `resources` slice leaves the store untouched.
    async fn add_or_remove_resources(
        &self,
        resources: &[ProcessesResource],
        deleted_ids: &[Uuid],
        excluded_processes: &[ProcessKeyAndVersion],
    ) -> Result<(), StorageError>;
}

type Rows = BTreeMap<(ProcessKeyAndVersion, ResourceInfo), Uuid>;

/// In-memory [`ProcessResourceStore`]. Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProcessResourceStore {
    rows: Arc<RwLock<Rows>>,
}

impl InMemoryProcessResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ProcessResourceStore for InMemoryProcessResourceStore {
    async fn read_all(
        &self,
    ) -> Result<HashMap<ProcessKeyAndVersion, Vec<ResourceInfo>>, StorageError> {
        let rows = self.rows.read().await;
        let mut grouped: HashMap<ProcessKeyAndVersion, Vec<ResourceInfo>> = HashMap::new();
        for ((process, info), id) in rows.iter() {
            grouped
                .entry(process.clone())
                .or_default()
                .push(info.clone().with_resource_id(Some(*id)));
        }
        Ok(grouped)
    }

    async fn add_or_remove_resources(
        &self,
        resources: &[ProcessesResource],
        deleted_ids: &[Uuid],
        excluded_processes: &[ProcessKeyAndVersion],
    ) -> Result<(), StorageError> {
        if resources.is_empty() {
            return Ok(());
        }

        let mut rows = self.rows.write().await;
        let mut next = rows.clone();

        for resource in resources {
            let Some(id) = resource.info.resource_id else {
                continue;
            };
            for process in &resource.processes {
                let key = (process.clone(), resource.info.clone().with_resource_id(None));
                next.insert(key, id);
            }
        }
        next.retain(|_, id| !deleted_ids.contains(id));
        next.retain(|(process, _), _| !excluded_processes.contains(process));

        tracing::debug!(
            rows_before = rows.len(),
            rows_after = next.len(),
            "Process plugin resources tracking updated"
        );
        *rows = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::state::ProcessState;
    use serde_json::json;

    fn process(key: &str) -> ProcessKeyAndVersion {
        ProcessKeyAndVersion::new(key, "1.0.0")
    }

    fn code_system(url: &str, id: Option<Uuid>, owners: &[&str]) -> ProcessesResource {
        let info = ResourceInfo::with_url_and_version("CodeSystem", url, "1.0.0").with_resource_id(id);
        let mut resource = ProcessesResource::declared(info, json!({}), process(owners[0]))
            .with_states(ProcessState::New, ProcessState::Active);
        for owner in &owners[1..] {
            resource.processes.insert(process(owner));
        }
        resource
    }

    #[tokio::test]
    async fn test_upsert_per_owner_and_read_back() {
        let store = InMemoryProcessResourceStore::new();
        let id = Uuid::new_v4();
        store
            .add_or_remove_resources(&[code_system("http://x/a", Some(id), &["p1", "p2"])], &[], &[])
            .await
            .unwrap();

        let all = store.read_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&process("p1")][0].resource_id, Some(id));

        let new_id = Uuid::new_v4();
        store
            .add_or_remove_resources(&[code_system("http://x/a", Some(new_id), &["p1"])], &[], &[])
            .await
            .unwrap();
        let all = store.read_all().await.unwrap();
        assert_eq!(all[&process("p1")][0].resource_id, Some(new_id));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_tracked() {
        let store = InMemoryProcessResourceStore::new();
        store
            .add_or_remove_resources(&[code_system("http://x/a", None, &["p1"])], &[], &[])
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_deletes_and_excluded_processes() {
        let store = InMemoryProcessResourceStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store
            .add_or_remove_resources(
                &[
                    code_system("http://x/a", Some(a), &["p1"]),
                    code_system("http://x/b", Some(b), &["p1", "p2"]),
                ],
                &[],
                &[],
            )
            .await
            .unwrap();

        store
            .add_or_remove_resources(
                &[code_system("http://x/c", None, &["p3"])],
                &[a],
                &[process("p2")],
            )
            .await
            .unwrap();

        let all = store.read_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&process("p1")].len(), 1);
        assert_eq!(all[&process("p1")][0].resource_id, Some(b));
    }

    #[tokio::test]
    async fn test_empty_resources_is_noop() {
        let store = InMemoryProcessResourceStore::new();
        let id = Uuid::new_v4();
        store
            .add_or_remove_resources(&[code_system("http://x/a", Some(id), &["p1"])], &[], &[])
            .await
            .unwrap();
        store
            .add_or_remove_resources(&[], &[id], &[process("p1")])
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
    }
}
