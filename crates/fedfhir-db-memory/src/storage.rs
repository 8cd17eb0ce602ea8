use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fedfhir_core::{resource_id_of, resource_type_of};
use fedfhir_storage::{StorageError, StoredResource};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::RwLock;

pub type StorageKey = String; // Format: "ResourceType/id"

pub(crate) fn make_storage_key(resource_type: &str, id: &str) -> StorageKey {
    format!("{resource_type}/{id}")
}

/// All versions of one resource, oldest first.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResourceRecord {
    pub(crate) versions: Vec<StoredResource>,
    pub(crate) deleted: bool,
}

impl ResourceRecord {
    pub(crate) fn current(&self) -> Option<&StoredResource> {
        if self.deleted {
            None
        } else {
            self.versions.last()
        }
    }

    pub(crate) fn version(&self, version_id: &str) -> Option<&StoredResource> {
        self.versions.iter().find(|v| v.version_id == version_id)
    }

    pub(crate) fn latest_version_id(&self) -> Option<&str> {
        self.versions.last().map(|v| v.version_id.as_str())
    }
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) records: HashMap<StorageKey, ResourceRecord>,
}

/// In-memory FHIR storage backend.
///
/// This storage implementation provides:
/// - CRUD operations with per-resource version history
/// - Search over a fixed set of parameters (see [`crate::query`])
/// - Transactions that buffer writes and apply them atomically on commit
///
/// Cloning is cheap and clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    pub(crate) state: Arc<RwLock<StoreState>>,
    /// Restricts the storable resource types, `None` accepts every catalogue type
    pub(crate) supported_types: Option<Arc<HashSet<String>>>,
}

impl InMemoryStorage {
    /// Creates a new in-memory storage accepting every catalogue type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a storage that only accepts the given resource types.
    pub fn with_supported_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Arc::default(),
            supported_types: Some(Arc::new(types.into_iter().map(Into::into).collect())),
        }
    }

    pub(crate) fn is_supported(&self, resource_type: &str) -> bool {
        match &self.supported_types {
            Some(types) => types.contains(resource_type),
            None => fedfhir_core::is_known_resource_type(resource_type),
        }
    }

    /// Number of resources that are currently not deleted.
    pub async fn len(&self) -> usize {
        self.state
            .read()
            .await
            .records
            .values()
            .filter(|r| r.current().is_some())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of the current version of every resource of one type.
    pub async fn all_of_type(&self, resource_type: &str) -> Vec<StoredResource> {
        self.state
            .read()
            .await
            .records
            .values()
            .filter_map(ResourceRecord::current)
            .filter(|r| r.resource_type == resource_type)
            .cloned()
            .collect()
    }
}

/// Validates the resource and returns its type and optional id.
pub(crate) fn extract_identity(
    storage: &InMemoryStorage,
    resource: &Value,
) -> Result<(String, Option<String>), StorageError> {
    let resource_type = resource_type_of(resource)
        .ok_or_else(|| StorageError::invalid_resource("Missing resourceType field"))?;
    if !storage.is_supported(resource_type) {
        return Err(StorageError::invalid_resource(format!(
            "Unsupported resource type: {resource_type}"
        )));
    }
    Ok((
        resource_type.to_string(),
        resource_id_of(resource).map(String::from),
    ))
}

/// Builds the stored representation of a new version, injecting `id` and `meta`.
pub(crate) fn build_version(
    resource_type: &str,
    id: &str,
    previous: Option<&StoredResource>,
    resource: &Value,
) -> StoredResource {
    let version_id = previous
        .and_then(|p| p.version_id.parse::<u64>().ok())
        .map_or(1, |v| v + 1)
        .to_string();
    let now = OffsetDateTime::now_utc();

    let mut body = resource.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("id".to_string(), Value::String(id.to_string()));
        obj.insert(
            "meta".to_string(),
            serde_json::json!({
                "versionId": version_id,
                "lastUpdated": now.format(&Rfc3339).unwrap_or_default()
            }),
        );
    }

    StoredResource {
        id: id.to_string(),
        version_id,
        resource_type: resource_type.to_string(),
        resource: body,
        last_updated: now,
        created_at: previous.map_or(now, |p| p.created_at),
    }
}
