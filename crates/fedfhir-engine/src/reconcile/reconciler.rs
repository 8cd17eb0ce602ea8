//! Reconciliation of process-plugin resources on the FHIR server.
//!
//! A pass turns the process state changes of a deployment refresh into one
//! `batch` bundle, executes it, and records the resulting resource ids in the
//! tracking store. The tracking store is only written after every response
//! entry was checked, so a failed pass leaves it untouched.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use fedfhir_core::{parse_literal, resource_type_of};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::batch::{BatchExecutor, ReturnPreference};
use super::error::ReconcileError;
use super::processes_resource::ProcessesResource;
use super::resource_info::ResourceInfo;
use super::state::{ProcessKeyAndVersion, ProcessState, ProcessStateChange};
use super::tracking::ProcessResourceStore;
use super::transitions::{Action, TransitionTable};

static ACTIVITY_DEFINITION_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^http://(?P<domain>(?:(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9\-]*[a-zA-Z0-9])\.)*(?:[A-Za-z0-9]|[A-Za-z0-9][A-Za-z0-9\-]*[A-Za-z0-9]))/bpe/Process/(?P<key>[-\w]+)$",
    )
    .expect("Invalid ActivityDefinition url regex")
});

static ACTIVITY_DEFINITION_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+$").expect("Invalid ActivityDefinition version regex")
});

/// Source of the resources each deployed process declares.
pub trait ProcessResourceProvider: Send + Sync {
    /// Declared resources of `process`, `None` if no definition is deployed.
    fn resources(&self, process: &ProcessKeyAndVersion) -> Option<Vec<Value>>;
}

/// [`ProcessResourceProvider`] backed by a map.
#[derive(Debug, Clone, Default)]
pub struct StaticProcessResourceProvider {
    resources: HashMap<ProcessKeyAndVersion, Vec<Value>>,
}

impl StaticProcessResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_process(mut self, process: ProcessKeyAndVersion, resources: Vec<Value>) -> Self {
        self.resources.insert(process, resources);
        self
    }
}

impl ProcessResourceProvider for StaticProcessResourceProvider {
    fn resources(&self, process: &ProcessKeyAndVersion) -> Option<Vec<Value>> {
        self.resources.get(process).cloned()
    }
}

/// What a pass changed on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Entries of the executed batch
    pub entries: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

pub struct ResourceStateReconciler {
    executor: Arc<dyn BatchExecutor>,
    store: Arc<dyn ProcessResourceStore>,
    transitions: TransitionTable,
    running: Mutex<()>,
}

impl ResourceStateReconciler {
    /// # Errors
    ///
    /// Returns `InvalidTransitionTable` if the transition table is incomplete.
    pub fn new(
        executor: Arc<dyn BatchExecutor>,
        store: Arc<dyn ProcessResourceStore>,
    ) -> Result<Self, ReconcileError> {
        Ok(Self {
            executor,
            store,
            transitions: TransitionTable::new()?,
            running: Mutex::new(()),
        })
    }

    /// Runs one reconciliation pass. Concurrent calls run one after the other.
    pub async fn reconcile(
        &self,
        provider: &dyn ProcessResourceProvider,
        changes: &[ProcessStateChange],
    ) -> Result<ReconcileReport, ReconcileError> {
        let _running = self.running.lock().await;

        let tracked = self.store.read_all().await?;

        let mut resources: IndexMap<ResourceInfo, ProcessesResource> = IndexMap::new();
        for change in changes {
            for resource in current_or_tracked_resources(provider, &tracked, &change.process)? {
                let resource = resource.with_states(change.old_state, change.new_state);
                match resources.get_mut(&resource.info) {
                    Some(existing) => existing.merge(&resource),
                    None => {
                        let mut resource = resource;
                        if change.old_state == ProcessState::Draft
                            && change.new_state == ProcessState::Draft
                            && resource.previously_unknown
                        {
                            tracing::info!(
                                resource_type = %resource.info.resource_type,
                                criteria = %resource.info.to_conditional_url(),
                                "Adding new resource"
                            );
                            resource.old_state = ProcessState::New;
                        }
                        resources.insert(resource.info.clone(), resource);
                    }
                }
            }
        }

        add_resources_removed_from_draft_processes(changes, &tracked, &mut resources);
        self.find_missing_resources(&mut resources).await?;

        let mut planned: Vec<(ResourceInfo, Action)> = Vec::new();
        let mut entries = Vec::new();
        for resource in resources
            .values()
            .filter(|r| r.has_state_change_or_draft() && r.not_new_to_excluded_change())
        {
            let action = self.transitions.action(resource.old_state, resource.new_state)?;
            entries.push(action.to_bundle_entry(&resource.info, resource.resource.as_ref())?);
            planned.push((resource.info.clone(), action));
        }

        if entries.is_empty() {
            tracing::debug!("No process plugin resources bundle to execute");
            return Ok(ReconcileReport::default());
        }

        let bundle = json!({"resourceType": "Bundle", "type": "batch", "entry": entries});
        tracing::debug!(entries = planned.len(), "Executing process plugin resources bundle");
        tracing::trace!(bundle = %bundle, "Process plugin resources bundle");

        let outcome = self.apply(&bundle, &planned, &mut resources, changes).await;
        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "Error while executing process plugin resources bundle");
            tracing::warn!(
                bundle = %bundle,
                "Resources in FHIR server may not be consistent, please check resources and execute the following bundle if necessary"
            );
        }
        outcome
    }

    async fn apply(
        &self,
        bundle: &Value,
        planned: &[(ResourceInfo, Action)],
        resources: &mut IndexMap<ResourceInfo, ProcessesResource>,
        changes: &[ProcessStateChange],
    ) -> Result<ReconcileReport, ReconcileError> {
        let response = self.executor.execute(bundle, ReturnPreference::Minimal).await?;
        let response_entries = response_entries(&response, planned.len())?;

        let mut report = ReconcileReport {
            entries: planned.len(),
            ..Default::default()
        };
        let mut deleted_ids = Vec::new();

        for ((info, action), entry) in planned.iter().zip(response_entries) {
            let Some(status) = entry.pointer("/response/status").and_then(Value::as_str) else {
                return Err(ReconcileError::inconsistent_bundle_response(format!(
                    "response entry for {info} has no response.status"
                )));
            };
            let expected = action.expected_statuses();
            if !expected.iter().any(|prefix| status.starts_with(prefix)) {
                return Err(ReconcileError::inconsistent_bundle_response(format!(
                    "status {status:?} for {info} does not start with one of {expected:?}"
                )));
            }

            let Some(resource) = resources.get_mut(info) else {
                continue;
            };
            match action {
                Action::Delete => {
                    report.deleted += 1;
                    deleted_ids.extend(resource.info.resource_id.take());
                }
                Action::Create(_) | Action::Update(_) => {
                    if matches!(action, Action::Create(_)) {
                        report.created += 1;
                    } else {
                        report.updated += 1;
                    }
                    resource.info.resource_id = location_id(entry, info)?;
                }
            }
        }

        let excluded_processes: Vec<ProcessKeyAndVersion> = changes
            .iter()
            .filter(|c| c.new_state == ProcessState::Excluded)
            .map(|c| c.process.clone())
            .collect();
        let all: Vec<ProcessesResource> = resources.values().cloned().collect();
        self.store
            .add_or_remove_resources(&all, &deleted_ids, &excluded_processes)
            .await?;

        tracing::info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            "Process plugin resources reconciled"
        );
        Ok(report)
    }

    /// Marks resources that should exist but are not found on the server as `MISSING`.
    async fn find_missing_resources(
        &self,
        resources: &mut IndexMap<ResourceInfo, ProcessesResource>,
    ) -> Result<(), ReconcileError> {
        let expected: Vec<ResourceInfo> = resources
            .values()
            .filter(|r| r.should_exist())
            .map(|r| r.info.clone())
            .collect();
        if expected.is_empty() {
            return Ok(());
        }

        let entries: Vec<Value> = expected
            .iter()
            .filter_map(|info| resources.get(info))
            .map(ProcessesResource::to_search_bundle_entry)
            .collect();
        let bundle = json!({"resourceType": "Bundle", "type": "batch", "entry": entries});
        let response = self
            .executor
            .execute(&bundle, ReturnPreference::Representation)
            .await?;
        let response_entries = response_entries(&response, expected.len())?;

        for (info, entry) in expected.iter().zip(response_entries) {
            let Some(status) = entry.pointer("/response/status").and_then(Value::as_str) else {
                return Err(ReconcileError::inconsistent_bundle_response(format!(
                    "response entry for {info} has no response.status"
                )));
            };
            if !status.starts_with("200") {
                tracing::warn!(
                    search = %info,
                    status = %status,
                    "Response status not 200 OK, missing resource will not be added"
                );
                continue;
            }

            let searchset = entry
                .get("resource")
                .filter(|r| resource_type_of(r) == Some("Bundle"))
                .filter(|r| r.get("type").and_then(Value::as_str) == Some("searchset"));
            let Some(searchset) = searchset else {
                tracing::warn!(
                    search = %info,
                    "Response not a searchset Bundle, missing resource will not be added"
                );
                continue;
            };

            let total = searchset.get("total").and_then(Value::as_i64).unwrap_or(0);
            if total <= 0 {
                tracing::warn!(
                    search = %info,
                    "Resource not found, setting old process state for resource to MISSING"
                );
                if let Some(resource) = resources.get_mut(info) {
                    resource.old_state = ProcessState::Missing;
                }
            } else {
                tracing::debug!(search = %info, "Resource found");
            }
        }
        Ok(())
    }
}

/// Declared resources of a deployed process, or its tracked rows otherwise.
fn current_or_tracked_resources(
    provider: &dyn ProcessResourceProvider,
    tracked: &HashMap<ProcessKeyAndVersion, Vec<ResourceInfo>>,
    process: &ProcessKeyAndVersion,
) -> Result<Vec<ProcessesResource>, ReconcileError> {
    let tracked_rows = tracked.get(process).map(Vec::as_slice).unwrap_or_default();

    let Some(declared) = provider.resources(process) else {
        if tracked_rows.is_empty() {
            tracing::debug!(process = %process, "No tracked resources found for process");
        }
        return Ok(tracked_rows
            .iter()
            .map(|info| ProcessesResource::tracked(info.clone(), Some(process.clone())))
            .collect());
    };

    if declared.is_empty() {
        tracing::warn!(process = %process, "No FHIR resources found for process");
        return Ok(Vec::new());
    }
    if !has_activity_definition(&declared, process) {
        tracing::warn!(
            process = %process,
            "None or more than one ActivityDefinition found matching process"
        );
    }

    declared
        .into_iter()
        .map(|resource| {
            let info = ResourceInfo::from_resource(&resource)?;
            let known_id = tracked_rows
                .iter()
                .find(|row| **row == info)
                .and_then(|row| row.resource_id);
            Ok::<_, ReconcileError>(ProcessesResource::declared(
                info.with_resource_id(known_id),
                resource,
                process.clone(),
            ))
        })
        .collect()
}

/// Tracked resources of `DRAFT -> DRAFT` processes that are no longer declared
/// get deleted, unless another entry already claims them.
fn add_resources_removed_from_draft_processes(
    changes: &[ProcessStateChange],
    tracked: &HashMap<ProcessKeyAndVersion, Vec<ResourceInfo>>,
    resources: &mut IndexMap<ResourceInfo, ProcessesResource>,
) {
    let draft_processes = changes
        .iter()
        .filter(|c| c.old_state == ProcessState::Draft && c.new_state == ProcessState::Draft);

    for change in draft_processes {
        for info in tracked.get(&change.process).into_iter().flatten() {
            if resources.contains_key(info) {
                continue;
            }
            tracing::info!(
                resource = %info,
                id = ?info.resource_id,
                "Deleting resource if exists"
            );
            resources.insert(
                info.clone(),
                ProcessesResource::tracked(info.clone(), None)
                    .with_states(ProcessState::Draft, ProcessState::Excluded),
            );
        }
    }
}

fn has_activity_definition(resources: &[Value], process: &ProcessKeyAndVersion) -> bool {
    resources
        .iter()
        .filter(|r| resource_type_of(r) == Some("ActivityDefinition"))
        .filter(|r| activity_definition_matches(r, process))
        .count()
        == 1
}

fn activity_definition_matches(resource: &Value, process: &ProcessKeyAndVersion) -> bool {
    let (Some(url), Some(version)) = (
        resource.get("url").and_then(Value::as_str),
        resource.get("version").and_then(Value::as_str),
    ) else {
        return false;
    };

    let Some(captures) = ACTIVITY_DEFINITION_URL.captures(url) else {
        tracing::warn!(url = %url, "ActivityDefinition.url does not match process url pattern");
        return false;
    };
    if !ACTIVITY_DEFINITION_VERSION.is_match(version) {
        tracing::warn!(version = %version, "ActivityDefinition.version does not match version pattern");
        return false;
    }

    let key = format!("{}_{}", captures["domain"].replace('.', ""), &captures["key"]);
    key == process.key && version == process.version
}

fn response_entries(response: &Value, expected: usize) -> Result<&[Value], ReconcileError> {
    let entries = response
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if entries.len() != expected {
        return Err(ReconcileError::inconsistent_bundle_response(format!(
            "expected {expected} response entries, got {}",
            entries.len()
        )));
    }
    Ok(entries)
}

/// Id part of the `Location` of a create or update response. Ids that are not
/// UUIDs are not tracked.
fn location_id(entry: &Value, info: &ResourceInfo) -> Result<Option<Uuid>, ReconcileError> {
    let location = entry
        .pointer("/response/location")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let reference = parse_literal(location).ok_or_else(|| {
        ReconcileError::inconsistent_bundle_response(format!(
            "response location {location:?} for {info} is not a resource url"
        ))
    })?;
    if reference.resource_type != info.resource_type {
        return Err(ReconcileError::inconsistent_bundle_response(format!(
            "expected resource type {}, got {}",
            info.resource_type, reference.resource_type
        )));
    }
    Ok(Uuid::parse_str(&reference.id).ok())
}
