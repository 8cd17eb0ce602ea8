//! A process-plugin resource together with the processes that own it.

use std::collections::BTreeSet;

use serde_json::{Value, json};

use super::resource_info::ResourceInfo;
use super::state::{ProcessKeyAndVersion, ProcessState};

#[derive(Debug, Clone)]
pub struct ProcessesResource {
    pub info: ResourceInfo,
    /// Declared resource, `None` when rebuilt from the tracking store
    pub resource: Option<Value>,
    pub processes: BTreeSet<ProcessKeyAndVersion>,
    pub old_state: ProcessState,
    pub new_state: ProcessState,
    /// Set when first inserted without a known resource id
    pub previously_unknown: bool,
}

impl ProcessesResource {
    /// A declared resource owned by `process`.
    pub fn declared(info: ResourceInfo, resource: Value, process: ProcessKeyAndVersion) -> Self {
        Self::build(info, Some(resource), Some(process))
    }

    /// A resource known only from the tracking store.
    pub fn tracked(info: ResourceInfo, process: Option<ProcessKeyAndVersion>) -> Self {
        Self::build(info, None, process)
    }

    fn build(
        info: ResourceInfo,
        resource: Option<Value>,
        process: Option<ProcessKeyAndVersion>,
    ) -> Self {
        let previously_unknown = !info.has_resource_id();
        Self {
            info,
            resource,
            processes: process.into_iter().collect(),
            old_state: ProcessState::New,
            new_state: ProcessState::New,
            previously_unknown,
        }
    }

    #[must_use]
    pub fn with_states(mut self, old_state: ProcessState, new_state: ProcessState) -> Self {
        self.old_state = old_state;
        self.new_state = new_state;
        self
    }

    /// Folds another request for the same resource into this one.
    ///
    /// Owners are united and the higher-priority new state wins. The old state
    /// is only raised when the resource id is already known.
    pub fn merge(&mut self, other: &ProcessesResource) {
        self.processes.extend(other.processes.iter().cloned());
        self.new_state = self.new_state.max_priority(other.new_state);
        if self.info.has_resource_id() {
            self.old_state = self.old_state.max_priority(other.old_state);
        }
    }

    pub fn has_state_change_or_draft(&self) -> bool {
        self.old_state != self.new_state
            || (self.old_state == ProcessState::Draft && self.new_state == ProcessState::Draft)
    }

    pub fn not_new_to_excluded_change(&self) -> bool {
        !(self.old_state == ProcessState::New && self.new_state == ProcessState::Excluded)
    }

    /// True for `ACTIVE -> ACTIVE` and `RETIRED -> RETIRED`.
    pub fn should_exist(&self) -> bool {
        matches!(
            (self.old_state, self.new_state),
            (ProcessState::Active, ProcessState::Active)
                | (ProcessState::Retired, ProcessState::Retired)
        )
    }

    /// `GET <Type>?<criteria>&_count=0`
    pub fn to_search_bundle_entry(&self) -> Value {
        json!({
            "request": {
                "method": "GET",
                "url": format!("{}&_count=0", self.info.to_search_url())
            }
        })
    }
}
