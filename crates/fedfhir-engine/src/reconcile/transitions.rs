//! State transition table and the batch entries each transition produces.

use std::collections::HashMap;

use serde_json::{Value, json};
use uuid::Uuid;

use super::error::ReconcileError;
use super::resource_info::ResourceInfo;
use super::state::ProcessState;

/// `status` written into created and updated resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublicationStatus {
    Active,
    Draft,
    Retired,
}

impl PublicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Draft => "draft",
            Self::Retired => "retired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create(PublicationStatus),
    Update(PublicationStatus),
    Delete,
}

impl Action {
    /// Status code prefixes a successful response entry starts with.
    pub fn expected_statuses(self) -> &'static [&'static str] {
        match self {
            Self::Create(_) => &["200", "201"],
            Self::Update(_) => &["200"],
            Self::Delete => &["200", "204"],
        }
    }

    /// Builds the batch entry for `info`.
    ///
    /// Creates and updates need the declared resource. Updates and deletes
    /// address the resource by id when it is known, by its criteria otherwise.
    pub fn to_bundle_entry(
        self,
        info: &ResourceInfo,
        resource: Option<&Value>,
    ) -> Result<Value, ReconcileError> {
        match self {
            Self::Create(status) => {
                let mut body = with_status(info, resource, status)?;
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("id");
                    obj.remove("meta");
                }
                Ok(json!({
                    "fullUrl": format!("urn:uuid:{}", Uuid::new_v4()),
                    "resource": body,
                    "request": {
                        "method": "POST",
                        "url": info.resource_type,
                        "ifNoneExist": info.to_conditional_url()
                    }
                }))
            }
            Self::Update(status) => {
                let mut body = with_status(info, resource, status)?;
                let url = match (info.resource_id, body.as_object_mut()) {
                    (Some(id), Some(obj)) => {
                        obj.insert("id".to_string(), Value::String(id.to_string()));
                        format!("{}/{id}", info.resource_type)
                    }
                    (_, obj) => {
                        if let Some(obj) = obj {
                            obj.remove("id");
                        }
                        info.to_search_url()
                    }
                };
                Ok(json!({
                    "fullUrl": format!("urn:uuid:{}", Uuid::new_v4()),
                    "resource": body,
                    "request": {"method": "PUT", "url": url}
                }))
            }
            Self::Delete => {
                let url = match info.resource_id {
                    Some(id) => format!("{}/{id}", info.resource_type),
                    None => info.to_search_url(),
                };
                Ok(json!({"request": {"method": "DELETE", "url": url}}))
            }
        }
    }
}

fn with_status(
    info: &ResourceInfo,
    resource: Option<&Value>,
    status: PublicationStatus,
) -> Result<Value, ReconcileError> {
    let mut body = resource.cloned().ok_or_else(|| {
        ReconcileError::invalid_resource(format!("no declared resource for {info}"))
    })?;
    let obj = body
        .as_object_mut()
        .ok_or_else(|| ReconcileError::invalid_resource(format!("{info} is not a JSON object")))?;
    obj.insert("status".to_string(), Value::String(status.as_str().to_string()));
    Ok(body)
}

const TRANSITIONS: &[(ProcessState, ProcessState, Action)] = {
    use Action::*;
    use ProcessState::*;
    use PublicationStatus as S;
    &[
        (New, Active, Create(S::Active)),
        (New, Draft, Create(S::Draft)),
        (New, Retired, Create(S::Retired)),
        (Missing, Active, Create(S::Active)),
        (Missing, Retired, Create(S::Retired)),
        (Active, Draft, Update(S::Draft)),
        (Active, Retired, Update(S::Retired)),
        (Active, Excluded, Delete),
        (Draft, Active, Update(S::Active)),
        (Draft, Draft, Update(S::Draft)),
        (Draft, Retired, Update(S::Retired)),
        (Draft, Excluded, Delete),
        (Retired, Active, Update(S::Active)),
        (Retired, Draft, Update(S::Draft)),
        (Retired, Excluded, Delete),
        (Excluded, Active, Create(S::Active)),
        (Excluded, Draft, Create(S::Draft)),
        (Excluded, Retired, Create(S::Retired)),
    ]
};

/// True for the state pairs that survive the reconciliation filters.
///
/// `Missing` is only assigned to resources that should stay active or retired.
pub fn is_reachable(old: ProcessState, new: ProcessState) -> bool {
    use ProcessState::*;
    match (old, new) {
        (_, New | Missing) => false,
        (Missing, Active | Retired) => true,
        (Missing, _) => false,
        (New, Excluded) => false,
        (Draft, Draft) => true,
        (old, new) => old != new,
    }
}

/// Maps every reachable `(old, new)` pair to exactly one [`Action`].
#[derive(Debug, Clone)]
pub struct TransitionTable {
    actions: HashMap<(ProcessState, ProcessState), Action>,
}

impl TransitionTable {
    /// The standard table.
    pub fn new() -> Result<Self, ReconcileError> {
        Self::from_entries(TRANSITIONS)
    }

    /// Builds and verifies a table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransitionTable` for duplicate pairs and for reachable
    /// pairs without an action.
    pub fn from_entries(
        entries: &[(ProcessState, ProcessState, Action)],
    ) -> Result<Self, ReconcileError> {
        let mut actions = HashMap::with_capacity(entries.len());
        for &(old, new, action) in entries {
            if actions.insert((old, new), action).is_some() {
                return Err(ReconcileError::invalid_transition_table(format!(
                    "duplicate transition {old} -> {new}"
                )));
            }
        }

        for old in ProcessState::ALL {
            for new in ProcessState::ALL {
                if is_reachable(old, new) && !actions.contains_key(&(old, new)) {
                    return Err(ReconcileError::invalid_transition_table(format!(
                        "missing transition {old} -> {new}"
                    )));
                }
            }
        }

        Ok(Self { actions })
    }

    pub fn action(&self, old: ProcessState, new: ProcessState) -> Result<Action, ReconcileError> {
        self.actions
            .get(&(old, new))
            .copied()
            .ok_or(ReconcileError::UnsupportedStateChange { old, new })
    }
}
