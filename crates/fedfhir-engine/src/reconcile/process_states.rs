//! Process state calculation for a deployment refresh.

use std::collections::{HashMap, HashSet};

use super::state::{ProcessKeyAndVersion, ProcessState, ProcessStateChange};

/// What the process engine has to do with a process definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    Activate,
    Suspend,
    None,
}

impl EngineAction {
    pub fn for_change(old: ProcessState, new: ProcessState) -> Self {
        use ProcessState::*;
        match (old, new) {
            (Retired | Excluded, Active | Draft) => Self::Activate,
            (New | Active | Draft, Retired | Excluded) => Self::Suspend,
            _ => Self::None,
        }
    }
}

/// Operator overrides of the computed new state.
#[derive(Debug, Clone, Default)]
pub struct ProcessStateOverrides {
    pub excluded: HashSet<ProcessKeyAndVersion>,
    pub retired: HashSet<ProcessKeyAndVersion>,
    pub draft: HashSet<ProcessKeyAndVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStateOutcome {
    pub change: ProcessStateChange,
    pub action: EngineAction,
}

/// Computes the state change of every deployed process.
///
/// The old state is the stored one, `NEW` when absent. The new state is
/// `ACTIVE` for processes loaded from a plugin and `EXCLUDED` otherwise. The
/// excluded list takes precedence over the retired list, which takes
/// precedence over the draft list. Outcomes are ordered like `deployed`.
pub fn compute_process_state_changes(
    deployed: &[ProcessKeyAndVersion],
    loaded: &HashSet<ProcessKeyAndVersion>,
    stored: &HashMap<ProcessKeyAndVersion, ProcessState>,
    overrides: &ProcessStateOverrides,
) -> Vec<ProcessStateOutcome> {
    deployed
        .iter()
        .map(|process| {
            let old_state = stored.get(process).copied().unwrap_or(ProcessState::New);
            let new_state = if overrides.excluded.contains(process) {
                ProcessState::Excluded
            } else if overrides.retired.contains(process) {
                ProcessState::Retired
            } else if overrides.draft.contains(process) {
                ProcessState::Draft
            } else if loaded.contains(process) {
                ProcessState::Active
            } else {
                ProcessState::Excluded
            };

            let action = EngineAction::for_change(old_state, new_state);
            tracing::debug!(
                process = %process,
                old_state = %old_state,
                new_state = %new_state,
                action = ?action,
                "Process state computed"
            );

            ProcessStateOutcome {
                change: ProcessStateChange::new(process.clone(), old_state, new_state),
                action,
            }
        })
        .collect()
}
