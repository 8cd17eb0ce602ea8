//! Reconciliation of process-plugin resources with the FHIR server.

pub mod batch;
pub mod error;
pub mod process_states;
pub mod processes_resource;
pub mod reconciler;
pub mod resource_info;
pub mod state;
pub mod tracking;
pub mod transitions;

pub use batch::{
    BatchClientConfig, BatchExecutor, HttpBatchClient, ReturnPreference, StorageBatchExecutor,
};
pub use error::ReconcileError;
pub use process_states::{
    EngineAction, ProcessStateOutcome, ProcessStateOverrides, compute_process_state_changes,
};
pub use processes_resource::ProcessesResource;
pub use reconciler::{
    ProcessResourceProvider, ReconcileReport, ResourceStateReconciler,
    StaticProcessResourceProvider,
};
pub use resource_info::{Criteria, PROCESS_RESOURCE_TYPES, ResourceInfo};
pub use state::{ProcessKeyAndVersion, ProcessState, ProcessStateChange};
pub use tracking::{InMemoryProcessResourceStore, ProcessResourceStore};
pub use transitions::{Action, PublicationStatus, TransitionTable};
