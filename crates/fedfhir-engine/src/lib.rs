//! Federated FHIR reference resolution and process-plugin resource reconciliation.
//!
//! [`references`] locates the references inside a resource, classifies them
//! against the local server base and resolves conditional and logical ones to
//! literal references. [`reconcile`] keeps the resources declared by process
//! plugins in line with the state of their processes.

pub mod config;
pub mod observability;
pub mod reconcile;
pub mod references;

pub use config::AppConfig;
pub use observability::{apply_logging_level, init_tracing};
pub use reconcile::{
    BatchExecutor, HttpBatchClient, InMemoryProcessResourceStore, ProcessKeyAndVersion,
    ProcessResourceProvider, ProcessState, ProcessStateChange, ReconcileError, ReconcileReport,
    ResourceStateReconciler, StorageBatchExecutor,
};
pub use references::{
    HttpRemoteReferenceChecker, ReferenceResolver, RemoteReferenceChecker, Resolution,
    ResolveError, locate,
};
