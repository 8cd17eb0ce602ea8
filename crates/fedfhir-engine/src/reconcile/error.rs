//! Reconciliation errors.

use std::fmt;

use fedfhir_storage::StorageError;

use super::state::ProcessState;

/// Errors that abort a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The response bundle does not line up with the request bundle.
    #[error("Inconsistent bundle response: {message}")]
    InconsistentBundleResponse { message: String },

    #[error("State change {old} -> {new} not supported")]
    UnsupportedStateChange { old: ProcessState, new: ProcessState },

    #[error("Invalid transition table: {message}")]
    InvalidTransitionTable { message: String },

    #[error("Invalid resource: {message}")]
    InvalidResource { message: String },

    /// Non-retryable error response of the batch endpoint.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StorageError),
}

impl ReconcileError {
    #[must_use]
    pub fn inconsistent_bundle_response(message: impl Into<String>) -> Self {
        Self::InconsistentBundleResponse {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_transition_table(message: impl Into<String>) -> Self {
        Self::InvalidTransitionTable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    /// Returns `true` for failures a later retry of the whole pass may fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500,
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InconsistentBundleResponse { .. } => ErrorCategory::Consistency,
            Self::UnsupportedStateChange { .. } | Self::InvalidTransitionTable { .. } => {
                ErrorCategory::StateMachine
            }
            Self::InvalidResource { .. } => ErrorCategory::Validation,
            Self::Http { .. } | Self::Transport(_) => ErrorCategory::Remote,
            Self::Store(_) => ErrorCategory::Storage,
        }
    }
}

/// Categories of reconciliation errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Consistency,
    StateMachine,
    Validation,
    Remote,
    Storage,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Consistency => write!(f, "consistency"),
            Self::StateMachine => write!(f, "state_machine"),
            Self::Validation => write!(f, "validation"),
            Self::Remote => write!(f, "remote"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(
            ReconcileError::Http {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            !ReconcileError::Http {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!ReconcileError::inconsistent_bundle_response("2 != 3").is_transient());
    }

    #[test]
    fn test_display() {
        let err = ReconcileError::UnsupportedStateChange {
            old: ProcessState::New,
            new: ProcessState::Excluded,
        };
        assert_eq!(err.to_string(), "State change NEW -> EXCLUDED not supported");
        assert_eq!(err.category().to_string(), "state_machine");
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ReconcileError::invalid_resource("no url").category(),
            ErrorCategory::Validation
        );
        let err: ReconcileError = StorageError::transaction_error("rolled back").into();
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(err.is_transient());
        assert!(!ReconcileError::from(StorageError::not_found("Task", "t1")).is_transient());
    }
}
