//! Reference resolution errors.

use std::fmt;

use fedfhir_storage::StorageError;

/// Errors that can occur while resolving a reference.
///
/// Every variant except `Remote` and `Store` describes the reference itself
/// and maps to a client error.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Reference target type {resource_type} not supported at {location}")]
    UnsupportedReferenceTargetType {
        location: String,
        resource_type: String,
    },

    #[error("Reference target type {resource_type} not allowed at {location}, expected one of {allowed:?}")]
    ReferenceTargetTypeNotSupportedByResource {
        location: String,
        resource_type: String,
        allowed: Vec<String>,
    },

    #[error("Reference target {reference} at {location} not found locally")]
    ReferenceTargetNotFoundLocally { location: String, reference: String },

    #[error("Reference target {resource_type} with identifier {identifier} at {location} not found locally")]
    ReferenceTargetNotFoundLocallyByIdentifier {
        location: String,
        resource_type: String,
        identifier: String,
    },

    #[error("Reference target {condition} at {location} not found locally")]
    ReferenceTargetNotFoundLocallyByCondition { location: String, condition: String },

    #[error("Found {count} matches for {resource_type} with identifier {identifier} at {location}")]
    ReferenceTargetMultipleMatchesLocallyByIdentifier {
        location: String,
        resource_type: String,
        identifier: String,
        count: u32,
    },

    #[error("Found {count} matches for {condition} at {location}")]
    ReferenceTargetMultipleMatchesLocallyByCondition {
        location: String,
        condition: String,
        count: u32,
    },

    #[error("Bad conditional reference {condition} at {location}: {message}")]
    BadConditionalReference {
        location: String,
        condition: String,
        message: String,
    },

    #[error("Unknown reference at {location}: {value}")]
    UnknownReference { location: String, value: String },

    #[error("No federation endpoint configured for server base {server_base} at {location}")]
    NoEndpointForServerBase { location: String, server_base: String },

    #[error("Reference target {reference} at {location} not found on remote server")]
    ReferenceTargetNotFoundRemotely { location: String, reference: String },

    /// The remote server could not be reached or answered with an error.
    #[error("Remote reference check of {reference} failed: {message}")]
    Remote { reference: String, message: String },

    #[error(transparent)]
    Store(#[from] StorageError),
}

impl ResolveError {
    #[must_use]
    pub fn unknown_reference(location: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnknownReference {
            location: location.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn bad_conditional_reference(
        location: impl Into<String>,
        condition: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BadConditionalReference {
            location: location.into(),
            condition: condition.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn remote(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the reference target does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ReferenceTargetNotFoundLocally { .. }
                | Self::ReferenceTargetNotFoundLocallyByIdentifier { .. }
                | Self::ReferenceTargetNotFoundLocallyByCondition { .. }
                | Self::ReferenceTargetNotFoundRemotely { .. }
        )
    }

    /// Returns `true` if a search matched more than one target.
    #[must_use]
    pub fn is_multiple_matches(&self) -> bool {
        matches!(
            self,
            Self::ReferenceTargetMultipleMatchesLocallyByIdentifier { .. }
                | Self::ReferenceTargetMultipleMatchesLocallyByCondition { .. }
        )
    }

    /// Returns `true` if the failure is caused by the submitted resource.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Remote { .. } | Self::Store(_))
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedReferenceTargetType { .. }
            | Self::ReferenceTargetTypeNotSupportedByResource { .. }
            | Self::BadConditionalReference { .. }
            | Self::UnknownReference { .. }
            | Self::NoEndpointForServerBase { .. } => ErrorCategory::Validation,
            Self::ReferenceTargetNotFoundLocally { .. }
            | Self::ReferenceTargetNotFoundLocallyByIdentifier { .. }
            | Self::ReferenceTargetNotFoundLocallyByCondition { .. }
            | Self::ReferenceTargetNotFoundRemotely { .. } => ErrorCategory::NotFound,
            Self::ReferenceTargetMultipleMatchesLocallyByIdentifier { .. }
            | Self::ReferenceTargetMultipleMatchesLocallyByCondition { .. } => {
                ErrorCategory::Conflict
            }
            Self::Remote { .. } => ErrorCategory::Remote,
            Self::Store(_) => ErrorCategory::Storage,
        }
    }
}

/// Categories of resolution errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Conflict,
    Remote,
    Storage,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Remote => write!(f, "remote"),
            Self::Storage => write!(f, "storage"),
        }
    }
}
