//! Errors reported by resource stores.

/// A failed store operation.
///
/// Conditional lookups surface `MultipleMatches` and
/// `UnsupportedSearchParameter` so callers can tell an ambiguous reference
/// from one the backend cannot evaluate at all.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{resource_type}/{id} does not exist")]
    NotFound { resource_type: String, id: String },

    #[error("{resource_type}/{id} already exists")]
    AlreadyExists { resource_type: String, id: String },

    /// `If-Match` style check failed on update.
    #[error("Stale version: expected {expected}, current is {actual}")]
    VersionConflict { expected: String, actual: String },

    #[error("Invalid resource: {message}")]
    InvalidResource { message: String },

    #[error("Search parameter '{parameter}' is not supported for {resource_type}")]
    UnsupportedSearchParameter {
        resource_type: String,
        parameter: String,
    },

    #[error("More than one {resource_type} matches '{criteria}'")]
    MultipleMatches {
        resource_type: String,
        criteria: String,
    },

    #[error("Transaction failed: {message}")]
    TransactionError { message: String },

    #[error("Store failure: {message}")]
    Internal { message: String },
}

impl StorageError {
    #[must_use]
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn already_exists(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    #[must_use]
    pub fn version_conflict(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::VersionConflict {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unsupported_search_parameter(
        resource_type: impl Into<String>,
        parameter: impl Into<String>,
    ) -> Self {
        Self::UnsupportedSearchParameter {
            resource_type: resource_type.into(),
            parameter: parameter.into(),
        }
    }

    /// `criteria` is the query string that produced more than one hit.
    #[must_use]
    pub fn multiple_matches(resource_type: impl Into<String>, criteria: impl Into<String>) -> Self {
        Self::MultipleMatches {
            resource_type: resource_type.into(),
            criteria: criteria.into(),
        }
    }

    #[must_use]
    pub fn transaction_error(message: impl Into<String>) -> Self {
        Self::TransactionError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_unsupported_search_parameter(&self) -> bool {
        matches!(self, Self::UnsupportedSearchParameter { .. })
    }

    /// True when repeating the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransactionError { .. } | Self::Internal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_resource() {
        assert_eq!(
            StorageError::not_found("Task", "t1").to_string(),
            "Task/t1 does not exist"
        );
        assert_eq!(
            StorageError::unsupported_search_parameter("Endpoint", "_text").to_string(),
            "Search parameter '_text' is not supported for Endpoint"
        );
        assert_eq!(
            StorageError::multiple_matches("Organization", "identifier=x|y").to_string(),
            "More than one Organization matches 'identifier=x|y'"
        );
    }

    #[test]
    fn predicates() {
        let err = StorageError::unsupported_search_parameter("Patient", "foo");
        assert!(err.is_unsupported_search_parameter());
        assert!(!err.is_not_found());
        assert!(!err.is_transient());

        assert!(StorageError::already_exists("Patient", "1").is_already_exists());
        assert!(StorageError::version_conflict("1", "2").is_version_conflict());
        assert!(StorageError::transaction_error("rolled back").is_transient());
    }
}
