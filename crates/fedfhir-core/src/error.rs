use thiserror::Error;

/// Failures while interpreting resource type names and resource documents.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown resource type '{0}'")]
    UnknownResourceType(String),

    #[error("Resource document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    #[must_use]
    pub fn unknown_resource_type(name: impl Into<String>) -> Self {
        Self::UnknownResourceType(name.into())
    }

    /// The offending input, when the error carries one.
    pub fn input(&self) -> Option<&str> {
        match self {
            Self::UnknownResourceType(name) => Some(name),
            Self::Json(_) => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownResourceType(_) => ErrorCategory::Reference,
            Self::Json(_) => ErrorCategory::Document,
        }
    }
}

/// Coarse grouping used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Reference,
    Document,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Reference => "reference",
            Self::Document => "document",
        })
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_resource_type_keeps_input() {
        let err = CoreError::unknown_resource_type("Foo");
        assert_eq!(err.to_string(), "Unknown resource type 'Foo'");
        assert_eq!(err.input(), Some("Foo"));
        assert_eq!(err.category(), ErrorCategory::Reference);
    }

    #[test]
    fn json_errors_are_document_errors() {
        let err: CoreError = serde_json::from_str::<serde_json::Value>("{ nope")
            .unwrap_err()
            .into();
        assert!(err.input().is_none());
        assert_eq!(err.category(), ErrorCategory::Document);
        assert_eq!(ErrorCategory::Document.to_string(), "document");
    }
}
