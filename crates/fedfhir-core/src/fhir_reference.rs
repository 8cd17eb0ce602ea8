//! FHIR reference string parsing.
//!
//! Reference values come in a handful of shapes:
//! - Relative literal: `Patient/123`
//! - Versioned literal: `Patient/123/_history/1`
//! - Absolute literal: `http://example.org/fhir/Patient/123`
//! - Conditional: `Patient?identifier=http://sys|42`
//! - Temporary: `urn:uuid:550e8400-e29b-41d4-a716-446655440000`
//!
//! The type segment of literal and conditional references must be part of the
//! resource type catalogue (see [`crate::fhir::is_known_resource_type`]).
//!
//! # Example
//!
//! ```
//! use fedfhir_core::fhir_reference::{parse_literal, FhirReference};
//!
//! let reference = parse_literal("Patient/123/_history/2").unwrap();
//! assert_eq!(reference, FhirReference::with_version("Patient", "123", "2"));
//! assert!(reference.base.is_none());
//!
//! let reference = parse_literal("https://remote.org/fhir/Organization/o1").unwrap();
//! assert_eq!(reference.base.as_deref(), Some("https://remote.org/fhir"));
//! ```

use std::fmt;

use crate::fhir::is_known_resource_type;

const TEMPORARY_PREFIX: &str = "urn:uuid:";
const HISTORY_SEGMENT: &str = "_history";
const MAX_ID_LENGTH: usize = 64;

/// A successfully parsed literal FHIR reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FhirReference {
    /// Absolute server base without trailing slash, `None` for relative references
    pub base: Option<String>,
    /// The resource type (e.g., "Patient", "Observation")
    pub resource_type: String,
    /// The resource ID
    pub id: String,
    /// Optional version ID from `_history` suffix
    pub version: Option<String>,
}

impl FhirReference {
    /// Creates a new relative FhirReference.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            base: None,
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    /// Creates a new relative FhirReference with a version.
    pub fn with_version(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            base: None,
            resource_type: resource_type.into(),
            id: id.into(),
            version: Some(version.into()),
        }
    }

    /// Returns the reference as a relative string (Type/id).
    pub fn to_relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Returns the reference with version if present (Type/id/_history/version).
    pub fn to_versioned(&self) -> String {
        match &self.version {
            Some(v) => format!("{}/{}/{HISTORY_SEGMENT}/{}", self.resource_type, self.id, v),
            None => self.to_relative(),
        }
    }

    /// True if `local_server_base` designates the server this reference points to.
    ///
    /// Relative references always point to the local server. Trailing slashes
    /// are ignored on both sides.
    pub fn is_local_to(&self, local_server_base: &str) -> bool {
        match &self.base {
            None => true,
            Some(base) => base.trim_end_matches('/') == local_server_base.trim_end_matches('/'),
        }
    }
}

impl fmt::Display for FhirReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            Some(base) => write!(f, "{}/{}", base, self.to_versioned()),
            None => write!(f, "{}", self.to_versioned()),
        }
    }
}

/// A conditional reference split into its type and raw query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalReference {
    pub resource_type: String,
    pub query: String,
}

/// True if the value is a `urn:uuid:` placeholder with a non-empty token.
pub fn is_temporary(value: &str) -> bool {
    value
        .strip_prefix(TEMPORARY_PREFIX)
        .is_some_and(|token| !token.is_empty())
}

/// Parses `[<absoluteBase>/]<Type>/<id>[/_history/<version>]`.
///
/// Returns `None` when the value does not have literal shape or the type is not
/// in the catalogue.
pub fn parse_literal(value: &str) -> Option<FhirReference> {
    let (scheme, rest) = if let Some(rest) = value.strip_prefix("http://") {
        (Some("http://"), rest)
    } else if let Some(rest) = value.strip_prefix("https://") {
        (Some("https://"), rest)
    } else {
        (None, value)
    };

    let segments: Vec<&str> = rest.split('/').collect();

    // A versioned tail wins over a plain one, the plain one covers the rest.
    for tail_len in [4, 2] {
        if segments.len() < tail_len {
            continue;
        }
        let (base_segments, tail) = segments.split_at(segments.len() - tail_len);
        let Some(reference) = parse_tail(tail) else {
            continue;
        };

        match scheme {
            None if base_segments.is_empty() => return Some(reference),
            None => continue,
            Some(scheme) => {
                if base_segments.is_empty() || !base_segments.iter().all(|s| is_base_segment(s)) {
                    continue;
                }
                let base = format!("{scheme}{}", base_segments.join("/"));
                return Some(FhirReference {
                    base: Some(base.trim_end_matches('/').to_string()),
                    ..reference
                });
            }
        }
    }

    None
}

/// Parses `<Type>?<query>` where the type is part of the catalogue.
pub fn parse_conditional(value: &str) -> Option<ConditionalReference> {
    let (resource_type, query) = value.split_once('?')?;
    if !is_known_resource_type(resource_type) {
        return None;
    }
    Some(ConditionalReference {
        resource_type: resource_type.to_string(),
        query: query.to_string(),
    })
}

fn parse_tail(tail: &[&str]) -> Option<FhirReference> {
    match tail {
        [resource_type, id] if is_known_resource_type(resource_type) && is_id(id) => {
            Some(FhirReference::new(*resource_type, *id))
        }
        [resource_type, id, HISTORY_SEGMENT, version]
            if is_known_resource_type(resource_type) && is_id(id) && is_id(version) =>
        {
            Some(FhirReference::with_version(*resource_type, *id, *version))
        }
        _ => None,
    }
}

fn is_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_ID_LENGTH
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'.')
}

fn is_base_segment(segment: &str) -> bool {
    segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'\\' | b'.' | b':' | b'%' | b'$'))
}
