//! Located references and their classification.
//!
//! A [`ResourceReference`] is one reference-like element found inside a
//! resource: a `Reference`, a `RelatedArtifact.url` or an `Attachment.url`.
//! [`ResourceReference::classify`] maps it to a [`ReferenceType`] without any
//! I/O, given the base URL of the local server.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fhir_reference::{self, ConditionalReference, FhirReference};

/// Classification of a located reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// `urn:uuid:` placeholder for a resource created in the same bundle
    Temporary,
    /// `Type/id` on the local server, relative or absolute
    LiteralInternal,
    /// `Type/id` on another server
    LiteralExternal,
    /// `Type?query` resolved by search
    Conditional,
    /// `type` + `identifier` without a reference string
    Logical,
    Unknown,

    RelatedArtifactTemporaryUrl,
    RelatedArtifactLiteralInternalUrl,
    RelatedArtifactLiteralExternalUrl,
    RelatedArtifactConditionalUrl,
    RelatedArtifactUnknownUrl,

    AttachmentTemporaryUrl,
    AttachmentLiteralInternalUrl,
    AttachmentLiteralExternalUrl,
    AttachmentConditionalUrl,
    AttachmentUnknownUrl,
}

impl ReferenceType {
    /// True for the variants that carry a base URL of another server.
    pub fn is_external(self) -> bool {
        matches!(
            self,
            Self::LiteralExternal
                | Self::RelatedArtifactLiteralExternalUrl
                | Self::AttachmentLiteralExternalUrl
        )
    }

    /// True for related-artifact and attachment URL variants.
    pub fn is_url_variant(self) -> bool {
        !matches!(
            self,
            Self::Temporary
                | Self::LiteralInternal
                | Self::LiteralExternal
                | Self::Conditional
                | Self::Logical
                | Self::Unknown
        )
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Temporary => "TEMPORARY",
            Self::LiteralInternal => "LITERAL_INTERNAL",
            Self::LiteralExternal => "LITERAL_EXTERNAL",
            Self::Conditional => "CONDITIONAL",
            Self::Logical => "LOGICAL",
            Self::Unknown => "UNKNOWN",
            Self::RelatedArtifactTemporaryUrl => "RELATED_ARTIFACT_TEMPORARY_URL",
            Self::RelatedArtifactLiteralInternalUrl => "RELATED_ARTIFACT_LITERAL_INTERNAL_URL",
            Self::RelatedArtifactLiteralExternalUrl => "RELATED_ARTIFACT_LITERAL_EXTERNAL_URL",
            Self::RelatedArtifactConditionalUrl => "RELATED_ARTIFACT_CONDITIONAL_URL",
            Self::RelatedArtifactUnknownUrl => "RELATED_ARTIFACT_UNKNOWN_URL",
            Self::AttachmentTemporaryUrl => "ATTACHMENT_TEMPORARY_URL",
            Self::AttachmentLiteralInternalUrl => "ATTACHMENT_LITERAL_INTERNAL_URL",
            Self::AttachmentLiteralExternalUrl => "ATTACHMENT_LITERAL_EXTERNAL_URL",
            Self::AttachmentConditionalUrl => "ATTACHMENT_CONDITIONAL_URL",
            Self::AttachmentUnknownUrl => "ATTACHMENT_UNKNOWN_URL",
        };
        f.write_str(s)
    }
}

/// FHIR `Identifier`, reduced to the fields reference matching needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Identifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            value: Some(value.into()),
        }
    }

    /// `system|value` when both parts are present and non-empty.
    pub fn to_token(&self) -> Option<String> {
        match (non_blank(&self.system), non_blank(&self.value)) {
            (Some(system), Some(value)) => Some(format!("{system}|{value}")),
            _ => None,
        }
    }
}

/// FHIR `Reference` datatype.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
}

impl Reference {
    pub fn literal(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Default::default()
        }
    }

    pub fn logical(resource_type: impl Into<String>, identifier: Identifier) -> Self {
        Self {
            reference: None,
            type_: Some(resource_type.into()),
            identifier: Some(identifier),
        }
    }
}

/// The element a located reference was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceValue {
    Reference(Reference),
    RelatedArtifact { url: Option<String> },
    Attachment { url: Option<String> },
}

/// One reference found inside a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceReference {
    /// Dotted structural label, e.g. `Patient.generalPractitioner`
    pub location: String,
    /// JSON pointer to the element inside the resource
    pub pointer: String,
    pub value: ReferenceValue,
    /// Allowed target types, empty when unrestricted
    pub allowed_target_types: Vec<String>,
}

impl ResourceReference {
    pub fn new(
        location: impl Into<String>,
        pointer: impl Into<String>,
        value: ReferenceValue,
        allowed_target_types: Vec<String>,
    ) -> Self {
        Self {
            location: location.into(),
            pointer: pointer.into(),
            value,
            allowed_target_types,
        }
    }

    /// Reference occurrence without a pointer, mostly useful in tests.
    pub fn from_reference(location: impl Into<String>, reference: Reference) -> Self {
        Self::new(location, "", ReferenceValue::Reference(reference), Vec::new())
    }

    #[must_use]
    pub fn with_allowed_target_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_target_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn reference(&self) -> Option<&Reference> {
        match &self.value {
            ReferenceValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// The raw string that gets classified: the reference string or the URL.
    pub fn raw_value(&self) -> Option<&str> {
        match &self.value {
            ReferenceValue::Reference(r) => non_blank(&r.reference),
            ReferenceValue::RelatedArtifact { url } | ReferenceValue::Attachment { url } => {
                non_blank(url)
            }
        }
    }

    /// True if `resource_type` is an allowed target, or no restriction exists.
    pub fn supports_type(&self, resource_type: &str) -> bool {
        self.allowed_target_types.is_empty()
            || self.allowed_target_types.iter().any(|t| t == resource_type)
    }

    pub fn literal(&self) -> Option<FhirReference> {
        self.raw_value().and_then(fhir_reference::parse_literal)
    }

    pub fn conditional(&self) -> Option<ConditionalReference> {
        self.raw_value().and_then(fhir_reference::parse_conditional)
    }

    /// Determines the reference type relative to `local_server_base`.
    ///
    /// Rules are tried in order: temporary, literal, conditional, logical.
    /// Related-artifact and attachment URLs skip the logical rule.
    pub fn classify(&self, local_server_base: &str) -> ReferenceType {
        let ladder = match &self.value {
            ReferenceValue::Reference(_) => Ladder::REFERENCE,
            ReferenceValue::RelatedArtifact { .. } => Ladder::RELATED_ARTIFACT,
            ReferenceValue::Attachment { .. } => Ladder::ATTACHMENT,
        };

        if let Some(raw) = self.raw_value() {
            if fhir_reference::is_temporary(raw) {
                return ladder.temporary;
            }
            if let Some(literal) = fhir_reference::parse_literal(raw) {
                return if literal.is_local_to(local_server_base) {
                    ladder.internal
                } else {
                    ladder.external
                };
            }
            if fhir_reference::parse_conditional(raw).is_some() {
                return ladder.conditional;
            }
            return ladder.unknown;
        }

        match &self.value {
            ReferenceValue::Reference(r) if is_logical(r) => ReferenceType::Logical,
            _ => ladder.unknown,
        }
    }

    /// Base URL of an external literal without trailing slash, otherwise empty.
    pub fn server_base(&self, local_server_base: &str) -> String {
        if !self.classify(local_server_base).is_external() {
            return String::new();
        }
        self.literal()
            .and_then(|l| l.base)
            .map(|b| b.trim_end_matches('/').to_string())
            .unwrap_or_default()
    }
}

struct Ladder {
    temporary: ReferenceType,
    internal: ReferenceType,
    external: ReferenceType,
    conditional: ReferenceType,
    unknown: ReferenceType,
}

impl Ladder {
    const REFERENCE: Ladder = Ladder {
        temporary: ReferenceType::Temporary,
        internal: ReferenceType::LiteralInternal,
        external: ReferenceType::LiteralExternal,
        conditional: ReferenceType::Conditional,
        unknown: ReferenceType::Unknown,
    };
    const RELATED_ARTIFACT: Ladder = Ladder {
        temporary: ReferenceType::RelatedArtifactTemporaryUrl,
        internal: ReferenceType::RelatedArtifactLiteralInternalUrl,
        external: ReferenceType::RelatedArtifactLiteralExternalUrl,
        conditional: ReferenceType::RelatedArtifactConditionalUrl,
        unknown: ReferenceType::RelatedArtifactUnknownUrl,
    };
    const ATTACHMENT: Ladder = Ladder {
        temporary: ReferenceType::AttachmentTemporaryUrl,
        internal: ReferenceType::AttachmentLiteralInternalUrl,
        external: ReferenceType::AttachmentLiteralExternalUrl,
        conditional: ReferenceType::AttachmentConditionalUrl,
        unknown: ReferenceType::AttachmentUnknownUrl,
    };
}

fn is_logical(reference: &Reference) -> bool {
    non_blank(&reference.type_).is_some()
        && reference
            .identifier
            .as_ref()
            .and_then(Identifier::to_token)
            .is_some()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_BASE: &str = "http://foo.bar/baz";

    fn reference(value: &str) -> ResourceReference {
        ResourceReference::from_reference("Test.reference", Reference::literal(value))
    }

    fn related_artifact(url: &str) -> ResourceReference {
        ResourceReference::new(
            "Test.relatedArtifact",
            "",
            ReferenceValue::RelatedArtifact {
                url: Some(url.to_string()),
            },
            Vec::new(),
        )
    }

    fn attachment(url: &str) -> ResourceReference {
        ResourceReference::new(
            "Test.content",
            "",
            ReferenceValue::Attachment {
                url: Some(url.to_string()),
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_temporary() {
        let r = reference("urn:uuid:11111111-1111-1111-1111-111111111111");
        assert_eq!(r.classify(SERVER_BASE), ReferenceType::Temporary);
    }

    #[test]
    fn test_literal_internal() {
        assert_eq!(reference("Patient/1").classify(SERVER_BASE), ReferenceType::LiteralInternal);
        assert_eq!(
            reference("Patient/1/_history/3").classify(SERVER_BASE),
            ReferenceType::LiteralInternal
        );
        assert_eq!(
            reference("http://foo.bar/baz/Patient/1").classify(SERVER_BASE),
            ReferenceType::LiteralInternal
        );
        assert_eq!(
            reference("http://foo.bar/baz/Patient/1").classify("http://foo.bar/baz/"),
            ReferenceType::LiteralInternal
        );
    }

    #[test]
    fn test_literal_external() {
        let r = reference("https://remote.org/fhir/Organization/o1");
        assert_eq!(r.classify(SERVER_BASE), ReferenceType::LiteralExternal);
        assert_eq!(r.server_base(SERVER_BASE), "https://remote.org/fhir");
    }

    #[test]
    fn test_conditional() {
        let r = reference("Patient?identifier=http://sys|1");
        assert_eq!(r.classify(SERVER_BASE), ReferenceType::Conditional);
        assert_eq!(r.server_base(SERVER_BASE), "");
    }

    #[test]
    fn test_logical() {
        let r = ResourceReference::from_reference(
            "Task.owner",
            Reference::logical("Organization", Identifier::new("http://sys", "org-1")),
        );
        assert_eq!(r.classify(SERVER_BASE), ReferenceType::Logical);
    }

    #[test]
    fn test_logical_requires_type_and_full_identifier() {
        let no_type = ResourceReference::from_reference(
            "Task.owner",
            Reference {
                identifier: Some(Identifier::new("http://sys", "org-1")),
                ..Default::default()
            },
        );
        assert_eq!(no_type.classify(SERVER_BASE), ReferenceType::Unknown);

        let no_system = ResourceReference::from_reference(
            "Task.owner",
            Reference::logical(
                "Organization",
                Identifier {
                    system: None,
                    value: Some("org-1".into()),
                },
            ),
        );
        assert_eq!(no_system.classify(SERVER_BASE), ReferenceType::Unknown);
    }

    #[test]
    fn test_reference_string_wins_over_identifier() {
        let r = ResourceReference::from_reference(
            "Task.owner",
            Reference {
                reference: Some("Organization/o1".into()),
                type_: Some("Organization".into()),
                identifier: Some(Identifier::new("http://sys", "org-1")),
            },
        );
        assert_eq!(r.classify(SERVER_BASE), ReferenceType::LiteralInternal);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(reference("Patient/x/foo").classify(SERVER_BASE), ReferenceType::Unknown);
        assert_eq!(reference("?foo=bar").classify(SERVER_BASE), ReferenceType::Unknown);
        assert_eq!(reference("#contained").classify(SERVER_BASE), ReferenceType::Unknown);
        assert_eq!(
            ResourceReference::from_reference("Test.reference", Reference::default())
                .classify(SERVER_BASE),
            ReferenceType::Unknown
        );
    }

    #[test]
    fn test_related_artifact_urls() {
        let cases = [
            (
                "urn:uuid:11111111-1111-1111-1111-111111111111",
                ReferenceType::RelatedArtifactTemporaryUrl,
            ),
            ("Library/l1", ReferenceType::RelatedArtifactLiteralInternalUrl),
            (
                "http://other/fhir/Library/l1",
                ReferenceType::RelatedArtifactLiteralExternalUrl,
            ),
            ("Library?url=http://x", ReferenceType::RelatedArtifactConditionalUrl),
            (SERVER_BASE, ReferenceType::RelatedArtifactUnknownUrl),
            ("foo.bar", ReferenceType::RelatedArtifactUnknownUrl),
            (
                "11111111-1111-1111-1111-111111111111",
                ReferenceType::RelatedArtifactUnknownUrl,
            ),
        ];

        for (url, expected) in cases {
            assert_eq!(related_artifact(url).classify(SERVER_BASE), expected, "{url}");
        }
    }

    #[test]
    fn test_attachment_urls() {
        let cases = [
            (
                "urn:uuid:11111111-1111-1111-1111-111111111111",
                ReferenceType::AttachmentTemporaryUrl,
            ),
            ("Binary/b1", ReferenceType::AttachmentLiteralInternalUrl),
            (
                "https://other/fhir/Binary/b1",
                ReferenceType::AttachmentLiteralExternalUrl,
            ),
            ("Binary?_id=b1", ReferenceType::AttachmentConditionalUrl),
            (SERVER_BASE, ReferenceType::AttachmentUnknownUrl),
            ("foo.bar", ReferenceType::AttachmentUnknownUrl),
        ];

        for (url, expected) in cases {
            assert_eq!(attachment(url).classify(SERVER_BASE), expected, "{url}");
        }
    }

    #[test]
    fn test_missing_url_is_unknown_variant() {
        let r = ResourceReference::new(
            "Test.relatedArtifact",
            "",
            ReferenceValue::RelatedArtifact { url: None },
            Vec::new(),
        );
        assert_eq!(r.classify(SERVER_BASE), ReferenceType::RelatedArtifactUnknownUrl);
    }

    #[test]
    fn test_server_base_for_external_url_variants() {
        let r = related_artifact("http://other.org/fhir/Library/l1");
        assert_eq!(r.server_base(SERVER_BASE), "http://other.org/fhir");
        let r = attachment("http://other.org/fhir/Binary/b1/_history/2");
        assert_eq!(r.server_base(SERVER_BASE), "http://other.org/fhir");
        assert_eq!(reference("Patient/1").server_base(SERVER_BASE), "");
    }

    #[test]
    fn test_supports_type() {
        let r = reference("Patient/1");
        assert!(r.supports_type("Anything"));
        let r = r.with_allowed_target_types(["Organization"]);
        assert!(r.supports_type("Organization"));
        assert!(!r.supports_type("Patient"));
    }

    #[test]
    fn test_reference_serde() {
        let json = serde_json::json!({
            "reference": "Patient/1",
            "type": "Patient",
            "identifier": {"system": "http://sys", "value": "1"},
            "display": "ignored"
        });
        let r: Reference = serde_json::from_value(json).unwrap();
        assert_eq!(r.type_.as_deref(), Some("Patient"));
        assert_eq!(r.identifier.unwrap().to_token().as_deref(), Some("http://sys|1"));
    }

    #[test]
    fn test_reference_type_display() {
        assert_eq!(ReferenceType::LiteralInternal.to_string(), "LITERAL_INTERNAL");
        assert_eq!(
            ReferenceType::RelatedArtifactTemporaryUrl.to_string(),
            "RELATED_ARTIFACT_TEMPORARY_URL"
        );
        assert!(ReferenceType::AttachmentUnknownUrl.is_url_variant());
        assert!(!ReferenceType::Logical.is_url_variant());
    }
}
