//! Identity of process-plugin resources.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use fedfhir_core::resource_type_of;
use serde_json::Value;
use uuid::Uuid;

use super::error::ReconcileError;

/// Resource types a process plugin may declare.
pub const PROCESS_RESOURCE_TYPES: &[&str] = &[
    "ActivityDefinition",
    "CodeSystem",
    "NamingSystem",
    "Questionnaire",
    "StructureDefinition",
    "ValueSet",
];

/// How a process-plugin resource is found on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Criteria {
    /// `NamingSystem` is matched by name.
    Name(String),
    UrlVersion { url: String, version: String },
}

/// A process-plugin resource identified by its criteria.
///
/// Equality, hashing and ordering ignore `resource_id`.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub resource_type: String,
    pub criteria: Criteria,
    pub resource_id: Option<Uuid>,
}

impl ResourceInfo {
    pub fn with_url_and_version(
        resource_type: impl Into<String>,
        url: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            criteria: Criteria::UrlVersion {
                url: url.into(),
                version: version.into(),
            },
            resource_id: None,
        }
    }

    pub fn naming_system(name: impl Into<String>) -> Self {
        Self {
            resource_type: "NamingSystem".to_string(),
            criteria: Criteria::Name(name.into()),
            resource_id: None,
        }
    }

    #[must_use]
    pub fn with_resource_id(mut self, id: Option<Uuid>) -> Self {
        self.resource_id = id;
        self
    }

    /// Builds the identity of a declared resource.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResource` for unsupported types and missing criteria fields.
    pub fn from_resource(resource: &Value) -> Result<Self, ReconcileError> {
        let resource_type = resource_type_of(resource)
            .ok_or_else(|| ReconcileError::invalid_resource("missing resourceType"))?;
        if !PROCESS_RESOURCE_TYPES.contains(&resource_type) {
            return Err(ReconcileError::invalid_resource(format!(
                "{resource_type} is not a supported process plugin resource"
            )));
        }

        let field = |name: &str| {
            resource
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ReconcileError::invalid_resource(format!("{resource_type}.{name} missing"))
                })
        };

        if resource_type == "NamingSystem" {
            Ok(Self::naming_system(field("name")?))
        } else {
            Ok(Self::with_url_and_version(
                resource_type,
                field("url")?,
                field("version")?,
            ))
        }
    }

    /// `name=<name>` or `url=<url>&version=<version>`
    pub fn to_conditional_url(&self) -> String {
        match &self.criteria {
            Criteria::Name(name) => format!("name={name}"),
            Criteria::UrlVersion { url, version } => format!("url={url}&version={version}"),
        }
    }

    /// `<Type>?<conditional url>`
    pub fn to_search_url(&self) -> String {
        format!("{}?{}", self.resource_type, self.to_conditional_url())
    }

    pub fn has_resource_id(&self) -> bool {
        self.resource_id.is_some()
    }
}

impl PartialEq for ResourceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type && self.criteria == other.criteria
    }
}

impl Eq for ResourceInfo {}

impl Hash for ResourceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_type.hash(state);
        self.criteria.hash(state);
    }
}

impl PartialOrd for ResourceInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.resource_type
            .cmp(&other.resource_type)
            .then_with(|| self.criteria.cmp(&other.criteria))
    }
}

impl fmt::Display for ResourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_search_url())
    }
}
