//! Resolution of located references against the local store and federated servers.
//!
//! [`ReferenceResolver::resolve`] never touches the resource. It returns a
//! [`Resolution`] that the caller applies with [`apply_resolution`].

use std::collections::HashMap;
use std::sync::Arc;

use fedfhir_core::{ReferenceType, ReferenceValue, ResourceReference, resource_type_of};
use fedfhir_storage::{SearchParams, SearchResult, StorageError, TotalMode, Transaction};
use serde_json::Value;

use super::error::ResolveError;
use super::locator;
use super::remote::RemoteReferenceChecker;

/// Search parameters that never take part in a conditional reference.
const STRIPPED_PARAMETERS: &[&str] = &["_sort", "_include", "_page", "_count", "_format", "_pretty"];

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The reference is valid as written.
    Unchanged,
    /// The reference must be replaced by a literal internal reference.
    Rewritten { reference: String },
    /// The reference was not validated.
    Skipped,
}

impl Resolution {
    #[must_use]
    pub fn is_mutated(&self) -> bool {
        matches!(self, Self::Rewritten { .. })
    }
}

/// A resource after all of its references were resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub resource: Value,
    /// True if at least one reference was rewritten
    pub mutated: bool,
}

#[derive(Clone)]
pub struct ReferenceResolver {
    local_server_base: String,
    remote: Option<Arc<dyn RemoteReferenceChecker>>,
}

impl ReferenceResolver {
    /// Creates a resolver that skips external literal references.
    pub fn new(local_server_base: impl Into<String>) -> Self {
        Self {
            local_server_base: local_server_base.into(),
            remote: None,
        }
    }

    /// Checks external literal references with `checker`.
    #[must_use]
    pub fn with_remote_checker(mut self, checker: Arc<dyn RemoteReferenceChecker>) -> Self {
        self.remote = Some(checker);
        self
    }

    pub fn local_server_base(&self) -> &str {
        &self.local_server_base
    }

    /// Resolves one occurrence found in `resource`.
    ///
    /// Lookups go through `tx` so that resources written earlier in the same
    /// transaction are visible. `id_translation` maps `urn:uuid:` full URLs of
    /// the current bundle to `Type/id`.
    pub async fn resolve(
        &self,
        resource: &Value,
        occurrence: &ResourceReference,
        tx: &dyn Transaction,
        id_translation: &HashMap<String, String>,
    ) -> Result<Resolution, ResolveError> {
        let reference_type = occurrence.classify(&self.local_server_base);
        tracing::trace!(
            resource_type = resource_type_of(resource).unwrap_or_default(),
            location = %occurrence.location,
            reference_type = %reference_type,
            "Resolving reference"
        );

        match reference_type {
            ReferenceType::Temporary => Self::resolve_temporary(occurrence, id_translation),
            ReferenceType::LiteralInternal => Self::resolve_literal_internal(occurrence, tx).await,
            ReferenceType::LiteralExternal => self.resolve_literal_external(occurrence).await,
            ReferenceType::Conditional => Self::resolve_conditional(occurrence, tx).await,
            ReferenceType::Logical => Self::resolve_logical(occurrence, tx).await,
            ReferenceType::Unknown => Err(ResolveError::unknown_reference(
                &occurrence.location,
                occurrence.raw_value().unwrap_or_default(),
            )),
            _ => Ok(Resolution::Skipped),
        }
    }

    /// Resolves every reference of `resource`. The first error aborts.
    pub async fn resolve_references(
        &self,
        resource: &Value,
        tx: &dyn Transaction,
        id_translation: &HashMap<String, String>,
    ) -> Result<ResolvedResource, ResolveError> {
        let mut resolved = resource.clone();
        let mut mutated = false;

        for occurrence in locator::locate(resource) {
            let resolution = self.resolve(resource, &occurrence, tx, id_translation).await?;
            if resolution.is_mutated() {
                resolved = apply_resolution(&resolved, &occurrence, &resolution);
                mutated = true;
            }
        }

        Ok(ResolvedResource {
            resource: resolved,
            mutated,
        })
    }

    fn resolve_temporary(
        occurrence: &ResourceReference,
        id_translation: &HashMap<String, String>,
    ) -> Result<Resolution, ResolveError> {
        let raw = occurrence.raw_value().unwrap_or_default();
        id_translation
            .get(raw)
            .map(|reference| Resolution::Rewritten {
                reference: reference.clone(),
            })
            .ok_or_else(|| ResolveError::unknown_reference(&occurrence.location, raw))
    }

    async fn resolve_literal_internal(
        occurrence: &ResourceReference,
        tx: &dyn Transaction,
    ) -> Result<Resolution, ResolveError> {
        let raw = occurrence.raw_value().unwrap_or_default();
        let literal = occurrence
            .literal()
            .ok_or_else(|| ResolveError::unknown_reference(&occurrence.location, raw))?;

        check_target_type(occurrence, tx, &literal.resource_type)?;

        let found = match &literal.version {
            Some(version) => tx.vread(&literal.resource_type, &literal.id, version).await?,
            None => tx.read(&literal.resource_type, &literal.id).await?,
        };

        match found {
            Some(_) => Ok(Resolution::Unchanged),
            None => Err(ResolveError::ReferenceTargetNotFoundLocally {
                location: occurrence.location.clone(),
                reference: literal.to_versioned(),
            }),
        }
    }

    async fn resolve_literal_external(
        &self,
        occurrence: &ResourceReference,
    ) -> Result<Resolution, ResolveError> {
        let raw = occurrence.raw_value().unwrap_or_default();
        let Some(checker) = &self.remote else {
            tracing::warn!(
                location = %occurrence.location,
                reference = %raw,
                "External reference not checked, no federation checker configured"
            );
            return Ok(Resolution::Skipped);
        };

        let literal = occurrence
            .literal()
            .ok_or_else(|| ResolveError::unknown_reference(&occurrence.location, raw))?;
        if !occurrence.supports_type(&literal.resource_type) {
            return Err(type_not_allowed(occurrence, &literal.resource_type));
        }

        checker.check(&occurrence.location, &literal).await?;
        Ok(Resolution::Unchanged)
    }

    async fn resolve_conditional(
        occurrence: &ResourceReference,
        tx: &dyn Transaction,
    ) -> Result<Resolution, ResolveError> {
        let raw = occurrence.raw_value().unwrap_or_default();
        let conditional = occurrence.conditional().ok_or_else(|| {
            ResolveError::bad_conditional_reference(&occurrence.location, raw, "not a conditional reference")
        })?;

        let mut params = SearchParams::from_query(&conditional.query);
        for name in STRIPPED_PARAMETERS {
            if params.remove_param(name).is_some() {
                tracing::warn!(
                    location = %occurrence.location,
                    parameter = %name,
                    "Removing parameter from conditional reference"
                );
            }
        }
        if params.is_empty() {
            return Err(ResolveError::bad_conditional_reference(
                &occurrence.location,
                raw,
                "no search parameters",
            ));
        }

        check_target_type(occurrence, tx, &conditional.resource_type)?;

        let result = search_one(tx, &conditional.resource_type, params)
            .await
            .map_err(|e| match e {
                StorageError::UnsupportedSearchParameter { .. } => {
                    ResolveError::bad_conditional_reference(&occurrence.location, raw, e.to_string())
                }
                other => other.into(),
            })?;

        match single_match(&result) {
            Ok(reference) => Ok(Resolution::Rewritten { reference }),
            Err(0) => Err(ResolveError::ReferenceTargetNotFoundLocallyByCondition {
                location: occurrence.location.clone(),
                condition: raw.to_string(),
            }),
            Err(count) => Err(ResolveError::ReferenceTargetMultipleMatchesLocallyByCondition {
                location: occurrence.location.clone(),
                condition: raw.to_string(),
                count,
            }),
        }
    }

    async fn resolve_logical(
        occurrence: &ResourceReference,
        tx: &dyn Transaction,
    ) -> Result<Resolution, ResolveError> {
        let (resource_type, token) = occurrence
            .reference()
            .and_then(|r| {
                let token = r.identifier.as_ref()?.to_token()?;
                Some((r.type_.clone()?, token))
            })
            .ok_or_else(|| ResolveError::unknown_reference(&occurrence.location, ""))?;

        check_target_type(occurrence, tx, &resource_type)?;

        let params = SearchParams::new().with_param("identifier", token.clone());
        let result = search_one(tx, &resource_type, params).await?;

        match single_match(&result) {
            Ok(reference) => Ok(Resolution::Rewritten { reference }),
            Err(0) => Err(ResolveError::ReferenceTargetNotFoundLocallyByIdentifier {
                location: occurrence.location.clone(),
                resource_type,
                identifier: token,
            }),
            Err(count) => Err(ResolveError::ReferenceTargetMultipleMatchesLocallyByIdentifier {
                location: occurrence.location.clone(),
                resource_type,
                identifier: token,
                count,
            }),
        }
    }
}

impl std::fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("local_server_base", &self.local_server_base)
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

/// Writes a rewritten reference into a copy of `resource`.
///
/// `Unchanged` and `Skipped` return an identical copy. Logical references keep
/// their identifier next to the new literal.
pub fn apply_resolution(
    resource: &Value,
    occurrence: &ResourceReference,
    resolution: &Resolution,
) -> Value {
    let mut updated = resource.clone();
    let Resolution::Rewritten { reference } = resolution else {
        return updated;
    };

    let field = match occurrence.value {
        ReferenceValue::Reference(_) => "reference",
        ReferenceValue::RelatedArtifact { .. } | ReferenceValue::Attachment { .. } => "url",
    };
    if let Some(element) = updated
        .pointer_mut(&occurrence.pointer)
        .and_then(Value::as_object_mut)
    {
        element.insert(field.to_string(), Value::String(reference.clone()));
    }
    updated
}

fn check_target_type(
    occurrence: &ResourceReference,
    tx: &dyn Transaction,
    resource_type: &str,
) -> Result<(), ResolveError> {
    if !tx.supports_resource_type(resource_type) {
        return Err(ResolveError::UnsupportedReferenceTargetType {
            location: occurrence.location.clone(),
            resource_type: resource_type.to_string(),
        });
    }
    if !occurrence.supports_type(resource_type) {
        return Err(type_not_allowed(occurrence, resource_type));
    }
    Ok(())
}

fn type_not_allowed(occurrence: &ResourceReference, resource_type: &str) -> ResolveError {
    ResolveError::ReferenceTargetTypeNotSupportedByResource {
        location: occurrence.location.clone(),
        resource_type: resource_type.to_string(),
        allowed: occurrence.allowed_target_types.clone(),
    }
}

async fn search_one(
    tx: &dyn Transaction,
    resource_type: &str,
    params: SearchParams,
) -> Result<SearchResult, StorageError> {
    let params = params
        .with_count(1)
        .with_offset(0)
        .with_total(TotalMode::Accurate);
    tx.search(resource_type, &params).await
}

/// `Type/id` of the only match, or the match count.
fn single_match(result: &SearchResult) -> Result<String, u32> {
    let total = result
        .total
        .unwrap_or_else(|| u32::try_from(result.len()).unwrap_or(u32::MAX));
    match (total, result.entries.first()) {
        (1, Some(found)) => Ok(found.relative_url()),
        (1, None) => Err(0),
        (count, _) => Err(count),
    }
}
