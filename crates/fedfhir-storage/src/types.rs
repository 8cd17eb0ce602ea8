//! Values exchanged with a store: stored resources, search input and output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;

/// One version of a resource as held by a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    pub id: String,
    pub version_id: String,
    pub resource_type: String,
    /// Full document, `meta.versionId` included.
    pub resource: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    /// Creation time of the first version.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl StoredResource {
    /// First version, created now.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        version_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource: Value,
    ) -> Self {
        let created_at = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            version_id: version_id.into(),
            resource_type: resource_type.into(),
            resource,
            last_updated: created_at,
            created_at,
        }
    }

    /// Literal reference target, `Type/id`.
    #[must_use]
    pub fn relative_url(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// `Type/id/_history/vid`, as returned in bundle response locations.
    #[must_use]
    pub fn versioned_url(&self) -> String {
        format!("{}/_history/{}", self.relative_url(), self.version_id)
    }
}

/// A page of matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub entries: Vec<StoredResource>,
    /// Number of matches across all pages, when the store counted them.
    pub total: Option<u32>,
    pub has_more: bool,
}

impl SearchResult {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries(entries: Vec<StoredResource>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_total(self, total: u32) -> Self {
        Self {
            total: Some(total),
            ..self
        }
    }

    #[must_use]
    pub fn with_has_more(self, has_more: bool) -> Self {
        Self { has_more, ..self }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Search input. Repeated values of one parameter are alternatives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    pub parameters: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<TotalMode>,
}

impl SearchParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the criteria part of a conditional reference or request url,
    /// e.g. `identifier=http%3A%2F%2Fsys%7C42`. Pairs with an empty name are
    /// dropped.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if !key.is_empty() {
                params = params.with_param(key, value);
            }
        }
        params
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    #[must_use]
    pub fn with_count(self, count: u32) -> Self {
        Self {
            count: Some(count),
            ..self
        }
    }

    #[must_use]
    pub fn with_offset(self, offset: u32) -> Self {
        Self {
            offset: Some(offset),
            ..self
        }
    }

    #[must_use]
    pub fn with_total(self, mode: TotalMode) -> Self {
        Self {
            total: Some(mode),
            ..self
        }
    }

    /// Takes a parameter out, e.g. result modifiers that do not narrow the match.
    pub fn remove_param(&mut self, key: &str) -> Option<Vec<String>> {
        self.parameters.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// `_total` handling. Match counting relies on `Accurate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalMode {
    Accurate,
    #[default]
    None,
}
