//! Search parameter evaluation over JSON resources.
//!
//! Supported parameters:
//! - `_id`: exact match on the logical id
//! - `url`, `version`, `name`, `status`: exact match on the top-level string field
//! - `identifier`: token match (`system|value`, `|value`, `system|` or `value`)
//!
//! Comma separated values and repeated parameters are OR conditions, `\,` is
//! a literal comma. Distinct parameters are AND conditions.

use fedfhir_storage::{SearchParams, SearchResult, StorageError, StoredResource};
use serde_json::Value;

const STRING_PARAMS: &[&str] = &["url", "version", "name", "status"];

/// A compiled search: validated parameters for one resource type.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    resource_type: String,
    filters: Vec<(String, Vec<String>)>,
    offset: usize,
    count: Option<usize>,
}

impl SearchQuery {
    /// Validates `params` for `resource_type`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::UnsupportedSearchParameter` for unknown parameters.
    pub fn compile(resource_type: &str, params: &SearchParams) -> Result<Self, StorageError> {
        let mut filters = Vec::with_capacity(params.parameters.len());
        for (name, values) in &params.parameters {
            if !is_supported(name) {
                return Err(StorageError::unsupported_search_parameter(resource_type, name));
            }
            let alternatives = values.iter().flat_map(|v| split_alternatives(v)).collect();
            filters.push((name.clone(), alternatives));
        }

        Ok(Self {
            resource_type: resource_type.to_string(),
            filters,
            offset: params.offset.unwrap_or(0) as usize,
            count: params.count.map(|c| c as usize),
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// True if the resource satisfies every filter.
    pub fn matches(&self, resource: &StoredResource) -> bool {
        resource.resource_type == self.resource_type
            && self.filters.iter().all(|(name, alternatives)| {
                alternatives
                    .iter()
                    .any(|value| matches_param(resource, name, value))
            })
    }

    /// Filters, sorts by id and paginates. `total` is always the full match count.
    pub fn execute<I>(&self, candidates: I) -> SearchResult
    where
        I: IntoIterator<Item = StoredResource>,
    {
        let mut matched: Vec<StoredResource> =
            candidates.into_iter().filter(|r| self.matches(r)).collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));

        let total = matched.len();
        let page: Vec<StoredResource> = matched
            .into_iter()
            .skip(self.offset)
            .take(self.count.unwrap_or(usize::MAX))
            .collect();
        let has_more = self.offset + page.len() < total;

        SearchResult::with_entries(page)
            .with_total(u32::try_from(total).unwrap_or(u32::MAX))
            .with_has_more(has_more)
    }
}

/// Splits on unescaped commas. `\,` becomes `,`; other escapes are kept
/// verbatim so `\\` before a comma still ends the value.
fn split_alternatives(value: &str) -> Vec<String> {
    let mut alternatives = Vec::new();
    let mut current = String::new();
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(',') => current.push(','),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            ',' => alternatives.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    alternatives.push(current);
    alternatives
}

fn is_supported(name: &str) -> bool {
    name == "_id" || name == "identifier" || STRING_PARAMS.contains(&name)
}

fn matches_param(resource: &StoredResource, name: &str, value: &str) -> bool {
    match name {
        "_id" => resource.id == value,
        "identifier" => identifiers(&resource.resource).any(|i| matches_token(i, value)),
        field => resource.resource.get(field).and_then(Value::as_str) == Some(value),
    }
}

fn identifiers(resource: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match resource.get("identifier") {
        Some(Value::Array(items)) => Box::new(items.iter()),
        Some(item @ Value::Object(_)) => Box::new(std::iter::once(item)),
        _ => Box::new(std::iter::empty()),
    }
}

fn matches_token(identifier: &Value, token: &str) -> bool {
    let system = identifier.get("system").and_then(Value::as_str);
    let value = identifier.get("value").and_then(Value::as_str);

    match token.split_once('|') {
        Some(("", v)) => system.is_none() && value == Some(v),
        Some((s, "")) => system == Some(s),
        Some((s, v)) => system == Some(s) && value == Some(v),
        None => value == Some(token),
    }
}
