//! Execution of batch bundles against the local FHIR server.
//!
//! [`HttpBatchClient`] posts the bundle to the server's base URL.
//! [`StorageBatchExecutor`] applies it in-process against a [`DynStorage`].
//! Both return a `batch-response` bundle with one entry per request entry.

use std::time::Duration;

use async_trait::async_trait;
use fedfhir_storage::{
    DynStorage, SearchParams, StorageError, StoredResource, TotalMode, Transaction,
};
use reqwest::StatusCode;
use serde_json::{Value, json};

use super::error::ReconcileError;

/// Value of the `Prefer` header sent with a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnPreference {
    /// `Prefer: return=minimal`, written resources are left out of the response
    Minimal,
    #[default]
    Representation,
}

impl ReturnPreference {
    fn header_value(self) -> &'static str {
        match self {
            Self::Minimal => "return=minimal",
            Self::Representation => "return=representation",
        }
    }
}

#[async_trait]
pub trait BatchExecutor: Send + Sync {
    /// Executes a `batch` bundle and returns the `batch-response` bundle.
    async fn execute(
        &self,
        bundle: &Value,
        preference: ReturnPreference,
    ) -> Result<Value, ReconcileError>;
}

/// Retry and timeout settings of [`HttpBatchClient`].
#[derive(Debug, Clone)]
pub struct BatchClientConfig {
    /// Retries after the first attempt, `-1` retries forever (default: 3).
    pub max_retries: i32,

    /// Fixed delay between attempts (default: 5 seconds).
    pub retry_delay: Duration,

    /// HTTP request timeout (default: 30 seconds).
    pub request_timeout: Duration,
}

impl Default for BatchClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BatchClientConfig {
    pub const RETRY_FOREVER: i32 = -1;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Retry count after one more attempt, `None` once the budget is spent.
    /// Saturates so retrying forever cannot overflow.
    fn next_retry(&self, retries_done: i32) -> Option<i32> {
        (self.max_retries == Self::RETRY_FOREVER || retries_done < self.max_retries)
            .then(|| retries_done.saturating_add(1))
    }
}

/// Posts batch bundles to a FHIR server base URL.
pub struct HttpBatchClient {
    http_client: reqwest::Client,
    base_url: String,
    config: BatchClientConfig,
}

impl HttpBatchClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, config: BatchClientConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BatchExecutor for HttpBatchClient {
    async fn execute(
        &self,
        bundle: &Value,
        preference: ReturnPreference,
    ) -> Result<Value, ReconcileError> {
        let mut retries = 0;
        loop {
            let outcome = self
                .http_client
                .post(&self.base_url)
                .header("Content-Type", "application/fhir+json")
                .header("Accept", "application/fhir+json")
                .header("Prefer", preference.header_value())
                .json(bundle)
                .send()
                .await;

            let error = match outcome {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json::<Value>().await?);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    let error = ReconcileError::Http { status, body };
                    if status < 500 {
                        return Err(error);
                    }
                    error
                }
                Err(e) if e.is_connect() || e.is_timeout() => ReconcileError::Transport(e),
                Err(e) => return Err(ReconcileError::Transport(e)),
            };

            retries = match self.config.next_retry(retries) {
                Some(next) => next,
                None => return Err(error),
            };
            tracing::warn!(
                base_url = %self.base_url,
                retry = retries,
                max_retries = self.config.max_retries,
                error = %error,
                "Batch request failed, retrying"
            );
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}

/// Applies batch bundles in-process, one storage transaction per bundle.
///
/// Supports conditional create (`ifNoneExist`), update and delete by id or
/// by search, and searches (`GET Type?query`, honouring `_count`). A failing
/// entry yields an error status without affecting the other entries.
#[derive(Clone)]
pub struct StorageBatchExecutor {
    storage: DynStorage,
}

impl StorageBatchExecutor {
    pub fn new(storage: DynStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl BatchExecutor for StorageBatchExecutor {
    async fn execute(
        &self,
        bundle: &Value,
        preference: ReturnPreference,
    ) -> Result<Value, ReconcileError> {
        if bundle.get("type").and_then(Value::as_str) != Some("batch") {
            return Err(ReconcileError::invalid_resource("expected a bundle of type batch"));
        }
        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut tx = self.storage.begin_transaction().await?;
        let mut responses = Vec::with_capacity(entries.len());
        for entry in entries {
            let response = match execute_entry(tx.as_mut(), entry, preference).await {
                Ok(response) => response,
                Err(e) => error_entry(&e),
            };
            responses.push(response);
        }
        tx.commit().await?;

        Ok(json!({
            "resourceType": "Bundle",
            "type": "batch-response",
            "entry": responses
        }))
    }
}

async fn execute_entry(
    tx: &mut dyn Transaction,
    entry: &Value,
    preference: ReturnPreference,
) -> Result<Value, StorageError> {
    let request = entry
        .get("request")
        .ok_or_else(|| StorageError::invalid_resource("entry.request missing"))?;
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let url = request.get("url").and_then(Value::as_str).unwrap_or_default();
    let target = RequestTarget::parse(url)?;
    let resource = entry.get("resource");

    match (method, &target) {
        ("GET", RequestTarget::Search { resource_type, query }) => {
            search_entry(tx, resource_type, query).await
        }
        ("POST", RequestTarget::Type { resource_type }) => {
            let resource = require_resource(resource, resource_type)?;
            let if_none_exist = request.get("ifNoneExist").and_then(Value::as_str);
            if let Some(query) = if_none_exist {
                match find_matches(tx, resource_type, query).await?.as_slice() {
                    [] => {}
                    [existing] => return Ok(write_entry(StatusCode::OK, existing, preference)),
                    _ => return Err(StorageError::multiple_matches(resource_type.as_str(), query)),
                }
            }
            let mut body = resource.clone();
            if let Some(obj) = body.as_object_mut() {
                obj.remove("id");
            }
            let created = tx.create(&body).await?;
            Ok(write_entry(StatusCode::CREATED, &created, preference))
        }
        ("PUT", RequestTarget::Instance { resource_type, id }) => {
            let resource = require_resource(resource, resource_type)?;
            update_by_id(tx, resource, resource_type, id, preference).await
        }
        ("PUT", RequestTarget::Search { resource_type, query }) => {
            let resource = require_resource(resource, resource_type)?;
            match find_matches(tx, resource_type, query).await?.as_slice() {
                [] => {
                    let created = tx.create(resource).await?;
                    Ok(write_entry(StatusCode::CREATED, &created, preference))
                }
                [existing] => {
                    update_by_id(tx, resource, resource_type, &existing.id, preference).await
                }
                _ => Err(StorageError::multiple_matches(resource_type.as_str(), query.as_str())),
            }
        }
        ("DELETE", RequestTarget::Instance { resource_type, id }) => {
            tx.delete(resource_type, id).await?;
            Ok(status_entry(StatusCode::OK))
        }
        ("DELETE", RequestTarget::Search { resource_type, query }) => {
            match find_matches(tx, resource_type, query).await?.as_slice() {
                [] => Ok(status_entry(StatusCode::NO_CONTENT)),
                [existing] => {
                    tx.delete(resource_type, &existing.id).await?;
                    Ok(status_entry(StatusCode::OK))
                }
                _ => Err(StorageError::multiple_matches(resource_type.as_str(), query.as_str())),
            }
        }
        _ => Err(StorageError::invalid_resource(format!(
            "unsupported batch request {method} {url}"
        ))),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RequestTarget {
    Type { resource_type: String },
    Instance { resource_type: String, id: String },
    Search { resource_type: String, query: String },
}

impl RequestTarget {
    fn parse(url: &str) -> Result<Self, StorageError> {
        let url = url.trim_start_matches('/');
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (segments.as_slice(), query) {
            ([resource_type], Some(query)) => Ok(Self::Search {
                resource_type: (*resource_type).to_string(),
                query: query.to_string(),
            }),
            ([resource_type], None) => Ok(Self::Type {
                resource_type: (*resource_type).to_string(),
            }),
            ([resource_type, id], None) => Ok(Self::Instance {
                resource_type: (*resource_type).to_string(),
                id: (*id).to_string(),
            }),
            _ => Err(StorageError::invalid_resource(format!(
                "unsupported request url {url}"
            ))),
        }
    }
}

fn require_resource<'a>(
    resource: Option<&'a Value>,
    resource_type: &str,
) -> Result<&'a Value, StorageError> {
    let resource =
        resource.ok_or_else(|| StorageError::invalid_resource("entry.resource missing"))?;
    match resource.get("resourceType").and_then(Value::as_str) {
        Some(t) if t == resource_type => Ok(resource),
        other => Err(StorageError::invalid_resource(format!(
            "resourceType {} does not match request url type {resource_type}",
            other.unwrap_or("<missing>")
        ))),
    }
}

async fn update_by_id(
    tx: &mut dyn Transaction,
    resource: &Value,
    resource_type: &str,
    id: &str,
    preference: ReturnPreference,
) -> Result<Value, StorageError> {
    let existed = tx.read(resource_type, id).await?.is_some();
    let mut body = resource.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("id".to_string(), Value::String(id.to_string()));
    }
    let updated = tx.update(&body).await?;
    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok(write_entry(status, &updated, preference))
}

/// Every current resource matching `query`.
async fn find_matches(
    tx: &dyn Transaction,
    resource_type: &str,
    query: &str,
) -> Result<Vec<StoredResource>, StorageError> {
    let params = SearchParams::from_query(query);
    if params.is_empty() {
        return Err(StorageError::invalid_resource(format!(
            "empty search criteria for {resource_type}"
        )));
    }
    Ok(tx.search(resource_type, &params).await?.entries)
}

async fn search_entry(
    tx: &dyn Transaction,
    resource_type: &str,
    query: &str,
) -> Result<Value, StorageError> {
    let mut params = SearchParams::from_query(query).with_total(TotalMode::Accurate);
    if let Some(count) = params
        .remove_param("_count")
        .and_then(|values| values.first().and_then(|v| v.parse::<u32>().ok()))
    {
        params = params.with_count(count);
    }

    let result = tx.search(resource_type, &params).await?;
    let total = result
        .total
        .unwrap_or_else(|| u32::try_from(result.len()).unwrap_or(u32::MAX));
    let entries: Vec<Value> = result
        .entries
        .iter()
        .map(|r| {
            json!({
                "fullUrl": r.relative_url(),
                "resource": r.resource,
                "search": {"mode": "match"}
            })
        })
        .collect();

    Ok(json!({
        "resource": {
            "resourceType": "Bundle",
            "type": "searchset",
            "total": total,
            "entry": entries
        },
        "response": {"status": status_line(StatusCode::OK)}
    }))
}

fn write_entry(status: StatusCode, stored: &StoredResource, preference: ReturnPreference) -> Value {
    let mut entry = json!({
        "response": {
            "status": status_line(status),
            "location": stored.versioned_url(),
            "etag": format!("W/\"{}\"", stored.version_id)
        }
    });
    if preference == ReturnPreference::Representation {
        entry["resource"] = stored.resource.clone();
    }
    entry
}

fn status_entry(status: StatusCode) -> Value {
    json!({"response": {"status": status_line(status)}})
}

fn error_entry(error: &StorageError) -> Value {
    let status = match error {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::InvalidResource { .. } | StorageError::UnsupportedSearchParameter { .. } => {
            StatusCode::BAD_REQUEST
        }
        StorageError::VersionConflict { .. } | StorageError::AlreadyExists { .. } => {
            StatusCode::CONFLICT
        }
        StorageError::MultipleMatches { .. } => StatusCode::PRECONDITION_FAILED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::debug!(status = %status, error = %error, "Batch entry failed");

    json!({
        "response": {
            "status": status_line(status),
            "outcome": {
                "resourceType": "OperationOutcome",
                "issue": [{
                    "severity": "error",
                    "code": "processing",
                    "diagnostics": error.to_string()
                }]
            }
        }
    })
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_target_parsing() {
        assert_eq!(
            RequestTarget::parse("CodeSystem").unwrap(),
            RequestTarget::Type {
                resource_type: "CodeSystem".into()
            }
        );
        assert_eq!(
            RequestTarget::parse("/CodeSystem/abc").unwrap(),
            RequestTarget::Instance {
                resource_type: "CodeSystem".into(),
                id: "abc".into()
            }
        );
        assert_eq!(
            RequestTarget::parse("CodeSystem?url=http://x/cs&version=1.0.0").unwrap(),
            RequestTarget::Search {
                resource_type: "CodeSystem".into(),
                query: "url=http://x/cs&version=1.0.0".into()
            }
        );
        assert!(RequestTarget::parse("CodeSystem/a/_history/1").is_err());
    }

    #[test]
    fn test_retry_budget() {
        let config = BatchClientConfig::new().with_max_retries(2);
        assert_eq!(config.next_retry(0), Some(1));
        assert_eq!(config.next_retry(1), Some(2));
        assert_eq!(config.next_retry(2), None);

        assert_eq!(BatchClientConfig::new().with_max_retries(0).next_retry(0), None);
    }

    #[test]
    fn test_retry_forever_saturates() {
        let forever = BatchClientConfig::new().with_max_retries(BatchClientConfig::RETRY_FOREVER);
        assert_eq!(forever.next_retry(i32::MAX - 1), Some(i32::MAX));
        assert_eq!(forever.next_retry(i32::MAX), Some(i32::MAX));
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(StatusCode::CREATED), "201 Created");
        assert_eq!(status_line(StatusCode::NO_CONTENT), "204 No Content");
        assert_eq!(
            error_entry(&StorageError::multiple_matches("CodeSystem", "url=x"))["response"]["status"],
            "412 Precondition Failed"
        );
    }
}
