//! Existence checks of literal references that point at other federation servers.

use std::time::Duration;

use async_trait::async_trait;
use fedfhir_core::FhirReference;
use reqwest::StatusCode;

use super::error::ResolveError;

/// Checks that an external literal reference exists on its server.
#[async_trait]
pub trait RemoteReferenceChecker: Send + Sync {
    /// Returns `Ok(())` if the target exists.
    ///
    /// # Errors
    ///
    /// - `NoEndpointForServerBase` if the reference base is not a known endpoint
    /// - `ReferenceTargetNotFoundRemotely` if the server answers 404 or 410
    /// - `Remote` for transport failures and other error responses
    async fn check(&self, location: &str, reference: &FhirReference) -> Result<(), ResolveError>;
}

/// Settings of [`HttpRemoteReferenceChecker`].
#[derive(Debug, Clone)]
pub struct RemoteCheckerConfig {
    /// Remote server base URLs, compared without trailing slash.
    pub endpoints: Vec<String>,

    /// Retries after the first attempt (default: 1).
    pub max_retries: u32,

    /// Fixed delay between attempts (default: 500 ms).
    pub retry_delay: Duration,

    /// HTTP request timeout (default: 10 seconds).
    pub request_timeout: Duration,
}

impl Default for RemoteCheckerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            max_retries: 1,
            retry_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RemoteCheckerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_endpoint(mut self, base: impl Into<String>) -> Self {
        self.endpoints.push(base.into());
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
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
}

/// `GET {base}/{Type}/{id}` against a configured endpoint.
pub struct HttpRemoteReferenceChecker {
    http_client: reqwest::Client,
    endpoints: Vec<String>,
    config: RemoteCheckerConfig,
}

impl HttpRemoteReferenceChecker {
    /// Creates a checker with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: RemoteCheckerConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let endpoints = config
            .endpoints
            .iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .collect();

        Ok(Self {
            http_client,
            endpoints,
            config,
        })
    }

    fn endpoint_for(&self, base: &str) -> Option<&str> {
        let base = base.trim_end_matches('/');
        self.endpoints
            .iter()
            .find(|e| e.as_str() == base)
            .map(String::as_str)
    }
}

#[async_trait]
impl RemoteReferenceChecker for HttpRemoteReferenceChecker {
    async fn check(&self, location: &str, reference: &FhirReference) -> Result<(), ResolveError> {
        let base = reference.base.as_deref().unwrap_or_default();
        let endpoint = self.endpoint_for(base).ok_or_else(|| {
            ResolveError::NoEndpointForServerBase {
                location: location.to_string(),
                server_base: base.trim_end_matches('/').to_string(),
            }
        })?;

        let url = format!("{endpoint}/{}", reference.to_versioned());
        let reference_text = reference.to_string();

        let mut attempt = 0;
        loop {
            let outcome = self
                .http_client
                .get(&url)
                .header("Accept", "application/fhir+json")
                .send()
                .await;

            let retryable = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                        return Err(ResolveError::ReferenceTargetNotFoundRemotely {
                            location: location.to_string(),
                            reference: reference_text,
                        });
                    }
                    if !status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ResolveError::remote(
                            reference_text,
                            format!("HTTP {status}: {body}"),
                        ));
                    }
                    format!("HTTP {status}")
                }
                Err(e) if e.is_connect() || e.is_timeout() => e.to_string(),
                Err(e) => return Err(ResolveError::remote(reference_text, e.to_string())),
            };

            if attempt >= self.config.max_retries {
                return Err(ResolveError::remote(reference_text, retryable));
            }
            attempt += 1;
            tracing::debug!(
                url = %url,
                attempt,
                error = %retryable,
                "Remote reference check failed, retrying"
            );
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_and_builders() {
        let config = RemoteCheckerConfig::default();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.request_timeout, Duration::from_secs(10));

        let config = RemoteCheckerConfig::new()
            .with_endpoint("https://remote.org/fhir/")
            .with_max_retries(0)
            .with_retry_delay(Duration::ZERO);
        assert_eq!(config.endpoints, vec!["https://remote.org/fhir/"]);
        assert_eq!(config.max_retries, 0);
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let checker = HttpRemoteReferenceChecker::new(
            RemoteCheckerConfig::new().with_endpoint("https://remote.org/fhir/"),
        )
        .unwrap();
        assert!(checker.endpoint_for("https://remote.org/fhir").is_some());

        let reference = FhirReference {
            base: Some("https://elsewhere.org/fhir".into()),
            ..FhirReference::new("Patient", "1")
        };
        let err = checker.check("Task.for", &reference).await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::NoEndpointForServerBase { ref server_base, .. }
                if server_base == "https://elsewhere.org/fhir"
        ));
    }
}
