use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::reconcile::{
    BatchClientConfig, HttpBatchClient, ProcessKeyAndVersion, ProcessStateOverrides,
};
use crate::references::{HttpRemoteReferenceChecker, ReferenceResolver, RemoteCheckerConfig};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub fhir: FhirSettings,
    /// Process-plugin resource reconciliation
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Checks of references to other federation members
    #[serde(default)]
    pub federation: FederationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // FHIR validations
        let base = self.fhir.server_base.trim();
        if base.is_empty() {
            return Err("fhir.server_base must not be empty".into());
        }
        if url::Url::parse(base).is_err() {
            return Err(format!("fhir.server_base '{base}' is not an absolute url"));
        }
        // Reconciler validations
        if self.reconciler.max_retries < BatchClientConfig::RETRY_FOREVER {
            return Err("reconciler.max_retries must be >= -1".into());
        }
        if self.reconciler.request_timeout_ms == 0 {
            return Err("reconciler.request_timeout_ms must be > 0".into());
        }
        self.reconciler.overrides()?;
        // Federation validations
        if self.federation.enabled && self.federation.endpoints.is_empty() {
            return Err("federation.enabled=true requires federation.endpoints".into());
        }
        for endpoint in &self.federation.endpoints {
            if url::Url::parse(endpoint).is_err() {
                return Err(format!("federation endpoint '{endpoint}' is not an absolute url"));
            }
        }
        if self.federation.request_timeout_ms == 0 {
            return Err("federation.request_timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Server base without trailing slash.
    pub fn server_base(&self) -> String {
        self.fhir.server_base.trim().trim_end_matches('/').to_string()
    }

    /// Resolver for the local server base, checking external references
    /// when federation is enabled.
    pub fn reference_resolver(&self) -> Result<ReferenceResolver, reqwest::Error> {
        let resolver = ReferenceResolver::new(self.server_base());
        if !self.federation.enabled {
            return Ok(resolver);
        }
        let checker = HttpRemoteReferenceChecker::new(self.federation.remote_checker_config())?;
        Ok(resolver.with_remote_checker(Arc::new(checker)))
    }

    /// Batch client posting to the local server base.
    pub fn batch_client(&self) -> Result<HttpBatchClient, reqwest::Error> {
        HttpBatchClient::new(&self.server_base(), self.reconciler.batch_client_config())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FhirSettings {
    /// Absolute base url of the local FHIR server
    #[serde(default = "default_server_base")]
    pub server_base: String,
}

fn default_server_base() -> String {
    "https://localhost/fhir".into()
}

impl Default for FhirSettings {
    fn default() -> Self {
        Self {
            server_base: default_server_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Batch retries after the first attempt, -1 retries forever
    #[serde(default = "default_reconciler_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_reconciler_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_reconciler_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Processes forced to EXCLUDED, as `key|version`
    #[serde(default)]
    pub excluded_processes: Vec<String>,
    /// Processes forced to RETIRED, as `key|version`
    #[serde(default)]
    pub retired_processes: Vec<String>,
    /// Processes forced to DRAFT, as `key|version`
    #[serde(default)]
    pub draft_processes: Vec<String>,
}

fn default_reconciler_max_retries() -> i32 {
    3
}
fn default_reconciler_retry_delay_ms() -> u64 {
    5_000
}
fn default_reconciler_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_reconciler_max_retries(),
            retry_delay_ms: default_reconciler_retry_delay_ms(),
            request_timeout_ms: default_reconciler_request_timeout_ms(),
            excluded_processes: Vec::new(),
            retired_processes: Vec::new(),
            draft_processes: Vec::new(),
        }
    }
}

impl ReconcilerConfig {
    pub fn batch_client_config(&self) -> BatchClientConfig {
        BatchClientConfig::new()
            .with_max_retries(self.max_retries)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }

    pub fn overrides(&self) -> Result<ProcessStateOverrides, String> {
        Ok(ProcessStateOverrides {
            excluded: parse_processes("reconciler.excluded_processes", &self.excluded_processes)?,
            retired: parse_processes("reconciler.retired_processes", &self.retired_processes)?,
            draft: parse_processes("reconciler.draft_processes", &self.draft_processes)?,
        })
    }
}

fn parse_processes(
    field: &str,
    values: &[String],
) -> Result<HashSet<ProcessKeyAndVersion>, String> {
    values
        .iter()
        .map(|v| v.parse().map_err(|e| format!("{field}: {e}")))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base urls of the other federation members
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_federation_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_federation_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_federation_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_federation_max_retries() -> u32 {
    1
}
fn default_federation_retry_delay_ms() -> u64 {
    500
}
fn default_federation_request_timeout_ms() -> u64 {
    10_000
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoints: Vec::new(),
            max_retries: default_federation_max_retries(),
            retry_delay_ms: default_federation_retry_delay_ms(),
            request_timeout_ms: default_federation_request_timeout_ms(),
        }
    }
}

impl FederationConfig {
    pub fn remote_checker_config(&self) -> RemoteCheckerConfig {
        self.endpoints
            .iter()
            .fold(RemoteCheckerConfig::new(), |cfg, endpoint| {
                cfg.with_endpoint(endpoint.clone())
            })
            .with_max_retries(self.max_retries)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("fedfhir.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., FEDFHIR__RECONCILER__MAX_RETRIES=-1
        builder = builder.add_source(
            Environment::with_prefix("FEDFHIR")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
