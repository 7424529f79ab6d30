//! Orchestrator configuration
//!
//! Loaded in layers, later ones overriding earlier ones:
//! 1. Default values
//! 2. An optional TOML (`.toml`) or YAML (`.yaml`/`.yml`) file
//! 3. `TASKWEAVE_*` environment variables
//!
//! The result is validated once all layers are applied.

use crate::error::{OrchestratorError, Result};
use crate::fetch::FetchConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskweave_core::config::{build_env_key, get_env, get_env_parse, ConfigBuilder};
use taskweave_core::{CoreError, RetryPolicy};
use tokio::fs;
use tracing::{debug, info};

/// Pages fetched by the summing workloads when no list is configured
pub const DEFAULT_URLS: &[&str] = &[
    "https://docs.microsoft.com",
    "https://docs.microsoft.com/aspnet/core",
    "https://docs.microsoft.com/azure",
    "https://docs.microsoft.com/azure/devops",
    "https://docs.microsoft.com/dotnet",
    "https://docs.microsoft.com/dynamics365",
    "https://docs.microsoft.com/education",
    "https://docs.microsoft.com/enterprise-mobility-security",
    "https://docs.microsoft.com/gaming",
    "https://docs.microsoft.com/graph",
    "https://docs.microsoft.com/microsoft-365",
    "https://docs.microsoft.com/office",
    "https://docs.microsoft.com/powershell",
    "https://docs.microsoft.com/sql",
    "https://docs.microsoft.com/surface",
    "https://docs.microsoft.com/system-center",
    "https://docs.microsoft.com/visualstudio",
    "https://docs.microsoft.com/windows",
    "https://docs.microsoft.com/xamarin",
];

/// Top-level configuration for the `taskweave` binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Pages to fetch
    pub urls: Vec<String>,

    /// Delay before every request, in milliseconds
    pub pacing_delay_ms: u64,

    /// Retry policy for the single-URL retry workload
    ///
    /// Fields missing from a partial table keep this config's defaults.
    #[serde(default = "default_retry_policy", deserialize_with = "deserialize_retry")]
    pub retry: RetryPolicy,

    /// Per-request timeout, in seconds
    pub http_timeout_secs: u64,

    /// Responses larger than this are rejected
    pub max_response_bytes: usize,

    /// Deadline for the timeout workload, in milliseconds
    pub cancel_after_ms: u64,

    /// User agent sent with every request
    pub user_agent: String,

    /// Directory the write workload writes into
    pub output_dir: PathBuf,

    /// Number of files the write workload writes
    pub write_count: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            urls: DEFAULT_URLS.iter().map(|url| url.to_string()).collect(),
            pacing_delay_ms: 1000,
            retry: default_retry_policy(),
            http_timeout_secs: 30,
            max_response_bytes: 1_000_000,
            cancel_after_ms: 2000,
            user_agent: format!("taskweave/{}", crate::version()),
            output_dir: PathBuf::from("tempfolder"),
            write_count: 10,
        }
    }
}

fn default_retry_policy() -> RetryPolicy {
    RetryPolicy::new(3)
        .with_initial_interval(2.0)
        .with_jitter(false)
}

/// A `[retry]` table as written in a config file
#[derive(Deserialize)]
struct RetryOverrides {
    max_attempts: Option<usize>,
    initial_interval: Option<f64>,
    backoff_factor: Option<f64>,
    max_interval: Option<f64>,
    jitter: Option<bool>,
}

fn deserialize_retry<'de, D>(deserializer: D) -> std::result::Result<RetryPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = RetryOverrides::deserialize(deserializer)?;
    let mut policy = default_retry_policy();
    if let Some(value) = overrides.max_attempts {
        policy.max_attempts = value;
    }
    if let Some(value) = overrides.initial_interval {
        policy.initial_interval = value;
    }
    if let Some(value) = overrides.backoff_factor {
        policy.backoff_factor = value;
    }
    if let Some(value) = overrides.max_interval {
        policy.max_interval = value;
    }
    if let Some(value) = overrides.jitter {
        policy.jitter = value;
    }
    Ok(policy)
}

impl OrchestratorConfig {
    /// Prefix of the environment variables read by [`OrchestratorConfig::load`]
    pub const ENV_PREFIX: &'static str = "TASKWEAVE_";

    /// Load defaults, then `path` if given, then the environment
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let config = Self::from_file(path).await?;
                info!(path = %path.display(), "Loaded configuration file");
                config
            }
            None => Self::default(),
        };

        let config = config.with_env(Self::ENV_PREFIX)?;
        debug!(urls = config.urls.len(), "Configuration loaded");
        Ok(config)
    }

    /// Parse a configuration file, picking the format from its extension
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            OrchestratorError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Err(OrchestratorError::Config(format!(
                "Unsupported config format: {}",
                path.display()
            ))),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| OrchestratorError::Config(format!("Failed to parse TOML: {}", e)))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| OrchestratorError::Config(format!("Failed to parse YAML: {}", e)))
    }

    /// Settings for the HTTP fetcher
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::new()
            .with_timeout(Duration::from_secs(self.http_timeout_secs))
            .with_user_agent(self.user_agent.clone())
            .with_max_response_bytes(self.max_response_bytes)
            .with_pacing_delay(Duration::from_millis(self.pacing_delay_ms))
    }

    pub fn cancel_after(&self) -> Duration {
        Duration::from_millis(self.cancel_after_ms)
    }
}

impl ConfigBuilder for OrchestratorConfig {
    fn validate(&self) -> taskweave_core::Result<()> {
        if self.urls.is_empty() {
            return Err(CoreError::Config("urls must not be empty".into()));
        }
        if let Some(url) = self.urls.iter().find(|url| url.trim().is_empty()) {
            return Err(CoreError::Config(format!("invalid url: {:?}", url)));
        }
        if self.http_timeout_secs == 0 {
            return Err(CoreError::Config("http_timeout_secs must be non-zero".into()));
        }
        if self.max_response_bytes == 0 {
            return Err(CoreError::Config("max_response_bytes must be non-zero".into()));
        }
        if self.write_count == 0 {
            return Err(CoreError::Config("write_count must be non-zero".into()));
        }
        self.retry.validate()
    }

    fn apply_env(&mut self, prefix: &str) -> taskweave_core::Result<()> {
        if let Some(urls) = get_env(&build_env_key(prefix, "urls"))? {
            self.urls = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = get_env_parse(&build_env_key(prefix, "pacing_delay_ms"))? {
            self.pacing_delay_ms = value;
        }
        if let Some(value) = get_env_parse(&build_env_key(prefix, "http_timeout_secs"))? {
            self.http_timeout_secs = value;
        }
        if let Some(value) = get_env_parse(&build_env_key(prefix, "max_response_bytes"))? {
            self.max_response_bytes = value;
        }
        if let Some(value) = get_env_parse(&build_env_key(prefix, "cancel_after_ms"))? {
            self.cancel_after_ms = value;
        }
        if let Some(value) = get_env(&build_env_key(prefix, "user_agent"))? {
            self.user_agent = value;
        }
        if let Some(value) = get_env(&build_env_key(prefix, "output_dir"))? {
            self.output_dir = PathBuf::from(value);
        }
        if let Some(value) = get_env_parse(&build_env_key(prefix, "write_count"))? {
            self.write_count = value;
        }
        self.retry.apply_env(&format!("{}RETRY_", prefix))
    }
}
