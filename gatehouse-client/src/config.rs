//! Configuration loading for Gatehouse clients.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use gatehouse_core::{ResourceKind, ResourcePolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatehouseConfig {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub store: StoreConfig,
    pub role: PolicyConfig,
    pub credits: PolicyConfig,
    pub workflow: PolicyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// LMDB directory. Without it entries live in memory only.
    pub path: Option<PathBuf>,
    pub max_size_mb: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    pub ttl_secs: u64,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl PolicyConfig {
    pub fn to_policy(&self) -> ResourcePolicy {
        ResourcePolicy {
            ttl: Duration::from_secs(self.ttl_secs),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientConfigError {
    #[error("Missing configuration file path (use --config or GATEHOUSE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl GatehouseConfig {
    pub fn load() -> Result<Self, ClientConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ClientConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ClientConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ClientConfigError> {
        let config: GatehouseConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn policy(&self, kind: ResourceKind) -> ResourcePolicy {
        self.section(kind).to_policy()
    }

    fn section(&self, kind: ResourceKind) -> &PolicyConfig {
        match kind {
            ResourceKind::Role => &self.role,
            ResourceKind::Credits => &self.credits,
            ResourceKind::Workflow => &self.workflow,
        }
    }

    pub fn validate(&self) -> Result<(), ClientConfigError> {
        let base_url = self.api_base_url.trim();
        if base_url.is_empty() {
            return Err(ClientConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ClientConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.store.max_size_mb == 0 {
            return Err(ClientConfigError::InvalidValue {
                field: "store.max_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        if self
            .store
            .path
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            return Err(ClientConfigError::InvalidValue {
                field: "store.path",
                reason: "must not be empty when set".to_string(),
            });
        }
        for kind in ResourceKind::ALL {
            self.policy(kind)
                .validate(kind)
                .map_err(|e| ClientConfigError::InvalidValue {
                    field: kind.as_str(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("GATEHOUSE_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
