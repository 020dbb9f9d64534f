//! Errors raised while assembling a client. Fetch failures never surface
//! here; they end up as fallback values inside the caches.

use gatehouse_cache::LmdbStoreError;
use gatehouse_core::GatehouseError;

use crate::config::ClientConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Config error: {0}")]
    Config(#[from] ClientConfigError),
    #[error("Store error: {0}")]
    Store(#[from] LmdbStoreError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Gatehouse(#[from] GatehouseError),
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
