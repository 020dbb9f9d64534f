//! Error types for Gatehouse operations

use crate::ResourceKind;
use std::time::Duration;
use thiserror::Error;

/// Remote fetch errors.
///
/// Every variant is `Clone` because a single fetch outcome is shared by all
/// callers that joined the same in-flight request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch of {kind} timed out after {after:?}")]
    Timeout { kind: ResourceKind, after: Duration },

    #[error("Fetch of {kind} gave up after {attempts} timed-out attempts")]
    RetriesExhausted { kind: ResourceKind, attempts: u32 },

    #[error("Fetch of {kind} rejected with status {status}: {message}")]
    Rejected {
        kind: ResourceKind,
        status: u16,
        message: String,
    },

    #[error("Transport failure fetching {kind}: {reason}")]
    Transport { kind: ResourceKind, reason: String },

    #[error("Invalid response body for {kind}: {reason}")]
    Decode { kind: ResourceKind, reason: String },

    #[error("No credential available: {reason}")]
    Credential { reason: String },

    #[error("Fetch of {kind} was cancelled")]
    Cancelled { kind: ResourceKind },
}

impl FetchError {
    /// Timeouts are the only failures the fetcher retries.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Hard cancellation: the result must not be published anywhere.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Durable store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Corrupt cache entry under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Failed to encode cache entry under {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Gatehouse errors.
#[derive(Debug, Clone, Error)]
pub enum GatehouseError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Gatehouse operations.
pub type GatehouseResult<T> = Result<T, GatehouseError>;

// =============================================================================
// TESTS
// =============================================================================
