//! Per-resource cache and fetch policy.

use crate::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for one resource kind: cache lifetime, timeout race and retry budget.
///
/// These numbers are tuning, not contract. Each deployment may set its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePolicy {
    /// Maximum age at which a cache entry is still authoritative.
    pub ttl: Duration,
    /// Bound on a single remote call before it counts as a timeout.
    pub fetch_timeout: Duration,
    /// Extra attempts allowed after a timeout. Rejections are never retried.
    pub max_retries: u32,
    /// Fixed delay before re-racing after a timeout.
    pub retry_backoff: Duration,
}

impl ResourcePolicy {
    pub fn role_defaults() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(5),
            max_retries: 1,
            retry_backoff: Duration::from_secs(1),
        }
    }

    pub fn credits_defaults() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_backoff: Duration::from_secs(1),
        }
    }

    pub fn workflow_defaults() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(5),
            max_retries: 0,
            retry_backoff: Duration::from_secs(1),
        }
    }

    pub fn defaults_for(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Role => Self::role_defaults(),
            ResourceKind::Credits => Self::credits_defaults(),
            ResourceKind::Workflow => Self::workflow_defaults(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Validate the policy.
    ///
    /// Validates:
    /// - ttl, fetch_timeout are positive
    /// - max_retries is at most 10
    pub fn validate(&self, kind: ResourceKind) -> GatehouseResult<()> {
        if self.ttl.is_zero() {
            return Err(GatehouseError::Config(ConfigError::InvalidValue {
                field: format!("{}.ttl", kind),
                value: format!("{:?}", self.ttl),
                reason: "ttl must be positive".to_string(),
            }));
        }

        if self.fetch_timeout.is_zero() {
            return Err(GatehouseError::Config(ConfigError::InvalidValue {
                field: format!("{}.fetch_timeout", kind),
                value: format!("{:?}", self.fetch_timeout),
                reason: "fetch_timeout must be positive".to_string(),
            }));
        }

        if self.max_retries > 10 {
            return Err(GatehouseError::Config(ConfigError::InvalidValue {
                field: format!("{}.max_retries", kind),
                value: self.max_retries.to_string(),
                reason: "max_retries must be at most 10".to_string(),
            }));
        }

        Ok(())
    }
}
