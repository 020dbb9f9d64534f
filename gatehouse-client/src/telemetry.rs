//! Tracing subscriber setup.
//!
//! JSON lines to stdout, filtered by `RUST_LOG` when set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ClientError, ClientResult};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "gatehouse_cache=info,gatehouse_client=info,warn";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing() -> ClientResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| ClientError::Telemetry(format!("Failed to init subscriber: {}", e)))?;

    tracing::debug!(default_filter = DEFAULT_FILTER, "Telemetry initialized");
    Ok(())
}
