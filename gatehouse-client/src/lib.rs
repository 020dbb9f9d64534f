//! Gatehouse Client - HTTP Sources and Wiring
//!
//! Connects the resource caches to the remote service: bearer-credentialed
//! REST sources for role, credits and workflow, TOML configuration, tracing
//! setup and a [`Gatehouse`] facade that owns one profile's caches.

pub mod config;
pub mod error;
pub mod rest;
pub mod session;
pub mod sources;
pub mod telemetry;

pub use config::{ClientConfigError, GatehouseConfig, PolicyConfig, StoreConfig};
pub use error::{ClientError, ClientResult};
pub use rest::RestClient;
pub use session::Gatehouse;
pub use sources::{CreditSource, RoleSource, WorkflowSource};
pub use telemetry::init_tracing;
