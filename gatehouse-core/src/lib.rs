//! Gatehouse Core - Shared Types
//!
//! Subjects, cached resource payloads, policies and the error taxonomy.
//! All other crates depend on this. No I/O lives here.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod resource;

pub use clock::{age_of, Clock, ManualClock, SystemClock};
pub use config::ResourcePolicy;
pub use error::{ConfigError, FetchError, GatehouseError, GatehouseResult, StoreError};
pub use identity::{IdentitySnapshot, SubjectId, Timestamp};
pub use resource::{
    AvailableModels, CachedResource, CreditBalance, ResourceKind, Role, UserRole, WorkflowBundle,
    WorkflowConfig, WorkflowGroup, WorkflowGroupConfig, WorkflowStepDefinition,
    WorkflowStepSummary,
};
