//! Gatehouse Cache - Identity-Scoped Resource Caching
//!
//! Keeps slow, per-user remote values (role, credit balance, workflow
//! configuration) available to many independent consumers:
//!
//! - **PersistentCache**: durable `{subject, value, fetched_at}` entry per
//!   resource kind, authoritative only for the same subject within TTL
//! - **RequestCoordinator**: at most one fetch in flight per resource kind
//! - **ResilientFetcher**: timeout race, bounded retry on timeout, then stale
//!   entry or default value
//! - **ResourceCache**: the orchestrator consumers subscribe to
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_cache::{CacheRegistry, ResourceCache};
//!
//! let registry = CacheRegistry::in_memory();
//! let roles = ResourceCache::<UserRole>::builder(&registry, source).build()?;
//! roles.watch_identity(&identity);
//! let mut updates = roles.subscribe();
//! ```

pub mod cancel;
pub mod coordinator;
pub mod fetcher;
pub mod identity;
pub mod persistent;
pub mod published;
pub mod registry;
pub mod resource_cache;
pub mod stats;
pub mod store;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use coordinator::{Attempt, Joined, RequestCoordinator};
pub use fetcher::{Fallback, ResilientFetcher, ResourceSource, RetryState};
pub use identity::{IdentityHandle, IdentityProvider};
pub use persistent::{CacheEntry, PersistentCache};
pub use published::{Published, ValueSource};
pub use registry::CacheRegistry;
pub use resource_cache::{ResourceCache, ResourceCacheBuilder};
pub use stats::{CacheStats, StatsRecorder};
pub use store::{DurableStore, InMemoryStore, LmdbStore, LmdbStoreError, ResourceKey};
