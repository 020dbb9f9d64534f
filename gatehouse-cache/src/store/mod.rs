//! Durable per-profile storage for cache entries.

pub mod lmdb_backend;
pub mod memory;
pub mod resource_key;
pub mod traits;

pub use lmdb_backend::{LmdbStore, LmdbStoreError};
pub use memory::InMemoryStore;
pub use resource_key::ResourceKey;
pub use traits::DurableStore;
