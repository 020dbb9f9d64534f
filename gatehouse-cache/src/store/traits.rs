//! Durable store trait.
//!
//! The store is a per-profile byte map. It is deliberately synchronous: a
//! valid cache hit must publish without awaiting anything, and both
//! backends (LMDB, in-memory) answer point reads without blocking on I/O
//! beyond a page-cache lookup.

use gatehouse_core::StoreError;

use super::resource_key::ResourceKey;

/// Byte-level persistence used by [`crate::PersistentCache`].
///
/// Implementations must be thread-safe. Errors are reported, not hidden;
/// it is the caller that decides to degrade them into cache misses.
pub trait DurableStore: Send + Sync {
    /// Read the raw entry stored under `key`.
    fn load(&self, key: &ResourceKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Overwrite the entry stored under `key`.
    fn store(&self, key: &ResourceKey, bytes: &[u8]) -> Result<(), StoreError>;

    /// Remove the entry under `key`. Returns whether anything was removed.
    fn remove(&self, key: &ResourceKey) -> Result<bool, StoreError>;
}
