//! In-memory durable store.
//!
//! Lives as long as the process. Used when no store path is configured and
//! throughout the test suites.

use std::collections::HashMap;
use std::sync::RwLock;

use gatehouse_core::StoreError;

use super::resource_key::ResourceKey;
use super::traits::DurableStore;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<ResourceKey, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for InMemoryStore {
    fn load(&self, key: &ResourceKey) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &ResourceKey, bytes: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(*key, bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }
}
