//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cache entries in a
//! memory-mapped file under the profile directory, so cached values survive
//! process restarts.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `load`
//! - Write transactions for `store`, `remove` and layout cleanup

use std::path::Path;

use gatehouse_core::StoreError;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::resource_key::ResourceKey;
use super::traits::DurableStore;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to StoreError.
impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::Unavailable {
            reason: e.to_string(),
        }
    }
}

/// Durable store backed by a single unnamed LMDB database.
///
/// # Example
///
/// ```ignore
/// use gatehouse_cache::{LmdbStore, ResourceKey};
///
/// let store = LmdbStore::open("/home/me/.gatehouse", 16)?;
/// store.store(&ResourceKey::new(ResourceKind::Role), br#"{...}"#)?;
/// ```
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) the store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// Entries written under an older key layout are dropped on open.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process;
        // heed requires the caller to uphold that.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let store = Self { env, db };
        let dropped = store.drop_foreign_layouts()?;
        if dropped > 0 {
            tracing::info!(dropped, "Dropped cache entries from an older key layout");
        }

        Ok(store)
    }

    /// Delete every `gatehouse:` key that does not decode under the current layout.
    fn drop_foreign_layouts(&self) -> Result<u64, LmdbStoreError> {
        let stale_keys = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

            let mut keys = Vec::new();
            for result in iter {
                match result {
                    Ok((key, _)) => {
                        if key.starts_with(b"gatehouse:") && ResourceKey::decode(key).is_none() {
                            keys.push(key.to_vec());
                        }
                    }
                    Err(_) => continue,
                }
            }
            keys
        };

        if stale_keys.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &stale_keys {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }
}

impl DurableStore for LmdbStore {
    fn load(&self, key: &ResourceKey) -> Result<Option<Vec<u8>>, StoreError> {
        let encoded_key = key.encode();

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let value = self
            .db
            .get(&rtxn, &encoded_key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn store(&self, key: &ResourceKey, bytes: &[u8]) -> Result<(), StoreError> {
        let encoded_key = key.encode();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, &encoded_key, bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    fn remove(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        let encoded_key = key.encode();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, &encoded_key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::ResourceKind;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[test]
    fn test_store_and_load() {
        let (store, _dir) = create_test_store();
        let key = ResourceKey::new(ResourceKind::Role);

        assert_eq!(store.load(&key).unwrap(), None);
        store.store(&key, br#"{"role":"admin"}"#).unwrap();
        assert_eq!(
            store.load(&key).unwrap(),
            Some(br#"{"role":"admin"}"#.to_vec())
        );
    }

    #[test]
    fn test_remove() {
        let (store, _dir) = create_test_store();
        let key = ResourceKey::new(ResourceKind::Credits);

        store.store(&key, b"1").unwrap();
        assert!(store.remove(&key).unwrap());
        assert!(!store.remove(&key).unwrap());
        assert_eq!(store.load(&key).unwrap(), None);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let (store, _dir) = create_test_store();
        let role = ResourceKey::new(ResourceKind::Role);
        let credits = ResourceKey::new(ResourceKind::Credits);

        store.store(&role, b"role").unwrap();
        store.store(&credits, b"credits").unwrap();
        store.remove(&role).unwrap();

        assert_eq!(store.load(&credits).unwrap(), Some(b"credits".to_vec()));
    }

    #[test]
    fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let key = ResourceKey::new(ResourceKind::Workflow);

        {
            let store = LmdbStore::open(temp_dir.path(), 10).unwrap();
            store.store(&key, b"bundle").unwrap();
        }

        let reopened = LmdbStore::open(temp_dir.path(), 10).unwrap();
        assert_eq!(reopened.load(&key).unwrap(), Some(b"bundle".to_vec()));
    }

    #[test]
    fn test_reopen_drops_older_layout_keys() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");

        {
            let store = LmdbStore::open(temp_dir.path(), 10).unwrap();
            let mut wtxn = store.env.write_txn().unwrap();
            store.db.put(&mut wtxn, b"gatehouse:v0:role", b"old").unwrap();
            store.db.put(&mut wtxn, b"unrelated", b"keep").unwrap();
            wtxn.commit().unwrap();
        }

        let reopened = LmdbStore::open(temp_dir.path(), 10).unwrap();
        let rtxn = reopened.env.read_txn().unwrap();
        assert_eq!(reopened.db.get(&rtxn, b"gatehouse:v0:role").unwrap(), None);
        assert_eq!(
            reopened.db.get(&rtxn, b"unrelated").unwrap(),
            Some(&b"keep"[..])
        );
    }
}
