//! Subject-scoped, TTL-bounded cache entry for one resource kind.
//!
//! Every operation is best-effort: an unavailable store reads as a miss and
//! a write that fails is logged and forgotten. A corrupt entry is deleted
//! and reads as a miss. Nothing here returns an error to the caller.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::{age_of, CachedResource, Clock, ResourceKind, StoreError, SubjectId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::store::{DurableStore, ResourceKey};

/// A cached value together with who it belongs to and when it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub subject: SubjectId,
    pub value: T,
    pub fetched_at: Timestamp,
}

impl<T> CacheEntry<T> {
    pub fn age(&self, now: Timestamp) -> Duration {
        age_of(self.fetched_at, now)
    }

    /// Authoritative only for the same subject and strictly younger than `ttl`.
    pub fn is_valid_for(&self, subject: &SubjectId, now: Timestamp, ttl: Duration) -> bool {
        &self.subject == subject && self.age(now) < ttl
    }
}

/// Typed view over the durable store entry of one resource kind.
pub struct PersistentCache<T> {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    key: ResourceKey,
    ttl: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for PersistentCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            key: self.key,
            ttl: self.ttl,
            _marker: PhantomData,
        }
    }
}

impl<T: CachedResource> PersistentCache<T> {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            key: ResourceKey::new(T::resource_kind()),
            ttl,
            _marker: PhantomData,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.key.kind()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the entry only if it belongs to `subject` and is within TTL.
    ///
    /// Expired or foreign entries are left in place so the fallback chain
    /// can still find them.
    pub fn read(&self, subject: &SubjectId) -> Option<CacheEntry<T>> {
        let entry = self.load_entry()?;
        if entry.is_valid_for(subject, self.clock.now(), self.ttl) {
            Some(entry)
        } else {
            None
        }
    }

    /// Return the entry for `subject` regardless of age.
    ///
    /// Only for degraded fallback; callers must mark the result as stale.
    pub fn read_stale(&self, subject: &SubjectId) -> Option<CacheEntry<T>> {
        self.load_entry().filter(|entry| &entry.subject == subject)
    }

    /// Store `value` for `subject`, stamped with the current time.
    ///
    /// Returns the stamped entry even when persisting it failed.
    pub fn write(&self, subject: &SubjectId, value: &T) -> CacheEntry<T> {
        let entry = CacheEntry {
            subject: subject.clone(),
            value: value.clone(),
            fetched_at: self.clock.now(),
        };

        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = StoreError::Encode {
                    key: self.key.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(resource = %self.kind(), error = %err, "Skipping cache write");
                return entry;
            }
        };

        if let Err(err) = self.store.store(&self.key, &bytes) {
            tracing::warn!(resource = %self.kind(), error = %err, "Cache write failed");
        }
        entry
    }

    /// Remove the entry entirely.
    pub fn clear(&self) {
        if let Err(err) = self.store.remove(&self.key) {
            tracing::warn!(resource = %self.kind(), error = %err, "Cache clear failed");
        }
    }

    fn load_entry(&self) -> Option<CacheEntry<T>> {
        let bytes = match self.store.load(&self.key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(resource = %self.kind(), error = %err, "Cache store unavailable, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                let err = StoreError::Corrupt {
                    key: self.key.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(resource = %self.kind(), error = %err, "Deleting corrupt cache entry");
                self.clear();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use gatehouse_core::{ManualClock, Role, UserRole};

    const TTL: Duration = Duration::from_secs(300);

    fn setup() -> (PersistentCache<UserRole>, Arc<InMemoryStore>, ManualClock) {
        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::starting_now();
        let cache = PersistentCache::new(store.clone(), Arc::new(clock.clone()), TTL);
        (cache, store, clock)
    }

    fn admin() -> UserRole {
        UserRole::with_role("alice", Role::Admin)
    }

    struct BrokenStore;

    impl DurableStore for BrokenStore {
        fn load(&self, _key: &ResourceKey) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Unavailable {
                reason: "disk gone".to_string(),
            })
        }

        fn store(&self, _key: &ResourceKey, _bytes: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                reason: "disk gone".to_string(),
            })
        }

        fn remove(&self, _key: &ResourceKey) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable {
                reason: "disk gone".to_string(),
            })
        }
    }

    #[test]
    fn test_write_then_read_hits() {
        let (cache, _store, _clock) = setup();
        let alice = SubjectId::new("alice");

        let written = cache.write(&alice, &admin());
        let read = cache.read(&alice).unwrap();
        assert_eq!(read, written);
        assert!(read.value.is_admin());
    }

    #[test]
    fn test_ttl_boundary() {
        let (cache, _store, clock) = setup();
        let alice = SubjectId::new("alice");
        cache.write(&alice, &admin());

        clock.advance(TTL - Duration::from_millis(1));
        assert!(cache.read(&alice).is_some());

        clock.advance(Duration::from_millis(2));
        assert!(cache.read(&alice).is_none());
    }

    #[test]
    fn test_expired_entry_kept_for_stale_read() {
        let (cache, _store, clock) = setup();
        let alice = SubjectId::new("alice");
        cache.write(&alice, &admin());

        clock.advance(TTL * 4);
        assert!(cache.read(&alice).is_none());
        let stale = cache.read_stale(&alice).unwrap();
        assert_eq!(stale.value, admin());
    }

    #[test]
    fn test_other_subject_misses() {
        let (cache, _store, _clock) = setup();
        cache.write(&SubjectId::new("alice"), &admin());

        let bob = SubjectId::new("bob");
        assert!(cache.read(&bob).is_none());
        assert!(cache.read_stale(&bob).is_none());
    }

    #[test]
    fn test_clear_removes_entry() {
        let (cache, store, _clock) = setup();
        let alice = SubjectId::new("alice");
        cache.write(&alice, &admin());

        cache.clear();
        assert!(cache.read_stale(&alice).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_deleted_and_misses() {
        let (cache, store, _clock) = setup();
        let key = ResourceKey::new(ResourceKind::Role);
        store.store(&key, b"{not json").unwrap();

        assert!(cache.read(&SubjectId::new("alice")).is_none());
        assert_eq!(store.load(&key).unwrap(), None);
    }

    #[test]
    fn test_unavailable_store_degrades_to_miss() {
        let cache = PersistentCache::<UserRole>::new(
            Arc::new(BrokenStore),
            Arc::new(ManualClock::starting_now()),
            TTL,
        );
        let alice = SubjectId::new("alice");

        let written = cache.write(&alice, &admin());
        assert_eq!(written.value, admin());
        assert!(cache.read(&alice).is_none());
        assert!(cache.read_stale(&alice).is_none());
        cache.clear();
    }

    #[test]
    fn test_entry_serializes_with_embedded_timestamp() {
        let (cache, store, _clock) = setup();
        cache.write(&SubjectId::new("alice"), &admin());

        let bytes = store
            .load(&ResourceKey::new(ResourceKind::Role))
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["subject"], "alice");
        assert_eq!(json["value"]["role"], "admin");
        assert!(json["fetched_at"].is_string());
    }
}
