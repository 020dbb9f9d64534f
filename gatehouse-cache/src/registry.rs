//! Process-wide shared state of the cache, as an owned value.
//!
//! Every `ResourceCache` built from the same registry shares its durable
//! store, its in-flight slot per resource kind and its statistics. Tests
//! build a fresh registry per case.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gatehouse_core::{CachedResource, Clock, ResourceKind, SystemClock};
use tracing::{info, warn};

use crate::coordinator::RequestCoordinator;
use crate::persistent::PersistentCache;
use crate::published::Published;
use crate::stats::{CacheStats, StatsRecorder};
use crate::store::{DurableStore, InMemoryStore, ResourceKey};

/// Type-erased control over one coordinator.
trait InFlightControl: Send + Sync {
    fn cancel(&self) -> bool;
}

impl<T> InFlightControl for RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn cancel(&self) -> bool {
        RequestCoordinator::cancel(self)
    }
}

struct CoordinatorSlot {
    any: Arc<dyn Any + Send + Sync>,
    control: Arc<dyn InFlightControl>,
}

pub struct CacheRegistry {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    coordinators: Mutex<HashMap<TypeId, CoordinatorSlot>>,
    stats: Mutex<HashMap<ResourceKind, Arc<StatsRecorder>>>,
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("coordinators", &lock(&self.coordinators).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CacheRegistry {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            coordinators: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Registry over an in-memory store and the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn store(&self) -> Arc<dyn DurableStore> {
        Arc::clone(&self.store)
    }

    /// The shared in-flight slot for `T`'s resource kind.
    pub fn coordinator<T: CachedResource>(&self) -> Arc<RequestCoordinator<Published<T>>> {
        let mut coordinators = lock(&self.coordinators);
        let type_id = TypeId::of::<T>();

        if let Some(slot) = coordinators.get(&type_id) {
            if let Ok(coordinator) =
                Arc::clone(&slot.any).downcast::<RequestCoordinator<Published<T>>>()
            {
                return coordinator;
            }
        }

        let coordinator = Arc::new(RequestCoordinator::<Published<T>>::new(
            T::resource_kind(),
            self.stats_recorder(T::resource_kind()),
        ));
        coordinators.insert(
            type_id,
            CoordinatorSlot {
                any: coordinator.clone(),
                control: coordinator.clone(),
            },
        );
        coordinator
    }

    pub fn persistent<T: CachedResource>(&self, ttl: Duration) -> PersistentCache<T> {
        PersistentCache::new(self.store(), self.clock(), ttl)
    }

    pub fn stats_recorder(&self, kind: ResourceKind) -> Arc<StatsRecorder> {
        Arc::clone(
            lock(&self.stats)
                .entry(kind)
                .or_insert_with(|| Arc::new(StatsRecorder::new(kind))),
        )
    }

    pub fn stats(&self, kind: ResourceKind) -> CacheStats {
        self.stats_recorder(kind).snapshot()
    }

    pub fn reset_stats(&self) {
        for recorder in lock(&self.stats).values() {
            recorder.reset();
        }
    }

    /// Cancel every in-flight fetch and delete every cached entry.
    ///
    /// Subscribers of live caches still need their own `invalidate()`; this
    /// only tears down the shared state.
    pub fn sign_out(&self) {
        let cancelled = lock(&self.coordinators)
            .values()
            .filter(|slot| slot.control.cancel())
            .count();

        for kind in ResourceKind::ALL {
            if let Err(err) = self.store.remove(&ResourceKey::new(kind)) {
                warn!(resource = %kind, error = %err, "Failed to clear cache entry on sign-out");
            }
        }

        info!(cancelled_fetches = cancelled, "Cleared resource caches");
    }
}
