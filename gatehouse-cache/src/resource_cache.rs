//! The orchestrator consumers hold: `{ value, is_loading, refresh, invalidate }`.
//!
//! A `ResourceCache` owns its published state. It consults the persistent
//! entry first and only goes through the shared coordinator on a miss. Each
//! subject change bumps an epoch, and a settlement is published only if its
//! epoch and subject are still current when it arrives.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use gatehouse_core::{
    CachedResource, GatehouseResult, IdentitySnapshot, ResourcePolicy, SubjectId,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::coordinator::RequestCoordinator;
use crate::fetcher::{Fallback, ResilientFetcher, ResourceSource};
use crate::identity::IdentityProvider;
use crate::persistent::PersistentCache;
use crate::published::Published;
use crate::registry::CacheRegistry;
use crate::stats::{CacheStats, StatsRecorder};

struct ViewState {
    identity: IdentitySnapshot,
    epoch: u64,
}

struct Inner<T: CachedResource> {
    cache: PersistentCache<T>,
    coordinator: Arc<RequestCoordinator<Published<T>>>,
    fetcher: ResilientFetcher<T>,
    stats: Arc<StatsRecorder>,
    view: Mutex<ViewState>,
    published: watch::Sender<Published<T>>,
}

/// Identity-scoped view of one remote resource.
pub struct ResourceCache<T: CachedResource> {
    inner: Arc<Inner<T>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`ResourceCache`].
pub struct ResourceCacheBuilder<'a, T: CachedResource> {
    registry: &'a CacheRegistry,
    source: Arc<dyn ResourceSource<T>>,
    policy: ResourcePolicy,
    fallback: Fallback<T>,
    identity: IdentitySnapshot,
}

impl<'a, T: CachedResource> ResourceCacheBuilder<'a, T> {
    pub fn policy(mut self, policy: ResourcePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn fallback(mut self, fallback: Fallback<T>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Identity to seed the published state with.
    pub fn identity(mut self, identity: IdentitySnapshot) -> Self {
        self.identity = identity;
        self
    }

    /// Build the cache. The only I/O is a synchronous cache read, so a
    /// valid entry is visible before the first await.
    pub fn build(self) -> GatehouseResult<ResourceCache<T>> {
        let kind = T::resource_kind();
        self.policy.validate(kind)?;

        let cache = self.registry.persistent::<T>(self.policy.ttl);
        let stats = self.registry.stats_recorder(kind);

        let initial = match self.identity.active_subject() {
            Some(subject) => match cache.read(subject) {
                Some(entry) => {
                    stats.record_hit();
                    Published::from_cache(entry)
                }
                None => Published::loading_for(subject.clone()),
            },
            None => Published {
                is_loading: !self.identity.ready,
                ..Published::unauthenticated()
            },
        };

        let fetcher = ResilientFetcher::new(
            self.source,
            cache.clone(),
            self.policy,
            self.fallback,
            Arc::clone(&stats),
        );
        let (published, _rx) = watch::channel(initial);

        Ok(ResourceCache {
            inner: Arc::new(Inner {
                cache,
                coordinator: self.registry.coordinator::<T>(),
                fetcher,
                stats,
                view: Mutex::new(ViewState {
                    identity: self.identity,
                    epoch: 0,
                }),
                published,
            }),
            watcher: Mutex::new(None),
        })
    }
}

impl<T: CachedResource> ResourceCache<T> {
    /// Start building a cache backed by `registry` and fetching from `source`.
    ///
    /// Defaults: the kind's built-in policy, the unauthenticated value as
    /// fallback, identity still loading.
    pub fn builder(
        registry: &CacheRegistry,
        source: Arc<dyn ResourceSource<T>>,
    ) -> ResourceCacheBuilder<'_, T> {
        ResourceCacheBuilder {
            registry,
            source,
            policy: ResourcePolicy::defaults_for(T::resource_kind()),
            fallback: Fallback::Value(T::unauthenticated()),
            identity: IdentitySnapshot::loading(),
        }
    }

    pub fn snapshot(&self) -> Published<T> {
        self.inner.published.borrow().clone()
    }

    pub fn value(&self) -> T {
        self.inner.published.borrow().value.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.published.borrow().is_loading
    }

    pub fn subscribe(&self) -> watch::Receiver<Published<T>> {
        self.inner.published.subscribe()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn policy(&self) -> &ResourcePolicy {
        self.inner.fetcher.policy()
    }

    /// React to an identity snapshot.
    ///
    /// Not ready: nothing happens. Signed out: `invalidate()`. Signed in:
    /// cache hit publishes at once, a miss fetches and resolves when the
    /// result (or fallback) is published or discarded.
    pub async fn sync_identity(&self, identity: IdentitySnapshot) {
        self.inner.sync_identity(identity).await;
    }

    /// Drop the cached entry and fetch again, even if it was still valid.
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    /// Cancel any fetch, clear the entry and publish the unauthenticated
    /// value. Starts no new fetch.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// Follow `provider` in a background task until this cache is dropped.
    ///
    /// A change that arrives while a load is running abandons that load.
    pub fn watch_identity(&self, provider: &dyn IdentityProvider) {
        let inner = Arc::clone(&self.inner);
        let rx = provider.subscribe();
        let handle = tokio::spawn(watch_loop(inner, rx));

        if let Some(previous) = lock(&self.watcher).replace(handle) {
            previous.abort();
        }
    }
}

impl<T: CachedResource> Drop for ResourceCache<T> {
    fn drop(&mut self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
    }
}

impl<T: CachedResource> std::fmt::Debug for ResourceCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("kind", &T::resource_kind())
            .field("published", &*self.inner.published.borrow())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn watch_loop<T: CachedResource>(
    inner: Arc<Inner<T>>,
    mut rx: watch::Receiver<IdentitySnapshot>,
) {
    loop {
        let snapshot = rx.borrow_and_update().clone();

        let settled = tokio::select! {
            _ = inner.sync_identity(snapshot) => true,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                false
            }
        };

        if settled && rx.changed().await.is_err() {
            break;
        }
    }

    debug!(resource = %T::resource_kind(), "Identity provider closed, stopping watcher");
}

impl<T: CachedResource> Inner<T> {
    fn lock_view(&self) -> MutexGuard<'_, ViewState> {
        lock(&self.view)
    }

    async fn sync_identity(&self, identity: IdentitySnapshot) {
        let kind = T::resource_kind();

        if !identity.ready {
            debug!(resource = %kind, "Identity not ready, deferring fetch");
            self.lock_view().identity = identity;
            return;
        }

        let Some(subject) = identity.subject.clone() else {
            self.lock_view().identity = identity;
            self.invalidate();
            return;
        };

        let epoch = {
            let mut view = self.lock_view();
            if view.identity.active_subject() != Some(&subject) {
                view.epoch += 1;
                debug!(resource = %kind, subject = %subject, epoch = view.epoch, "Subject changed");
            }
            view.identity = identity;
            view.epoch
        };

        self.load(subject, epoch, false).await;
    }

    async fn refresh(&self) {
        let current = {
            let view = self.lock_view();
            view.identity
                .active_subject()
                .map(|subject| (subject.clone(), view.epoch))
        };

        match current {
            Some((subject, epoch)) => self.load(subject, epoch, true).await,
            None => debug!(resource = %T::resource_kind(), "Nobody signed in, nothing to refresh"),
        }
    }

    fn invalidate(&self) {
        self.lock_view().epoch += 1;
        self.coordinator.cancel();
        self.cache.clear();
        self.published.send_replace(Published::unauthenticated());
        debug!(resource = %T::resource_kind(), "Invalidated cache");
    }

    async fn load(&self, subject: SubjectId, epoch: u64, force: bool) {
        let kind = T::resource_kind();

        if force {
            self.cache.clear();
        } else if let Some(entry) = self.cache.read(&subject) {
            self.stats.record_hit();
            debug!(resource = %kind, subject = %subject, "Cache hit");
            self.publish_if_current(epoch, &subject, Published::from_cache(entry));
            return;
        }

        self.stats.record_miss();
        self.mark_loading(epoch, &subject);

        let identity = self.lock_view().identity.clone();
        let fetcher = self.fetcher.clone();
        let joined = self
            .coordinator
            .get_or_create(&subject, move |attempt| async move {
                fetcher.run(attempt, identity).await
            });

        match joined.wait().await {
            Ok(published) => {
                self.publish_if_current(epoch, &subject, published);
            }
            Err(err) => {
                debug!(resource = %kind, subject = %subject, error = %err, "Fetch ended without a result");
                self.settle_without_result(epoch, &subject);
            }
        }
    }

    fn is_current(view: &ViewState, epoch: u64, subject: &SubjectId) -> bool {
        view.epoch == epoch && view.identity.active_subject() == Some(subject)
    }

    fn publish_if_current(&self, epoch: u64, subject: &SubjectId, published: Published<T>) -> bool {
        let view = self.lock_view();
        if !Self::is_current(&view, epoch, subject) {
            debug!(
                resource = %T::resource_kind(),
                subject = %subject,
                "Discarding result for a subject that is no longer current"
            );
            return false;
        }
        self.published.send_replace(published);
        true
    }

    fn mark_loading(&self, epoch: u64, subject: &SubjectId) {
        let view = self.lock_view();
        if Self::is_current(&view, epoch, subject) {
            self.published.send_modify(|published| {
                if published.is_for(subject) {
                    published.is_loading = true;
                } else {
                    *published = Published::loading_for(subject.clone());
                }
            });
        }
    }

    /// Cancelled from outside (another cache's `invalidate`, registry
    /// sign-out) while this subject is still current: stop showing loading.
    fn settle_without_result(&self, epoch: u64, subject: &SubjectId) {
        let view = self.lock_view();
        if Self::is_current(&view, epoch, subject) {
            self.published.send_if_modified(|published| {
                let was_loading = published.is_loading;
                published.is_loading = false;
                was_loading
            });
        }
    }
}
