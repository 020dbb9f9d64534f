//! One signed-in profile: the shared registry, the identity handle and the
//! three resource caches wired to the HTTP sources.

use std::sync::Arc;

use gatehouse_cache::{
    CacheRegistry, CacheStats, DurableStore, Fallback, IdentityHandle, IdentityProvider,
    InMemoryStore, LmdbStore, ResourceCache,
};
use gatehouse_core::{
    CreditBalance, IdentitySnapshot, ResourceKind, SystemClock, UserRole, WorkflowBundle,
};
use tracing::info;

use crate::config::GatehouseConfig;
use crate::error::ClientResult;
use crate::rest::RestClient;
use crate::sources::{CreditSource, RoleSource, WorkflowSource};

pub struct Gatehouse {
    registry: CacheRegistry,
    identity: IdentityHandle,
    roles: ResourceCache<UserRole>,
    credits: ResourceCache<CreditBalance>,
    workflow: ResourceCache<WorkflowBundle>,
}

impl std::fmt::Debug for Gatehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatehouse")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Gatehouse {
    /// Open the configured store (LMDB if a path is set) and build the caches.
    pub fn open(config: &GatehouseConfig) -> ClientResult<Self> {
        config.validate()?;
        let store: Arc<dyn DurableStore> = match &config.store.path {
            Some(path) => Arc::new(LmdbStore::open(path, config.store.max_size_mb)?),
            None => Arc::new(InMemoryStore::new()),
        };
        Self::with_store(config, store)
    }

    /// Build the caches over `store`. Fails if `config` does not validate.
    pub fn with_store(config: &GatehouseConfig, store: Arc<dyn DurableStore>) -> ClientResult<Self> {
        config.validate()?;
        let registry = CacheRegistry::new(store, Arc::new(SystemClock));
        let identity = IdentityHandle::new();
        let rest = RestClient::new(config, Arc::new(identity.clone()))?;
        let snapshot = identity.snapshot();

        let roles = ResourceCache::<UserRole>::builder(
            &registry,
            Arc::new(RoleSource::new(rest.clone())),
        )
        .policy(config.policy(ResourceKind::Role))
        .fallback(Fallback::Value(UserRole::fallback_user()))
        .identity(snapshot.clone())
        .build()?;

        let credits = ResourceCache::<CreditBalance>::builder(
            &registry,
            Arc::new(CreditSource::new(rest.clone())),
        )
        .policy(config.policy(ResourceKind::Credits))
        .fallback(Fallback::from_identity(CreditBalance::from_identity))
        .identity(snapshot.clone())
        .build()?;

        let workflow = ResourceCache::<WorkflowBundle>::builder(
            &registry,
            Arc::new(WorkflowSource::new(rest)),
        )
        .policy(config.policy(ResourceKind::Workflow))
        .identity(snapshot)
        .build()?;

        Ok(Self {
            registry,
            identity,
            roles,
            credits,
            workflow,
        })
    }

    pub fn identity(&self) -> &IdentityHandle {
        &self.identity
    }

    pub fn roles(&self) -> &ResourceCache<UserRole> {
        &self.roles
    }

    pub fn credits(&self) -> &ResourceCache<CreditBalance> {
        &self.credits
    }

    pub fn workflow(&self) -> &ResourceCache<WorkflowBundle> {
        &self.workflow
    }

    /// Make every cache follow the identity handle. Needs a tokio runtime.
    pub fn watch_identity(&self) {
        self.roles.watch_identity(&self.identity);
        self.credits.watch_identity(&self.identity);
        self.workflow.watch_identity(&self.identity);
    }

    /// Bring every cache up to date with `identity` and wait for all three.
    pub async fn sync(&self, identity: IdentitySnapshot) {
        tokio::join!(
            self.roles.sync_identity(identity.clone()),
            self.credits.sync_identity(identity.clone()),
            self.workflow.sync_identity(identity),
        );
    }

    /// Sign out and tear down every cache immediately.
    pub fn sign_out(&self) {
        self.identity.sign_out();
        self.registry.sign_out();
        self.roles.invalidate();
        self.credits.invalidate();
        self.workflow.invalidate();
        info!("Signed out");
    }

    pub fn stats(&self) -> Vec<(ResourceKind, CacheStats)> {
        ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, self.registry.stats(kind)))
            .collect()
    }
}
