//! Gatehouse Test Utilities
//!
//! Centralized test infrastructure for the Gatehouse workspace:
//! - Scripted resource sources with per-subject responses and call counts
//! - Stores that fail on demand
//! - Proptest generators for subjects, payloads and policies
//! - Fixtures for registries on a manual clock

// Re-export the types most tests touch
pub use gatehouse_cache::{
    CacheRegistry, DurableStore, Fallback, IdentityHandle, InMemoryStore, Published,
    ResourceCache, ResourceKey, ResourceSource, ValueSource,
};
pub use gatehouse_core::{
    CachedResource, CreditBalance, FetchError, IdentitySnapshot, ManualClock, ResourceKind,
    ResourcePolicy, Role, StoreError, SubjectId, UserRole,
};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ============================================================================
// MOCK SOURCES
// ============================================================================

/// One scripted response.
#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Respond(T),
    /// Respond after a delay on the tokio clock.
    RespondAfter(Duration, T),
    /// Fail with this HTTP status.
    Reject(u16),
    /// Never settle.
    Hang,
}

/// Resource source that plays back scripted responses per subject.
///
/// Each subject has a queue; once it is empty the source repeats its
/// fallback step (`Hang` unless set with [`ScriptedSource::always`]).
#[derive(Debug)]
pub struct ScriptedSource<T> {
    scripts: Mutex<HashMap<SubjectId, VecDeque<Scripted<T>>>>,
    otherwise: Scripted<T>,
    calls: Mutex<Vec<SubjectId>>,
}

impl<T: CachedResource> Default for ScriptedSource<T> {
    fn default() -> Self {
        Self::always(Scripted::Hang)
    }
}

impl<T: CachedResource> ScriptedSource<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that answers every call with `step`.
    pub fn always(step: Scripted<T>) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            otherwise: step,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue `step` for the next unanswered call for `subject`.
    pub fn then(self, subject: impl Into<SubjectId>, step: Scripted<T>) -> Self {
        self.push(subject, step);
        self
    }

    pub fn push(&self, subject: impl Into<SubjectId>, step: Scripted<T>) {
        lock(&self.scripts)
            .entry(subject.into())
            .or_default()
            .push_back(step);
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Total calls so far, across subjects.
    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls_for(&self, subject: &SubjectId) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|called| *called == subject)
            .count()
    }

    fn next_step(&self, subject: &SubjectId) -> Scripted<T> {
        lock(&self.calls).push(subject.clone());
        lock(&self.scripts)
            .get_mut(subject)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.otherwise.clone())
    }
}

#[async_trait]
impl<T: CachedResource> ResourceSource<T> for ScriptedSource<T> {
    async fn fetch(&self, subject: &SubjectId) -> Result<T, FetchError> {
        match self.next_step(subject) {
            Scripted::Respond(value) => Ok(value),
            Scripted::RespondAfter(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Scripted::Reject(status) => Err(FetchError::Rejected {
                kind: T::resource_kind(),
                status,
                message: "scripted rejection".to_string(),
            }),
            Scripted::Hang => std::future::pending().await,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK STORES
// ============================================================================

/// Store whose every operation reports the backend as unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl DurableStore for UnavailableStore {
    fn load(&self, _key: &ResourceKey) -> Result<Option<Vec<u8>>, StoreError> {
        Err(unavailable())
    }

    fn store(&self, _key: &ResourceKey, _bytes: &[u8]) -> Result<(), StoreError> {
        Err(unavailable())
    }

    fn remove(&self, _key: &ResourceKey) -> Result<bool, StoreError> {
        Err(unavailable())
    }
}

fn unavailable() -> StoreError {
    StoreError::Unavailable {
        reason: "store offline".to_string(),
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Gatehouse types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a subject id shaped like an identity provider user id.
    pub fn arb_subject_id() -> impl Strategy<Value = SubjectId> {
        "user_[a-zA-Z0-9]{8,24}".prop_map(SubjectId::new)
    }

    /// Generate two different subject ids.
    pub fn arb_subject_pair() -> impl Strategy<Value = (SubjectId, SubjectId)> {
        (arb_subject_id(), arb_subject_id()).prop_filter("subjects must differ", |(a, b)| a != b)
    }

    pub fn arb_role() -> impl Strategy<Value = Role> {
        prop_oneof![Just(Role::User), Just(Role::Admin)]
    }

    pub fn arb_user_role() -> impl Strategy<Value = UserRole> {
        (
            proptest::option::of("[a-z0-9_]{4,16}"),
            proptest::option::of(arb_role()),
            proptest::option::of("[A-Z][a-z]{1,10}"),
            proptest::option::of("[A-Z][a-z]{1,10}"),
        )
            .prop_map(|(user_id, role, first_name, last_name)| UserRole {
                user_id,
                role,
                first_name,
                last_name,
            })
    }

    pub fn arb_credit_balance() -> impl Strategy<Value = CreditBalance> {
        (0i64..1_000_000).prop_map(CreditBalance::new)
    }

    /// Generate a TTL between one second and one day.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..86_400).prop_map(Duration::from_secs)
    }

    /// Generate a policy that passes validation.
    pub fn arb_valid_policy() -> impl Strategy<Value = ResourcePolicy> {
        (arb_ttl(), 1u64..30_000, 0u32..=5, 0u64..10_000).prop_map(
            |(ttl, timeout_ms, max_retries, backoff_ms)| ResourcePolicy {
                ttl,
                fetch_timeout: Duration::from_millis(timeout_ms),
                max_retries,
                retry_backoff: Duration::from_millis(backoff_ms),
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built registries, subjects and policies for common scenarios.

    use super::*;

    pub fn alice() -> SubjectId {
        SubjectId::new("user_alice")
    }

    pub fn bob() -> SubjectId {
        SubjectId::new("user_bob")
    }

    pub fn signed_in(subject: &SubjectId) -> IdentitySnapshot {
        IdentitySnapshot::signed_in(subject.clone())
    }

    /// Registry over an in-memory store and a manual clock.
    pub fn manual_registry() -> (Arc<CacheRegistry>, ManualClock, Arc<InMemoryStore>) {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryStore::new());
        let registry = CacheRegistry::new(store.clone(), Arc::new(clock.clone()));
        (Arc::new(registry), clock, store)
    }

    /// Role policy with short timers, for tests on a paused tokio clock.
    pub fn role_policy() -> ResourcePolicy {
        ResourcePolicy::role_defaults()
            .with_fetch_timeout(Duration::from_secs(5))
            .with_max_retries(1)
            .with_retry_backoff(Duration::from_secs(1))
    }

    pub fn role(subject: &SubjectId, role: Role) -> UserRole {
        UserRole::with_role(subject.as_str(), role)
    }

    /// A role cache with the role policy and the `user` failure default.
    pub fn role_cache(
        registry: &CacheRegistry,
        source: Arc<ScriptedSource<UserRole>>,
    ) -> ResourceCache<UserRole> {
        ResourceCache::<UserRole>::builder(registry, source)
            .policy(role_policy())
            .fallback(Fallback::Value(UserRole::fallback_user()))
            .build()
            .expect("role policy is valid")
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Checks on published state.

    use super::*;
    use std::fmt::Debug;

    /// Assert the published value settled for `subject` with `source`.
    pub fn assert_settled<T: PartialEq + Debug>(
        published: &Published<T>,
        subject: &SubjectId,
        source: ValueSource,
        value: &T,
    ) {
        assert!(!published.is_loading, "still loading: {:?}", published);
        assert!(published.is_for(subject), "wrong subject: {:?}", published);
        assert_eq!(published.source, source, "wrong source: {:?}", published);
        assert_eq!(&published.value, value);
    }

    /// Assert the published state is the signed-out default.
    pub fn assert_unauthenticated<T: CachedResource>(published: &Published<T>) {
        assert_eq!(published, &Published::<T>::unauthenticated());
    }
}
