//! Timeout race, bounded retry and the fallback chain.
//!
//! ```text
//! idle -> racing(fetch vs timeout) -> success
//!                                  -> timeout   -> backoff -> racing (while retries remain)
//!                                  -> hard-error -> stale entry | default
//! ```
//!
//! Timeouts are soft: the abandoned call is dropped and another race may
//! start. The attempt's `CancelSignal` is hard: it is checked at every
//! suspension point and ends the attempt without retry or fallback.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::{CachedResource, FetchError, IdentitySnapshot, ResourcePolicy, SubjectId};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::coordinator::Attempt;
use crate::persistent::PersistentCache;
use crate::published::Published;
use crate::stats::StatsRecorder;

/// Remote service for one resource kind.
///
/// # Implementation Requirements
///
/// - Must be cancel-safe: the future may be dropped at any await point
/// - Non-2xx responses map to `FetchError::Rejected`
#[async_trait]
pub trait ResourceSource<T>: Send + Sync {
    async fn fetch(&self, subject: &SubjectId) -> Result<T, FetchError>;
}

/// Retry budget of one logical fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Races started so far.
    pub attempts: u32,
    /// Extra races allowed after a timeout.
    pub max_retries: u32,
}

impl RetryState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_retries,
        }
    }

    pub fn begin_race(&mut self) {
        self.attempts += 1;
    }

    pub fn can_retry(&self) -> bool {
        self.attempts <= self.max_retries
    }
}

/// Value served when the fetch fails and no stale entry exists.
#[derive(Clone)]
pub enum Fallback<T> {
    Value(T),
    /// Derived from the identity at the time of the fetch.
    FromIdentity(Arc<dyn Fn(&IdentitySnapshot) -> T + Send + Sync>),
}

impl<T: Clone> Fallback<T> {
    pub fn from_identity(f: impl Fn(&IdentitySnapshot) -> T + Send + Sync + 'static) -> Self {
        Self::FromIdentity(Arc::new(f))
    }

    pub fn resolve(&self, identity: &IdentitySnapshot) -> T {
        match self {
            Self::Value(value) => value.clone(),
            Self::FromIdentity(f) => f(identity),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::FromIdentity(_) => f.write_str("FromIdentity(..)"),
        }
    }
}

/// Runs one logical fetch for a resource kind.
pub struct ResilientFetcher<T> {
    source: Arc<dyn ResourceSource<T>>,
    cache: PersistentCache<T>,
    policy: ResourcePolicy,
    fallback: Fallback<T>,
    stats: Arc<StatsRecorder>,
}

impl<T: CachedResource> Clone for ResilientFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            cache: self.cache.clone(),
            policy: self.policy.clone(),
            fallback: self.fallback.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T: CachedResource> ResilientFetcher<T> {
    pub fn new(
        source: Arc<dyn ResourceSource<T>>,
        cache: PersistentCache<T>,
        policy: ResourcePolicy,
        fallback: Fallback<T>,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            source,
            cache,
            policy,
            fallback,
            stats,
        }
    }

    pub fn policy(&self) -> &ResourcePolicy {
        &self.policy
    }

    /// Race the remote call against the timeout, retrying timeouts.
    ///
    /// Rejections are returned at once. A timeout with no retries left
    /// becomes `RetriesExhausted`.
    pub async fn fetch_with_retry(
        &self,
        subject: &SubjectId,
        cancel: &CancelSignal,
    ) -> Result<T, FetchError> {
        let kind = T::resource_kind();
        let mut retry = RetryState::new(self.policy.max_retries);

        loop {
            retry.begin_race();
            self.stats.record_remote_call();
            let started = Instant::now();

            let raced = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled { kind }),
                raced = tokio::time::timeout(self.policy.fetch_timeout, self.source.fetch(subject)) => raced,
            };

            let timed_out = match raced {
                Ok(Ok(value)) => {
                    let elapsed = started.elapsed();
                    self.stats.record_response_time(elapsed);
                    info!(
                        resource = %kind,
                        subject = %subject,
                        attempt = retry.attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Fetched resource"
                    );
                    return Ok(value);
                }
                // A transport-level timeout counts the same as losing the race.
                Ok(Err(err)) if err.is_timeout() => err,
                Ok(Err(err)) => {
                    warn!(resource = %kind, subject = %subject, error = %err, "Fetch rejected");
                    return Err(err);
                }
                Err(_) => FetchError::Timeout {
                    kind,
                    after: self.policy.fetch_timeout,
                },
            };

            self.stats.record_timeout();
            if !retry.can_retry() {
                warn!(
                    resource = %kind,
                    subject = %subject,
                    attempts = retry.attempts,
                    error = %timed_out,
                    "Fetch timed out, no retries left"
                );
                return Err(FetchError::RetriesExhausted {
                    kind,
                    attempts: retry.attempts,
                });
            }

            warn!(
                resource = %kind,
                subject = %subject,
                attempt = retry.attempts,
                backoff_ms = self.policy.retry_backoff.as_millis() as u64,
                error = %timed_out,
                "Fetch timed out, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled { kind }),
                _ = tokio::time::sleep(self.policy.retry_backoff) => {}
            }
        }
    }

    /// Run a full attempt: fetch, commit to the cache, or fall back.
    ///
    /// Only ever fails with `Cancelled`, when the attempt was cancelled or
    /// lost its slot before it could write the cache.
    pub async fn run(
        &self,
        attempt: Attempt<Published<T>>,
        identity: IdentitySnapshot,
    ) -> Result<Published<T>, FetchError> {
        let kind = T::resource_kind();
        let subject = attempt.subject().clone();

        match self.fetch_with_retry(&subject, attempt.signal()).await {
            Ok(value) => match attempt.commit(|| self.cache.write(&subject, &value)) {
                Some(entry) => Ok(Published::from_remote(entry)),
                None => {
                    debug!(resource = %kind, subject = %subject, "Discarding result of superseded fetch");
                    Err(FetchError::Cancelled { kind })
                }
            },
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => Ok(self.recover(&subject, &identity, err)),
        }
    }

    /// Fallback chain: stale entry for `subject`, then the default.
    pub fn recover(
        &self,
        subject: &SubjectId,
        identity: &IdentitySnapshot,
        error: FetchError,
    ) -> Published<T> {
        self.stats.record_fallback();

        match self.cache.read_stale(subject) {
            Some(entry) => {
                warn!(
                    resource = %T::resource_kind(),
                    subject = %subject,
                    error = %error,
                    fetched_at = %entry.fetched_at,
                    "Serving stale cache entry"
                );
                Published::stale_fallback(entry, error)
            }
            None => {
                warn!(
                    resource = %T::resource_kind(),
                    subject = %subject,
                    error = %error,
                    "Serving default value"
                );
                Published::default_fallback(subject.clone(), self.fallback.resolve(identity), error)
            }
        }
    }
}
