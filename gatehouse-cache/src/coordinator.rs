//! Single-flight coordination: at most one fetch per resource kind.
//!
//! The first caller spawns the attempt and every later caller for the same
//! subject joins the same shared future. The slot is released on every exit
//! path (success, failure, cancellation, panic) by a drop guard that lives
//! inside the spawned task. Cancellation always empties the slot before it
//! signals, so nobody can join an attempt that is already being torn down.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use gatehouse_core::{FetchError, ResourceKind, SubjectId};
use tracing::debug;

use crate::cancel::{cancel_pair, CancelHandle, CancelSignal};
use crate::stats::StatsRecorder;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

struct InFlight<T> {
    id: u64,
    subject: SubjectId,
    cancel: CancelHandle,
    shared: SharedFetch<T>,
    waiters: usize,
}

/// Owner of the in-flight slot for one resource kind.
pub struct RequestCoordinator<T> {
    kind: ResourceKind,
    slot: Mutex<Option<InFlight<T>>>,
    next_id: AtomicU64,
    stats: Arc<StatsRecorder>,
}

impl<T> std::fmt::Debug for RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("kind", &self.kind)
            .field("in_flight", &self.in_flight_subject())
            .finish()
    }
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(kind: ResourceKind, stats: Arc<StatsRecorder>) -> Self {
        Self {
            kind,
            slot: Mutex::new(None),
            next_id: AtomicU64::new(0),
            stats,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Join the in-flight attempt for `subject`, or start one with `factory`.
    ///
    /// An attempt for a different subject is hard-cancelled and replaced.
    /// `factory` is only called when a new attempt starts, and the future it
    /// returns is spawned onto the current tokio runtime.
    pub fn get_or_create<F, Fut>(self: &Arc<Self>, subject: &SubjectId, factory: F) -> Joined<T>
    where
        F: FnOnce(Attempt<T>) -> Fut,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let mut slot = self.lock_slot();

        if let Some(in_flight) = slot.as_mut() {
            if &in_flight.subject == subject {
                in_flight.waiters += 1;
                self.stats.record_join();
                debug!(
                    resource = %self.kind,
                    subject = %subject,
                    attempt = in_flight.id,
                    waiters = in_flight.waiters,
                    "Joining in-flight fetch"
                );
                return Joined {
                    coordinator: Arc::clone(self),
                    id: in_flight.id,
                    shared: in_flight.shared.clone(),
                };
            }
        }

        if let Some(superseded) = slot.take() {
            debug!(
                resource = %self.kind,
                superseded = %superseded.subject,
                subject = %subject,
                attempt = superseded.id,
                "Cancelling in-flight fetch for previous subject"
            );
            superseded.cancel.cancel();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (handle, signal) = cancel_pair();
        let work = factory(Attempt {
            coordinator: Arc::clone(self),
            id,
            subject: subject.clone(),
            signal: signal.clone(),
        });

        let kind = self.kind;
        let release = SlotRelease {
            coordinator: Arc::clone(self),
            id,
        };
        let task = tokio::spawn(async move {
            let _release = release;
            tokio::select! {
                biased;
                _ = signal.cancelled() => Err(FetchError::Cancelled { kind }),
                result = work => result,
            }
        });

        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(FetchError::Cancelled { kind }),
                Err(e) => Err(FetchError::Transport {
                    kind,
                    reason: format!("fetch task failed: {}", e),
                }),
            }
        }
        .boxed()
        .shared();

        debug!(resource = %self.kind, subject = %subject, attempt = id, "Starting fetch");
        *slot = Some(InFlight {
            id,
            subject: subject.clone(),
            cancel: handle,
            shared: shared.clone(),
            waiters: 1,
        });

        Joined {
            coordinator: Arc::clone(self),
            id,
            shared,
        }
    }

    /// Hard-cancel the in-flight attempt, if any. Returns whether one existed.
    pub fn cancel(&self) -> bool {
        match self.lock_slot().take() {
            Some(in_flight) => {
                debug!(resource = %self.kind, attempt = in_flight.id, "Cancelling in-flight fetch");
                in_flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock_slot().is_some()
    }

    pub fn in_flight_subject(&self) -> Option<SubjectId> {
        self.lock_slot().as_ref().map(|in_flight| in_flight.subject.clone())
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<InFlight<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_slot(&self, id: u64) {
        let mut slot = self.lock_slot();
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *slot = None;
        }
    }

    fn release_waiter(&self, id: u64) {
        let mut slot = self.lock_slot();
        let Some(in_flight) = slot.as_mut().filter(|in_flight| in_flight.id == id) else {
            return;
        };

        in_flight.waiters = in_flight.waiters.saturating_sub(1);
        if in_flight.waiters == 0 {
            if let Some(abandoned) = slot.take() {
                debug!(resource = %self.kind, attempt = id, "Last waiter left, cancelling fetch");
                abandoned.cancel.cancel();
            }
        }
    }
}

/// Context handed to the factory of a new attempt.
pub struct Attempt<T> {
    coordinator: Arc<RequestCoordinator<T>>,
    id: u64,
    subject: SubjectId,
    signal: CancelSignal,
}

impl<T> Attempt<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn kind(&self) -> ResourceKind {
        self.coordinator.kind
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    /// Run `f` only if this attempt still owns the slot.
    ///
    /// The slot lock is held while `f` runs, so a concurrent `cancel()`
    /// either happens before (and `f` is skipped) or after (and sees its
    /// effects).
    pub fn commit<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let slot = self.coordinator.lock_slot();
        match slot.as_ref() {
            Some(in_flight) if in_flight.id == self.id => Some(f()),
            _ => None,
        }
    }
}

/// Releases the slot when the spawned attempt finishes or is dropped.
struct SlotRelease<T>
where
    T: Clone + Send + Sync + 'static,
{
    coordinator: Arc<RequestCoordinator<T>>,
    id: u64,
}

impl<T> Drop for SlotRelease<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.coordinator.release_slot(self.id);
    }
}

/// One caller's stake in an in-flight attempt.
///
/// Dropping the last unsettled `Joined` cancels the attempt.
#[must_use = "dropping a Joined may cancel the fetch"]
pub struct Joined<T>
where
    T: Clone + Send + Sync + 'static,
{
    coordinator: Arc<RequestCoordinator<T>>,
    id: u64,
    shared: SharedFetch<T>,
}

impl<T> Joined<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn attempt_id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Result<T, FetchError> {
        self.shared.clone().await
    }
}

impl<T> Drop for Joined<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.coordinator.release_waiter(self.id);
    }
}
