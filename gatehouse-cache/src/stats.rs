//! Per-resource cache statistics.
//!
//! Counters are lock-free atomics; only the rolling response-time window
//! takes a lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gatehouse_core::ResourceKind;

/// Number of recent remote response times kept for the rolling average.
const RESPONSE_WINDOW: usize = 10;

/// Statistics about cache usage for one resource kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Reads answered by a valid cache entry.
    pub hits: u64,
    /// Reads that had to go to the coordinator.
    pub misses: u64,
    /// Remote calls actually issued (each retry counts).
    pub remote_calls: u64,
    /// Callers that joined an in-flight request instead of starting one.
    pub joined_requests: u64,
    /// Remote calls that lost the race against the timeout.
    pub timeouts: u64,
    /// Settlements that published a stale entry or the default.
    pub fallbacks: u64,
    /// Mean of the last ten successful response times.
    pub average_response_time: Option<Duration>,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Live counters for one resource kind.
#[derive(Debug)]
pub struct StatsRecorder {
    kind: ResourceKind,
    hits: AtomicU64,
    misses: AtomicU64,
    remote_calls: AtomicU64,
    joined_requests: AtomicU64,
    timeouts: AtomicU64,
    fallbacks: AtomicU64,
    response_times: Mutex<VecDeque<Duration>>,
}

impl StatsRecorder {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            remote_calls: AtomicU64::new(0),
            joined_requests: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            response_times: Mutex::new(VecDeque::with_capacity(RESPONSE_WINDOW)),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_call(&self) {
        self.remote_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_join(&self) {
        self.joined_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        let mut window = self.lock_window();
        if window.len() == RESPONSE_WINDOW {
            window.pop_front();
        }
        window.push_back(elapsed);
    }

    pub fn snapshot(&self) -> CacheStats {
        let average_response_time = {
            let window = self.lock_window();
            if window.is_empty() {
                None
            } else {
                Some(window.iter().sum::<Duration>() / window.len() as u32)
            }
        };

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
            joined_requests: self.joined_requests.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            average_response_time,
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.remote_calls.store(0, Ordering::Relaxed);
        self.joined_requests.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.fallbacks.store(0, Ordering::Relaxed);
        self.lock_window().clear();
    }

    fn lock_window(&self) -> MutexGuard<'_, VecDeque<Duration>> {
        self.response_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
