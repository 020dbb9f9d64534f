//! The state a resource cache exposes to its subscribers.
//!
//! Staleness is explicit: every published value says where it came from,
//! and fallbacks carry the failure that caused them.

use std::time::Duration;

use gatehouse_core::{age_of, CachedResource, FetchError, SubjectId, Timestamp};
use serde::Serialize;

use crate::persistent::CacheEntry;

/// Where a published value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Nobody is signed in, or nothing has been resolved yet.
    Unauthenticated,
    /// A cache entry within TTL.
    Cache,
    /// A remote fetch that just succeeded.
    Remote,
    /// An expired cache entry served because the remote fetch failed.
    StaleFallback,
    /// The caller-supplied default served because the remote fetch failed.
    DefaultFallback,
}

impl ValueSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::StaleFallback | Self::DefaultFallback)
    }
}

/// Published value plus loading flag and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Published<T> {
    pub value: T,
    pub is_loading: bool,
    pub source: ValueSource,
    /// The subject the value was resolved for.
    pub subject: Option<SubjectId>,
    /// When the value was fetched from the remote service, if it was.
    pub fetched_at: Option<Timestamp>,
    /// The failure behind a fallback value.
    pub advisory: Option<FetchError>,
}

impl<T: CachedResource> Published<T> {
    pub fn unauthenticated() -> Self {
        Self {
            value: T::unauthenticated(),
            is_loading: false,
            source: ValueSource::Unauthenticated,
            subject: None,
            fetched_at: None,
            advisory: None,
        }
    }

    /// Placeholder for a subject whose value has not arrived yet.
    pub fn loading_for(subject: SubjectId) -> Self {
        Self {
            is_loading: true,
            subject: Some(subject),
            ..Self::unauthenticated()
        }
    }

    pub fn from_cache(entry: CacheEntry<T>) -> Self {
        Self {
            value: entry.value,
            is_loading: false,
            source: ValueSource::Cache,
            subject: Some(entry.subject),
            fetched_at: Some(entry.fetched_at),
            advisory: None,
        }
    }

    pub fn from_remote(entry: CacheEntry<T>) -> Self {
        Self {
            source: ValueSource::Remote,
            ..Self::from_cache(entry)
        }
    }

    pub fn stale_fallback(entry: CacheEntry<T>, error: FetchError) -> Self {
        Self {
            source: ValueSource::StaleFallback,
            advisory: Some(error),
            ..Self::from_cache(entry)
        }
    }

    pub fn default_fallback(subject: SubjectId, value: T, error: FetchError) -> Self {
        Self {
            value,
            is_loading: false,
            source: ValueSource::DefaultFallback,
            subject: Some(subject),
            fetched_at: None,
            advisory: Some(error),
        }
    }
}

impl<T> Published<T> {
    /// True when the value may not reflect the remote service.
    pub fn is_potentially_stale(&self) -> bool {
        self.source.is_fallback()
    }

    /// Age of the value relative to `now`, if it was ever fetched.
    pub fn staleness(&self, now: Timestamp) -> Option<Duration> {
        self.fetched_at.map(|fetched_at| age_of(fetched_at, now))
    }

    pub fn is_for(&self, subject: &SubjectId) -> bool {
        self.subject.as_ref() == Some(subject)
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gatehouse_core::{CreditBalance, ResourceKind};

    fn entry(credits: i64, fetched_at: Timestamp) -> CacheEntry<CreditBalance> {
        CacheEntry {
            subject: SubjectId::new("alice"),
            value: CreditBalance::new(credits),
            fetched_at,
        }
    }

    #[test]
    fn test_unauthenticated_is_not_loading() {
        let published = Published::<CreditBalance>::unauthenticated();
        assert!(!published.is_loading);
        assert_eq!(published.source, ValueSource::Unauthenticated);
        assert_eq!(published.value, CreditBalance::default());
        assert!(!published.is_potentially_stale());
    }

    #[test]
    fn test_loading_for_subject() {
        let published = Published::<CreditBalance>::loading_for(SubjectId::new("alice"));
        assert!(published.is_loading);
        assert!(published.is_for(&SubjectId::new("alice")));
    }

    #[test]
    fn test_stale_fallback_carries_advisory() {
        let error = FetchError::Rejected {
            kind: ResourceKind::Credits,
            status: 500,
            message: "boom".to_string(),
        };
        let published = Published::stale_fallback(entry(7, Utc::now()), error.clone());
        assert!(published.is_potentially_stale());
        assert_eq!(published.advisory, Some(error));
        assert_eq!(published.value.credits, 7);
    }

    #[test]
    fn test_staleness_measured_from_fetch_time() {
        let fetched_at = Utc::now() - chrono::Duration::seconds(30);
        let published = Published::from_cache(entry(1, fetched_at));
        let staleness = published.staleness(Utc::now()).unwrap();
        assert!(staleness >= Duration::from_secs(29));
        assert!(staleness <= Duration::from_secs(60));

        let nothing = Published::<CreditBalance>::unauthenticated();
        assert_eq!(nothing.staleness(Utc::now()), None);
    }
}
