//! Identity types for the current caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Identifier of an authenticated caller, as issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Point-in-time view of the identity provider.
///
/// `ready == false` means the provider has not finished loading and callers
/// must not fetch yet. `ready == true` with no subject means signed out.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub subject: Option<SubjectId>,
    pub ready: bool,
    /// Public profile metadata published by the identity provider.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl IdentitySnapshot {
    /// Provider still loading.
    pub fn loading() -> Self {
        Self::default()
    }

    /// Provider loaded, nobody signed in.
    pub fn signed_out() -> Self {
        Self {
            subject: None,
            ready: true,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn signed_in(subject: impl Into<SubjectId>) -> Self {
        Self {
            subject: Some(subject.into()),
            ready: true,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The subject to fetch for, if fetching is allowed right now.
    pub fn active_subject(&self) -> Option<&SubjectId> {
        if self.ready {
            self.subject.as_ref()
        } else {
            None
        }
    }

    pub fn is_signed_out(&self) -> bool {
        self.ready && self.subject.is_none()
    }
}
