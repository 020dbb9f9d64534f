//! Identity provider seam.
//!
//! The cache never authenticates anyone. It observes snapshots of who is
//! signed in and asks the provider for a bearer credential when it fetches.
//! A credential is only ever handed out for the subject it was issued to.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use gatehouse_core::{FetchError, IdentitySnapshot, SubjectId};
use tokio::sync::watch;

/// Source of the current subject and its credential.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current snapshot.
    fn snapshot(&self) -> IdentitySnapshot;

    /// Receiver that is notified on every change.
    fn subscribe(&self) -> watch::Receiver<IdentitySnapshot>;

    /// Bearer credential issued to `subject`.
    ///
    /// Fails with `Credential` when `subject` is not the one signed in, so a
    /// fetch started for one subject can never run with another's token.
    async fn credential(&self, subject: &SubjectId) -> Result<String, FetchError>;
}

/// In-process identity provider driven by the host application.
#[derive(Clone)]
pub struct IdentityHandle {
    snapshot: Arc<watch::Sender<IdentitySnapshot>>,
    credential: Arc<Mutex<Option<(SubjectId, String)>>>,
}

impl std::fmt::Debug for IdentityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityHandle")
            .field("snapshot", &*self.snapshot.borrow())
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl Default for IdentityHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityHandle {
    /// Starts in the loading state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(IdentitySnapshot::loading());
        Self {
            snapshot: Arc::new(tx),
            credential: Arc::new(Mutex::new(None)),
        }
    }

    pub fn sign_in(&self, subject: impl Into<SubjectId>, credential: impl Into<String>) {
        self.sign_in_with(IdentitySnapshot::signed_in(subject), credential);
    }

    /// Sign in with a snapshot that may carry metadata. The credential is
    /// bound to the snapshot's subject.
    pub fn sign_in_with(&self, snapshot: IdentitySnapshot, credential: impl Into<String>) {
        let credential = credential.into();
        *self.lock_credential() = snapshot
            .subject
            .clone()
            .map(|subject| (subject, credential));
        self.snapshot.send_replace(snapshot);
    }

    pub fn sign_out(&self) {
        *self.lock_credential() = None;
        self.snapshot.send_replace(IdentitySnapshot::signed_out());
    }

    pub fn set_loading(&self) {
        self.snapshot.send_replace(IdentitySnapshot::loading());
    }

    fn lock_credential(&self) -> std::sync::MutexGuard<'_, Option<(SubjectId, String)>> {
        self.credential.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl IdentityProvider for IdentityHandle {
    fn snapshot(&self) -> IdentitySnapshot {
        self.snapshot.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<IdentitySnapshot> {
        self.snapshot.subscribe()
    }

    async fn credential(&self, subject: &SubjectId) -> Result<String, FetchError> {
        match &*self.lock_credential() {
            Some((owner, token)) if owner == subject => Ok(token.clone()),
            Some((owner, _)) => Err(FetchError::Credential {
                reason: format!("{} is signed in, not {}", owner, subject),
            }),
            None => Err(FetchError::Credential {
                reason: "no subject is signed in".to_string(),
            }),
        }
    }
}
