//! Per-attempt scoped sessions.
//!
//! Some sources need a heavyweight resource for every attempt (a browser
//! process, a logged-in connection). Reusing one across retries risks carrying a
//! broken session into the next attempt, so [`SessionFetcher`] opens a fresh
//! [`Session`] per attempt and wraps it in a guard that releases it when the
//! attempt ends: on success, on error, on timeout, and when the task running
//! the attempt is aborted.

use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::types::{Key, Lookup};

/// A resource scoped to one lookup attempt
#[async_trait::async_trait]
pub trait Session: Send {
    /// Perform the lookup using this session
    async fn lookup(&mut self, key: &Key) -> Result<Lookup, FetchError>;

    /// Dispose of the resource. Called exactly once, from the guard's `Drop`.
    fn release(&mut self);
}

/// Opens sessions
#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    /// Session type produced by this factory
    type Session: Session;

    /// Acquire a new session for one attempt
    async fn open(&self) -> Result<Self::Session, FetchError>;
}

/// Releases the wrapped session when dropped
struct SessionGuard<S: Session> {
    session: S,
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.session.release();
    }
}

/// [`Fetcher`] that opens a new session for every attempt
pub struct SessionFetcher<F> {
    factory: F,
}

impl<F: SessionFactory> SessionFetcher<F> {
    /// Wrap a session factory
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait::async_trait]
impl<F: SessionFactory> Fetcher for SessionFetcher<F> {
    async fn fetch(&self, key: &Key) -> Result<Lookup, FetchError> {
        let session = self.factory.open().await?;
        let mut guard = SessionGuard { session };
        guard.session.lookup(key).await
    }
}
