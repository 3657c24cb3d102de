//! Fetcher seams supplied by the host application.
//!
//! The orchestrator never talks to the remote source itself. It asks a
//! [`FetcherFactory`] for one [`Fetcher`] per worker slot before the run starts
//! and hands each worker its own instance, so fetchers need no shared mutable
//! state between calls.

use crate::error::FetchError;
use crate::types::{Key, Lookup};
use std::sync::Arc;

/// Performs a single lookup against the remote source
///
/// Implementations may be slow or flaky; the retry layer bounds every call with
/// a timeout and retries retryable errors. `Ok(Lookup::NotFound)` is a valid
/// answer and is never retried.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Look up one key
    async fn fetch(&self, key: &Key) -> Result<Lookup, FetchError>;
}

/// Builds fetchers, one per worker slot
///
/// Construction failure (missing driver binary, missing credentials) is a fatal
/// startup condition: the run is not attempted and nothing is written.
pub trait FetcherFactory: Send + Sync {
    /// Create the fetcher used by worker `worker` (0-based)
    fn create(&self, worker: usize) -> Result<Arc<dyn Fetcher>, FetchError>;
}

impl<F> FetcherFactory for F
where
    F: Fn(usize) -> Result<Arc<dyn Fetcher>, FetchError> + Send + Sync,
{
    fn create(&self, worker: usize) -> Result<Arc<dyn Fetcher>, FetchError> {
        self(worker)
    }
}

/// Factory handing the same thread-safe fetcher to every worker
#[derive(Clone)]
pub struct SharedFetcher(Arc<dyn Fetcher>);

impl SharedFetcher {
    /// Share `fetcher` across all workers
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self(fetcher)
    }
}

impl FetcherFactory for SharedFetcher {
    fn create(&self, _worker: usize) -> Result<Arc<dyn Fetcher>, FetchError> {
        Ok(Arc::clone(&self.0))
    }
}

/// Build one fetcher per worker, stopping at the first construction failure
pub(crate) fn build_pool(
    factory: &dyn FetcherFactory,
    workers: usize,
) -> Result<Vec<Arc<dyn Fetcher>>, FetchError> {
    (0..workers).map(|worker| factory.create(worker)).collect()
}
