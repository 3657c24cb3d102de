//! # batch-lookup
//!
//! Concurrent batch-lookup engine: resolves a batch of keys against a slow,
//! unreliable source over a bounded worker pool, and keeps the results safe on
//! disk as they arrive.
//!
//! ## Design Philosophy
//!
//! batch-lookup is designed to be:
//! - **Bounded** - A fixed pool of workers, each owning one fetcher
//! - **Resilient** - One bad key never sinks the batch; failures are recorded, not raised
//! - **Crash-safe** - Every resolved key is snapshotted atomically; old outputs are archived, never overwritten
//! - **Event-driven** - Hosts subscribe to events and steer the run through [`RunControl`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use batch_lookup::{Config, FetchError, Fetcher, Key, Lookup, Orchestrator, SharedFetcher};
//! use std::sync::Arc;
//!
//! struct WarrantyLookup;
//!
//! #[async_trait::async_trait]
//! impl Fetcher for WarrantyLookup {
//!     async fn fetch(&self, key: &Key) -> Result<Lookup, FetchError> {
//!         // Query the remote source here
//!         Ok(Lookup::Found(format!("end date for {}", key)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = Orchestrator::new(
//!         Config::default(),
//!         SharedFetcher::new(Arc::new(WarrantyLookup)),
//!     )?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = orchestrator.run().await?;
//!     println!("{} of {} keys written to {}", report.processed, report.total, report.output.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Batch admission
pub mod batch;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Fetcher seams supplied by the host
pub mod fetcher;
/// Run orchestration (decomposed into focused submodules)
pub mod orchestrator;
/// Progress accounting
pub mod progress;
/// Retry logic with backoff
pub mod retry;
/// Per-attempt scoped sessions
pub mod session;
/// Result accumulation and snapshots
pub mod sink;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use batch::Batch;
pub use config::{Config, DuplicateKeys, ProgressConfig, RetryConfig, RunConfig, SnapshotMode};
pub use error::{Error, FetchError, Result};
pub use fetcher::{Fetcher, FetcherFactory, SharedFetcher};
pub use orchestrator::{Orchestrator, RunControl, run_until_signal};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use retry::{Resolution, RetryPolicy};
pub use session::{Session, SessionFactory, SessionFetcher};
pub use sink::{CsvTableWriter, Entry, ResultSink, TableWriter};
pub use types::{Event, Key, Lookup, Outcome, RunReport, RunState, RunStatus, Ticket};
