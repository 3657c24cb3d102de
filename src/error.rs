//! Error types for batch-lookup
//!
//! Two layers of errors exist:
//! - [`Error`] is returned by the orchestrator and the storage layer. Only a few
//!   of its variants can end a run, and those are reported before any key is
//!   dispatched (see [`Error::is_fatal_startup`]).
//! - [`FetchError`] is returned by a single lookup attempt. It never escapes the
//!   retry layer: exhausted or permanent failures become
//!   [`Outcome::Failure`](crate::types::Outcome::Failure) entries in the result set.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for batch-lookup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for batch-lookup
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_workers")
        key: Option<String>,
    },

    /// The batch source file does not exist
    #[error("batch source not found: {}", .0.display())]
    BatchSourceMissing(PathBuf),

    /// The batch source exists but contains no keys
    #[error("batch source contains no keys: {}", .0.display())]
    EmptyBatch(PathBuf),

    /// A fetcher could not be constructed (missing runtime dependency, credentials, ...)
    #[error("fetcher unavailable: {0}")]
    FetcherUnavailable(String),

    /// The orchestrator was asked to run more than once
    #[error("run already started")]
    AlreadyStarted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tabular output error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error belongs to the fatal startup class: the run was never
    /// attempted and no output was produced.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::BatchSourceMissing(_)
                | Error::EmptyBatch(_)
                | Error::FetcherUnavailable(_)
        )
    }

    /// Machine-readable error code for hosts that surface errors to users
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::BatchSourceMissing(_) => "batch_source_missing",
            Error::EmptyBatch(_) => "empty_batch",
            Error::FetcherUnavailable(_) => "fetcher_unavailable",
            Error::AlreadyStarted => "already_started",
            Error::Io(_) => "io_error",
            Error::Csv(_) => "csv_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Error produced by a single lookup attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Temporary failure talking to the remote source (busy, reset, bad page load)
    #[error("{0}")]
    Transient(String),

    /// The attempt exceeded its time budget
    #[error("attempt timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The per-attempt resource (connection, browser session) could not be acquired
    #[error("session error: {0}")]
    Session(String),

    /// The remote source rejected the key in a way retrying cannot fix
    #[error("{0}")]
    Permanent(String),
}

impl FetchError {
    /// Shorthand for a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        FetchError::Transient(msg.into())
    }

    /// Shorthand for a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        FetchError::Permanent(msg.into())
    }
}
