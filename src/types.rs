//! Core types for batch-lookup

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::progress::ProgressSnapshot;

/// One input identifier to look up (e.g. a serial number)
///
/// Always non-empty and trimmed; construct with [`Key::new`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Create a key from raw input, trimming surrounding whitespace.
    ///
    /// Returns `None` when nothing is left after trimming.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One submitted unit of work: a key plus its position in the batch
///
/// Duplicate keys in a batch get distinct tickets, so each occurrence resolves
/// independently.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    /// Zero-based position in the batch
    pub seq: usize,
    /// The key to look up
    pub key: Key,
}

/// What a fetcher reports for a completed lookup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Lookup {
    /// The remote source answered with a value
    Found(String),
    /// The remote source answered, but had nothing for this key
    NotFound,
}

/// Resolved result of looking up a key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    /// The lookup's result payload
    Success(String),
    /// Lookup completed but yielded no answer
    NotFound,
    /// Lookup failed after exhausting retries
    Failure(String),
}

impl Outcome {
    /// Whether this outcome is a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }
}

impl From<Lookup> for Outcome {
    fn from(lookup: Lookup) -> Self {
        match lookup {
            Lookup::Found(value) => Outcome::Success(value),
            Lookup::NotFound => Outcome::NotFound,
        }
    }
}

/// Textual form written to the output table
impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success(value) => f.write_str(value),
            Outcome::NotFound => f.write_str("Not Found"),
            Outcome::Failure(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Lifecycle state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Dispatching and resolving keys
    Running,
    /// Stop requested; in-flight results are discarded
    StoppingDiscard,
    /// Stop requested; in-flight lookups finish and are flushed
    StoppingFlush,
    /// Run finished with a full or partial result set
    Completed,
    /// Run was abandoned via stop-immediately
    Aborted,
}

impl RunState {
    /// Whether the run has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }

    /// Whether new keys may still be dispatched
    pub fn accepts_dispatch(&self) -> bool {
        matches!(self, RunState::Running)
    }
}

/// Terminal status reported to the host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run finished; full when `processed == total`, partial otherwise
    Completed,
    /// Run was stopped immediately; unresolved work was discarded
    Aborted,
}

/// Final report of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Terminal status
    pub status: RunStatus,
    /// Canonical output location
    pub output: PathBuf,
    /// Number of keys with a recorded outcome
    pub processed: usize,
    /// Number of keys in the batch
    pub total: usize,
    /// Number of recorded failures
    pub failures: usize,
    /// Number of recorded not-found outcomes
    pub not_found: usize,
    /// Where the previous output was archived, if one existed
    pub archived: Option<PathBuf>,
}

impl RunReport {
    /// Whether the run stopped before resolving every key
    pub fn is_partial(&self) -> bool {
        self.processed < self.total
    }
}

/// Event emitted during a run
///
/// Events are published on a broadcast channel; the host drains them on its own
/// thread or task and renders them. Workers never call into the presentation
/// layer directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The batch was admitted and dispatch is about to begin
    RunStarted {
        /// Number of keys in the batch
        total: usize,
        /// Width of the worker pool
        workers: usize,
        /// Canonical output location
        output: PathBuf,
        /// Where the previous output was archived, if one existed
        archived: Option<PathBuf>,
    },

    /// A key received its outcome
    KeyResolved {
        /// The resolved ticket
        ticket: Ticket,
        /// The outcome recorded for it
        outcome: Outcome,
        /// Number of fetcher attempts spent
        attempts: u32,
    },

    /// Progress update (suppressed while running in background)
    Progress(ProgressSnapshot),

    /// A snapshot of the result set reached durable storage
    SnapshotWritten {
        /// Output location
        path: PathBuf,
        /// Number of rows written
        entries: usize,
    },

    /// A snapshot write failed; recorded results are still held in memory
    SnapshotFailed {
        /// Error message
        error: String,
    },

    /// The run state changed
    StateChanged {
        /// New state
        state: RunState,
    },

    /// The run reached a terminal state
    RunFinished(RunReport),
}
