//! Result accumulation and durable snapshots.
//!
//! [`ResultSink`] owns the result set of a run. Workers hand it outcomes through
//! [`ResultSink::record`]; it never lets two outcomes land for the same ticket.
//! Snapshots copy the rows under the lock and write them outside it, through a
//! temporary file in the output directory that is renamed over the canonical
//! output, so readers only ever see a complete table.

use crate::error::{Error, Result};
use crate::types::{Outcome, Ticket};
use chrono::Local;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Maximum number of suffixes tried when an archive name is already taken
const MAX_ARCHIVE_ATTEMPTS: u32 = 9999;

/// One recorded row of the result set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// The resolved ticket
    pub ticket: Ticket,
    /// Its outcome
    pub outcome: Outcome,
}

/// Serializes a result set into a tabular artifact
pub trait TableWriter: Send + Sync {
    /// Write every row, in the given order, to `out`
    fn write_table(&self, out: &mut dyn Write, rows: &[Entry]) -> Result<()>;
}

/// CSV output with a header row and one `key,outcome` row per entry
#[derive(Clone, Debug)]
pub struct CsvTableWriter {
    key_header: String,
    outcome_header: String,
}

impl CsvTableWriter {
    /// Create a writer with the given column headers
    pub fn new(key_header: impl Into<String>, outcome_header: impl Into<String>) -> Self {
        Self {
            key_header: key_header.into(),
            outcome_header: outcome_header.into(),
        }
    }
}

impl Default for CsvTableWriter {
    fn default() -> Self {
        Self::new("Key", "Outcome")
    }
}

impl TableWriter for CsvTableWriter {
    fn write_table(&self, out: &mut dyn Write, rows: &[Entry]) -> Result<()> {
        let mut csv = csv::Writer::from_writer(out);
        csv.write_record([self.key_header.as_str(), self.outcome_header.as_str()])?;
        for entry in rows {
            csv.write_record([entry.ticket.key.as_str(), entry.outcome.to_string().as_str()])?;
        }
        csv.flush()?;
        Ok(())
    }
}

struct SinkState {
    entries: Vec<Entry>,
    recorded: HashSet<usize>,
    generation: u64,
    sealed: bool,
}

/// Thread-safe, append-only accumulator of outcomes
pub struct ResultSink {
    output: PathBuf,
    versions_dir: PathBuf,
    writer: Arc<dyn TableWriter>,
    state: Mutex<SinkState>,
    // Generation of the last table that reached disk; held for the whole write
    written: tokio::sync::Mutex<Option<u64>>,
}

impl ResultSink {
    /// Create a sink writing to `output`, archiving previous outputs into `versions_dir`
    pub fn new(
        output: impl Into<PathBuf>,
        versions_dir: impl Into<PathBuf>,
        writer: Arc<dyn TableWriter>,
    ) -> Self {
        Self {
            output: output.into(),
            versions_dir: versions_dir.into(),
            writer,
            state: Mutex::new(SinkState {
                entries: Vec::new(),
                recorded: HashSet::new(),
                generation: 0,
                sealed: false,
            }),
            written: tokio::sync::Mutex::new(None),
        }
    }

    /// Canonical output location
    pub fn output(&self) -> &Path {
        &self.output
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SinkState> {
        // A panic while holding the lock cannot leave the state half-updated
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the outcome of a ticket.
    ///
    /// Returns `false` without changing anything when the ticket already has an
    /// outcome or the sink has been sealed.
    pub fn record(&self, ticket: Ticket, outcome: Outcome) -> bool {
        let mut state = self.lock_state();
        if state.sealed {
            tracing::debug!(key = %ticket.key, "Sink sealed, dropping outcome");
            return false;
        }
        if !state.recorded.insert(ticket.seq) {
            tracing::warn!(key = %ticket.key, seq = ticket.seq, "Ignoring second outcome for ticket");
            return false;
        }
        state.entries.push(Entry { ticket, outcome });
        state.generation += 1;
        true
    }

    /// Stop accepting records and snapshots
    pub fn seal(&self) {
        self.lock_state().sealed = true;
    }

    /// Whether [`seal`](Self::seal) was called
    pub fn is_sealed(&self) -> bool {
        self.lock_state().sealed
    }

    /// Copy of the recorded rows in completion order
    pub fn entries(&self) -> Vec<Entry> {
        self.lock_state().entries.clone()
    }

    /// Number of recorded rows
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current result set to the output location.
    ///
    /// Returns the number of rows written, or `None` when nothing was written
    /// because the sink is sealed or the output already holds this generation.
    pub async fn snapshot(&self) -> Result<Option<usize>> {
        let mut written = self.written.lock().await;

        let (rows, generation) = {
            let state = self.lock_state();
            if state.sealed {
                return Ok(None);
            }
            if written.is_some_and(|last| last >= state.generation) {
                return Ok(None);
            }
            (state.entries.clone(), state.generation)
        };

        let count = rows.len();
        let writer = Arc::clone(&self.writer);
        let output = self.output.clone();
        tokio::task::spawn_blocking(move || write_atomic(writer.as_ref(), &output, &rows))
            .await
            .map_err(|e| Error::Other(format!("snapshot task failed: {}", e)))??;

        *written = Some(generation);
        tracing::trace!(entries = count, generation, "Snapshot written");
        Ok(Some(count))
    }

    /// Move an existing output out of the way before a new run writes anything.
    ///
    /// The previous artifact lands in the versions directory as
    /// `<stem>_<YYYYmmdd_HHMMSS>.<ext>`, with a `_<n>` suffix when that name is
    /// taken. Returns `None` when there was nothing to archive.
    pub async fn archive_previous(&self) -> Result<Option<PathBuf>> {
        if !tokio::fs::try_exists(&self.output).await? {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.versions_dir).await?;
        let destination = archive_destination(&self.output, &self.versions_dir)?;

        match tokio::fs::rename(&self.output, &destination).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
                tokio::fs::copy(&self.output, &destination).await?;
                tokio::fs::remove_file(&self.output).await?;
            }
            Err(e) => return Err(Error::Io(e)),
        }

        tracing::info!(
            from = %self.output.display(),
            to = %destination.display(),
            "Archived previous output"
        );
        Ok(Some(destination))
    }
}

fn write_atomic(writer: &dyn TableWriter, output: &Path, rows: &[Entry]) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    writer.write_table(tmp.as_file_mut(), rows)?;
    tmp.as_file().sync_all()?;
    tmp.persist(output).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn archive_destination(output: &Path, versions_dir: &Path) -> Result<PathBuf> {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot archive '{}': no file name", output.display())))?;
    let extension = output.extension().and_then(|e| e.to_str());
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");

    let name = |suffix: Option<u32>| {
        let base = match suffix {
            Some(n) => format!("{}_{}_{}", stem, timestamp, n),
            None => format!("{}_{}", stem, timestamp),
        };
        match extension {
            Some(ext) => format!("{}.{}", base, ext),
            None => base,
        }
    };

    let candidate = versions_dir.join(name(None));
    if !candidate.exists() {
        return Ok(candidate);
    }
    for n in 1..=MAX_ARCHIVE_ATTEMPTS {
        let candidate = versions_dir.join(name(Some(n)));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(Error::Other(format!(
        "could not find a free archive name for '{}' after {} attempts",
        output.display(),
        MAX_ARCHIVE_ATTEMPTS
    )))
}
