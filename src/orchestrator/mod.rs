//! Batch orchestration split into focused submodules.
//!
//! - [`control`] - Run state machine and host control signals
//! - [`dispatch`] - Bounded fan-out of keys over the worker pool
//! - [`signal`] - OS signal integration

mod control;
mod dispatch;
mod signal;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use control::RunControl;
pub use signal::run_until_signal;

use crate::batch::Batch;
use crate::config::{Config, DuplicateKeys};
use crate::error::{Error, Result};
use crate::fetcher::{FetcherFactory, build_pool};
use crate::progress::ProgressTracker;
use crate::retry::RetryPolicy;
use crate::sink::{CsvTableWriter, ResultSink, TableWriter};
use crate::types::{Event, Outcome, RunReport, RunState, RunStatus};
use dispatch::RunContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Runs one batch of lookups over a bounded worker pool
///
/// An orchestrator drives a single run. Subscribe to its events and take a
/// [`RunControl`] before calling [`run`](Self::run) or
/// [`run_batch`](Self::run_batch).
pub struct Orchestrator {
    config: Arc<Config>,
    factory: Arc<dyn FetcherFactory>,
    writer: Arc<dyn TableWriter>,
    event_tx: broadcast::Sender<Event>,
    control: RunControl,
    started: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator.
    ///
    /// The configuration is validated here; the factory is not called until the
    /// run starts.
    pub fn new(config: Config, factory: impl FetcherFactory + 'static) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(config.progress.event_buffer);
        let writer = Arc::new(CsvTableWriter::new(
            config.run.key_header.clone(),
            config.run.outcome_header.clone(),
        ));

        Ok(Self {
            control: RunControl::new(event_tx.clone()),
            config: Arc::new(config),
            factory: Arc::new(factory),
            writer,
            event_tx,
            started: AtomicBool::new(false),
        })
    }

    /// Replace the CSV writer with another tabular format
    pub fn with_table_writer(mut self, writer: Arc<dyn TableWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Subscribe to run events (multiple subscribers supported)
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Handle for stop and background signals
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    /// The orchestrator's configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read the batch from the configured source and run it
    pub async fn run(&self) -> Result<RunReport> {
        let batch = Batch::load(&self.config.run.batch_path).await?;
        self.run_batch(batch).await
    }

    /// Run an already loaded batch.
    ///
    /// Fails before anything is written when the batch is empty or a fetcher
    /// cannot be built. Per-key failures never fail the run; they are recorded
    /// as [`Outcome::Failure`].
    pub async fn run_batch(&self, batch: Batch) -> Result<RunReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        if batch.is_empty() {
            let source = batch
                .source()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("<memory>"));
            return Err(Error::EmptyBatch(source));
        }
        let batch = match self.config.run.duplicate_keys {
            DuplicateKeys::Process => batch,
            DuplicateKeys::Skip => batch.dedup(),
        };

        let run = &self.config.run;
        let workers = run.max_workers.min(batch.len());
        let fetchers = build_pool(self.factory.as_ref(), workers).map_err(|e| {
            tracing::error!(error = %e, "Could not construct fetcher");
            Error::FetcherUnavailable(e.to_string())
        })?;

        let sink = Arc::new(ResultSink::new(
            run.output_path.clone(),
            run.versions_dir.clone(),
            Arc::clone(&self.writer),
        ));
        let archived = sink.archive_previous().await?;

        let total = batch.len();
        let progress = Arc::new(ProgressTracker::new(
            total,
            self.config.progress.min_interval(),
            self.event_tx.clone(),
        ));
        self.control.attach(Arc::clone(&sink), Arc::clone(&progress));

        tracing::info!(
            total,
            workers,
            output = %run.output_path.display(),
            "Starting batch run"
        );
        self.event_tx
            .send(Event::RunStarted {
                total,
                workers,
                output: run.output_path.clone(),
                archived: archived.clone(),
            })
            .ok();

        let ctx = Arc::new(RunContext {
            control: self.control.clone(),
            policy: RetryPolicy::new(self.config.retry.clone())
                .with_stop(self.control.stop_token()),
            sink: Arc::clone(&sink),
            progress,
            event_tx: self.event_tx.clone(),
            snapshot_mode: run.snapshot_mode,
        });
        dispatch::dispatch(Arc::clone(&ctx), batch.tickets(), fetchers).await;

        // Sealed after stop-immediately, in which case nothing is written
        ctx.snapshot().await;

        let status = match self.control.finish() {
            RunState::Aborted => RunStatus::Aborted,
            _ => RunStatus::Completed,
        };
        let report = build_report(status, &sink, total, archived);

        tracing::info!(
            status = ?report.status,
            processed = report.processed,
            total = report.total,
            failures = report.failures,
            "Batch run finished"
        );
        self.event_tx.send(Event::RunFinished(report.clone())).ok();
        Ok(report)
    }
}

fn build_report(
    status: RunStatus,
    sink: &ResultSink,
    total: usize,
    archived: Option<PathBuf>,
) -> RunReport {
    let entries = sink.entries();
    let failures = entries.iter().filter(|e| e.outcome.is_failure()).count();
    let not_found = entries
        .iter()
        .filter(|e| e.outcome == Outcome::NotFound)
        .count();

    RunReport {
        status,
        output: sink.output().to_path_buf(),
        processed: entries.len(),
        total,
        failures,
        not_found,
        archived,
    }
}
