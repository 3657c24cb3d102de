//! Progress accounting for a running batch.
//!
//! Workers report each resolved key to the [`ProgressTracker`]; the tracker turns
//! the counters into [`ProgressSnapshot`]s and publishes them as
//! [`Event::Progress`] on the run's broadcast channel. Nothing here feeds back
//! into orchestration: dropped, throttled or suppressed updates never change a
//! run's outcome.

use crate::types::Event;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time progress of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Keys resolved so far
    pub completed: usize,
    /// Keys in the batch
    pub total: usize,
    /// Time since the run started
    pub elapsed: Duration,
    /// Linear estimate of the remaining time; `None` until a key has resolved
    pub estimated_remaining: Option<Duration>,
}

impl ProgressSnapshot {
    /// Build a snapshot, estimating the remaining time as
    /// `elapsed / completed * (total - completed)`.
    pub fn compute(completed: usize, total: usize, elapsed: Duration) -> Self {
        let completed = completed.min(total);
        let estimated_remaining = if completed == 0 {
            None
        } else {
            let per_key = elapsed.as_secs_f64() / completed as f64;
            let remaining = per_key * (total - completed) as f64;
            Some(Duration::from_secs_f64(remaining))
        };
        Self {
            completed,
            total,
            elapsed,
            estimated_remaining,
        }
    }

    /// Completion percentage (0.0 to 100.0)
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f32 / self.total as f32) * 100.0
        }
    }
}

struct ReportState {
    last_reported: Option<usize>,
    last_emit: Option<Instant>,
}

/// Thread-safe progress counters for one run
pub struct ProgressTracker {
    total: usize,
    started: Instant,
    completed: AtomicUsize,
    background: AtomicBool,
    min_interval: Duration,
    report: Mutex<ReportState>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl ProgressTracker {
    /// Create a tracker for a batch of `total` keys. The clock starts now.
    pub fn new(
        total: usize,
        min_interval: Duration,
        event_tx: tokio::sync::broadcast::Sender<Event>,
    ) -> Self {
        Self {
            total,
            started: Instant::now(),
            completed: AtomicUsize::new(0),
            background: AtomicBool::new(false),
            min_interval,
            report: Mutex::new(ReportState {
                last_reported: None,
                last_emit: None,
            }),
            event_tx,
        }
    }

    /// Count one resolved key and report the new progress
    pub fn record_completion(&self) -> ProgressSnapshot {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.update(completed, self.total, self.started.elapsed())
    }

    /// Compute progress for the given counters and publish it.
    ///
    /// Reports never go backwards: a snapshot older than one already published
    /// is computed and returned but not emitted. Publishing is skipped while the
    /// run is in background mode or inside the throttle window; the last key of
    /// the batch is always published.
    pub fn update(&self, completed: usize, total: usize, elapsed: Duration) -> ProgressSnapshot {
        let snapshot = ProgressSnapshot::compute(completed, total, elapsed);
        if self.is_background() {
            return snapshot;
        }

        let Ok(mut report) = self.report.lock() else {
            return snapshot;
        };
        if report
            .last_reported
            .is_some_and(|last| snapshot.completed <= last)
        {
            return snapshot;
        }
        let is_final = snapshot.completed == snapshot.total;
        let now = Instant::now();
        let throttled = report
            .last_emit
            .is_some_and(|at| now.duration_since(at) < self.min_interval);
        if throttled && !is_final {
            return snapshot;
        }

        report.last_reported = Some(snapshot.completed);
        report.last_emit = Some(now);
        // No receivers is fine; the run does not depend on anyone listening
        self.event_tx.send(Event::Progress(snapshot)).ok();
        snapshot
    }

    /// Current progress without publishing anything
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::compute(self.completed(), self.total, self.started.elapsed())
    }

    /// Keys resolved so far
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst).min(self.total)
    }

    /// Keys in the batch
    pub fn total(&self) -> usize {
        self.total
    }

    /// Stop publishing progress events for the rest of the run
    pub fn set_background(&self) {
        if !self.background.swap(true, Ordering::SeqCst) {
            tracing::debug!("Progress updates suppressed (running in background)");
        }
    }

    /// Whether progress events are suppressed
    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }
}
