//! Run control: the cancellation state machine and the host's control signals.

use crate::progress::ProgressTracker;
use crate::sink::ResultSink;
use crate::types::{Event, RunState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

struct Shared {
    state: RunState,
    sink: Option<Arc<ResultSink>>,
    progress: Option<Arc<ProgressTracker>>,
}

struct Inner {
    shared: Mutex<Shared>,
    background: AtomicBool,
    /// Cancelled by either stop signal; wakes the dispatch loop
    stop: CancellationToken,
    /// Cancelled by stop-immediately; aborts in-flight lookups
    discard: CancellationToken,
    event_tx: broadcast::Sender<Event>,
}

/// Cloneable handle for steering a run from the host
///
/// Every transition of [`RunState`] happens under one lock, and the dispatch
/// loop submits keys under that same lock, so no key is dispatched after a stop
/// signal returns.
#[derive(Clone)]
pub struct RunControl {
    inner: Arc<Inner>,
}

impl RunControl {
    pub(crate) fn new(event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: RunState::Running,
                    sink: None,
                    progress: None,
                }),
                background: AtomicBool::new(false),
                stop: CancellationToken::new(),
                discard: CancellationToken::new(),
                event_tx,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        self.lock().state
    }

    /// Abandon the run.
    ///
    /// Nothing new is dispatched, in-flight lookups are aborted and their
    /// results dropped, and no further snapshot is written: the output keeps
    /// whatever the last snapshot contained. The run ends `Aborted`. Escalates
    /// an ongoing stop-and-flush. No-op once the run has finished.
    pub fn stop_immediately(&self) {
        let mut shared = self.lock();
        match shared.state {
            RunState::Running | RunState::StoppingFlush => {
                shared.state = RunState::StoppingDiscard;
                if let Some(sink) = &shared.sink {
                    sink.seal();
                }
                drop(shared);

                tracing::warn!("Stop requested, discarding in-flight lookups");
                self.publish(RunState::StoppingDiscard);
                self.inner.stop.cancel();
                self.inner.discard.cancel();
            }
            RunState::StoppingDiscard | RunState::Completed | RunState::Aborted => {}
        }
    }

    /// Stop dispatching new keys, let in-flight lookups finish, then write a
    /// final snapshot. The run ends `Completed` with a partial result set.
    /// No-op unless the run is still running.
    pub fn stop_and_flush(&self) {
        let mut shared = self.lock();
        if shared.state != RunState::Running {
            return;
        }
        shared.state = RunState::StoppingFlush;
        drop(shared);

        tracing::info!("Stop requested, flushing in-flight lookups");
        self.publish(RunState::StoppingFlush);
        self.inner.stop.cancel();
    }

    /// Suppress progress events for the rest of the run. The run itself is
    /// unaffected, and this combines with either stop signal.
    pub fn run_in_background(&self) {
        let shared = self.lock();
        if shared.state.is_terminal() {
            return;
        }
        if !self.inner.background.swap(true, Ordering::SeqCst) {
            tracing::info!("Continuing run in background");
        }
        if let Some(progress) = &shared.progress {
            progress.set_background();
        }
    }

    /// Whether progress events are suppressed
    pub fn is_background(&self) -> bool {
        self.inner.background.load(Ordering::SeqCst)
    }

    /// Bind the run's sink and tracker so signals can reach them
    pub(crate) fn attach(&self, sink: Arc<ResultSink>, progress: Arc<ProgressTracker>) {
        let mut shared = self.lock();
        if shared.state == RunState::StoppingDiscard {
            sink.seal();
        }
        if self.is_background() {
            progress.set_background();
        }
        shared.sink = Some(sink);
        shared.progress = Some(progress);
    }

    /// Run `submit` only while the run still accepts dispatch
    pub(crate) fn while_running<R>(&self, submit: impl FnOnce() -> R) -> Option<R> {
        let shared = self.lock();
        shared.state.accepts_dispatch().then(submit)
    }

    /// Move to the terminal state matching the current one
    pub(crate) fn finish(&self) -> RunState {
        let mut shared = self.lock();
        let terminal = match shared.state {
            RunState::StoppingDiscard | RunState::Aborted => RunState::Aborted,
            RunState::Running | RunState::StoppingFlush | RunState::Completed => {
                RunState::Completed
            }
        };
        let changed = shared.state != terminal;
        shared.state = terminal;
        drop(shared);

        if changed {
            self.publish(terminal);
        }
        terminal
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.inner.stop.clone()
    }

    pub(crate) fn discard_token(&self) -> CancellationToken {
        self.inner.discard.clone()
    }

    fn publish(&self, state: RunState) {
        self.inner.event_tx.send(Event::StateChanged { state }).ok();
    }
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("state", &self.state())
            .field("background", &self.is_background())
            .finish()
    }
}
