//! Dispatch loop: bounded fan-out of tickets over the worker pool.

use super::control::RunControl;
use crate::config::SnapshotMode;
use crate::fetcher::Fetcher;
use crate::progress::ProgressTracker;
use crate::retry::{Resolution, RetryPolicy};
use crate::sink::ResultSink;
use crate::types::{Event, Outcome, RunState, Ticket};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::{JoinError, JoinSet};

/// Everything a worker task needs to resolve and record one ticket
pub(crate) struct RunContext {
    pub(crate) control: RunControl,
    pub(crate) policy: RetryPolicy,
    pub(crate) sink: Arc<ResultSink>,
    pub(crate) progress: Arc<ProgressTracker>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) snapshot_mode: SnapshotMode,
}

impl RunContext {
    /// Record a resolution, snapshot it and account for it.
    ///
    /// Results arriving after stop-immediately are dropped.
    pub(crate) async fn complete(&self, ticket: Ticket, resolution: Resolution) {
        if self.control.state() == RunState::StoppingDiscard {
            tracing::debug!(key = %ticket.key, "Discarding result after stop");
            return;
        }
        if !self.sink.record(ticket.clone(), resolution.outcome.clone()) {
            return;
        }

        if self.snapshot_mode == SnapshotMode::EveryResolution {
            self.snapshot().await;
        }

        self.event_tx
            .send(Event::KeyResolved {
                ticket,
                outcome: resolution.outcome,
                attempts: resolution.attempts,
            })
            .ok();
        self.progress.record_completion();
    }

    /// Write the result set; a failed write is reported, never fatal
    pub(crate) async fn snapshot(&self) {
        match self.sink.snapshot().await {
            Ok(Some(entries)) => {
                self.event_tx
                    .send(Event::SnapshotWritten {
                        path: self.sink.output().to_path_buf(),
                        entries,
                    })
                    .ok();
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, output = %self.sink.output().display(), "Snapshot failed");
                self.event_tx
                    .send(Event::SnapshotFailed {
                        error: e.to_string(),
                    })
                    .ok();
            }
        }
    }
}

/// Fetchers of the pool, handed out one per running task
struct FetcherSlots {
    fetchers: Vec<Arc<dyn Fetcher>>,
    idle: Mutex<Vec<usize>>,
}

impl FetcherSlots {
    fn new(fetchers: Vec<Arc<dyn Fetcher>>) -> Arc<Self> {
        let idle = (0..fetchers.len()).rev().collect();
        Arc::new(Self {
            fetchers,
            idle: Mutex::new(idle),
        })
    }

    /// Take an idle fetcher. Callers hold a pool permit, so one is always free.
    fn checkout(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> Option<Worker> {
        let slot = self
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()?;
        Some(Worker {
            slots: Arc::clone(self),
            slot,
            _permit: permit,
        })
    }
}

/// A checked-out fetcher; returns its slot to the pool before releasing the permit
struct Worker {
    slots: Arc<FetcherSlots>,
    slot: usize,
    _permit: OwnedSemaphorePermit,
}

impl Worker {
    fn fetcher(&self) -> &dyn Fetcher {
        self.slots.fetchers[self.slot].as_ref()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.slots
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(self.slot);
    }
}

async fn resolve(ctx: Arc<RunContext>, worker: Worker, ticket: Ticket) {
    tracing::trace!(key = %ticket.key, seq = ticket.seq, worker = worker.slot, "Resolving key");
    let resolution = ctx.policy.execute(worker.fetcher(), &ticket.key).await;
    // Free the slot before bookkeeping so the next key can start
    drop(worker);
    ctx.complete(ticket, resolution).await;
}

/// Submit every ticket to a pool of `fetchers.len()` workers and wait for them.
///
/// Dispatch stops at the first stop signal. In-flight tasks are awaited, or
/// aborted once stop-immediately is requested.
pub(crate) async fn dispatch(
    ctx: Arc<RunContext>,
    tickets: Vec<Ticket>,
    fetchers: Vec<Arc<dyn Fetcher>>,
) {
    let semaphore = Arc::new(Semaphore::new(fetchers.len()));
    let slots = FetcherSlots::new(fetchers);
    let stop = ctx.control.stop_token();
    let discard = ctx.control.discard_token();

    let mut pending: VecDeque<Ticket> = tickets.into();
    let mut tasks = JoinSet::new();
    let mut in_flight: HashMap<tokio::task::Id, Ticket> = HashMap::new();

    while !pending.is_empty() {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                reap(&ctx, &mut in_flight, joined).await;
            }

            permit = Arc::clone(&semaphore).acquire_owned() => {
                let Ok(permit) = permit else { break };
                let Some(worker) = slots.checkout(permit) else {
                    tracing::error!("Worker pool has a permit but no idle fetcher");
                    break;
                };

                let submitted = ctx.control.while_running(|| {
                    let ticket = pending.pop_front()?;
                    let handle = tasks.spawn(resolve(Arc::clone(&ctx), worker, ticket.clone()));
                    in_flight.insert(handle.id(), ticket);
                    Some(())
                });
                if submitted.is_none() {
                    break;
                }
            }
        }
    }

    if !pending.is_empty() {
        tracing::info!(
            undispatched = pending.len(),
            in_flight = tasks.len(),
            "Dispatch stopped"
        );
    }

    let mut aborted = false;
    while !tasks.is_empty() {
        tokio::select! {
            biased;

            _ = discard.cancelled(), if !aborted => {
                tracing::debug!(in_flight = tasks.len(), "Aborting in-flight lookups");
                tasks.abort_all();
                aborted = true;
            }

            Some(joined) = tasks.join_next_with_id() => {
                reap(&ctx, &mut in_flight, joined).await;
            }
        }
    }
}

/// Account for a finished task. A task that panicked still gets an outcome.
async fn reap(
    ctx: &RunContext,
    in_flight: &mut HashMap<tokio::task::Id, Ticket>,
    joined: Result<(tokio::task::Id, ()), JoinError>,
) {
    let err = match joined {
        Ok((id, ())) => {
            in_flight.remove(&id);
            return;
        }
        Err(err) => err,
    };
    let Some(ticket) = in_flight.remove(&err.id()) else {
        return;
    };
    if err.is_cancelled() {
        tracing::debug!(key = %ticket.key, "Lookup aborted");
        return;
    }

    let reason = panic_message(err);
    tracing::error!(key = %ticket.key, reason = %reason, "Lookup task panicked");
    let resolution = Resolution {
        outcome: Outcome::Failure(format!("task panicked: {}", reason)),
        attempts: 0,
    };
    ctx.complete(ticket, resolution).await;
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(msg) = payload.downcast_ref::<&str>() {
                (*msg).to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}
