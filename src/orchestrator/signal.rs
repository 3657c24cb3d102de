//! OS signal integration for command-line hosts.

use super::Orchestrator;
use crate::error::Result;
use crate::types::RunReport;

/// Drive a run, turning termination signals into stop requests.
///
/// The first SIGINT or SIGTERM (Ctrl+C off Unix) stops dispatch and flushes
/// in-flight lookups; a second one stops immediately.
///
/// # Examples
///
/// ```no_run
/// use batch_lookup::{Config, Orchestrator, SharedFetcher, run_until_signal};
/// # async fn example(fetcher: std::sync::Arc<dyn batch_lookup::Fetcher>) -> batch_lookup::Result<()> {
/// let orchestrator = Orchestrator::new(Config::default(), SharedFetcher::new(fetcher))?;
/// let report = run_until_signal(&orchestrator).await?;
/// println!("{} of {} keys processed", report.processed, report.total);
/// # Ok(())
/// # }
/// ```
pub async fn run_until_signal(orchestrator: &Orchestrator) -> Result<RunReport> {
    let control = orchestrator.control();
    let run = orchestrator.run();
    tokio::pin!(run);

    tokio::select! {
        report = &mut run => return report,
        _ = wait_for_signal() => {
            tracing::info!("Stopping after in-flight lookups (signal again to stop immediately)");
            control.stop_and_flush();
        }
    }

    tokio::select! {
        report = &mut run => report,
        _ = wait_for_signal() => {
            control.stop_immediately();
            run.await
        }
    }
}

/// Resolves on SIGINT or SIGTERM; never resolves if neither can be observed
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Signal handler registration failed, waiting for Ctrl+C");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C, running to completion");
            std::future::pending::<()>().await;
        }
    }
}
