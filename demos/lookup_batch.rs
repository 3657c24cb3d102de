//! Batch lookup example
//!
//! This example demonstrates the core functionality of batch-lookup:
//! - Writing a batch source and configuring the run
//! - Plugging in a fetcher (here a simulated, flaky warranty service)
//! - Subscribing to events and printing progress
//! - Running until completion or Ctrl+C (press once to flush, twice to abandon)

use batch_lookup::{
    Config, Event, FetchError, Fetcher, Key, Lookup, Orchestrator, SharedFetcher, run_until_signal,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Pretends to query a vendor portal: slow, sometimes busy, sometimes without data
struct SimulatedWarrantyService;

#[async_trait::async_trait]
impl Fetcher for SimulatedWarrantyService {
    async fn fetch(&self, key: &Key) -> Result<Lookup, FetchError> {
        let (latency_ms, roll) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(100..600), rng.gen_range(0..10))
        };
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        match roll {
            0 | 1 => Err(FetchError::transient("portal busy, page did not load")),
            2 => Ok(Lookup::NotFound),
            n => {
                tracing::debug!(key = %key, "Warranty record found");
                Ok(Lookup::Found(format!("202{}-0{}-15", n, n)))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let workdir = tempfile::tempdir()?;
    let serials: Vec<String> = (1..=20).map(|i| format!("SN-{:04}", i)).collect();
    std::fs::write(workdir.path().join("serials.txt"), serials.join("\n"))?;

    // Build configuration
    let mut config = Config::default();
    config.run.batch_path = workdir.path().join("serials.txt");
    config.run.output_path = workdir.path().join("output").join("warranty.csv");
    config.run.versions_dir = workdir.path().join("versions");
    config.run.max_workers = 4;
    config.run.key_header = "Serial Number".to_string();
    config.run.outcome_header = "End Date".to_string();
    config.retry.initial_delay = Duration::from_millis(200);

    let orchestrator = Orchestrator::new(
        config,
        SharedFetcher::new(Arc::new(SimulatedWarrantyService)),
    )?;

    // Subscribe to events
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::RunStarted { total, workers, .. } => {
                    println!("▶ Looking up {} keys with {} workers", total, workers);
                }
                Event::KeyResolved {
                    ticket,
                    outcome,
                    attempts,
                } => {
                    println!("✓ {}: {} ({} attempt(s))", ticket.key, outcome, attempts);
                }
                Event::Progress(progress) => {
                    let eta = progress
                        .estimated_remaining
                        .map(|d| format!("{:.1}s", d.as_secs_f64()))
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "  {}/{} ({:.0}%), remaining {}",
                        progress.completed,
                        progress.total,
                        progress.percent(),
                        eta
                    );
                }
                Event::SnapshotFailed { error } => {
                    println!("⚠ Snapshot failed: {}", error);
                }
                Event::StateChanged { state } => {
                    println!("● Run state: {:?}", state);
                }
                Event::RunFinished(_) | Event::SnapshotWritten { .. } => {}
            }
        }
    });

    let report = run_until_signal(&orchestrator).await?;

    println!(
        "\n{:?}: {}/{} keys ({} failed, {} not found) written to {}",
        report.status,
        report.processed,
        report.total,
        report.failures,
        report.not_found,
        report.output.display()
    );
    println!("{}", std::fs::read_to_string(&report.output)?);

    Ok(())
}
