//! Shared fixtures for orchestrator tests.


use crate::config::Config;
use crate::types::Event;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

/// Config rooted in `dir` with instant retries
pub(super) fn test_config(dir: &Path, workers: usize) -> Config {
    let mut config = Config::default();
    config.run.batch_path = dir.join("serials.txt");
    config.run.output_path = dir.join("output").join("results.csv");
    config.run.versions_dir = dir.join("versions");
    config.run.max_workers = workers;
    config.retry.initial_delay = Duration::ZERO;
    config.retry.max_delay = Duration::ZERO;
    config.retry.attempt_timeout = Duration::from_secs(10);
    config
}

pub(super) fn read_rows(path: &Path) -> Vec<(String, String)> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            (r[0].to_string(), r[1].to_string())
        })
        .collect()
}

pub(super) fn sorted_rows(path: &Path) -> Vec<(String, String)> {
    let mut rows = read_rows(path);
    rows.sort();
    rows
}

/// Block until `n` keys have resolved
pub(super) async fn wait_for_resolutions(rx: &mut broadcast::Receiver<Event>, n: usize) {
    let wait = async {
        let mut seen = 0;
        while seen < n {
            if let Event::KeyResolved { .. } = rx.recv().await.unwrap() {
                seen += 1;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("keys did not resolve in time");
}

/// Poll `condition` until it holds
pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("condition not reached in time");
}

/// Every event received so far
pub(super) fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
