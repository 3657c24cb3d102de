//! Fetchers, sessions and configuration shared by the integration tests

use batch_lookup::{Config, FetchError, Fetcher, Key, Lookup, Session, SessionFactory};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Configuration rooted in a test directory with instant retries
pub fn config_in(dir: &Path, workers: usize) -> Config {
    let mut config = Config::default();
    config.run.batch_path = dir.join("serials.txt");
    config.run.output_path = dir.join("output").join("results.csv");
    config.run.versions_dir = dir.join("versions");
    config.run.max_workers = workers;
    config.retry.initial_delay = Duration::ZERO;
    config.retry.max_delay = Duration::ZERO;
    config.retry.attempt_timeout = Duration::from_secs(5);
    config
}

/// Read the output table, header excluded
pub fn read_table(path: &Path) -> Vec<(String, String)> {
    let mut reader = csv::Reader::from_path(path).expect("output should be readable");
    reader
        .records()
        .map(|record| {
            let record = record.expect("valid row");
            (record[0].to_string(), record[1].to_string())
        })
        .collect()
}

/// Fetcher answering from a fixed table, failing a given number of times first
pub struct TableFetcher {
    answers: HashMap<String, Option<String>>,
    failures_before_answer: HashMap<String, u32>,
    calls: Mutex<HashMap<String, u32>>,
}

impl TableFetcher {
    /// Keys missing from `answers` are rejected permanently
    pub fn new(answers: &[(&str, Option<&str>)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
                .collect(),
            failures_before_answer: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Fail `key` transiently `times` times before answering
    pub fn flaky(mut self, key: &str, times: u32) -> Self {
        self.failures_before_answer.insert(key.to_string(), times);
        self
    }

    /// Calls made for `key`
    pub fn calls(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Fetcher for TableFetcher {
    async fn fetch(&self, key: &Key) -> Result<Lookup, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let failures = self
            .failures_before_answer
            .get(key.as_str())
            .copied()
            .unwrap_or(0);
        if call <= failures {
            return Err(FetchError::transient("page did not finish loading"));
        }
        match self.answers.get(key.as_str()) {
            Some(Some(value)) => Ok(Lookup::Found(value.clone())),
            Some(None) => Ok(Lookup::NotFound),
            None => Err(FetchError::permanent("unknown serial number")),
        }
    }
}

/// Counts opened and released sessions
#[derive(Default)]
pub struct SessionLedger {
    pub opened: AtomicU32,
    pub released: AtomicU32,
}

impl SessionLedger {
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u32 {
        self.released.load(Ordering::SeqCst)
    }
}

/// Browser-like session: keys starting with "HANG" never answer
pub struct FakeBrowser {
    ledger: Arc<SessionLedger>,
}

#[async_trait::async_trait]
impl Session for FakeBrowser {
    async fn lookup(&mut self, key: &Key) -> Result<Lookup, FetchError> {
        if key.as_str().starts_with("HANG") {
            std::future::pending::<()>().await;
        }
        Ok(Lookup::Found(format!("end-date:{}", key)))
    }

    fn release(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens [`FakeBrowser`] sessions
pub struct FakeBrowserLauncher {
    pub ledger: Arc<SessionLedger>,
}

#[async_trait::async_trait]
impl SessionFactory for FakeBrowserLauncher {
    type Session = FakeBrowser;

    async fn open(&self) -> Result<FakeBrowser, FetchError> {
        self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeBrowser {
            ledger: self.ledger.clone(),
        })
    }
}
