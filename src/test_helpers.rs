//! Shared test helpers: scripted fetchers and factories.

use crate::error::FetchError;
use crate::fetcher::{Fetcher, FetcherFactory, SharedFetcher};
use crate::types::{Key, Lookup};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub(crate) fn key(raw: &str) -> Key {
    Key::new(raw).unwrap()
}

/// One scripted fetcher response
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// Answer with a value
    Found(String),
    /// Answer "no data"
    NotFound,
    /// Fail with a retryable error
    Fail(String),
    /// Fail with a permanent error
    Reject(String),
    /// Never answer
    Hang,
    /// Panic inside the fetcher
    Panic,
    /// Wait for a permit from the gate, then perform the inner step
    Gated(Arc<Semaphore>, Box<Step>),
}

impl Step {
    pub(crate) fn gated(gate: &Arc<Semaphore>, step: Step) -> Self {
        Step::Gated(gate.clone(), Box::new(step))
    }
}

/// Fetcher answering from per-key scripts
///
/// Keys without a script (or whose script ran out) use the default step, and
/// without a default answer `Found("value:<key>")`.
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    default: Option<Step>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_default(mut self, step: Step) -> Self {
        self.default = Some(step);
        self
    }

    pub(crate) fn script(self, key: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), steps.into());
        self
    }

    /// Every call made so far, in call order
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, key: &str) -> u32 {
        self.calls.lock().unwrap().iter().filter(|k| *k == key).count() as u32
    }

    /// Number of distinct keys the fetcher was asked about
    pub(crate) fn distinct_keys(&self) -> usize {
        let calls = self.calls.lock().unwrap();
        let mut keys: Vec<&String> = calls.iter().collect();
        keys.sort();
        keys.dedup();
        keys.len()
    }

    fn next_step(&self, key: &Key) -> Step {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(key.as_str())
            .and_then(|steps| steps.pop_front());
        scripted
            .or_else(|| self.default.clone())
            .unwrap_or_else(|| Step::Found(format!("value:{key}")))
    }
}

async fn perform(step: Step) -> Result<Lookup, FetchError> {
    let mut step = step;
    loop {
        match step {
            Step::Found(value) => return Ok(Lookup::Found(value)),
            Step::NotFound => return Ok(Lookup::NotFound),
            Step::Fail(reason) => return Err(FetchError::Transient(reason)),
            Step::Reject(reason) => return Err(FetchError::Permanent(reason)),
            Step::Hang => return std::future::pending().await,
            Step::Panic => panic!("scripted fetcher panic"),
            Step::Gated(gate, inner) => {
                gate.acquire().await.unwrap().forget();
                step = *inner;
            }
        }
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, key: &Key) -> Result<Lookup, FetchError> {
        self.calls.lock().unwrap().push(key.as_str().to_string());
        let step = self.next_step(key);
        perform(step).await
    }
}

/// Factory sharing one scripted fetcher across all workers
pub(crate) fn shared_factory(fetcher: &Arc<ScriptedFetcher>) -> impl FetcherFactory + 'static {
    let fetcher: Arc<dyn Fetcher> = fetcher.clone();
    SharedFetcher::new(fetcher)
}
