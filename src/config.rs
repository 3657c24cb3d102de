//! Configuration types for batch-lookup

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// When the result set is written to durable storage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    /// Snapshot after every resolved key (default)
    ///
    /// A crash or stop-immediately loses at most the unresolved keys.
    #[default]
    EveryResolution,
    /// Single bulk write when the run completes (lower durability)
    OnCompletion,
}

/// How repeated keys in a batch are handled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKeys {
    /// Every occurrence is looked up and recorded independently (default)
    #[default]
    Process,
    /// Only the first occurrence of a key is looked up
    Skip,
}

/// Run layout: where keys come from, where results go, how wide the pool is
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Batch source, one key per line (default: "serials.txt")
    #[serde(default = "default_batch_path")]
    pub batch_path: PathBuf,

    /// Canonical output artifact (default: "output/results.csv")
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Directory receiving archived outputs of previous runs (default: "versions")
    #[serde(default = "default_versions_dir")]
    pub versions_dir: PathBuf,

    /// Number of concurrent workers (default: 5)
    ///
    /// Each worker owns one fetcher, so this also caps how many heavyweight
    /// resources (browser sessions, connections) exist at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Snapshot cadence
    #[serde(default)]
    pub snapshot_mode: SnapshotMode,

    /// Duplicate key handling
    #[serde(default)]
    pub duplicate_keys: DuplicateKeys,

    /// Header of the key column (default: "Key")
    #[serde(default = "default_key_header")]
    pub key_header: String,

    /// Header of the outcome column (default: "Outcome")
    #[serde(default = "default_outcome_header")]
    pub outcome_header: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_path: default_batch_path(),
            output_path: default_output_path(),
            versions_dir: default_versions_dir(),
            max_workers: default_max_workers(),
            snapshot_mode: SnapshotMode::default(),
            duplicate_keys: DuplicateKeys::default(),
            key_header: default_key_header(),
            outcome_header: default_outcome_header(),
        }
    }
}

/// Retry configuration for lookup attempts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt (default: 2, i.e. 3 attempts in total)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0, a fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// Time budget of a single fetcher attempt (default: 60 seconds)
    #[serde(default = "default_attempt_timeout", with = "duration_serde")]
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

/// Progress reporting configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum time between two progress events in milliseconds (default: 0, every resolution)
    ///
    /// The final progress event of a run is never throttled.
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Capacity of the event broadcast channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 0,
            event_buffer: default_event_buffer(),
        }
    }
}

impl ProgressConfig {
    /// Throttle interval as a Duration
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Main configuration for the orchestrator
///
/// - [`run`](RunConfig) - batch source, output layout, pool width
/// - [`retry`](RetryConfig) - per-key retry behavior
/// - [`progress`](ProgressConfig) - progress event cadence
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run layout
    #[serde(default)]
    pub run: RunConfig,

    /// Retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Progress reporting
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Config {
    /// Load a JSON configuration file and validate it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read '{}': {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("invalid configuration in '{}': {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        if self.run.max_workers == 0 {
            return Err(config_error("max_workers must be at least 1", "max_workers"));
        }
        if self.run.output_path.as_os_str().is_empty() {
            return Err(config_error("output_path must not be empty", "output_path"));
        }
        if self.run.output_path.file_name().is_none() {
            return Err(config_error("output_path must name a file", "output_path"));
        }
        if self.progress.event_buffer == 0 {
            return Err(config_error("event_buffer must be at least 1", "event_buffer"));
        }
        if self.retry.attempt_timeout.is_zero() {
            return Err(config_error(
                "attempt_timeout must be greater than zero",
                "attempt_timeout",
            ));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be a finite number of at least 1.0",
                "backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(config_error(
                "initial_delay must not exceed max_delay",
                "initial_delay",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_batch_path() -> PathBuf {
    PathBuf::from("serials.txt")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("output").join("results.csv")
}

fn default_versions_dir() -> PathBuf {
    PathBuf::from("versions")
}

fn default_max_workers() -> usize {
    5
}

fn default_key_header() -> String {
    "Key".to_string()
}

fn default_outcome_header() -> String {
    "Outcome".to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_event_buffer() -> usize {
    1000
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
