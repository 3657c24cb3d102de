//! Retry logic with backoff
//!
//! [`with_retry`] runs any async fallible operation with bounded retries and an
//! (optionally exponential, optionally jittered) delay between attempts.
//! [`RetryPolicy`] builds on it to resolve a single key against a
//! [`Fetcher`]: every attempt is bounded by a timeout, `NotFound` is a terminal
//! answer rather than an error, and exhaustion becomes
//! [`Outcome::Failure`] instead of an error.
//!
//! # Example
//!
//! ```no_run
//! use batch_lookup::retry::{IsRetryable, with_retry};
//! use batch_lookup::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::types::{Key, Outcome};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, busy remote, lost session) should return `true`.
/// Permanent failures (rejected key, malformed answer) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transient(_) | FetchError::Timeout(_) | FetchError::Session(_) => true,
            FetchError::Permanent(_) => false,
        }
    }
}

/// Execute an async operation with retry and backoff
///
/// The operation runs once, then up to `config.max_retries` more times while it
/// keeps failing with a retryable error. Attempts are strictly sequential.
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are
/// exhausted (or the first non-retryable error).
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    with_retry_until(config, &CancellationToken::new(), operation).await
}

/// Like [`with_retry`], but gives up once `stop` is cancelled.
///
/// An attempt already running is never interrupted. After `stop` fires no
/// further attempt starts and a pending backoff wait is cut short; the error of
/// the last finished attempt is returned.
pub async fn with_retry_until<F, Fut, T, E>(
    config: &RetryConfig,
    stop: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay.min(config.max_delay);

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                if stop.is_cancelled() {
                    tracing::info!(error = %e, attempts = attempt + 1, "Stop requested, not retrying");
                    return Err(e);
                }
                attempt += 1;

                let wait = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = config.max_retries,
                    delay_ms = wait.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::select! {
                    _ = stop.cancelled() => {
                        tracing::info!(error = %e, attempts = attempt, "Stop requested during backoff, not retrying");
                        return Err(e);
                    }
                    _ = tokio::time::sleep(wait) => {}
                }

                delay = next_delay(delay, config);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Add random jitter to a delay
///
/// The result is uniformly distributed between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}

/// Outcome of one key together with the attempts it took
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Terminal outcome for the key
    pub outcome: Outcome,
    /// Fetcher attempts made (1 initial + retries)
    pub attempts: u32,
}

/// Resolves keys against a fetcher with bounded retries
#[derive(Clone, Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
    stop: CancellationToken,
}

impl RetryPolicy {
    /// Create a policy from its configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stop: CancellationToken::new(),
        }
    }

    /// Stop retrying once `stop` is cancelled.
    ///
    /// The attempt in progress still finishes; if it fails, its reason becomes
    /// the key's [`Outcome::Failure`].
    pub fn with_stop(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    /// The policy's configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Upper bound on fetcher calls per key
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Resolve one key. Never returns an error: failures become
    /// [`Outcome::Failure`] carrying the last attempt's reason.
    pub async fn execute(&self, fetcher: &dyn Fetcher, key: &Key) -> Resolution {
        let timeout = self.config.attempt_timeout;
        let mut attempts = 0u32;

        let result = with_retry_until(&self.config, &self.stop, || {
            attempts += 1;
            async move {
                match tokio::time::timeout(timeout, fetcher.fetch(key)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(timeout)),
                }
            }
        })
        .await;

        let outcome = match result {
            Ok(lookup) => Outcome::from(lookup),
            Err(e) => {
                tracing::warn!(key = %key, attempts, error = %e, "Lookup failed");
                Outcome::Failure(e.to_string())
            }
        };
        Resolution { outcome, attempts }
    }
}
