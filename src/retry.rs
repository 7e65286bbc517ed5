//! Retry with exponential backoff.
//!
//! One policy serves every retrying call site: the initial search query, the
//! per-hit detail fill, abstract backfill and model readiness checks. Each
//! call site supplies the operation, a predicate that says whether a failure
//! is worth retrying, and a hook that runs before the backoff (used for
//! identity rotation).

use crate::config::{RetryConfig, MAX_BASE_DELAY_SECS};
use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Something that can wait. Swapped out in tests to observe backoff.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// A failure the predicate refused to retry
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts actually performed.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => attempt + 1,
        }
    }

    /// The last underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Aborted { error, .. } => error,
        }
    }
}

/// Bounded retry with `base * 2^attempt` backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build a policy from config, sleeping on the tokio timer.
    ///
    /// The base delay is clamped to `0..=MAX_BASE_DELAY_SECS`; NaN means no delay.
    pub fn new(config: &RetryConfig) -> Self {
        let base_delay = config.base_delay_secs.clamp(0.0, MAX_BASE_DELAY_SECS);
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::try_from_secs_f64(base_delay).unwrap_or(Duration::ZERO),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff applied after failed attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Wait out the backoff for `attempt`.
    pub async fn backoff(&self, attempt: u32) {
        self.sleeper.sleep(self.delay_for(attempt)).await;
    }

    /// Run `op` until it succeeds, the predicate rejects a failure, or the
    /// attempt ceiling is reached.
    ///
    /// `op` receives the 0-indexed attempt number. `before_retry` runs for
    /// each retryable failure that will be followed by another attempt, before
    /// the backoff. No delay follows the final attempt.
    pub async fn run<T, E, F, Fut, P, H>(
        &self,
        label: &str,
        mut op: F,
        is_retryable: P,
        mut before_retry: H,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        H: FnMut(&E),
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(op = label, attempt = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !is_retryable(&e) => {
                    debug!(op = label, attempt = attempt + 1, error = %e, "Non-retryable failure");
                    return Err(RetryError::Aborted { attempt, error: e });
                }
                Err(e) => {
                    warn!(
                        op = label,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    if attempt + 1 >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            last: e,
                        });
                    }
                    before_retry(&e);
                    self.backoff(attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Sleeper that records requested delays instead of waiting.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}
