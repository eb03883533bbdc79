//! Bounded exponential backoff for network-bound operations
//!
//! One generic entry point, [`retry_with_backoff`], drives anything that
//! returns a [`Retryable`] error: page fetches and asset downloads both
//! go through it. Delays double from a base unit and are capped, with a
//! small bounded jitter so synchronized clients do not stampede.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::services::FetchError;
use crate::infrastructure::config::RetryConfig;

/// Errors decide for themselves whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least one attempt
    /// always runs, whatever this says.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)` capped at `max_delay_ms`, plus up to a
    /// quarter of the capped value as jitter. The jitter bound keeps
    /// retry timing assertable in tests.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_delay_ms);
        let jitter = if capped == 0 {
            0
        } else {
            fastrand::u64(0..=capped / 4)
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or exhausts the
/// attempt budget. The last error is returned as-is so callers keep the
/// full typed failure.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        "{} succeeded on attempt {}/{}",
                        operation, attempt, policy.max_attempts
                    );
                }
                return Ok(value);
            }
            Err(error) if error.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} failed on attempt {}/{}: {} (retrying in {}ms)",
                    operation,
                    attempt,
                    policy.max_attempts,
                    error,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
