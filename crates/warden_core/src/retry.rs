//! Reusable retry policy with exponential backoff.
//!
//! Extracted so that every retry loop in the engine (profile reconciliation,
//! provider read paths) shares one independently-testable policy value
//! instead of ad hoc inline loops.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (not counting nothing: the first try is
    /// attempt 1).
    pub max_attempts: u32,
    /// Base backoff time in milliseconds.
    pub base_backoff_ms: u64,
    /// Multiplier applied per failed attempt.
    pub backoff_factor: u32,
    /// Maximum backoff time in milliseconds.
    pub max_backoff_ms: u64,
    /// Jitter range in milliseconds (added to backoff). Zero disables jitter
    /// and makes the ladder deterministic.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            backoff_factor: 2,
            max_backoff_ms: 30_000,
            jitter_ms: 0,
        }
    }
}

impl RetryConfig {
    /// Backoff delay after the given (1-based) failed attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = (self.backoff_factor as u64).saturating_pow(exponent);
        let exponential = self.base_backoff_ms.saturating_mul(multiplier);
        let capped = exponential.min(self.max_backoff_ms);
        let jitter = if self.jitter_ms > 0 {
            use rand::Rng;
            rand::rng().random_range(0..self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

/// Run an operation under a retry policy.
///
/// The operation is re-attempted while it fails with a retryable error and
/// attempts remain, sleeping the policy's backoff between attempts. The last
/// error is returned on exhaustion; non-retryable errors return immediately.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
