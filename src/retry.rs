//! Bounded retry with exponential backoff.
//!
//! Every network call in the pipeline goes through [`retry`]. Only errors
//! that report themselves as retryable are attempted again; cancellation
//! and permanent failures surface immediately.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::utils::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryStrategy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryStrategy {
    pub const fn new(attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            attempts,
            initial_delay,
            backoff_multiplier,
        }
    }

    /// Delay slept after the failed attempt with the given zero-based index:
    /// `initial_delay * backoff_multiplier^index`.
    pub fn delay_for(&self, index: u32) -> Duration {
        let factor = self.backoff_multiplier.max(0.0).powi(index as i32);
        Duration::try_from_secs_f64(self.initial_delay.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), 2.0)
    }
}

/// Runs `operation` up to `strategy.attempts` times (at least once).
///
/// Returns the first success, or the last error once the attempts are used
/// up. Non-retryable errors are returned as soon as they are seen. If `cancel`
/// fires while the operation is pending or while sleeping between attempts,
/// `Error::Cancelled` is returned right away.
pub async fn retry<T, F, Fut>(
    strategy: RetryStrategy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = strategy.attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = operation() => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        attempt += 1;
        if attempt >= attempts {
            return Err(err);
        }

        let delay = strategy.delay_for(attempt - 1);
        debug!(attempt, attempts, ?delay, error = %err, "retrying after failure");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
