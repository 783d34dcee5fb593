use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BackendError;

/// Delay schedule between attempts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(retry - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

/// Per-backend retry budget.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::Exponential {
                base_ms: 200,
                max_ms: 5_000,
            },
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::Fixed { delay_ms: 0 },
            jitter: false,
        }
    }

    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { base_ms, max_ms } => {
                let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
                base_ms.saturating_mul(factor).min(max_ms)
            }
        };
        let millis = if self.jitter && base > 0 {
            let scale: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            (base as f64 * scale) as u64
        } else {
            base
        };
        Duration::from_millis(millis)
    }

    /// Run `attempt` until it succeeds, the budget is spent, or `stop` is
    /// raised. Each attempt is bounded by `timeout`. Returns the last
    /// outcome and the number of attempts made.
    ///
    /// `Rejected` errors are not retried: the backend has answered.
    pub async fn run<T, F, Fut>(
        &self,
        timeout: Duration,
        stop: &AtomicBool,
        mut attempt: F,
    ) -> (Result<T, BackendError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = match tokio::time::timeout(timeout, attempt(attempts)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(BackendError::Timeout(timeout)),
            };

            let err = match outcome {
                Ok(value) => return (Ok(value), attempts),
                Err(e) => e,
            };
            if attempts > self.max_retries
                || matches!(err, BackendError::Rejected(_))
                || stop.load(Ordering::SeqCst)
            {
                return (Err(err), attempts);
            }

            let delay = self.delay_for(attempts);
            debug!(attempt = attempts, ?delay, error = %err, "retrying anchor submission");
            tokio::time::sleep(delay).await;
        }
    }
}
