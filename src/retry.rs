//! Retry policy and the generic retry driver.
//!
//! [`RetryPolicy`] describes how many attempts a call gets and how long to
//! wait between them: exponential backoff with random jitter, bounded below
//! by `min_backoff` and above by `max_backoff`. [`execute_with_retry`] runs
//! any fallible async operation under a policy via `tokio-retry`.
//!
//! The reference policy is 6 attempts with waits drawn from a 1–20 second
//! window, doubling the upper bound after every failure.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio_retry::RetryIf;

use crate::config::EmbeddingConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call. Always at least 1.
    pub max_attempts: usize,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Seconds multiplied by `2^(retry - 1)` to get the jitter ceiling.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(20),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_backoff: Duration::from_secs(config.min_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            multiplier: 1.0,
        }
    }

    /// A policy that retries `max_attempts` times without sleeping.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 0.0,
        }
    }

    /// Upper bound of the wait before retry number `retry` (1-based).
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let exp = 2f64.powi(retry.saturating_sub(1).min(30) as i32);
        let secs = (self.multiplier * exp).max(0.0);
        let ceiling = Duration::try_from_secs_f64(secs).unwrap_or(self.max_backoff);
        ceiling.clamp(self.min_backoff, self.max_backoff.max(self.min_backoff))
    }

    /// The waits between attempts, one per retry, jitter already applied.
    pub fn delays(&self) -> Vec<Duration> {
        let mut rng = rand::thread_rng();
        (1..self.max_attempts as u32)
            .map(|retry| {
                let low = self.min_backoff.as_millis() as u64;
                let high = self.backoff_ceiling(retry).as_millis() as u64;
                if high <= low {
                    Duration::from_millis(low)
                } else {
                    Duration::from_millis(rng.gen_range(low..=high))
                }
            })
            .collect()
    }
}

/// The last error of a call that never succeeded, with the attempt count.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: usize,
    pub error: E,
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or the policy's attempts are used up.
pub async fn execute_with_retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    mut op: F,
    mut is_retryable: C,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: FnMut(&E) -> bool,
{
    let attempts = AtomicUsize::new(0);
    let result = RetryIf::spawn(
        policy.delays(),
        || {
            attempts.fetch_add(1, Ordering::Relaxed);
            op()
        },
        |e: &E| is_retryable(e),
    )
    .await;

    result.map_err(|error| RetryFailure {
        attempts: attempts.load(Ordering::Relaxed),
        error,
    })
}
