//! Exponential backoff with jitter for store contention.

use furikae_core::{CoreError, StoreError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self { max_retries, initial_delay, max_delay, ..Self::default() }
    }

    /// Backoff ceiling for the given zero-based retry: `initial * multiplier^attempt`, capped.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }

    /// A uniformly random delay in `[ceiling / 2, ceiling]`.
    pub fn jittered_delay(&self, attempt: usize) -> Duration {
        let ceiling = self.delay_for_attempt(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let floor = ceiling / 2;
        Duration::from_millis(rand::thread_rng().gen_range(floor..=ceiling))
    }
}

/// Only contention reported by the store is worth another attempt.
pub fn should_retry(err: &CoreError) -> bool {
    matches!(
        err,
        CoreError::Store(StoreError::Transient(_)) | CoreError::Store(StoreError::Conflict(_))
    )
}

pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempt, "{} succeeded after retry", operation_name);
                }
                return Ok(value);
            }
            Err(err) if should_retry(&err) && attempt < policy.max_retries => {
                let delay = policy.jittered_delay(attempt);
                warn!(attempt, ?delay, "{} hit store contention, retrying: {}", operation_name, err);
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
