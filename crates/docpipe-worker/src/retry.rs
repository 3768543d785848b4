//! Backoff for Redis connects and the broker polling loops.

use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Exponential backoff, doubling from `base_delay` up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub operation: String,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `attempt` (zero-based), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the retries run out, returning the
/// last error.
///
/// ```ignore
/// let retry = RetryConfig::new("redis_connect").with_max_retries(5);
/// let store = retry_async(&retry, || RedisJobStore::connect(&queue)).await?;
/// ```
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut retries = 0u32;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if retries >= config.max_retries {
            warn!(
                "{} failed after {} attempts: {}",
                config.operation,
                retries + 1,
                error
            );
            return Err(error);
        }

        let delay = config.delay_for_attempt(retries);
        retries += 1;
        warn!(
            "{} failed ({}), retry {}/{} in {:?}",
            config.operation, error, retries, config.max_retries, delay
        );
        tokio::time::sleep(delay).await;
    }
}

/// Counts consecutive failures of a long-running loop and tells it when to
/// stop logging them.
#[derive(Debug)]
pub struct FailureTracker {
    streak: u32,
    logged_limit: u32,
}

impl FailureTracker {
    /// Log at most `logged_limit` failures per outage.
    pub fn new(logged_limit: u32) -> Self {
        Self {
            streak: 0,
            logged_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.streak > self.logged_limit {
            info!("Recovered after {} consecutive failures", self.streak);
        }
        self.streak = 0;
    }

    /// Returns whether the caller should log this failure.
    pub fn record_failure(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.logged_limit + 1 {
            warn!(
                "{} consecutive failures, further errors are not logged until recovery",
                self.streak
            );
        }
        self.streak <= self.logged_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }
}
