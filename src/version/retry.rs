//! Retry policy with per-attempt timeouts and a delay table
//!
//! The number of attempts equals the number of configured timeouts. Each
//! attempt receives its own timeout; between attempts the policy sleeps for
//! the delay configured for that attempt, stretched to honor a server-provided
//! `Retry-After` and capped at the longest timeout.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::version::error::ConfigError;

/// Errors that know whether another attempt may succeed.
pub trait RetryableError {
    /// Returns true if the failure is transient and the operation should be retried.
    fn is_retryable(&self) -> bool;

    /// Delay requested by the server, typically parsed from `Retry-After`.
    fn retry_after(&self) -> Option<Duration>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    timeouts: Vec<Duration>,
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Creates a policy from per-attempt timeouts and inter-attempt delays.
    ///
    /// At least one timeout is required.
    pub fn new(timeouts: Vec<Duration>, delays: Vec<Duration>) -> Result<Self, ConfigError> {
        if timeouts.is_empty() {
            return Err(ConfigError::Invalid(
                "retry policy requires at least one timeout".to_string(),
            ));
        }
        Ok(Self { timeouts, delays })
    }

    /// Total number of attempts
    pub fn attempts(&self) -> usize {
        self.timeouts.len()
    }

    pub fn shortest_timeout(&self) -> Duration {
        self.timeouts.iter().copied().min().unwrap_or_default()
    }

    pub fn longest_timeout(&self) -> Duration {
        self.timeouts.iter().copied().max().unwrap_or_default()
    }

    /// Delay to wait after the failed attempt `attempt` (0-indexed).
    ///
    /// Attempts past the end of the delay table wait for the last timeout.
    pub fn delay_for(&self, attempt: usize, retry_after: Option<Duration>) -> Duration {
        let base = self
            .delays
            .get(attempt)
            .or_else(|| self.timeouts.last())
            .copied()
            .unwrap_or_default();

        match retry_after {
            Some(requested) => base.max(requested).min(self.longest_timeout()),
            None => base.min(self.longest_timeout()),
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts are exhausted. Returns the last error in the failure cases.
    ///
    /// `operation` receives the 0-indexed attempt number and that attempt's timeout.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(usize, Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            let timeout = self.timeouts[attempt];
            match operation(attempt, timeout).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.attempts() => {
                    let delay = self.delay_for(attempt, e.retry_after());
                    debug!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        self.attempts(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
