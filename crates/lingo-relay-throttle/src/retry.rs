//! Bounded retry policy.

use std::{fmt::Display, future::Future, time::Duration};

/// How often, and how patiently, to retry a failing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Fixed pause between attempts. `None` retries immediately.
    pub backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: None,
        }
    }
}

impl RetryPolicy {
    /// Policy making up to `max_attempts` attempts, back to back.
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: None,
        }
    }

    /// Run exactly once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1)
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Run `operation` until it succeeds or attempts run out.
    ///
    /// # Errors
    /// Returns the last error once every attempt has failed.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    tracing::debug!(attempt, attempts, "attempt failed, retrying: {e}");
                    if let Some(backoff) = self.backoff {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(attempts, "all attempts failed: {e}");
                    return Err(e);
                }
            }
        }
    }
}
