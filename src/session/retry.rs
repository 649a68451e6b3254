//! Transient-failure retry wrapper for browser operations
//!
//! Navigation, post-submit navigation waits and selector waits all go through
//! `with_retry`. Only errors whose kind is transient are retried; everything
//! else propagates on the first failure.

use crate::session::{BrowserPage, BrowserResult};
use std::future::Future;
use std::time::Duration;

/// Retry settings shared by every wrapped browser operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Backoff after attempt `n` is `n * backoff_step`
    pub backoff_step: Duration,

    /// Pause after a successful navigation before continuing
    pub settle_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_step: Duration::from_millis(1000),
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-indexed)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent
///
/// On exhaustion the last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> BrowserResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrowserResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    "{} hit a transient network error (attempt {}/{}), retrying in {:?}: {}",
                    operation,
                    attempt,
                    policy.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Navigates with retry, then waits for the page to settle
pub async fn navigate_with_retry(
    page: &dyn BrowserPage,
    url: &str,
    policy: &RetryPolicy,
) -> BrowserResult<()> {
    with_retry(policy, "navigation", || page.goto(url)).await?;
    tokio::time::sleep(policy.settle_delay).await;
    Ok(())
}
