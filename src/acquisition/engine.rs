use super::AcquisitionError;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// A unit of work in an acquisition batch
pub trait AcquisitionTask {
    /// The source URL; batch results are keyed by it
    fn source_url(&self) -> &str;
}

/// Acquires every task with at most `concurrency_limit` in flight
///
/// Each outcome is recorded independently; a failing task never affects its
/// siblings. Results are keyed by source URL, so duplicate URLs collapse to
/// one entry.
///
/// # Arguments
///
/// * `tasks` - Work items
/// * `concurrency_limit` - Maximum simultaneous transfers (clamped to at least 1)
/// * `acquire` - Performs one transfer
pub async fn acquire_batch<T, R, F, Fut>(
    tasks: Vec<T>,
    concurrency_limit: usize,
    acquire: F,
) -> HashMap<String, R>
where
    T: AcquisitionTask,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let semaphore = Arc::new(Semaphore::new(concurrency_limit.max(1)));
    let acquire = &acquire;

    let transfers = tasks.into_iter().map(|task| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            // The semaphore is never closed
            let _permit = semaphore.acquire().await.ok();
            let url = task.source_url().to_string();
            let outcome = acquire(task).await;
            (url, outcome)
        }
    });

    join_all(transfers).await.into_iter().collect()
}

/// Acquires tasks in sequential windows of `window` tasks each
///
/// Every task of a window runs concurrently; the next window starts once the
/// whole previous window has finished. Results keep input order.
pub async fn acquire_in_windows<T, R, F, Fut>(tasks: Vec<T>, window: usize, acquire: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let window = window.max(1);
    let mut results = Vec::with_capacity(tasks.len());
    let mut remaining = tasks.into_iter().peekable();

    while remaining.peek().is_some() {
        let chunk: Vec<T> = remaining.by_ref().take(window).collect();
        tracing::debug!("Starting acquisition window of {} task(s)", chunk.len());
        results.extend(join_all(chunk.into_iter().map(&acquire)).await);
    }

    results
}

/// Delay after failed attempt `attempt` (1-indexed): `2^(attempt-1) * base`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Retries `op` up to `max_attempts` times with exponential backoff
///
/// There is no wait after the final attempt. Permanent errors stop
/// immediately. Returns the last error on exhaustion.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    label: &str,
    mut op: F,
) -> Result<T, AcquisitionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AcquisitionError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_permanent() || attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = backoff_delay(base_delay, attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    attempt,
                    max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
