use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub tries: u32,
    pub delay: Duration,
    pub backoff: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            delay: Duration::from_secs(1),
            backoff: 2,
        }
    }
}

/// Runs `op` up to `policy.tries` times, sleeping `delay`, `delay * backoff`, ... between attempts.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let tries = policy.tries.max(1);
    let mut delay = policy.delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < tries => {
                warn!(
                    "[STORE] {} failed (attempt {}/{}), retrying in {}ms: {}",
                    label,
                    attempt,
                    tries,
                    delay.as_millis(),
                    err
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(policy.backoff.max(1));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
