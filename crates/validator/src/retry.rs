//! Bounded retry with fixed delay.
//!
//! Transient I/O failures (reference fetches, flaky connections) are retried
//! here before escalating; the policy is a call-site parameter so each user
//! of the combinator is independently testable.

use pagelens_core::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping `policy.delay`
/// between attempts. Returns the first success or the last error.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(
                    label = label,
                    attempt = attempt,
                    max = policy.max_attempts,
                    error = %e,
                    "attempt failed"
                );
                last_err = Some(e);
                if attempt < policy.max_attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }
    // max_attempts >= 1, so at least one attempt ran and recorded an error.
    Err(last_err.unwrap())
}
