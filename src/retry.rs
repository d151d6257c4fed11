//! Generic connect-with-retry helper.
//!
//! Wraps a fallible async operation in exponential backoff with a fixed
//! attempt cap. Used for the startup database connection, where a cold
//! dependency should not immediately kill the process.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Exponential backoff policy with a fixed attempt cap
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up (must be >= 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Backoff multiplier applied after each failed attempt
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            multiplier: 2,
        }
    }
}

/// Run `op` until it succeeds or the policy's attempt cap is exhausted.
///
/// Returns the last error when all attempts fail.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    label, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                delay *= policy.multiplier.max(1);
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("retry loop always returns")
}
