//! # Retry Logic and Backoff
//!
//! Exponential, capped backoff for (re)opening change feeds.
//!
//! The registry never retries a failed `acquire` on its own; callers wrap
//! it in [`retry_with_backoff`]. Reconnecting a feed that dropped after it
//! was live uses the same [`Backoff`] schedule inside the registry.
//!
//! ## Usage
//!
//! ```rust
//! use farmchat::realtime::retry::Backoff;
//! use farmchat::shared::RetryPolicy;
//! use std::time::Duration;
//!
//! let mut backoff = Backoff::new(RetryPolicy::default());
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
//! assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
//! ```

use std::future::Future;
use std::time::Duration;

use crate::shared::config::RetryPolicy;
use crate::shared::error::SyncResult;

/// Delay before retry number `attempt` (1-based)
pub fn delay_for(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let factor = 2u32.saturating_pow(exponent);
    policy
        .base_delay
        .checked_mul(factor)
        .unwrap_or(policy.max_delay)
        .min(policy.max_delay)
}

/// Stateful backoff schedule
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(delay_for(&self.policy, self.attempt))
    }

    /// Attempts consumed so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut backoff = Backoff::new(policy);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => match backoff.next_delay() {
                Some(delay) => {
                    tracing::warn!(
                        attempt = backoff.attempts(),
                        ?delay,
                        "[Retry] {} failed: {}",
                        label,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!("[Retry] {} gave up after {} retries: {}", label, backoff.attempts(), e);
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}
