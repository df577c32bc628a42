/// Bounded exponential backoff for vendor calls
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_backoff.mul_f64(factor.max(0.0));
        delay.min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-recoverable error, or
    /// attempts run out. Each attempt is a fresh call of `op`.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_recoverable() && attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        code = e.error_code(),
                        "⚠️  {} failed (attempt {}/{}): {} - retrying in {:?}",
                        label,
                        attempt,
                        attempts,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_growth_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast(3)
            .run("fetch", move |_| async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::TransientFetch("timeout".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast(3)
            .run("fetch", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::TransientFetch("timeout".into()))
            })
            .await;
        assert!(matches!(result, Err(SyncError::TransientFetch(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast(5)
            .run("fetch", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::QuotaExceeded { consumed: 1, cost: 1, limit: 1 })
            })
            .await;
        assert!(result.unwrap_err().is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
