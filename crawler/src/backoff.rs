// src/backoff.rs

//! Exponential backoff with jitter, shared by every external call.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{AppError, Result};

/// Backoff policy: `base * 2^attempt`, capped, plus proportional jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base_ms: u64,
    max_ms: u64,
    jitter_percent: u64,
}

impl BackoffPolicy {
    pub const fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            jitter_percent: 10,
        }
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    /// Delay before the given (zero-based) retry attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_ms.saturating_mul(2u64.saturating_pow(attempt.min(20)));
        let capped = exponential.min(self.max_ms);
        let jitter = if self.jitter_percent > 0 {
            rand::thread_rng().gen_range(0..capped / self.jitter_percent + 1)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Retry a transient-failure-prone operation up to `max_attempts` times.
///
/// Non-retryable errors (`LeaseLost`, invalid input) pass through on the
/// first occurrence.
pub async fn retry_transient<T, F, Fut>(
    policy: &BackoffPolicy,
    max_attempts: u32,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 >= max_attempts || !is_transient(&e) => return Err(e),
            Err(e) => {
                let delay = policy.delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn is_transient(error: &AppError) -> bool {
    matches!(
        error,
        AppError::StateStore(_)
            | AppError::Queue(_)
            | AppError::ObjectStore(_)
            | AppError::Counter(_)
            | AppError::Http(_)
            | AppError::Io(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_growth() {
        let backoff = BackoffPolicy::new(100, 10_000).with_jitter(0);
        assert_eq!(backoff.delay(0).as_millis(), 100);
        assert_eq!(backoff.delay(1).as_millis(), 200);
        assert_eq!(backoff.delay(2).as_millis(), 400);
    }

    #[test]
    fn test_max_cap() {
        let backoff = BackoffPolicy::new(100, 1_000).with_jitter(0);
        assert!(backoff.delay(10).as_millis() <= 1_000);
    }

    #[test]
    fn test_jitter_stays_proportional() {
        let backoff = BackoffPolicy::new(100, 10_000).with_jitter(10);
        for _ in 0..50 {
            let d = backoff.delay(3).as_millis() as u64;
            assert!((800..=880).contains(&d), "unexpected delay {d}");
        }
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy::new(1, 2).with_jitter(0);

        let result: Result<()> = retry_transient(&policy, 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::queue("still down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_passes_through_non_transient() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy::new(1, 2).with_jitter(0);

        let result: Result<()> = retry_transient(&policy, 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::lease_lost("abc")) }
        })
        .await;

        assert!(result.unwrap_err().is_lease_lost());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
