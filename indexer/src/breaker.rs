// src/breaker.rs

//! Circuit breaker for sustained downstream outages.
//!
//! Transient failures are retried per message; when the embedding service
//! or the index rejects everything for a stretch, the breaker opens and
//! the worker stops pulling messages until the cooldown passes, instead
//! of spinning every delivery through its retry budget.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    pub threshold: u32,
    /// How long consumption stays paused once open
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Result of a breaker check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Paused; retry after the remaining cooldown.
    Open { retry_in: Duration },
}

struct Inner {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                open_until: None,
            }),
        }
    }

    /// Check whether consumption may proceed.
    pub fn check(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.open_until {
            Some(until) => {
                let now = Instant::now();
                if until > now {
                    BreakerState::Open { retry_in: until - now }
                } else {
                    // Half-open: allow traffic again, keep the failure
                    // count so one more failure re-opens immediately.
                    inner.open_until = None;
                    BreakerState::Closed
                }
            }
            None => BreakerState::Closed,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.consecutive_failures = 0;
        inner.open_until = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.config.threshold {
            tracing::warn!(
                failures = inner.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opened"
            );
            inner.open_until = Some(Instant::now() + self.config.cooldown);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig { threshold, cooldown })
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let cb = breaker(3, Duration::from_secs(10));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.check(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(3, Duration::from_secs(10));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(matches!(cb.check(), BreakerState::Open { .. }));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3, Duration::from_secs(10));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.check(), BreakerState::Closed);
    }

    #[test]
    fn test_reopens_immediately_after_half_open_failure() {
        let cb = breaker(2, Duration::from_millis(1));
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.check(), BreakerState::Closed);

        cb.record_failure();
        assert!(matches!(cb.check(), BreakerState::Open { .. }));
    }
}
