// src/gate/rate.rs

//! Sliding-window QPS ceiling backed by the shared counter store.
//!
//! One-second buckets over the trailing window, per domain, so every
//! worker in the fleet shares the same view. The store update is a
//! per-domain atomic pipeline (INCR + EXPIRE). When the counter store is
//! unreachable the gate fails open into a conservative local fallback
//! instead of stalling the fleet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use tracing::warn;

/// Bucket granularity. Finer buckets buy precision at the cost of more
/// counter-store keys per check.
const BUCKET_SECS: u64 = 1;

/// Minimum spacing of the local fallback when the counter store is down.
const FALLBACK_INTERVAL: Duration = Duration::from_secs(1);

/// Gate verdict for one prospective request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    /// Capacity available; the grant has been recorded.
    Ready,
    /// Over the ceiling; retry after roughly this long.
    WaitFor(Duration),
}

pub struct RateGate {
    counters: Option<ConnectionManager>,
    window_secs: u64,
    default_qps: f64,
    domain_qps: HashMap<String, f64>,
    fallback_last_grant: Mutex<HashMap<String, Instant>>,
    fallback_active: AtomicBool,
}

impl RateGate {
    pub fn new(
        counters: ConnectionManager,
        window_secs: u64,
        default_qps: f64,
        domain_qps: HashMap<String, f64>,
    ) -> Self {
        Self {
            counters: Some(counters),
            window_secs: window_secs.max(BUCKET_SECS),
            default_qps,
            domain_qps,
            fallback_last_grant: Mutex::new(HashMap::new()),
            fallback_active: AtomicBool::new(false),
        }
    }

    /// Connect to the counter store.
    pub async fn connect(
        url: &str,
        window_secs: u64,
        default_qps: f64,
        domain_qps: HashMap<String, f64>,
    ) -> crate::error::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager, window_secs, default_qps, domain_qps))
    }

    /// A gate with no counter store: local-fallback pacing only. For
    /// single-node runs and tests.
    pub fn disconnected(window_secs: u64, default_qps: f64, domain_qps: HashMap<String, f64>) -> Self {
        Self {
            counters: None,
            window_secs: window_secs.max(BUCKET_SECS),
            default_qps,
            domain_qps,
            fallback_last_grant: Mutex::new(HashMap::new()),
            fallback_active: AtomicBool::new(false),
        }
    }

    /// Effective QPS ceiling for a domain:
    /// `min(domain_override, default_qps, 1 / crawl_delay)`.
    pub fn effective_qps(&self, domain: &str, crawl_delay: Option<Duration>) -> f64 {
        let mut qps = self.default_qps;
        if let Some(&override_qps) = self.domain_qps.get(domain) {
            qps = qps.min(override_qps);
        }
        if let Some(delay) = crawl_delay {
            let delay_secs = delay.as_secs_f64();
            if delay_secs > 0.0 {
                qps = qps.min(1.0 / delay_secs);
            }
        }
        qps
    }

    /// Try to take a request slot for the domain.
    pub async fn acquire_slot(&self, domain: &str, crawl_delay: Option<Duration>) -> SlotDecision {
        let qps = self.effective_qps(domain, crawl_delay);
        let window_budget = ((qps * self.window_secs as f64).floor() as u64).max(1);

        match &self.counters {
            Some(manager) => match self.try_shared_window(manager.clone(), domain, window_budget).await {
                Ok(decision) => {
                    self.fallback_active.store(false, Ordering::Relaxed);
                    decision
                }
                Err(e) => {
                    if !self.fallback_active.swap(true, Ordering::Relaxed) {
                        warn!(error = %e, "counter store unreachable, falling back to local pacing");
                    }
                    self.local_fallback(domain, crawl_delay)
                }
            },
            None => self.local_fallback(domain, crawl_delay),
        }
    }

    async fn try_shared_window(
        &self,
        mut manager: ConnectionManager,
        domain: &str,
        window_budget: u64,
    ) -> redis::RedisResult<SlotDecision> {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let current_bucket = now_secs / BUCKET_SECS;
        let buckets = self.window_secs / BUCKET_SECS;

        let keys: Vec<String> = (0..buckets)
            .map(|i| format!("rate:req:{domain}:{}", current_bucket.saturating_sub(i)))
            .collect();

        let counts: Vec<Option<u64>> = redis::cmd("MGET").arg(&keys).query_async(&mut manager).await?;
        let in_window: u64 = counts.into_iter().flatten().sum();

        if in_window >= window_budget {
            // The oldest bucket rotates out at the next boundary; callers
            // re-check after sleeping.
            let until_next_bucket = BUCKET_SECS * 1000
                - (SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64
                    % (BUCKET_SECS * 1000));
            return Ok(SlotDecision::WaitFor(Duration::from_millis(until_next_bucket.max(50))));
        }

        let bucket_key = format!("rate:req:{domain}:{current_bucket}");
        let (_count, _ttl): (u64, u64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(&bucket_key)
            .cmd("EXPIRE")
            .arg(&bucket_key)
            .arg(self.window_secs + 60)
            .query_async(&mut manager)
            .await?;

        Ok(SlotDecision::Ready)
    }

    /// Counter store unavailable: enforce a flat minimum spacing locally.
    fn local_fallback(&self, domain: &str, crawl_delay: Option<Duration>) -> SlotDecision {
        let interval = crawl_delay.unwrap_or(FALLBACK_INTERVAL).max(FALLBACK_INTERVAL);
        let now = Instant::now();
        let mut last_grant = self.fallback_last_grant.lock().expect("rate mutex poisoned");

        match last_grant.get(domain) {
            Some(&last) if now.duration_since(last) < interval => {
                SlotDecision::WaitFor(interval - now.duration_since(last))
            }
            _ => {
                last_grant.insert(domain.to_string(), now);
                SlotDecision::Ready
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_qps_takes_minimum() {
        let mut overrides = HashMap::new();
        overrides.insert("slow.test".to_string(), 0.5);
        let gate = RateGate::disconnected(60, 2.0, overrides);

        assert_eq!(gate.effective_qps("fast.test", None), 2.0);
        assert_eq!(gate.effective_qps("slow.test", None), 0.5);
        assert_eq!(
            gate.effective_qps("fast.test", Some(Duration::from_secs(4))),
            0.25
        );
        assert_eq!(
            gate.effective_qps("slow.test", Some(Duration::from_secs(1))),
            0.5
        );
    }

    #[tokio::test]
    async fn test_fallback_paces_per_domain() {
        let gate = RateGate::disconnected(60, 5.0, HashMap::new());

        assert_eq!(gate.acquire_slot("a.test", None).await, SlotDecision::Ready);
        assert!(matches!(
            gate.acquire_slot("a.test", None).await,
            SlotDecision::WaitFor(_)
        ));
        // Independent domain is unaffected.
        assert_eq!(gate.acquire_slot("b.test", None).await, SlotDecision::Ready);
    }

    #[tokio::test]
    async fn test_fallback_honors_crawl_delay() {
        let gate = RateGate::disconnected(60, 5.0, HashMap::new());
        let delay = Some(Duration::from_secs(30));

        assert_eq!(gate.acquire_slot("a.test", delay).await, SlotDecision::Ready);
        match gate.acquire_slot("a.test", delay).await {
            SlotDecision::WaitFor(wait) => assert!(wait > Duration::from_secs(25)),
            SlotDecision::Ready => panic!("expected WaitFor under crawl-delay"),
        }
    }
}
