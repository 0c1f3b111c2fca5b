// src/gate/mod.rs

//! Rate & politeness gate: robots.txt policy plus per-domain QPS ceilings.
//!
//! The gate is advisory across workers; brief overruns under clock skew
//! are acceptable. It never blocks on network I/O beyond the HTTP client's
//! timeout — long waits are returned to the caller as `WaitFor`.

pub mod rate;
pub mod robots;

pub use rate::{RateGate, SlotDecision};
pub use robots::{RobotsCache, RobotsPolicy, SitemapAnnouncement};

use crate::error::Result;

/// The two politeness checks fused behind one interface.
pub struct PolitenessGate {
    robots: RobotsCache,
    rate: RateGate,
}

impl PolitenessGate {
    pub fn new(robots: RobotsCache, rate: RateGate) -> Self {
        Self { robots, rate }
    }

    /// Whether robots policy permits fetching this URL.
    pub async fn is_allowed(&self, domain: &str, url: &str) -> Result<bool> {
        self.robots.is_allowed(domain, url).await
    }

    /// Try to take a request slot for the domain.
    ///
    /// `Ready` atomically records the grant; `WaitFor` tells the caller how
    /// long until the window frees up.
    pub async fn acquire_slot(&self, domain: &str) -> Result<SlotDecision> {
        let crawl_delay = self.robots.policy(domain).await?.crawl_delay;
        Ok(self.rate.acquire_slot(domain, crawl_delay).await)
    }

    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }
}
