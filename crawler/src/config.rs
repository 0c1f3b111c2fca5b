// src/config.rs

//! Worker configuration: TOML file with environment overrides.
//!
//! Every section has defaults good enough for a local run against
//! LocalStack-style endpoints; production deployments override the AWS
//! section via environment.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, Result};

/// Root configuration for crawl-side workers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub aws: AwsSettings,
    pub queues: QueueSettings,
    pub counter: CounterSettings,
    pub crawler: CrawlerSettings,
    pub discovery: DiscoverySettings,
    pub rate: RateSettings,
}

/// AWS service wiring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    pub region: String,
    /// Non-empty for LocalStack-style endpoint overrides
    pub endpoint: Option<String>,
    pub state_table: String,
    pub raw_bucket: String,
    pub parsed_bucket: String,
}

/// Queue URLs and delivery tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub discovery_queue: String,
    pub crawl_queue: String,
    pub index_queue: String,
    pub dead_letter_queue: String,
    /// Visibility timeout requested when receiving crawl messages
    pub crawl_visibility_secs: u64,
    pub discovery_visibility_secs: u64,
    /// Long-poll wait
    pub receive_wait_secs: u64,
    /// Receive count after which a message belongs in the DLQ
    pub max_receive_count: u32,
}

/// Shared counter store (sliding-window rate buckets).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CounterSettings {
    pub url: String,
}

/// Fetch and lifecycle behavior of the crawl worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_concurrent: usize,
    pub max_redirects: usize,
    pub max_content_length: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Margin added to the visibility timeout when computing the lease
    pub lease_margin_secs: u64,
    /// Gate waits at or below this are slept in-process; longer ones defer
    pub gate_wait_threshold_ms: u64,
    /// Outlinks emitted per page, at most
    pub max_links_per_page: usize,
}

/// Sitemap enumeration bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub max_sitemap_depth: usize,
    pub max_urls_per_pass: usize,
    /// Pause enqueueing when the crawl queue is deeper than this
    pub crawl_queue_ceiling: usize,
}

/// Sliding-window rate ceilings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    pub window_secs: u64,
    pub default_qps: f64,
    /// Per-domain QPS overrides
    pub domain_qps: HashMap<String, f64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            aws: AwsSettings::default(),
            queues: QueueSettings::default(),
            counter: CounterSettings::default(),
            crawler: CrawlerSettings::default(),
            discovery: DiscoverySettings::default(),
            rate: RateSettings::default(),
        }
    }
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: "ap-northeast-1".into(),
            endpoint: None,
            state_table: "crawl-url-state".into(),
            raw_bucket: "crawl-raw".into(),
            parsed_bucket: "crawl-parsed".into(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            discovery_queue: String::new(),
            crawl_queue: String::new(),
            index_queue: String::new(),
            dead_letter_queue: String::new(),
            crawl_visibility_secs: 60,
            discovery_visibility_secs: 60,
            receive_wait_secs: 20,
            max_receive_count: 5,
        }
    }
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
        }
    }
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            user_agent: "SiteSearchBot/0.3 (+https://example.invalid/bot)".into(),
            request_timeout_secs: 30,
            max_concurrent: 10,
            max_redirects: 5,
            max_content_length: 1_048_576,
            max_retries: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            lease_margin_secs: 30,
            gate_wait_threshold_ms: 2_000,
            max_links_per_page: 200,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_sitemap_depth: 3,
            max_urls_per_pass: 5_000,
            crawl_queue_ceiling: 50_000,
        }
    }
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            default_qps: 1.0,
            domain_qps: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, then apply environment overrides.
    ///
    /// Falls back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Environment variables win over file values for deployment wiring.
    fn apply_env(&mut self) {
        let overrides: &mut [(&str, &mut String)] = &mut [
            ("AWS_REGION", &mut self.aws.region),
            ("STATE_TABLE", &mut self.aws.state_table),
            ("RAW_BUCKET", &mut self.aws.raw_bucket),
            ("PARSED_BUCKET", &mut self.aws.parsed_bucket),
            ("DISCOVERY_QUEUE_URL", &mut self.queues.discovery_queue),
            ("CRAWL_QUEUE_URL", &mut self.queues.crawl_queue),
            ("INDEX_QUEUE_URL", &mut self.queues.index_queue),
            ("DEAD_LETTER_QUEUE_URL", &mut self.queues.dead_letter_queue),
            ("COUNTER_URL", &mut self.counter.url),
        ];
        for (var, slot) in overrides.iter_mut() {
            if let Ok(value) = std::env::var(var) {
                **slot = value;
            }
        }
        if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
            self.aws.endpoint = Some(endpoint);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::config("crawler.max_concurrent must be at least 1"));
        }
        if self.rate.default_qps <= 0.0 {
            return Err(AppError::config("rate.default_qps must be positive"));
        }
        Ok(())
    }

    /// Lease duration for crawl locks: visibility timeout plus margin.
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.queues.crawl_visibility_secs + self.crawler.lease_margin_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.crawler.request_timeout_secs)
    }

    pub fn backoff(&self) -> crate::backoff::BackoffPolicy {
        crate::backoff::BackoffPolicy::new(self.crawler.base_backoff_ms, self.crawler.max_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.queues.crawl_visibility_secs, 60);
        assert_eq!(settings.lease_duration(), Duration::from_secs(90));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [crawler]
            max_concurrent = 4

            [rate]
            default_qps = 2.5
            [rate.domain_qps]
            "example.test" = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(settings.crawler.max_concurrent, 4);
        assert_eq!(settings.crawler.max_retries, 3);
        assert_eq!(settings.rate.default_qps, 2.5);
        assert_eq!(settings.rate.domain_qps["example.test"], 0.5);
    }
}
