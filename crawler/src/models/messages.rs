// src/models/messages.rs

//! Queue message shapes for the three pipeline stages.
//!
//! All messages are JSON with a top-level `v` schema version so consumers
//! can reject payloads they do not understand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RawLocation;

/// Current message schema version.
pub const SCHEMA_VERSION: u32 = 1;

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Ask the discovery coordinator to enumerate a domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    #[serde(default = "schema_version")]
    pub v: u32,

    /// Domain to enumerate
    pub domain: String,

    /// Where the request came from ("seed", "outlink", "sitemap-index")
    pub source: String,
}

impl DiscoveryMessage {
    pub fn new(domain: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            v: SCHEMA_VERSION,
            domain: domain.into(),
            source: source.into(),
        }
    }
}

/// One URL to fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlMessage {
    #[serde(default = "schema_version")]
    pub v: u32,

    /// Canonical URL
    pub url: String,

    /// Domain of the URL
    pub domain: String,

    /// Fingerprint of the canonical URL
    pub url_hash: String,

    /// Scheduling priority (higher first; advisory)
    #[serde(default)]
    pub priority: i32,

    /// Delivery attempt, incremented on each retry enqueue
    #[serde(default)]
    pub attempt: u32,

    pub enqueued_at: DateTime<Utc>,
}

impl CrawlMessage {
    pub fn new(url: impl Into<String>, domain: impl Into<String>, url_hash: impl Into<String>) -> Self {
        Self {
            v: SCHEMA_VERSION,
            url: url.into(),
            domain: domain.into(),
            url_hash: url_hash.into(),
            priority: 0,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// A crawled page ready for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMessage {
    #[serde(default = "schema_version")]
    pub v: u32,

    pub url: String,
    pub url_hash: String,
    pub domain: String,

    /// Raw HTML location
    pub raw_location: RawLocation,

    /// Extracted-text location, when the crawler produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_location: Option<RawLocation>,

    /// Detected content language ("en", "ja", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_lang: Option<String>,

    pub fetched_at: DateTime<Utc>,
}
