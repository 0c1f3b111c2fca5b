// src/models/record.rs

//! URL lifecycle record, one per normalized URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a URL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlState {
    /// Discovered, waiting for a worker.
    Pending,
    /// Locked by a worker with an unexpired lease.
    InProgress,
    /// Crawled successfully, or crawl was resolved by policy.
    Done,
    /// Terminally failed; will not be retried.
    Failed,
    /// A retryable failure occurred; redelivery will pick it up.
    Deferred,
}

impl UrlState {
    /// States a worker may take the lock from.
    ///
    /// `Deferred` is acquirable: the retry delay is enforced by queue
    /// visibility, not by the state table.
    pub fn is_acquirable(self) -> bool {
        matches!(self, Self::Pending | Self::Deferred)
    }

    /// Terminal states: the caller must drop the work.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }
}

impl std::str::FromStr for UrlState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "deferred" => Ok(Self::Deferred),
            other => Err(format!("unknown url state: {other}")),
        }
    }
}

/// Pointer to a stored object (bucket + key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLocation {
    pub bucket: String,
    pub key: String,
}

impl RawLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// One row of the URL state table, keyed by `url_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    /// Hex SHA-256 of the canonical URL; the sole identity across the
    /// pipeline.
    pub url_hash: String,

    /// Canonical URL string
    pub url: String,

    /// Domain the URL belongs to
    pub domain: String,

    /// Lifecycle state
    pub state: UrlState,

    /// Worker holding the lock; set only while `state = in_progress`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    /// When the current lock was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,

    /// When the current lock may be reclaimed by another worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Attempts that ended in a retryable failure
    #[serde(default)]
    pub retries: u32,

    /// Time of the last successful fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crawled_at: Option<DateTime<Utc>>,

    /// Short diagnostic for the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Where the raw body lives once fetched; empty for policy-denied URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_location: Option<RawLocation>,

    /// SHA-256 of the last stored body, for reindex suppression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl UrlRecord {
    /// A fresh record in `pending`, as created by discovery.
    pub fn pending(url: impl Into<String>, domain: impl Into<String>, url_hash: impl Into<String>) -> Self {
        Self {
            url_hash: url_hash.into(),
            url: url.into(),
            domain: domain.into(),
            state: UrlState::Pending,
            owner_id: None,
            acquired_at: None,
            lease_expires_at: None,
            retries: 0,
            last_crawled_at: None,
            last_error: None,
            raw_location: None,
            content_hash: None,
        }
    }

    /// Whether the lock on this record has lapsed.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == UrlState::InProgress
            && self.lease_expires_at.map_or(true, |exp| exp <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            UrlState::Pending,
            UrlState::InProgress,
            UrlState::Done,
            UrlState::Failed,
            UrlState::Deferred,
        ] {
            assert_eq!(state.as_str().parse::<UrlState>().unwrap(), state);
        }
    }

    #[test]
    fn test_acquirable_states() {
        assert!(UrlState::Pending.is_acquirable());
        assert!(UrlState::Deferred.is_acquirable());
        assert!(!UrlState::InProgress.is_acquirable());
        assert!(!UrlState::Done.is_acquirable());
        assert!(!UrlState::Failed.is_acquirable());
    }

    #[test]
    fn test_lease_expiry() {
        let mut record = UrlRecord::pending("https://example.test/a", "example.test", "abc");
        let now = Utc::now();

        record.state = UrlState::InProgress;
        record.lease_expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(!record.lease_expired(now));

        record.lease_expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(record.lease_expired(now));
    }
}
