// src/storage/mod.rs

//! Object storage for raw and parsed page content.
//!
//! Unified interface with S3 and in-memory backends. Keys are built by the
//! `paths` module and treated as opaque by every consumer except the
//! bucket owners.

pub mod memory;
pub mod s3;

use async_trait::async_trait;

use crate::error::Result;

/// Byte-level object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Read an object, `None` when the key does not exist.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Key layout shared by all backends.
///
/// Raw bucket: `{domain}/{YYYY}/{MM}/{DD}/{url_hash}.html` plus a
/// `.meta.json` sidecar; parsed bucket mirrors the pattern with `.txt`
/// and `.json` suffixes.
pub mod paths {
    use chrono::{DateTime, Datelike, Utc};

    fn day_prefix(domain: &str, fetched_at: DateTime<Utc>) -> String {
        format!(
            "{}/{:04}/{:02}/{:02}",
            domain,
            fetched_at.year(),
            fetched_at.month(),
            fetched_at.day()
        )
    }

    pub fn raw_html(domain: &str, fetched_at: DateTime<Utc>, url_hash: &str) -> String {
        format!("{}/{}.html", day_prefix(domain, fetched_at), url_hash)
    }

    pub fn raw_meta(domain: &str, fetched_at: DateTime<Utc>, url_hash: &str) -> String {
        format!("{}/{}.meta.json", day_prefix(domain, fetched_at), url_hash)
    }

    pub fn parsed_text(domain: &str, fetched_at: DateTime<Utc>, url_hash: &str) -> String {
        format!("{}/{}.txt", day_prefix(domain, fetched_at), url_hash)
    }

    pub fn parsed_meta(domain: &str, fetched_at: DateTime<Utc>, url_hash: &str) -> String {
        format!("{}/{}.json", day_prefix(domain, fetched_at), url_hash)
    }

}
