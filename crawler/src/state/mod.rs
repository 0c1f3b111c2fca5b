// src/state/mod.rs

//! URL lifecycle store with conditional-write locking.
//!
//! The state table is the only source of truth for URL lifecycle; workers
//! never cache lifecycle decisions across messages. Lock contention is a
//! normal outcome here, not an error: `try_acquire` reports it as
//! `AlreadyHeld`/`Terminal` and writes against a lost lease surface as
//! [`AppError::LeaseLost`](crate::AppError::LeaseLost). Everything else a
//! backend returns is a transient fault and is retried with bounded
//! backoff inside the adapter.

pub mod dynamo;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{RawLocation, UrlRecord};

/// Result of a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now owns the record's lease.
    Acquired,
    /// Another worker holds an unexpired lease.
    AlreadyHeld,
    /// The record is `done` or `failed`; drop the work.
    Terminal,
}

/// Result of a lease heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    /// The lease was reclaimed; the worker must abort its in-flight work.
    Lost,
}

/// Result of scheduling a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Record moved to `deferred`; redelivery will retry it.
    Deferred,
    /// The retry budget is spent; record moved terminally to `failed`.
    Exhausted,
}

/// Result of discovery's idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record already existed; the insert was a no-op.
    Exists,
}

/// Final disposition of a crawl attempt.
#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    /// Fetch succeeded, or policy resolved the URL without fetching
    /// (`raw_location: None` records a robots denial we respected).
    Success {
        raw_location: Option<RawLocation>,
        content_hash: Option<String>,
        crawled_at: DateTime<Utc>,
    },
    /// The URL will never be crawlable (4xx, cross-domain redirect, ...).
    PermanentFailure { reason: String },
}

/// URL lifecycle persistence with conditional-write locking primitives.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Attempt to take the lock on a URL.
    ///
    /// Succeeds when no record exists (inserting one), when the record is
    /// in an acquirable state, or when an `in_progress` lease has expired
    /// (lease reclaim). Sets owner, `acquired_at`, and
    /// `lease_expires_at = now + lease`.
    async fn try_acquire(
        &self,
        url: &str,
        domain: &str,
        url_hash: &str,
        owner_id: &str,
        lease: Duration,
    ) -> Result<AcquireOutcome>;

    /// Extend the caller's lease; `Lost` when ownership has moved on.
    async fn renew_lease(&self, url_hash: &str, owner_id: &str, extend: Duration) -> Result<RenewOutcome>;

    /// Transition out of `in_progress` to a final state. Conditional on
    /// ownership; a reclaimed lease yields `AppError::LeaseLost`.
    async fn complete(&self, url_hash: &str, owner_id: &str, outcome: CrawlOutcome) -> Result<()>;

    /// Record a retryable failure: `retries += 1` and move to `deferred`,
    /// or to `failed` once the budget is exhausted. Conditional on
    /// ownership.
    async fn schedule_retry(
        &self,
        url_hash: &str,
        owner_id: &str,
        delay: Duration,
        reason: &str,
    ) -> Result<RetryOutcome>;

    /// Move expired `in_progress` records back to `pending` so queue
    /// redelivery can pick them up. Returns how many were reclaimed.
    async fn reclaim_expired(&self, batch_size: usize) -> Result<usize>;

    /// Discovery's idempotent insert: create a `pending` record, or
    /// silently no-op when any record already exists.
    async fn insert_pending(&self, url: &str, domain: &str, url_hash: &str) -> Result<InsertOutcome>;

    /// Read a record, if present.
    async fn get(&self, url_hash: &str) -> Result<Option<UrlRecord>>;
}
