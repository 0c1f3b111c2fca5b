// src/state/memory.rs

//! In-memory state store for tests and single-node local runs.
//!
//! Implements exactly the transition rules of the table-backed adapter;
//! the mutex stands in for the store's conditional writes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{AcquireOutcome, CrawlOutcome, InsertOutcome, RenewOutcome, RetryOutcome, StateStore};
use crate::error::{AppError, Result};
use crate::models::{UrlRecord, UrlState};

pub struct InMemoryStateStore {
    records: Mutex<HashMap<String, UrlRecord>>,
    max_retries: u32,
}

impl InMemoryStateStore {
    pub fn new(max_retries: u32) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            max_retries,
        }
    }

    /// Snapshot of every record, for diagnostics and assertions.
    pub fn dump(&self) -> Vec<UrlRecord> {
        self.records.lock().expect("state mutex poisoned").values().cloned().collect()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn try_acquire(
        &self,
        url: &str,
        domain: &str,
        url_hash: &str,
        owner_id: &str,
        lease: Duration,
    ) -> Result<AcquireOutcome> {
        let now = Utc::now();
        let lease_expires_at = now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(60));
        let mut records = self.records.lock().expect("state mutex poisoned");

        let record = records
            .entry(url_hash.to_string())
            .or_insert_with(|| UrlRecord::pending(url, domain, url_hash));

        if record.state.is_terminal() {
            return Ok(AcquireOutcome::Terminal);
        }
        if record.state == UrlState::InProgress && !record.lease_expired(now) {
            return Ok(AcquireOutcome::AlreadyHeld);
        }

        record.state = UrlState::InProgress;
        record.owner_id = Some(owner_id.to_string());
        record.acquired_at = Some(now);
        record.lease_expires_at = Some(lease_expires_at);
        Ok(AcquireOutcome::Acquired)
    }

    async fn renew_lease(&self, url_hash: &str, owner_id: &str, extend: Duration) -> Result<RenewOutcome> {
        let now = Utc::now();
        let mut records = self.records.lock().expect("state mutex poisoned");

        match records.get_mut(url_hash) {
            Some(record)
                if record.state == UrlState::InProgress && record.owner_id.as_deref() == Some(owner_id) =>
            {
                record.lease_expires_at =
                    Some(now + chrono::Duration::from_std(extend).unwrap_or(chrono::Duration::seconds(60)));
                Ok(RenewOutcome::Renewed)
            }
            _ => Ok(RenewOutcome::Lost),
        }
    }

    async fn complete(&self, url_hash: &str, owner_id: &str, outcome: CrawlOutcome) -> Result<()> {
        let mut records = self.records.lock().expect("state mutex poisoned");

        let record = records
            .get_mut(url_hash)
            .ok_or_else(|| AppError::lease_lost(url_hash))?;
        if record.state != UrlState::InProgress || record.owner_id.as_deref() != Some(owner_id) {
            return Err(AppError::lease_lost(url_hash));
        }

        record.owner_id = None;
        record.acquired_at = None;
        record.lease_expires_at = None;

        match outcome {
            CrawlOutcome::Success {
                raw_location,
                content_hash,
                crawled_at,
            } => {
                record.state = UrlState::Done;
                record.last_crawled_at = Some(crawled_at);
                record.raw_location = raw_location;
                if content_hash.is_some() {
                    record.content_hash = content_hash;
                }
                record.last_error = None;
            }
            CrawlOutcome::PermanentFailure { reason } => {
                record.state = UrlState::Failed;
                record.last_error = Some(reason);
            }
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        url_hash: &str,
        owner_id: &str,
        _delay: Duration,
        reason: &str,
    ) -> Result<RetryOutcome> {
        let mut records = self.records.lock().expect("state mutex poisoned");

        let record = records
            .get_mut(url_hash)
            .ok_or_else(|| AppError::lease_lost(url_hash))?;
        if record.state != UrlState::InProgress || record.owner_id.as_deref() != Some(owner_id) {
            return Err(AppError::lease_lost(url_hash));
        }

        record.owner_id = None;
        record.acquired_at = None;
        record.lease_expires_at = None;
        record.retries += 1;
        record.last_error = Some(reason.to_string());

        if record.retries > self.max_retries {
            record.state = UrlState::Failed;
            Ok(RetryOutcome::Exhausted)
        } else {
            record.state = UrlState::Deferred;
            Ok(RetryOutcome::Deferred)
        }
    }

    async fn reclaim_expired(&self, batch_size: usize) -> Result<usize> {
        let now = Utc::now();
        let mut records = self.records.lock().expect("state mutex poisoned");

        let mut reclaimed = 0;
        for record in records.values_mut() {
            if reclaimed >= batch_size {
                break;
            }
            if record.lease_expired(now) {
                record.state = UrlState::Pending;
                record.owner_id = None;
                record.acquired_at = None;
                record.lease_expires_at = None;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn insert_pending(&self, url: &str, domain: &str, url_hash: &str) -> Result<InsertOutcome> {
        let mut records = self.records.lock().expect("state mutex poisoned");

        if records.contains_key(url_hash) {
            return Ok(InsertOutcome::Exists);
        }
        records.insert(url_hash.to_string(), UrlRecord::pending(url, domain, url_hash));
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, url_hash: &str) -> Result<Option<UrlRecord>> {
        let records = self.records.lock().expect("state mutex poisoned");
        Ok(records.get(url_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawLocation;

    const LEASE: Duration = Duration::from_secs(60);

    async fn acquire(store: &InMemoryStateStore, owner: &str) -> AcquireOutcome {
        store
            .try_acquire("https://example.test/a", "example.test", "h1", owner, LEASE)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_acquire_then_contend() {
        let store = InMemoryStateStore::new(3);

        assert_eq!(acquire(&store, "w1").await, AcquireOutcome::Acquired);
        assert_eq!(acquire(&store, "w2").await, AcquireOutcome::AlreadyHeld);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let store = InMemoryStateStore::new(3);

        store
            .try_acquire("https://example.test/a", "example.test", "h1", "w1", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(acquire(&store, "w2").await, AcquireOutcome::Acquired);
        assert_eq!(store.get("h1").await.unwrap().unwrap().owner_id.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn test_done_is_terminal() {
        let store = InMemoryStateStore::new(3);
        acquire(&store, "w1").await;
        store
            .complete(
                "h1",
                "w1",
                CrawlOutcome::Success {
                    raw_location: Some(RawLocation::new("raw", "k")),
                    content_hash: Some("abcd".into()),
                    crawled_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        assert_eq!(acquire(&store, "w2").await, AcquireOutcome::Terminal);
    }

    #[tokio::test]
    async fn test_renew_after_reclaim_is_lost() {
        let store = InMemoryStateStore::new(3);
        store
            .try_acquire("https://example.test/a", "example.test", "h1", "w1", Duration::ZERO)
            .await
            .unwrap();
        acquire(&store, "w2").await;

        assert_eq!(
            store.renew_lease("h1", "w1", LEASE).await.unwrap(),
            RenewOutcome::Lost
        );
        assert_eq!(
            store.renew_lease("h1", "w2", LEASE).await.unwrap(),
            RenewOutcome::Renewed
        );
    }

    #[tokio::test]
    async fn test_complete_without_ownership_is_lease_lost() {
        let store = InMemoryStateStore::new(3);
        acquire(&store, "w1").await;

        let err = store
            .complete(
                "h1",
                "w2",
                CrawlOutcome::PermanentFailure { reason: "404".into() },
            )
            .await
            .unwrap_err();
        assert!(err.is_lease_lost());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let store = InMemoryStateStore::new(2);

        for attempt in 0..2 {
            assert_eq!(acquire(&store, "w1").await, AcquireOutcome::Acquired);
            let outcome = store
                .schedule_retry("h1", "w1", Duration::from_secs(1), "503")
                .await
                .unwrap();
            assert_eq!(outcome, RetryOutcome::Deferred, "attempt {attempt}");
        }

        assert_eq!(acquire(&store, "w1").await, AcquireOutcome::Acquired);
        let outcome = store
            .schedule_retry("h1", "w1", Duration::from_secs(1), "503")
            .await
            .unwrap();
        assert_eq!(outcome, RetryOutcome::Exhausted);

        let record = store.get("h1").await.unwrap().unwrap();
        assert_eq!(record.state, UrlState::Failed);
        assert_eq!(record.retries, 3);
        assert_eq!(acquire(&store, "w1").await, AcquireOutcome::Terminal);
    }

    #[tokio::test]
    async fn test_insert_pending_is_idempotent() {
        let store = InMemoryStateStore::new(3);

        assert_eq!(
            store.insert_pending("https://example.test/a", "example.test", "h1").await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_pending("https://example.test/a", "example.test", "h1").await.unwrap(),
            InsertOutcome::Exists
        );
    }

    #[tokio::test]
    async fn test_reclaim_expired_moves_to_pending() {
        let store = InMemoryStateStore::new(3);
        store
            .try_acquire("https://example.test/a", "example.test", "h1", "w1", Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.reclaim_expired(10).await.unwrap(), 1);
        let record = store.get("h1").await.unwrap().unwrap();
        assert_eq!(record.state, UrlState::Pending);
        assert!(record.owner_id.is_none());
    }
}
