// src/state/dynamo.rs

//! DynamoDB-backed state store.
//!
//! Single table, partition key `url_hash`; a GSI on `lease_expires_at`
//! backs the reclaim scan and one on `(domain, last_crawled_at)` backs
//! operator staleness queries. Every lifecycle transition is a conditional
//! write; `ConditionalCheckFailedException` is the contention signal and is
//! never retried, while throttling and transient service faults are left to
//! the SDK's standard retry mode (bounded exponential backoff).
//!
//! Timestamps are stored as fixed-width UTC strings so the conditional
//! expressions can compare them lexicographically.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{AcquireOutcome, CrawlOutcome, InsertOutcome, RenewOutcome, RetryOutcome, StateStore};
use crate::error::{AppError, Result};
use crate::models::{RawLocation, UrlRecord, UrlState};

/// Index used by [`StateStore::reclaim_expired`].
const LEASE_EXPIRY_INDEX: &str = "lease-expiry-index";

/// Fixed-width, lexicographically ordered timestamp format.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub struct DynamoStateStore {
    client: Client,
    table: String,
    max_retries: u32,
}

impl DynamoStateStore {
    pub fn new(client: Client, table: impl Into<String>, max_retries: u32) -> Self {
        Self {
            client,
            table: table.into(),
            max_retries,
        }
    }

    fn key(url_hash: &str) -> AttributeValue {
        AttributeValue::S(url_hash.to_string())
    }

    fn ts(when: DateTime<Utc>) -> String {
        when.format(TS_FORMAT).to_string()
    }

    fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
    }

    /// Distinguish the contention signal from genuine service faults.
    fn is_conditional_failure<E>(err: &SdkError<E>) -> bool
    where
        E: aws_sdk_dynamodb::error::ProvideErrorMetadata,
    {
        err.as_service_error()
            .and_then(|se| se.code())
            .is_some_and(|code| code == "ConditionalCheckFailedException")
    }

    fn from_item(item: &std::collections::HashMap<String, AttributeValue>) -> Result<UrlRecord> {
        let string_attr = |name: &str| -> Option<String> {
            item.get(name).and_then(|v| v.as_s().ok()).cloned()
        };
        let ts_attr = |name: &str| string_attr(name).as_deref().and_then(Self::parse_ts);

        let url_hash = string_attr("url_hash")
            .ok_or_else(|| AppError::state_store("record missing url_hash"))?;
        let state: UrlState = string_attr("state")
            .ok_or_else(|| AppError::state_store(format!("record {url_hash} missing state")))?
            .parse()
            .map_err(AppError::state_store)?;

        let raw_location = match (string_attr("raw_bucket"), string_attr("raw_key")) {
            (Some(bucket), Some(key)) => Some(RawLocation { bucket, key }),
            _ => None,
        };

        Ok(UrlRecord {
            url_hash,
            url: string_attr("url").unwrap_or_default(),
            domain: string_attr("domain").unwrap_or_default(),
            state,
            owner_id: string_attr("owner_id"),
            acquired_at: ts_attr("acquired_at"),
            lease_expires_at: ts_attr("lease_expires_at"),
            retries: item
                .get("retries")
                .and_then(|v| v.as_n().ok())
                .and_then(|n| n.parse().ok())
                .unwrap_or(0),
            last_crawled_at: ts_attr("last_crawled_at"),
            last_error: string_attr("last_error"),
            raw_location,
            content_hash: string_attr("content_hash"),
        })
    }

    async fn get_item(&self, url_hash: &str) -> Result<Option<UrlRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("url_hash", Self::key(url_hash))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| AppError::state_store(e.to_string()))?;

        output.item().map(Self::from_item).transpose()
    }
}

#[async_trait]
impl StateStore for DynamoStateStore {
    async fn try_acquire(
        &self,
        url: &str,
        domain: &str,
        url_hash: &str,
        owner_id: &str,
        lease: Duration,
    ) -> Result<AcquireOutcome> {
        let now = Utc::now();
        let lease_expires = now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(60));

        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("url_hash", Self::key(url_hash))
            .condition_expression(
                "attribute_not_exists(url_hash) OR #s = :pending OR #s = :deferred \
                 OR (#s = :in_progress AND lease_expires_at < :now)",
            )
            .update_expression(
                "SET #s = :in_progress, owner_id = :owner, acquired_at = :now, \
                 lease_expires_at = :lease, #u = if_not_exists(#u, :url), \
                 #d = if_not_exists(#d, :domain), retries = if_not_exists(retries, :zero)",
            )
            .expression_attribute_names("#s", "state")
            .expression_attribute_names("#u", "url")
            .expression_attribute_names("#d", "domain")
            .expression_attribute_values(":pending", AttributeValue::S(UrlState::Pending.as_str().into()))
            .expression_attribute_values(":deferred", AttributeValue::S(UrlState::Deferred.as_str().into()))
            .expression_attribute_values(":in_progress", AttributeValue::S(UrlState::InProgress.as_str().into()))
            .expression_attribute_values(":now", AttributeValue::S(Self::ts(now)))
            .expression_attribute_values(":lease", AttributeValue::S(Self::ts(lease_expires)))
            .expression_attribute_values(":owner", AttributeValue::S(owner_id.into()))
            .expression_attribute_values(":url", AttributeValue::S(url.into()))
            .expression_attribute_values(":domain", AttributeValue::S(domain.into()))
            .expression_attribute_values(":zero", AttributeValue::N("0".into()))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(url_hash, owner_id, "acquired lock");
                Ok(AcquireOutcome::Acquired)
            }
            Err(e) if Self::is_conditional_failure(&e) => {
                // Read back to tell contention apart from terminal records.
                match self.get_item(url_hash).await? {
                    Some(record) if record.state.is_terminal() => Ok(AcquireOutcome::Terminal),
                    _ => Ok(AcquireOutcome::AlreadyHeld),
                }
            }
            Err(e) => Err(AppError::state_store(e.to_string())),
        }
    }

    async fn renew_lease(&self, url_hash: &str, owner_id: &str, extend: Duration) -> Result<RenewOutcome> {
        let now = Utc::now();
        let lease_expires = now + chrono::Duration::from_std(extend).unwrap_or(chrono::Duration::seconds(60));

        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("url_hash", Self::key(url_hash))
            .condition_expression("#s = :in_progress AND owner_id = :owner")
            .update_expression("SET lease_expires_at = :lease")
            .expression_attribute_names("#s", "state")
            .expression_attribute_values(":in_progress", AttributeValue::S(UrlState::InProgress.as_str().into()))
            .expression_attribute_values(":owner", AttributeValue::S(owner_id.into()))
            .expression_attribute_values(":lease", AttributeValue::S(Self::ts(lease_expires)))
            .send()
            .await;

        match result {
            Ok(_) => Ok(RenewOutcome::Renewed),
            Err(e) if Self::is_conditional_failure(&e) => Ok(RenewOutcome::Lost),
            Err(e) => Err(AppError::state_store(e.to_string())),
        }
    }

    async fn complete(&self, url_hash: &str, owner_id: &str, outcome: CrawlOutcome) -> Result<()> {
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("url_hash", Self::key(url_hash))
            .condition_expression("#s = :in_progress AND owner_id = :owner")
            .expression_attribute_names("#s", "state")
            .expression_attribute_values(":in_progress", AttributeValue::S(UrlState::InProgress.as_str().into()))
            .expression_attribute_values(":owner", AttributeValue::S(owner_id.into()));

        match outcome {
            CrawlOutcome::Success {
                raw_location,
                content_hash,
                crawled_at,
            } => {
                let mut set_clauses = vec!["#s = :done", "last_crawled_at = :crawled"];
                request = request
                    .expression_attribute_values(":done", AttributeValue::S(UrlState::Done.as_str().into()))
                    .expression_attribute_values(":crawled", AttributeValue::S(Self::ts(crawled_at)));

                if let Some(location) = raw_location {
                    set_clauses.push("raw_bucket = :rb");
                    set_clauses.push("raw_key = :rk");
                    request = request
                        .expression_attribute_values(":rb", AttributeValue::S(location.bucket))
                        .expression_attribute_values(":rk", AttributeValue::S(location.key));
                }
                if let Some(hash) = content_hash {
                    set_clauses.push("content_hash = :ch");
                    request = request.expression_attribute_values(":ch", AttributeValue::S(hash));
                }

                request = request.update_expression(format!(
                    "SET {} REMOVE owner_id, acquired_at, lease_expires_at, last_error",
                    set_clauses.join(", ")
                ));
            }
            CrawlOutcome::PermanentFailure { reason } => {
                request = request
                    .update_expression(
                        "SET #s = :failed, last_error = :reason REMOVE owner_id, acquired_at, lease_expires_at",
                    )
                    .expression_attribute_values(":failed", AttributeValue::S(UrlState::Failed.as_str().into()))
                    .expression_attribute_values(":reason", AttributeValue::S(reason));
            }
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) if Self::is_conditional_failure(&e) => Err(AppError::lease_lost(url_hash)),
            Err(e) => Err(AppError::state_store(e.to_string())),
        }
    }

    async fn schedule_retry(
        &self,
        url_hash: &str,
        owner_id: &str,
        _delay: Duration,
        reason: &str,
    ) -> Result<RetryOutcome> {
        let current = self
            .get_item(url_hash)
            .await?
            .ok_or_else(|| AppError::lease_lost(url_hash))?;
        let new_retries = current.retries + 1;
        let (target, outcome) = if new_retries > self.max_retries {
            (UrlState::Failed, RetryOutcome::Exhausted)
        } else {
            (UrlState::Deferred, RetryOutcome::Deferred)
        };

        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("url_hash", Self::key(url_hash))
            .condition_expression("#s = :in_progress AND owner_id = :owner AND retries = :expected")
            .update_expression(
                "SET #s = :target, retries = :new, last_error = :reason REMOVE owner_id, acquired_at, lease_expires_at",
            )
            .expression_attribute_names("#s", "state")
            .expression_attribute_values(":in_progress", AttributeValue::S(UrlState::InProgress.as_str().into()))
            .expression_attribute_values(":owner", AttributeValue::S(owner_id.into()))
            .expression_attribute_values(":expected", AttributeValue::N(current.retries.to_string()))
            .expression_attribute_values(":target", AttributeValue::S(target.as_str().into()))
            .expression_attribute_values(":new", AttributeValue::N(new_retries.to_string()))
            .expression_attribute_values(":reason", AttributeValue::S(reason.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(outcome),
            Err(e) if Self::is_conditional_failure(&e) => Err(AppError::lease_lost(url_hash)),
            Err(e) => Err(AppError::state_store(e.to_string())),
        }
    }

    async fn reclaim_expired(&self, batch_size: usize) -> Result<usize> {
        let now = Self::ts(Utc::now());

        let scan = self
            .client
            .scan()
            .table_name(&self.table)
            .index_name(LEASE_EXPIRY_INDEX)
            .filter_expression("#s = :in_progress AND lease_expires_at < :now")
            .expression_attribute_names("#s", "state")
            .expression_attribute_values(":in_progress", AttributeValue::S(UrlState::InProgress.as_str().into()))
            .expression_attribute_values(":now", AttributeValue::S(now.clone()))
            .limit(batch_size as i32)
            .send()
            .await
            .map_err(|e| AppError::state_store(e.to_string()))?;

        let mut reclaimed = 0usize;
        for item in scan.items() {
            let Some(url_hash) = item.get("url_hash").and_then(|v| v.as_s().ok()) else {
                continue;
            };

            let result = self
                .client
                .update_item()
                .table_name(&self.table)
                .key("url_hash", Self::key(url_hash))
                .condition_expression("#s = :in_progress AND lease_expires_at < :now")
                .update_expression("SET #s = :pending REMOVE owner_id, acquired_at, lease_expires_at")
                .expression_attribute_names("#s", "state")
                .expression_attribute_values(":in_progress", AttributeValue::S(UrlState::InProgress.as_str().into()))
                .expression_attribute_values(":pending", AttributeValue::S(UrlState::Pending.as_str().into()))
                .expression_attribute_values(":now", AttributeValue::S(now.clone()))
                .send()
                .await;

            match result {
                Ok(_) => reclaimed += 1,
                Err(e) if Self::is_conditional_failure(&e) => {
                    // Another worker got there first; nothing to do.
                    continue;
                }
                Err(e) => warn!(url_hash, error = %e, "failed to reclaim expired lock"),
            }
        }

        Ok(reclaimed)
    }

    async fn insert_pending(&self, url: &str, domain: &str, url_hash: &str) -> Result<InsertOutcome> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .item("url_hash", Self::key(url_hash))
            .item("url", AttributeValue::S(url.into()))
            .item("domain", AttributeValue::S(domain.into()))
            .item("state", AttributeValue::S(UrlState::Pending.as_str().into()))
            .item("retries", AttributeValue::N("0".into()))
            .condition_expression("attribute_not_exists(url_hash)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if Self::is_conditional_failure(&e) => Ok(InsertOutcome::Exists),
            Err(e) => Err(AppError::state_store(e.to_string())),
        }
    }

    async fn get(&self, url_hash: &str) -> Result<Option<UrlRecord>> {
        self.get_item(url_hash).await
    }
}
