// src/worker/crawler.rs

//! The crawl worker: consumes crawl messages and drives each one through
//! lock → gate → fetch → persist → ack.
//!
//! Acknowledgement is always the last step; everything upstream of it is
//! idempotent under redelivery. A lost lease cancels the slot's token and
//! the slot unwinds without acking and without state writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::fetch::{classify_error, classify_status, Disposition, FetchResponse, PageFetcher};
use super::lease::LeaseRenewer;
use super::outlinks::{extract_outlinks, partition_outlinks};
use crate::config::Settings;
use crate::error::Result;
use crate::extract;
use crate::gate::{PolitenessGate, SlotDecision};
use crate::models::{CrawlMessage, DiscoveryMessage, IndexMessage, RawLocation, SCHEMA_VERSION};
use crate::queue::{self, Delivery, WorkQueue};
use crate::state::{AcquireOutcome, CrawlOutcome, RetryOutcome, StateStore};
use crate::storage::{paths, ObjectStore};
use crate::urlnorm;

/// How a slot wants its message settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    /// Done with this message, delete it.
    Ack,
    /// Return to visibility after the delay.
    Nack(Duration),
    /// Do nothing; visibility expiry will redeliver.
    Leave,
}

pub struct CrawlerWorker {
    state: Arc<dyn StateStore>,
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn ObjectStore>,
    gate: Arc<PolitenessGate>,
    fetcher: Arc<dyn PageFetcher>,
    settings: Arc<Settings>,
    owner_id: String,
    /// Phase one of shutdown: stop polling for new work
    poll_stop: CancellationToken,
    /// Phase two: abort in-flight slots
    abort: CancellationToken,
}

impl CrawlerWorker {
    pub fn new(
        state: Arc<dyn StateStore>,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn ObjectStore>,
        gate: Arc<PolitenessGate>,
        fetcher: Arc<dyn PageFetcher>,
        settings: Arc<Settings>,
    ) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            state,
            queue,
            store,
            gate,
            fetcher,
            settings,
            owner_id: format!("worker-{}", &suffix[..8]),
            poll_stop: CancellationToken::new(),
            abort: CancellationToken::new(),
        }
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Phase one: stop taking new messages; in-flight slots drain.
    pub fn trigger_shutdown(&self) {
        self.poll_stop.cancel();
    }

    /// Phase two: abort whatever is still in flight. Lease expiry plus
    /// queue visibility pick the work back up elsewhere.
    pub fn force_abort(&self) {
        self.abort.cancel();
    }

    /// Main loop: poll, fan out to slots, settle each message.
    pub async fn run(&self) -> Result<()> {
        let queues = &self.settings.queues;
        info!(owner_id = %self.owner_id, queue = %queues.crawl_queue, "crawl worker started");

        loop {
            let deliveries = tokio::select! {
                _ = self.poll_stop.cancelled() => break,
                received = self.queue.receive(
                    &queues.crawl_queue,
                    self.settings.crawler.max_concurrent,
                    Duration::from_secs(queues.receive_wait_secs),
                    Duration::from_secs(queues.crawl_visibility_secs),
                ) => received?,
            };

            stream::iter(deliveries)
                .for_each_concurrent(self.settings.crawler.max_concurrent, |delivery| async move {
                    self.process_delivery(delivery).await;
                })
                .await;
        }

        info!(owner_id = %self.owner_id, "crawl worker stopped");
        Ok(())
    }

    /// Process one delivery end to end, settling it afterwards.
    pub async fn process_delivery(&self, delivery: Delivery) {
        let queues = &self.settings.queues;

        let message: CrawlMessage = match queue::decode(&delivery) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "malformed crawl message, dead-lettering");
                let settle = self
                    .send_dead_letter(&delivery.body, &format!("malformed crawl message: {e}"))
                    .await
                    .map(|_| Settle::Ack)
                    .unwrap_or(Settle::Leave);
                self.settle(&delivery, settle).await;
                return;
            }
        };

        let settle = match self.handle_message(&message, &delivery).await {
            Ok(settle) => settle,
            Err(e) if e.is_lease_lost() => {
                warn!(url = %message.url, "lease lost mid-flight, leaving message to redeliver");
                Settle::Leave
            }
            Err(e) => {
                warn!(url = %message.url, error = %e, "slot failed, leaving message to redeliver");
                Settle::Leave
            }
        };

        debug!(url = %message.url, ?settle, queue = %queues.crawl_queue, "settling crawl message");
        self.settle(&delivery, settle).await;
    }

    async fn settle(&self, delivery: &Delivery, settle: Settle) {
        let queues = &self.settings.queues;
        let result = match settle {
            Settle::Ack => self.queue.ack(&queues.crawl_queue, &delivery.receipt).await,
            Settle::Nack(delay) => self.queue.nack(&queues.crawl_queue, &delivery.receipt, delay).await,
            Settle::Leave => Ok(()),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to settle message; visibility will redeliver");
        }
    }

    async fn handle_message(&self, message: &CrawlMessage, delivery: &Delivery) -> Result<Settle> {
        // Received → Locking
        let canonical = match urlnorm::normalize(&message.url) {
            Ok(canonical) => canonical,
            Err(e) => {
                self.send_dead_letter(&delivery.body, &format!("invalid URL: {e}")).await?;
                return Ok(Settle::Ack);
            }
        };
        let url_hash = urlnorm::url_hash(&canonical);

        let lease = self.settings.lease_duration();
        match self
            .state
            .try_acquire(&canonical, &message.domain, &url_hash, &self.owner_id, lease)
            .await?
        {
            AcquireOutcome::Acquired => {}
            AcquireOutcome::AlreadyHeld => {
                debug!(url = %canonical, "already locked elsewhere, dropping work");
                return Ok(Settle::Ack);
            }
            AcquireOutcome::Terminal => {
                debug!(url = %canonical, "record is terminal, dropping work");
                return Ok(Settle::Ack);
            }
        }

        let slot = self.abort.child_token();
        let _renewer = LeaseRenewer::spawn(
            Arc::clone(&self.state),
            url_hash.clone(),
            self.owner_id.clone(),
            lease,
            slot.clone(),
        );

        let settled = self.run_slot(message, &canonical, &url_hash, &slot, delivery).await;
        if slot.is_cancelled() {
            // Lost lease or force-abort: no ack, no further writes.
            return Ok(Settle::Leave);
        }
        settled
    }

    /// Gated → Fetching → Persisting, under an owned lease.
    async fn run_slot(
        &self,
        message: &CrawlMessage,
        canonical: &str,
        url_hash: &str,
        slot: &CancellationToken,
        delivery: &Delivery,
    ) -> Result<Settle> {
        // Gated: robots
        if !self.gate.is_allowed(&message.domain, canonical).await? {
            info!(url = %canonical, "disallowed by robots.txt, recording and moving on");
            self.state
                .complete(
                    url_hash,
                    &self.owner_id,
                    CrawlOutcome::Success {
                        raw_location: None,
                        content_hash: None,
                        crawled_at: Utc::now(),
                    },
                )
                .await?;
            return Ok(Settle::Ack);
        }

        // Gated: rate ceiling
        let wait_threshold = Duration::from_millis(self.settings.crawler.gate_wait_threshold_ms);
        loop {
            match self.gate.acquire_slot(&message.domain).await? {
                SlotDecision::Ready => break,
                SlotDecision::WaitFor(wait) if wait <= wait_threshold => {
                    tokio::select! {
                        _ = slot.cancelled() => return Ok(Settle::Leave),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                SlotDecision::WaitFor(wait) => {
                    return self.defer(url_hash, wait, "rate ceiling reached", delivery).await;
                }
            }
        }

        // Fetching
        let fetched = tokio::select! {
            _ = slot.cancelled() => return Ok(Settle::Leave),
            fetched = self.fetcher.fetch(canonical) => fetched,
        };

        let response = match fetched {
            Ok(response) => response,
            Err(e) => {
                let disposition = classify_error(&e);
                return self.resolve_failure(disposition, url_hash, delivery).await;
            }
        };

        match classify_status(response.status, response.retry_after) {
            Disposition::Success => {}
            disposition => return self.resolve_failure(disposition, url_hash, delivery).await,
        }

        // Verify the redirect target was intended to be crawled.
        let final_canonical = urlnorm::normalize(&response.final_url).unwrap_or_else(|_| canonical.to_string());
        let final_domain = urlnorm::registrable_domain(&final_canonical).unwrap_or_default();
        if final_domain != message.domain {
            let reason = format!("cross-domain redirect to {final_domain}");
            self.send_dead_letter(&delivery.body, &reason).await?;
            self.state
                .complete(url_hash, &self.owner_id, CrawlOutcome::PermanentFailure { reason })
                .await?;
            return Ok(Settle::Ack);
        }

        // Persisting
        self.persist_and_emit(message, canonical, url_hash, &response, slot).await
    }

    /// Persist raw + parsed content, emit downstream messages, complete.
    async fn persist_and_emit(
        &self,
        message: &CrawlMessage,
        canonical: &str,
        url_hash: &str,
        response: &FetchResponse,
        slot: &CancellationToken,
    ) -> Result<Settle> {
        let aws = &self.settings.aws;
        let fetched_at = response.fetched_at;

        let content_hash = hex::encode(Sha256::digest(&response.body));
        let prior_hash = self
            .state
            .get(url_hash)
            .await?
            .and_then(|record| record.content_hash);
        let unchanged = prior_hash.as_deref() == Some(content_hash.as_str());

        if slot.is_cancelled() {
            return Ok(Settle::Leave);
        }

        let raw_key = paths::raw_html(&message.domain, fetched_at, url_hash);
        let meta_key = paths::raw_meta(&message.domain, fetched_at, url_hash);
        let sidecar = serde_json::json!({
            "url": canonical,
            "final_url": response.final_url,
            "status": response.status,
            "content_type": response.content_type,
            "truncated": response.truncated,
            "headers": response.headers,
            "fetched_at": fetched_at,
        });
        self.store
            .put(&aws.raw_bucket, &raw_key, response.body.clone(), "text/html")
            .await?;
        self.store
            .put(&aws.raw_bucket, &meta_key, serde_json::to_vec(&sidecar)?, "application/json")
            .await?;

        if unchanged {
            debug!(url = %canonical, "content unchanged, suppressing reindex");
        } else {
            let html = String::from_utf8_lossy(&response.body).into_owned();
            let extracted = extract::extract_content(&html);

            let text_key = paths::parsed_text(&message.domain, fetched_at, url_hash);
            let parsed_meta_key = paths::parsed_meta(&message.domain, fetched_at, url_hash);
            let parsed_meta = serde_json::json!({
                "url": canonical,
                "title": extracted.title,
                "lang": extracted.lang,
                "content_length": extracted.text.len(),
                "fetched_at": fetched_at,
            });
            self.store
                .put(&aws.parsed_bucket, &text_key, extracted.text.clone().into_bytes(), "text/plain")
                .await?;
            self.store
                .put(
                    &aws.parsed_bucket,
                    &parsed_meta_key,
                    serde_json::to_vec(&parsed_meta)?,
                    "application/json",
                )
                .await?;

            let index_message = IndexMessage {
                v: SCHEMA_VERSION,
                url: canonical.to_string(),
                url_hash: url_hash.to_string(),
                domain: message.domain.clone(),
                raw_location: RawLocation::new(&aws.raw_bucket, &raw_key),
                parsed_location: Some(RawLocation::new(&aws.parsed_bucket, &text_key)),
                detected_lang: extracted.lang,
                fetched_at,
            };
            queue::send_message(self.queue.as_ref(), &self.settings.queues.index_queue, &index_message)
                .await?;

            // Outlink discovery is best effort; a failure here must not
            // fail an otherwise successful crawl.
            if let Err(e) = self.emit_outlinks(message, canonical, &html).await {
                warn!(url = %canonical, error = %e, "outlink emission failed");
            }
        }

        self.state
            .complete(
                url_hash,
                &self.owner_id,
                CrawlOutcome::Success {
                    raw_location: Some(RawLocation::new(&aws.raw_bucket, &raw_key)),
                    content_hash: Some(content_hash),
                    crawled_at: fetched_at,
                },
            )
            .await?;

        Ok(Settle::Ack)
    }

    /// Route outlinks: same-domain straight to the crawl queue behind the
    /// state-store dedup, foreign domains through discovery (coalesced,
    /// one message per domain per page).
    async fn emit_outlinks(&self, message: &CrawlMessage, canonical: &str, html: &str) -> Result<()> {
        let links = extract_outlinks(canonical, html, self.settings.crawler.max_links_per_page)?;
        let partition = partition_outlinks(&message.domain, &links);

        let mut crawl_messages = Vec::new();
        for url in partition.same_domain {
            if url == canonical {
                continue;
            }
            let url_hash = urlnorm::url_hash(&url);
            if self.state.insert_pending(&url, &message.domain, &url_hash).await?
                == crate::state::InsertOutcome::Inserted
            {
                crawl_messages.push(CrawlMessage::new(url, message.domain.clone(), url_hash));
            }
        }
        if !crawl_messages.is_empty() {
            debug!(url = %canonical, count = crawl_messages.len(), "enqueueing same-domain outlinks");
            queue::send_message_batch(self.queue.as_ref(), &self.settings.queues.crawl_queue, &crawl_messages)
                .await?;
        }

        for domain in partition.cross_domain {
            let discovery = DiscoveryMessage::new(domain, "outlink");
            queue::send_message(self.queue.as_ref(), &self.settings.queues.discovery_queue, &discovery)
                .await?;
        }

        Ok(())
    }

    /// Resolve a classified fetch failure into a state transition + settle.
    async fn resolve_failure(
        &self,
        disposition: Disposition,
        url_hash: &str,
        delivery: &Delivery,
    ) -> Result<Settle> {
        match disposition {
            Disposition::Success => unreachable!("success is not a failure disposition"),
            Disposition::Permanent(reason) => {
                info!(url_hash, %reason, "permanent failure");
                self.state
                    .complete(url_hash, &self.owner_id, CrawlOutcome::PermanentFailure { reason })
                    .await?;
                Ok(Settle::Ack)
            }
            Disposition::Retryable { delay_hint, reason } => {
                let attempt = delivery.receive_count.saturating_sub(1);
                let delay = delay_hint.unwrap_or_else(|| self.settings.backoff().delay(attempt));
                self.defer(url_hash, delay, &reason, delivery).await
            }
        }
    }

    /// Record a retryable failure; exhausted budgets dead-letter.
    async fn defer(&self, url_hash: &str, delay: Duration, reason: &str, delivery: &Delivery) -> Result<Settle> {
        match self.state.schedule_retry(url_hash, &self.owner_id, delay, reason).await? {
            RetryOutcome::Deferred => {
                info!(url_hash, delay_secs = delay.as_secs_f64(), %reason, "retry scheduled");
                Ok(Settle::Nack(delay))
            }
            RetryOutcome::Exhausted => {
                warn!(url_hash, %reason, "retry budget exhausted, dead-lettering");
                self.send_dead_letter(&delivery.body, &format!("retries exhausted: {reason}"))
                    .await?;
                Ok(Settle::Ack)
            }
        }
    }

    async fn send_dead_letter(&self, original: &str, reason: &str) -> Result<()> {
        self.queue
            .send(
                &self.settings.queues.dead_letter_queue,
                queue::dead_letter_body(original, reason),
            )
            .await
    }
}
