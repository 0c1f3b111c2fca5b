// src/worker.rs

//! The indexer worker: consumes index messages, generates embeddings,
//! and bulk-upserts documents into the search index.
//!
//! The worker never takes the URL lock; the crawler finished the record's
//! lifecycle before emitting the message. Idempotency comes from the
//! upsert key: parent documents use `url_hash`, chunks
//! `{url_hash}#{chunk_idx}`.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crawler::models::IndexMessage;
use crawler::queue::{self, Delivery, WorkQueue};
use crawler::storage::ObjectStore;

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::chunker::Chunker;
use crate::config::IndexerConfig;
use crate::documents::IndexDoc;
use crate::embed::EmbeddingClient;
use crate::error::{AppError, Result};
use crate::search::{verify_mapping, SearchIndex};

pub struct IndexerWorker {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn ObjectStore>,
    search: Arc<dyn SearchIndex>,
    /// `None` when embeddings are disabled; documents omit the vector field
    embedder: Option<Arc<dyn EmbeddingClient>>,
    chunker: Chunker,
    breaker: CircuitBreaker,
    config: Arc<IndexerConfig>,
    shutdown: CancellationToken,
}

impl IndexerWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn ObjectStore>,
        search: Arc<dyn SearchIndex>,
        embedder: Option<Arc<dyn EmbeddingClient>>,
        config: Arc<IndexerConfig>,
    ) -> Self {
        let chunker = Chunker::new(&config.chunking);
        let breaker = CircuitBreaker::new(crate::breaker::BreakerConfig {
            threshold: config.worker.breaker_threshold,
            cooldown: Duration::from_secs(config.worker.breaker_cooldown_secs),
        });
        Self {
            queue,
            store,
            search,
            embedder,
            chunker,
            breaker,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Negotiate the embedding dimension and verify the index mapping.
    ///
    /// Must succeed before any document is written; a mismatch against a
    /// non-empty index aborts startup.
    pub async fn startup(&self) -> Result<()> {
        match &self.embedder {
            Some(embedder) => {
                let dims = embedder.dimension().await?;
                info!(model = embedder.model(), dims, "negotiated embedding dimension");
                verify_mapping(self.search.as_ref(), embedder.model(), Some(dims)).await
            }
            None => {
                info!("embeddings disabled, documents will omit the vector field");
                verify_mapping(self.search.as_ref(), "embeddings-disabled", None).await
            }
        }
    }

    /// Main loop: startup verification, then drain the index queue.
    pub async fn run(&self) -> Result<()> {
        self.startup().await?;
        let queue_cfg = &self.config.queue;
        info!(queue = %queue_cfg.index_queue, "indexer worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if let BreakerState::Open { retry_in } = self.breaker.check() {
                debug!(retry_in_secs = retry_in.as_secs_f64(), "circuit open, pausing consumption");
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(retry_in.min(Duration::from_secs(5))) => continue,
                }
            }

            let deliveries = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.queue.receive(
                    &queue_cfg.index_queue,
                    self.config.worker.concurrency,
                    Duration::from_secs(queue_cfg.receive_wait_secs),
                    Duration::from_secs(queue_cfg.visibility_secs),
                ) => received.map_err(AppError::from)?,
            };

            stream::iter(deliveries)
                .for_each_concurrent(self.config.worker.concurrency, |delivery| async move {
                    self.process_delivery(delivery).await;
                })
                .await;
        }

        info!("indexer worker stopped");
        Ok(())
    }

    /// Handle one delivery end to end, settling the message afterwards.
    pub async fn process_delivery(&self, delivery: Delivery) {
        let queue_cfg = &self.config.queue;

        let message: IndexMessage = match queue::decode(&delivery) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "malformed index message, dead-lettering");
                let _ = self
                    .dead_letter(&delivery.body, &format!("malformed index message: {e}"))
                    .await;
                let _ = self.queue.ack(&queue_cfg.index_queue, &delivery.receipt).await;
                return;
            }
        };

        match self.process_message(&message).await {
            Ok(()) => {
                self.breaker.record_success();
                if let Err(e) = self.queue.ack(&queue_cfg.index_queue, &delivery.receipt).await {
                    warn!(url = %message.url, error = %e, "ack failed; upsert is idempotent under redelivery");
                }
            }
            Err(e) if !e.is_retryable() => {
                warn!(url = %message.url, error = %e, "permanent indexing failure, dead-lettering");
                let _ = self.dead_letter(&delivery.body, &e.to_string()).await;
                let _ = self.queue.ack(&queue_cfg.index_queue, &delivery.receipt).await;
            }
            Err(e) => {
                self.breaker.record_failure();
                if delivery.receive_count >= queue_cfg.max_receive_count {
                    warn!(url = %message.url, error = %e, "retries exhausted, dead-lettering");
                    let _ = self
                        .dead_letter(&delivery.body, &format!("retries exhausted: {e}"))
                        .await;
                    let _ = self.queue.ack(&queue_cfg.index_queue, &delivery.receipt).await;
                } else {
                    let attempt = delivery.receive_count.saturating_sub(1);
                    let delay = e.retry_hint().unwrap_or_else(|| self.config.backoff().delay(attempt));
                    debug!(url = %message.url, delay_secs = delay.as_secs_f64(), error = %e, "transient failure, returning to visibility");
                    let _ = self.queue.nack(&queue_cfg.index_queue, &delivery.receipt, delay).await;
                }
            }
        }
    }

    /// Load, chunk, embed, and upsert one crawled page.
    pub async fn process_message(&self, message: &IndexMessage) -> Result<()> {
        let Some((body_text, title, extracted_lang)) = self.load_content(message).await? else {
            debug!(url = %message.url, "no stored content to index");
            return Ok(());
        };
        if body_text.trim().is_empty() {
            debug!(url = %message.url, "empty content, nothing to index");
            return Ok(());
        }

        let lang = message.detected_lang.clone().or(extracted_lang);
        let parent = IndexDoc::parent(
            &message.url_hash,
            &message.url,
            &message.domain,
            body_text.clone(),
            message.fetched_at,
        )
        .with_title(title)
        .with_lang(lang);

        let chunks = self.chunker.chunk(&body_text);
        let mut docs = Vec::with_capacity(1 + chunks.len());
        if chunks.len() > 1 {
            for chunk in &chunks {
                docs.push(IndexDoc::chunk_of(&parent, chunk.chunk_index, chunk.content.clone()));
            }
        }
        docs.insert(0, parent);

        if let Some(embedder) = &self.embedder {
            let texts: Vec<String> = docs.iter().map(|doc| doc.body.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            for (doc, vector) in docs.iter_mut().zip(vectors) {
                doc.embedding = Some(vector);
            }
        }

        let report = self.search.bulk_upsert(&docs).await?;
        if !report.failed.is_empty() {
            return Err(AppError::search(format!(
                "{} of {} documents rejected after per-record retry",
                report.failed.len(),
                docs.len()
            )));
        }

        info!(url = %message.url, documents = docs.len(), "indexed");
        Ok(())
    }

    /// Load text plus title/language: the parsed objects when present,
    /// otherwise extract from the raw body.
    async fn load_content(&self, message: &IndexMessage) -> Result<Option<(String, Option<String>, Option<String>)>> {
        if let Some(parsed) = &message.parsed_location {
            if let Some(bytes) = self.store.get(&parsed.bucket, &parsed.key).await? {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                let title = self.load_parsed_title(parsed).await?;
                return Ok(Some((text, title, None)));
            }
        }

        let raw = &message.raw_location;
        let Some(bytes) = self.store.get(&raw.bucket, &raw.key).await? else {
            return Ok(None);
        };
        let html = String::from_utf8_lossy(&bytes).into_owned();
        let extracted = crawler::extract::extract_content(&html);
        Ok(Some((extracted.text, extracted.title, extracted.lang)))
    }

    /// The `.txt` object has a `.json` metadata sidecar beside it.
    async fn load_parsed_title(&self, parsed: &crawler::models::RawLocation) -> Result<Option<String>> {
        let Some(meta_key) = parsed.key.strip_suffix(".txt").map(|stem| format!("{stem}.json")) else {
            return Ok(None);
        };
        let Some(bytes) = self.store.get(&parsed.bucket, &meta_key).await? else {
            return Ok(None);
        };
        let meta: serde_json::Value = serde_json::from_slice(&bytes)?;
        Ok(meta["title"].as_str().map(str::to_string))
    }

    async fn dead_letter(&self, original: &str, reason: &str) -> Result<()> {
        self.queue
            .send(
                &self.config.queue.dead_letter_queue,
                queue::dead_letter_body(original, reason),
            )
            .await
            .map_err(AppError::from)
    }
}
