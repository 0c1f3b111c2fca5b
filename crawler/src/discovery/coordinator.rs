// src/discovery/coordinator.rs

//! Discovery coordinator: turns a domain into deduplicated crawl work.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::SitemapWalker;
use crate::config::Settings;
use crate::error::Result;
use crate::gate::RobotsCache;
use crate::models::{CrawlMessage, DiscoveryMessage};
use crate::queue::{self, Delivery, WorkQueue};
use crate::state::{InsertOutcome, StateStore};
use crate::urlnorm;

/// How one discovery message was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryDisposition {
    /// Enumeration ran; this many crawl messages were enqueued.
    Completed { enqueued: usize },
    /// Crawl queue over its ceiling; message returned to visibility.
    Backpressured,
}

pub struct DiscoveryCoordinator {
    queue: Arc<dyn WorkQueue>,
    state: Arc<dyn StateStore>,
    robots: Arc<RobotsCache>,
    walker: SitemapWalker,
    settings: Arc<Settings>,
    shutdown: CancellationToken,
}

impl DiscoveryCoordinator {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        state: Arc<dyn StateStore>,
        robots: Arc<RobotsCache>,
        walker: SitemapWalker,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            queue,
            state,
            robots,
            walker,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Main loop: drain the discovery queue until shutdown.
    pub async fn run(&self) -> Result<()> {
        let queues = &self.settings.queues;
        info!(queue = %queues.discovery_queue, "discovery coordinator started");

        loop {
            let deliveries = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.queue.receive(
                    &queues.discovery_queue,
                    10,
                    Duration::from_secs(queues.receive_wait_secs),
                    Duration::from_secs(queues.discovery_visibility_secs),
                ) => received?,
            };

            for delivery in deliveries {
                if let Err(e) = self.handle_delivery(&delivery).await {
                    warn!(error = %e, "discovery message failed; leaving for redelivery");
                }
            }
        }

        info!("discovery coordinator stopped");
        Ok(())
    }

    async fn handle_delivery(&self, delivery: &Delivery) -> Result<()> {
        let queues = &self.settings.queues;

        let message: DiscoveryMessage = match queue::decode(delivery) {
            Ok(message) => message,
            Err(e) => {
                self.queue
                    .send(
                        &queues.dead_letter_queue,
                        queue::dead_letter_body(&delivery.body, &format!("malformed discovery message: {e}")),
                    )
                    .await?;
                return self.queue.ack(&queues.discovery_queue, &delivery.receipt).await;
            }
        };

        match self.process_message(&message).await? {
            DiscoveryDisposition::Completed { enqueued } => {
                info!(domain = %message.domain, source = %message.source, enqueued, "discovery completed");
                self.queue.ack(&queues.discovery_queue, &delivery.receipt).await
            }
            DiscoveryDisposition::Backpressured => {
                info!(domain = %message.domain, "crawl queue over ceiling, deferring discovery");
                self.queue
                    .nack(
                        &queues.discovery_queue,
                        &delivery.receipt,
                        Duration::from_secs(queues.discovery_visibility_secs),
                    )
                    .await
            }
        }
    }

    /// Enumerate one domain and enqueue the URLs that were new.
    pub async fn process_message(&self, message: &DiscoveryMessage) -> Result<DiscoveryDisposition> {
        let domain = &message.domain;
        let policy = self.robots.policy(domain).await?;

        let root = format!("https://{domain}/");
        if !self.robots.is_allowed(domain, &root).await? {
            info!(domain, "domain blocks crawling via robots.txt");
            return Ok(DiscoveryDisposition::Completed { enqueued: 0 });
        }

        // Backpressure check before doing enumeration work.
        let depth = self.queue.approximate_depth(&self.settings.queues.crawl_queue).await?;
        if depth > self.settings.discovery.crawl_queue_ceiling {
            return Ok(DiscoveryDisposition::Backpressured);
        }

        let discovered = self.walker.collect(domain, &policy.sitemaps).await;

        let mut pending = Vec::new();
        for raw_url in discovered {
            let Ok(canonical) = urlnorm::normalize(&raw_url) else {
                continue;
            };
            let Ok(url_domain) = urlnorm::registrable_domain(&canonical) else {
                continue;
            };
            if !self.robots.is_allowed(domain, &canonical).await? {
                continue;
            }

            let url_hash = urlnorm::url_hash(&canonical);
            if self.state.insert_pending(&canonical, &url_domain, &url_hash).await?
                == InsertOutcome::Inserted
            {
                pending.push(CrawlMessage::new(canonical, url_domain, url_hash));
            }
        }

        let enqueued = pending.len();
        if !pending.is_empty() {
            queue::send_message_batch(self.queue.as_ref(), &self.settings.queues.crawl_queue, &pending)
                .await?;
        }

        Ok(DiscoveryDisposition::Completed { enqueued })
    }
}
