// src/discovery/mod.rs

//! URL discovery: sitemap enumeration and crawl-queue seeding.

mod coordinator;
mod sitemap;

pub use coordinator::{DiscoveryCoordinator, DiscoveryDisposition};
pub use sitemap::SitemapWalker;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::gate::SitemapAnnouncement;
use crate::models::DiscoveryMessage;
use crate::queue::{self, WorkQueue};

/// Forward sitemap discoveries made by crawl workers (first robots fetch
/// of a new domain) into the discovery queue.
pub fn forward_announcements(
    mut rx: UnboundedReceiver<SitemapAnnouncement>,
    queue: Arc<dyn WorkQueue>,
    discovery_queue: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(announcement) = rx.recv().await {
            let message = DiscoveryMessage::new(&announcement.domain, "sitemap");
            if let Err(e) = queue::send_message(queue.as_ref(), &discovery_queue, &message).await {
                warn!(domain = %announcement.domain, error = %e, "failed to forward sitemap discovery");
            }
        }
    })
}
