// src/queue/mod.rs

//! Work queues with visibility-based redelivery.
//!
//! Bodies cross the trait as raw JSON strings so the trait stays
//! object-safe; [`send_message`] and [`decode`] add the typed layer.
//! A message stays hidden from other consumers for its visibility timeout
//! after delivery and reappears unless acknowledged — the queue, not the
//! worker, is the liveness backstop.

pub mod memory;
pub mod sqs;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A received message plus the server-side handle needed to settle it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: String,
    /// Receipt handle; valid until the visibility timeout lapses
    pub receipt: String,
    /// How many times this message has been delivered, this one included
    pub receive_count: u32,
}

/// Message queue operations used by all three pipeline stages.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueue one raw body.
    async fn send(&self, queue: &str, body: String) -> Result<()>;

    /// Enqueue a batch; the adapter splits to its native batch limit.
    async fn send_batch(&self, queue: &str, bodies: Vec<String>) -> Result<()>;

    /// Long-poll up to `max` messages, hiding each for `visibility`.
    async fn receive(&self, queue: &str, max: usize, wait: Duration, visibility: Duration)
        -> Result<Vec<Delivery>>;

    /// Acknowledge (delete) a delivered message.
    async fn ack(&self, queue: &str, receipt: &str) -> Result<()>;

    /// Return a message to the queue after `delay` (shrink its visibility).
    async fn nack(&self, queue: &str, receipt: &str, delay: Duration) -> Result<()>;

    /// Approximate number of messages waiting, for backpressure checks.
    async fn approximate_depth(&self, queue: &str) -> Result<usize>;
}

/// Serialize and enqueue a typed message.
pub async fn send_message<T: Serialize>(queue: &dyn WorkQueue, name: &str, message: &T) -> Result<()> {
    queue.send(name, serde_json::to_string(message)?).await
}

/// Serialize and enqueue a typed batch.
pub async fn send_message_batch<T: Serialize>(
    queue: &dyn WorkQueue,
    name: &str,
    messages: &[T],
) -> Result<()> {
    let bodies = messages
        .iter()
        .map(serde_json::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    queue.send_batch(name, bodies).await
}

/// Decode a delivery body into a typed message.
pub fn decode<T: DeserializeOwned>(delivery: &Delivery) -> Result<T> {
    Ok(serde_json::from_str(&delivery.body)?)
}

/// Wrap a poisoned payload for the dead-letter queue with a structured
/// failure reason.
pub fn dead_letter_body(original: &str, reason: &str) -> String {
    serde_json::json!({
        "reason": reason,
        "failed_at": chrono::Utc::now(),
        "original": original,
    })
    .to_string()
}
