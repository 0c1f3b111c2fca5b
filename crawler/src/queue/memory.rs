// src/queue/memory.rs

//! In-memory queue for tests and single-node local runs.
//!
//! Reproduces the delivery semantics the workers depend on: visibility
//! timeouts, receive counting, and dead-letter routing once the receive
//! budget is spent.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{Delivery, WorkQueue};
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
struct StoredMessage {
    body: String,
    receipt: String,
    invisible_until: Option<Instant>,
    receive_count: u32,
}

/// In-memory queue service; queue names map to independent message lists.
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, Vec<StoredMessage>>>,
    sequence: Mutex<u64>,
    /// After this many receives a message is moved to `<queue>-dlq`
    max_receive_count: u32,
}

impl InMemoryQueue {
    pub fn new(max_receive_count: u32) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            sequence: Mutex::new(0),
            max_receive_count,
        }
    }

    fn next_receipt(&self) -> String {
        let mut sequence = self.sequence.lock().expect("queue mutex poisoned");
        *sequence += 1;
        format!("receipt-{}", *sequence)
    }

    /// Number of messages currently stored, visible or not.
    pub fn len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .expect("queue mutex poisoned")
            .get(queue)
            .map_or(0, |messages| messages.len())
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Drain every body currently stored on a queue (test helper).
    pub fn drain(&self, queue: &str) -> Vec<String> {
        self.queues
            .lock()
            .expect("queue mutex poisoned")
            .remove(queue)
            .map(|messages| messages.into_iter().map(|m| m.body).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn send(&self, queue: &str, body: String) -> Result<()> {
        let receipt = self.next_receipt();
        let mut queues = self.queues.lock().expect("queue mutex poisoned");
        queues.entry(queue.to_string()).or_default().push(StoredMessage {
            body,
            receipt,
            invisible_until: None,
            receive_count: 0,
        });
        Ok(())
    }

    async fn send_batch(&self, queue: &str, bodies: Vec<String>) -> Result<()> {
        for body in bodies {
            self.send(queue, body).await?;
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max: usize,
        _wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<Delivery>> {
        let now = Instant::now();
        let mut queues = self.queues.lock().expect("queue mutex poisoned");

        let mut deliveries = Vec::new();
        let mut dead = Vec::new();
        let mut moved: Vec<StoredMessage> = Vec::new();

        if let Some(messages) = queues.get_mut(queue) {
            for message in messages.iter_mut() {
                if deliveries.len() >= max {
                    break;
                }
                if message.invisible_until.is_some_and(|until| until > now) {
                    continue;
                }

                message.receive_count += 1;
                if message.receive_count > self.max_receive_count {
                    dead.push(message.receipt.clone());
                    continue;
                }

                message.invisible_until = Some(now + visibility);
                message.receipt = self.next_receipt();
                deliveries.push(Delivery {
                    body: message.body.clone(),
                    receipt: message.receipt.clone(),
                    receive_count: message.receive_count,
                });
            }

            if !dead.is_empty() {
                moved = messages
                    .iter()
                    .filter(|m| dead.contains(&m.receipt))
                    .cloned()
                    .collect();
                messages.retain(|m| !dead.contains(&m.receipt));
            }
        }

        // Receive-budget overruns go to the paired dead-letter queue.
        if !moved.is_empty() {
            let dlq = queues.entry(format!("{queue}-dlq")).or_default();
            for mut message in moved {
                message.invisible_until = None;
                message.receive_count = 0;
                dlq.push(message);
            }
        }

        Ok(deliveries)
    }

    async fn ack(&self, queue: &str, receipt: &str) -> Result<()> {
        let mut queues = self.queues.lock().expect("queue mutex poisoned");
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| AppError::queue(format!("unknown queue {queue}")))?;
        messages.retain(|m| m.receipt != receipt);
        Ok(())
    }

    async fn nack(&self, queue: &str, receipt: &str, delay: Duration) -> Result<()> {
        let now = Instant::now();
        let mut queues = self.queues.lock().expect("queue mutex poisoned");
        if let Some(messages) = queues.get_mut(queue) {
            if let Some(message) = messages.iter_mut().find(|m| m.receipt == receipt) {
                message.invisible_until = Some(now + delay);
            }
        }
        Ok(())
    }

    async fn approximate_depth(&self, queue: &str) -> Result<usize> {
        Ok(self.len(queue))
    }
}
