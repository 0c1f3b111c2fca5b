// src/queue/sqs.rs

//! SQS queue adapter.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName, SendMessageBatchRequestEntry};
use aws_sdk_sqs::Client;
use tracing::debug;

use super::{Delivery, WorkQueue};
use crate::error::{AppError, Result};

/// SQS batch API limit.
const MAX_BATCH: usize = 10;

#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
}

impl SqsQueue {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkQueue for SqsQueue {
    async fn send(&self, queue: &str, body: String) -> Result<()> {
        self.client
            .send_message()
            .queue_url(queue)
            .message_body(body)
            .send()
            .await
            .map_err(|e| AppError::queue(e.to_string()))?;
        Ok(())
    }

    async fn send_batch(&self, queue: &str, bodies: Vec<String>) -> Result<()> {
        for chunk in bodies.chunks(MAX_BATCH) {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(i, body)| {
                    SendMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .message_body(body.clone())
                        .build()
                        .map_err(|e| AppError::queue(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            let output = self
                .client
                .send_message_batch()
                .queue_url(queue)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| AppError::queue(e.to_string()))?;

            if !output.failed().is_empty() {
                return Err(AppError::queue(format!(
                    "{} of {} batch entries rejected",
                    output.failed().len(),
                    chunk.len()
                )));
            }
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<Delivery>> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue)
            .max_number_of_messages(max.min(MAX_BATCH) as i32)
            .wait_time_seconds(wait.as_secs() as i32)
            .visibility_timeout(visibility.as_secs() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| AppError::queue(e.to_string()))?;

        let deliveries = output
            .messages()
            .iter()
            .filter_map(|message| {
                let body = message.body()?.to_string();
                let receipt = message.receipt_handle()?.to_string();
                let receive_count = message
                    .attributes()
                    .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                    .and_then(|count| count.parse().ok())
                    .unwrap_or(1);
                Some(Delivery {
                    body,
                    receipt,
                    receive_count,
                })
            })
            .collect::<Vec<_>>();

        debug!(queue, count = deliveries.len(), "received messages");
        Ok(deliveries)
    }

    async fn ack(&self, queue: &str, receipt: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(queue)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| AppError::queue(e.to_string()))?;
        Ok(())
    }

    async fn nack(&self, queue: &str, receipt: &str, delay: Duration) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(queue)
            .receipt_handle(receipt)
            .visibility_timeout(delay.as_secs() as i32)
            .send()
            .await
            .map_err(|e| AppError::queue(e.to_string()))?;
        Ok(())
    }

    async fn approximate_depth(&self, queue: &str) -> Result<usize> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| AppError::queue(e.to_string()))?;

        Ok(output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|depth| depth.parse().ok())
            .unwrap_or(0))
    }
}
