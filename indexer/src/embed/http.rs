// src/embed/http.rs

//! HTTP embedding service client.
//!
//! Service contract: `POST {endpoint}/embed` with
//! `{"model": "...", "texts": [...]}` returning
//! `{"embeddings": [[f32; D], ...]}`. 429 carries an optional
//! `Retry-After`; 4xx means the input is bad and will never succeed;
//! 5xx is retryable.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

use super::EmbeddingClient;
use crate::config::EmbeddingSettings;
use crate::error::{AppError, Result};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    batch_size: usize,
    max_input_chars: usize,
    /// Bounds concurrent requests to respect the service's rate limit
    permits: Semaphore,
}

impl HttpEmbeddingClient {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            batch_size: settings.batch_size.max(1),
            max_input_chars: settings.max_input_chars,
            permits: Semaphore::new(settings.concurrency.max(1)),
        })
    }

    /// Truncate at a word boundary near the model's input limit.
    fn truncate(&self, text: &str) -> String {
        if text.chars().count() <= self.max_input_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(self.max_input_chars).collect();
        match cut.rfind(char::is_whitespace) {
            Some(boundary) if boundary > self.max_input_chars * 4 / 5 => cut[..boundary].to_string(),
            _ => cut,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::embedding("embedding semaphore closed"))?;

        let request = EmbedRequest {
            model: &self.model,
            texts,
        };
        let response = self
            .http
            .post(format!("{}/embed", self.endpoint))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AppError::EmbeddingRateLimited { retry_after });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingInvalidInput(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::embedding(format!("{status}: {body}")));
        }

        let parsed: EmbedResponse = response.json().await?;
        if parsed.embeddings.len() != texts.len() {
            // No positional guessing on short responses; retry the batch.
            return Err(AppError::embedding(format!(
                "service returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

#[async_trait::async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let truncated: Vec<String> = texts.iter().map(|t| self.truncate(t)).collect();

        let mut vectors = Vec::with_capacity(truncated.len());
        for batch in truncated.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        debug!(count = vectors.len(), model = %self.model, "embedded texts");
        Ok(vectors)
    }

    async fn dimension(&self) -> Result<usize> {
        let probe = self.embed_batch(&["dimension probe".to_string()]).await?;
        probe
            .first()
            .map(Vec::len)
            .filter(|d| *d > 0)
            .ok_or_else(|| AppError::embedding("dimension probe returned no vector"))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
