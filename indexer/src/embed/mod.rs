// src/embed/mod.rs

//! Embedding generation.
//!
//! The embedding dimension is a property of the configured model, not a
//! constant: it is negotiated at startup by probing the service, and the
//! search-index mapping is verified against it before any document is
//! written.

mod http;

pub use http::HttpEmbeddingClient;

use async_trait::async_trait;

use crate::error::Result;

/// Seam for embedding generation so tests can supply fixed models.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a batch of texts; one vector per input, in order.
    ///
    /// The implementation enforces the model's batch limit; callers may
    /// pass any number of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The model's vector dimension, discovered by probing the service.
    async fn dimension(&self) -> Result<usize>;

    /// Model identifier, for diagnostics and startup errors.
    fn model(&self) -> &str;
}

/// Fixed-dimension embedder producing deterministic vectors. Useful for
/// tests and for running the pipeline without an embedding service.
pub struct FixedEmbedder {
    dims: usize,
    model: String,
}

impl FixedEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            model: format!("fixed-{dims}"),
        }
    }
}

#[async_trait]
impl EmbeddingClient for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                // Deterministic per input so idempotency tests can compare.
                let seed = text.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
                (0..self.dims)
                    .map(|i| ((seed.wrapping_add(i as u32) % 1000) as f32) / 1000.0)
                    .collect()
            })
            .collect())
    }

    async fn dimension(&self) -> Result<usize> {
        Ok(self.dims)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
