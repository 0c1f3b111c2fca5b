// src/error.rs

//! Unified error handling for the indexer.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Crawl-side library error (queues, object store, extraction)
    #[error(transparent)]
    Pipeline(#[from] crawler::AppError),

    /// Search index rejected the operation
    #[error("search index error: {0}")]
    Search(String),

    /// The live mapping disagrees with the configured model's dimension
    /// and the index already holds documents.
    #[error(
        "embedding dimension mismatch: index mapping has {mapped}, model '{model}' produces {model_dims}; \
         refusing to start against a non-empty index"
    )]
    DimensionMismatch {
        mapped: usize,
        model: String,
        model_dims: usize,
    },

    /// Embedding service throttled us; honor the hint before retrying
    #[error("embedding service rate limited")]
    EmbeddingRateLimited { retry_after: Option<Duration> },

    /// Embedding service rejected the input (permanent)
    #[error("embedding input rejected: {0}")]
    EmbeddingInvalidInput(String),

    /// Embedding service failed (retryable)
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Create a search-index error.
    pub fn search(message: impl fmt::Display) -> Self {
        Self::Search(message.to_string())
    }

    /// Create an embedding-service error.
    pub fn embedding(message: impl fmt::Display) -> Self {
        Self::EmbeddingService(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether the failed operation should be retried after a delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EmbeddingRateLimited { .. } | Self::EmbeddingService(_) | Self::Search(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.status().is_none_or(|s| s.is_server_error()),
            Self::Pipeline(e) => matches!(
                e,
                crawler::AppError::Queue(_) | crawler::AppError::ObjectStore(_) | crawler::AppError::Http(_)
            ),
            _ => false,
        }
    }

    /// Server-provided retry hint, when one exists.
    pub fn retry_hint(&self) -> Option<Duration> {
        match self {
            Self::EmbeddingRateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
