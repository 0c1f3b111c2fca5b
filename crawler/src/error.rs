// src/error.rs

//! Unified error handling for the crawl pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// State-table error (transient; conditional-write failures are
    /// surfaced as outcomes, not errors)
    #[error("state store error: {0}")]
    StateStore(String),

    /// The caller's lease was reclaimed while a write was in flight.
    /// Callers must abort the slot and must not acknowledge the message.
    #[error("lease lost for {url_hash}")]
    LeaseLost { url_hash: String },

    /// Queue service error
    #[error("queue error: {0}")]
    Queue(String),

    /// Object storage error
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// Counter-store error
    #[error("counter store error: {0}")]
    Counter(#[from] redis::RedisError),

    /// HTTP request failed
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

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// URL rejected by the normalizer (non-HTTP scheme, empty host, ...)
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// CSS selector parsing failed
    #[error("invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Create a state-store error from any displayable source.
    pub fn state_store(message: impl fmt::Display) -> Self {
        Self::StateStore(message.to_string())
    }

    /// Create a lease-lost error.
    pub fn lease_lost(url_hash: impl Into<String>) -> Self {
        Self::LeaseLost {
            url_hash: url_hash.into(),
        }
    }

    /// Create a queue error.
    pub fn queue(message: impl fmt::Display) -> Self {
        Self::Queue(message.to_string())
    }

    /// Create an object-store error.
    pub fn object_store(message: impl fmt::Display) -> Self {
        Self::ObjectStore(message.to_string())
    }

    /// Create an invalid-URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error means the slot's lock is gone.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, Self::LeaseLost { .. })
    }
}
