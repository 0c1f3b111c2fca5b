//! Indexer worker: turns crawled pages into search-index documents.
//!
//! # Architecture
//!
//! - `chunker`: Overlapping text windows under the embedding budget
//! - `embed`: Embedding service client with dimension negotiation
//! - `search`: Search-index adapter (mapping management, bulk upsert)
//! - `documents`: Index document shapes
//! - `breaker`: Downstream-outage circuit breaker
//! - `worker`: The index queue consumer
//! - `error`: Unified error handling

pub mod breaker;
pub mod chunker;
pub mod config;
pub mod documents;
pub mod embed;
pub mod error;
pub mod search;
pub mod worker;

pub use error::{AppError, Result};
