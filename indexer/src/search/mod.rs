// src/search/mod.rs

//! Search-index adapter: mapping management and bulk upsert.

pub mod memory;
pub mod opensearch;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::documents::IndexDoc;
use crate::error::{AppError, Result};

/// What the live index mapping says about the dense-vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingState {
    /// The index does not exist yet.
    Missing,
    /// The index exists without a dense-vector field.
    NoVector,
    /// The index maps `embedding` at this dimension.
    Vector(usize),
}

/// Outcome of a bulk upsert.
#[derive(Debug, Clone, Default)]
pub struct BulkReport {
    pub succeeded: usize,
    /// Ids that failed even after per-record retry
    pub failed: Vec<String>,
}

/// Index operations the worker depends on.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn mapping_state(&self) -> Result<MappingState>;

    async fn doc_count(&self) -> Result<u64>;

    /// Create the index; `dims` controls the dense-vector field.
    async fn create_index(&self, dims: Option<usize>) -> Result<()>;

    async fn delete_index(&self) -> Result<()>;

    /// Upsert documents, retrying partial failures per record.
    async fn bulk_upsert(&self, docs: &[IndexDoc]) -> Result<BulkReport>;
}

/// Boot-time dimension agreement between model and mapping.
///
/// - no index → create it (with the vector field when embedding)
/// - mapping agrees → proceed
/// - mapping disagrees, index empty → recreate
/// - mapping disagrees, index holds documents → refuse to start
pub async fn verify_mapping(
    index: &dyn SearchIndex,
    model: &str,
    model_dims: Option<usize>,
) -> Result<()> {
    match (index.mapping_state().await?, model_dims) {
        (MappingState::Missing, dims) => {
            info!(?dims, "index missing, creating mapping");
            index.create_index(dims).await
        }
        (MappingState::Vector(mapped), Some(dims)) if mapped == dims => {
            info!(dims, "index mapping agrees with model dimension");
            Ok(())
        }
        (MappingState::NoVector, None) => Ok(()),
        (MappingState::Vector(_), None) => {
            // Embeddings disabled against a vector-mapped index: documents
            // simply omit the field.
            Ok(())
        }
        (state, Some(dims)) => {
            let mapped = match state {
                MappingState::Vector(mapped) => mapped,
                _ => 0,
            };
            if index.doc_count().await? == 0 {
                warn!(mapped, dims, "empty index has stale mapping, recreating");
                index.delete_index().await?;
                index.create_index(Some(dims)).await
            } else {
                Err(AppError::DimensionMismatch {
                    mapped,
                    model: model.to_string(),
                    model_dims: dims,
                })
            }
        }
    }
}
