// src/search/memory.rs

//! In-memory search index for tests and single-node local runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{BulkReport, MappingState, SearchIndex};
use crate::documents::IndexDoc;
use crate::error::{AppError, Result};

struct Inner {
    mapping: MappingState,
    docs: HashMap<String, Value>,
}

pub struct InMemorySearchIndex {
    inner: Mutex<Inner>,
}

impl InMemorySearchIndex {
    /// Start with no index, as a fresh cluster would.
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(Inner {
                mapping: MappingState::Missing,
                docs: HashMap::new(),
            }),
        }
    }

    /// Start with an existing mapping and optionally pre-seeded documents.
    pub fn with_mapping(mapping: MappingState, seeded_docs: usize) -> Self {
        let mut docs = HashMap::new();
        for i in 0..seeded_docs {
            docs.insert(format!("seed-{i}"), Value::Null);
        }
        Self {
            inner: Mutex::new(Inner { mapping, docs }),
        }
    }

    pub fn doc(&self, id: &str) -> Option<Value> {
        self.inner.lock().expect("index mutex poisoned").docs.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .lock()
            .expect("index mutex poisoned")
            .docs
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn mapping(&self) -> MappingState {
        self.inner.lock().expect("index mutex poisoned").mapping
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn mapping_state(&self) -> Result<MappingState> {
        Ok(self.mapping())
    }

    async fn doc_count(&self) -> Result<u64> {
        Ok(self.inner.lock().expect("index mutex poisoned").docs.len() as u64)
    }

    async fn create_index(&self, dims: Option<usize>) -> Result<()> {
        let mut inner = self.inner.lock().expect("index mutex poisoned");
        inner.mapping = match dims {
            Some(dims) => MappingState::Vector(dims),
            None => MappingState::NoVector,
        };
        Ok(())
    }

    async fn delete_index(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("index mutex poisoned");
        inner.mapping = MappingState::Missing;
        inner.docs.clear();
        Ok(())
    }

    async fn bulk_upsert(&self, docs: &[IndexDoc]) -> Result<BulkReport> {
        let mut inner = self.inner.lock().expect("index mutex poisoned");
        if inner.mapping == MappingState::Missing {
            return Err(AppError::search("index does not exist"));
        }

        // Reject vectors that disagree with the mapping, as the real
        // index would.
        if let MappingState::Vector(dims) = inner.mapping {
            for doc in docs {
                if let Some(embedding) = &doc.embedding {
                    if embedding.len() != dims {
                        return Err(AppError::search(format!(
                            "vector length {} does not match mapping dimension {dims}",
                            embedding.len()
                        )));
                    }
                }
            }
        }

        for doc in docs {
            inner.docs.insert(doc.id.clone(), serde_json::to_value(doc)?);
        }
        Ok(BulkReport {
            succeeded: docs.len(),
            failed: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_upsert_is_keyed_by_id() {
        let index = InMemorySearchIndex::empty();
        index.create_index(None).await.unwrap();

        let doc = IndexDoc::parent("h1", "https://example.test/a", "example.test", "v1", Utc::now());
        index.bulk_upsert(&[doc.clone()]).await.unwrap();
        let mut updated = doc;
        updated.body = "v2".into();
        index.bulk_upsert(&[updated]).await.unwrap();

        assert_eq!(index.doc_count().await.unwrap(), 1);
        assert_eq!(index.doc("h1").unwrap()["body"], "v2");
    }

    #[tokio::test]
    async fn test_mismatched_vector_rejected() {
        let index = InMemorySearchIndex::empty();
        index.create_index(Some(4)).await.unwrap();

        let mut doc = IndexDoc::parent("h1", "https://example.test/a", "example.test", "b", Utc::now());
        doc.embedding = Some(vec![0.0; 8]);
        assert!(index.bulk_upsert(&[doc]).await.is_err());
    }
}
