// src/storage/memory.rs

//! In-memory object store for tests and single-node local runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::ObjectStore;
use crate::error::Result;

#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently present in a bucket (test helper).
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .expect("store mutex poisoned")
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        self.objects
            .lock()
            .expect("store mutex poisoned")
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .objects
            .lock()
            .expect("store mutex poisoned")
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = InMemoryStore::new();
        store
            .put("raw", "example.test/2026/01/01/h.html", b"<html/>".to_vec(), "text/html")
            .await
            .unwrap();

        let bytes = store.get("raw", "example.test/2026/01/01/h.html").await.unwrap();
        assert_eq!(bytes.as_deref(), Some(b"<html/>".as_slice()));
        assert!(store.get("raw", "missing").await.unwrap().is_none());
    }
}
