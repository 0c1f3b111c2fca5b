// src/documents.rs

//! Search-index document shapes.
//!
//! One parent document per URL, keyed by `url_hash` so re-processing the
//! same crawl upserts instead of duplicating. Chunk documents share the
//! parent's `url_hash` as a reference and add `chunk_idx`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document ready for ingest, with its index id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDoc {
    /// Index document id: `url_hash` or `{url_hash}#{chunk_idx}`
    #[serde(skip)]
    pub id: String,

    pub url_hash: String,
    pub url: String,
    pub domain: String,
    /// Site grouping key (currently the registrable domain)
    pub site: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    pub popularity_score: f32,
    /// Absent on parent documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_idx: Option<u32>,
    /// Omitted entirely when embeddings are disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl IndexDoc {
    /// Parent document for a crawled page.
    pub fn parent(
        url_hash: impl Into<String>,
        url: impl Into<String>,
        domain: impl Into<String>,
        body: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let url_hash = url_hash.into();
        let domain = domain.into();
        Self {
            id: url_hash.clone(),
            url_hash,
            url: url.into(),
            site: domain.clone(),
            domain,
            lang: None,
            title: None,
            body: body.into(),
            fetched_at,
            popularity_score: 0.0,
            chunk_idx: None,
            embedding: None,
        }
    }

    /// Chunk document derived from a parent.
    pub fn chunk_of(parent: &IndexDoc, chunk_idx: u32, body: impl Into<String>) -> Self {
        Self {
            id: format!("{}#{}", parent.url_hash, chunk_idx),
            url_hash: parent.url_hash.clone(),
            url: parent.url.clone(),
            domain: parent.domain.clone(),
            site: parent.site.clone(),
            lang: parent.lang.clone(),
            title: parent.title.clone(),
            body: body.into(),
            fetched_at: parent.fetched_at,
            popularity_score: parent.popularity_score,
            chunk_idx: Some(chunk_idx),
            embedding: None,
        }
    }

    pub fn with_lang(mut self, lang: Option<String>) -> Self {
        self.lang = lang;
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ids_derive_from_parent() {
        let parent = IndexDoc::parent("abcd", "https://example.test/a", "example.test", "body", Utc::now());
        let chunk = IndexDoc::chunk_of(&parent, 2, "slice");

        assert_eq!(parent.id, "abcd");
        assert_eq!(chunk.id, "abcd#2");
        assert_eq!(chunk.url_hash, "abcd");
        assert_eq!(chunk.chunk_idx, Some(2));
    }

    #[test]
    fn test_serialization_omits_empty_vector_field() {
        let parent = IndexDoc::parent("abcd", "https://example.test/a", "example.test", "body", Utc::now());
        let json = serde_json::to_string(&parent).unwrap();
        assert!(!json.contains("embedding"));
        assert!(!json.contains("chunk_idx"));
        assert!(!json.contains("\"id\""));
    }
}
