// tests/indexer_flow.rs

//! Indexer worker scenarios: dimension negotiation, idempotent ingest,
//! chunking, and the embeddings-disabled path.

use std::sync::Arc;

use chrono::Utc;

use crawler::models::{IndexMessage, RawLocation, SCHEMA_VERSION};
use crawler::queue::{memory::InMemoryQueue, WorkQueue};
use crawler::storage::{memory::InMemoryStore, ObjectStore};

use indexer::config::IndexerConfig;
use indexer::embed::{EmbeddingClient, FixedEmbedder};
use indexer::error::AppError;
use indexer::search::memory::InMemorySearchIndex;
use indexer::search::{MappingState, SearchIndex};
use indexer::worker::IndexerWorker;

const PARSED_KEY: &str = "example.test/2026/01/01/feedbeef.txt";
const RAW_KEY: &str = "example.test/2026/01/01/feedbeef.html";

fn config() -> Arc<IndexerConfig> {
    let mut config = IndexerConfig::default();
    config.queue.index_queue = "index".into();
    config.queue.dead_letter_queue = "dlq".into();
    config.chunking.max_chunk_chars = 80;
    config.chunking.overlap_chars = 10;
    Arc::new(config)
}

fn message() -> IndexMessage {
    IndexMessage {
        v: SCHEMA_VERSION,
        url: "https://example.test/a".into(),
        url_hash: "feedbeef".into(),
        domain: "example.test".into(),
        raw_location: RawLocation::new("crawl-raw", RAW_KEY),
        parsed_location: Some(RawLocation::new("crawl-parsed", PARSED_KEY)),
        detected_lang: Some("en".into()),
        fetched_at: Utc::now(),
    }
}

struct Harness {
    worker: IndexerWorker,
    search: Arc<InMemorySearchIndex>,
    store: Arc<InMemoryStore>,
}

fn harness(search: InMemorySearchIndex, embedder: Option<Arc<dyn EmbeddingClient>>) -> Harness {
    let search = Arc::new(search);
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(InMemoryQueue::new(5));

    let worker = IndexerWorker::new(
        queue as Arc<dyn WorkQueue>,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&search) as Arc<dyn SearchIndex>,
        embedder,
        config(),
    );

    Harness { worker, search, store }
}

async fn seed_parsed(store: &InMemoryStore, text: &str, title: &str) {
    store
        .put("crawl-parsed", PARSED_KEY, text.as_bytes().to_vec(), "text/plain")
        .await
        .unwrap();
    let meta = serde_json::json!({ "title": title, "lang": "en" });
    store
        .put(
            "crawl-parsed",
            "example.test/2026/01/01/feedbeef.json",
            serde_json::to_vec(&meta).unwrap(),
            "application/json",
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_startup_creates_missing_index_with_model_dims() {
    let h = harness(InMemorySearchIndex::empty(), Some(Arc::new(FixedEmbedder::new(16))));
    h.worker.startup().await.unwrap();
    assert_eq!(h.search.mapping(), MappingState::Vector(16));
}

#[tokio::test]
async fn test_startup_recreates_empty_index_on_mismatch() {
    let h = harness(
        InMemorySearchIndex::with_mapping(MappingState::Vector(1024), 0),
        Some(Arc::new(FixedEmbedder::new(16))),
    );
    h.worker.startup().await.unwrap();
    assert_eq!(h.search.mapping(), MappingState::Vector(16));
}

#[tokio::test]
async fn test_startup_refuses_mismatch_against_populated_index() {
    let h = harness(
        InMemorySearchIndex::with_mapping(MappingState::Vector(1024), 7),
        Some(Arc::new(FixedEmbedder::new(1536))),
    );

    let error = h.worker.startup().await.unwrap_err();
    match &error {
        AppError::DimensionMismatch { mapped, model_dims, .. } => {
            assert_eq!(*mapped, 1024);
            assert_eq!(*model_dims, 1536);
        }
        other => panic!("expected DimensionMismatch, got {other}"),
    }
    // The message names both dimensions for the operator.
    let text = error.to_string();
    assert!(text.contains("1024") && text.contains("1536"));

    // No partial writes: only the pre-existing documents remain.
    assert_eq!(h.search.ids().len(), 7);
    assert_eq!(h.search.mapping(), MappingState::Vector(1024));
}

#[tokio::test]
async fn test_reprocessing_upserts_single_parent_document() {
    let h = harness(InMemorySearchIndex::empty(), Some(Arc::new(FixedEmbedder::new(8))));
    h.worker.startup().await.unwrap();
    seed_parsed(&h.store, "A short page body.", "Short").await;

    h.worker.process_message(&message()).await.unwrap();
    let first_ids = h.search.ids();

    // Simulated redelivery.
    h.worker.process_message(&message()).await.unwrap();

    assert_eq!(h.search.ids(), first_ids);
    assert_eq!(h.search.doc_count().await.unwrap(), 1);
    let doc = h.search.doc("feedbeef").unwrap();
    assert_eq!(doc["title"], "Short");
    assert_eq!(doc["embedding"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn test_long_document_gets_chunk_records() {
    let h = harness(InMemorySearchIndex::empty(), Some(Arc::new(FixedEmbedder::new(8))));
    h.worker.startup().await.unwrap();

    let long_text = "Every sentence adds body text. ".repeat(20);
    seed_parsed(&h.store, &long_text, "Long").await;

    h.worker.process_message(&message()).await.unwrap();

    let ids = h.search.ids();
    assert!(ids.contains(&"feedbeef".to_string()));
    assert!(ids.contains(&"feedbeef#0".to_string()));
    assert!(ids.len() > 2, "expected parent plus chunks, got {ids:?}");

    // Chunks reference the parent and carry their own vectors.
    let chunk = h.search.doc("feedbeef#0").unwrap();
    assert_eq!(chunk["url_hash"], "feedbeef");
    assert_eq!(chunk["chunk_idx"], 0);
    assert_eq!(chunk["embedding"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn test_embeddings_disabled_omits_vector_field() {
    let h = harness(InMemorySearchIndex::empty(), None);
    h.worker.startup().await.unwrap();
    assert_eq!(h.search.mapping(), MappingState::NoVector);

    seed_parsed(&h.store, "Body without vectors.", "Plain").await;
    h.worker.process_message(&message()).await.unwrap();

    let doc = h.search.doc("feedbeef").unwrap();
    assert!(doc.get("embedding").is_none());
    assert_eq!(doc["lang"], "en");
}

#[tokio::test]
async fn test_missing_content_is_not_an_error() {
    let h = harness(InMemorySearchIndex::empty(), Some(Arc::new(FixedEmbedder::new(8))));
    h.worker.startup().await.unwrap();

    // Neither parsed nor raw object exists; nothing to do, no failure.
    h.worker.process_message(&message()).await.unwrap();
    assert_eq!(h.search.doc_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_falls_back_to_raw_extraction() {
    let h = harness(InMemorySearchIndex::empty(), Some(Arc::new(FixedEmbedder::new(8))));
    h.worker.startup().await.unwrap();

    let html = "<html><head><title>Raw Title</title></head><body><p>Recovered from raw bytes.</p></body></html>";
    h.store
        .put("crawl-raw", RAW_KEY, html.as_bytes().to_vec(), "text/html")
        .await
        .unwrap();

    let mut msg = message();
    msg.parsed_location = None;
    h.worker.process_message(&msg).await.unwrap();

    let doc = h.search.doc("feedbeef").unwrap();
    assert_eq!(doc["title"], "Raw Title");
    assert!(doc["body"].as_str().unwrap().contains("Recovered"));
}
