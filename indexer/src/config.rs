// src/config.rs

//! Indexer configuration: TOML file with environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub aws: AwsSettings,
    pub queue: QueueSettings,
    pub search: SearchSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    pub region: String,
    pub endpoint: Option<String>,
    pub raw_bucket: String,
    pub parsed_bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub index_queue: String,
    pub dead_letter_queue: String,
    pub visibility_secs: u64,
    pub receive_wait_secs: u64,
    pub max_receive_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub endpoint: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub bulk_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Skip embedding entirely; documents omit the dense-vector field
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    /// Texts per request, bounded by the model's batch limit
    pub batch_size: usize,
    /// Input truncated beyond this many characters
    pub max_input_chars: usize,
    /// Concurrent in-flight embedding requests
    pub concurrency: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub enabled: bool,
    pub max_chunk_chars: usize,
    pub overlap_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Messages processed concurrently
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive downstream failures before the breaker opens
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            aws: AwsSettings::default(),
            queue: QueueSettings::default(),
            search: SearchSettings::default(),
            embedding: EmbeddingSettings::default(),
            chunking: ChunkingSettings::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            region: "ap-northeast-1".into(),
            endpoint: None,
            raw_bucket: "crawl-raw".into(),
            parsed_bucket: "crawl-parsed".into(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            index_queue: String::new(),
            dead_letter_queue: String::new(),
            visibility_secs: 120,
            receive_wait_secs: 20,
            max_receive_count: 5,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9200".into(),
            index: "pages".into(),
            username: None,
            password: None,
            timeout_secs: 30,
            bulk_batch_size: 100,
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://127.0.0.1:8801".into(),
            model: "titan-embed-v2".into(),
            batch_size: 16,
            max_input_chars: 8_192,
            concurrency: 4,
            timeout_secs: 30,
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chunk_chars: 2_000,
            overlap_chars: 200,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 5,
            base_backoff_ms: 2_000,
            max_backoff_ms: 60_000,
            breaker_threshold: 5,
            breaker_cooldown_secs: 30,
        }
    }
}

impl IndexerConfig {
    /// Load configuration from a TOML file, then apply env overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        let overrides: &mut [(&str, &mut String)] = &mut [
            ("AWS_REGION", &mut self.aws.region),
            ("RAW_BUCKET", &mut self.aws.raw_bucket),
            ("PARSED_BUCKET", &mut self.aws.parsed_bucket),
            ("INDEX_QUEUE_URL", &mut self.queue.index_queue),
            ("DEAD_LETTER_QUEUE_URL", &mut self.queue.dead_letter_queue),
            ("SEARCH_ENDPOINT", &mut self.search.endpoint),
            ("SEARCH_INDEX", &mut self.search.index),
            ("EMBEDDING_ENDPOINT", &mut self.embedding.endpoint),
            ("EMBEDDING_MODEL", &mut self.embedding.model),
        ];
        for (var, slot) in overrides.iter_mut() {
            if let Ok(value) = std::env::var(var) {
                **slot = value;
            }
        }
        if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
            self.aws.endpoint = Some(endpoint);
        }
        if let Ok(enabled) = std::env::var("ENABLE_EMBEDDINGS") {
            self.embedding.enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
    }

    fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            return Err(AppError::config("worker.concurrency must be at least 1"));
        }
        if self.chunking.overlap_chars >= self.chunking.max_chunk_chars {
            return Err(AppError::config("chunking.overlap_chars must be below max_chunk_chars"));
        }
        Ok(())
    }

    pub fn backoff(&self) -> crawler::backoff::BackoffPolicy {
        crawler::backoff::BackoffPolicy::new(self.worker.base_backoff_ms, self.worker.max_backoff_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search.timeout_secs)
    }
}
