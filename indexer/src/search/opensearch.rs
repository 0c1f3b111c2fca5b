// src/search/opensearch.rs

//! OpenSearch-compatible index adapter over HTTP.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{BulkReport, MappingState, SearchIndex};
use crate::config::SearchSettings;
use crate::documents::IndexDoc;
use crate::error::{AppError, Result};

pub struct OpenSearchIndex {
    http: reqwest::Client,
    base_url: String,
    index: String,
    auth: Option<(String, String)>,
    bulk_batch_size: usize,
}

impl OpenSearchIndex {
    pub fn new(settings: &SearchSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()?;
        let auth = match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        };
        Ok(Self {
            http,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            index: settings.index.clone(),
            auth,
            bulk_batch_size: settings.bulk_batch_size.max(1),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}/{}", self.base_url, path));
        if let Some((username, password)) = &self.auth {
            builder = builder.basic_auth(username, Some(password));
        }
        builder
    }

    /// Mapping template; the vector field is present only when embedding.
    pub fn index_mapping(dims: Option<usize>) -> Value {
        let mut properties = json!({
            "url_hash": { "type": "keyword" },
            "url": { "type": "keyword" },
            "domain": { "type": "keyword" },
            "site": { "type": "keyword" },
            "lang": { "type": "keyword" },
            "title": {
                "type": "text",
                "analyzer": "content_analyzer",
                "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
            },
            "body": { "type": "text", "analyzer": "content_analyzer" },
            "fetched_at": { "type": "date", "format": "strict_date_optional_time||epoch_millis" },
            "popularity_score": { "type": "float" },
            "chunk_idx": { "type": "integer" },
        });
        let mut settings = json!({
            "index": { "number_of_shards": 1, "number_of_replicas": 1, "refresh_interval": "5s" },
            "analysis": {
                "analyzer": {
                    "content_analyzer": { "type": "custom", "tokenizer": "standard", "filter": ["cjk_width", "lowercase"] }
                }
            }
        });

        if let Some(dims) = dims {
            properties["embedding"] = json!({
                "type": "knn_vector",
                "dimension": dims,
                "method": { "name": "hnsw", "space_type": "cosinesimil", "engine": "lucene" }
            });
            settings["index"]["knn"] = json!(true);
        }

        json!({ "mappings": { "properties": properties }, "settings": settings })
    }

    fn parse_bulk_items(&self, response: &Value) -> (usize, Vec<String>) {
        let mut succeeded = 0usize;
        let mut failed = Vec::new();

        let empty = Vec::new();
        for item in response["items"].as_array().unwrap_or(&empty) {
            for (_operation, result) in item.as_object().into_iter().flatten() {
                let status = result["status"].as_u64().unwrap_or(500);
                if status == 200 || status == 201 {
                    succeeded += 1;
                } else if let Some(id) = result["_id"].as_str() {
                    warn!(id, status, error = %result["error"], "bulk item failed");
                    failed.push(id.to_string());
                }
            }
        }
        (succeeded, failed)
    }

    /// Per-record retry for ids a bulk call rejected.
    async fn retry_individually(&self, docs: &[IndexDoc], failed_ids: &[String]) -> BulkReport {
        let mut report = BulkReport::default();
        for id in failed_ids {
            let Some(doc) = docs.iter().find(|d| &d.id == id) else {
                report.failed.push(id.clone());
                continue;
            };
            let result = self
                .request(reqwest::Method::PUT, &format!("{}/_doc/{}", self.index, doc.id))
                .json(doc)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => report.succeeded += 1,
                Ok(response) => {
                    warn!(id, status = %response.status(), "individual retry failed");
                    report.failed.push(id.clone());
                }
                Err(e) => {
                    warn!(id, error = %e, "individual retry failed");
                    report.failed.push(id.clone());
                }
            }
        }
        report
    }
}

#[async_trait::async_trait]
impl SearchIndex for OpenSearchIndex {
    async fn mapping_state(&self) -> Result<MappingState> {
        let response = self
            .request(reqwest::Method::GET, &format!("{}/_mapping", self.index))
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(MappingState::Missing);
        }
        if !response.status().is_success() {
            return Err(AppError::search(format!("mapping fetch failed: {}", response.status())));
        }

        let body: Value = response.json().await?;
        // Response nests under the concrete index name.
        let dims = body
            .as_object()
            .and_then(|m| m.values().next())
            .and_then(|idx| idx.pointer("/mappings/properties/embedding/dimension"))
            .and_then(Value::as_u64);

        Ok(match dims {
            Some(dims) => MappingState::Vector(dims as usize),
            None => MappingState::NoVector,
        })
    }

    async fn doc_count(&self) -> Result<u64> {
        let response = self
            .request(reqwest::Method::GET, &format!("{}/_count", self.index))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::search(format!("count failed: {}", response.status())));
        }
        let body: Value = response.json().await?;
        Ok(body["count"].as_u64().unwrap_or(0))
    }

    async fn create_index(&self, dims: Option<usize>) -> Result<()> {
        let response = self
            .request(reqwest::Method::PUT, &self.index)
            .json(&Self::index_mapping(dims))
            .send()
            .await?;

        if response.status().is_success() {
            info!(index = %self.index, ?dims, "created index");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("resource_already_exists_exception") {
            debug!(index = %self.index, "index already exists");
            return Ok(());
        }
        Err(AppError::search(format!("index creation failed: {body}")))
    }

    async fn delete_index(&self) -> Result<()> {
        let response = self.request(reqwest::Method::DELETE, &self.index).send().await?;
        if response.status().is_success() || response.status().as_u16() == 404 {
            return Ok(());
        }
        Err(AppError::search(format!("index deletion failed: {}", response.status())))
    }

    async fn bulk_upsert(&self, docs: &[IndexDoc]) -> Result<BulkReport> {
        let mut report = BulkReport::default();

        for batch in docs.chunks(self.bulk_batch_size) {
            let mut ndjson = String::new();
            for doc in batch {
                ndjson.push_str(&json!({ "index": { "_index": self.index, "_id": doc.id } }).to_string());
                ndjson.push('\n');
                ndjson.push_str(&serde_json::to_string(doc)?);
                ndjson.push('\n');
            }

            let response = self
                .request(reqwest::Method::POST, "_bulk")
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(ndjson)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(AppError::search(format!("bulk request failed: {}", response.status())));
            }

            let body: Value = response.json().await?;
            let (succeeded, failed_ids) = self.parse_bulk_items(&body);
            report.succeeded += succeeded;

            if !failed_ids.is_empty() {
                let retried = self.retry_individually(batch, &failed_ids).await;
                report.succeeded += retried.succeeded;
                report.failed.extend(retried.failed);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_includes_vector_field_when_embedding() {
        let mapping = OpenSearchIndex::index_mapping(Some(1024));
        assert_eq!(
            mapping.pointer("/mappings/properties/embedding/dimension").and_then(Value::as_u64),
            Some(1024)
        );
        assert_eq!(mapping.pointer("/settings/index/knn"), Some(&json!(true)));
    }

    #[test]
    fn test_mapping_omits_vector_field_when_disabled() {
        let mapping = OpenSearchIndex::index_mapping(None);
        assert!(mapping.pointer("/mappings/properties/embedding").is_none());
        assert!(mapping.pointer("/settings/index/knn").is_none());
    }

    #[test]
    fn test_bulk_item_parsing_splits_outcomes() {
        let settings = SearchSettings::default();
        let index = OpenSearchIndex::new(&settings).unwrap();

        let response = json!({
            "items": [
                { "index": { "_id": "a", "status": 201 } },
                { "index": { "_id": "b", "status": 429, "error": { "type": "es_rejected" } } },
                { "index": { "_id": "c", "status": 200 } },
            ]
        });
        let (succeeded, failed) = index.parse_bulk_items(&response);
        assert_eq!(succeeded, 2);
        assert_eq!(failed, vec!["b".to_string()]);
    }
}
