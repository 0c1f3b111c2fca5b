// src/worker/fetch.rs

//! Page fetching and HTTP outcome classification.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::redirect::Policy;

use crate::config::CrawlerSettings;
use crate::error::{AppError, Result};

/// A completed fetch, after redirects.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after following redirects
    pub final_url: String,
    pub body: Vec<u8>,
    /// Body hit the size cap and was cut short
    pub truncated: bool,
    pub content_type: Option<String>,
    /// Response headers for the metadata sidecar
    pub headers: Vec<(String, String)>,
    /// Server-provided retry hint (429/503)
    pub retry_after: Option<Duration>,
    pub fetched_at: DateTime<Utc>,
}

/// Seam for the worker's page fetches, so tests can script targets.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

/// How a fetch outcome should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// 2xx with body
    Success,
    /// Never retry (4xx family, redirect loops)
    Permanent(String),
    /// Retry with backoff; `delay_hint` carries a server `Retry-After`
    Retryable {
        delay_hint: Option<Duration>,
        reason: String,
    },
}

/// Classify a completed HTTP response by status code.
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        429 => Disposition::Retryable {
            delay_hint: retry_after,
            reason: "HTTP 429 rate limited".into(),
        },
        401 | 403 | 404 | 410 => Disposition::Permanent(format!("HTTP {status}")),
        400..=499 => Disposition::Permanent(format!("HTTP {status}")),
        500..=599 => Disposition::Retryable {
            delay_hint: retry_after,
            reason: format!("HTTP {status}"),
        },
        other => Disposition::Retryable {
            delay_hint: None,
            reason: format!("unexpected HTTP {other}"),
        },
    }
}

/// Classify a transport-level failure.
pub fn classify_error(error: &AppError) -> Disposition {
    match error {
        AppError::Http(e) if e.is_redirect() => {
            Disposition::Permanent("redirect limit exceeded".into())
        }
        AppError::Http(e) if e.is_timeout() => Disposition::Retryable {
            delay_hint: None,
            reason: "request timeout".into(),
        },
        AppError::Http(e) if e.is_connect() => Disposition::Retryable {
            delay_hint: None,
            reason: "connection error".into(),
        },
        other => Disposition::Retryable {
            delay_hint: None,
            reason: format!("fetch failed: {other}"),
        },
    }
}

/// Production fetcher over `reqwest`.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body: usize,
}

impl HttpFetcher {
    pub fn new(settings: &CrawlerSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .redirect(Policy::limited(settings.max_redirects))
            .build()?;
        Ok(Self {
            client,
            max_body: settings.max_content_length,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        let mut response = self.client.get(url).send().await?;
        let fetched_at = Utc::now();

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        // Read up to the cap; truncate with a flag rather than fail.
        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_body {
                body.extend_from_slice(&chunk[..self.max_body - body.len()]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            status,
            final_url,
            body,
            truncated,
            content_type,
            headers,
            retry_after,
            fetched_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses() {
        assert_eq!(classify_status(200, None), Disposition::Success);
        assert_eq!(classify_status(204, None), Disposition::Success);
    }

    #[test]
    fn test_permanent_statuses() {
        for status in [401, 403, 404, 410, 451] {
            assert!(
                matches!(classify_status(status, None), Disposition::Permanent(_)),
                "status {status}"
            );
        }
    }

    #[test]
    fn test_rate_limit_carries_server_hint() {
        let hint = Some(Duration::from_secs(17));
        match classify_status(429, hint) {
            Disposition::Retryable { delay_hint, .. } => assert_eq!(delay_hint, hint),
            other => panic!("unexpected disposition {other:?}"),
        }
    }

    #[test]
    fn test_server_errors_retry() {
        for status in [500, 502, 503, 504] {
            assert!(
                matches!(classify_status(status, None), Disposition::Retryable { .. }),
                "status {status}"
            );
        }
    }
}
