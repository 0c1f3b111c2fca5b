// tests/worker_scenarios.rs

//! End-to-end crawl worker scenarios against in-memory backends and a
//! scripted fetch target.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crawler::config::Settings;
use crawler::error::Result;
use crawler::gate::{PolitenessGate, RateGate, RobotsCache};
use crawler::models::{CrawlMessage, IndexMessage, UrlState};
use crawler::queue::{memory::InMemoryQueue, WorkQueue};
use crawler::state::{memory::InMemoryStateStore, StateStore};
use crawler::storage::{memory::InMemoryStore, ObjectStore};
use crawler::urlnorm;
use crawler::worker::{CrawlerWorker, FetchResponse, PageFetcher};

const PERMISSIVE_ROBOTS: &str = "User-agent: *\nDisallow:\n";

/// One canned response for the scripted target.
#[derive(Clone)]
struct Scripted {
    status: u16,
    body: &'static str,
    final_url: Option<&'static str>,
    retry_after: Option<Duration>,
}

impl Scripted {
    fn ok(body: &'static str) -> Self {
        Self {
            status: 200,
            body,
            final_url: None,
            retry_after: None,
        }
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            body: "",
            final_url: None,
            retry_after: None,
        }
    }
}

/// Fetcher that replays a per-URL script and records every call.
#[derive(Default)]
struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn script(&self, url: &str, responses: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        self.calls.lock().unwrap().push(url.to_string());

        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(url)
            .unwrap_or_else(|| panic!("unexpected fetch of {url}"));
        let scripted = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or_else(|| panic!("script exhausted for {url}"))
        };

        Ok(FetchResponse {
            status: scripted.status,
            final_url: scripted.final_url.unwrap_or(url).to_string(),
            body: scripted.body.as_bytes().to_vec(),
            truncated: false,
            content_type: Some("text/html".into()),
            headers: vec![("content-type".into(), "text/html".into())],
            retry_after: scripted.retry_after,
            fetched_at: Utc::now(),
        })
    }
}

struct Harness {
    worker: CrawlerWorker,
    state: Arc<InMemoryStateStore>,
    queue: Arc<InMemoryQueue>,
    store: Arc<InMemoryStore>,
    fetcher: Arc<ScriptedFetcher>,
    settings: Arc<Settings>,
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.queues.discovery_queue = "discovery".into();
    settings.queues.crawl_queue = "crawl".into();
    settings.queues.index_queue = "index".into();
    settings.queues.dead_letter_queue = "dlq".into();
    settings.queues.receive_wait_secs = 0;
    settings.crawler.max_retries = 3;
    settings.crawler.base_backoff_ms = 5;
    settings.crawler.max_backoff_ms = 20;
    settings.rate.default_qps = 100.0;
    settings
}

fn harness(settings: Settings, robots: &str) -> Harness {
    let settings = Arc::new(settings);
    let state = Arc::new(InMemoryStateStore::new(settings.crawler.max_retries));
    let queue = Arc::new(InMemoryQueue::new(settings.queues.max_receive_count));
    let store = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(ScriptedFetcher::default());

    let robots_cache = RobotsCache::new(reqwest::Client::new(), settings.crawler.user_agent.clone());
    robots_cache.prime("example.test", robots);
    let rate = RateGate::disconnected(
        settings.rate.window_secs,
        settings.rate.default_qps,
        settings.rate.domain_qps.clone(),
    );
    let gate = Arc::new(PolitenessGate::new(robots_cache, rate));

    let worker = CrawlerWorker::new(
        Arc::clone(&state) as Arc<dyn StateStore>,
        Arc::clone(&queue) as Arc<dyn WorkQueue>,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        gate,
        Arc::clone(&fetcher) as Arc<dyn PageFetcher>,
        Arc::clone(&settings),
    )
    .with_owner_id("worker-test");

    Harness {
        worker,
        state,
        queue,
        store,
        fetcher,
        settings,
    }
}

async fn enqueue(harness: &Harness, url: &str) -> String {
    let canonical = urlnorm::normalize(url).unwrap();
    let url_hash = urlnorm::url_hash(&canonical);
    let message = CrawlMessage::new(canonical, "example.test", url_hash.clone());
    crawler::queue::send_message(harness.queue.as_ref(), "crawl", &message)
        .await
        .unwrap();
    url_hash
}

/// Receive one batch and process it; returns how many were processed.
async fn process_once(harness: &Harness) -> usize {
    let deliveries = harness
        .queue
        .receive("crawl", 10, Duration::ZERO, Duration::from_secs(60))
        .await
        .unwrap();
    let count = deliveries.len();
    for delivery in deliveries {
        harness.worker.process_delivery(delivery).await;
    }
    count
}

/// Drive the worker until the crawl queue drains or rounds run out.
async fn drain(harness: &Harness, max_rounds: usize) {
    for _ in 0..max_rounds {
        let deliveries = harness
            .queue
            .receive("crawl", 10, Duration::ZERO, Duration::from_secs(60))
            .await
            .unwrap();
        if deliveries.is_empty() {
            if harness.queue.is_empty("crawl") {
                return;
            }
            // Messages exist but are deferred; wait for visibility.
            tokio::time::sleep(Duration::from_millis(30)).await;
            continue;
        }
        for delivery in deliveries {
            harness.worker.process_delivery(delivery).await;
        }
    }
}

fn index_messages(harness: &Harness) -> Vec<IndexMessage> {
    harness
        .queue
        .drain("index")
        .iter()
        .map(|body| serde_json::from_str(body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_happy_path_persists_and_emits() {
    let h = harness(settings(), PERMISSIVE_ROBOTS);
    let page = r#"<html><head><title>A</title></head><body>
        <p>Hello crawl pipeline.</p>
        <a href="/b">next</a>
        <a href="https://elsewhere.test/x">away</a>
    </body></html>"#;
    h.fetcher.script("https://example.test/a", vec![Scripted::ok(page)]);

    let url_hash = enqueue(&h, "https://example.test/a").await;
    assert_eq!(process_once(&h).await, 1);

    // State is done with a content hash and a raw pointer.
    let record = h.state.get(&url_hash).await.unwrap().unwrap();
    assert_eq!(record.state, UrlState::Done);
    assert!(record.content_hash.is_some());
    let raw = record.raw_location.clone().unwrap();
    assert!(raw.key.ends_with(&format!("{url_hash}.html")));

    // Raw bytes and sidecar landed in the raw bucket.
    let stored = h.store.get(&raw.bucket, &raw.key).await.unwrap().unwrap();
    assert_eq!(stored, page.as_bytes());
    let raw_keys = h.store.keys(&h.settings.aws.raw_bucket);
    assert!(raw_keys.iter().any(|k| k.ends_with(".meta.json")));

    // Parsed text landed in the parsed bucket.
    let parsed_keys = h.store.keys(&h.settings.aws.parsed_bucket);
    assert!(parsed_keys.iter().any(|k| k.ends_with(".txt")));

    // One index message, pointing at the stored objects.
    let emitted = index_messages(&h);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].url_hash, url_hash);
    assert!(emitted[0].parsed_location.is_some());

    // Same-domain outlink became pending + crawl work; foreign domain
    // went through discovery.
    let b_hash = urlnorm::url_hash("https://example.test/b");
    assert_eq!(
        h.state.get(&b_hash).await.unwrap().unwrap().state,
        UrlState::Pending
    );
    assert_eq!(h.queue.len("crawl"), 1);
    let discovery = h.queue.drain("discovery");
    assert_eq!(discovery.len(), 1);
    assert!(discovery[0].contains("elsewhere.test"));

    assert!(h.queue.is_empty("dlq"));
}

#[tokio::test]
async fn test_transient_5xx_retries_then_succeeds() {
    let h = harness(settings(), PERMISSIVE_ROBOTS);
    h.fetcher.script(
        "https://example.test/flaky",
        vec![
            Scripted::status(503),
            Scripted::status(503),
            Scripted::ok("<html><body>finally</body></html>"),
        ],
    );

    let url_hash = enqueue(&h, "https://example.test/flaky").await;
    drain(&h, 20).await;

    let record = h.state.get(&url_hash).await.unwrap().unwrap();
    assert_eq!(record.state, UrlState::Done);
    assert_eq!(record.retries, 2);
    assert_eq!(h.fetcher.calls().len(), 3);
    assert_eq!(index_messages(&h).len(), 1);
    assert!(h.queue.is_empty("dlq"));
}

#[tokio::test]
async fn test_permanent_404_fails_without_dlq() {
    let h = harness(settings(), PERMISSIVE_ROBOTS);
    h.fetcher
        .script("https://example.test/gone", vec![Scripted::status(404)]);

    let url_hash = enqueue(&h, "https://example.test/gone").await;
    drain(&h, 3).await;

    let record = h.state.get(&url_hash).await.unwrap().unwrap();
    assert_eq!(record.state, UrlState::Failed);
    assert!(record.last_error.unwrap().contains("404"));
    assert!(index_messages(&h).is_empty());
    assert!(h.queue.is_empty("dlq"));
    assert!(h.queue.is_empty("crawl"));
}

#[tokio::test]
async fn test_retry_budget_exhaustion_dead_letters() {
    let mut s = settings();
    s.crawler.max_retries = 2;
    let h = harness(s, PERMISSIVE_ROBOTS);
    h.fetcher
        .script("https://example.test/down", vec![Scripted::status(503)]);

    let url_hash = enqueue(&h, "https://example.test/down").await;
    drain(&h, 30).await;

    let record = h.state.get(&url_hash).await.unwrap().unwrap();
    assert_eq!(record.state, UrlState::Failed);
    assert_eq!(record.retries, 3);
    assert_eq!(h.queue.len("dlq"), 1);
    assert!(h.queue.is_empty("crawl"));
    assert!(index_messages(&h).is_empty());
}

#[tokio::test]
async fn test_robots_disallow_never_fetches() {
    let robots = "User-agent: *\nDisallow: /private\n";
    let h = harness(settings(), robots);

    let url_hash = enqueue(&h, "https://example.test/private/report").await;
    drain(&h, 3).await;

    // No HTTP request went out; the record still resolved to done.
    assert!(h.fetcher.calls().is_empty());
    let record = h.state.get(&url_hash).await.unwrap().unwrap();
    assert_eq!(record.state, UrlState::Done);
    assert!(record.raw_location.is_none());
    assert!(h.store.keys(&h.settings.aws.raw_bucket).is_empty());
    assert!(index_messages(&h).is_empty());
}

#[tokio::test]
async fn test_cross_domain_redirect_dead_letters() {
    let h = harness(settings(), PERMISSIVE_ROBOTS);
    h.fetcher.script(
        "https://example.test/moved",
        vec![Scripted {
            status: 200,
            body: "<html/>",
            final_url: Some("https://hijack.test/landing"),
            retry_after: None,
        }],
    );

    let url_hash = enqueue(&h, "https://example.test/moved").await;
    drain(&h, 3).await;

    let record = h.state.get(&url_hash).await.unwrap().unwrap();
    assert_eq!(record.state, UrlState::Failed);
    assert!(record.last_error.unwrap().contains("cross-domain"));
    assert_eq!(h.queue.len("dlq"), 1);
    assert!(index_messages(&h).is_empty());
}

#[tokio::test]
async fn test_redelivery_of_done_record_is_dropped() {
    let h = harness(settings(), PERMISSIVE_ROBOTS);
    let page = "<html><body>stable content</body></html>";
    h.fetcher.script("https://example.test/a", vec![Scripted::ok(page)]);

    let url_hash = enqueue(&h, "https://example.test/a").await;
    drain(&h, 3).await;
    assert_eq!(index_messages(&h).len(), 1);

    // Simulated redelivery of the same crawl message.
    enqueue(&h, "https://example.test/a").await;
    drain(&h, 3).await;

    // Terminal record: work dropped, no second fetch, no second document.
    assert_eq!(h.fetcher.calls().len(), 1);
    assert!(index_messages(&h).is_empty());
    let record = h.state.get(&url_hash).await.unwrap().unwrap();
    assert_eq!(record.state, UrlState::Done);
}

#[tokio::test]
async fn test_lease_reclaim_allows_second_worker_to_finish() {
    let h = harness(settings(), PERMISSIVE_ROBOTS);
    let page = "<html><body>recovered</body></html>";
    h.fetcher.script("https://example.test/a", vec![Scripted::ok(page)]);

    let canonical = urlnorm::normalize("https://example.test/a").unwrap();
    let url_hash = urlnorm::url_hash(&canonical);

    // Worker A takes the lock and hangs; its lease lapses immediately.
    let acquired = h
        .state
        .try_acquire(&canonical, "example.test", &url_hash, "worker-hung", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(acquired, crawler::state::AcquireOutcome::Acquired);

    enqueue(&h, "https://example.test/a").await;
    drain(&h, 3).await;

    let record = h.state.get(&url_hash).await.unwrap().unwrap();
    assert_eq!(record.state, UrlState::Done);
    assert_eq!(index_messages(&h).len(), 1);
}
