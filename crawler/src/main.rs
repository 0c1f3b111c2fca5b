// src/main.rs

//! Crawl-side worker entry point.
//!
//! One binary, one role per process: `crawl` runs the fetch worker,
//! `discover` runs the discovery coordinator, `reclaim` sweeps expired
//! leases, and `seed` publishes domains into the discovery queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crawler::config::Settings;
use crawler::discovery::{forward_announcements, DiscoveryCoordinator, SitemapWalker};
use crawler::error::Result;
use crawler::gate::{PolitenessGate, RateGate, RobotsCache};
use crawler::models::DiscoveryMessage;
use crawler::queue::{self, sqs::SqsQueue, WorkQueue};
use crawler::state::{dynamo::DynamoStateStore, StateStore};
use crawler::storage::s3::S3Store;
use crawler::worker::{CrawlerWorker, HttpFetcher};

#[derive(Parser, Debug)]
#[command(name = "crawler", version, about = "Distributed crawl pipeline worker")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/crawler.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the crawl worker loop
    Crawl,
    /// Run the discovery coordinator loop
    Discover,
    /// Sweep expired leases back to pending
    Reclaim {
        /// Records per sweep
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Seconds between sweeps; 0 runs a single sweep and exits
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
    /// Publish seed domains to the discovery queue
    Seed {
        /// Domains to enumerate
        domains: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(Settings::load(&cli.config)?);

    let aws_config = load_aws_config(&settings).await;
    let queue: Arc<dyn WorkQueue> = Arc::new(SqsQueue::new(aws_sdk_sqs::Client::new(&aws_config)));
    let state: Arc<dyn StateStore> = Arc::new(DynamoStateStore::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        settings.aws.state_table.clone(),
        settings.crawler.max_retries,
    ));

    match cli.command {
        Command::Crawl => run_crawl_worker(settings, queue, state, &aws_config).await,
        Command::Discover => run_discovery(settings, queue, state).await,
        Command::Reclaim { batch_size, interval } => run_reclaimer(state, batch_size, interval).await,
        Command::Seed { domains } => seed_domains(&settings, queue.as_ref(), domains).await,
    }
}

async fn load_aws_config(settings: &Settings) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(settings.aws.region.clone()));
    if let Some(endpoint) = &settings.aws.endpoint {
        loader = loader.endpoint_url(endpoint.clone());
    }
    loader.load().await
}

fn politeness_http_client(settings: &Settings) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(&settings.crawler.user_agent)
        .timeout(Duration::from_secs(settings.crawler.request_timeout_secs.min(10)))
        .build()?)
}

async fn run_crawl_worker(
    settings: Arc<Settings>,
    queue: Arc<dyn WorkQueue>,
    state: Arc<dyn StateStore>,
    aws_config: &aws_config::SdkConfig,
) -> Result<()> {
    let store = Arc::new(S3Store::new(aws_sdk_s3::Client::new(aws_config)));

    let (announce_tx, announce_rx) = tokio::sync::mpsc::unbounded_channel();
    let forwarder = forward_announcements(announce_rx, Arc::clone(&queue), settings.queues.discovery_queue.clone());

    let robots = RobotsCache::new(politeness_http_client(&settings)?, settings.crawler.user_agent.clone())
        .with_announcements(announce_tx);
    let rate = RateGate::connect(
        &settings.counter.url,
        settings.rate.window_secs,
        settings.rate.default_qps,
        settings.rate.domain_qps.clone(),
    )
    .await?;
    let gate = Arc::new(PolitenessGate::new(robots, rate));

    let fetcher = Arc::new(HttpFetcher::new(&settings.crawler)?);
    let worker = Arc::new(CrawlerWorker::new(state, queue, store, gate, fetcher, Arc::clone(&settings)));

    let shutdown_worker = Arc::clone(&worker);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, draining in-flight slots");
            shutdown_worker.trigger_shutdown();
            // Drain deadline, then force-abort; redelivery covers the rest.
            tokio::time::sleep(Duration::from_secs(30)).await;
            shutdown_worker.force_abort();
        }
    });

    let result = worker.run().await;
    forwarder.abort();
    result
}

async fn run_discovery(
    settings: Arc<Settings>,
    queue: Arc<dyn WorkQueue>,
    state: Arc<dyn StateStore>,
) -> Result<()> {
    let http = politeness_http_client(&settings)?;
    let robots = Arc::new(RobotsCache::new(http.clone(), settings.crawler.user_agent.clone()));
    let walker = SitemapWalker::new(
        http,
        settings.discovery.max_sitemap_depth,
        settings.discovery.max_urls_per_pass,
    );

    let coordinator = DiscoveryCoordinator::new(queue, state, robots, walker, Arc::clone(&settings));

    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    coordinator.run().await
}

async fn run_reclaimer(state: Arc<dyn StateStore>, batch_size: usize, interval: u64) -> Result<()> {
    loop {
        match state.reclaim_expired(batch_size).await {
            Ok(reclaimed) if reclaimed > 0 => info!(reclaimed, "reclaimed expired leases"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "reclaim sweep failed"),
        }
        if interval == 0 {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

async fn seed_domains(settings: &Settings, queue: &dyn WorkQueue, domains: Vec<String>) -> Result<()> {
    for domain in domains {
        let message = DiscoveryMessage::new(domain.trim().trim_start_matches("https://").trim_start_matches("http://"), "seed");
        queue::send_message(queue, &settings.queues.discovery_queue, &message).await?;
        info!(domain = %message.domain, "seeded");
    }
    Ok(())
}
