// src/main.rs

//! Indexer worker entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crawler::queue::{sqs::SqsQueue, WorkQueue};
use crawler::storage::{s3::S3Store, ObjectStore};

use indexer::config::IndexerConfig;
use indexer::embed::{EmbeddingClient, HttpEmbeddingClient};
use indexer::error::Result;
use indexer::search::opensearch::OpenSearchIndex;
use indexer::worker::IndexerWorker;

#[derive(Parser, Debug)]
#[command(name = "indexer", version, about = "Search-index ingest worker")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/indexer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the indexer worker loop
    Run,
    /// Verify the index mapping against the configured model and exit
    VerifyMapping,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(IndexerConfig::load(&cli.config)?);

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws.region.clone()));
    if let Some(endpoint) = &config.aws.endpoint {
        loader = loader.endpoint_url(endpoint.clone());
    }
    let aws_config = loader.load().await;

    let queue: Arc<dyn WorkQueue> = Arc::new(SqsQueue::new(aws_sdk_sqs::Client::new(&aws_config)));
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(aws_sdk_s3::Client::new(&aws_config)));
    let search = Arc::new(OpenSearchIndex::new(&config.search)?);

    let embedder: Option<Arc<dyn EmbeddingClient>> = if config.embedding.enabled {
        Some(Arc::new(HttpEmbeddingClient::new(&config.embedding)?))
    } else {
        None
    };

    let worker = IndexerWorker::new(queue, store, search, embedder, Arc::clone(&config));

    match cli.command {
        Command::VerifyMapping => {
            worker.startup().await?;
            info!("index mapping verified");
            Ok(())
        }
        Command::Run => {
            let shutdown = worker.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    shutdown.cancel();
                }
            });
            worker.run().await
        }
    }
}
