// src/worker/mod.rs

//! The crawl worker: slot state machine, fetching, and lease heartbeats.

mod crawler;
mod fetch;
mod lease;
mod outlinks;

pub use crawler::CrawlerWorker;
pub use fetch::{classify_error, classify_status, Disposition, FetchResponse, HttpFetcher, PageFetcher};
pub use lease::LeaseRenewer;
pub use outlinks::{extract_outlinks, partition_outlinks, OutlinkPartition};
