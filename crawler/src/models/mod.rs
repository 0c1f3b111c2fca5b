// src/models/mod.rs

//! Data structures shared across the pipeline: queue messages and the
//! URL lifecycle record.

mod messages;
mod record;

pub use messages::{CrawlMessage, DiscoveryMessage, IndexMessage, SCHEMA_VERSION};
pub use record::{RawLocation, UrlRecord, UrlState};
