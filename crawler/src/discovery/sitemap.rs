// src/discovery/sitemap.rs

//! Sitemap enumeration with bounded recursion.
//!
//! Walks the sitemaps declared in robots.txt (or conventional locations
//! when none are declared), recursing into sitemap indices up to a depth
//! bound and a total-URL cap per pass.

use std::collections::HashSet;
use std::io::Cursor;

use sitemap::reader::{SiteMapEntity, SiteMapReader};
use tracing::{debug, warn};

/// Probed when robots.txt declares no sitemaps.
const CONVENTIONAL_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml", "/sitemaps.xml"];

pub struct SitemapWalker {
    http: reqwest::Client,
    max_depth: usize,
    max_urls: usize,
}

impl SitemapWalker {
    pub fn new(http: reqwest::Client, max_depth: usize, max_urls: usize) -> Self {
        Self {
            http,
            max_depth,
            max_urls,
        }
    }

    /// Enumerate page URLs for a domain.
    ///
    /// A sitemap that fails to fetch or parse is non-fatal; enumeration
    /// continues with whatever else is reachable.
    pub async fn collect(&self, domain: &str, declared: &[String]) -> Vec<String> {
        let mut frontier: Vec<(String, usize)> = if declared.is_empty() {
            match self.probe_conventional(domain).await {
                Some(found) => vec![(found, 0)],
                None => {
                    debug!(domain, "no sitemaps declared or found at conventional paths");
                    return Vec::new();
                }
            }
        } else {
            declared.iter().map(|s| (s.clone(), 0)).collect()
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut urls = Vec::new();

        while let Some((sitemap_url, depth)) = frontier.pop() {
            if urls.len() >= self.max_urls {
                debug!(domain, cap = self.max_urls, "per-pass URL cap reached, stopping enumeration");
                break;
            }
            if !visited.insert(sitemap_url.clone()) {
                continue;
            }

            let Some(bytes) = self.fetch(&sitemap_url).await else {
                warn!(domain, sitemap = %sitemap_url, "sitemap unreachable, continuing");
                continue;
            };

            for entity in SiteMapReader::new(Cursor::new(bytes)) {
                match entity {
                    SiteMapEntity::Url(entry) => {
                        if urls.len() >= self.max_urls {
                            break;
                        }
                        if let Some(url) = entry.loc.get_url() {
                            urls.push(url.to_string());
                        }
                    }
                    SiteMapEntity::SiteMap(entry) => {
                        if depth + 1 < self.max_depth {
                            if let Some(url) = entry.loc.get_url() {
                                frontier.push((url.to_string(), depth + 1));
                            }
                        } else {
                            debug!(domain, depth, "sitemap index beyond depth bound, skipping");
                        }
                    }
                    _ => {}
                }
            }
        }

        debug!(domain, count = urls.len(), "sitemap enumeration complete");
        urls
    }

    async fn probe_conventional(&self, domain: &str) -> Option<String> {
        for path in CONVENTIONAL_PATHS {
            let candidate = format!("https://{domain}{path}");
            if self.fetch(&candidate).await.is_some() {
                debug!(domain, sitemap = %candidate, "found sitemap at conventional path");
                return Some(candidate);
            }
        }
        None
    }

    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                response.bytes().await.ok().map(|b| b.to_vec())
            }
            _ => None,
        }
    }
}
