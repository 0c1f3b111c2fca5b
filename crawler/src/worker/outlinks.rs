// src/worker/outlinks.rs

//! Outlink extraction from fetched pages.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::urlnorm;

/// Outlinks split by where they route: same-domain URLs go straight to
/// the crawl queue, foreign domains go through discovery.
#[derive(Debug, Default)]
pub struct OutlinkPartition {
    /// Canonical same-domain URLs, deduplicated
    pub same_domain: Vec<String>,
    /// Foreign domains, coalesced to one entry per domain
    pub cross_domain: Vec<String>,
}

/// Extract absolute HTTP(S) outlinks, bounded by `cap`.
pub fn extract_outlinks(base_url: &str, html: &str, cap: usize) -> Result<Vec<String>> {
    let base = Url::parse(base_url)?;
    let selector = Selector::parse("a[href]")
        .map_err(|e| AppError::selector("a[href]", format!("{e:?}")))?;

    let document = Html::parse_document(html);
    let mut links = Vec::new();

    for element in document.select(&selector) {
        if links.len() >= cap {
            break;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href.trim()) else {
            continue;
        };
        if matches!(resolved.scheme(), "http" | "https") {
            links.push(resolved.to_string());
        }
    }

    Ok(links)
}

/// Normalize links and split them by routing destination.
pub fn partition_outlinks(page_domain: &str, links: &[String]) -> OutlinkPartition {
    let mut seen_urls = HashSet::new();
    let mut seen_domains = HashSet::new();
    let mut partition = OutlinkPartition::default();

    for link in links {
        let Ok(canonical) = urlnorm::normalize(link) else {
            continue;
        };
        let Ok(domain) = urlnorm::registrable_domain(&canonical) else {
            continue;
        };

        if domain == page_domain {
            if seen_urls.insert(canonical.clone()) {
                partition.same_domain.push(canonical);
            }
        } else if seen_domains.insert(domain.clone()) {
            partition.cross_domain.push(domain);
        }
    }

    partition
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <a href="/next">next</a>
        <a href="/next#section">same after normalize</a>
        <a href="https://example.test/other?utm_source=x">tracked</a>
        <a href="https://elsewhere.test/a">away 1</a>
        <a href="https://elsewhere.test/b">away 2</a>
        <a href="mailto:someone@example.test">mail</a>
        <a href="relative/page.html">relative</a>
    </body></html>"#;

    #[test]
    fn test_extracts_absolute_http_links() {
        let links = extract_outlinks("https://example.test/dir/page", PAGE, 100).unwrap();
        assert!(links.contains(&"https://example.test/next".to_string()));
        assert!(links.contains(&"https://example.test/dir/relative/page.html".to_string()));
        assert!(!links.iter().any(|l| l.starts_with("mailto:")));
    }

    #[test]
    fn test_cap_bounds_extraction() {
        let links = extract_outlinks("https://example.test/", PAGE, 2).unwrap();
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_partition_coalesces_foreign_domains() {
        let links = extract_outlinks("https://example.test/", PAGE, 100).unwrap();
        let partition = partition_outlinks("example.test", &links);

        assert!(partition.same_domain.contains(&"https://example.test/next".to_string()));
        // Fragment variant collapsed into one entry.
        assert_eq!(
            partition.same_domain.iter().filter(|u| u.ends_with("/next")).count(),
            1
        );
        // Tracking parameter stripped by normalization.
        assert!(partition.same_domain.contains(&"https://example.test/other".to_string()));
        assert_eq!(partition.cross_domain, vec!["elsewhere.test".to_string()]);
    }
}
