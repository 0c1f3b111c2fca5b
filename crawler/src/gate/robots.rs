// src/gate/robots.rs

//! robots.txt fetching, parsing, and per-worker caching.
//!
//! Policies are cached locally with a short TTL; eventual inconsistency
//! across workers is acceptable. A failed fetch caches a permissive
//! default for a shorter TTL so one flaky origin cannot stampede the
//! fleet with robots requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use robotstxt::DefaultMatcher;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::error::Result;

/// Default policy cache TTL.
pub const POLICY_TTL: Duration = Duration::from_secs(3600);
/// TTL for the permissive default cached after a fetch failure.
pub const ERROR_TTL: Duration = Duration::from_secs(300);

/// Sitemaps discovered on the first robots fetch of a domain, forwarded
/// to the discovery side.
#[derive(Debug, Clone)]
pub struct SitemapAnnouncement {
    pub domain: String,
    pub sitemaps: Vec<String>,
}

/// Parsed robots policy for one domain.
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    /// Raw robots.txt text; matching happens against this
    pub raw: String,
    /// `Crawl-delay` applying to our user agent, if any
    pub crawl_delay: Option<Duration>,
    /// `Sitemap:` directives
    pub sitemaps: Vec<String>,
    /// Set when the fetch failed and this is the permissive default
    pub permissive: bool,
}

impl RobotsPolicy {
    fn permissive_default() -> Self {
        Self {
            raw: String::new(),
            crawl_delay: None,
            sitemaps: Vec::new(),
            permissive: true,
        }
    }

    /// Parse the directives the matcher does not expose.
    pub fn parse(agent_token: &str, content: &str) -> Self {
        Self {
            crawl_delay: parse_crawl_delay(content, agent_token),
            sitemaps: parse_sitemaps(content),
            raw: content.to_string(),
            permissive: false,
        }
    }
}

struct CachedPolicy {
    policy: Arc<RobotsPolicy>,
    expires_at: Instant,
}

/// Per-worker robots cache.
pub struct RobotsCache {
    http: reqwest::Client,
    user_agent: String,
    /// Product token used for group matching ("SiteSearchBot")
    agent_token: String,
    policy_ttl: Duration,
    error_ttl: Duration,
    cache: Mutex<HashMap<String, CachedPolicy>>,
    /// First-fetch sitemap discoveries go here, when wired
    announce: Option<UnboundedSender<SitemapAnnouncement>>,
}

impl RobotsCache {
    pub fn new(http: reqwest::Client, user_agent: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        let agent_token = user_agent
            .split(['/', ' '])
            .next()
            .unwrap_or("*")
            .to_string();
        Self {
            http,
            user_agent,
            agent_token,
            policy_ttl: POLICY_TTL,
            error_ttl: ERROR_TTL,
            cache: Mutex::new(HashMap::new()),
            announce: None,
        }
    }

    pub fn with_announcements(mut self, tx: UnboundedSender<SitemapAnnouncement>) -> Self {
        self.announce = Some(tx);
        self
    }

    pub fn with_ttls(mut self, policy_ttl: Duration, error_ttl: Duration) -> Self {
        self.policy_ttl = policy_ttl;
        self.error_ttl = error_ttl;
        self
    }

    /// Resolve the (possibly cached) policy for a domain.
    pub async fn policy(&self, domain: &str) -> Result<Arc<RobotsPolicy>> {
        if let Some(policy) = self.cached(domain) {
            return Ok(policy);
        }

        let (policy, ttl) = match self.fetch(domain).await {
            Some(content) => (RobotsPolicy::parse(&self.agent_token, &content), self.policy_ttl),
            None => (RobotsPolicy::permissive_default(), self.error_ttl),
        };

        if !policy.sitemaps.is_empty() {
            if let Some(tx) = &self.announce {
                let _ = tx.send(SitemapAnnouncement {
                    domain: domain.to_string(),
                    sitemaps: policy.sitemaps.clone(),
                });
            }
        }

        let policy = Arc::new(policy);
        self.cache.lock().expect("robots mutex poisoned").insert(
            domain.to_string(),
            CachedPolicy {
                policy: Arc::clone(&policy),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(policy)
    }

    /// Whether our user agent may fetch this URL.
    pub async fn is_allowed(&self, domain: &str, url: &str) -> Result<bool> {
        let policy = self.policy(domain).await?;
        if policy.permissive || policy.raw.is_empty() {
            return Ok(true);
        }
        let mut matcher = DefaultMatcher::default();
        Ok(matcher.one_agent_allowed_by_robots(&policy.raw, &self.user_agent, url))
    }

    /// Install a policy directly, bypassing the network. Used by local
    /// runs with canned fixtures and by tests.
    pub fn prime(&self, domain: &str, content: &str) {
        let policy = Arc::new(RobotsPolicy::parse(&self.agent_token, content));
        self.cache.lock().expect("robots mutex poisoned").insert(
            domain.to_string(),
            CachedPolicy {
                policy,
                expires_at: Instant::now() + self.policy_ttl,
            },
        );
    }

    fn cached(&self, domain: &str) -> Option<Arc<RobotsPolicy>> {
        let cache = self.cache.lock().expect("robots mutex poisoned");
        cache
            .get(domain)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| Arc::clone(&entry.policy))
    }

    async fn fetch(&self, domain: &str) -> Option<String> {
        let robots_url = format!("https://{domain}/robots.txt");
        match self.http.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(text) => {
                    debug!(domain, bytes = text.len(), "fetched robots.txt");
                    Some(text)
                }
                Err(e) => {
                    warn!(domain, error = %e, "failed reading robots.txt body");
                    None
                }
            },
            Ok(response) => {
                debug!(domain, status = %response.status(), "no usable robots.txt");
                None
            }
            Err(e) => {
                warn!(domain, error = %e, "robots.txt fetch failed");
                None
            }
        }
    }
}

/// Extract the `Crawl-delay` that applies to our agent, falling back to
/// the wildcard group.
fn parse_crawl_delay(content: &str, agent_token: &str) -> Option<Duration> {
    let token = agent_token.to_ascii_lowercase();
    let mut group_applies = false;
    let mut wildcard_delay: Option<f64> = None;
    let mut agent_delay: Option<f64> = None;
    let mut group_is_wildcard = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match field.trim().to_ascii_lowercase().as_str() {
            "user-agent" => {
                let agent = value.to_ascii_lowercase();
                group_is_wildcard = agent == "*";
                group_applies = group_is_wildcard || token.contains(&agent) || agent.contains(&token);
            }
            "crawl-delay" if group_applies => {
                if let Ok(secs) = value.parse::<f64>() {
                    if group_is_wildcard {
                        wildcard_delay.get_or_insert(secs);
                    } else {
                        agent_delay.get_or_insert(secs);
                    }
                }
            }
            _ => {}
        }
    }

    agent_delay
        .or(wildcard_delay)
        .filter(|secs| *secs > 0.0)
        .map(Duration::from_secs_f64)
}

/// Extract `Sitemap:` directives (they are global, not per-group).
fn parse_sitemaps(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (field, value) = line.split_once(':')?;
            if field.trim().eq_ignore_ascii_case("sitemap") {
                let url = value.trim();
                (!url.is_empty()).then(|| url.to_string())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
User-agent: *\n\
Disallow: /private\n\
Crawl-delay: 2\n\
\n\
User-agent: SiteSearchBot\n\
Crawl-delay: 5\n\
\n\
Sitemap: https://example.test/sitemap.xml\n\
Sitemap:https://example.test/sitemap2.xml\n";

    #[test]
    fn test_parse_sitemaps() {
        let sitemaps = parse_sitemaps(ROBOTS);
        assert_eq!(
            sitemaps,
            vec![
                "https://example.test/sitemap.xml",
                "https://example.test/sitemap2.xml"
            ]
        );
    }

    #[test]
    fn test_crawl_delay_prefers_specific_group() {
        assert_eq!(
            parse_crawl_delay(ROBOTS, "sitesearchbot"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(parse_crawl_delay(ROBOTS, "otherbot"), Some(Duration::from_secs(2)));
        assert_eq!(parse_crawl_delay("User-agent: *\nDisallow:\n", "bot"), None);
    }

    #[tokio::test]
    async fn test_primed_policy_matching() {
        let cache = RobotsCache::new(reqwest::Client::new(), "SiteSearchBot/0.3");
        cache.prime("example.test", "User-agent: *\nDisallow: /private\nAllow: /private/faq\n");

        assert!(!cache
            .is_allowed("example.test", "https://example.test/private/page")
            .await
            .unwrap());
        // Allow wins over Disallow by longest match.
        assert!(cache
            .is_allowed("example.test", "https://example.test/private/faq")
            .await
            .unwrap());
        assert!(cache
            .is_allowed("example.test", "https://example.test/public")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_primed_policy_carries_delay_and_sitemaps() {
        let cache = RobotsCache::new(reqwest::Client::new(), "SiteSearchBot/0.3");
        cache.prime("example.test", ROBOTS);

        let policy = cache.policy("example.test").await.unwrap();
        assert_eq!(policy.crawl_delay, Some(Duration::from_secs(5)));
        assert_eq!(policy.sitemaps.len(), 2);
        assert!(!policy.permissive);
    }

    #[test]
    fn test_sitemap_parse_ignores_crawl_noise() {
        assert!(parse_sitemaps("Disallow: /x\nAllow: /y\n").is_empty());
    }
}
