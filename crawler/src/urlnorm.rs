// src/urlnorm.rs

//! URL canonicalization and fingerprinting.
//!
//! Every identity in the pipeline (state table keys, storage keys, index
//! document ids) derives from the canonical form produced here, so two
//! spellings of the same URL must normalize identically. Pure functions,
//! no I/O.

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{AppError, Result};

/// Query parameters dropped during normalization (tracking noise).
const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "ref", "mc_eid", "igshid"];

/// Produce the canonical form of a URL.
///
/// Lowercases scheme and host, strips default ports and the fragment,
/// sorts query parameters, drops tracking parameters, collapses duplicate
/// slashes, and decodes unreserved percent-escapes.
///
/// Rejects anything that is not `http(s)` with a non-empty host.
pub fn normalize(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|e| AppError::invalid_url(trimmed, e))?;

    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(AppError::invalid_url(trimmed, format!("unsupported scheme: {scheme}")));
    }

    let host = match parsed.host_str() {
        Some(h) if !h.is_empty() => h.to_ascii_lowercase(),
        _ => return Err(AppError::invalid_url(trimmed, "missing host")),
    };

    // Url::port() already yields None for the scheme's default port.
    let mut canonical = format!("{scheme}://{host}");
    if let Some(port) = parsed.port() {
        canonical.push_str(&format!(":{port}"));
    }

    canonical.push_str(&normalize_path(parsed.path()));

    let query = normalize_query(&parsed);
    if !query.is_empty() {
        canonical.push('?');
        canonical.push_str(&query);
    }

    Ok(canonical)
}

/// SHA-256 fingerprint of a canonical URL, rendered as hex.
pub fn url_hash(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the registrable domain of a URL (lowercased host, no port).
pub fn registrable_domain(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim()).map_err(|e| AppError::invalid_url(raw, e))?;
    match parsed.host_str() {
        Some(h) if !h.is_empty() => Ok(h.to_ascii_lowercase()),
        _ => Err(AppError::invalid_url(raw, "missing host")),
    }
}

/// Collapse duplicate slashes and decode unreserved percent-escapes.
fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len().max(1));
    let mut prev_slash = false;

    for segment_char in decode_unreserved(path).chars() {
        if segment_char == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(segment_char);
    }

    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Sorted, tracking-stripped query string.
fn normalize_query(parsed: &Url) -> String {
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    pairs.sort();

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Decode `%XX` escapes whose target is an unreserved character
/// (ALPHA / DIGIT / `-` / `.` / `_` / `~`); leave everything else encoded.
fn decode_unreserved(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(decoded) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                if decoded.is_ascii_alphanumeric() || matches!(decoded, b'-' | b'.' | b'_' | b'~') {
                    out.push(decoded as char);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }

    out
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_scheme_and_host() {
        assert_eq!(
            normalize("HTTPS://Example.TEST/Path").unwrap(),
            "https://example.test/Path"
        );
    }

    #[test]
    fn test_strips_default_port() {
        assert_eq!(normalize("https://example.test:443/a").unwrap(), "https://example.test/a");
        assert_eq!(normalize("http://example.test:80/a").unwrap(), "http://example.test/a");
        assert_eq!(
            normalize("https://example.test:8443/a").unwrap(),
            "https://example.test:8443/a"
        );
    }

    #[test]
    fn test_removes_fragment() {
        assert_eq!(
            normalize("https://example.test/a#section").unwrap(),
            "https://example.test/a"
        );
    }

    #[test]
    fn test_sorts_query_and_drops_tracking() {
        assert_eq!(
            normalize("https://example.test/a?z=1&a=2&utm_source=mail&gclid=x").unwrap(),
            "https://example.test/a?a=2&z=1"
        );
    }

    #[test]
    fn test_collapses_duplicate_slashes() {
        assert_eq!(
            normalize("https://example.test//a///b").unwrap(),
            "https://example.test/a/b"
        );
    }

    #[test]
    fn test_decodes_unreserved_escapes_only() {
        assert_eq!(
            normalize("https://example.test/%61%2Fb").unwrap(),
            "https://example.test/a%2Fb"
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(normalize("ftp://example.test/a").is_err());
        assert!(normalize("not a url").is_err());
        assert!(normalize("mailto:a@example.test").is_err());
    }

    #[test]
    fn test_equivalent_inputs_share_fingerprint() {
        let a = normalize("HTTPS://example.test:443/a?b=1&a=2#frag").unwrap();
        let b = normalize("https://example.test/a?a=2&b=1").unwrap();
        assert_eq!(a, b);
        assert_eq!(url_hash(&a), url_hash(&b));
        assert_eq!(url_hash(&a).len(), 64);
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(
            registrable_domain("https://Example.TEST:8443/a").unwrap(),
            "example.test"
        );
        assert!(registrable_domain("file:///tmp/x").is_err());
    }
}
