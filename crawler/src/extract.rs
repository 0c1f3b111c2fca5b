// src/extract.rs

//! Plain-text extraction from fetched HTML, for the parsed bucket and the
//! downstream indexer.

use scraper::Html;
use serde::{Deserialize, Serialize};

/// Extracted document content plus the metadata sidecar fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

/// Elements whose text is never page content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "template"];

/// Extract title and visible text from an HTML document.
pub fn extract_content(html: &str) -> ExtractedContent {
    let document = Html::parse_document(html);

    let mut title = None;
    let mut words: Vec<String> = Vec::new();

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let mut ancestors = node.ancestors().filter_map(|a| a.value().as_element().map(|e| e.name()));
        if ancestors.any(|name| SKIPPED_ELEMENTS.contains(&name)) {
            // <title> lives inside <head>; pick it up before skipping.
            let in_title = node
                .ancestors()
                .filter_map(|a| a.value().as_element().map(|e| e.name()))
                .any(|name| name == "title");
            if in_title && title.is_none() {
                let t = text.trim();
                if !t.is_empty() {
                    title = Some(t.to_string());
                }
            }
            continue;
        }

        words.extend(text.split_whitespace().map(str::to_string));
    }

    let text = words.join(" ");
    let lang = detect_lang(&text);

    ExtractedContent { title, text, lang }
}

/// Character-class heuristic, sufficient for routing to an analyzer.
pub fn detect_lang(text: &str) -> Option<String> {
    let mut total = 0usize;
    let mut cjk = 0usize;
    let mut latin = 0usize;

    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        match c {
            '\u{3040}'..='\u{309f}' | '\u{30a0}'..='\u{30ff}' | '\u{4e00}'..='\u{9fff}' => cjk += 1,
            'a'..='z' | 'A'..='Z' => latin += 1,
            _ => {}
        }
    }

    if total == 0 {
        return None;
    }
    if cjk as f64 / total as f64 > 0.1 {
        Some("ja".to_string())
    } else if latin > 0 {
        Some("en".to_string())
    } else {
        None
    }
}
