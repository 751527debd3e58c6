//! HTML link extraction
//!
//! Collects hyperlink targets from a page, resolves them against the page
//! URL and keeps those on the root host.

use crate::url::is_same_host;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extracts every followable link from an HTML document
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links and data URIs
/// - Fragment-only links (same-page anchors)
///
/// Results are absolute, fragment-free and de-duplicated in first-seen
/// order.
///
/// # Example
///
/// ```
/// use crawl_worker::crawler::extract_links;
/// use url::Url;
///
/// let html = r#"<html><body><a href="/other">Other</a></body></html>"#;
/// let base_url = Url::parse("https://example.test/page").unwrap();
/// let links = extract_links(html, &base_url);
/// assert_eq!(links[0].as_str(), "https://example.test/other");
/// ```
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut push = |href: &str| {
        if let Some(url) = resolve_link(href, base_url) {
            if seen.insert(url.as_str().to_string()) {
                links.push(url);
            }
        }
    };

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}

/// Extracts links from a raw body, keeping only those on `root_host`
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
pub fn extract_same_host_links(body: &[u8], base_url: &Url, root_host: &str) -> Vec<String> {
    let html = String::from_utf8_lossy(body);

    extract_links(&html, base_url)
        .into_iter()
        .filter(|url| is_same_host(url, root_host))
        .map(String::from)
        .collect()
}

/// Resolves a link href to an absolute HTTP(S) URL without a fragment
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    let mut absolute_url = base_url.join(href).ok()?;
    if absolute_url.scheme() != "http" && absolute_url.scheme() != "https" {
        return None;
    }

    absolute_url.set_fragment(None);
    Some(absolute_url)
}
