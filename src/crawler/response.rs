//! Crawl responses and HTML content sniffing

use reqwest::header::HeaderMap;

/// Number of leading bytes considered when sniffing content
const SNIFF_LEN: usize = 512;

/// Tag openings that identify a document as HTML
///
/// Each must be followed by a space or `>` to count as a match.
const HTML_SIGNATURES: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// A successful fetch: the raw body plus the response headers
#[derive(Debug, Clone, Default)]
pub struct CrawlerResponse {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
}

impl CrawlerResponse {
    pub fn new(body: Vec<u8>, headers: HeaderMap) -> Self {
        Self { body, headers }
    }

    /// Returns true if the body looks like HTML
    ///
    /// Decided from the body bytes alone; a `Content-Type` header claiming
    /// HTML is not trusted.
    pub fn is_html(&self) -> bool {
        sniff_html(&self.body)
    }
}

/// Sniffs the first bytes of a body for an HTML signature
///
/// Leading whitespace is skipped and tag names are matched
/// case-insensitively.
pub fn sniff_html(body: &[u8]) -> bool {
    let data = &body[..body.len().min(SNIFF_LEN)];
    let start = data
        .iter()
        .position(|b| !is_whitespace(*b))
        .unwrap_or(data.len());
    let data = &data[start..];

    HTML_SIGNATURES.iter().any(|sig| matches_signature(data, sig))
}

fn matches_signature(data: &[u8], sig: &[u8]) -> bool {
    if data.len() < sig.len() + 1 {
        return false;
    }

    let prefix_matches = data
        .iter()
        .zip(sig.iter())
        .all(|(d, s)| d.to_ascii_uppercase() == *s);

    prefix_matches && matches!(data[sig.len()], b' ' | b'>')
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | 0x0c | b'\r' | b' ')
}
