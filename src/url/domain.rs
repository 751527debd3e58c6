use url::Url;

/// Extracts the lowercase host from a URL
///
/// The port is not part of the host, so `https://example.test:8443/` and
/// `https://example.test/` share the host `example.test`.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use crawl_worker::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.test:8443/path").unwrap();
/// assert_eq!(extract_host(&url), Some("example.test".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns true if `url` lives on `host` (compared case-insensitively)
pub fn is_same_host(url: &Url, host: &str) -> bool {
    url.host_str()
        .map(|h| h.eq_ignore_ascii_case(host))
        .unwrap_or(false)
}
