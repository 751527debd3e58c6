use crate::UrlError;
use url::Url;

/// List of tracking query parameters to remove during normalization
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "_ga"];

/// Normalizes a URL into the key used by the dedup store
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Reject anything that is not HTTP(S) or has no host
/// 3. Lowercase the host
/// 4. Normalize path:
///    - Remove dot segments (. and ..) and repeated slashes
///    - Remove trailing slash (except for root /)
///    - Empty path becomes /
/// 5. Remove fragment (everything after #)
/// 6. Remove tracking query parameters and sort the rest
/// 7. Remove empty query string (trailing ?)
///
/// The scheme and port are kept, since they address different resources.
///
/// # Examples
///
/// ```
/// use crawl_worker::url::normalize_url;
///
/// let url = normalize_url("https://EXAMPLE.test/page/?b=2&a=1#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.test/page?a=1&b=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) => {
            let normalized_host = host.to_lowercase();
            url.set_host(Some(&normalized_host))
                .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
        }
        None => return Err(UrlError::MissingHost),
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let filtered_params = filter_and_sort_query_params(&url);

        if filtered_params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(filtered_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut normalized_segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", normalized_segments.join("/"))
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_kept() {
        let result = normalize_url("http://example.test/page").unwrap();
        assert_eq!(result.as_str(), "http://example.test/page");
    }

    #[test]
    fn test_www_is_kept() {
        let result = normalize_url("https://www.gov.uk/").unwrap();
        assert_eq!(result.as_str(), "https://www.gov.uk/");
    }

    #[test]
    fn test_remove_trailing_slash() {
        let result = normalize_url("https://example.test/page/").unwrap();
        assert_eq!(result.as_str(), "https://example.test/page");
    }

    #[test]
    fn test_keep_root_slash() {
        let result = normalize_url("https://example.test/").unwrap();
        assert_eq!(result.as_str(), "https://example.test/");
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = normalize_url("https://example.test").unwrap();
        assert_eq!(result.as_str(), "https://example.test/");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://example.test/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.test/page");
    }

    #[test]
    fn test_remove_tracking_params() {
        let result =
            normalize_url("https://example.test/page?utm_source=a&keep=yes&fbclid=b").unwrap();
        assert_eq!(result.as_str(), "https://example.test/page?keep=yes");
    }

    #[test]
    fn test_all_tracking_params_removed() {
        let result = normalize_url("https://example.test/page?utm_campaign=x&gclid=c").unwrap();
        assert_eq!(result.as_str(), "https://example.test/page");
    }

    #[test]
    fn test_sort_query_params() {
        let result = normalize_url("https://example.test/page?b=2&a=1").unwrap();
        assert_eq!(result.as_str(), "https://example.test/page?a=1&b=2");
    }

    #[test]
    fn test_normalize_path_with_dots() {
        let result = normalize_url("https://example.test/a/../b/./c").unwrap();
        assert_eq!(result.as_str(), "https://example.test/b/c");
    }

    #[test]
    fn test_multiple_slashes() {
        let result = normalize_url("https://example.test///path//to///page").unwrap();
        assert_eq!(result.as_str(), "https://example.test/path/to/page");
    }

    #[test]
    fn test_lowercase_host_only() {
        let result = normalize_url("https://EXAMPLE.TEST/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.test/Page");
    }

    #[test]
    fn test_port_is_kept() {
        let result = normalize_url("http://127.0.0.1:8080/a/").unwrap();
        assert_eq!(result.as_str(), "http://127.0.0.1:8080/a");
    }

    #[test]
    fn test_equivalent_urls_share_a_key() {
        let a = normalize_url("https://example.test/other").unwrap();
        let b = normalize_url("https://Example.test/other/#footer").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.test/page");
        assert!(matches!(result, Err(UrlError::InvalidScheme(_))));
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(normalize_url("not a url"), Err(UrlError::Parse(_))));
    }
}
