use url::Url;

/// An ordered set of path prefixes rejected at admission
///
/// A URL is blacklisted when its path starts with any of the prefixes.
/// Matching is plain string prefix matching on the (still percent-encoded)
/// path, so `/search` also covers `/search/x` and `/searchable`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
    prefixes: Vec<String>,
}

impl Blacklist {
    /// Builds a blacklist from prefixes, dropping empty entries
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(Into::into)
            .map(|p: String| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    /// Builds a blacklist from a comma-separated list such as `/search,/uploads`
    pub fn from_csv(paths: &str) -> Self {
        Self::new(crate::config::split_paths(paths))
    }

    /// Returns true if the path matches one of the prefixes
    pub fn matches_path(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Returns true if the URL's path matches one of the prefixes
    pub fn is_blacklisted(&self, url: &Url) -> bool {
        self.matches_path(url.path())
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blacklist() -> Blacklist {
        Blacklist::new(["/search", "/government/uploads"])
    }

    #[test]
    fn test_prefix_match() {
        let url = Url::parse("https://example.test/search/x").unwrap();
        assert!(blacklist().is_blacklisted(&url));
    }

    #[test]
    fn test_exact_match() {
        let url = Url::parse("https://example.test/search").unwrap();
        assert!(blacklist().is_blacklisted(&url));
    }

    #[test]
    fn test_nested_prefix_match() {
        let url = Url::parse("https://example.test/government/uploads/file.pdf").unwrap();
        assert!(blacklist().is_blacklisted(&url));
    }

    #[test]
    fn test_no_match() {
        let url = Url::parse("https://example.test/page").unwrap();
        assert!(!blacklist().is_blacklisted(&url));

        let url = Url::parse("https://example.test/government/news").unwrap();
        assert!(!blacklist().is_blacklisted(&url));
    }

    #[test]
    fn test_query_is_not_part_of_path() {
        let url = Url::parse("https://example.test/page?next=/search").unwrap();
        assert!(!blacklist().is_blacklisted(&url));
    }

    #[test]
    fn test_empty_blacklist_matches_nothing() {
        let empty = Blacklist::from_csv("");
        assert!(empty.is_empty());
        assert!(!empty.matches_path("/search"));
    }

    #[test]
    fn test_from_csv_trims_entries() {
        let list = Blacklist::from_csv("/search, /uploads ,");
        assert_eq!(list.prefixes(), &["/search".to_string(), "/uploads".to_string()]);
    }
}
