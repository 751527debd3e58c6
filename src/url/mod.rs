//! URL handling module for the crawl worker
//!
//! This module provides dedup-key normalization, host extraction and
//! comparison, and the admission path blacklist.

mod blacklist;
mod domain;
mod normalize;

// Re-export main functions
pub use blacklist::Blacklist;
pub use domain::{extract_host, is_same_host};
pub use normalize::normalize_url;

use crate::UrlError;

/// Computes the dedup key for a raw URL string
///
/// This is the normalized URL rendered as a string; equivalent spellings
/// of the same page map to the same key.
pub fn dedup_key(url_str: &str) -> Result<String, UrlError> {
    normalize_url(url_str).map(String::from)
}
