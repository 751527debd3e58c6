//! Crawler module for fetching pages from the root host
//!
//! This module contains:
//! - The single-domain HTTP crawler and its failure taxonomy
//! - Crawl responses with HTML content sniffing
//! - HTML link extraction

mod fetcher;
mod parser;
mod response;

pub use fetcher::{is_retry_status, retry_status_codes, CrawlError, Crawler, CrawlerOptions};
pub use parser::{extract_links, extract_same_host_links};
pub use response::{sniff_html, CrawlerResponse};
