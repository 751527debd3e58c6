//! Single-domain HTTP crawler
//!
//! This module handles every outbound request the worker makes:
//! - Building the HTTP client (user agent, timeouts, redirect policy)
//! - Enforcing root-host scoping before any network access
//! - Classifying responses into success, retryable and fatal failures

use crate::config::CrawlerConfig;
use crate::crawler::response::CrawlerResponse;
use crate::url::{extract_host, is_same_host};
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum number of redirects followed for a single fetch
const MAX_REDIRECTS: usize = 10;

/// The HTTP status code for "Too Many Requests"
const TOO_MANY_REQUESTS: u16 = 429;

/// Failures of crawler construction and of a single crawl
///
/// Callers branch on the variant, never on the message.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The root URL was empty or not an absolute URL with a host
    #[error("Invalid root URL '{0}'")]
    InvalidRootUrl(String),

    /// The URL is outside the root host; no request was made
    #[error("Cannot crawl URL outside the root host: {0}")]
    CannotCrawlUrl(String),

    /// The server answered 429 or 5xx; the request may succeed later
    #[error("Retryable status {status} for {url}")]
    RetryRequest { url: String, status: u16 },

    /// Any other non-2xx status or a transport failure
    #[error("Failed to crawl {url}: {message}")]
    Crawl { url: String, message: String },
}

impl CrawlError {
    /// Returns true if the failed item should go back to the queue
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryRequest { .. })
    }
}

/// Returns the status codes that make a crawl retryable
///
/// Always 101 entries: 429 first, then 500 through 599 ascending.
///
/// # Example
///
/// ```
/// use crawl_worker::crawler::retry_status_codes;
///
/// let codes = retry_status_codes();
/// assert_eq!(codes.len(), 101);
/// assert_eq!(codes[0], 429);
/// assert_eq!(codes[100], 599);
/// ```
pub fn retry_status_codes() -> Vec<u16> {
    std::iter::once(TOO_MANY_REQUESTS).chain(500..=599).collect()
}

/// Returns true if `status` is in the retry set
pub fn is_retry_status(status: u16) -> bool {
    status == TOO_MANY_REQUESTS || (500..=599).contains(&status)
}

/// Options for building the crawler's HTTP client
#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for CrawlerOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("crawl-worker/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&CrawlerConfig> for CrawlerOptions {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout: config.request_timeout(),
            ..Self::default()
        }
    }
}

/// Fetches pages from a single root host
///
/// Cloning is cheap: the underlying client shares its connection pool.
#[derive(Debug, Clone)]
pub struct Crawler {
    root_url: Url,
    root_host: String,
    client: Client,
}

impl Crawler {
    /// Creates a crawler for `root_url` with default client options
    ///
    /// # Errors
    ///
    /// `CrawlError::InvalidRootUrl` if the URL is empty, relative, or has
    /// no host.
    pub fn new(root_url: &str) -> Result<Self, CrawlError> {
        Self::with_options(root_url, &CrawlerOptions::default())
    }

    /// Creates a crawler from the `[crawler]` configuration section
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        Self::with_options(&config.root_url, &CrawlerOptions::from(config))
    }

    pub fn with_options(root_url: &str, options: &CrawlerOptions) -> Result<Self, CrawlError> {
        let root_url_str = root_url.trim();
        if root_url_str.is_empty() {
            return Err(CrawlError::InvalidRootUrl(root_url.to_string()));
        }

        let parsed =
            Url::parse(root_url_str).map_err(|_| CrawlError::InvalidRootUrl(root_url.to_string()))?;
        let root_host =
            extract_host(&parsed).ok_or_else(|| CrawlError::InvalidRootUrl(root_url.to_string()))?;

        let client = build_http_client(&root_host, options)
            .map_err(|e| CrawlError::InvalidRootUrl(format!("{}: {}", root_url, e)))?;

        Ok(Self {
            root_url: parsed,
            root_host,
            client,
        })
    }

    pub fn root_url(&self) -> &Url {
        &self.root_url
    }

    /// The lowercase host every crawled URL must share
    pub fn root_host(&self) -> &str {
        &self.root_host
    }

    /// Returns true if `url` may be fetched by this crawler
    pub fn accepts(&self, url: &Url) -> bool {
        is_same_host(url, &self.root_host)
    }

    /// Fetches `url` and classifies the outcome
    ///
    /// # Classification
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | Host differs from root host | `CannotCrawlUrl`, no request made |
    /// | HTTP 2xx | `Ok(CrawlerResponse)` with the full body |
    /// | HTTP 429, 5xx | `RetryRequest` |
    /// | Other status | `Crawl` |
    /// | Transport failure | `Crawl` |
    ///
    /// No retries happen here; retrying is the pipeline's decision.
    pub async fn crawl(&self, url: &str) -> Result<CrawlerResponse, CrawlError> {
        let target = match Url::parse(url) {
            Ok(target) if self.accepts(&target) => target,
            _ => return Err(CrawlError::CannotCrawlUrl(url.to_string())),
        };

        tracing::debug!(url = %target, "Fetching");

        let response = self
            .client
            .get(target.clone())
            .send()
            .await
            .map_err(|e| CrawlError::Crawl {
                url: url.to_string(),
                message: describe_transport_error(&e),
            })?;

        let status = response.status();

        if is_retry_status(status.as_u16()) {
            return Err(CrawlError::RetryRequest {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            return Err(CrawlError::Crawl {
                url: url.to_string(),
                message: format!("unexpected status {}", status),
            });
        }

        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| CrawlError::Crawl {
            url: url.to_string(),
            message: describe_transport_error(&e),
        })?;

        tracing::debug!(url = %target, bytes = body.len(), "Fetched");

        Ok(CrawlerResponse::new(body.to_vec(), headers))
    }
}

/// Builds an HTTP client that only follows redirects within `root_host`
///
/// An off-host redirect is not followed, so the 3xx response itself is
/// returned and classified as a crawl failure.
fn build_http_client(root_host: &str, options: &CrawlerOptions) -> Result<Client, reqwest::Error> {
    let host = root_host.to_string();
    let policy = Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if is_same_host(attempt.url(), &host) {
            attempt.follow()
        } else {
            attempt.stop()
        }
    });

    Client::builder()
        .user_agent(options.user_agent.as_str())
        .timeout(options.timeout)
        .connect_timeout(options.connect_timeout)
        .redirect(policy)
        .gzip(true)
        .brotli(true)
        .build()
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else if e.is_redirect() {
        "redirect limit exceeded".to_string()
    } else {
        e.to_string()
    }
}
