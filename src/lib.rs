//! Crawl-Worker: a distributed single-domain crawl worker
//!
//! This crate consumes URL work items from a shared queue, fetches each URL
//! from one configured root host, mirrors the response to disk, discovers
//! same-host links and feeds them back into the queue. Cooperating workers
//! coordinate only through the shared queue and a shared TTL dedup store.

pub mod config;
pub mod crawler;
pub mod dedup;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for worker operations
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] crawler::CrawlError),

    #[error("Dedup store error: {0}")]
    Dedup(#[from] dedup::DedupError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid environment override {name}: {message}")]
    InvalidEnv { name: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{retry_status_codes, CrawlError, Crawler, CrawlerResponse};
pub use dedup::{DedupStore, MemoryDedupStore, RedisDedupStore};
pub use pipeline::{Pipeline, PipelineConfig, PipelineHandle, PipelineStats, WorkItem};
pub use queue::{Delivery, DeliveryHandle, MemoryQueue, QueueGateway, RedisQueue};
pub use url::{normalize_url, Blacklist};
