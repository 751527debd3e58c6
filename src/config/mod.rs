//! Configuration module for the crawl worker
//!
//! Configuration comes from an optional TOML file, then environment
//! overrides, and is validated once before any component is built.
//!
//! # Example
//!
//! ```no_run
//! use crawl_worker::config::resolve_config;
//!
//! let config = resolve_config(None).unwrap();
//! println!("Crawling under {}", config.crawler.root_url);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{BrokerConfig, Config, CrawlerConfig, DedupConfig, PipelineSettings};

// Re-export parser functions
pub use parser::{apply_env_overrides, load_config, resolve_config, split_paths, with_redis_scheme};
pub use validation::validate;
