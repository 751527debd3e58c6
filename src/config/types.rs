use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the crawl worker
///
/// Built once at startup and handed to each component's constructor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Work queue (broker) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Connection URL of the broker
    #[serde(default = "default_broker_address")]
    pub address: String,

    /// Namespace the queue lives under
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Name of the work queue
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Identifier of this worker, used to name its in-flight list
    ///
    /// Must be unique among running workers. Defaults to `<hostname>-<pid>`.
    #[serde(rename = "worker-id", default = "default_worker_id")]
    pub worker_id: String,

    /// How long an idle consumer waits before polling again (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long a worker may go without a heartbeat before its in-flight
    /// deliveries are returned to the queue by its peers (seconds)
    #[serde(rename = "visibility-timeout-secs", default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
}

/// Dedup store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Connection URL of the dedup store
    #[serde(default = "default_dedup_address")]
    pub address: String,

    /// Prefix applied to every dedup key
    #[serde(rename = "key-prefix", default = "default_key_prefix")]
    pub key_prefix: String,

    /// Window during which a URL is not crawled again (seconds)
    #[serde(rename = "ttl-secs", default = "default_ttl")]
    pub ttl_secs: u64,

    /// How long an admitted URL is held for the worker crawling it (seconds)
    ///
    /// Completed URLs are remembered for `ttl-secs`. An admission that never
    /// completes is released after the lease, so a delivery replayed after
    /// a crash is crawled again.
    #[serde(rename = "lease-secs", default = "default_lease")]
    pub lease_secs: u64,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// The only scheme+host the crawler may fetch from
    #[serde(rename = "root-url", default = "default_root_url")]
    pub root_url: String,

    /// Path prefixes rejected at admission
    #[serde(rename = "blacklist-paths", default = "default_blacklist_paths")]
    pub blacklist_paths: Vec<String>,

    /// Directory responses are mirrored into; persistence is skipped when unset
    #[serde(rename = "mirror-root", default)]
    pub mirror_root: Option<PathBuf>,

    /// Overall timeout of a single fetch (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Pipeline sizing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Number of concurrent workers in each stage
    #[serde(rename = "workers-per-stage", default = "default_workers")]
    pub workers_per_stage: usize,

    /// Capacity of each bounded inter-stage queue
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often pipeline counters are logged (seconds, 0 disables)
    #[serde(rename = "progress-interval-secs", default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

impl DedupConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl BrokerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl CrawlerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: default_broker_address(),
            exchange: default_exchange(),
            queue: default_queue(),
            worker_id: default_worker_id(),
            poll_interval_ms: default_poll_interval(),
            visibility_timeout_secs: default_visibility_timeout(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            address: default_dedup_address(),
            key_prefix: default_key_prefix(),
            ttl_secs: default_ttl(),
            lease_secs: default_lease(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            root_url: default_root_url(),
            blacklist_paths: default_blacklist_paths(),
            mirror_root: None,
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers_per_stage: default_workers(),
            queue_capacity: default_queue_capacity(),
            progress_interval_secs: default_progress_interval(),
        }
    }
}

fn default_broker_address() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_exchange() -> String {
    "govuk_crawler_exchange".to_string()
}

fn default_queue() -> String {
    "govuk_crawler_queue".to_string()
}

/// Host name plus process id, so workers sharing a host stay distinct
fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "worker".to_string());
    format!("{}-{}", host.trim(), std::process::id())
}

fn default_poll_interval() -> u64 {
    500
}

fn default_visibility_timeout() -> u64 {
    60
}

fn default_dedup_address() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_key_prefix() -> String {
    "govuk_crawler_worker".to_string()
}

fn default_ttl() -> u64 {
    12 * 60 * 60
}

fn default_lease() -> u64 {
    10 * 60
}

fn default_root_url() -> String {
    "https://www.gov.uk/".to_string()
}

fn default_blacklist_paths() -> Vec<String> {
    vec!["/search".to_string(), "/government/uploads".to_string()]
}

fn default_request_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("crawl-worker/{}", env!("CARGO_PKG_VERSION"))
}

/// Defaults to every available core
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_queue_capacity() -> usize {
    100
}

fn default_progress_interval() -> u64 {
    60
}
