use crate::config::types::{BrokerConfig, Config, CrawlerConfig, DedupConfig, PipelineSettings};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_broker_config(&config.broker)?;
    validate_dedup_config(&config.dedup)?;
    validate_crawler_config(&config.crawler)?;
    validate_pipeline_settings(&config.pipeline)?;
    Ok(())
}

fn validate_broker_config(config: &BrokerConfig) -> Result<(), ConfigError> {
    validate_connection_url("broker address", &config.address)?;

    if config.queue.is_empty() {
        return Err(ConfigError::Validation(
            "queue name cannot be empty".to_string(),
        ));
    }

    if config.worker_id.is_empty() {
        return Err(ConfigError::Validation(
            "worker_id cannot be empty".to_string(),
        ));
    }

    if config.poll_interval_ms < 1 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 1, got {}",
            config.poll_interval_ms
        )));
    }

    if config.visibility_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "visibility_timeout_secs must be >= 1, got {}",
            config.visibility_timeout_secs
        )));
    }

    Ok(())
}

fn validate_dedup_config(config: &DedupConfig) -> Result<(), ConfigError> {
    validate_connection_url("dedup address", &config.address)?;

    if config.ttl_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "ttl_secs must be >= 1, got {}",
            config.ttl_secs
        )));
    }

    if config.lease_secs < 1 || config.lease_secs > config.ttl_secs {
        return Err(ConfigError::Validation(format!(
            "lease_secs must be between 1 and ttl_secs ({}), got {}",
            config.ttl_secs, config.lease_secs
        )));
    }

    Ok(())
}

/// Validates crawler configuration
///
/// The root URL must be an absolute HTTP(S) URL with a host; blacklist
/// entries must be absolute paths.
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    let root = Url::parse(&config.root_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid root_url '{}': {}", config.root_url, e)))?;

    if root.scheme() != "http" && root.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "root_url '{}' must use http or https",
            config.root_url
        )));
    }

    if root.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "root_url '{}' has no host",
            config.root_url
        )));
    }

    for path in &config.blacklist_paths {
        if !path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "blacklist path '{}' must start with '/'",
                path
            )));
        }
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_secs must be >= 1, got {}",
            config.request_timeout_secs
        )));
    }

    Ok(())
}

fn validate_pipeline_settings(config: &PipelineSettings) -> Result<(), ConfigError> {
    if config.workers_per_stage < 1 || config.workers_per_stage > 1024 {
        return Err(ConfigError::Validation(format!(
            "workers_per_stage must be between 1 and 1024, got {}",
            config.workers_per_stage
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(format!(
            "queue_capacity must be >= 1, got {}",
            config.queue_capacity
        )));
    }

    Ok(())
}

fn validate_connection_url(field: &str, address: &str) -> Result<(), ConfigError> {
    let url = Url::parse(address)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, address, e)))?;

    if url.scheme() != "redis" && url.scheme() != "rediss" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use the redis:// or rediss:// scheme",
            field, address
        )));
    }

    Ok(())
}
