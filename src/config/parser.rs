use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use std::path::{Path, PathBuf};

/// Loads and parses a configuration file from the given path
///
/// Missing sections and fields fall back to their defaults. The result is
/// validated before it is returned.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use crawl_worker::config::load_config;
///
/// let config = load_config(Path::new("worker.toml")).unwrap();
/// println!("Root URL: {}", config.crawler.root_url);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Builds the process configuration
///
/// Reads `path` when given (defaults otherwise), applies environment
/// overrides from the process environment, then validates the result.
pub fn resolve_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Applies environment overrides on top of a configuration
///
/// `lookup` returns the value of a variable, if set. Empty values are
/// treated as unset, except for `MIRROR_ROOT` where empty disables mirroring.
///
/// `AMQP_ADDRESS`, `AMQP_EXCHANGE` and `AMQP_MESSAGE_QUEUE` are accepted as
/// aliases of the `QUEUE_*` variables, which win when both are set. Broker
/// and dedup addresses given as a bare `host:port` get the `redis://` scheme.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let get_either = |name: &str, alias: &str| get(name).or_else(|| get(alias));

    if let Some(v) = get_either("QUEUE_ADDRESS", "AMQP_ADDRESS") {
        config.broker.address = with_redis_scheme(&v);
    }
    if let Some(v) = get_either("QUEUE_EXCHANGE", "AMQP_EXCHANGE") {
        config.broker.exchange = v;
    }
    if let Some(v) = get_either("QUEUE_NAME", "AMQP_MESSAGE_QUEUE") {
        config.broker.queue = v;
    }
    if let Some(v) = get("WORKER_ID") {
        config.broker.worker_id = v;
    }
    if let Some(v) = get("REDIS_ADDRESS") {
        config.dedup.address = with_redis_scheme(&v);
    }
    if let Some(v) = get("REDIS_KEY_PREFIX") {
        config.dedup.key_prefix = v;
    }
    if let Some(v) = get("DEDUP_TTL_SECS") {
        config.dedup.ttl_secs = parse_number("DEDUP_TTL_SECS", &v)?;
    }
    if let Some(v) = get("DEDUP_LEASE_SECS") {
        config.dedup.lease_secs = parse_number("DEDUP_LEASE_SECS", &v)?;
    }
    if let Some(v) = get("ROOT_URL") {
        config.crawler.root_url = v;
    }
    if let Some(v) = get("BLACKLIST_PATHS") {
        config.crawler.blacklist_paths = split_paths(&v);
    }
    if let Some(v) = lookup("MIRROR_ROOT") {
        let v = v.trim();
        config.crawler.mirror_root = if v.is_empty() {
            None
        } else {
            Some(PathBuf::from(v))
        };
    }
    if let Some(v) = get("WORKERS_PER_STAGE") {
        config.pipeline.workers_per_stage = parse_number("WORKERS_PER_STAGE", &v)?;
    }

    Ok(())
}

/// Prefixes `redis://` onto an address that has no scheme, e.g. `127.0.0.1:6379`
pub fn with_redis_scheme(address: &str) -> String {
    let address = address.trim();
    if address.contains("://") {
        address.to_string()
    } else {
        format!("redis://{}", address)
    }
}

/// Splits a comma-separated path list, trimming entries and dropping empties
pub fn split_paths(paths: &str) -> Vec<String> {
    paths
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnv {
            name: name.to_string(),
            message: e.to_string(),
        })
}
