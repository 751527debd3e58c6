//! Dedup store: a shared, TTL-expiring membership set of URL keys
//!
//! Presence of a key means some worker claimed or completed that URL within
//! the last TTL period. The atomic add-if-absent primitive is the only
//! synchronization between workers; nothing else is locked.

mod memory;
mod redis_store;

pub use memory::MemoryDedupStore;
pub use redis_store::RedisDedupStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur talking to the dedup store
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Dedup store connection failed: {0}")]
    Connection(String),

    #[error("Dedup store command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Dedup store unavailable")]
    Unavailable,
}

/// Result type for dedup store operations
pub type DedupResult<T> = Result<T, DedupError>;

/// Trait for dedup store backends
///
/// Implementations must be safe to call concurrently from many tasks and
/// many processes; `add_if_absent` must be atomic.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Claims `key` for `ttl`
    ///
    /// Returns `true` if the key was newly added, `false` if it was already
    /// present.
    async fn add_if_absent(&self, key: &str, ttl: Duration) -> DedupResult<bool>;

    /// Returns `true` if `key` is currently claimed
    async fn exists(&self, key: &str) -> DedupResult<bool>;

    /// Drops a claim before its TTL runs out
    async fn release(&self, key: &str) -> DedupResult<()>;

    /// Checks that the store is reachable
    async fn ping(&self) -> DedupResult<()>;
}
