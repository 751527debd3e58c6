use crate::dedup::{DedupError, DedupResult, DedupStore};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::fmt;
use std::time::Duration;

/// Dedup store backed by Redis string keys with an expiry
///
/// Every key is stored as `<prefix>:<key>`. Claims use `SET NX EX`, which is
/// atomic on the server, so concurrent workers never both win a claim.
#[derive(Clone)]
pub struct RedisDedupStore {
    connection: MultiplexedConnection,
    address: String,
    prefix: String,
}

impl RedisDedupStore {
    /// Connects to Redis at `address` and verifies the connection with PING
    ///
    /// # Errors
    ///
    /// `DedupError::Connection` if the address is invalid or the server is
    /// unreachable. Callers treat this as fatal at startup.
    pub async fn connect(address: &str, prefix: &str) -> DedupResult<Self> {
        let client = redis::Client::open(address)
            .map_err(|e| DedupError::Connection(format!("{}: {}", address, e)))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DedupError::Connection(format!("{}: {}", address, e)))?;

        let store = Self {
            connection,
            address: address.to_string(),
            prefix: prefix.to_string(),
        };
        store
            .ping()
            .await
            .map_err(|e| DedupError::Connection(format!("{}: {}", address, e)))?;

        Ok(store)
    }

    fn namespaced(&self, key: &str) -> String {
        namespaced_key(&self.prefix, key)
    }
}

impl fmt::Debug for RedisDedupStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisDedupStore")
            .field("address", &self.address)
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn add_if_absent(&self, key: &str, ttl: Duration) -> DedupResult<bool> {
        let mut con = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.namespaced(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut con)
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> DedupResult<bool> {
        let mut con = self.connection.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(self.namespaced(key))
            .query_async(&mut con)
            .await?;
        Ok(count > 0)
    }

    async fn release(&self, key: &str) -> DedupResult<()> {
        let mut con = self.connection.clone();
        let _removed: i64 = redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> DedupResult<()> {
        let mut con = self.connection.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }
}

fn namespaced_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}
