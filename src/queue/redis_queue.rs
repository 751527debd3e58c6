use crate::config::BrokerConfig;
use crate::queue::{Delivery, DeliveryHandle, QueueError, QueueGateway, QueueResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::fmt;
use std::time::Duration;

/// Work queue on Redis lists using the reliable-queue pattern
///
/// - Ready list `<exchange>:<queue>`: producers `LPUSH`, consumers pop from
///   the right.
/// - In-flight list `<exchange>:<queue>:processing:<worker-id>`: a popped
///   message is atomically moved here (`RPOPLPUSH`) and stays until it is
///   acknowledged (`LREM`) or rejected.
///
/// Each worker refreshes a heartbeat key `<exchange>:<queue>:heartbeat:<worker-id>`
/// that expires after the visibility timeout. Messages left in the
/// in-flight list of a worker whose heartbeat has lapsed are moved back by
/// any peer through [`RedisQueue::reap_stale`]. A worker restarting under
/// the same id moves its own back with [`RedisQueue::recover_in_flight`].
#[derive(Clone)]
pub struct RedisQueue {
    connection: MultiplexedConnection,
    address: String,
    ready_key: String,
    processing_key: String,
    heartbeat_key: String,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl RedisQueue {
    /// Connects to the broker described by `config`
    ///
    /// # Errors
    ///
    /// `QueueError::Connection` if the address is invalid or the server is
    /// unreachable. Callers treat this as fatal at startup.
    pub async fn connect(config: &BrokerConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.address.as_str())
            .map_err(|e| QueueError::Connection(format!("{}: {}", config.address, e)))?;
        let mut connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(format!("{}: {}", config.address, e)))?;

        let _pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| QueueError::Connection(format!("{}: {}", config.address, e)))?;

        let (ready_key, processing_key) =
            queue_keys(&config.exchange, &config.queue, &config.worker_id);
        let heartbeat_key = heartbeat_key(&ready_key, &config.worker_id);

        Ok(Self {
            connection,
            address: config.address.clone(),
            ready_key,
            processing_key,
            heartbeat_key,
            poll_interval: config.poll_interval(),
            visibility_timeout: config.visibility_timeout(),
        })
    }

    /// Moves this worker's unacknowledged messages back to the ready list
    ///
    /// Returns the recovered payloads.
    pub async fn recover_in_flight(&self) -> QueueResult<Vec<String>> {
        let recovered = self.drain_to_ready(&self.processing_key).await?;

        if !recovered.is_empty() {
            tracing::info!(
                recovered = recovered.len(),
                queue = %self.ready_key,
                "Returned unacknowledged deliveries to the queue"
            );
        }

        Ok(recovered)
    }

    /// Marks this worker alive for one visibility timeout
    pub async fn heartbeat(&self) -> QueueResult<()> {
        let mut con = self.connection.clone();
        let () = redis::cmd("SET")
            .arg(&self.heartbeat_key)
            .arg(1)
            .arg("EX")
            .arg(self.visibility_timeout.as_secs().max(1))
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    /// Returns the in-flight messages of workers whose heartbeat has lapsed
    /// to the ready list
    ///
    /// Returns the recovered payloads.
    pub async fn reap_stale(&self) -> QueueResult<Vec<String>> {
        let mut con = self.connection.clone();
        let pattern = format!("{}:processing:*", self.ready_key);

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut recovered = Vec::new();
        for (list, heartbeat) in reap_candidates(&self.ready_key, &self.processing_key, &keys) {
            let alive: bool = redis::cmd("EXISTS")
                .arg(&heartbeat)
                .query_async(&mut con)
                .await?;
            if alive {
                continue;
            }

            let moved = self.drain_to_ready(&list).await?;
            if !moved.is_empty() {
                tracing::warn!(
                    list = %list,
                    recovered = moved.len(),
                    "Returned deliveries of a stale worker to the queue"
                );
            }
            recovered.extend(moved);
        }

        Ok(recovered)
    }

    /// How often the heartbeat is refreshed and stale workers are reaped
    pub fn maintenance_interval(&self) -> Duration {
        (self.visibility_timeout / 3).max(Duration::from_secs(1))
    }

    async fn drain_to_ready(&self, list: &str) -> QueueResult<Vec<String>> {
        let mut con = self.connection.clone();
        let mut moved = Vec::new();

        loop {
            let payload: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(list)
                .arg(&self.ready_key)
                .query_async(&mut con)
                .await?;
            match payload {
                Some(payload) => moved.push(payload),
                None => break,
            }
        }

        Ok(moved)
    }

    /// Number of messages waiting in the ready list
    pub async fn pending_len(&self) -> QueueResult<usize> {
        let mut con = self.connection.clone();
        let len: usize = con.llen(&self.ready_key).await?;
        Ok(len)
    }
}

impl fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueue")
            .field("address", &self.address)
            .field("ready_key", &self.ready_key)
            .field("processing_key", &self.processing_key)
            .field("heartbeat_key", &self.heartbeat_key)
            .finish()
    }
}

#[async_trait]
impl QueueGateway for RedisQueue {
    async fn next_delivery(&self) -> QueueResult<Option<Delivery>> {
        let mut con = self.connection.clone();
        let payload: Option<String> = redis::cmd("RPOPLPUSH")
            .arg(&self.ready_key)
            .arg(&self.processing_key)
            .query_async(&mut con)
            .await?;

        match payload {
            Some(payload) => {
                let handle = DeliveryHandle::new(0, payload.clone());
                Ok(Some(Delivery::new(payload, handle)))
            }
            None => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(None)
            }
        }
    }

    async fn ack(&self, handle: DeliveryHandle) -> QueueResult<()> {
        let mut con = self.connection.clone();
        let _removed: i64 = con
            .lrem(&self.processing_key, 1, handle.payload())
            .await?;
        Ok(())
    }

    async fn reject(&self, handle: DeliveryHandle, requeue: bool) -> QueueResult<()> {
        let mut con = self.connection.clone();
        let pipe = reject_pipeline(
            &self.processing_key,
            &self.ready_key,
            handle.payload(),
            requeue,
        );
        let () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    async fn publish(&self, url: &str) -> QueueResult<()> {
        let mut con = self.connection.clone();
        let _len: i64 = con.lpush(&self.ready_key, url).await?;
        Ok(())
    }
}

/// Builds the ready and in-flight list keys for a worker
fn queue_keys(exchange: &str, queue: &str, worker_id: &str) -> (String, String) {
    let ready = if exchange.is_empty() {
        queue.to_string()
    } else {
        format!("{}:{}", exchange, queue)
    };
    let processing = format!("{}:processing:{}", ready, worker_id);
    (ready, processing)
}

fn heartbeat_key(ready: &str, worker_id: &str) -> String {
    format!("{}:heartbeat:{}", ready, worker_id)
}

/// Pairs every other worker's in-flight list with that worker's heartbeat key
fn reap_candidates(ready: &str, own_list: &str, keys: &[String]) -> Vec<(String, String)> {
    let prefix = format!("{}:processing:", ready);
    keys.iter()
        .filter(|key| key.as_str() != own_list)
        .filter_map(|key| {
            let worker_id = key.strip_prefix(&prefix)?;
            if worker_id.is_empty() {
                return None;
            }
            Some((key.clone(), heartbeat_key(ready, worker_id)))
        })
        .collect()
}

/// Removes a message from the in-flight list and, when `requeue` is set,
/// puts it back on the ready list in one transaction
fn reject_pipeline(processing: &str, ready: &str, payload: &str, requeue: bool) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .cmd("LREM")
        .arg(processing)
        .arg(1)
        .arg(payload)
        .ignore();
    if requeue {
        pipe.cmd("LPUSH").arg(ready).arg(payload).ignore();
    }
    pipe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keys() {
        let (ready, processing) =
            queue_keys("govuk_crawler_exchange", "govuk_crawler_queue", "worker-1");
        assert_eq!(ready, "govuk_crawler_exchange:govuk_crawler_queue");
        assert_eq!(
            processing,
            "govuk_crawler_exchange:govuk_crawler_queue:processing:worker-1"
        );
    }

    #[test]
    fn test_queue_keys_without_exchange() {
        let (ready, processing) = queue_keys("", "pages", "w");
        assert_eq!(ready, "pages");
        assert_eq!(processing, "pages:processing:w");
    }

    #[test]
    fn test_heartbeat_key() {
        assert_eq!(heartbeat_key("ex:q", "host-42"), "ex:q:heartbeat:host-42");
    }

    #[test]
    fn test_reap_candidates_skip_own_list() {
        let keys = vec![
            "ex:q:processing:me".to_string(),
            "ex:q:processing:peer-1".to_string(),
            "ex:q:processing:peer-2".to_string(),
            "ex:q:processing:".to_string(),
            "other:q:processing:peer-3".to_string(),
        ];

        let candidates = reap_candidates("ex:q", "ex:q:processing:me", &keys);

        assert_eq!(
            candidates,
            vec![
                (
                    "ex:q:processing:peer-1".to_string(),
                    "ex:q:heartbeat:peer-1".to_string()
                ),
                (
                    "ex:q:processing:peer-2".to_string(),
                    "ex:q:heartbeat:peer-2".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_reject_with_requeue_removes_and_pushes_back() {
        let pipe = reject_pipeline("q:processing:w", "q", "https://example.test/a", true);
        let packed = String::from_utf8_lossy(&pipe.get_packed_pipeline()).into_owned();

        let lrem = packed.find("LREM").expect("LREM missing");
        let lpush = packed.find("LPUSH").expect("LPUSH missing");
        assert!(lrem < lpush);
        assert!(packed.contains("MULTI"));
        assert!(packed.contains("EXEC"));
        assert!(packed.contains("q:processing:w"));
        assert_eq!(packed.matches("https://example.test/a").count(), 2);
    }

    #[test]
    fn test_reject_without_requeue_only_removes() {
        let pipe = reject_pipeline("q:processing:w", "q", "https://example.test/a", false);
        let packed = String::from_utf8_lossy(&pipe.get_packed_pipeline()).into_owned();

        assert!(packed.contains("LREM"));
        assert!(!packed.contains("LPUSH"));
        assert_eq!(packed.matches("https://example.test/a").count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_to_connect() {
        let config = BrokerConfig {
            address: "redis://127.0.0.1:1/".to_string(),
            ..BrokerConfig::default()
        };
        let result = RedisQueue::connect(&config).await;
        assert!(matches!(result, Err(QueueError::Connection(_))));
    }
}
