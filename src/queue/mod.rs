//! Queue gateway: the shared work queue workers consume from and publish to
//!
//! A delivery stays unacknowledged until the pipeline has fully processed
//! it. Any delivery that is never acknowledged (for example because the
//! worker crashed) is replayed by the broker, so every stage must be safe to
//! run again for the same URL.

mod memory;
mod redis_queue;

pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Delay before consuming again after a broker error
const CONSUME_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Errors that can occur talking to the broker
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Broker command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("Queue is closed")]
    Closed,
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Opaque token identifying one delivery to the broker
///
/// Not `Clone`: acknowledging or rejecting consumes the handle, so a
/// delivery is settled at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct DeliveryHandle {
    tag: u64,
    payload: String,
}

impl DeliveryHandle {
    pub fn new(tag: u64, payload: impl Into<String>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// The raw message body as received from the broker
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// A single unit of work received from the broker
#[derive(Debug)]
pub struct Delivery {
    pub url: String,
    pub handle: DeliveryHandle,
}

impl Delivery {
    pub fn new(url: impl Into<String>, handle: DeliveryHandle) -> Self {
        Self {
            url: url.into(),
            handle,
        }
    }
}

/// Trait for broker backends
///
/// Every method must be safe to call concurrently from different stages.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Takes the next delivery, or `None` if none arrived within the poll
    /// interval. Returns `QueueError::Closed` once no more can ever arrive.
    async fn next_delivery(&self) -> QueueResult<Option<Delivery>>;

    /// Marks a delivery as definitively processed
    async fn ack(&self, handle: DeliveryHandle) -> QueueResult<()>;

    /// Gives a delivery back; with `requeue` it will be delivered again
    async fn reject(&self, handle: DeliveryHandle, requeue: bool) -> QueueResult<()>;

    /// Publishes a URL for future crawling
    async fn publish(&self, url: &str) -> QueueResult<()>;
}

/// Starts consuming deliveries into a bounded channel
///
/// The returned receiver yields deliveries until the gateway reports
/// `Closed` or the receiver is dropped. Transient broker errors are logged
/// and consumption resumes after a short backoff. A full channel stops
/// consumption, so a slow pipeline throttles the broker read rate.
pub fn consume(
    gateway: Arc<dyn QueueGateway>,
    capacity: usize,
) -> (mpsc::Receiver<Delivery>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let handle = tokio::spawn(async move {
        loop {
            match gateway.next_delivery().await {
                Ok(Some(delivery)) => {
                    if let Err(returned) = tx.send(delivery).await {
                        // Nobody is reading any more; give the message back
                        let delivery = returned.0;
                        if let Err(e) = gateway.reject(delivery.handle, true).await {
                            tracing::warn!(url = %delivery.url, "Failed to return delivery: {}", e);
                        }
                        break;
                    }
                }
                Ok(None) => continue,
                Err(QueueError::Closed) => {
                    tracing::info!("Delivery source closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to consume from queue: {}", e);
                    tokio::time::sleep(CONSUME_ERROR_BACKOFF).await;
                }
            }
        }
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consume_yields_deliveries_in_order() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("https://example.test/a");
        queue.push("https://example.test/b");
        queue.close();

        let (mut rx, handle) = consume(queue.clone(), 4);
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.url, "https://example.test/a");
        assert_eq!(second.url, "https://example.test/b");
        assert!(rx.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_returns_delivery_when_receiver_dropped() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("https://example.test/a");

        let (rx, handle) = consume(queue.clone(), 1);
        drop(rx);
        handle.await.unwrap();

        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_handle_accessors() {
        let handle = DeliveryHandle::new(7, "https://example.test/");
        assert_eq!(handle.tag(), 7);
        assert_eq!(handle.payload(), "https://example.test/");
    }
}
