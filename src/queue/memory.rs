use crate::queue::{Delivery, DeliveryHandle, QueueError, QueueGateway, QueueResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<(u64, String)>,
    in_flight: HashMap<u64, String>,
    next_tag: u64,
    closed: bool,
    acked: Vec<String>,
    rejected: Vec<(String, bool)>,
    published: Vec<String>,
}

/// In-process queue gateway
///
/// Behaves like a broker for the messages pushed into it: deliveries stay
/// in flight until acknowledged, and requeued rejects go to the back of the
/// queue. Published URLs are recorded rather than redelivered.
#[derive(Debug)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    poll_interval: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Enqueues a message and returns its delivery tag
    pub fn push(&self, url: impl Into<String>) -> u64 {
        let tag = {
            let mut state = self.lock();
            let tag = state.next_tag;
            state.next_tag += 1;
            state.ready.push_back((tag, url.into()));
            tag
        };
        self.notify.notify_one();
        tag
    }

    /// Stops delivering once the ready list is drained
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// URLs of acknowledged deliveries, in acknowledgment order
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    /// URLs of rejected deliveries with their requeue flag
    pub fn rejected(&self) -> Vec<(String, bool)> {
        self.lock().rejected.clone()
    }

    /// URLs published for future crawling
    pub fn published(&self) -> Vec<String> {
        self.lock().published.clone()
    }

    /// Returns every unacknowledged delivery to the ready list, as a broker
    /// does when a consumer dies
    ///
    /// Returns the recovered URLs in delivery order.
    pub fn recover_in_flight(&self) -> Vec<String> {
        let recovered = {
            let mut state = self.lock();
            let mut in_flight: Vec<(u64, String)> = state.in_flight.drain().collect();
            in_flight.sort_by_key(|(tag, _)| *tag);
            let urls: Vec<String> = in_flight.iter().map(|(_, url)| url.clone()).collect();
            state.ready.extend(in_flight);
            urls
        };
        if !recovered.is_empty() {
            self.notify.notify_waiters();
        }
        recovered
    }

    pub fn pending_len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn settle(&self, handle: &DeliveryHandle) -> Option<String> {
        self.lock().in_flight.remove(&handle.tag())
    }
}

#[async_trait]
impl QueueGateway for MemoryQueue {
    async fn next_delivery(&self) -> QueueResult<Option<Delivery>> {
        {
            let mut state = self.lock();
            if let Some((tag, url)) = state.ready.pop_front() {
                state.in_flight.insert(tag, url.clone());
                let handle = DeliveryHandle::new(tag, url.clone());
                return Ok(Some(Delivery::new(url, handle)));
            }
            if state.closed {
                return Err(QueueError::Closed);
            }
        }

        let _ = tokio::time::timeout(self.poll_interval, self.notify.notified()).await;
        Ok(None)
    }

    async fn ack(&self, handle: DeliveryHandle) -> QueueResult<()> {
        if let Some(url) = self.settle(&handle) {
            self.lock().acked.push(url);
        }
        Ok(())
    }

    async fn reject(&self, handle: DeliveryHandle, requeue: bool) -> QueueResult<()> {
        if let Some(url) = self.settle(&handle) {
            let mut state = self.lock();
            state.rejected.push((url.clone(), requeue));
            if requeue {
                state.ready.push_back((handle.tag(), url));
            }
        }
        if requeue {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn publish(&self, url: &str) -> QueueResult<()> {
        self.lock().published.push(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_lifecycle() {
        let queue = MemoryQueue::new();
        queue.push("https://example.test/a");

        let delivery = queue.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.url, "https://example.test/a");
        assert_eq!(queue.in_flight_len(), 1);

        queue.ack(delivery.handle).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.acked(), vec!["https://example.test/a"]);
    }

    #[tokio::test]
    async fn test_requeue_makes_delivery_available_again() {
        let queue = MemoryQueue::new();
        queue.push("https://example.test/a");

        let delivery = queue.next_delivery().await.unwrap().unwrap();
        queue.reject(delivery.handle, true).await.unwrap();
        assert_eq!(queue.pending_len(), 1);

        let again = queue.next_delivery().await.unwrap().unwrap();
        assert_eq!(again.url, "https://example.test/a");
        assert_eq!(
            queue.rejected(),
            vec![("https://example.test/a".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_reject_without_requeue_discards() {
        let queue = MemoryQueue::new();
        queue.push("https://example.test/a");

        let delivery = queue.next_delivery().await.unwrap().unwrap();
        queue.reject(delivery.handle, false).await.unwrap();
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_polls_none_then_closes() {
        let queue = MemoryQueue::new();
        assert!(queue.next_delivery().await.unwrap().is_none());

        queue.close();
        assert!(matches!(queue.next_delivery().await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_recover_returns_unacknowledged_deliveries() {
        let queue = MemoryQueue::new();
        queue.push("https://example.test/a");
        queue.push("https://example.test/b");
        queue.push("https://example.test/c");

        let a = queue.next_delivery().await.unwrap().unwrap();
        let b = queue.next_delivery().await.unwrap().unwrap();
        queue.ack(a.handle).await.unwrap();
        drop(b);

        assert_eq!(queue.recover_in_flight(), vec!["https://example.test/b"]);
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.pending_len(), 2);

        let c = queue.next_delivery().await.unwrap().unwrap();
        let replay = queue.next_delivery().await.unwrap().unwrap();
        assert_eq!(c.url, "https://example.test/c");
        assert_eq!(replay.url, "https://example.test/b");
    }

    #[tokio::test]
    async fn test_publish_is_recorded() {
        let queue = MemoryQueue::new();
        queue.publish("https://example.test/new").await.unwrap();
        assert_eq!(queue.published(), vec!["https://example.test/new"]);
        assert_eq!(queue.pending_len(), 0);
    }
}
