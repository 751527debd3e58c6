//! Worker pools over bounded queues
//!
//! Each stage is a pool of tasks sharing one inbound receiver. A worker
//! exits when the inbound queue is closed and drained; once every worker of
//! a stage has exited, the senders captured by its handler are dropped and
//! the next stage's queue closes in turn.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// A receiver that several workers take turns reading from
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Spawns `workers` tasks that feed every item from `rx` to `handler`
///
/// Items are processed one at a time per worker; a full downstream queue
/// suspends the worker inside `handler`, which is how backpressure reaches
/// upstream stages.
pub fn spawn_stage<T, F, Fut>(
    name: &'static str,
    workers: usize,
    rx: mpsc::Receiver<T>,
    handler: F,
) -> Vec<JoinHandle<()>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let shared: SharedReceiver<T> = Arc::new(Mutex::new(rx));

    (0..workers.max(1))
        .map(|worker| {
            let rx = Arc::clone(&shared);
            let handler = handler.clone();
            tokio::spawn(async move {
                tracing::trace!(stage = name, worker, "Worker started");
                while let Some(item) = next_item(&rx).await {
                    handler(item).await;
                }
                tracing::trace!(stage = name, worker, "Worker finished");
            })
        })
        .collect()
}

async fn next_item<T>(rx: &SharedReceiver<T>) -> Option<T> {
    rx.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_every_item_is_handled_once() {
        let (tx, rx) = mpsc::channel(4);
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let handles = spawn_stage("test", 3, rx, move |n: usize| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(n, Ordering::SeqCst);
            }
        });

        for n in 1..=10 {
            tx.send(n).await.unwrap();
        }
        drop(tx);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 55);
    }

    #[tokio::test]
    async fn test_downstream_closes_when_stage_finishes() {
        let (tx, rx) = mpsc::channel(1);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let handles = spawn_stage("double", 2, rx, move |n: u32| {
            let out_tx = out_tx.clone();
            async move {
                out_tx.send(n * 2).await.unwrap();
            }
        });

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        let mut results = Vec::new();
        while let Some(n) = out_rx.recv().await {
            results.push(n);
        }
        results.sort();
        assert_eq!(results, vec![2, 4]);

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_zero_workers_still_runs_one() {
        let (tx, rx) = mpsc::channel(1);
        let handles = spawn_stage("single", 0, rx, |_: ()| async {});
        assert_eq!(handles.len(), 1);
        drop(tx);
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
