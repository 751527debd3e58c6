//! End-to-end runs of the pipeline against a mock root site

use crawl_worker::pipeline::{Pipeline, PipelineConfig, PipelineHandle};
use crawl_worker::queue::consume;
use crawl_worker::storage::MirrorWriter;
use crawl_worker::{Blacklist, Crawler, MemoryDedupStore, MemoryQueue};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Worker {
    queue: Arc<MemoryQueue>,
    dedup: Arc<MemoryDedupStore>,
    handle: PipelineHandle,
    consumer: JoinHandle<()>,
}

impl Worker {
    /// Starts a worker against `root` with `/search` blacklisted
    fn start(root: &str, mirror: &TempDir) -> Self {
        let queue = Arc::new(MemoryQueue::new());
        let dedup = Arc::new(MemoryDedupStore::new());

        let pipeline = Pipeline::new(
            PipelineConfig {
                workers_per_stage: 2,
                queue_capacity: 8,
                dedup_ttl: Duration::from_secs(60),
                admission_lease: Duration::from_secs(60),
            },
            queue.clone(),
            dedup.clone(),
            Crawler::new(root).expect("Failed to build crawler"),
        )
        .with_blacklist(Blacklist::from_csv("/search"))
        .with_mirror(Some(MirrorWriter::new(mirror.path())));

        let (deliveries, consumer) = consume(queue.clone(), 8);
        let handle = pipeline.spawn(deliveries);

        Self {
            queue,
            dedup,
            handle,
            consumer,
        }
    }

    /// Closes the queue and waits for every stage to drain
    async fn finish(self) -> (Arc<MemoryQueue>, Arc<MemoryDedupStore>) {
        self.queue.close();
        self.consumer.await.expect("Consumer panicked");
        self.handle.join().await;
        (self.queue, self.dedup)
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Timed out waiting for pipeline");
}

#[tokio::test]
async fn test_blacklisted_delivery_touches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mirror = TempDir::new().unwrap();
    let worker = Worker::start(&server.uri(), &mirror);
    let url = format!("{}/search/x", server.uri());
    worker.queue.push(&url);

    let (queue, dedup) = worker.finish().await;

    assert_eq!(queue.acked(), vec![url]);
    assert_eq!(dedup.calls(), 0);
    assert!(queue.published().is_empty());
}

#[tokio::test]
async fn test_page_is_persisted_extracted_and_acknowledged() {
    let server = MockServer::start().await;
    let root = server.uri();

    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Page</title></head>
<body>
    <a href="{root}/other">Other</a>
    <a href="/search?q=tax">Search</a>
    <a href="https://elsewhere.test/away">Away</a>
</body>
</html>"#,
        root = root
    );

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let mirror = TempDir::new().unwrap();
    let worker = Worker::start(&root, &mirror);
    worker.queue.push(format!("{}/search/x", root));
    worker.queue.push(format!("{}/page", root));

    let (queue, _dedup) = worker.finish().await;

    let host_dir = url::Url::parse(&root)
        .map(|u| format!("{}_{}", u.host_str().unwrap(), u.port().unwrap()))
        .unwrap();
    let written =
        std::fs::read_to_string(mirror.path().join(host_dir).join("page/index.html")).unwrap();
    assert_eq!(written, body);

    let mut published = queue.published();
    published.sort();
    assert_eq!(
        published,
        vec![format!("{}/other", root), format!("{}/search?q=tax", root)]
    );

    let acked = queue.acked();
    assert_eq!(acked.len(), 2);
    assert!(acked.contains(&format!("{}/page", root)));
    assert!(acked.contains(&format!("{}/search/x", root)));
    assert!(queue.rejected().is_empty());
}

#[tokio::test]
async fn test_retryable_failure_is_crawled_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let mirror = TempDir::new().unwrap();
    let worker = Worker::start(&server.uri(), &mirror);
    let url = format!("{}/flaky", server.uri());
    worker.queue.push(&url);

    let queue = worker.queue.clone();
    wait_for(|| !queue.acked().is_empty()).await;

    let (queue, _dedup) = worker.finish().await;
    assert_eq!(queue.rejected(), vec![(url.clone(), true)]);
    assert_eq!(queue.acked(), vec![url]);
}

#[tokio::test]
async fn test_duplicate_deliveries_crawl_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let mirror = TempDir::new().unwrap();
    let worker = Worker::start(&server.uri(), &mirror);
    for _ in 0..3 {
        worker.queue.push(format!("{}/page", server.uri()));
    }

    let (queue, _dedup) = worker.finish().await;
    assert_eq!(queue.acked().len(), 3);
    assert_eq!(queue.in_flight_len(), 0);
}

#[tokio::test]
async fn test_links_found_on_many_pages_are_published_once() {
    let server = MockServer::start().await;
    let root = server.uri();
    let body = format!(r#"<html><body><a href="{}/shared">Shared</a></body></html>"#, root);

    for page in ["/one", "/two", "/three"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .mount(&server)
            .await;
    }

    let mirror = TempDir::new().unwrap();
    let worker = Worker::start(&root, &mirror);
    for page in ["/one", "/two", "/three"] {
        worker.queue.push(format!("{}{}", root, page));
    }

    let (queue, _dedup) = worker.finish().await;
    assert_eq!(queue.published(), vec![format!("{}/shared", root)]);
    assert_eq!(queue.acked().len(), 3);
}

#[tokio::test]
async fn test_parent_and_child_pages_are_both_mirrored() {
    let server = MockServer::start().await;
    let root = server.uri();
    for (page, body) in [("/government", "parent"), ("/government/news", "child")] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;
    }

    let mirror = TempDir::new().unwrap();
    let worker = Worker::start(&root, &mirror);
    worker.queue.push(format!("{}/government/news", root));
    worker.queue.push(format!("{}/government", root));

    let (queue, _dedup) = worker.finish().await;

    let host_dir = url::Url::parse(&root)
        .map(|u| format!("{}_{}", u.host_str().unwrap(), u.port().unwrap()))
        .unwrap();
    let site = mirror.path().join(host_dir);
    assert_eq!(
        std::fs::read_to_string(site.join("government/index.html")).unwrap(),
        "parent"
    );
    assert_eq!(
        std::fs::read_to_string(site.join("government/news/index.html")).unwrap(),
        "child"
    );
    assert_eq!(queue.acked().len(), 2);
    assert_eq!(queue.rejected().len(), 0);
}
