//! Crawl pipeline
//!
//! Five stages connected by bounded queues:
//!
//! ```text
//! deliveries -> read -> crawl -> persist -> extract -+-> publish
//!                                                    +-> acknowledge
//! ```
//!
//! Each stage is a pool of workers. A full queue suspends the stage feeding
//! it, so a slow disk or server throttles consumption from the broker. When
//! the delivery stream ends, every stage drains and closes its outbound
//! queues, and the pipeline finishes.

mod item;
mod stages;
mod stats;
mod workers;

pub use item::{ItemState, WorkItem};
pub use stages::{
    acknowledge_item, admission_key, admit, crawl_item, done_key, extract_item, persist_item,
    publish_key, publish_url, release_admissions, return_item, Disposition, PublishOutcome,
    StageContext,
};
pub use stats::{PipelineStats, StatsSnapshot};
pub use workers::{spawn_stage, SharedReceiver};

use crate::config::Config;
use crate::crawler::Crawler;
use crate::dedup::DedupStore;
use crate::queue::{Delivery, QueueGateway};
use crate::storage::MirrorWriter;
use crate::url::Blacklist;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sizing of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workers in each stage's pool
    pub workers_per_stage: usize,
    /// Capacity of every inter-stage queue
    pub queue_capacity: usize,
    /// Lifetime of completion records and publish claims
    pub dedup_ttl: Duration,
    /// Lifetime of an admission claim that is never completed
    pub admission_lease: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers_per_stage: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            queue_capacity: 100,
            dedup_ttl: Duration::from_secs(12 * 60 * 60),
            admission_lease: Duration::from_secs(10 * 60),
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        Self {
            workers_per_stage: config.pipeline.workers_per_stage,
            queue_capacity: config.pipeline.queue_capacity,
            dedup_ttl: config.dedup.ttl(),
            admission_lease: config.dedup.lease(),
        }
    }
}

/// A configured but not yet running pipeline
pub struct Pipeline {
    config: PipelineConfig,
    context: StageContext,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<dyn QueueGateway>,
        dedup: Arc<dyn DedupStore>,
        crawler: Crawler,
    ) -> Self {
        let context = StageContext {
            gateway,
            dedup,
            crawler,
            blacklist: Blacklist::default(),
            mirror: None,
            dedup_ttl: config.dedup_ttl,
            admission_lease: config.admission_lease,
            stats: Arc::new(PipelineStats::new()),
        };
        Self { config, context }
    }

    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.context.blacklist = blacklist;
        self
    }

    /// Persists bodies under `mirror`; without one the persist stage only
    /// forwards items
    pub fn with_mirror(mut self, mirror: Option<MirrorWriter>) -> Self {
        self.context.mirror = mirror;
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.context.stats)
    }

    /// Starts every stage, reading from `deliveries`
    pub fn spawn(self, deliveries: mpsc::Receiver<Delivery>) -> PipelineHandle {
        let Self { config, context } = self;
        let ctx = Arc::new(context);
        let workers = config.workers_per_stage;
        let capacity = config.queue_capacity.max(1);

        tracing::info!(workers, capacity, "Starting pipeline");

        let (crawl_tx, crawl_rx) = mpsc::channel::<WorkItem>(capacity);
        let (persist_tx, persist_rx) = mpsc::channel::<WorkItem>(capacity);
        let (extract_tx, extract_rx) = mpsc::channel::<WorkItem>(capacity);
        let (publish_tx, publish_rx) = mpsc::channel::<String>(capacity);
        let (ack_tx, ack_rx) = mpsc::channel::<WorkItem>(capacity);

        let mut tasks = Vec::new();

        let stage_ctx = Arc::clone(&ctx);
        tasks.extend(spawn_stage("read", workers, deliveries, move |delivery: Delivery| {
            let ctx = Arc::clone(&stage_ctx);
            let tx = crawl_tx.clone();
            async move {
                if let Disposition::Forward(item) = admit(&ctx, delivery).await {
                    forward(&ctx, &tx, item).await;
                }
            }
        }));

        let stage_ctx = Arc::clone(&ctx);
        tasks.extend(spawn_stage("crawl", workers, crawl_rx, move |item: WorkItem| {
            let ctx = Arc::clone(&stage_ctx);
            let tx = persist_tx.clone();
            async move {
                if let Disposition::Forward(item) = crawl_item(&ctx, item).await {
                    forward(&ctx, &tx, item).await;
                }
            }
        }));

        let stage_ctx = Arc::clone(&ctx);
        tasks.extend(spawn_stage("persist", workers, persist_rx, move |item: WorkItem| {
            let ctx = Arc::clone(&stage_ctx);
            let tx = extract_tx.clone();
            async move {
                if let Disposition::Forward(item) = persist_item(&ctx, item).await {
                    forward(&ctx, &tx, item).await;
                }
            }
        }));

        let stage_ctx = Arc::clone(&ctx);
        tasks.extend(spawn_stage("extract", workers, extract_rx, move |item: WorkItem| {
            let ctx = Arc::clone(&stage_ctx);
            let links_tx = publish_tx.clone();
            let ack_tx = ack_tx.clone();
            async move {
                let (links, item) = extract_item(&ctx, item);
                for link in links {
                    if links_tx.send(link).await.is_err() {
                        tracing::warn!(url = %item.url, "Publish stage closed, discarding links");
                        break;
                    }
                }
                forward(&ctx, &ack_tx, item).await;
            }
        }));

        let stage_ctx = Arc::clone(&ctx);
        tasks.extend(spawn_stage("publish", workers, publish_rx, move |url: String| {
            let ctx = Arc::clone(&stage_ctx);
            async move {
                publish_url(&ctx, &url).await;
            }
        }));

        let stage_ctx = Arc::clone(&ctx);
        tasks.extend(spawn_stage("acknowledge", workers, ack_rx, move |item: WorkItem| {
            let ctx = Arc::clone(&stage_ctx);
            async move {
                acknowledge_item(&ctx, item).await;
            }
        }));

        PipelineHandle {
            tasks,
            stats: Arc::clone(&ctx.stats),
        }
    }
}

/// Sends an item to the next stage, handing it back to the broker if that
/// stage is gone
async fn forward(ctx: &StageContext, tx: &mpsc::Sender<WorkItem>, item: WorkItem) {
    if let Err(returned) = tx.send(item).await {
        let item = returned.0;
        tracing::warn!(url = %item.url, state = ?item.state, "Next stage closed, requeueing");
        return_item(ctx, item).await;
    }
}

/// A running pipeline
pub struct PipelineHandle {
    tasks: Vec<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Waits until every stage has drained and stopped
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Pipeline worker failed: {}", e);
            }
        }
        tracing::info!("Pipeline finished");
    }
}
