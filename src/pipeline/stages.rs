//! Per-stage processing
//!
//! Each function handles one item for one stage and reports what became of
//! it. Every item ends up in exactly one of three places: forwarded to the
//! next stage, acknowledged and dropped, or rejected back to the broker.
//!
//! Admission and publishing claim keys in separate namespaces of the dedup
//! store. A URL published by one page therefore still passes admission when
//! its delivery arrives, while the same link found on many pages is only
//! published once per TTL.
//!
//! The admission claim is only a lease held while the URL is being worked
//! on. Completion is recorded under a third namespace with the full TTL
//! when the delivery is acknowledged. A delivery replayed after a crash
//! finds no completion record, and once the lease is gone (released during
//! recovery, or expired) it is admitted and crawled again.

use crate::crawler::{extract_same_host_links, Crawler};
use crate::dedup::DedupStore;
use crate::pipeline::item::{ItemState, WorkItem};
use crate::pipeline::stats::PipelineStats;
use crate::queue::{Delivery, DeliveryHandle, QueueGateway};
use crate::storage::MirrorWriter;
use crate::url::{dedup_key, Blacklist};
use crate::UrlError;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const ADMISSION_NAMESPACE: &str = "crawl";
const PUBLISH_NAMESPACE: &str = "queued";
const DONE_NAMESPACE: &str = "done";

/// Everything a stage needs to process an item
pub struct StageContext {
    pub gateway: Arc<dyn QueueGateway>,
    pub dedup: Arc<dyn DedupStore>,
    pub crawler: Crawler,
    pub blacklist: Blacklist,
    pub mirror: Option<MirrorWriter>,
    /// Lifetime of completion records and publish claims
    pub dedup_ttl: Duration,
    /// Lifetime of an admission claim that is never completed
    pub admission_lease: Duration,
    pub stats: Arc<PipelineStats>,
}

/// What a stage did with an item
#[derive(Debug)]
pub enum Disposition {
    /// Hand the item to the next stage
    Forward(WorkItem),
    /// The delivery was settled here and the item left the pipeline
    Settled(ItemState),
}

impl Disposition {
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward(_))
    }

    pub fn state(&self) -> Option<ItemState> {
        match self {
            Self::Forward(_) => None,
            Self::Settled(state) => Some(*state),
        }
    }
}

/// Result of offering a discovered link for publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Someone already published or crawled it within the TTL
    AlreadyQueued,
    /// The link could not be turned into a dedup key
    Skipped,
    Failed,
}

/// Dedup key claimed when a delivery is admitted for crawling
pub fn admission_key(url: &str) -> Result<String, UrlError> {
    dedup_key(url).map(|key| format!("{}:{}", ADMISSION_NAMESPACE, key))
}

/// Dedup key recording that a URL was fully processed
pub fn done_key(url: &str) -> Result<String, UrlError> {
    dedup_key(url).map(|key| format!("{}:{}", DONE_NAMESPACE, key))
}

/// Dedup key claimed when a discovered link is published
pub fn publish_key(url: &str) -> Result<String, UrlError> {
    dedup_key(url).map(|key| format!("{}:{}", PUBLISH_NAMESPACE, key))
}

/// ReadFromQueue: blacklist check, completion check, then the atomic
/// admission claim
///
/// Blacklisted and unparseable URLs are acknowledged without touching the
/// dedup store. A store failure requeues the delivery rather than losing it.
pub async fn admit(ctx: &StageContext, delivery: Delivery) -> Disposition {
    let Delivery { url, handle } = delivery;

    let parsed = match Url::parse(url.trim()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(url = %url, "Dropping delivery with invalid URL: {}", e);
            ack(ctx, handle, &url).await;
            ctx.stats.record_dropped();
            return Disposition::Settled(ItemState::Rejected);
        }
    };

    if ctx.blacklist.is_blacklisted(&parsed) {
        tracing::debug!(url = %parsed, "Blacklisted");
        ack(ctx, handle, &url).await;
        ctx.stats.record_blacklisted();
        return Disposition::Settled(ItemState::Rejected);
    }

    let (key, done) = match admission_key(parsed.as_str())
        .and_then(|key| done_key(parsed.as_str()).map(|done| (key, done)))
    {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!(url = %url, "Dropping delivery without dedup key: {}", e);
            ack(ctx, handle, &url).await;
            ctx.stats.record_dropped();
            return Disposition::Settled(ItemState::Rejected);
        }
    };

    match ctx.dedup.exists(&done).await {
        Ok(false) => {}
        Ok(true) => {
            tracing::debug!(url = %parsed, "Already crawled");
            ack(ctx, handle, &url).await;
            ctx.stats.record_duplicate();
            return Disposition::Settled(ItemState::Rejected);
        }
        Err(e) => {
            tracing::warn!(url = %parsed, "Dedup store failed during admission: {}", e);
            requeue(ctx, handle, &url).await;
            return Disposition::Settled(ItemState::Requeued);
        }
    }

    match ctx.dedup.add_if_absent(&key, ctx.admission_lease).await {
        Ok(true) => {
            tracing::debug!(url = %parsed, "Admitted");
            ctx.stats.record_admitted();
            Disposition::Forward(WorkItem::new(parsed, handle))
        }
        Ok(false) => {
            tracing::debug!(url = %parsed, "Claimed by another worker");
            ack(ctx, handle, &url).await;
            ctx.stats.record_duplicate();
            Disposition::Settled(ItemState::Rejected)
        }
        Err(e) => {
            tracing::warn!(url = %parsed, "Dedup store failed during admission: {}", e);
            requeue(ctx, handle, &url).await;
            Disposition::Settled(ItemState::Requeued)
        }
    }
}

/// CrawlURL: fetch the body, requeueing retryable failures
///
/// On a retryable status the admission claim is released first, so the
/// redelivered message is admitted again instead of being taken for a
/// duplicate.
pub async fn crawl_item(ctx: &StageContext, mut item: WorkItem) -> Disposition {
    match ctx.crawler.crawl(item.url.as_str()).await {
        Ok(response) => {
            item.body = response.body;
            item.state = ItemState::Fetched;
            ctx.stats.record_fetched();
            Disposition::Forward(item)
        }
        Err(e) if e.is_retryable() => {
            tracing::info!(url = %item.url, "Requeueing: {}", e);
            release_admission(ctx, &item.url).await;
            let url = item.url.to_string();
            requeue(ctx, item.handle, &url).await;
            Disposition::Settled(ItemState::Requeued)
        }
        Err(e) => {
            tracing::warn!(url = %item.url, "Dropping: {}", e);
            let url = item.url.to_string();
            ack(ctx, item.handle, &url).await;
            ctx.stats.record_dropped();
            Disposition::Settled(ItemState::Dropped)
        }
    }
}

/// WriteItemToDisk: mirror the body when a mirror root is configured
pub async fn persist_item(ctx: &StageContext, mut item: WorkItem) -> Disposition {
    let Some(mirror) = &ctx.mirror else {
        item.state = ItemState::Persisted;
        return Disposition::Forward(item);
    };

    match mirror.write_body(&item.url, &item.body).await {
        Ok(_) => {
            item.state = ItemState::Persisted;
            ctx.stats.record_persisted();
            Disposition::Forward(item)
        }
        Err(e) => {
            tracing::error!(url = %item.url, "Dropping after write failure: {}", e);
            let url = item.url.to_string();
            ack(ctx, item.handle, &url).await;
            ctx.stats.record_dropped();
            Disposition::Settled(ItemState::Dropped)
        }
    }
}

/// ExtractURLs: collect same-host links from HTML bodies
///
/// The item always comes back for acknowledgment, with or without links.
pub fn extract_item(ctx: &StageContext, mut item: WorkItem) -> (Vec<String>, WorkItem) {
    item.state = ItemState::Extracted;
    if !item.is_html() {
        return (Vec::new(), item);
    }

    let links = extract_same_host_links(&item.body, &item.url, ctx.crawler.root_host());
    tracing::debug!(url = %item.url, links = links.len(), "Extracted links");
    ctx.stats.record_links(links.len());
    (links, item)
}

/// PublishURLs: claim a discovered link and put it on the queue
///
/// A dedup store failure does not stop the publish; losing the link would
/// be worse than queueing it twice.
pub async fn publish_url(ctx: &StageContext, url: &str) -> PublishOutcome {
    let key = match publish_key(url) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!(url = %url, "Skipping link: {}", e);
            return PublishOutcome::Skipped;
        }
    };

    let claimed = match ctx.dedup.add_if_absent(&key, ctx.dedup_ttl).await {
        Ok(true) => true,
        Ok(false) => return PublishOutcome::AlreadyQueued,
        Err(e) => {
            tracing::warn!(url = %url, "Dedup store failed, publishing unclaimed: {}", e);
            false
        }
    };

    match ctx.gateway.publish(url).await {
        Ok(()) => {
            tracing::debug!(url = %url, "Published");
            ctx.stats.record_published();
            PublishOutcome::Published
        }
        Err(e) => {
            tracing::warn!(url = %url, "Failed to publish: {}", e);
            if claimed {
                if let Err(e) = ctx.dedup.release(&key).await {
                    tracing::warn!(url = %url, "Failed to release publish claim: {}", e);
                }
            }
            PublishOutcome::Failed
        }
    }
}

/// AcknowledgeItem: the only place a fully processed delivery is acked
///
/// The completion record is written first, so a redelivery that races the
/// ack is recognised as already crawled.
pub async fn acknowledge_item(ctx: &StageContext, item: WorkItem) -> ItemState {
    let url = item.url.to_string();
    if let Ok(done) = done_key(&url) {
        if let Err(e) = ctx.dedup.add_if_absent(&done, ctx.dedup_ttl).await {
            // Without the record a replay is crawled again once the lease ends
            tracing::warn!(url = %url, "Failed to record completion: {}", e);
        }
    }
    ack(ctx, item.handle, &url).await;
    ctx.stats.record_acknowledged();
    ItemState::Acknowledged
}

/// Returns an item to the broker, e.g. when a downstream stage has gone away
pub async fn return_item(ctx: &StageContext, item: WorkItem) {
    let url = item.url.to_string();
    requeue(ctx, item.handle, &url).await;
}

/// Releases the admission claims of deliveries returned to the queue by
/// crash recovery, so their replays are admitted without waiting out the
/// lease
///
/// Returns the number of claims released.
pub async fn release_admissions(dedup: &dyn DedupStore, urls: &[String]) -> usize {
    let mut released = 0;
    for url in urls {
        let Ok(parsed) = Url::parse(url.trim()) else {
            continue;
        };
        let Ok(key) = admission_key(parsed.as_str()) else {
            continue;
        };
        match dedup.release(&key).await {
            Ok(()) => released += 1,
            Err(e) => tracing::warn!(url = %url, "Failed to release admission claim: {}", e),
        }
    }
    released
}

async fn release_admission(ctx: &StageContext, url: &Url) {
    let Ok(key) = admission_key(url.as_str()) else {
        return;
    };
    if let Err(e) = ctx.dedup.release(&key).await {
        // The claim still expires with its lease
        tracing::warn!(url = %url, "Failed to release admission claim: {}", e);
    }
}

async fn ack(ctx: &StageContext, handle: DeliveryHandle, url: &str) {
    if let Err(e) = ctx.gateway.ack(handle).await {
        tracing::warn!(url = %url, "Failed to acknowledge delivery: {}", e);
    }
}

async fn requeue(ctx: &StageContext, handle: DeliveryHandle, url: &str) {
    match ctx.gateway.reject(handle, true).await {
        Ok(()) => ctx.stats.record_requeued(),
        Err(e) => tracing::warn!(url = %url, "Failed to requeue delivery: {}", e),
    }
}
