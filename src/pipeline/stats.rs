//! Pipeline counters
//!
//! Lock-free counters updated by every stage and reported periodically.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals of pipeline outcomes
#[derive(Debug, Default)]
pub struct PipelineStats {
    admitted: AtomicU64,
    blacklisted: AtomicU64,
    duplicates: AtomicU64,
    fetched: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    links_extracted: AtomicU64,
    published: AtomicU64,
    acknowledged: AtomicU64,
}

/// A point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub admitted: u64,
    pub blacklisted: u64,
    pub duplicates: u64,
    pub fetched: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub links_extracted: u64,
    pub published: u64,
    pub acknowledged: u64,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_admitted, admitted);
    counter!(record_blacklisted, blacklisted);
    counter!(record_duplicate, duplicates);
    counter!(record_fetched, fetched);
    counter!(record_requeued, requeued);
    counter!(record_dropped, dropped);
    counter!(record_persisted, persisted);
    counter!(record_published, published);
    counter!(record_acknowledged, acknowledged);

    pub fn record_links(&self, count: usize) {
        self.links_extracted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            blacklisted: self.blacklisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            links_extracted: self.links_extracted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
        }
    }

    /// Logs the current totals at info level
    pub fn log_progress(&self) {
        let s = self.snapshot();
        tracing::info!(
            admitted = s.admitted,
            fetched = s.fetched,
            persisted = s.persisted,
            acknowledged = s.acknowledged,
            published = s.published,
            links = s.links_extracted,
            duplicates = s.duplicates,
            blacklisted = s.blacklisted,
            requeued = s.requeued,
            dropped = s.dropped,
            "Pipeline progress"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        assert_eq!(PipelineStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_record_increments() {
        let stats = PipelineStats::new();
        stats.record_admitted();
        stats.record_admitted();
        stats.record_duplicate();
        stats.record_links(5);
        stats.record_links(2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.admitted, 2);
        assert_eq!(snapshot.duplicates, 1);
        assert_eq!(snapshot.links_extracted, 7);
        assert_eq!(snapshot.acknowledged, 0);
    }
}
