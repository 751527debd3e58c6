use crate::dedup::{DedupError, DedupResult, DedupStore};
use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process-local dedup store
///
/// Suitable for a single worker or for tests. It counts calls and can be
/// switched to an unavailable state to exercise store outages.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    entries: Mutex<Entries>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

/// Keys with their expiry, plus a min-heap of expiries for pruning
#[derive(Debug, Default)]
struct Entries {
    expiries: HashMap<String, Instant>,
    by_expiry: BinaryHeap<Reverse<(Instant, String)>>,
}

impl Entries {
    fn is_live(&self, key: &str, now: Instant) -> bool {
        self.expiries.get(key).is_some_and(|expiry| *expiry > now)
    }

    fn insert(&mut self, key: &str, expiry: Instant) {
        self.expiries.insert(key.to_string(), expiry);
        self.by_expiry.push(Reverse((expiry, key.to_string())));
    }

    /// Drops every key that expired by `now`
    ///
    /// Heap entries left behind by a release or a re-claim are skipped.
    fn prune(&mut self, now: Instant) {
        while let Some(Reverse((expiry, _))) = self.by_expiry.peek() {
            if *expiry > now {
                break;
            }
            if let Some(Reverse((expiry, key))) = self.by_expiry.pop() {
                if self.expiries.get(&key) == Some(&expiry) {
                    self.expiries.remove(&key);
                }
            }
        }
    }
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store operations issued so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes every subsequent operation fail (or succeed again)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of unexpired keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().expiries.values().filter(|expiry| **expiry > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys held in memory, expired ones not yet pruned included
    pub fn stored_len(&self) -> usize {
        self.lock().expiries.len()
    }

    fn begin(&self) -> DedupResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DedupError::Unavailable);
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // A poisoned map is still a valid map
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn add_if_absent(&self, key: &str, ttl: Duration) -> DedupResult<bool> {
        self.begin()?;
        let now = Instant::now();
        let mut entries = self.lock();
        entries.prune(now);

        if entries.is_live(key, now) {
            return Ok(false);
        }
        entries.insert(key, now + ttl);
        Ok(true)
    }

    async fn exists(&self, key: &str) -> DedupResult<bool> {
        self.begin()?;
        let now = Instant::now();
        Ok(self.lock().is_live(key, now))
    }

    async fn release(&self, key: &str) -> DedupResult<()> {
        self.begin()?;
        self.lock().expiries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> DedupResult<()> {
        self.begin()
    }
}
