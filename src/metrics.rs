use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct BridgeMetrics {
    pub proxies_created: AtomicU64,
    /// Conversions answered from the identity cache
    pub cache_hits: AtomicU64,
    /// Weak -> strong transitions
    pub promotions: AtomicU64,
    /// Strong -> weak transitions
    pub demotions: AtomicU64,
    /// Native references given back by finalize, collection or teardown
    pub releases: AtomicU64,
    /// Releases that could not find an unref route
    pub leaks: AtomicU64,
    /// Toggle notifications raised off the runtime thread
    pub foreign_toggles: AtomicU64,
    /// Number of full collection cycles performed
    pub collections: AtomicU64,
    /// Total time spent collecting (in microseconds)
    pub collection_total_us: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub proxies_created: u64,
    pub cache_hits: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub releases: u64,
    pub leaks: u64,
    pub foreign_toggles: u64,
    pub collections: u64,
    pub collection_total_us: u64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_collection(&self, duration: Duration) {
        self.collection_total_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.collections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            proxies_created: load(&self.proxies_created),
            cache_hits: load(&self.cache_hits),
            promotions: load(&self.promotions),
            demotions: load(&self.demotions),
            releases: load(&self.releases),
            leaks: load(&self.leaks),
            foreign_toggles: load(&self.foreign_toggles),
            collections: load(&self.collections),
            collection_total_us: load(&self.collection_total_us),
        }
    }
}
