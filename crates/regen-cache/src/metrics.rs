//! Counters for cache observability.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local cache counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Reads that returned a fresh entry.
    pub hits: AtomicU64,
    /// Reads that found nothing.
    pub misses: AtomicU64,
    /// Reads that found an entry invalidated by a tag.
    pub stale_misses: AtomicU64,
    /// Reads whose stored payload could not be decoded.
    pub corrupt_reads: AtomicU64,
    /// Operations degraded by a backing store failure.
    pub store_errors: AtomicU64,
    pub writes: AtomicU64,
    pub removals: AtomicU64,
    /// Writes abandoned after a store failure.
    pub dropped_writes: AtomicU64,
    /// New tag associations recorded.
    pub tags_associated: AtomicU64,
    pub revalidations: AtomicU64,
    pub purges_sent: AtomicU64,
    pub purge_failures: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt(&self) {
        self.corrupt_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, new_tags: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.tags_associated.fetch_add(new_tags, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_write(&self) {
        self.dropped_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation(&self) {
        self.revalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the result of one purge fan-out.
    pub fn record_purges(&self, succeeded: u64, failed: u64) {
        self.purges_sent.fetch_add(succeeded + failed, Ordering::Relaxed);
        self.purge_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_misses: self.stale_misses.load(Ordering::Relaxed),
            corrupt_reads: self.corrupt_reads.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
            tags_associated: self.tags_associated.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            purges_sent: self.purges_sent.load(Ordering::Relaxed),
            purge_failures: self.purge_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stale_misses: u64,
    pub corrupt_reads: u64,
    pub store_errors: u64,
    pub writes: u64,
    pub removals: u64,
    pub dropped_writes: u64,
    pub tags_associated: u64,
    pub revalidations: u64,
    pub purges_sent: u64,
    pub purge_failures: u64,
}

impl MetricsSnapshot {
    /// Share of reads served from cache, or `None` before the first read.
    pub fn hit_rate(&self) -> Option<f64> {
        let reads = self.hits + self.misses + self.stale_misses + self.corrupt_reads;
        if reads == 0 {
            return None;
        }
        Some(self.hits as f64 / reads as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_stale();
        metrics.record_miss();
        metrics.record_write(3);
        metrics.record_purges(2, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.tags_associated, 3);
        assert_eq!(snapshot.purges_sent, 3);
        assert_eq!(snapshot.purge_failures, 1);
        assert_eq!(snapshot.hit_rate(), Some(0.5));
    }

    #[test]
    fn test_hit_rate_without_reads() {
        assert_eq!(MetricsSnapshot::default().hit_rate(), None);
    }
}
