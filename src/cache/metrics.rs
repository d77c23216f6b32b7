//! Hit/miss accounting for the cache.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free hit and miss counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// A point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that returned nothing
    pub misses: u64,
    /// Hits plus misses
    pub total_requests: u64,
    /// `hits / total_requests`, zero before any lookup
    pub hit_rate: f64,
}

impl CacheMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of lookups that hit, zero before any lookup.
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate
    }

    /// Read both counters and derive the totals.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hits as f64 / total_requests as f64
        };

        MetricsSnapshot {
            hits,
            misses,
            total_requests,
            hit_rate,
        }
    }

    /// Zero both counters.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}
