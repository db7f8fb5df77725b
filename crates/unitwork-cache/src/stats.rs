//! Region statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live hit/miss/put/eviction counters for one region.
///
/// Counters are monotonic and lock-free; readers take a
/// [`snapshot`](RegionStats::snapshot) for a consistent-enough view.
#[derive(Debug, Default)]
pub struct RegionStats {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    lock_denials: AtomicU64,
}

impl RegionStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_denial(&self) {
        self.lock_denials.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> RegionStatsSnapshot {
        RegionStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            lock_denials: self.lock_denials.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a region's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionStatsSnapshot {
    /// Reads that found a cached entry.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Entries installed (loads and commit promotions).
    pub puts: u64,
    /// Entries removed.
    pub evictions: u64,
    /// Reads denied by a soft lock.
    pub lock_denials: u64,
}

impl RegionStatsSnapshot {
    /// Hit ratio in [0, 1]; zero when no reads happened.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
