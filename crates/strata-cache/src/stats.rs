//! Cross-cutting statistics: monotonic counters plus current-state gauges,
//! per tier.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hit/miss/eviction/expiration counters and current state for one tier
/// (memory or disk). Shared shape, separate instances per tier — the
/// hybrid tier keeps its own independent counters (see [`HybridStats`])
/// rather than deriving them from these.
#[derive(Debug, Default)]
pub struct TierStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    integrity_evictions: AtomicU64,
    items: AtomicU64,
    bytes: AtomicU64,
}

impl TierStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_integrity_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.integrity_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_items(&self, count: u64) {
        self.items.store(count, Ordering::Relaxed);
    }

    pub fn set_bytes(&self, count: u64) {
        self.bytes.store(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> TierStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        TierStatsSnapshot {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            integrity_evictions: self.integrity_evictions.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

/// A point-in-time read of [`TierStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub integrity_evictions: u64,
    pub items: u64,
    pub bytes: u64,
    pub hit_rate: f64,
}

/// The hybrid tier's own hit/miss counters. Kept independent of the
/// memory/disk tiers' own [`TierStats`] because either inner tier may be
/// cleared directly (`clear_memory`/`clear_disk`) without the hybrid
/// coordinator knowing.
#[derive(Debug, Default)]
pub struct HybridStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl HybridStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> HybridStatsSnapshot {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.disk_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = memory_hits + disk_hits + misses;
        HybridStatsSnapshot {
            memory_hits,
            disk_hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                (memory_hits + disk_hits) as f64 / total as f64
            },
        }
    }
}

/// A point-in-time read of [`HybridStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridStatsSnapshot {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_stats_hit_rate() {
        let stats = TierStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert!((snap.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tier_stats_empty_hit_rate_is_zero() {
        let stats = TierStats::new();
        assert_eq!(stats.snapshot().hit_rate, 0.0);
    }

    #[test]
    fn integrity_eviction_counts_as_eviction() {
        let stats = TierStats::new();
        stats.record_integrity_eviction();
        let snap = stats.snapshot();
        assert_eq!(snap.evictions, 1);
        assert_eq!(snap.integrity_evictions, 1);
    }

    #[test]
    fn hybrid_stats_independent_counters() {
        let stats = HybridStats::new();
        stats.record_memory_hit();
        stats.record_disk_hit();
        stats.record_miss();
        let snap = stats.snapshot();
        assert_eq!(snap.memory_hits, 1);
        assert_eq!(snap.disk_hits, 1);
        assert_eq!(snap.misses, 1);
    }
}
