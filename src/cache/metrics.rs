//! Cache Metrics Collection
//!
//! Orchestrator-level counters. Every `get` that reaches a tier bumps exactly
//! one of that tier's hit/miss counters, so `hits + misses` per tier equals
//! the number of lookups that tier served.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l3_hits: AtomicU64,
    l3_misses: AtomicU64,

    promotions: AtomicU64,
    prefetched: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,

    /// Evictions reported directly (remote sweeps)
    evictions: AtomicU64,
    /// Tier eviction total at the last reset
    evictions_baseline: AtomicU64,
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_miss(&self) {
        self.l2_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l3_hit(&self) {
        self.l3_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l3_miss(&self) {
        self.l3_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// One value copied into one faster tier
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetched(&self) {
        self.prefetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn l1_hits(&self) -> u64 {
        self.l1_hits.load(Ordering::Relaxed)
    }

    pub fn l1_misses(&self) -> u64 {
        self.l1_misses.load(Ordering::Relaxed)
    }

    pub fn l2_hits(&self) -> u64 {
        self.l2_hits.load(Ordering::Relaxed)
    }

    pub fn l2_misses(&self) -> u64 {
        self.l2_misses.load(Ordering::Relaxed)
    }

    pub fn l3_hits(&self) -> u64 {
        self.l3_hits.load(Ordering::Relaxed)
    }

    pub fn l3_misses(&self) -> u64 {
        self.l3_misses.load(Ordering::Relaxed)
    }

    /// Zero every counter
    ///
    /// `tier_evictions` is the tiers' own running eviction total; later
    /// snapshots report evictions relative to it.
    pub fn reset(&self, tier_evictions: u64) {
        for counter in [
            &self.l1_hits,
            &self.l1_misses,
            &self.l2_hits,
            &self.l2_misses,
            &self.l3_hits,
            &self.l3_misses,
            &self.promotions,
            &self.prefetched,
            &self.sets,
            &self.deletes,
            &self.evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.evictions_baseline
            .store(tier_evictions, Ordering::Relaxed);
    }

    /// Take a snapshot of the current metrics
    pub fn snapshot(&self, tier_evictions: u64) -> CacheStats {
        let l1_hits = self.l1_hits();
        let l1_misses = self.l1_misses();
        let l2_hits = self.l2_hits();
        let l2_misses = self.l2_misses();
        let l3_hits = self.l3_hits();
        let l3_misses = self.l3_misses();

        let total_hits = l1_hits + l2_hits + l3_hits;
        let evictions = tier_evictions
            .saturating_sub(self.evictions_baseline.load(Ordering::Relaxed))
            + self.evictions.load(Ordering::Relaxed);

        // Every lookup starts at L1
        let requests = l1_hits + l1_misses;
        let overall = if requests == 0 {
            0.0
        } else {
            total_hits as f64 / requests as f64
        };

        CacheStats {
            l1_hits,
            l1_misses,
            l2_hits,
            l2_misses,
            l3_hits,
            l3_misses,
            evictions,
            promotions: self.promotions.load(Ordering::Relaxed),
            prefetched: self.prefetched.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            l1_hit_rate: ratio(l1_hits, l1_misses),
            l2_hit_rate: ratio(l2_hits, l2_misses),
            l3_hit_rate: ratio(l3_hits, l3_misses),
            overall_hit_rate: overall,
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l3_hits: u64,
    pub l3_misses: u64,
    /// Entries dropped by capacity or expiry across tiers
    pub evictions: u64,
    /// Values copied into a faster tier after a hit
    pub promotions: u64,
    /// Values stored by prefetch
    pub prefetched: u64,
    pub sets: u64,
    pub deletes: u64,
    pub l1_hit_rate: f64,
    pub l2_hit_rate: f64,
    pub l3_hit_rate: f64,
    /// Hits in any tier over lookups
    pub overall_hit_rate: f64,
}

impl CacheStats {
    /// Hits across all tiers
    pub fn total_hits(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.l3_hits
    }

    /// Lookups served (each starts at L1)
    pub fn total_requests(&self) -> u64 {
        self.l1_hits + self.l1_misses
    }
}

// =============================================================================
// Tests
// =============================================================================
