//! L1 Cache - Memory Tier
//!
//! Bounded in-memory map, the hot path for repeated lookups.
//!
//! # Design
//!
//! - One `RwLock` over the map; lookups take the read lock
//! - Recency is an atomic tick per slot, so a hit never needs the write lock
//! - Full tier evicts the least recently used slot before inserting
//! - Expired entries are dropped lazily on lookup and in bulk by [`MemoryTier::clean`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entry::CacheEntry;
use crate::error::{Error, Result};

/// Default L1 capacity (entries)
pub const DEFAULT_L1_MAX_ENTRIES: usize = 1000;

/// Default L1 TTL (1 hour)
pub const DEFAULT_L1_TTL: Duration = Duration::from_secs(3600);

/// L1 Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct L1Config {
    /// Maximum number of entries
    pub max_entries: usize,
    /// TTL applied to entries written or promoted into L1
    #[serde(with = "crate::config::duration_str")]
    pub ttl: Duration,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_L1_MAX_ENTRIES,
            ttl: DEFAULT_L1_TTL,
        }
    }
}

struct Slot {
    entry: CacheEntry,
    last_used: AtomicU64,
}

/// L1 Cache - in-memory hot tier
pub struct MemoryTier {
    /// Storage
    slots: RwLock<HashMap<String, Slot>>,
    /// Configuration
    config: L1Config,
    /// Monotonic access clock
    clock: AtomicU64,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Eviction count (capacity and expiry)
    evictions: AtomicU64,
}

impl MemoryTier {
    /// Create a new L1 cache with default configuration
    pub fn new() -> Self {
        Self::with_config(L1Config::default())
    }

    /// Create a new L1 cache with custom configuration
    pub fn with_config(config: L1Config) -> Self {
        Self {
            slots: RwLock::new(HashMap::with_capacity(config.max_entries.min(4096))),
            config,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get an entry from the cache
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        {
            let slots = self.slots.read();
            match slots.get(key) {
                Some(slot) if !slot.entry.is_expired() => {
                    slot.last_used.store(self.tick(), Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(slot.entry.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: drop it under the write lock
        let mut slots = self.slots.write();
        if slots.get(key).is_some_and(|s| s.entry.is_expired()) {
            slots.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key, "L1 entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Check if a live entry exists without touching hit/miss counters
    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .read()
            .get(key)
            .is_some_and(|s| !s.entry.is_expired())
    }

    /// Put an entry into the cache, evicting the least recently used slot if full
    pub fn set(&self, entry: CacheEntry) -> Result<()> {
        if self.config.max_entries == 0 {
            return Err(Error::Config("L1 max_entries is 0".to_string()));
        }

        let mut slots = self.slots.write();
        if !slots.contains_key(&entry.key) && slots.len() >= self.config.max_entries {
            self.evict_one(&mut slots);
        }

        let slot = Slot {
            last_used: AtomicU64::new(self.tick()),
            entry,
        };
        slots.insert(slot.entry.key.clone(), slot);
        Ok(())
    }

    /// Evict one slot: an expired one if any, else the least recently used
    fn evict_one(&self, slots: &mut HashMap<String, Slot>) {
        let victim = slots
            .iter()
            .find(|(_, s)| s.entry.is_expired())
            .or_else(|| {
                slots
                    .iter()
                    .min_by_key(|(_, s)| s.last_used.load(Ordering::Relaxed))
            })
            .map(|(k, _)| k.clone());

        if let Some(key) = victim {
            slots.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "L1 evicted");
        }
    }

    /// Remove an entry from the cache
    pub fn delete(&self, key: &str) -> bool {
        self.slots.write().remove(key).is_some()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.slots.write().clear();
    }

    /// Drop all expired entries, returning how many were removed
    pub fn clean(&self) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, s| !s.entry.is_expired());
        let removed = before - slots.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Get number of entries
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// TTL used for entries written into this tier
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get configuration
    pub fn config(&self) -> &L1Config {
        &self.config
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
