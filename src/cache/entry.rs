//! Cache Entry Types
//!
//! The unit of storage shared by every tier. On disk and across the remote
//! tier an entry travels as JSON.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Returns true once `now - created > ttl`. A zero TTL never expires.
#[inline]
pub fn ttl_elapsed(created: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    if ttl.is_zero() {
        return false;
    }
    let age = (now - created).to_std().unwrap_or_default();
    age > ttl
}

/// Cache entry stored by the multi-tier cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Payload
    pub value: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last access time
    pub accessed_at: DateTime<Utc>,
    /// TTL (zero = no expiry)
    #[serde(with = "crate::config::duration_nanos")]
    pub ttl: Duration,
    /// Tier number the entry was written to (1, 2 or 3)
    pub tier: u8,
    /// Whether the stored form is compressed
    #[serde(default)]
    pub compressed: bool,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(key: impl Into<String>, value: serde_json::Value, ttl: Duration, tier: u8) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value,
            created_at: now,
            accessed_at: now,
            ttl,
            tier,
            compressed: false,
        }
    }

    /// Copy of this entry re-homed into `tier` with that tier's TTL
    ///
    /// The age restarts: a promoted value lives for the faster tier's full TTL.
    pub fn retiered(&self, tier: u8, ttl: Duration) -> Self {
        let mut entry = Self::new(self.key.clone(), self.value.clone(), ttl, tier);
        entry.compressed = false;
        entry
    }

    /// Check if entry has expired at `now`
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        ttl_elapsed(self.created_at, self.ttl, now)
    }

    /// Check if entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Record an access
    #[inline]
    pub fn touch(&mut self) {
        self.accessed_at = Utc::now();
    }

    /// Approximate payload size in bytes (length of its JSON encoding)
    pub fn size_estimate(&self) -> usize {
        value_size(&self.value)
    }
}

/// Approximate size of a JSON value in bytes
pub fn value_size(value: &serde_json::Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("cards:1", json!({"name": "Pikachu"}), Duration::from_secs(60), 1);
        assert_eq!(entry.key, "cards:1");
        assert_eq!(entry.tier, 1);
        assert!(!entry.compressed);
        assert!(!entry.is_expired());
        assert_eq!(entry.created_at, entry.accessed_at);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let entry = CacheEntry::new("k", json!(1), Duration::ZERO, 1);
        let far_future = Utc::now() + chrono::Duration::days(10_000);
        assert!(!entry.is_expired_at(far_future));
    }

    #[test]
    fn test_ttl_boundary() {
        let created = Utc::now();
        let ttl = Duration::from_secs(5);
        assert!(!ttl_elapsed(created, ttl, created + chrono::Duration::seconds(5)));
        assert!(ttl_elapsed(
            created,
            ttl,
            created + chrono::Duration::milliseconds(5001)
        ));
    }

    #[test]
    fn test_retiered_uses_new_ttl() {
        let mut entry = CacheEntry::new("k", json!("v"), Duration::from_secs(86400), 2);
        entry.compressed = true;
        entry.created_at = Utc::now() - chrono::Duration::hours(5);

        let promoted = entry.retiered(1, Duration::from_secs(3600));
        assert_eq!(promoted.tier, 1);
        assert_eq!(promoted.ttl, Duration::from_secs(3600));
        assert!(!promoted.compressed);
        assert!(!promoted.is_expired());
        assert_eq!(promoted.value, entry.value);
    }

    #[test]
    fn test_json_shape() {
        let entry = CacheEntry::new("k", json!([1, 2]), Duration::from_secs(1), 2);
        let doc = serde_json::to_value(&entry).unwrap();
        assert_eq!(doc["ttl"], json!(1_000_000_000u64));
        assert_eq!(doc["tier"], json!(2));
        assert_eq!(doc["value"], json!([1, 2]));

        let back: CacheEntry = serde_json::from_value(doc).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_size_estimate() {
        let entry = CacheEntry::new("k", json!("abc"), Duration::ZERO, 1);
        assert_eq!(entry.size_estimate(), 5); // "abc" with quotes
    }
}
