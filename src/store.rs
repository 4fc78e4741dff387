//! Entry Store - single-file durable cache
//!
//! The simplest persistent cache: one JSON document mapping each key to
//! `{data, timestamp, ttl}`. Every write rewrites the whole file.
//!
//! ```text
//! {
//!   "cards:set:sv4": {
//!     "data": [ ... ],
//!     "timestamp": "2024-05-01T10:00:00Z",
//!     "ttl": 3600000000000
//!   }
//! }
//! ```
//!
//! A missing or malformed file opens as an empty store. Expired entries are
//! dropped from memory on read and disappear from disk on the next write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::entry::ttl_elapsed;
use crate::error::{Error, Result};

/// One persisted value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Serialized payload
    pub data: serde_json::Value,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Time-to-live, zero means never expires
    #[serde(with = "crate::config::duration_nanos")]
    pub ttl: Duration,
}

impl Entry {
    /// Check expiry against `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        ttl_elapsed(self.timestamp, self.ttl, now)
    }

    /// Check expiry against the current time
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Single-file key/value store with per-entry TTL
pub struct EntryStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Entry>>,
}

impl EntryStore {
    /// Open (or start) a store backed by `path`
    ///
    /// Never fails on bad persisted state: a corrupt file is logged and
    /// treated as empty, and is overwritten on the next successful write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load(&path);
        debug!(path = %path.display(), entries = entries.len(), "Opened entry store");
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    fn load(path: &Path) -> HashMap<String, Entry> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), "Cannot read entry store, starting empty: {}", e);
                return HashMap::new();
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), "Corrupt entry store, starting empty: {}", e);
                HashMap::new()
            }
        }
    }

    /// Get a value, `Ok(None)` on miss or expiry
    ///
    /// A found, unexpired entry that cannot be decoded as `T` is an
    /// [`Error::Deserialization`], never a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let data = {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_expired() => None,
                Some(entry) => Some(entry.data.clone()),
            }
        };

        match data {
            Some(data) => serde_json::from_value(data)
                .map(Some)
                .map_err(|e| Error::deserialization(key, e)),
            None => {
                let mut entries = self.entries.write();
                if entries.get(key).is_some_and(Entry::is_expired) {
                    entries.remove(key);
                    debug!(key, "Dropped expired entry");
                }
                Ok(None)
            }
        }
    }

    /// Store a value with `ttl` (zero = never expires) and persist the store
    ///
    /// If the file cannot be written the in-memory map is left as it was.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let data = serde_json::to_value(value).map_err(|e| Error::serialization(key, e))?;

        let mut entries = self.entries.write();
        let previous = entries.insert(
            key.to_string(),
            Entry {
                data,
                timestamp: Utc::now(),
                ttl,
            },
        );
        self.save(&mut entries).inspect_err(|_| {
            match previous {
                Some(entry) => entries.insert(key.to_string(), entry),
                None => entries.remove(key),
            };
        })
    }

    /// Remove a key and persist the store
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let previous = entries.remove(key);
        self.save(&mut entries).inspect_err(|_| {
            if let Some(entry) = previous {
                entries.insert(key.to_string(), entry);
            }
        })
    }

    /// Remove every key and persist the empty store
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write();
        let previous = std::mem::take(&mut *entries);
        self.save(&mut entries).inspect_err(|_| *entries = previous)
    }

    /// Drop all expired entries and persist, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        let removed = before - entries.len();
        self.save(&mut entries)?;
        Ok(removed)
    }

    /// Number of entries held in memory (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Keys currently held, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of a raw entry (for inspection)
    pub fn entry(&self, key: &str) -> Option<Entry> {
        self.entries.read().get(key).cloned()
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the backing file from the in-memory map
    ///
    /// Writes to a sibling temp file and renames it over the target.
    fn save(&self, entries: &mut HashMap<String, Entry>) -> Result<()> {
        entries.retain(|_, e| !e.is_expired());

        let body = serde_json::to_vec_pretty(&*entries)
            .map_err(|e| Error::serialization(&self.path.display().to_string(), e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl std::fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryStore")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Quote {
        card: String,
        cents: u64,
    }

    fn store_in(dir: &tempfile::TempDir) -> EntryStore {
        EntryStore::open(dir.path().join("cache.json"))
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let quote = Quote {
            card: "sv4-25".into(),
            cents: 1299,
        };
        store.put("q", &quote, Duration::from_secs(60)).unwrap();

        let got: Option<Quote> = store.get("q").unwrap();
        assert_eq!(got, Some(quote));
    }

    #[test]
    fn test_missing_key_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let got: Option<String> = store.get("nope").unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let entry = Entry {
            data: serde_json::json!(1),
            timestamp: Utc::now() - chrono::Duration::days(3650),
            ttl: Duration::ZERO,
        };
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let entry = Entry {
            data: serde_json::json!(1),
            timestamp: now - chrono::Duration::seconds(10),
            ttl: Duration::from_secs(10),
        };
        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_decode_failure_is_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.put("k", "not a number", Duration::ZERO).unwrap();

        let result: Result<Option<u64>> = store.get("k");
        assert_matches!(result, Err(Error::Deserialization { ref key, .. }) if key == "k");
    }

    #[test]
    fn test_expired_entry_is_not_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .put("k", "not a number", Duration::from_millis(1))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        // Would fail to decode as u64, but expiry wins
        let result: Option<u64> = store.get("k").unwrap();
        assert!(result.is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .put("cards:set:sv4", &vec![1, 2, 3], Duration::from_secs(1))
            .unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains('\n'), "file should be pretty-printed");

        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &doc["cards:set:sv4"];
        assert_eq!(entry["data"], serde_json::json!([1, 2, 3]));
        assert_eq!(entry["ttl"], serde_json::json!(1_000_000_000u64));
        let ts = entry["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_remove_and_clear_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        {
            let store = EntryStore::open(&path);
            store.put("a", &1, Duration::ZERO).unwrap();
            store.put("b", &2, Duration::ZERO).unwrap();
            store.remove("a").unwrap();
        }
        let reopened = EntryStore::open(&path);
        assert_eq!(reopened.keys(), vec!["b".to_string()]);

        reopened.clear().unwrap();
        assert!(EntryStore::open(&path).is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.put("short", &1, Duration::from_millis(1)).unwrap();
        store.put("long", &2, Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.keys(), vec!["long".to_string()]);
    }

    #[test]
    fn test_unreadable_path_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be read as a file
        let store = EntryStore::open(dir.path());
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_save_rolls_back_put() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        // The parent is a regular file, so every save fails
        let store = EntryStore::open(blocker.join("cache.json"));
        assert!(store.put("k", &"v", Duration::ZERO).is_err());
        assert_eq!(store.get::<String>("k").unwrap(), None);
        assert!(store.is_empty());
    }
}
