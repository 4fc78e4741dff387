//! L2 Cache - Disk Tier
//!
//! One file per key under the cache directory. The file name is the SHA-256
//! of the key, so arbitrary key strings become safe names; the extension
//! records the codec (`.json`, `.gz`, `.lz4`).
//!
//! # Expiry
//!
//! - Validity is judged by file modification time: `now - mtime > ttl`
//! - A successful `get` refreshes the mtime (sliding expiration)
//! - A non-zero embedded entry TTL (an explicit per-value TTL) caps that;
//!   entries written with the tier default embed zero
//! - [`DiskTier::clean`] is the only sweep; nothing runs in the background
//!
//! Files that cannot be decompressed or parsed are removed and reported as
//! misses. A well-formed file of the wrong shape surfaces as
//! [`Error::Deserialization`].

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::compression::Codec;
use super::entry::CacheEntry;
use crate::error::{Error, Result};

/// Default L2 TTL (24 hours)
pub const DEFAULT_L2_TTL: Duration = Duration::from_secs(24 * 3600);

/// Default L2 size hint (1GB)
pub const DEFAULT_L2_MAX_SIZE: u64 = 1024 * 1024 * 1024;

const TMP_EXTENSION: &str = "tmp";

/// L2 Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct L2Config {
    /// Cache directory path
    pub path: PathBuf,
    /// TTL measured against file mtime
    #[serde(with = "crate::config::duration_str")]
    pub ttl: Duration,
    /// Size hint in bytes; reported by `summary`, not enforced
    pub max_size: u64,
    /// Gzip entries on disk
    pub compress: bool,
    /// Explicit codec, overrides `compress`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<Codec>,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./cache"),
            ttl: DEFAULT_L2_TTL,
            max_size: DEFAULT_L2_MAX_SIZE,
            compress: false,
            codec: None,
        }
    }
}

impl L2Config {
    /// Config rooted at `path` with default TTL and no compression
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Codec used for new writes
    pub fn codec(&self) -> Codec {
        self.codec.unwrap_or_else(|| Codec::from_flag(self.compress))
    }
}

/// Snapshot of what is on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskSummary {
    /// Cache files present
    pub entries: u64,
    /// Bytes used by cache files
    pub bytes: u64,
    /// Files past their mtime TTL (removed by the next `clean`)
    pub expired: u64,
    /// Configured size hint
    pub max_size: u64,
}

/// File name stem for a key
pub fn key_hash(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

fn mtime_expired(modified: SystemTime, ttl: Duration, now: SystemTime) -> bool {
    if ttl.is_zero() {
        return false;
    }
    now.duration_since(modified).unwrap_or_default() > ttl
}

fn cache_codec(path: &Path) -> Option<Codec> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(Codec::from_extension)
}

fn remove_quietly(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// L2 Cache - disk-backed warm tier
pub struct DiskTier {
    /// Serializes disk operations on this tier
    lock: RwLock<()>,
    /// Configuration
    config: L2Config,
    /// Codec for new writes
    codec: Codec,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
    /// Files removed by expiry or corruption
    evictions: AtomicU64,
}

impl DiskTier {
    /// Open the tier, creating its directory if needed
    ///
    /// Failing to create the directory is the only construction error.
    pub fn new(config: L2Config) -> Result<Self> {
        fs::create_dir_all(&config.path).map_err(|source| Error::CacheDirectory {
            path: config.path.clone(),
            source,
        })?;

        Ok(Self {
            lock: RwLock::new(()),
            codec: config.codec(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Path of the file holding `key` for the active codec
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.path_with(key, self.codec)
    }

    fn path_with(&self, key: &str, codec: Codec) -> PathBuf {
        self.config
            .path
            .join(format!("{}.{}", key_hash(key), codec.extension()))
    }

    fn miss(&self) -> Result<Option<CacheEntry>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn evict(&self, path: &Path) {
        match remove_quietly(path) {
            Ok(true) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove L2 file"),
        }
    }

    /// Get an entry from the cache
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let _guard = self.lock.read();
        let path = self.path_for(key);

        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.miss(),
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        if mtime_expired(modified, self.config.ttl, SystemTime::now()) {
            debug!(key, "L2 entry expired by mtime");
            self.evict(&path);
            return self.miss();
        }

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return self.miss(),
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        let mut entry: CacheEntry = match self.codec.read_json(file, key) {
            Ok(entry) => entry,
            Err(e @ (Error::Corrupt { .. } | Error::Decompression { .. })) => {
                warn!(key, error = %e, "Discarding unreadable L2 file");
                self.evict(&path);
                return self.miss();
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if entry.key != key {
            debug!(key, stored = %entry.key, "L2 hash collision");
            return self.miss();
        }

        if entry.is_expired() {
            debug!(key, "L2 entry past its own TTL");
            self.evict(&path);
            return self.miss();
        }

        // Sliding expiration
        if let Err(e) = File::options()
            .write(true)
            .open(&path)
            .and_then(|f| f.set_modified(SystemTime::now()))
        {
            debug!(key, error = %e, "Failed to refresh L2 mtime");
        }

        entry.touch();
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(entry))
    }

    /// Whether `get` would hit, without touching counters or the mtime
    ///
    /// Applies the same rules as `get`: the mtime window, a readable file
    /// holding this key, and the embedded TTL.
    pub fn contains(&self, key: &str) -> bool {
        let _guard = self.lock.read();
        let path = self.path_for(key);

        let fresh = fs::metadata(&path)
            .and_then(|m| m.modified())
            .is_ok_and(|modified| !mtime_expired(modified, self.config.ttl, SystemTime::now()));
        if !fresh {
            return false;
        }

        File::open(&path)
            .map_err(Error::from)
            .and_then(|file| self.codec.read_json::<_, CacheEntry>(file, key))
            .is_ok_and(|entry| entry.key == key && !entry.is_expired())
    }

    /// Write an entry
    ///
    /// The entry is written to a temporary file and renamed into place, so a
    /// failed serialization never leaves a partial file behind.
    pub fn set(&self, entry: &CacheEntry) -> Result<()> {
        let _guard = self.lock.write();
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension(TMP_EXTENSION);

        let mut stored = entry.clone();
        stored.tier = 2;
        stored.compressed = self.codec.is_compressed();

        let written = File::create(&tmp)
            .map_err(Error::from)
            .and_then(|file| self.codec.write_json(file, &entry.key, &stored));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &path)?;
        debug!(key = %entry.key, codec = %self.codec, "L2 write");
        Ok(())
    }

    /// Remove `key` under every codec
    ///
    /// A missing file is not an error; returns whether anything was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.write();
        let mut removed = false;
        for codec in [Codec::None, Codec::Gzip, Codec::Lz4] {
            removed |= remove_quietly(&self.path_with(key, codec))?;
        }
        Ok(removed)
    }

    /// Remove every cache file in the directory
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.write();
        let mut first_error = None;

        for path in self.files(true)? {
            if let Err(e) = remove_quietly(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove L2 file");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Delete every file past its mtime TTL, returning how many were removed
    pub fn clean(&self) -> Result<usize> {
        let _guard = self.lock.write();
        let now = SystemTime::now();
        let mut removed = 0;

        for path in self.files(false)? {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            if mtime_expired(modified, self.config.ttl, now) && remove_quietly(&path)? {
                removed += 1;
            }
        }

        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            debug!(removed, dir = %self.config.path.display(), "L2 clean");
        }
        Ok(removed)
    }

    /// Cache files in the directory; `with_tmp` includes leftover temp files
    fn files(&self, with_tmp: bool) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dirent in fs::read_dir(&self.config.path)? {
            let path = dirent?.path();
            if !path.is_file() {
                continue;
            }
            let is_tmp = path.extension().is_some_and(|e| e == TMP_EXTENSION);
            if cache_codec(&path).is_some() || (with_tmp && is_tmp) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Number of cache files on disk
    pub fn len(&self) -> usize {
        let _guard = self.lock.read();
        self.files(false).map(|f| f.len()).unwrap_or(0)
    }

    /// Check if no cache files are on disk
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count files, bytes and expired files without removing anything
    pub fn summary(&self) -> Result<DiskSummary> {
        let _guard = self.lock.read();
        let now = SystemTime::now();
        let mut summary = DiskSummary {
            max_size: self.config.max_size,
            ..DiskSummary::default()
        };

        for path in self.files(false)? {
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            summary.entries += 1;
            summary.bytes += meta.len();
            if meta
                .modified()
                .is_ok_and(|m| mtime_expired(m, self.config.ttl, now))
            {
                summary.expired += 1;
            }
        }
        Ok(summary)
    }

    /// TTL used for entries written into this tier
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Codec for new writes
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.config.path
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
    pub fn config(&self) -> &L2Config {
        &self.config
    }
}

impl std::fmt::Debug for DiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTier")
            .field("dir", &self.config.path)
            .field("codec", &self.codec)
            .field("ttl", &self.config.ttl)
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
    use serde_json::json;
    use tempfile::TempDir;

    fn tier(dir: &TempDir, ttl: Duration, codec: Codec) -> DiskTier {
        DiskTier::new(L2Config {
            path: dir.path().join("l2"),
            ttl,
            codec: Some(codec),
            ..L2Config::default()
        })
        .unwrap()
    }

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::new(key, json!({ "market": 12.5, "key": key }), Duration::ZERO, 2)
    }

    fn age_file(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_key_hash_is_stable_hex() {
        let h = key_hash("cards:set:sv4");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, key_hash("cards:set:sv4"));
        assert_ne!(h, key_hash("cards:set:sv5"));
    }

    #[test]
    fn test_config_codec_selection() {
        assert_eq!(L2Config::default().codec(), Codec::None);
        let gz = L2Config {
            compress: true,
            ..L2Config::default()
        };
        assert_eq!(gz.codec(), Codec::Gzip);
        let lz = L2Config {
            compress: true,
            codec: Some(Codec::Lz4),
            ..L2Config::default()
        };
        assert_eq!(lz.codec(), Codec::Lz4);
    }

    #[test]
    fn test_new_fails_when_directory_cannot_be_created() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let result = DiskTier::new(L2Config::at(blocker.join("l2")));
        assert_matches!(result, Err(Error::CacheDirectory { .. }));
    }

    #[test]
    fn test_set_get_each_codec() {
        let dir = TempDir::new().unwrap();
        for codec in [Codec::None, Codec::Gzip, Codec::Lz4] {
            let tier = tier(&dir, DEFAULT_L2_TTL, codec);
            tier.set(&entry("cards:1")).unwrap();

            let path = tier.path_for("cards:1");
            assert!(path.exists());
            assert_eq!(
                path.extension().unwrap().to_str().unwrap(),
                codec.extension()
            );

            let got = tier.get("cards:1").unwrap().unwrap();
            assert_eq!(got.value["market"], json!(12.5));
            assert_eq!(got.tier, 2);
            assert_eq!(got.compressed, codec.is_compressed());
        }
    }

    #[test]
    fn test_miss_counts() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, DEFAULT_L2_TTL, Codec::None);
        assert!(tier.get("nope").unwrap().is_none());
        assert_eq!(tier.misses(), 1);
        assert_eq!(tier.hits(), 0);
    }

    #[test]
    fn test_expiry_by_mtime() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, Duration::from_secs(60), Codec::None);
        tier.set(&entry("k")).unwrap();
        age_file(&tier.path_for("k"), Duration::from_secs(120));

        assert!(!tier.contains("k"));
        assert!(tier.get("k").unwrap().is_none());
        assert!(!tier.path_for("k").exists());
        assert_eq!(tier.evictions(), 1);
    }

    #[test]
    fn test_get_refreshes_mtime() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, Duration::from_secs(3600), Codec::None);
        tier.set(&entry("k")).unwrap();
        let path = tier.path_for("k");
        age_file(&path, Duration::from_secs(1800));

        tier.get("k").unwrap().unwrap();

        let age = SystemTime::now()
            .duration_since(fs::metadata(&path).unwrap().modified().unwrap())
            .unwrap_or_default();
        assert!(age < Duration::from_secs(60));
    }

    #[test]
    fn test_embedded_ttl_is_hard_cap() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, DEFAULT_L2_TTL, Codec::None);
        let mut e = CacheEntry::new("k", json!(1), Duration::from_secs(1), 2);
        e.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        tier.set(&e).unwrap();

        assert!(tier.get("k").unwrap().is_none());
    }

    #[test]
    fn test_contains_agrees_with_get() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, DEFAULT_L2_TTL, Codec::Gzip);

        let mut stale = CacheEntry::new("stale", json!(1), Duration::from_secs(1), 2);
        stale.created_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        tier.set(&stale).unwrap();
        fs::write(tier.path_for("garbled"), b"not gzip at all").unwrap();
        tier.set(&entry("live")).unwrap();

        assert!(!tier.contains("stale"));
        assert!(!tier.contains("garbled"));
        assert!(tier.contains("live"));
        assert_eq!(tier.hits() + tier.misses(), 0);

        assert!(tier.get("stale").unwrap().is_none());
        assert!(tier.get("garbled").unwrap().is_none());
        assert!(tier.get("live").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_file_is_a_miss_and_removed() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, DEFAULT_L2_TTL, Codec::Gzip);
        let path = tier.path_for("k");
        fs::write(&path, b"not gzip at all").unwrap();

        assert!(tier.get("k").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_wrong_shape_is_deserialization_error() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, DEFAULT_L2_TTL, Codec::None);
        fs::write(tier.path_for("k"), br#"{"unexpected": true}"#).unwrap();

        assert_matches!(tier.get("k"), Err(Error::Deserialization { .. }));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, DEFAULT_L2_TTL, Codec::None);
        tier.set(&entry("k")).unwrap();

        assert!(tier.delete("k").unwrap());
        assert!(!tier.delete("k").unwrap());
        assert!(tier.get("k").unwrap().is_none());
    }

    #[test]
    fn test_clean_and_summary() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, Duration::from_secs(60), Codec::None);
        for i in 0..4 {
            tier.set(&entry(&format!("k{}", i))).unwrap();
        }
        age_file(&tier.path_for("k0"), Duration::from_secs(600));
        age_file(&tier.path_for("k1"), Duration::from_secs(600));

        let summary = tier.summary().unwrap();
        assert_eq!(summary.entries, 4);
        assert_eq!(summary.expired, 2);
        assert!(summary.bytes > 0);

        assert_eq!(tier.clean().unwrap(), 2);
        assert_eq!(tier.len(), 2);
        assert!(tier.contains("k2"));
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let tier = tier(&dir, DEFAULT_L2_TTL, Codec::None);
        for i in 0..3 {
            tier.set(&entry(&format!("k{}", i))).unwrap();
        }
        fs::write(tier.dir().join("leftover.tmp"), b"x").unwrap();
        fs::write(tier.dir().join("notes.txt"), b"keep").unwrap();

        tier.clear().unwrap();
        assert!(tier.is_empty());
        assert!(!tier.dir().join("leftover.tmp").exists());
        assert!(tier.dir().join("notes.txt").exists());
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let now = SystemTime::now();
        assert!(!mtime_expired(now - Duration::from_secs(1 << 30), Duration::ZERO, now));
    }
}
