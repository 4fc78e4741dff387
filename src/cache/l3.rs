//! L3 Cache - Remote Tier
//!
//! Optional out-of-process tier behind an async backend trait. When no
//! backend is configured the tier is a [`NoopRemote`] that always misses,
//! so the orchestrator never branches on its presence.
//!
//! # Design
//!
//! - Every backend call is bounded by [`RemoteConfig::timeout`]
//! - Entries cross the trait as JSON-encoded [`CacheEntry`] bytes
//! - Callers must not hold a lock while awaiting this tier

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::entry::{ttl_elapsed, CacheEntry};
use crate::error::{Error, Result};

/// Default per-call timeout for the remote backend
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default remote TTL (7 days)
pub const DEFAULT_REMOTE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Remote tier backend
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Fetch the stored payload for `key`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a payload; a zero `ttl` never expires
    async fn set(&self, key: &str, data: Bytes, ttl: Duration) -> Result<()>;

    /// Remove `key`, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Drop expired payloads, returning how many were removed
    async fn clean(&self) -> Result<usize>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Whether this backend can ever hit
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Backend used when no remote tier is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRemote;

#[async_trait]
impl RemoteBackend for NoopRemote {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _data: Bytes, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn clean(&self) -> Result<usize> {
        Ok(0)
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

struct StoredPayload {
    data: Bytes,
    stored_at: DateTime<Utc>,
    ttl: Duration,
}

/// In-process remote backend, used in tests and single-node setups
#[derive(Default)]
pub struct InMemoryRemote {
    storage: DashMap<String, StoredPayload>,
    total_bytes: AtomicU64,
}

impl InMemoryRemote {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored payloads
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Bytes held across all payloads
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    fn forget(&self, payload: &StoredPayload) {
        self.total_bytes
            .fetch_sub(payload.data.len() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl RemoteBackend for InMemoryRemote {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let expired = match self.storage.get(key) {
            Some(p) if !ttl_elapsed(p.stored_at, p.ttl, Utc::now()) => {
                return Ok(Some(p.data.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            if let Some((_, old)) = self.storage.remove(key) {
                self.forget(&old);
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, data: Bytes, ttl: Duration) -> Result<()> {
        self.total_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        let payload = StoredPayload {
            data,
            stored_at: Utc::now(),
            ttl,
        };
        if let Some(old) = self.storage.insert(key.to_string(), payload) {
            self.forget(&old);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match self.storage.remove(key) {
            Some((_, old)) => {
                self.forget(&old);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clean(&self) -> Result<usize> {
        let now = Utc::now();
        let before = self.storage.len();
        self.storage.retain(|_, p| {
            let keep = !ttl_elapsed(p.stored_at, p.ttl, now);
            if !keep {
                self.total_bytes
                    .fetch_sub(p.data.len() as u64, Ordering::Relaxed);
            }
            keep
        });
        Ok(before.saturating_sub(self.storage.len()))
    }

    async fn clear(&self) -> Result<()> {
        self.storage.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Remote tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Bound on every backend call
    #[serde(with = "crate::config::duration_str")]
    pub timeout: Duration,
    /// TTL applied to entries written into this tier
    #[serde(with = "crate::config::duration_str")]
    pub ttl: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REMOTE_TIMEOUT,
            ttl: DEFAULT_REMOTE_TTL,
        }
    }
}

/// L3 Cache - remote tier wrapper with timeouts and entry encoding
pub struct RemoteTier {
    /// Backend
    backend: Arc<dyn RemoteBackend>,
    /// Configuration
    config: RemoteConfig,
    /// Hit count
    hits: AtomicU64,
    /// Miss count
    misses: AtomicU64,
}

impl RemoteTier {
    /// Create a tier over `backend`
    pub fn new(backend: Arc<dyn RemoteBackend>, config: RemoteConfig) -> Self {
        Self {
            backend,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Tier that always misses
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopRemote), RemoteConfig::default())
    }

    /// Create with in-memory backend (for testing)
    pub fn in_memory(config: RemoteConfig) -> Self {
        Self::new(Arc::new(InMemoryRemote::new()), config)
    }

    /// Whether a real backend is attached
    pub fn is_enabled(&self) -> bool {
        self.backend.is_enabled()
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::RemoteTimeout {
                op,
                timeout: self.config.timeout,
            }),
        }
    }

    /// Get an entry from the remote tier
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let result = self.bounded("get", self.backend.get(key)).await;
        let data = match result {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        match serde_json::from_slice::<CacheEntry>(&data) {
            Ok(entry) if entry.key == key && !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            Ok(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(Error::deserialization(key, e))
            }
        }
    }

    /// Write an entry to the remote tier
    pub async fn set(&self, entry: &CacheEntry) -> Result<()> {
        let mut stored = entry.clone();
        stored.tier = 3;
        stored.compressed = false;
        let data = serde_json::to_vec(&stored).map_err(|e| Error::serialization(&entry.key, e))?;
        self.bounded("set", self.backend.set(&entry.key, Bytes::from(data), stored.ttl))
            .await
    }

    /// Delete an entry
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.bounded("delete", self.backend.delete(key)).await
    }

    /// Drop expired entries
    pub async fn clean(&self) -> Result<usize> {
        self.bounded("clean", self.backend.clean()).await
    }

    /// Remove everything
    pub async fn clear(&self) -> Result<()> {
        self.bounded("clear", self.backend.clear()).await
    }

    /// TTL used for entries written into this tier
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RemoteTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTier")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
