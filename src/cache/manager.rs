//! Cache Manager - Tiered Cache Orchestrator
//!
//! Composes L1 (memory), L2 (disk) and an optional L3 (remote) tier:
//!
//! - `get` walks L1 -> L2 -> L3 and promotes hits into every faster tier,
//!   using that tier's own TTL
//! - `set` is fatal only for L1; slower tiers are best-effort
//! - `delete`/`clear` reach every tier and report all failures together
//!
//! # Locking
//!
//! A coarse `gate` orders orchestrator operations: lookups and promotions
//! take it shared, writes take it exclusive. It is always taken before any
//! tier lock and is never held across an L3 `.await`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::entry::{value_size, CacheEntry};
use super::l1::{L1Config, MemoryTier};
use super::l2::{DiskTier, L2Config};
use super::l3::{InMemoryRemote, RemoteBackend, RemoteConfig, RemoteTier};
use super::metrics::{CacheMetrics, CacheStats};
use crate::error::{Error, Result, TierError};
use crate::predictor::{AccessPredictor, Loader, OptimizeReport, PredictorConfig, PrefetchTarget};

/// Cache tier enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CacheTier {
    /// L1 - memory (hot)
    L1,
    /// L2 - disk (warm)
    L2,
    /// L3 - remote (cold)
    L3,
}

impl CacheTier {
    /// Tier number stored in [`CacheEntry::tier`]
    pub fn number(&self) -> u8 {
        match self {
            CacheTier::L1 => 1,
            CacheTier::L2 => 2,
            CacheTier::L3 => 3,
        }
    }
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L1 => write!(f, "L1 (Memory)"),
            CacheTier::L2 => write!(f, "L2 (Disk)"),
            CacheTier::L3 => write!(f, "L3 (Remote)"),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 configuration
    pub l1: L1Config,
    /// L2 configuration
    pub l2: L2Config,
    /// L3 configuration; absent means no remote tier
    pub l3: Option<RemoteConfig>,
    /// Feed accesses to the predictor
    pub enable_predict: bool,
    /// Predictor tuning
    pub predictor: PredictorConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            l2: L2Config::default(),
            l3: None,
            enable_predict: true,
            predictor: PredictorConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load from a YAML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        crate::config::load_file(path.as_ref())
    }

    /// Defaults with the disk tier rooted at `path`
    pub fn with_dir(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            l2: L2Config::at(path),
            ..Self::default()
        }
    }
}

/// What an `optimize` pass removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub l1_removed: usize,
    pub l2_removed: usize,
    pub l3_removed: usize,
    pub predictor: Option<OptimizeReport>,
}

fn ttl_or(ttl: Duration, default: Duration) -> Duration {
    if ttl.is_zero() {
        default
    } else {
        ttl
    }
}

/// Multi-tier cache with access prediction
pub struct TieredCache {
    /// L1 (memory) tier
    l1: MemoryTier,
    /// L2 (disk) tier
    l2: DiskTier,
    /// L3 (remote) tier, always-miss when not configured
    l3: RemoteTier,
    /// Present when `enable_predict` is set
    predictor: Option<Arc<AccessPredictor>>,
    /// Metrics collector
    metrics: CacheMetrics,
    /// Orders orchestrator operations
    gate: RwLock<()>,
    /// Configuration
    config: CacheConfig,
}

impl TieredCache {
    /// Build the cache; an L3 config without a backend gets an in-process one
    ///
    /// Fails only if the L2 directory cannot be created.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let l3 = match &config.l3 {
            Some(remote) => RemoteTier::new(Arc::new(InMemoryRemote::new()), remote.clone()),
            None => RemoteTier::disabled(),
        };
        Self::build(config, l3)
    }

    /// Build the cache over a caller-supplied remote backend
    pub fn with_remote(config: CacheConfig, backend: Arc<dyn RemoteBackend>) -> Result<Self> {
        let remote = config.l3.clone().unwrap_or_default();
        Self::build(config, RemoteTier::new(backend, remote))
    }

    fn build(config: CacheConfig, l3: RemoteTier) -> Result<Self> {
        let l2 = DiskTier::new(config.l2.clone())?;
        let predictor = config
            .enable_predict
            .then(|| Arc::new(AccessPredictor::new(config.predictor.clone())));

        info!(
            dir = %l2.dir().display(),
            codec = %l2.codec(),
            remote = l3.backend_name(),
            predict = config.enable_predict,
            "Tiered cache ready"
        );

        Ok(Self {
            l1: MemoryTier::with_config(config.l1.clone()),
            l2,
            l3,
            predictor,
            metrics: CacheMetrics::new(),
            gate: RwLock::new(()),
            config,
        })
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Get a value, searching every tier
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let found = match self.lookup_local(key)? {
            Some(entry) => Some(entry),
            None => self.lookup_remote(key).await?,
        };

        let value = found.map(|entry| entry.value);
        if let Some(predictor) = &self.predictor {
            let size = value.as_ref().map(value_size).unwrap_or(0);
            predictor.record_access(key, value.is_some(), size);
        }
        Ok(value)
    }

    /// Get and decode a typed value
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::deserialization(key, e)),
            None => Ok(None),
        }
    }

    /// L1 then L2, promoting an L2 hit into L1
    fn lookup_local(&self, key: &str) -> Result<Option<CacheEntry>> {
        let _gate = self.gate.read();

        if let Some(entry) = self.l1.get(key) {
            self.metrics.record_l1_hit();
            debug!(key, "L1 hit");
            return Ok(Some(entry));
        }
        self.metrics.record_l1_miss();

        match self.l2.get(key) {
            Ok(Some(entry)) => {
                self.metrics.record_l2_hit();
                debug!(key, "L2 hit");
                self.promote(&entry, CacheTier::L1);
                Ok(Some(entry))
            }
            Ok(None) => {
                self.metrics.record_l2_miss();
                Ok(None)
            }
            Err(e) if e.is_deserialization() => {
                self.metrics.record_l2_miss();
                Err(e)
            }
            Err(e) => {
                self.metrics.record_l2_miss();
                warn!(key, error = %e, "L2 read failed, treating as miss");
                Ok(None)
            }
        }
    }

    /// L3, then promotion into L2 and L1 under the gate
    async fn lookup_remote(&self, key: &str) -> Result<Option<CacheEntry>> {
        if !self.l3.is_enabled() {
            return Ok(None);
        }

        let entry = match self.l3.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.metrics.record_l3_miss();
                return Ok(None);
            }
            Err(e) if e.is_deserialization() => {
                self.metrics.record_l3_miss();
                return Err(e);
            }
            Err(e) => {
                self.metrics.record_l3_miss();
                warn!(key, error = %e, "L3 read failed, treating as miss");
                return Ok(None);
            }
        };
        self.metrics.record_l3_hit();
        debug!(key, "L3 hit");

        {
            let _gate = self.gate.read();
            self.promote(&entry, CacheTier::L2);
            self.promote(&entry, CacheTier::L1);
        }
        Ok(Some(entry))
    }

    /// Copy `entry` into a faster tier with that tier's TTL
    fn promote(&self, entry: &CacheEntry, into: CacheTier) {
        let result = match into {
            CacheTier::L1 => self.l1.set(entry.retiered(1, self.l1.ttl())),
            // Zero embedded TTL: the file's mtime alone governs L2 expiry
            CacheTier::L2 => self.l2.set(&entry.retiered(2, Duration::ZERO)),
            CacheTier::L3 => return,
        };
        match result {
            Ok(()) => {
                self.metrics.record_promotion();
                debug!(key = %entry.key, tier = %into, "Promoted");
            }
            Err(e) => warn!(key = %entry.key, tier = %into, error = %e, "Promotion failed"),
        }
    }

    /// Whether L1 or L2 holds a live value; touches no counters
    pub fn contains(&self, key: &str) -> bool {
        let _gate = self.gate.read();
        self.l1.contains(key) || self.l2.contains(key)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a value in every tier
    ///
    /// A zero `ttl` takes each tier's configured TTL; in L2 that is the
    /// sliding mtime window. Only an L1 failure fails the call.
    #[instrument(skip(self, value), level = "debug")]
    pub async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<()> {
        let entry = self.write_tiers(key, value, ttl).await?;
        if let Some(predictor) = &self.predictor {
            predictor.record_set(key, &entry.value);
        }
        self.metrics.record_set();
        Ok(())
    }

    /// Serialize and store a typed value
    pub async fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| Error::serialization(key, e))?;
        self.set(key, value, ttl).await
    }

    async fn write_tiers(&self, key: &str, value: serde_json::Value, ttl: Duration) -> Result<CacheEntry> {
        let entry = CacheEntry::new(key, value, ttl_or(ttl, self.l1.ttl()), 1);

        {
            let _gate = self.gate.write();
            self.l1.set(entry.clone())?;
            // An explicit TTL caps the L2 file; zero leaves it to the mtime window
            if let Err(e) = self.l2.set(&entry.retiered(2, ttl)) {
                warn!(key, error = %e, "L2 write failed");
            }
        }

        if self.l3.is_enabled() {
            if let Err(e) = self.l3.set(&entry.retiered(3, ttl_or(ttl, self.l3.ttl()))).await {
                warn!(key, error = %e, "L3 write failed");
            }
        }
        Ok(entry)
    }

    /// Remove a key from every tier
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut errors = Vec::new();

        {
            let _gate = self.gate.write();
            self.l1.delete(key);
            if let Err(error) = self.l2.delete(key) {
                errors.push(TierError {
                    tier: CacheTier::L2,
                    error,
                });
            }
        }

        if let Err(error) = self.l3.delete(key).await {
            errors.push(TierError {
                tier: CacheTier::L3,
                error,
            });
        }

        self.metrics.record_delete();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Tiers(errors))
        }
    }

    /// Empty every tier and reset statistics
    ///
    /// Learned access patterns survive.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let mut errors = Vec::new();

        {
            let _gate = self.gate.write();
            self.l1.clear();
            if let Err(error) = self.l2.clear() {
                errors.push(TierError {
                    tier: CacheTier::L2,
                    error,
                });
            }
        }

        if let Err(error) = self.l3.clear().await {
            errors.push(TierError {
                tier: CacheTier::L3,
                error,
            });
        }

        self.metrics.reset(self.tier_evictions());
        info!(failed = errors.len(), "Cache cleared");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Tiers(errors))
        }
    }

    // =========================================================================
    // Prefetch
    // =========================================================================

    /// Load targets in priority order, skipping cached keys
    ///
    /// The token is checked between targets, never during a load. Loader
    /// failures are logged and skipped. Returns how many values were stored.
    #[instrument(skip(self, token, targets), fields(targets = targets.len()))]
    pub async fn prefetch(&self, token: &CancellationToken, mut targets: Vec<PrefetchTarget>) -> Result<usize> {
        targets.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut stored = 0;

        for target in targets {
            if token.is_cancelled() {
                info!(stored, "Prefetch cancelled");
                return Err(Error::Cancelled);
            }
            if self.contains(&target.key) {
                continue;
            }
            let Some(load) = target.loader.as_ref() else {
                continue;
            };

            let value = match load(target.key.clone()).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(key = %target.key, error = %e, "Prefetch loader failed");
                    continue;
                }
            };

            match self.write_tiers(&target.key, value, target.ttl).await {
                Ok(_) => {
                    stored += 1;
                    self.metrics.record_prefetched();
                    debug!(key = %target.key, source = %target.source, "Prefetched");
                }
                Err(e) => warn!(key = %target.key, error = %e, "Prefetch write failed"),
            }
        }

        Ok(stored)
    }

    /// Prefetch the predictor's current targets
    ///
    /// `resolver` supplies a loader per target; targets it declines are
    /// skipped. Without a predictor this is a no-op.
    pub async fn prefetch_predicted<R>(&self, token: &CancellationToken, resolver: R) -> Result<usize>
    where
        R: Fn(&PrefetchTarget) -> Option<Loader>,
    {
        let Some(predictor) = &self.predictor else {
            return Ok(0);
        };

        let targets: Vec<PrefetchTarget> = predictor
            .predictions()
            .into_iter()
            .filter_map(|t| resolver(&t).map(|load| t.with_loader(load)))
            .collect();
        self.prefetch(token, targets).await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Sweep expired entries from every tier, then optimize the predictor
    ///
    /// Tier failures are collected; the predictor still runs.
    #[instrument(skip(self))]
    pub async fn optimize(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        let mut errors = Vec::new();

        report.l1_removed = self.l1.clean();
        match self.l2.clean() {
            Ok(n) => report.l2_removed = n,
            Err(error) => errors.push(TierError {
                tier: CacheTier::L2,
                error,
            }),
        }
        match self.l3.clean().await {
            Ok(n) => {
                report.l3_removed = n;
                self.metrics.record_evictions(n as u64);
            }
            Err(error) => errors.push(TierError {
                tier: CacheTier::L3,
                error,
            }),
        }

        report.predictor = self.predictor.as_ref().map(|p| p.optimize());

        info!(
            l1_removed = report.l1_removed,
            l2_removed = report.l2_removed,
            l3_removed = report.l3_removed,
            failed = errors.len(),
            "Cache optimized"
        );
        if errors.is_empty() {
            Ok(report)
        } else {
            Err(Error::Tiers(errors))
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    fn tier_evictions(&self) -> u64 {
        self.l1.evictions() + self.l2.evictions()
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.tier_evictions())
    }

    /// Get reference to the L1 tier
    pub fn l1(&self) -> &MemoryTier {
        &self.l1
    }

    /// Get reference to the L2 tier
    pub fn l2(&self) -> &DiskTier {
        &self.l2
    }

    /// Get reference to the L3 tier
    pub fn l3(&self) -> &RemoteTier {
        &self.l3
    }

    /// The predictor, when enabled
    pub fn predictor(&self) -> Option<&Arc<AccessPredictor>> {
        self.predictor.as_ref()
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("l1_entries", &self.l1.len())
            .field("l2", &self.l2)
            .field("l3", &self.l3)
            .field("predict", &self.predictor.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
