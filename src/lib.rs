//! pricecache - Tiered cache with predictive prefetching for card pricing data
//!
//! Sits between pricing callers and slow, rate-limited upstream sources.
//!
//! # Architecture
//!
//! ```text
//! caller → TieredCache (L1 → L2 → L3) → AccessPredictor → prefetch targets
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Memory, disk and remote tiers plus the orchestrator
//! - [`config`] - Duration parsing and config file loading
//! - [`error`] - Error types
//! - [`keys`] - Deterministic cache key builders
//! - [`predictor`] - Access pattern learning and prefetch targets
//! - [`store`] - Standalone single-file JSON cache

pub mod cache;
pub mod config;
pub mod error;
pub mod keys;
pub mod predictor;
pub mod store;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStats, CacheTier, TieredCache};
pub use error::{Error, Result};
pub use predictor::{AccessPredictor, PredictorConfig, PrefetchTarget};
pub use store::EntryStore;
