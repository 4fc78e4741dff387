//! Multi-Tier Cache
//!
//! L1 (memory), L2 (disk) and an optional L3 (remote) tier behind one
//! orchestrator.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         TieredCache                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  L1 MemoryTier      │ L2 DiskTier          │ L3 RemoteTier       │
//! │  ┌───────────────┐  │ ┌─────────────────┐  │ ┌────────────────┐  │
//! │  │ HashMap + LRU │  │ │ file per key    │  │ │ async backend  │  │
//! │  │ tick          │  │ │ sha256 name     │  │ │ + timeout      │  │
//! │  │ default 1000  │  │ │ mtime expiry    │  │ │ (optional)     │  │
//! │  └───────────────┘  │ └─────────────────┘  │ └────────────────┘  │
//! │          ▲ promote  │          ▲ promote   │                     │
//! │          └──────────┴──────────┴───────────┘                     │
//! │                              │                                   │
//! │                     AccessPredictor                              │
//! │            (frequency / sequence / time / correlation)           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod compression;
pub mod entry;
pub mod exporter;
pub mod l1;
pub mod l2;
pub mod l3;
pub mod manager;
pub mod metrics;

pub use compression::Codec;
pub use entry::CacheEntry;
pub use l1::{L1Config, MemoryTier};
pub use l2::{DiskSummary, DiskTier, L2Config};
pub use l3::{InMemoryRemote, NoopRemote, RemoteBackend, RemoteConfig, RemoteTier};
pub use manager::{CacheConfig, CacheTier, MaintenanceReport, TieredCache};
pub use metrics::{CacheMetrics, CacheStats};
