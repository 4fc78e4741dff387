//! Error types for the pricing cache

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cache::CacheTier;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pricing cache
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be serialized for storage
    #[error("Failed to serialize value for key {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// Stored bytes were found and valid but could not be decoded
    #[error("Failed to deserialize cached value for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    /// Persisted bytes are truncated or garbled
    #[error("Corrupt cache data for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// L2 base directory could not be created
    #[error("Cannot create cache directory {}: {source}", path.display())]
    CacheDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {codec} failed: {reason}")]
    Compression { codec: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {codec} failed: {reason}")]
    Decompression { codec: String, reason: String },

    // =========================================================================
    // Remote Tier Errors
    // =========================================================================
    /// Remote backend error
    #[error("Remote tier error: {0}")]
    Remote(String),

    /// Remote backend did not answer in time
    #[error("Remote tier {op} timed out after {timeout:?}")]
    RemoteTimeout { op: &'static str, timeout: Duration },

    /// One or more tiers failed during a fan-out operation
    #[error("{} tier(s) failed: {}", .0.len(), format_tier_errors(.0))]
    Tiers(Vec<TierError>),

    // =========================================================================
    // Prefetch Errors
    // =========================================================================
    /// Prefetch was cancelled between targets
    #[error("Prefetch cancelled")]
    Cancelled,

    /// A prefetch loader failed
    #[error("Loader for key {key} failed: {reason}")]
    Loader { key: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics encoding error
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// A failure reported by a single tier during `delete`/`clear`
#[derive(Debug)]
pub struct TierError {
    /// Tier that failed
    pub tier: CacheTier,
    /// Underlying error
    pub error: Error,
}

impl std::fmt::Display for TierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.tier, self.error)
    }
}

fn format_tier_errors(errors: &[TierError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Build a serialization error for `key`
    pub fn serialization(key: &str, err: impl std::fmt::Display) -> Self {
        Error::Serialization {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    /// Build a deserialization error for `key`
    pub fn deserialization(key: &str, err: impl std::fmt::Display) -> Self {
        Error::Deserialization {
            key: key.to_string(),
            reason: err.to_string(),
        }
    }

    /// Returns true if the error came from decoding a stored value
    pub fn is_deserialization(&self) -> bool {
        matches!(self, Error::Deserialization { .. })
    }
}
