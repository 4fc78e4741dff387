//! Prefetch targets produced by the predictor

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;

use crate::error::Result;

/// Async loader that fetches the value for a key from its source
pub type Loader = Arc<dyn Fn(String) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Wrap an async closure as a [`Loader`]
pub fn loader<F, Fut>(f: F) -> Loader
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(move |key| f(key).boxed())
}

/// Which model produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Frequency,
    Sequence,
    TimeOfDay,
    Correlation,
}

impl fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PredictionSource::Frequency => "frequency",
            PredictionSource::Sequence => "sequence",
            PredictionSource::TimeOfDay => "time_of_day",
            PredictionSource::Correlation => "correlation",
        };
        f.write_str(name)
    }
}

/// A key worth loading before it is asked for
#[derive(Clone)]
pub struct PrefetchTarget {
    pub key: String,
    /// Higher runs first
    pub priority: usize,
    /// TTL for the prefetched value
    pub ttl: Duration,
    /// In `[0, 1]`
    pub probability: f64,
    pub source: PredictionSource,
    /// Fetches the value; targets without one are skipped by prefetch
    pub loader: Option<Loader>,
}

impl PrefetchTarget {
    pub fn new(
        key: impl Into<String>,
        priority: usize,
        ttl: Duration,
        probability: f64,
        source: PredictionSource,
    ) -> Self {
        Self {
            key: key.into(),
            priority,
            ttl,
            probability,
            source,
            loader: None,
        }
    }

    /// Attach a loader
    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loader = Some(loader);
        self
    }
}

impl fmt::Debug for PrefetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchTarget")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("ttl", &self.ttl)
            .field("probability", &self.probability)
            .field("source", &self.source)
            .field("loader", &self.loader.is_some())
            .finish()
    }
}
