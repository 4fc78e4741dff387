//! Access Predictor
//!
//! Watches every cache access and learns four signals:
//!
//! - **Frequency**: accesses per hour, weighted by recency-decayed confidence
//! - **Sequence**: which key followed a recent chain of keys
//! - **Time of day**: each key's share of accesses in the current hour
//! - **Correlation**: keys accessed within a short window of each other
//!
//! The signals are merged into ranked [`PrefetchTarget`]s. State only shrinks
//! in [`AccessPredictor::optimize`]; callers schedule it.
//!
//! Every entry point has an `_at` variant taking the clock explicitly, which
//! keeps the models deterministic under test.

pub mod pattern;
mod proptest;
pub mod target;

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::entry::value_size;
use crate::keys;

pub use pattern::{AccessPattern, AccessRecord, FrequencyBasis, SequencePattern, TimePattern};
pub use target::{loader, Loader, PredictionSource, PrefetchTarget};

/// Joins chain keys; cannot appear in cache keys built by [`keys`]
const CHAIN_SEPARATOR: char = '\u{1f}';

/// Accesses/hour at which the frequency signal saturates
const FREQUENCY_SATURATION: f64 = 10.0;

/// Base probability for a correlated key
const CORRELATION_BASE: f64 = 0.3;

/// Predictor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Access records kept in the history ring
    pub max_history: usize,
    /// Recent keys tracked for sequence matching
    pub sequence_length: usize,
    /// Shortest chain that is learned and matched
    pub min_sequence_length: usize,
    /// Targets returned by `predictions`
    pub max_predictions: usize,
    /// Accesses closer than this are correlated
    #[serde(with = "crate::config::duration_str")]
    pub correlation_window: Duration,
    /// Minimum share of an hour's accesses for the time signal
    pub min_time_share: f64,
    /// TTL of a prefetched value at probability 1.0
    #[serde(with = "crate::config::duration_str")]
    pub base_prefetch_ttl: Duration,
    /// Sequences unseen for longer are pruned
    #[serde(with = "crate::config::duration_str")]
    pub sequence_idle_limit: Duration,
    /// Patterns decayed below this are pruned
    pub min_confidence: f64,
    pub frequency_basis: FrequencyBasis,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            sequence_length: 5,
            min_sequence_length: 2,
            max_predictions: 20,
            correlation_window: Duration::from_secs(5 * 60),
            min_time_share: 0.10,
            base_prefetch_ttl: Duration::from_secs(3600),
            sequence_idle_limit: Duration::from_secs(7 * 24 * 3600),
            min_confidence: 0.1,
            frequency_basis: FrequencyBasis::FirstSeen,
        }
    }
}

/// What an `optimize` pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    pub history_trimmed: usize,
    pub patterns_removed: usize,
    pub patterns_kept: usize,
    pub sequences_removed: usize,
    pub correlations_removed: usize,
}

#[derive(Debug, Default)]
struct PredictorState {
    history: VecDeque<AccessRecord>,
    patterns: HashMap<String, AccessPattern>,
    sequences: HashMap<String, SequencePattern>,
    time_patterns: HashMap<u32, TimePattern>,
    correlations: HashMap<String, HashMap<String, u64>>,
    recent: VecDeque<String>,
}

fn chain_key<S: AsRef<str>>(keys: &[S]) -> String {
    let mut out = String::new();
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push(CHAIN_SEPARATOR);
        }
        out.push_str(k.as_ref());
    }
    out
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

fn local_hour(at: DateTime<Utc>) -> u32 {
    at.with_timezone(&Local).hour()
}

/// Learns access patterns and emits prefetch targets
pub struct AccessPredictor {
    config: PredictorConfig,
    state: RwLock<PredictorState>,
}

impl AccessPredictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            state: RwLock::new(PredictorState::default()),
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Record an access now
    pub fn record_access(&self, key: &str, hit: bool, size: usize) {
        self.record_access_at(key, hit, size, Utc::now());
    }

    /// Record an access at `at`
    pub fn record_access_at(&self, key: &str, hit: bool, size: usize, at: DateTime<Utc>) {
        let mut guard = self.state.write();
        let state = &mut *guard;

        // Correlation with recent distinct keys in the window
        let window = chrono_duration(self.config.correlation_window);
        let mut neighbours: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for record in state
            .history
            .iter()
            .rev()
            .take_while(|r| at - r.timestamp <= window)
        {
            if record.key != key && seen.insert(record.key.as_str()) {
                neighbours.push(record.key.clone());
            }
        }
        for other in neighbours {
            *state
                .correlations
                .entry(key.to_string())
                .or_default()
                .entry(other.clone())
                .or_insert(0) += 1;
            *state
                .correlations
                .entry(other)
                .or_default()
                .entry(key.to_string())
                .or_insert(0) += 1;
        }

        state.history.push_back(AccessRecord {
            key: key.to_string(),
            timestamp: at,
            hit,
            size,
            context: keys::context_tag(key).to_string(),
        });
        while state.history.len() > self.config.max_history {
            state.history.pop_front();
        }

        state
            .patterns
            .entry(key.to_string())
            .or_insert_with(|| AccessPattern::new(key, at))
            .observe(at, hit, size, self.config.frequency_basis);

        // Every suffix of the recent window learns `key` as its successor
        let recent: Vec<String> = state.recent.iter().cloned().collect();
        for len in self.config.min_sequence_length.max(1)..=recent.len() {
            let chain = &recent[recent.len() - len..];
            state
                .sequences
                .entry(chain_key(chain))
                .or_insert_with(|| SequencePattern::new(chain.to_vec(), at))
                .observe(key, at);
        }
        state.recent.push_back(key.to_string());
        while state.recent.len() > self.config.sequence_length {
            state.recent.pop_front();
        }

        let hour = local_hour(at);
        state
            .time_patterns
            .entry(hour)
            .or_insert_with(|| TimePattern::new(hour))
            .observe(key, keys::set_id(key));
    }

    /// Fold the size of a written value into the key's pattern
    ///
    /// Writes are not accesses; keys never read are left alone.
    pub fn record_set(&self, key: &str, value: &serde_json::Value) {
        let mut state = self.state.write();
        if let Some(pattern) = state.patterns.get_mut(key) {
            pattern.fold_size(value_size(value));
        }
    }

    // =========================================================================
    // Signals
    // =========================================================================

    fn frequency_signal(&self, state: &PredictorState, now: DateTime<Utc>) -> Vec<(String, f64)> {
        state
            .patterns
            .values()
            .map(|p| {
                let p_freq = (p.frequency / FREQUENCY_SATURATION).min(1.0);
                (p.key.clone(), p_freq * p.confidence_at(now))
            })
            .collect()
    }

    fn sequence_signal(&self, state: &PredictorState) -> Vec<(String, f64)> {
        let recent: Vec<&str> = state.recent.iter().map(String::as_str).collect();
        let mut out = Vec::new();
        for len in self.config.min_sequence_length.max(1)..=recent.len() {
            let chain = &recent[recent.len() - len..];
            if let Some(seq) = state.sequences.get(&chain_key(chain)) {
                out.extend(seq.predictions().map(|(k, p)| (k.to_string(), p)));
            }
        }
        out
    }

    fn time_signal(&self, state: &PredictorState, now: DateTime<Utc>) -> Vec<(String, f64)> {
        state
            .time_patterns
            .get(&local_hour(now))
            .map(|tp| {
                tp.popular_keys(self.config.min_time_share)
                    .map(|(k, share)| (k.to_string(), share))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn correlation_signal(&self, state: &PredictorState, now: DateTime<Utc>) -> Vec<(String, f64)> {
        let Some(latest) = state.history.back() else {
            return Vec::new();
        };
        let Some(correlated) = state.correlations.get(&latest.key) else {
            return Vec::new();
        };

        correlated
            .keys()
            .map(|other| {
                let confidence = state
                    .patterns
                    .get(other)
                    .map(|p| p.confidence_at(now))
                    .unwrap_or(0.0);
                (other.clone(), (CORRELATION_BASE * (1.0 + confidence)).min(1.0))
            })
            .collect()
    }

    // =========================================================================
    // Predictions
    // =========================================================================

    /// Ranked prefetch targets for now
    pub fn predictions(&self) -> Vec<PrefetchTarget> {
        self.predictions_at(Utc::now())
    }

    /// Ranked prefetch targets at `now`
    ///
    /// A key suggested by several signals keeps its highest probability.
    pub fn predictions_at(&self, now: DateTime<Utc>) -> Vec<PrefetchTarget> {
        let state = self.state.read();

        let signals = [
            (PredictionSource::Frequency, self.frequency_signal(&state, now)),
            (PredictionSource::Sequence, self.sequence_signal(&state)),
            (PredictionSource::TimeOfDay, self.time_signal(&state, now)),
            (PredictionSource::Correlation, self.correlation_signal(&state, now)),
        ];
        drop(state);

        let mut best: HashMap<String, (f64, PredictionSource)> = HashMap::new();
        for (source, candidates) in signals {
            for (key, probability) in candidates {
                if probability <= 0.0 || !probability.is_finite() {
                    continue;
                }
                let probability = probability.min(1.0);
                best.entry(key)
                    .and_modify(|cur| {
                        if probability > cur.0 {
                            *cur = (probability, source);
                        }
                    })
                    .or_insert((probability, source));
            }
        }

        let mut ranked: Vec<(String, f64, PredictionSource)> =
            best.into_iter().map(|(k, (p, s))| (k, p, s)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.config.max_predictions);

        let n = ranked.len();
        ranked
            .into_iter()
            .enumerate()
            .map(|(rank, (key, probability, source))| {
                let ttl = self
                    .config
                    .base_prefetch_ttl
                    .mul_f64(probability.clamp(0.1, 1.0));
                PrefetchTarget::new(key, n - rank, ttl, probability, source)
            })
            .collect()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Trim, decay and prune now
    pub fn optimize(&self) -> OptimizeReport {
        self.optimize_at(Utc::now())
    }

    /// Trim the history, decay patterns and prune stale state at `now`
    pub fn optimize_at(&self, now: DateTime<Utc>) -> OptimizeReport {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut report = OptimizeReport::default();

        let over = state.history.len().saturating_sub(self.config.max_history);
        state.history.drain(..over);
        report.history_trimmed = over;

        let min_confidence = self.config.min_confidence;
        let mut removed: HashSet<String> = HashSet::new();
        state.patterns.retain(|key, pattern| {
            let keep = pattern.decay(now) >= min_confidence;
            if !keep {
                removed.insert(key.clone());
            }
            keep
        });
        report.patterns_removed = removed.len();
        report.patterns_kept = state.patterns.len();

        let idle = chrono_duration(self.config.sequence_idle_limit);
        let before = state.sequences.len();
        state.sequences.retain(|_, s| now - s.last_seen <= idle);
        report.sequences_removed = before - state.sequences.len();

        if !removed.is_empty() {
            let before = state.correlations.len();
            state.correlations.retain(|key, others| {
                others.retain(|other, _| !removed.contains(other));
                !removed.contains(key) && !others.is_empty()
            });
            report.correlations_removed = before - state.correlations.len();

            for bucket in state.time_patterns.values_mut() {
                for key in &removed {
                    bucket.forget(key);
                }
            }
        }

        debug!(?report, "Predictor optimized");
        report
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }

    pub fn pattern(&self, key: &str) -> Option<AccessPattern> {
        self.state.read().patterns.get(key).cloned()
    }

    pub fn pattern_count(&self) -> usize {
        self.state.read().patterns.len()
    }

    pub fn sequence_count(&self) -> usize {
        self.state.read().sequences.len()
    }

    /// Card sets by share of accesses in `hour` (0-23, local time)
    pub fn popular_sets(&self, hour: u32) -> Vec<(String, f64)> {
        self.state
            .read()
            .time_patterns
            .get(&hour)
            .map(TimePattern::set_shares)
            .unwrap_or_default()
    }

    /// Keys correlated with `key`, most frequent first
    pub fn correlated(&self, key: &str) -> Vec<(String, u64)> {
        let state = self.state.read();
        let mut out: Vec<(String, u64)> = state
            .correlations
            .get(key)
            .map(|m| m.iter().map(|(k, n)| (k.clone(), *n)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

impl Default for AccessPredictor {
    fn default() -> Self {
        Self::new(PredictorConfig::default())
    }
}

impl std::fmt::Debug for AccessPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("AccessPredictor")
            .field("history", &state.history.len())
            .field("patterns", &state.patterns.len())
            .field("sequences", &state.sequences.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
