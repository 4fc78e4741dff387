//! Learned access statistics
//!
//! Plain data kept by the predictor. Nothing here takes a lock; the
//! predictor owns all of it behind one `RwLock`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Patterns reach full confidence after this many observations
const CONFIDENCE_SATURATION: f64 = 10.0;

/// Recency decay constant in hours
const DECAY_HOURS: f64 = 24.0;

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds().max(0) as f64) / 3_600_000.0
}

/// `exp(-hours/24)`
pub fn recency_decay(hours: f64) -> f64 {
    (-hours.max(0.0) / DECAY_HOURS).exp()
}

fn saturating_confidence(observations: u64) -> f64 {
    (observations as f64 / CONFIDENCE_SATURATION).min(1.0)
}

/// How an access pattern's frequency (accesses/hour) is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyBasis {
    /// Total accesses over the time since the key was first seen (at least one hour)
    #[default]
    FirstSeen,
    /// Total accesses over the gap since the previous access (at least one second)
    PreviousAccess,
}

/// One observed access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub hit: bool,
    /// Payload size estimate in bytes
    pub size: usize,
    /// Inferred context (leading key namespace)
    pub context: String,
}

/// Per-key learned statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessPattern {
    pub key: String,
    pub count: u64,
    pub hits: u64,
    pub hit_rate: f64,
    pub avg_size: f64,
    /// Accesses per hour
    pub frequency: f64,
    /// In `[0, 1]`
    pub confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Last time `optimize` applied decay
    pub decayed_at: DateTime<Utc>,
}

impl AccessPattern {
    pub fn new(key: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            count: 0,
            hits: 0,
            hit_rate: 0.0,
            avg_size: 0.0,
            frequency: 0.0,
            confidence: 0.0,
            first_seen: at,
            last_accessed: at,
            decayed_at: at,
        }
    }

    /// Fold one access into the pattern
    pub fn observe(&mut self, at: DateTime<Utc>, hit: bool, size: usize, basis: FrequencyBasis) {
        let previous = self.last_accessed;

        self.count += 1;
        if hit {
            self.hits += 1;
        }
        self.hit_rate = self.hits as f64 / self.count as f64;
        self.fold_size(size);

        let hours = match basis {
            FrequencyBasis::FirstSeen => hours_between(self.first_seen, at).max(1.0),
            FrequencyBasis::PreviousAccess => hours_between(previous, at).max(1.0 / 3600.0),
        };
        self.frequency = self.count as f64 / hours;
        self.confidence = saturating_confidence(self.count);
        self.last_accessed = at;
    }

    /// Fold a size sample into the running average without counting an access
    pub fn fold_size(&mut self, size: usize) {
        let n = self.count.max(1) as f64;
        self.avg_size += (size as f64 - self.avg_size) / n;
    }

    /// Confidence decayed by time since the last access or decay pass
    pub fn confidence_at(&self, now: DateTime<Utc>) -> f64 {
        let since = self.last_accessed.max(self.decayed_at);
        (self.confidence * recency_decay(hours_between(since, now))).clamp(0.0, 1.0)
    }

    /// Apply decay up to `now` and return the new confidence
    pub fn decay(&mut self, now: DateTime<Utc>) -> f64 {
        let since = self.last_accessed.max(self.decayed_at);
        let factor = recency_decay(hours_between(since, now));
        self.frequency *= factor;
        self.confidence = (self.confidence * factor).clamp(0.0, 1.0);
        self.decayed_at = now;
        self.confidence
    }
}

/// An observed key chain and what followed it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencePattern {
    pub keys: Vec<String>,
    /// Times the chain was observed with a successor
    pub support: u64,
    /// Successor key -> times it followed the chain
    pub successors: HashMap<String, u64>,
    /// In `[0, 1]`
    pub confidence: f64,
    pub last_seen: DateTime<Utc>,
}

impl SequencePattern {
    pub fn new(keys: Vec<String>, at: DateTime<Utc>) -> Self {
        Self {
            keys,
            support: 0,
            successors: HashMap::new(),
            confidence: 0.0,
            last_seen: at,
        }
    }

    pub fn observe(&mut self, next: &str, at: DateTime<Utc>) {
        self.support += 1;
        *self.successors.entry(next.to_string()).or_insert(0) += 1;
        self.confidence = saturating_confidence(self.support);
        self.last_seen = at;
    }

    /// `(successor count / support) * confidence` for each successor
    pub fn predictions(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        let support = self.support.max(1) as f64;
        self.successors
            .iter()
            .map(move |(k, n)| (k.as_str(), (*n as f64 / support) * self.confidence))
    }
}

/// Popularity within one hour of the day
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimePattern {
    pub hour: u32,
    pub total: u64,
    pub keys: HashMap<String, u64>,
    pub sets: HashMap<String, u64>,
}

impl TimePattern {
    pub fn new(hour: u32) -> Self {
        Self {
            hour,
            ..Self::default()
        }
    }

    pub fn observe(&mut self, key: &str, set: Option<&str>) {
        self.total += 1;
        *self.keys.entry(key.to_string()).or_insert(0) += 1;
        if let Some(set) = set {
            *self.sets.entry(set.to_string()).or_insert(0) += 1;
        }
    }

    fn share_of(&self, n: u64) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            n as f64 / self.total as f64
        }
    }

    /// Key shares at or above `min_share`
    pub fn popular_keys(&self, min_share: f64) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.keys
            .iter()
            .map(|(k, n)| (k.as_str(), self.share_of(*n)))
            .filter(move |(_, share)| *share >= min_share)
    }

    /// Every set with its share, highest first
    pub fn set_shares(&self) -> Vec<(String, f64)> {
        let mut shares: Vec<_> = self
            .sets
            .iter()
            .map(|(s, n)| (s.clone(), self.share_of(*n)))
            .collect();
        shares.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        shares
    }

    /// Drop a key's counts from the bucket
    pub fn forget(&mut self, key: &str) {
        if let Some(n) = self.keys.remove(key) {
            self.total = self.total.saturating_sub(n);
        }
    }
}
