//! Property-Based Tests for the Predictor and Memory Tier
//!
//! # Test Properties
//!
//! 1. **Ranking**: targets are sorted by probability, unique, and bounded
//! 2. **Probability range**: every probability lies in `(0, 1]`
//! 3. **Capacity**: the memory tier never holds more than `max_entries`

#![cfg(test)]

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;

use super::{AccessPredictor, PredictorConfig};
use crate::cache::{CacheEntry, L1Config, MemoryTier};

// =============================================================================
// Property Strategies
// =============================================================================

/// (key index, hit, minutes after the epoch of the run)
fn access_strategy() -> impl Strategy<Value = Vec<(u8, bool, i64)>> {
    prop::collection::vec((0u8..16, any::<bool>(), 0i64..600), 1..200)
}

fn replay(predictor: &AccessPredictor, accesses: &[(u8, bool, i64)]) {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let mut sorted = accesses.to_vec();
    sorted.sort_by_key(|a| a.2);
    for (key, hit, minute) in sorted {
        predictor.record_access_at(
            &format!("cards:set:s{}", key),
            hit,
            64,
            start + ChronoDuration::minutes(minute),
        );
    }
}

// =============================================================================
// Prediction Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_predictions_are_ranked(
        accesses in access_strategy(),
        max_predictions in 1usize..=20,
    ) {
        let predictor = AccessPredictor::new(PredictorConfig {
            max_predictions,
            ..PredictorConfig::default()
        });
        replay(&predictor, &accesses);

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 19, 0, 0).unwrap();
        let targets = predictor.predictions_at(now);

        prop_assert!(targets.len() <= max_predictions);

        let keys: HashSet<&str> = targets.iter().map(|t| t.key.as_str()).collect();
        prop_assert_eq!(keys.len(), targets.len());

        for t in &targets {
            prop_assert!(t.probability > 0.0 && t.probability <= 1.0);
            prop_assert!(t.ttl <= predictor.config().base_prefetch_ttl);
        }
        for pair in targets.windows(2) {
            prop_assert!(pair[0].probability >= pair[1].probability);
            prop_assert!(pair[0].priority > pair[1].priority);
        }
        if let Some(last) = targets.last() {
            prop_assert_eq!(last.priority, 1);
        }
    }

    #[test]
    fn prop_optimize_keeps_only_confident_patterns(accesses in access_strategy()) {
        let predictor = AccessPredictor::new(PredictorConfig::default());
        replay(&predictor, &accesses);

        let later = Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        let report = predictor.optimize_at(later);

        prop_assert_eq!(report.patterns_kept, predictor.pattern_count());
        for i in 0u8..16 {
            if let Some(p) = predictor.pattern(&format!("cards:set:s{}", i)) {
                prop_assert!(p.confidence >= predictor.config().min_confidence);
            }
        }
    }
}

// =============================================================================
// Capacity Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_memory_tier_respects_capacity(
        max_entries in 1usize..=8,
        keys in prop::collection::vec(0u8..32, 1..100),
    ) {
        let tier = MemoryTier::with_config(L1Config {
            max_entries,
            ttl: Duration::from_secs(3600),
        });

        for key in &keys {
            let key = format!("k{}", key);
            tier.set(CacheEntry::new(&key, json!(1), Duration::ZERO, 1))?;
            prop_assert!(tier.len() <= max_entries);
            // The key just written is always resident
            prop_assert!(tier.contains(&key));
        }
    }
}
