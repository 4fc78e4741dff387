//! pricecache Integration Tests
//!
//! - Entry store: TTL, persistence and corruption tolerance
//! - Tiered cache: promotion, statistics, fan-out error handling
//! - Predictor: ranking and sequence prediction through the public API
//! - Concurrency: shared cache across tasks

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CardPrice {
    card: String,
    market: f64,
    sources: Vec<String>,
}

fn sample_price() -> CardPrice {
    CardPrice {
        card: "sv4-25".to_string(),
        market: 42.5,
        sources: vec!["tcgplayer".to_string(), "ebay".to_string()],
    }
}

// =============================================================================
// Entry Store
// =============================================================================

mod store_tests {
    use super::*;
    use pricecache::store::Entry;
    use pricecache::EntryStore;

    #[test]
    fn test_roundtrip_before_expiry() {
        let dir = TempDir::new().unwrap();
        let store = EntryStore::open(dir.path().join("cache.json"));

        store.put("prices:sv4-25", &sample_price(), Duration::from_secs(3600)).unwrap();
        assert_eq!(
            store.get::<CardPrice>("prices:sv4-25").unwrap(),
            Some(sample_price())
        );
    }

    #[test]
    fn test_ttl_invariant() {
        let now = chrono::Utc::now();
        let forever = Entry {
            data: json!(1),
            timestamp: now,
            ttl: Duration::ZERO,
        };
        let short = Entry {
            ttl: Duration::from_secs(10),
            ..forever.clone()
        };

        let much_later = now + chrono::Duration::days(3650);
        assert!(!forever.is_expired_at(much_later));
        assert!(!short.is_expired_at(now + chrono::Duration::seconds(10)));
        assert!(short.is_expired_at(now + chrono::Duration::seconds(11)));
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        {
            let store = EntryStore::open(&path);
            store.put("a", &1, Duration::ZERO).unwrap();
            store.put("b", &"two", Duration::from_secs(3600)).unwrap();
        }

        let reopened = EntryStore::open(&path);
        assert_eq!(reopened.get::<i32>("a").unwrap(), Some(1));
        assert_eq!(reopened.get::<String>("b").unwrap(), Some("two".to_string()));
        assert_eq!(reopened.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_corrupt_file_opens_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{ this is not json").unwrap();

        let store = EntryStore::open(&path);
        assert!(store.is_empty());

        store.put("k", &"v", Duration::ZERO).unwrap();
        assert_eq!(store.get::<String>("k").unwrap(), Some("v".to_string()));

        // The corrupt file was overwritten with a valid one
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.get("k").is_some());
    }

    #[test]
    fn test_expired_entry_disappears_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let store = EntryStore::open(&path);

        store.put("x", &"v", Duration::from_millis(50)).unwrap();
        assert_eq!(store.get::<String>("x").unwrap(), Some("v".to_string()));

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(store.get::<String>("x").unwrap(), None);

        store.put("y", &"w", Duration::ZERO).unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.get("x").is_none());
        assert!(raw.get("y").is_some());
    }
}

// =============================================================================
// Tiered Cache
// =============================================================================

mod cache_tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pricecache::cache::{CacheConfig, CacheTier, InMemoryRemote, RemoteBackend, RemoteConfig, TieredCache};
    use pricecache::error::{Error, Result};
    use tokio_test::{assert_err, assert_ok};

    fn config_in(dir: &TempDir) -> CacheConfig {
        CacheConfig::with_dir(dir.path().join("l2"))
    }

    /// Remote backend whose writes stall and deletes fail
    struct FlakyRemote;

    #[async_trait]
    impl RemoteBackend for FlakyRemote {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _data: Bytes, _ttl: Duration) -> Result<()> {
            std::future::pending().await
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(Error::Remote("node unreachable".into()))
        }

        async fn clean(&self) -> Result<usize> {
            Ok(0)
        }

        async fn clear(&self) -> Result<()> {
            Err(Error::Remote("node unreachable".into()))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn flaky_cache(dir: &TempDir) -> TieredCache {
        let mut config = config_in(dir);
        config.l3 = Some(RemoteConfig {
            timeout: Duration::from_millis(20),
            ..RemoteConfig::default()
        });
        TieredCache::with_remote(config, Arc::new(FlakyRemote)).unwrap()
    }

    #[tokio::test]
    async fn test_set_get_clear_scenario() {
        let dir = TempDir::new().unwrap();
        let cache = TieredCache::new(config_in(&dir)).unwrap();
        let payload = serde_json::to_value(sample_price()).unwrap();

        cache.set("card:1", payload.clone(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("card:1").await.unwrap(), Some(payload));
        assert_eq!(cache.stats().l1_hits, 1);

        cache.clear().await.unwrap();
        assert_eq!(cache.get("card:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_promotion_after_l2_hit() {
        let dir = TempDir::new().unwrap();
        {
            let writer = TieredCache::new(config_in(&dir)).unwrap();
            writer.set_as("cards:set:sv4", &sample_price(), Duration::ZERO).await.unwrap();
        }

        // Fresh process: L1 empty, L2 on disk
        let cache = TieredCache::new(config_in(&dir)).unwrap();
        assert_eq!(
            cache.get_as::<CardPrice>("cards:set:sv4").await.unwrap(),
            Some(sample_price())
        );
        let first = cache.stats();
        assert_eq!(first.l1_hits, 0);
        assert_eq!(first.l2_hits, 1);

        cache.get("cards:set:sv4").await.unwrap();
        let second = cache.stats();
        assert_eq!(second.l1_hits, 1);
        assert_eq!(second.l2_hits + second.l2_misses, 1);
    }

    #[tokio::test]
    async fn test_stats_consistency() {
        let dir = TempDir::new().unwrap();
        let cache = TieredCache::new(config_in(&dir)).unwrap();
        cache.set("a", json!(1), Duration::ZERO).await.unwrap();
        cache.set("b", json!(2), Duration::ZERO).await.unwrap();
        cache.l1().delete("b");

        let keys = ["a", "a", "b", "c", "a", "d"];
        for key in keys {
            cache.get(key).await.unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.l1_hits + stats.l1_misses, keys.len() as u64);
        assert_eq!(stats.l2_hits + stats.l2_misses, stats.l1_misses);
        assert_eq!(stats.l1_hits, 3);
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l2_misses, 2);
        let expected = stats.total_hits() as f64 / keys.len() as f64;
        assert!((stats.overall_hit_rate - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_compressed_disk_tier_survives_restart() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.l2.compress = true;

        {
            let cache = TieredCache::new(config.clone()).unwrap();
            cache.set("k", json!({"quotes": vec![1.5; 64]}), Duration::ZERO).await.unwrap();
            let path = cache.l2().path_for("k");
            assert_eq!(path.extension().unwrap(), "gz");
        }

        let cache = TieredCache::new(config).unwrap();
        let value = cache.get("k").await.unwrap().unwrap();
        assert_eq!(value["quotes"].as_array().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_corrupt_disk_file_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = TieredCache::new(config_in(&dir)).unwrap();
        std::fs::write(cache.l2().path_for("k"), b"\x00\x01garbage").unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.l2().path_for("k").exists());
    }

    #[tokio::test]
    async fn test_slow_remote_does_not_fail_set() {
        let dir = TempDir::new().unwrap();
        let cache = flaky_cache(&dir);

        assert_ok!(cache.set("k", json!(1), Duration::ZERO).await);
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_delete_and_clear_report_tier_failures() {
        let dir = TempDir::new().unwrap();
        let cache = flaky_cache(&dir);
        cache.set("k", json!(1), Duration::ZERO).await.unwrap();

        match cache.delete("k").await {
            Err(Error::Tiers(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].tier, CacheTier::L3);
            }
            other => panic!("expected tier failure, got {:?}", other),
        }
        // Local tiers were still cleared
        assert!(!cache.contains("k"));

        let err = assert_err!(cache.clear().await);
        assert!(err.to_string().contains("L3 (Remote)"));
    }

    #[tokio::test]
    async fn test_shared_remote_tier_between_instances() {
        let remote = Arc::new(InMemoryRemote::new());
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();

        let a = TieredCache::with_remote(config_in(&dir_a), remote.clone()).unwrap();
        let b = TieredCache::with_remote(config_in(&dir_b), remote.clone()).unwrap();

        a.set("prices:ebay:sv4-25", json!(41.0), Duration::ZERO).await.unwrap();
        assert_eq!(b.get("prices:ebay:sv4-25").await.unwrap(), Some(json!(41.0)));

        let stats = b.stats();
        assert_eq!(stats.l3_hits, 1);
        assert!(b.l2().contains("prices:ebay:sv4-25"));
        assert_eq!(remote.len(), 1);
    }

    #[tokio::test]
    async fn test_config_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.yaml");
        std::fs::write(
            &path,
            format!(
                "l1:\n  max_entries: 50\n  ttl: 30m\nl2:\n  path: {}\n  ttl: 12h\n  compress: true\nenable_predict: false\n",
                dir.path().join("l2").display()
            ),
        )
        .unwrap();

        let config = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config.l1.max_entries, 50);
        assert_eq!(config.l1.ttl, Duration::from_secs(1800));
        assert_eq!(config.l2.ttl, Duration::from_secs(12 * 3600));
        assert!(config.l2.compress);
        assert!(config.l3.is_none());

        let cache = TieredCache::new(config).unwrap();
        assert!(cache.predictor().is_none());
    }
}

// =============================================================================
// Predictor
// =============================================================================

mod predictor_tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use pricecache::predictor::{AccessPredictor, PredictorConfig};

    #[test]
    fn test_frequent_key_outranks_rare_key() {
        let predictor = AccessPredictor::new(PredictorConfig::default());
        let t0 = Utc::now() - ChronoDuration::hours(1);

        for i in 0..10 {
            predictor.record_access_at("cards:a", true, 128, t0 + ChronoDuration::minutes(6 * i));
        }
        predictor.record_access_at("cards:b", true, 128, t0 + ChronoDuration::minutes(20));

        let targets = predictor.predictions_at(t0 + ChronoDuration::hours(1));
        let a = targets.iter().position(|t| t.key == "cards:a").unwrap();
        let b = targets.iter().position(|t| t.key == "cards:b").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_replayed_chain_predicts_next_key() {
        let predictor = AccessPredictor::new(PredictorConfig::default());
        for _ in 0..3 {
            for key in ["cards:x", "cards:y", "cards:z"] {
                predictor.record_access(key, false, 0);
            }
        }
        predictor.record_access("cards:x", false, 0);
        predictor.record_access("cards:y", false, 0);

        let targets = predictor.predictions();
        assert!(targets.iter().any(|t| t.key == "cards:z"));
        assert!(targets.iter().all(|t| (0.0..=1.0).contains(&t.probability)));
    }

    #[tokio::test]
    async fn test_cache_reads_feed_predictor() {
        let dir = TempDir::new().unwrap();
        let cache = pricecache::TieredCache::new(pricecache::CacheConfig::with_dir(dir.path())).unwrap();

        cache.set("cards:set:sv4", json!([]), Duration::ZERO).await.unwrap();
        for _ in 0..4 {
            cache.get("cards:set:sv4").await.unwrap();
        }
        cache.get("cards:set:sv5").await.unwrap();

        let predictor = cache.predictor().unwrap();
        assert_eq!(predictor.history_len(), 5);
        let pattern = predictor.pattern("cards:set:sv4").unwrap();
        assert_eq!(pattern.count, 4);
        assert!((pattern.hit_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(predictor.pattern("cards:set:sv5").unwrap().hits, 0);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pricecache::cache::{RemoteBackend, RemoteConfig};
    use pricecache::error::Result;
    use pricecache::{CacheConfig, TieredCache};
    use std::time::Instant;

    /// Remote backend whose reads hang until the tier timeout fires
    struct HangingReads;

    #[async_trait]
    impl RemoteBackend for HangingReads {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            std::future::pending().await
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
            "hanging-reads"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_remote_read_does_not_block_writers() {
        let dir = TempDir::new().unwrap();
        let mut config = CacheConfig::with_dir(dir.path().join("l2"));
        config.l3 = Some(RemoteConfig {
            timeout: Duration::from_secs(1),
            ..RemoteConfig::default()
        });
        let cache = Arc::new(TieredCache::with_remote(config, Arc::new(HangingReads)).unwrap());

        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("cards:slow").await })
        };
        // Let the reader reach the remote tier
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        cache.set("cards:other", json!(1), Duration::ZERO).await.unwrap();
        cache.delete("cards:other").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!reader.is_finished());

        // The stalled read times out into a miss
        assert_eq!(reader.await.unwrap().unwrap(), None);
        assert_eq!(cache.stats().l3_misses, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access_from_tasks() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(TieredCache::new(CacheConfig::with_dir(dir.path().join("l2"))).unwrap());

        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    let key = format!("cards:{}:{}", worker, i % 5);
                    cache.set(&key, json!(i), Duration::ZERO).await.unwrap();
                    assert!(cache.get(&key).await.unwrap().is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.sets, 200);
        assert_eq!(stats.l1_hits, 200);
        cache.optimize().await.unwrap();
    }
}
