//! Prometheus text exposition of a [`CacheStats`] snapshot
//!
//! Counters reset on `clear`, so everything is exported as a gauge.

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use super::metrics::CacheStats;
use crate::error::{Error, Result};

const NAMESPACE: &str = "pricecache";

fn metrics_err(e: prometheus::Error) -> Error {
    Error::Metrics(e.to_string())
}

fn int_gauge(registry: &Registry, name: &str, help: &str, value: u64) -> Result<()> {
    let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE)).map_err(metrics_err)?;
    gauge.set(value as i64);
    registry.register(Box::new(gauge)).map_err(metrics_err)
}

/// Render `stats` in the Prometheus text format
pub fn render(stats: &CacheStats) -> Result<String> {
    let registry = Registry::new();

    let lookups = IntGaugeVec::new(
        Opts::new("lookups", "Cache lookups by tier and outcome").namespace(NAMESPACE),
        &["tier", "outcome"],
    )
    .map_err(metrics_err)?;
    for (tier, hits, misses) in [
        ("l1", stats.l1_hits, stats.l1_misses),
        ("l2", stats.l2_hits, stats.l2_misses),
        ("l3", stats.l3_hits, stats.l3_misses),
    ] {
        lookups.with_label_values(&[tier, "hit"]).set(hits as i64);
        lookups.with_label_values(&[tier, "miss"]).set(misses as i64);
    }
    registry.register(Box::new(lookups)).map_err(metrics_err)?;

    let hit_rate = GaugeVec::new(
        Opts::new("hit_rate", "Hit rate by tier (0.0 - 1.0)").namespace(NAMESPACE),
        &["tier"],
    )
    .map_err(metrics_err)?;
    hit_rate.with_label_values(&["l1"]).set(stats.l1_hit_rate);
    hit_rate.with_label_values(&["l2"]).set(stats.l2_hit_rate);
    hit_rate.with_label_values(&["l3"]).set(stats.l3_hit_rate);
    registry.register(Box::new(hit_rate)).map_err(metrics_err)?;

    let overall = Gauge::with_opts(
        Opts::new("overall_hit_rate", "Hits in any tier over lookups").namespace(NAMESPACE),
    )
    .map_err(metrics_err)?;
    overall.set(stats.overall_hit_rate);
    registry.register(Box::new(overall)).map_err(metrics_err)?;

    int_gauge(&registry, "evictions", "Entries dropped by capacity or expiry", stats.evictions)?;
    int_gauge(&registry, "promotions", "Values copied into a faster tier", stats.promotions)?;
    int_gauge(&registry, "prefetched", "Values stored by prefetch", stats.prefetched)?;
    int_gauge(&registry, "sets", "Set calls", stats.sets)?;
    int_gauge(&registry, "deletes", "Delete calls", stats.deletes)?;

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(metrics_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
}
