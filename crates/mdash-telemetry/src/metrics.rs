//! Prometheus metrics for margin-dash.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error and only surfaces
//! during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_gauge_vec, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntGaugeVec,
    TextEncoder,
};

use crate::error::TelemetryResult;

/// Sync cycles by target and outcome.
/// Labels: target (positions/offers), outcome (applied/failed/stale/skipped)
pub static SYNC_CYCLES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdash_sync_cycles_total",
        "Total synchronization cycles by outcome",
        &["target", "outcome"]
    )
    .unwrap()
});

/// Fetch latency in milliseconds.
pub static SYNC_FETCH_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "mdash_sync_fetch_latency_ms",
        "Source fetch latency in milliseconds",
        &["target"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Current sync state per target (1 = active state).
/// Labels: target, state (idle/fetching/applying/failed)
pub static SYNC_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mdash_sync_state",
        "Synchronization loop state (1=active, 0=inactive)",
        &["target", "state"]
    )
    .unwrap()
});

/// Fetch results discarded because their sync instance was superseded.
pub static STALE_DISCARDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdash_stale_discarded_total",
        "Fetch results discarded after the sync instance was cancelled or replaced",
        &["target"]
    )
    .unwrap()
});

/// Raw records dropped during normalization.
/// Labels: kind (position/offer), reason (malformed/domain/json)
pub static RECORDS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdash_records_dropped_total",
        "Raw records dropped during normalization",
        &["kind", "reason"]
    )
    .unwrap()
});

/// Entities held by each registry after the last apply.
pub static TRACKED_ENTITIES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "mdash_tracked_entities",
        "Entities held by each registry",
        &["target"]
    )
    .unwrap()
});

/// Sum of unrealized PnL across open positions, quote units.
pub static AGGREGATE_PNL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "mdash_aggregate_pnl",
        "Total unrealized PnL of open positions in quote units"
    )
    .unwrap()
});

/// Sum of collateral across open positions, quote units.
pub static TOTAL_COLLATERAL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "mdash_total_collateral",
        "Total collateral of open positions in quote units"
    )
    .unwrap()
});

const SYNC_STATES: [&str; 4] = ["idle", "fetching", "applying", "failed"];

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a finished sync cycle.
    pub fn sync_cycle(target: &str, outcome: &str) {
        SYNC_CYCLES_TOTAL
            .with_label_values(&[target, outcome])
            .inc();
    }

    /// Record source fetch latency.
    pub fn sync_fetch_latency(target: &str, latency_ms: f64) {
        SYNC_FETCH_LATENCY_MS
            .with_label_values(&[target])
            .observe(latency_ms);
    }

    /// Set the active sync state of a target; all other states go to 0.
    pub fn sync_state_set(target: &str, state: &str) {
        for s in SYNC_STATES {
            SYNC_STATE.with_label_values(&[target, s]).set(0.0);
        }
        SYNC_STATE.with_label_values(&[target, state]).set(1.0);
    }

    pub fn stale_discarded(target: &str) {
        STALE_DISCARDED_TOTAL.with_label_values(&[target]).inc();
    }

    /// Record a dropped raw record.
    pub fn record_dropped(kind: &str, reason: &str) {
        RECORDS_DROPPED_TOTAL
            .with_label_values(&[kind, reason])
            .inc();
    }

    pub fn tracked_entities(target: &str, count: usize) {
        TRACKED_ENTITIES
            .with_label_values(&[target])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Update portfolio aggregates.
    pub fn portfolio(aggregate_pnl: f64, total_collateral: f64) {
        AGGREGATE_PNL.set(aggregate_pnl);
        TOTAL_COLLATERAL.set(total_collateral);
    }

    /// Render the default registry in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
