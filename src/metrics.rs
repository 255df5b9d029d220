// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Pull cycles and their failures
//! - Block fetch/persist throughput
//! - Watermark, remote head and lag
//! - Local store lock contention
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `feed_mirror_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! Nothing here installs a recorder; without one every call is a no-op.
//!
//! # Usage
//!
//! ```rust,no_run
//! use feed_mirror::metrics;
//! use std::time::Duration;
//!
//! // After a block has been appended
//! metrics::record_block(1000, 998, Duration::from_millis(420));
//!
//! // After reading both ends of the range
//! metrics::record_positions(2499, Some(999));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Cycle Metrics
// =============================================================================

/// Record a completed pull cycle.
pub fn record_cycle(blocks: usize, inserted: usize, duration: Duration, interrupted: bool) {
    let outcome = if interrupted { "interrupted" } else { "complete" };
    counter!("feed_mirror_cycles_total", "outcome" => outcome).increment(1);
    histogram!("feed_mirror_cycle_blocks").record(blocks as f64);
    histogram!("feed_mirror_cycle_inserted").record(inserted as f64);
    histogram!("feed_mirror_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record a cycle aborted by an error.
pub fn record_cycle_failure(kind: &'static str) {
    counter!("feed_mirror_cycle_failures_total", "kind" => kind).increment(1);
}

// =============================================================================
// Block Metrics
// =============================================================================

/// Record one block fetched and appended.
///
/// `fetched - inserted` is the number of records that were already stored.
pub fn record_block(fetched: usize, inserted: usize, duration: Duration) {
    counter!("feed_mirror_blocks_total").increment(1);
    counter!("feed_mirror_records_fetched_total").increment(fetched as u64);
    counter!("feed_mirror_records_inserted_total").increment(inserted as u64);

    let skipped = fetched.saturating_sub(inserted);
    if skipped > 0 {
        counter!("feed_mirror_records_skipped_total").increment(skipped as u64);
    }

    histogram!("feed_mirror_block_duration_seconds").record(duration.as_secs_f64());
}

/// Record the duration of one engine step (max_id, fetch, append, ...).
pub fn record_step_duration(step: &'static str, ok: bool, duration: Duration) {
    let status = if ok { "success" } else { "failure" };
    histogram!(
        "feed_mirror_step_duration_seconds",
        "step" => step,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Position Metrics
// =============================================================================

/// Record the remote head, the local watermark and the gap between them.
pub fn record_positions(remote_max_id: i64, watermark: Option<i64>) {
    gauge!("feed_mirror_remote_max_id").set(remote_max_id as f64);
    if let Some(watermark) = watermark {
        gauge!("feed_mirror_watermark").set(watermark as f64);
    }
    gauge!("feed_mirror_lag_records").set(lag_records(remote_max_id, watermark) as f64);
}

/// Set the watermark gauge after a block has been persisted.
pub fn set_watermark(watermark: i64) {
    gauge!("feed_mirror_watermark").set(watermark as f64);
}

/// Records the remote holds that are not stored locally yet.
///
/// An empty store is treated as lagging by `remote_max_id + 1`. Never
/// negative: a store ahead of the remote (e.g. after a remote reset) is 0.
pub fn lag_records(remote_max_id: i64, watermark: Option<i64>) -> u64 {
    let behind = match watermark {
        Some(watermark) => remote_max_id.saturating_sub(watermark),
        None => remote_max_id.saturating_add(1),
    };
    behind.max(0) as u64
}

// =============================================================================
// Store Metrics
// =============================================================================

/// Record store SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn record_store_retry(operation: &str) {
    counter!("feed_mirror_store_retries_total", "operation" => operation.to_string()).increment(1);
}

// =============================================================================
// Engine Metrics
// =============================================================================

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Encode state as numeric for alerting
    let value = match state {
        "Idle" => 0.0,
        "ComputeRange" => 1.0,
        "FetchBlock" => 2.0,
        "PersistBlock" => 3.0,
        "Sleeping" => 4.0,
        "Stopped" => 5.0,
        _ => -1.0,
    };
    gauge!("feed_mirror_engine_state").set(value);
}

/// Record an SLO violation (latency threshold exceeded).
///
/// `slo_type` is `cycle` or `block`.
pub fn record_slo_violation(slo_type: &'static str, latency: Duration) {
    counter!("feed_mirror_slo_violations_total", "slo_type" => slo_type).increment(1);
    histogram!("feed_mirror_slo_violation_latency_ms", "slo_type" => slo_type)
        .record(latency.as_millis() as f64);
}
