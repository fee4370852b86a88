//! Queue metrics.
//!
//! Counters for the publish and worker paths. Each service owns its own
//! instance; nothing here is global.

use std::sync::atomic::{AtomicU64, Ordering};

/// Queue metrics collector.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Envelopes pushed onto the pending list.
    pub published: AtomicU64,
    /// Publishes refused by the inbound gate.
    pub publish_rejected: AtomicU64,
    /// Envelopes handled and acknowledged.
    pub processed: AtomicU64,
    /// Envelopes acknowledged without a handler.
    pub skipped_unknown: AtomicU64,
    /// Envelopes dropped because they could not be parsed.
    pub dropped_malformed: AtomicU64,
    /// Envelopes sent back by the outbound gate.
    pub requeued_flow: AtomicU64,
    /// Envelopes sent back after a handler failure.
    pub requeued_error: AtomicU64,
    /// Envelopes moved to the error list.
    pub dead_lettered: AtomicU64,
    /// Envelopes restored from the in-flight list.
    pub recovered: AtomicU64,
}

impl QueueMetrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            publish_rejected: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            skipped_unknown: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            requeued_flow: AtomicU64::new(0),
            requeued_error: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `count` to a counter.
    pub fn add(counter: &AtomicU64, count: u64) {
        counter.fetch_add(count, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_rejected: self.publish_rejected.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            skipped_unknown: self.skipped_unknown.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            requeued_flow: self.requeued_flow.load(Ordering::Relaxed),
            requeued_error: self.requeued_error.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        output.push_str("# HELP taskline_published_total Envelopes published\n");
        output.push_str("# TYPE taskline_published_total counter\n");
        output.push_str(&format!("taskline_published_total {}\n", snapshot.published));

        output.push_str("# HELP taskline_publish_rejected_total Publishes refused by admission control\n");
        output.push_str("# TYPE taskline_publish_rejected_total counter\n");
        output.push_str(&format!(
            "taskline_publish_rejected_total {}\n",
            snapshot.publish_rejected
        ));

        output.push_str("# HELP taskline_consumed_total Envelopes leaving the in-flight list\n");
        output.push_str("# TYPE taskline_consumed_total counter\n");
        for (outcome, value) in [
            ("processed", snapshot.processed),
            ("skipped_unknown", snapshot.skipped_unknown),
            ("dropped_malformed", snapshot.dropped_malformed),
            ("requeued_flow", snapshot.requeued_flow),
            ("requeued_error", snapshot.requeued_error),
            ("dead_lettered", snapshot.dead_lettered),
        ] {
            output.push_str(&format!(
                "taskline_consumed_total{{outcome=\"{outcome}\"}} {value}\n"
            ));
        }

        output.push_str("# HELP taskline_recovered_total Envelopes restored by the recovery sweep\n");
        output.push_str("# TYPE taskline_recovered_total counter\n");
        output.push_str(&format!("taskline_recovered_total {}\n", snapshot.recovered));

        output
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Envelopes pushed onto the pending list.
    pub published: u64,
    /// Publishes refused by the inbound gate.
    pub publish_rejected: u64,
    /// Envelopes handled and acknowledged.
    pub processed: u64,
    /// Envelopes acknowledged without a handler.
    pub skipped_unknown: u64,
    /// Envelopes dropped because they could not be parsed.
    pub dropped_malformed: u64,
    /// Envelopes sent back by the outbound gate.
    pub requeued_flow: u64,
    /// Envelopes sent back after a handler failure.
    pub requeued_error: u64,
    /// Envelopes moved to the error list.
    pub dead_lettered: u64,
    /// Envelopes restored from the in-flight list.
    pub recovered: u64,
}
