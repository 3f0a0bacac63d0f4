//! Metrics collection for scheduler monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Scheduler metrics.
pub struct Metrics {
    /// Fires triggered by the armed timer.
    pub fires_scheduled: AtomicU64,
    /// Fires triggered manually.
    pub fires_manual: AtomicU64,
    /// Drains that settled their whole batch.
    pub drains_succeeded: AtomicU64,
    /// Drains aborted by a processing failure.
    pub drains_failed: AtomicU64,
    /// Work items settled across all drains.
    pub items_settled: AtomicU64,
    /// Fires currently in progress.
    pub fires_in_flight: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            fires_scheduled: AtomicU64::new(0),
            fires_manual: AtomicU64::new(0),
            drains_succeeded: AtomicU64::new(0),
            drains_failed: AtomicU64::new(0),
            items_settled: AtomicU64::new(0),
            fires_in_flight: AtomicU64::new(0),
        }
    }

    /// Record the start of a fire.
    pub fn fire_started(&self, scheduled: bool) {
        if scheduled {
            self.fires_scheduled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fires_manual.fetch_add(1, Ordering::Relaxed);
        }
        self.fires_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a fire, whether or not its drain completed.
    pub fn fire_finished(&self) {
        self.fires_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a drain that settled `items` work items.
    pub fn drain_succeeded(&self, items: u64) {
        self.drains_succeeded.fetch_add(1, Ordering::Relaxed);
        self.items_settled.fetch_add(items, Ordering::Relaxed);
    }

    /// Record an aborted drain.
    pub fn drain_failed(&self) {
        self.drains_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fires_scheduled: self.fires_scheduled.load(Ordering::Relaxed),
            fires_manual: self.fires_manual.load(Ordering::Relaxed),
            drains_succeeded: self.drains_succeeded.load(Ordering::Relaxed),
            drains_failed: self.drains_failed.load(Ordering::Relaxed),
            items_settled: self.items_settled.load(Ordering::Relaxed),
            fires_in_flight: self.fires_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP batchsettle_fires_total Fires by trigger
# TYPE batchsettle_fires_total counter
batchsettle_fires_total{{trigger="scheduled"}} {}
batchsettle_fires_total{{trigger="manual"}} {}

# HELP batchsettle_drains_total Drains by outcome
# TYPE batchsettle_drains_total counter
batchsettle_drains_total{{outcome="settled"}} {}
batchsettle_drains_total{{outcome="failed"}} {}

# HELP batchsettle_items_settled Work items settled
# TYPE batchsettle_items_settled counter
batchsettle_items_settled {}

# HELP batchsettle_fires_in_flight Fires in progress
# TYPE batchsettle_fires_in_flight gauge
batchsettle_fires_in_flight {}
"#,
            snapshot.fires_scheduled,
            snapshot.fires_manual,
            snapshot.drains_succeeded,
            snapshot.drains_failed,
            snapshot.items_settled,
            snapshot.fires_in_flight,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub fires_scheduled: u64,
    pub fires_manual: u64,
    pub drains_succeeded: u64,
    pub drains_failed: u64,
    pub items_settled: u64,
    pub fires_in_flight: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.fire_started(true);
        metrics.fire_started(false);
        metrics.drain_succeeded(3);
        metrics.fire_finished();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fires_scheduled, 1);
        assert_eq!(snapshot.fires_manual, 1);
        assert_eq!(snapshot.items_settled, 3);
        assert_eq!(snapshot.fires_in_flight, 1);

        metrics.drain_failed();
        metrics.fire_finished();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.drains_failed, 1);
        assert_eq!(snapshot.fires_in_flight, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.fire_started(false);
        metrics.drain_succeeded(2);
        metrics.fire_finished();

        let output = metrics.to_prometheus();
        assert!(output.contains("batchsettle_fires_total{trigger=\"manual\"} 1"));
        assert!(output.contains("batchsettle_items_settled 2"));
    }
}
