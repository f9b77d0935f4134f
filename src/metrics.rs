//! Operational counters for the daemon.
//!
//! Tracks write counts, deferrals, and skip totals for the status surface.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics data exposed via IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// Successful writes since daemon start.
    pub writes: u64,
    /// Writes the client rejected.
    pub write_failures: u64,
    /// Reconciliations deferred by the combat lock.
    pub deferrals: u64,
    /// Reconciliations that decided not to write.
    pub skips: u64,
    /// Times discovery (fast-poll) mode was entered.
    pub discovery_entries: u64,
    /// Uptime in seconds.
    pub uptime_sec: u64,
}

/// Counter collection, cheap to share across tasks.
pub struct MetricsCollector {
    start_time: Instant,
    writes: AtomicU64,
    write_failures: AtomicU64,
    deferrals: AtomicU64,
    skips: AtomicU64,
    discovery_entries: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            writes: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            deferrals: AtomicU64::new(0),
            skips: AtomicU64::new(0),
            discovery_entries: AtomicU64::new(0),
        }
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_deferral(&self) {
        self.deferrals.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_skip(&self) {
        self.skips.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_discovery_entry(&self) {
        self.discovery_entries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> MetricsResponse {
        MetricsResponse {
            writes: self.writes.load(Ordering::SeqCst),
            write_failures: self.write_failures.load(Ordering::SeqCst),
            deferrals: self.deferrals.load(Ordering::SeqCst),
            skips: self.skips.load(Ordering::SeqCst),
            discovery_entries: self.discovery_entries.load(Ordering::SeqCst),
            uptime_sec: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = MetricsCollector::new();
        metrics.record_write();
        metrics.record_write();
        metrics.record_write_failure();
        metrics.record_deferral();
        metrics.record_skip();
        metrics.record_discovery_entry();

        let snap = metrics.snapshot();
        assert_eq!(snap.writes, 2);
        assert_eq!(snap.write_failures, 1);
        assert_eq!(snap.deferrals, 1);
        assert_eq!(snap.skips, 1);
        assert_eq!(snap.discovery_entries, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = MetricsCollector::new();
        metrics.record_write();
        let json = serde_json::to_string(&metrics.snapshot()).unwrap();
        assert!(json.contains("\"writes\":1"));
        assert!(json.contains("uptime_sec"));
    }
}
