// Engine counters: submissions, completions and where each completion went.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    /// Completed with an auto-remove status and destroyed on the spot.
    pub auto_removed: u64,
    /// Handed to the caller through a drain.
    pub drained: u64,
    /// Completed with less body stored than was delivered or announced.
    pub truncated: u64,
    pub body_bytes_seen: u64,
    pub active_transfers: usize,
    pub pending_drain: usize,
    pub watched_sockets: usize,
}

pub struct StatsCollector {
    submitted: AtomicU64,
    completed: AtomicU64,
    auto_removed: AtomicU64,
    drained: AtomicU64,
    truncated: AtomicU64,
    body_bytes_seen: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            auto_removed: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
            body_bytes_seen: AtomicU64::new(0),
        }
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished transfer and whether it was destroyed immediately.
    pub fn record_completed(&self, body_bytes: u64, auto_removed: bool, truncated: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.body_bytes_seen.fetch_add(body_bytes, Ordering::Relaxed);
        if auto_removed {
            self.auto_removed.fetch_add(1, Ordering::Relaxed);
        }
        if truncated {
            self.truncated.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_drained(&self, count: usize) {
        self.drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Counters plus the gauges the engine measures at snapshot time.
    pub fn snapshot(
        &self,
        active_transfers: usize,
        pending_drain: usize,
        watched_sockets: usize,
    ) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            auto_removed: self.auto_removed.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            body_bytes_seen: self.body_bytes_seen.load(Ordering::Relaxed),
            active_transfers,
            pending_drain,
            watched_sockets,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = StatsCollector::new();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_submitted();

        stats.record_completed(2, true, false);
        stats.record_completed(7, false, false);
        stats.record_completed(10 * 1024, true, true);
        stats.record_drained(1);

        let snap = stats.snapshot(0, 0, 0);
        assert_eq!(snap.submitted, 3);
        assert_eq!(snap.completed, 3);
        assert_eq!(snap.auto_removed, 2);
        assert_eq!(snap.drained, 1);
        assert_eq!(snap.truncated, 1);
        assert_eq!(snap.body_bytes_seen, 9 + 10 * 1024);
        assert_eq!(snap.submitted, snap.auto_removed + snap.drained);
    }

    #[test]
    fn test_snapshot_carries_gauges() {
        let stats = StatsCollector::default();
        let snap = stats.snapshot(4, 2, 3);
        assert_eq!(snap.active_transfers, 4);
        assert_eq!(snap.pending_drain, 2);
        assert_eq!(snap.watched_sockets, 3);
    }
}
