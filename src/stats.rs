//! Scan statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the coordinator, workers and sink
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Endpoints handed to the job queue
    pub jobs_dispatched: AtomicU64,
    /// Endpoints that accepted a connection
    pub endpoints_alive: AtomicU64,
    /// Endpoints that refused or timed out
    pub endpoints_down: AtomicU64,
    /// Alive endpoints with a coordinate
    pub resolved: AtomicU64,
    /// Alive endpoints left out of the output
    pub resolution_skipped: AtomicU64,
    /// Lines flushed by the sink
    pub results_written: AtomicU64,
}

impl ScanStats {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            endpoints_alive: self.endpoints_alive.load(Ordering::Relaxed),
            endpoints_down: self.endpoints_down.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            resolution_skipped: self.resolution_skipped.load(Ordering::Relaxed),
            results_written: self.results_written.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`ScanStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// See [`ScanStats::jobs_dispatched`]
    pub jobs_dispatched: u64,
    /// See [`ScanStats::endpoints_alive`]
    pub endpoints_alive: u64,
    /// See [`ScanStats::endpoints_down`]
    pub endpoints_down: u64,
    /// See [`ScanStats::resolved`]
    pub resolved: u64,
    /// See [`ScanStats::resolution_skipped`]
    pub resolution_skipped: u64,
    /// See [`ScanStats::results_written`]
    pub results_written: u64,
}

impl StatsSnapshot {
    /// Jobs that reached a worker outcome
    pub fn probed(&self) -> u64 {
        self.endpoints_alive + self.endpoints_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = ScanStats::new();
        ScanStats::incr(&stats.jobs_dispatched);
        ScanStats::incr(&stats.jobs_dispatched);
        ScanStats::incr(&stats.endpoints_alive);
        ScanStats::incr(&stats.endpoints_down);

        let snap = stats.snapshot();
        assert_eq!(snap.jobs_dispatched, 2);
        assert_eq!(snap.probed(), 2);
        assert_eq!(snap.results_written, 0);
    }
}
