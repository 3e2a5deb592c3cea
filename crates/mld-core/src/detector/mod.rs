//! Leak detection passes
//!
//! # Architecture
//!
//! - **memory**: the single raw read ("pointer-sized value at address X of record R")
//! - **ReachabilityEngine**: resets visited flags and marks from the roots
//! - **LeakReport**: lists records left unvisited
//! - **PassStats / DetectorStats**: per-pass and cumulative counters
//!
//! A record moves `UNVISITED → VISITED` at most once per pass and is reset
//! at the start of the next one.

mod engine;
mod memory;
mod report;

pub use engine::ReachabilityEngine;
pub use report::{LeakEntry, LeakReport};

use std::time::Duration;

/// Counters for one reachability pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Root records at pass start
    pub roots: usize,

    /// Records marked visited
    pub marked: usize,

    /// Records left unvisited
    pub leaked_objects: usize,

    /// Bytes covered by unvisited records
    pub leaked_bytes: usize,

    /// Pointer fields that resolved to a tracked record and were followed
    pub pointers_followed: usize,

    /// Pointer fields holding null
    pub null_pointers: usize,

    /// Non-null pointer fields outside every tracked record
    pub unresolved_pointers: usize,

    /// Object pointers skipped because the target has another type
    pub type_mismatches: usize,

    /// Wall time of the pass
    pub pause_time: Duration,
}

/// Cumulative detector statistics
#[derive(Debug, Clone, Default)]
pub struct DetectorStats {
    /// Total number of passes
    pub passes: usize,

    /// Total time spent in passes
    pub total_pause_time: Duration,

    /// Longest pass
    pub max_pause_time: Duration,

    /// Counters of the most recent pass
    pub last: PassStats,
}

impl DetectorStats {
    /// Record a finished pass
    pub fn update(&mut self, pass: PassStats) {
        self.passes += 1;
        self.total_pause_time += pass.pause_time;
        if pass.pause_time > self.max_pause_time {
            self.max_pause_time = pass.pause_time;
        }
        self.last = pass;
    }

    /// Average pass duration
    pub fn avg_pause_time(&self) -> Duration {
        if self.passes == 0 {
            return Duration::ZERO;
        }
        self.total_pause_time / self.passes as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_update() {
        let mut stats = DetectorStats::default();
        assert_eq!(stats.avg_pause_time(), Duration::ZERO);

        stats.update(PassStats {
            marked: 3,
            pause_time: Duration::from_millis(2),
            ..PassStats::default()
        });
        stats.update(PassStats {
            marked: 5,
            pause_time: Duration::from_millis(4),
            ..PassStats::default()
        });

        assert_eq!(stats.passes, 2);
        assert_eq!(stats.last.marked, 5);
        assert_eq!(stats.max_pause_time, Duration::from_millis(4));
        assert_eq!(stats.avg_pause_time(), Duration::from_millis(3));
    }
}
