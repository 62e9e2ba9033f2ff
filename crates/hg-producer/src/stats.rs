//! Producer statistics.

use hg_graph::EntityCounts;
use serde::Serialize;

/// Where a tile currently sits in the producer's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TileState {
    /// Never built, evicted, or failed.
    Absent,
    /// A build is in flight.
    Pending { waiters: usize },
    /// Resident with `refs` live handles.
    Ready { refs: usize },
}

/// Snapshot of producer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStats {
    /// Requests served from a resident graph.
    pub hits: u64,
    /// Requests that started a build.
    pub misses: u64,
    /// Requests that joined a build already in flight.
    pub waits: u64,
    /// Successful builds.
    pub builds: u64,
    /// Failed builds.
    pub failures: u64,
    /// Graphs removed by budget, `clear()` or final release after `clear()`.
    pub evictions: u64,
    /// Entities held by resident graphs.
    pub resident: EntityCounts,
    pub resident_graphs: usize,
    /// Resident graphs with at least one live handle.
    pub referenced_graphs: usize,
    pub pending_builds: usize,
}

impl ProducerStats {
    /// Fraction of requests answered without starting a build (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.waits;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.waits) as f64 / total as f64
        }
    }
}
