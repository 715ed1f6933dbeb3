use serde::{Deserialize, Serialize};

/// Counters and gauges of one queue.
///
/// `offered` counts every well-formed offer, `deduplicated` the duplicates among
/// them and `rejected` the ones refused for capacity. Counters only move
/// forward until an explicit reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub offered: u64,
    pub deduplicated: u64,
    pub rejected: u64,
    pub polled: u64,
    pub current_size: usize,
    pub index_size: usize,
}

impl QueueStats {
    /// Offers that made it into the queue
    pub fn admitted(&self) -> u64 {
        self.offered
            .saturating_sub(self.deduplicated)
            .saturating_sub(self.rejected)
    }

    pub fn dedup_rate(&self) -> f64 {
        if self.offered == 0 {
            0.0
        } else {
            (self.deduplicated as f64 / self.offered as f64) * 100.0
        }
    }
}
