//! Sync run summary

use serde::{Deserialize, Serialize};

/// Aggregate outcome counts of one sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    /// Records that reached `synced`
    pub synced: u32,
    /// Replay attempts that failed with a retryable error
    pub failed: u32,
    /// Records moved to `conflict`
    pub conflicts: u32,
}

impl SyncSummary {
    /// Total number of records attempted in the run
    pub const fn attempted(&self) -> u32 {
        self.synced + self.failed + self.conflicts
    }
}
