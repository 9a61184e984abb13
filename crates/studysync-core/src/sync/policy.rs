//! Tunables for sync runs

use std::time::Duration;

/// Retry cap applied to retryable replay failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Upper bound on a single replay
pub const DEFAULT_REPLAY_TIMEOUT: Duration = Duration::from_secs(10);
/// Age after which a record left in `syncing` is considered abandoned
pub const DEFAULT_STALE_SYNCING_AFTER: Duration = Duration::from_secs(5 * 60);

/// How a sync run treats failures and slow replays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Retryable failures allowed before a record becomes terminally `failed`
    pub max_retries: u32,
    /// Replays exceeding this are recorded as retryable failures
    pub replay_timeout: Duration,
    /// `syncing` records not updated for this long are reset to `pending`
    pub stale_syncing_after: Duration,
    /// Stop a run at the first failure or conflict instead of continuing
    /// with later records
    pub halt_on_failure: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            replay_timeout: DEFAULT_REPLAY_TIMEOUT,
            stale_syncing_after: DEFAULT_STALE_SYNCING_AFTER,
            halt_on_failure: false,
        }
    }
}

impl SyncPolicy {
    /// `syncing` records last updated before the returned timestamp are stale
    pub fn stale_cutoff(&self, now: i64) -> i64 {
        let window = i64::try_from(self.stale_syncing_after.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(window)
    }
}
