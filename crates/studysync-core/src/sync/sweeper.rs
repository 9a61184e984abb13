//! Retention of synced actions

use super::owner_id;
use crate::db::{ActionRepository, LibSqlActionRepository};
use crate::error::Result;
use crate::util::{unix_millis_now, user_fingerprint};

/// Age in days after which synced actions are purged when the caller gives none
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Deletes synced actions past their retention window
#[derive(Clone)]
pub struct RetentionSweeper {
    repo: LibSqlActionRepository,
}

impl RetentionSweeper {
    pub const fn new(repo: LibSqlActionRepository) -> Self {
        Self { repo }
    }

    /// Delete the owner's `synced` actions older than `older_than_days`.
    /// Unresolved actions are never removed, whatever their age.
    pub async fn purge(&self, owner: &str, older_than_days: u32) -> Result<u64> {
        self.purge_at(owner, older_than_days, unix_millis_now()).await
    }

    /// Purge relative to `now_ms`. A record synced exactly `older_than_days`
    /// before `now_ms` is purged, so a zero-day purge removes everything synced
    /// up to `now_ms`.
    pub async fn purge_at(&self, owner: &str, older_than_days: u32, now_ms: i64) -> Result<u64> {
        let owner = owner_id(owner)?;
        let cutoff = now_ms.saturating_sub(i64::from(older_than_days) * DAY_MS);
        let deleted = self.repo.delete_synced_through(&owner, cutoff).await?;

        tracing::info!(
            user = user_fingerprint(&owner),
            older_than_days,
            deleted,
            "Purged synced actions"
        );
        Ok(deleted)
    }
}
