//! Sync runs over an owner's queue

use std::sync::Arc;

use super::{owner_id, Dispatcher, OwnerLocks, ReplayError, SyncPolicy};
use crate::db::{ActionRepository, LibSqlActionRepository};
use crate::error::Result;
use crate::models::{ActionRecord, ActionStatus, SyncSummary};
use crate::util::{compact_text, unix_millis_now, user_fingerprint};

/// Where a single replay left its record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Synced,
    /// Retryable failure below the cap; picked up again by the next run
    Requeued,
    /// Retryable failure that reached the cap
    Failed,
    Conflict,
    /// Another process moved the record first; nothing was replayed
    Skipped,
}

/// Replays queued actions in creation order, one owner at a time
#[derive(Clone)]
pub struct SyncProcessor {
    repo: LibSqlActionRepository,
    dispatcher: Arc<Dispatcher>,
    locks: OwnerLocks,
    policy: SyncPolicy,
}

impl SyncProcessor {
    pub fn new(repo: LibSqlActionRepository, dispatcher: Arc<Dispatcher>, policy: SyncPolicy) -> Self {
        Self {
            repo,
            dispatcher,
            locks: OwnerLocks::new(),
            policy,
        }
    }

    pub const fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Locks shared with every other mutation of an owner's queue
    pub const fn locks(&self) -> &OwnerLocks {
        &self.locks
    }

    /// Replay every `pending` action of `owner`, plus `failed` ones still under
    /// the retry cap, oldest first. `conflict` actions are left alone.
    ///
    /// A record's replay failure is stored on the record and counted in the
    /// summary; only queue storage errors are returned.
    pub async fn sync_all(&self, owner: &str) -> Result<SyncSummary> {
        let owner = owner_id(owner)?;
        let user = user_fingerprint(&owner);
        let _guard = self.locks.acquire(&owner).await;

        let cutoff = self.policy.stale_cutoff(unix_millis_now());
        let recovered = self.repo.reset_stale_syncing(&owner, cutoff).await?;
        if recovered > 0 {
            tracing::warn!(user, recovered, "Reset actions abandoned in syncing state");
        }

        let records = self
            .repo
            .list_replayable(&owner, self.policy.max_retries)
            .await?;
        tracing::debug!(user, selected = records.len(), "Starting sync run");

        let mut summary = SyncSummary::default();
        for record in records {
            let (outcome, _) = self.replay_locked(record).await?;
            match outcome {
                ReplayOutcome::Synced => summary.synced += 1,
                ReplayOutcome::Requeued | ReplayOutcome::Failed => summary.failed += 1,
                ReplayOutcome::Conflict => summary.conflicts += 1,
                ReplayOutcome::Skipped => continue,
            }

            if self.policy.halt_on_failure && outcome != ReplayOutcome::Synced {
                tracing::info!(user, "Halting sync run at first unsuccessful replay");
                break;
            }
        }

        tracing::info!(
            user,
            synced = summary.synced,
            failed = summary.failed,
            conflicts = summary.conflicts,
            "Sync run finished"
        );
        Ok(summary)
    }

    /// Replay one record and persist its new state.
    ///
    /// Callers must hold the owner's lock from `locks()`. That lock only
    /// covers this process; the `syncing` claim in the database keeps a second
    /// process on the same file from replaying the record too.
    pub(crate) async fn replay_locked(
        &self,
        mut record: ActionRecord,
    ) -> Result<(ReplayOutcome, ActionRecord)> {
        let claimed_at = unix_millis_now();
        if !self.repo.claim_for_replay(&record, claimed_at).await? {
            tracing::info!(
                user = user_fingerprint(&record.owner),
                action_id = %record.id,
                "Action was claimed elsewhere; skipping"
            );
            let current = self.repo.get(&record.owner, &record.id).await?;
            return Ok((ReplayOutcome::Skipped, current.unwrap_or(record)));
        }
        record.status = ActionStatus::Syncing;
        record.updated_at = claimed_at;

        let result =
            match tokio::time::timeout(self.policy.replay_timeout, self.dispatcher.replay(&record))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ReplayError::Timeout(self.policy.replay_timeout)),
            };

        let outcome = self.apply_result(&mut record, result);
        self.repo.save(&record).await?;
        Ok((outcome, record))
    }

    fn apply_result(
        &self,
        record: &mut ActionRecord,
        result: std::result::Result<(), ReplayError>,
    ) -> ReplayOutcome {
        let now = unix_millis_now();
        record.updated_at = now;

        match result {
            Ok(()) => {
                record.status = ActionStatus::Synced;
                record.synced_at = Some(now);
                record.retry_count = 0;
                record.error_message = None;
                record.server_version = None;
                ReplayOutcome::Synced
            }
            Err(ReplayError::Conflict {
                message,
                server_version,
            }) => {
                tracing::warn!(
                    user = user_fingerprint(&record.owner),
                    action_id = %record.id,
                    action_type = %record.action_type(),
                    "Replay conflicts with server state"
                );
                record.status = ActionStatus::Conflict;
                record.error_message = Some(compact_text(&message));
                record.server_version = Some(server_version);
                ReplayOutcome::Conflict
            }
            Err(error) => {
                record.retry_count = record.retry_count.saturating_add(1);
                record.last_retry_at = Some(now);
                record.error_message = Some(compact_text(&error.to_string()));

                if record.retry_count >= self.policy.max_retries {
                    tracing::warn!(
                        user = user_fingerprint(&record.owner),
                        action_id = %record.id,
                        action_type = %record.action_type(),
                        retry_count = record.retry_count,
                        error = %error,
                        "Action failed after exhausting retries"
                    );
                    record.status = ActionStatus::Failed;
                    ReplayOutcome::Failed
                } else {
                    tracing::debug!(
                        action_id = %record.id,
                        retry_count = record.retry_count,
                        error = %error,
                        "Replay failed; re-queued"
                    );
                    record.status = ActionStatus::Pending;
                    ReplayOutcome::Requeued
                }
            }
        }
    }
}
