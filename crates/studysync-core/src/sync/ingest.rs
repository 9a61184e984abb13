//! Queue ingestion

use serde_json::Value;

use super::owner_id;
use crate::db::{ActionRepository, LibSqlActionRepository};
use crate::error::Result;
use crate::models::{ActionPayload, ActionRecord};
use crate::util::user_fingerprint;

/// Validates client actions and appends them to the owner's queue
#[derive(Clone)]
pub struct QueueIngestor {
    repo: LibSqlActionRepository,
}

impl QueueIngestor {
    pub const fn new(repo: LibSqlActionRepository) -> Self {
        Self { repo }
    }

    /// Persist a new `pending` action. Nothing is replayed until the next sync run.
    pub async fn enqueue(
        &self,
        owner: &str,
        action_type: &str,
        action_data: Value,
    ) -> Result<ActionRecord> {
        let owner = owner_id(owner)?;
        let payload = ActionPayload::from_parts(action_type, action_data)?;
        let record = self.repo.insert(&owner, &payload).await?;

        tracing::debug!(
            user = user_fingerprint(&owner),
            action_id = %record.id,
            action_type = %record.action_type(),
            "Queued offline action"
        );
        Ok(record)
    }
}
