//! Conflict resolution and operator retries

use serde_json::Value;

use super::{owner_id, ReplayOutcome, SyncProcessor};
use crate::db::{ActionRepository, LibSqlActionRepository};
use crate::error::{Error, Result};
use crate::models::{ActionId, ActionPayload, ActionRecord, ActionStatus, ConflictResolution};
use crate::util::{unix_millis_now, user_fingerprint};

/// Moves records out of `conflict` and `failed` on explicit request
#[derive(Clone)]
pub struct ConflictResolver {
    repo: LibSqlActionRepository,
    processor: SyncProcessor,
}

impl ConflictResolver {
    pub const fn new(repo: LibSqlActionRepository, processor: SyncProcessor) -> Self {
        Self { repo, processor }
    }

    /// Settle a conflicted record.
    ///
    /// `server` marks it synced without replay. `client` and `merge` rewrite
    /// the payload and replay it once before returning the final record.
    pub async fn resolve(
        &self,
        owner: &str,
        id: &ActionId,
        resolution: ConflictResolution,
        client_data: Option<Value>,
    ) -> Result<ActionRecord> {
        let owner = owner_id(owner)?;
        let _guard = self.processor.locks().acquire(&owner).await;

        let mut record = self.load(&owner, id).await?;
        if record.status != ActionStatus::Conflict {
            return Err(Error::NotInConflict(id.to_string()));
        }

        let now = unix_millis_now();
        record.conflict_resolution = Some(resolution);
        record.error_message = None;
        record.updated_at = now;

        if resolution == ConflictResolution::Server {
            record.status = ActionStatus::Synced;
            record.synced_at = Some(now);
            record.server_version = None;
            self.repo.save(&record).await?;
            tracing::info!(
                user = user_fingerprint(&owner),
                action_id = %record.id,
                "Conflict resolved in favor of server state"
            );
            return Ok(record);
        }

        record.payload = resolved_payload(&record, resolution, client_data.as_ref())?;
        record.status = ActionStatus::Pending;
        record.retry_count = 0;
        record.server_version = None;
        self.repo.save(&record).await?;

        let (outcome, record) = self.processor.replay_locked(record).await?;
        tracing::info!(
            user = user_fingerprint(&owner),
            action_id = %record.id,
            resolution = resolution.as_str(),
            outcome = ?outcome,
            "Conflict resolved and replayed"
        );
        Ok(record)
    }

    /// Re-submit a record that exhausted its retries and replay it once
    pub async fn retry_failed(&self, owner: &str, id: &ActionId) -> Result<ActionRecord> {
        let owner = owner_id(owner)?;
        let _guard = self.processor.locks().acquire(&owner).await;

        let mut record = self.load(&owner, id).await?;
        if record.status != ActionStatus::Failed {
            return Err(Error::NotFailed(id.to_string()));
        }

        record.status = ActionStatus::Pending;
        record.retry_count = 0;
        record.updated_at = unix_millis_now();
        self.repo.save(&record).await?;

        let (outcome, record) = self.processor.replay_locked(record).await?;
        if outcome != ReplayOutcome::Synced {
            tracing::warn!(
                user = user_fingerprint(&owner),
                action_id = %record.id,
                outcome = ?outcome,
                "Manual retry did not sync"
            );
        }
        Ok(record)
    }

    async fn load(&self, owner: &str, id: &ActionId) -> Result<ActionRecord> {
        self.repo
            .get(owner, id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

/// Payload to replay after a `client` or `merge` resolution.
///
/// `merge` first takes the server's value for every field the payload already
/// carries; both then apply `client_data` on top.
fn resolved_payload(
    record: &ActionRecord,
    resolution: ConflictResolution,
    client_data: Option<&Value>,
) -> Result<ActionPayload> {
    let mut data = record.payload.data()?;
    let Value::Object(fields) = &mut data else {
        return Err(Error::InvalidPayload(
            "stored payload is not an object".to_string(),
        ));
    };

    if resolution == ConflictResolution::Merge {
        if let Some(Value::Object(server)) = &record.server_version {
            for (key, value) in server {
                if let Some(field) = fields.get_mut(key) {
                    *field = value.clone();
                }
            }
        }
    }

    match client_data {
        None | Some(Value::Null) => {}
        Some(Value::Object(client)) => {
            for (key, value) in client {
                fields.insert(key.clone(), value.clone());
            }
        }
        Some(_) => {
            return Err(Error::InvalidPayload(
                "clientData must be a JSON object".to_string(),
            ))
        }
    }

    ActionPayload::parse(record.action_type(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::NoteStore;
    use crate::models::{ActionType, NoteCreate, NoteUpdate};
    use crate::sync::testing::{Harness, RecordingHandler};
    use crate::sync::{NoteHandler, ReplayError, SyncPolicy};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    /// Note `n1` edited on the server to version 2 while a stale offline
    /// update for it sits in `conflict`
    async fn conflicted_note_update(harness: &Harness, processor: &SyncProcessor) -> ActionRecord {
        let note = NoteCreate {
            id: "n1".to_string(),
            text: "a".to_string(),
            course_id: Some("c1".to_string()),
            lesson_id: None,
        };
        harness.store.create_note("u1", &note).await.unwrap();
        harness
            .store
            .update_note(
                "u1",
                &NoteUpdate {
                    id: "n1".to_string(),
                    text: "server".to_string(),
                    base_version: None,
                },
                false,
            )
            .await
            .unwrap();

        let record = harness
            .ingestor
            .enqueue(
                "u1",
                "note_update",
                json!({ "id": "n1", "text": "offline", "baseVersion": 1 }),
            )
            .await
            .unwrap();
        processor.sync_all("u1").await.unwrap();

        let record = harness.repo.get("u1", &record.id).await.unwrap().unwrap();
        assert_eq!(record.status, ActionStatus::Conflict);
        record
    }

    fn resolver_with_recorder(harness: &Harness) -> (ConflictResolver, SyncProcessor, Arc<RecordingHandler>) {
        let recorder = RecordingHandler::delegating(Arc::new(NoteHandler::new(
            harness.collaborators.notes.clone(),
        )));
        let processor = harness.processor_with(
            ActionType::NoteUpdate,
            recorder.clone(),
            SyncPolicy::default(),
        );
        let resolver = ConflictResolver::new(harness.repo.clone(), processor.clone());
        (resolver, processor, recorder)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_resolution_replays_once_with_client_data() {
        let harness = Harness::new().await;
        let (resolver, processor, recorder) = resolver_with_recorder(&harness);
        let record = conflicted_note_update(&harness, &processor).await;
        assert_eq!(recorder.calls(), 1);

        let resolved = resolver
            .resolve(
                "u1",
                &record.id,
                ConflictResolution::Client,
                Some(json!({ "text": "final" })),
            )
            .await
            .unwrap();

        assert_eq!(recorder.calls(), 2);
        assert_eq!(resolved.status, ActionStatus::Synced);
        assert_eq!(resolved.conflict_resolution, Some(ConflictResolution::Client));
        assert_eq!(resolved.server_version, None);
        let note = harness.store.get_note("u1", "n1").await.unwrap().unwrap();
        assert_eq!(note.text, "final");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_resolution_skips_replay() {
        let harness = Harness::new().await;
        let (resolver, processor, recorder) = resolver_with_recorder(&harness);
        let record = conflicted_note_update(&harness, &processor).await;

        let resolved = resolver
            .resolve("u1", &record.id, ConflictResolution::Server, None)
            .await
            .unwrap();

        assert_eq!(recorder.calls(), 1);
        assert_eq!(resolved.status, ActionStatus::Synced);
        assert!(resolved.synced_at.is_some());
        let note = harness.store.get_note("u1", "n1").await.unwrap().unwrap();
        assert_eq!(note.text, "server");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_merge_resolution_starts_from_server_fields() {
        let harness = Harness::new().await;
        let (resolver, processor, recorder) = resolver_with_recorder(&harness);
        let record = conflicted_note_update(&harness, &processor).await;

        let resolved = resolver
            .resolve("u1", &record.id, ConflictResolution::Merge, None)
            .await
            .unwrap();

        assert_eq!(recorder.calls(), 2);
        assert_eq!(resolved.status, ActionStatus::Synced);
        assert_eq!(resolved.payload.data().unwrap()["text"], "server");
        // Server-only fields are not pulled into the payload
        assert!(resolved.payload.data().unwrap().get("courseId").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolve_rejects_records_not_in_conflict() {
        let harness = Harness::new().await;
        let (resolver, _processor, _recorder) = resolver_with_recorder(&harness);

        let record = harness
            .ingestor
            .enqueue("u1", "note_delete", json!({ "id": "n1" }))
            .await
            .unwrap();
        let error = resolver
            .resolve("u1", &record.id, ConflictResolution::Client, None)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotInConflict(_)));

        let missing = resolver
            .resolve("u1", &ActionId::new(), ConflictResolution::Server, None)
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolve_is_owner_scoped() {
        let harness = Harness::new().await;
        let (resolver, processor, _recorder) = resolver_with_recorder(&harness);
        let record = conflicted_note_update(&harness, &processor).await;

        let error = resolver
            .resolve("u2", &record.id, ConflictResolution::Server, None)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
        let stored = harness.repo.get("u1", &record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ActionStatus::Conflict);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_client_data_leaves_record_in_conflict() {
        let harness = Harness::new().await;
        let (resolver, processor, recorder) = resolver_with_recorder(&harness);
        let record = conflicted_note_update(&harness, &processor).await;

        let error = resolver
            .resolve(
                "u1",
                &record.id,
                ConflictResolution::Client,
                Some(json!({ "text": 42 })),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidPayload(_)));

        let error = resolver
            .resolve("u1", &record.id, ConflictResolution::Client, Some(json!("final")))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidPayload(_)));

        assert_eq!(recorder.calls(), 1);
        let stored = harness.repo.get("u1", &record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_failed_replays_terminal_record() {
        let harness = Harness::new().await;
        let failing = RecordingHandler::failing(ReplayError::Retryable("down".to_string()));
        let failing_processor = harness.processor_with(
            ActionType::CourseEnrollment,
            failing,
            SyncPolicy::default(),
        );
        let record = harness
            .ingestor
            .enqueue("u1", "course_enrollment", json!({ "courseId": "c1" }))
            .await
            .unwrap();
        for _ in 0..3 {
            failing_processor.sync_all("u1").await.unwrap();
        }

        let healthy = harness.processor(harness.standard_dispatcher(), SyncPolicy::default());
        let resolver = ConflictResolver::new(harness.repo.clone(), healthy);

        let retried = resolver.retry_failed("u1", &record.id).await.unwrap();
        assert_eq!(retried.status, ActionStatus::Synced);
        assert_eq!(retried.retry_count, 0);

        let error = resolver.retry_failed("u1", &record.id).await.unwrap_err();
        assert!(matches!(error, Error::NotFailed(_)));
    }
}
