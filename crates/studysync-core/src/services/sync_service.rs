//! Shared sync service wrapper used by the API server and the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::collab::Collaborators;
use crate::db::{ActionRepository, Database, LibSqlActionRepository};
use crate::models::{ActionId, ActionRecord, ConflictResolution, SyncSummary};
use crate::sync::{
    owner_id, ConflictResolver, Dispatcher, QueueIngestor, RetentionSweeper, SyncPolicy,
    SyncProcessor,
};
use crate::Result;

/// Thread-safe entry point for every queue operation.
///
/// Clones share one database, one set of collaborator stores and one set of
/// owner locks.
#[derive(Clone)]
pub struct SyncService {
    _db: Arc<Database>,
    db_path: Option<PathBuf>,
    repo: LibSqlActionRepository,
    collaborators: Collaborators,
    ingestor: QueueIngestor,
    processor: SyncProcessor,
    resolver: ConflictResolver,
    sweeper: RetentionSweeper,
}

impl SyncService {
    /// Open a sync service backed by a database file at `db_path`.
    pub async fn open_path(db_path: impl Into<PathBuf>, policy: SyncPolicy) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Database file at {} is not readable: {}. Moving it aside and retrying once.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };
        tracing::info!("Opened action queue at {}", db_path.display());

        Ok(Self::assemble(db, Some(db_path), policy))
    }

    /// Open an in-memory sync service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_policy(SyncPolicy::default()).await
    }

    pub async fn open_in_memory_with_policy(policy: SyncPolicy) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::assemble(db, None, policy))
    }

    fn assemble(db: Database, db_path: Option<PathBuf>, policy: SyncPolicy) -> Self {
        let conn = db.connection().clone();
        let repo = LibSqlActionRepository::new(conn.clone());
        let collaborators = Collaborators::libsql(conn);
        let dispatcher = Arc::new(Dispatcher::standard(&collaborators));
        let processor = SyncProcessor::new(repo.clone(), dispatcher, policy);

        Self {
            _db: Arc::new(db),
            db_path,
            ingestor: QueueIngestor::new(repo.clone()),
            resolver: ConflictResolver::new(repo.clone(), processor.clone()),
            sweeper: RetentionSweeper::new(repo.clone()),
            processor,
            collaborators,
            repo,
        }
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        error
            .to_string()
            .to_ascii_lowercase()
            .contains("file is not a database")
    }

    /// Rename the database file aside and drop its WAL/SHM sidecars
    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let base_name = db_path
                .file_name()
                .map_or_else(|| "studysync.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved unreadable database file from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        for suffix in ["-wal", "-shm"] {
            let mut sidecar = db_path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.is_file() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale database sidecar {}", sidecar.display());
            }
        }

        Ok(())
    }

    /// Database file location, `None` when in memory
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub const fn policy(&self) -> &SyncPolicy {
        self.processor.policy()
    }

    /// Collaborator stores the queued actions are replayed into
    pub const fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Append an action to the owner's queue.
    pub async fn enqueue(
        &self,
        owner: &str,
        action_type: &str,
        action_data: Value,
    ) -> Result<ActionRecord> {
        self.ingestor.enqueue(owner, action_type, action_data).await
    }

    /// Replay the owner's queue.
    pub async fn sync_all(&self, owner: &str) -> Result<SyncSummary> {
        self.processor.sync_all(owner).await
    }

    /// Pending, failed and conflicted actions, oldest first.
    pub async fn list_pending(&self, owner: &str) -> Result<Vec<ActionRecord>> {
        let owner = owner_id(owner)?;
        self.repo.list_unresolved(&owner).await
    }

    /// Fetch one of the owner's actions.
    pub async fn get_action(&self, owner: &str, id: &ActionId) -> Result<Option<ActionRecord>> {
        let owner = owner_id(owner)?;
        self.repo.get(&owner, id).await
    }

    /// Resolve a conflicted action.
    pub async fn resolve(
        &self,
        owner: &str,
        id: &ActionId,
        resolution: ConflictResolution,
        client_data: Option<Value>,
    ) -> Result<ActionRecord> {
        self.resolver
            .resolve(owner, id, resolution, client_data)
            .await
    }

    /// Re-submit an action that exhausted its retries.
    pub async fn retry_failed(&self, owner: &str, id: &ActionId) -> Result<ActionRecord> {
        self.resolver.retry_failed(owner, id).await
    }

    /// Delete synced actions older than `older_than_days`.
    pub async fn purge(&self, owner: &str, older_than_days: u32) -> Result<u64> {
        self.sweeper.purge(owner, older_than_days).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{NoteStore, SocialStore};
    use crate::models::{ActionStatus, LikeTarget, NoteCreate};
    use crate::sync::DEFAULT_RETENTION_DAYS;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_session_roundtrip() {
        let service = SyncService::open_in_memory().await.unwrap();

        service
            .enqueue("u1", "note_create", json!({ "id": "n1", "text": "a" }))
            .await
            .unwrap();
        service
            .enqueue("u1", "like_create", json!({ "targetType": "post", "targetId": "p1" }))
            .await
            .unwrap();
        assert_eq!(service.list_pending("u1").await.unwrap().len(), 2);

        let summary = service.sync_all("u1").await.unwrap();
        assert_eq!(summary.synced, 2);
        assert!(service.list_pending("u1").await.unwrap().is_empty());

        assert_eq!(service.purge("u1", DEFAULT_RETENTION_DAYS).await.unwrap(), 0);
        assert_eq!(service.purge("u1", 0).await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_like_enqueued_twice_creates_one_like() {
        let service = SyncService::open_in_memory().await.unwrap();
        let like = json!({ "targetType": "post", "targetId": "p1" });

        service.enqueue("u1", "like_create", like.clone()).await.unwrap();
        service.sync_all("u1").await.unwrap();
        service.enqueue("u1", "like_create", like).await.unwrap();
        service.sync_all("u1").await.unwrap();

        let likes = service
            .collaborators()
            .social
            .count_likes(LikeTarget::Post, "p1")
            .await
            .unwrap();
        assert_eq!(likes, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_resolved_by_client_data() {
        let service = SyncService::open_in_memory().await.unwrap();
        let notes = service.collaborators().notes.clone();

        notes
            .create_note(
                "u1",
                &NoteCreate {
                    id: "n1".to_string(),
                    text: "a".to_string(),
                    course_id: None,
                    lesson_id: None,
                },
            )
            .await
            .unwrap();
        service
            .enqueue("u1", "note_update", json!({ "id": "n1", "text": "b", "baseVersion": 1 }))
            .await
            .unwrap();
        let stale = service
            .enqueue("u1", "note_update", json!({ "id": "n1", "text": "c", "baseVersion": 1 }))
            .await
            .unwrap();

        let summary = service.sync_all("u1").await.unwrap();
        assert_eq!((summary.synced, summary.conflicts), (1, 1));

        let pending = service.list_pending("u1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, ActionStatus::Conflict);

        let resolved = service
            .resolve("u1", &stale.id, ConflictResolution::Client, Some(json!({ "text": "final" })))
            .await
            .unwrap();
        assert_eq!(resolved.status, ActionStatus::Synced);
        let note = notes.get_note("u1", "n1").await.unwrap().unwrap();
        assert_eq!(note.text, "final");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_path_creates_parent_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("studysync.db");

        let service = SyncService::open_path(&db_path, SyncPolicy::default())
            .await
            .unwrap();
        let record = service
            .enqueue("u1", "course_enrollment", json!({ "courseId": "c1" }))
            .await
            .unwrap();
        assert_eq!(service.db_path(), Some(db_path.as_path()));
        drop(service);

        let reopened = SyncService::open_path(&db_path, SyncPolicy::default())
            .await
            .unwrap();
        let stored = reopened.get_action("u1", &record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[test]
    fn test_detects_corrupted_database_errors() {
        assert!(SyncService::is_corrupted_db_error(&crate::Error::Database(
            "SQLite failure: file is not a database".to_string()
        )));
        assert!(!SyncService::is_corrupted_db_error(&crate::Error::InvalidInput(
            "owner must not be empty".to_string()
        )));
    }

    #[test]
    fn test_quarantine_moves_db_and_removes_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("studysync.db");
        std::fs::write(&db_path, b"not a database").unwrap();
        std::fs::write(dir.path().join("studysync.db-wal"), b"wal").unwrap();
        std::fs::write(dir.path().join("studysync.db-shm"), b"shm").unwrap();

        SyncService::quarantine_corrupted_db_files(&db_path).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("studysync.db.corrupt-"));
    }
}
