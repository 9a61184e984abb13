//! Action queue repository implementation

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::{ActionId, ActionPayload, ActionRecord, ActionType, ConflictResolution};
use crate::util::{compact_text, unix_millis_now};

const RECORD_COLUMNS: &str = "id, owner, action_type, payload, status, retry_count, \
     last_retry_at, error_message, conflict_resolution, server_version, created_at, \
     updated_at, synced_at";

/// Trait for action queue storage operations (async)
///
/// Every operation is scoped by owner; a record is never visible to or
/// mutable by another user.
#[allow(async_fn_in_trait)]
pub trait ActionRepository {
    /// Append a new `pending` record with a `created_at` strictly greater than
    /// any earlier record of the same owner
    async fn insert(&self, owner: &str, payload: &ActionPayload) -> Result<ActionRecord>;

    /// Get a record by id
    async fn get(&self, owner: &str, id: &ActionId) -> Result<Option<ActionRecord>>;

    /// Records eligible for replay: `pending`, and `failed` below the retry
    /// cap, oldest first
    async fn list_replayable(&self, owner: &str, max_retries: u32) -> Result<Vec<ActionRecord>>;

    /// Records awaiting sync or attention (`pending`, `failed`, `conflict`), oldest first
    async fn list_unresolved(&self, owner: &str) -> Result<Vec<ActionRecord>>;

    /// Persist the mutable lifecycle fields of a record
    async fn save(&self, record: &ActionRecord) -> Result<()>;

    /// Move `record` to `syncing` only if the stored row still has the
    /// status and `updated_at` it was read with. Returns `false` when another
    /// connection changed the row first.
    async fn claim_for_replay(&self, record: &ActionRecord, claimed_at: i64) -> Result<bool>;

    /// Move `syncing` records untouched since `cutoff` back to `pending`
    async fn reset_stale_syncing(&self, owner: &str, cutoff: i64) -> Result<u64>;

    /// Delete `synced` records whose `synced_at` is at or before `cutoff`
    async fn delete_synced_through(&self, owner: &str, cutoff: i64) -> Result<u64>;
}

/// libSQL implementation of `ActionRepository`
#[derive(Clone)]
pub struct LibSqlActionRepository {
    conn: Connection,
}

impl LibSqlActionRepository {
    /// Create a new repository over a shared connection
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Run a record query. Rows that no longer parse are marked `failed` with
    /// at least `retry_floor` retries and left out of the result.
    async fn query_records(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        retry_floor: u32,
    ) -> Result<Vec<ActionRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        let mut unreadable = Vec::new();
        while let Some(row) = rows.next().await? {
            match Self::parse_record(&row)? {
                Ok(record) => records.push(record),
                Err(row) => unreadable.push(row),
            }
        }
        drop(rows);

        for row in unreadable {
            self.mark_unreadable(&row, retry_floor).await?;
        }
        Ok(records)
    }

    async fn mark_unreadable(&self, row: &UnreadableRow, retry_floor: u32) -> Result<()> {
        tracing::warn!(action_id = %row.id, reason = %row.reason, "Skipping unreadable action");
        self.conn
            .execute(
                "UPDATE sync_actions SET
                    status = 'failed',
                    retry_count = MAX(retry_count, ?1),
                    error_message = ?2,
                    updated_at = ?3
                 WHERE id = ?4",
                libsql::params![
                    i64::from(retry_floor),
                    compact_text(&format!("unreadable stored action: {}", row.reason)),
                    unix_millis_now(),
                    row.id.as_str()
                ],
            )
            .await?;
        Ok(())
    }

    /// Parse a record from a database row selected with `RECORD_COLUMNS`.
    /// The outer error is a storage failure; the inner one a row whose id,
    /// type or payload does not parse.
    fn parse_record(row: &libsql::Row) -> Result<std::result::Result<ActionRecord, UnreadableRow>> {
        let raw_id: String = row.get(0)?;
        let unreadable = |reason: String| {
            Ok(Err(UnreadableRow {
                id: raw_id.clone(),
                reason,
            }))
        };

        let Ok(id) = raw_id.parse::<ActionId>() else {
            return unreadable(format!("invalid action id `{raw_id}`"));
        };
        let action_type: String = row.get(2)?;
        let Ok(action_type) = action_type.parse::<ActionType>() else {
            return unreadable(format!("unknown action type `{action_type}`"));
        };
        let payload: String = row.get(3)?;
        let payload = match serde_json::from_str(&payload)
            .map_err(Error::from)
            .and_then(|data| ActionPayload::parse(action_type, data))
        {
            Ok(payload) => payload,
            Err(error) => return unreadable(error.to_string()),
        };

        let status: String = row.get(4)?;
        let retry_count: i64 = row.get(5)?;
        let conflict_resolution = row
            .get::<Option<String>>(8)?
            .map(|value| value.parse::<ConflictResolution>())
            .transpose()?;
        let server_version = row
            .get::<Option<String>>(9)?
            .map(|value| serde_json::from_str(&value))
            .transpose()?;

        Ok(Ok(ActionRecord {
            id,
            owner: row.get(1)?,
            payload,
            status: status.parse()?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            last_retry_at: row.get(6)?,
            error_message: row.get(7)?,
            conflict_resolution,
            server_version,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            synced_at: row.get(12)?,
        }))
    }
}

/// A stored row that can no longer be turned into an `ActionRecord`
struct UnreadableRow {
    id: String,
    reason: String,
}

impl ActionRepository for LibSqlActionRepository {
    async fn insert(&self, owner: &str, payload: &ActionPayload) -> Result<ActionRecord> {
        let id = ActionId::new();
        let now = unix_millis_now();
        let data = serde_json::to_string(&payload.data()?)?;

        // Single statement so the max(created_at) read and the insert are atomic
        self.conn
            .execute(
                "INSERT INTO sync_actions
                    (id, owner, action_type, payload, status, retry_count, created_at, updated_at)
                 SELECT ?1, ?2, ?3, ?4, 'pending', 0,
                        MAX(?5, COALESCE(MAX(created_at) + 1, ?5)), ?5
                 FROM sync_actions WHERE owner = ?2",
                libsql::params![
                    id.as_str(),
                    owner,
                    payload.action_type().as_str(),
                    data,
                    now
                ],
            )
            .await?;

        self.get(owner, &id)
            .await?
            .ok_or_else(|| Error::Database(format!("inserted action {id} could not be read back")))
    }

    async fn get(&self, owner: &str, id: &ActionId) -> Result<Option<ActionRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM sync_actions WHERE id = ?1 AND owner = ?2");
        let mut records = self
            .query_records(&sql, libsql::params![id.as_str(), owner], 0)
            .await?;
        Ok(records.pop())
    }

    async fn list_replayable(&self, owner: &str, max_retries: u32) -> Result<Vec<ActionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM sync_actions
             WHERE owner = ?1
               AND (status = 'pending' OR (status = 'failed' AND retry_count < ?2))
             ORDER BY created_at ASC, seq ASC"
        );
        self.query_records(
            &sql,
            libsql::params![owner, i64::from(max_retries)],
            max_retries,
        )
        .await
    }

    async fn list_unresolved(&self, owner: &str) -> Result<Vec<ActionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM sync_actions
             WHERE owner = ?1 AND status IN ('pending', 'failed', 'conflict')
             ORDER BY created_at ASC, seq ASC"
        );
        self.query_records(&sql, libsql::params![owner], 0).await
    }

    async fn save(&self, record: &ActionRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload.data()?)?;
        let server_version = record
            .server_version
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let rows = self
            .conn
            .execute(
                "UPDATE sync_actions SET
                    payload = ?1,
                    status = ?2,
                    retry_count = ?3,
                    last_retry_at = ?4,
                    error_message = ?5,
                    conflict_resolution = ?6,
                    server_version = ?7,
                    updated_at = ?8,
                    synced_at = ?9
                 WHERE id = ?10 AND owner = ?11",
                libsql::params![
                    payload,
                    record.status.as_str(),
                    i64::from(record.retry_count),
                    record.last_retry_at,
                    record.error_message.clone(),
                    record.conflict_resolution.map(ConflictResolution::as_str),
                    server_version,
                    record.updated_at,
                    record.synced_at,
                    record.id.as_str(),
                    record.owner.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(record.id.to_string()));
        }
        Ok(())
    }

    async fn claim_for_replay(&self, record: &ActionRecord, claimed_at: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_actions SET status = 'syncing', updated_at = ?1
                 WHERE id = ?2 AND owner = ?3 AND status = ?4 AND updated_at = ?5",
                libsql::params![
                    claimed_at,
                    record.id.as_str(),
                    record.owner.as_str(),
                    record.status.as_str(),
                    record.updated_at
                ],
            )
            .await?;
        Ok(rows == 1)
    }

    async fn reset_stale_syncing(&self, owner: &str, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_actions SET status = 'pending', updated_at = ?1
                 WHERE owner = ?2 AND status = 'syncing' AND updated_at < ?3",
                libsql::params![unix_millis_now(), owner, cutoff],
            )
            .await?;
        Ok(rows)
    }

    async fn delete_synced_through(&self, owner: &str, cutoff: i64) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_actions
                 WHERE owner = ?1 AND status = 'synced'
                   AND synced_at IS NOT NULL AND synced_at <= ?2",
                libsql::params![owner, cutoff],
            )
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ActionStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> (Database, LibSqlActionRepository) {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlActionRepository::new(db.connection().clone());
        (db, repo)
    }

    fn enrollment(course: &str) -> ActionPayload {
        ActionPayload::parse(ActionType::CourseEnrollment, json!({ "courseId": course })).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_get() {
        let (_db, repo) = setup().await;

        let record = repo.insert("u1", &enrollment("c1")).await.unwrap();
        assert_eq!(record.status, ActionStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.synced_at.is_none());

        let fetched = repo.get("u1", &record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_is_owner_scoped() {
        let (_db, repo) = setup().await;

        let record = repo.insert("u1", &enrollment("c1")).await.unwrap();
        assert!(repo.get("u2", &record.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_created_at_strictly_increases_per_owner() {
        let (_db, repo) = setup().await;

        let mut previous = i64::MIN;
        for index in 0..20 {
            let record = repo
                .insert("u1", &enrollment(&format!("c{index}")))
                .await
                .unwrap();
            assert!(record.created_at > previous);
            previous = record.created_at;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_replayable_orders_by_created_at_and_skips_capped() {
        let (_db, repo) = setup().await;

        let first = repo.insert("u1", &enrollment("c1")).await.unwrap();
        let mut second = repo.insert("u1", &enrollment("c2")).await.unwrap();
        let mut third = repo.insert("u1", &enrollment("c3")).await.unwrap();
        repo.insert("u2", &enrollment("c4")).await.unwrap();

        second.status = ActionStatus::Failed;
        second.retry_count = 3;
        repo.save(&second).await.unwrap();
        third.status = ActionStatus::Conflict;
        repo.save(&third).await.unwrap();

        let replayable = repo.list_replayable("u1", 3).await.unwrap();
        let ids: Vec<_> = replayable.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![first.id]);

        let unresolved = repo.list_unresolved("u1").await.unwrap();
        let ids: Vec<_> = unresolved.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_roundtrips_conflict_fields() {
        let (_db, repo) = setup().await;

        let mut record = repo.insert("u1", &enrollment("c1")).await.unwrap();
        record.status = ActionStatus::Conflict;
        record.error_message = Some("version mismatch".to_string());
        record.server_version = Some(json!({ "version": 4 }));
        record.conflict_resolution = Some(ConflictResolution::Merge);
        repo.save(&record).await.unwrap();

        let fetched = repo.get("u1", &record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_rejects_foreign_owner() {
        let (_db, repo) = setup().await;

        let mut record = repo.insert("u1", &enrollment("c1")).await.unwrap();
        record.owner = "u2".to_string();
        let err = repo.save(&record).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_claim_for_replay_is_exclusive() {
        let (db, repo) = setup().await;
        let other = LibSqlActionRepository::new(db.connection().clone());

        let record = repo.insert("u1", &enrollment("c1")).await.unwrap();
        let stale_copy = other.get("u1", &record.id).await.unwrap().unwrap();

        assert!(repo.claim_for_replay(&record, 5_000).await.unwrap());
        assert!(!other.claim_for_replay(&stale_copy, 5_001).await.unwrap());

        let fetched = repo.get("u1", &record.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ActionStatus::Syncing);
        assert_eq!(fetched.updated_at, 5_000);

        // Back to pending with a newer stamp: an older read still cannot claim it
        let mut requeued = fetched;
        requeued.status = ActionStatus::Pending;
        requeued.updated_at = 6_000;
        repo.save(&requeued).await.unwrap();
        assert!(!other.claim_for_replay(&stale_copy, 6_001).await.unwrap());
        assert!(other.claim_for_replay(&requeued, 6_002).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_stale_syncing() {
        let (_db, repo) = setup().await;

        let mut record = repo.insert("u1", &enrollment("c1")).await.unwrap();
        record.status = ActionStatus::Syncing;
        record.updated_at = 1_000;
        repo.save(&record).await.unwrap();

        assert_eq!(repo.reset_stale_syncing("u1", 500).await.unwrap(), 0);
        assert_eq!(repo.reset_stale_syncing("u1", 2_000).await.unwrap(), 1);

        let fetched = repo.get("u1", &record.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ActionStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_synced_through_only_touches_synced() {
        let (_db, repo) = setup().await;

        let mut synced = repo.insert("u1", &enrollment("c1")).await.unwrap();
        synced.status = ActionStatus::Synced;
        synced.synced_at = Some(1_000);
        repo.save(&synced).await.unwrap();

        let mut failed = repo.insert("u1", &enrollment("c2")).await.unwrap();
        failed.status = ActionStatus::Failed;
        failed.retry_count = 3;
        repo.save(&failed).await.unwrap();

        assert_eq!(repo.delete_synced_through("u1", 999).await.unwrap(), 0);
        assert_eq!(repo.delete_synced_through("u1", 1_000).await.unwrap(), 1);
        assert!(repo.get("u1", &synced.id).await.unwrap().is_none());
        assert!(repo.get("u1", &failed.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreadable_row_is_failed_and_skipped() {
        let (db, repo) = setup().await;

        let broken = repo.insert("u1", &enrollment("c1")).await.unwrap();
        let healthy = repo.insert("u1", &enrollment("c2")).await.unwrap();
        db.connection()
            .execute(
                "UPDATE sync_actions SET payload = '{}' WHERE id = ?1",
                [broken.id.as_str()],
            )
            .await
            .unwrap();

        let replayable = repo.list_replayable("u1", 3).await.unwrap();
        let ids: Vec<_> = replayable.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![healthy.id]);

        let mut rows = db
            .connection()
            .query(
                "SELECT status, retry_count, error_message FROM sync_actions WHERE id = ?1",
                [broken.id.as_str()],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "failed");
        assert_eq!(row.get::<i64>(1).unwrap(), 3);
        assert!(row
            .get::<String>(2)
            .unwrap()
            .starts_with("unreadable stored action"));

        // Terminal once marked: later listings no longer select it
        let replayable = repo.list_replayable("u1", 3).await.unwrap();
        assert_eq!(replayable.len(), 1);
        assert!(repo.get("u1", &broken.id).await.unwrap().is_none());
    }
}
