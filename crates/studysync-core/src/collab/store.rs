//! libSQL-backed collaborator stores

use async_trait::async_trait;
use libsql::params::IntoParams;
use libsql::Connection;
use uuid::Uuid;

use super::{
    schedule_reviews, CardSchedule, CollabError, CollabResult, CourseProgressStore,
    FlashcardStore, MessageStore, NoteStore, SocialStore, StoredNote, StudySessionStore,
};
use crate::models::{
    AssignmentSubmission, CommentCreate, FlashcardReview, LessonProgress, LikeTarget, MessageSend,
    NoteCreate, NoteUpdate, PomodoroComplete, PostCreate, QuizSubmission,
};
use crate::util::unix_millis_now;

/// All collaborator stores over one shared libSQL connection
#[derive(Clone)]
pub struct LibSqlCollaborators {
    conn: Connection,
}

impl LibSqlCollaborators {
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn exists(&self, sql: &str, params: impl IntoParams) -> CollabResult<bool> {
        let mut rows = self.conn.query(sql, params).await?;
        Ok(rows.next().await?.is_some())
    }

    async fn count(&self, sql: &str, params: impl IntoParams) -> CollabResult<u64> {
        let mut rows = self.conn.query(sql, params).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn note_conflict(note: StoredNote) -> CollabError {
    CollabError::VersionConflict {
        kind: "note",
        id: note.id.clone(),
        current: serde_json::to_value(&note).unwrap_or_default(),
    }
}

fn note_not_found(id: &str) -> CollabError {
    CollabError::NotFound {
        kind: "note",
        id: id.to_string(),
    }
}

#[async_trait]
impl NoteStore for LibSqlCollaborators {
    async fn create_note(&self, owner: &str, note: &NoteCreate) -> CollabResult<bool> {
        let now = unix_millis_now();
        // A live note is left alone; a soft-deleted one is revived with the new content
        let rows = self
            .conn
            .execute(
                "INSERT INTO notes
                    (owner, id, content, course_id, lesson_id, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
                 ON CONFLICT(owner, id) DO UPDATE SET
                    content = excluded.content,
                    course_id = excluded.course_id,
                    lesson_id = excluded.lesson_id,
                    version = notes.version + 1,
                    updated_at = excluded.updated_at,
                    is_deleted = 0
                 WHERE notes.is_deleted = 1",
                libsql::params![
                    owner,
                    note.id.as_str(),
                    note.text.as_str(),
                    note.course_id.clone(),
                    note.lesson_id.clone(),
                    now
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn update_note(
        &self,
        owner: &str,
        update: &NoteUpdate,
        enforce_base_version: bool,
    ) -> CollabResult<i64> {
        let current = self
            .get_note(owner, &update.id)
            .await?
            .ok_or_else(|| note_not_found(&update.id))?;

        if enforce_base_version
            && update
                .base_version
                .is_some_and(|base| base != current.version)
        {
            return Err(note_conflict(current));
        }

        // Compare-and-swap on the version read above
        let rows = self
            .conn
            .execute(
                "UPDATE notes SET content = ?1, version = version + 1, updated_at = ?2
                 WHERE owner = ?3 AND id = ?4 AND is_deleted = 0 AND version = ?5",
                libsql::params![
                    update.text.as_str(),
                    unix_millis_now(),
                    owner,
                    update.id.as_str(),
                    current.version
                ],
            )
            .await?;

        if rows == 0 {
            return match self.get_note(owner, &update.id).await? {
                Some(latest) if enforce_base_version => Err(note_conflict(latest)),
                Some(_) => Err(CollabError::Storage(format!(
                    "note {} changed during update",
                    update.id
                ))),
                None => Err(note_not_found(&update.id)),
            };
        }

        Ok(current.version + 1)
    }

    async fn delete_note(&self, owner: &str, note_id: &str) -> CollabResult<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE notes SET is_deleted = 1, version = version + 1, updated_at = ?1
                 WHERE owner = ?2 AND id = ?3 AND is_deleted = 0",
                libsql::params![unix_millis_now(), owner, note_id],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn get_note(&self, owner: &str, note_id: &str) -> CollabResult<Option<StoredNote>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, content, version, course_id, lesson_id, updated_at
                 FROM notes WHERE owner = ?1 AND id = ?2 AND is_deleted = 0",
                libsql::params![owner, note_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(StoredNote {
            id: row.get(0)?,
            text: row.get(1)?,
            version: row.get(2)?,
            course_id: row.get(3)?,
            lesson_id: row.get(4)?,
            updated_at: row.get(5)?,
        }))
    }
}

#[async_trait]
impl SocialStore for LibSqlCollaborators {
    async fn create_post(&self, owner: &str, post: &PostCreate) -> CollabResult<String> {
        let id = post
            .post_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        self.conn
            .execute(
                "INSERT OR IGNORE INTO posts (id, author, content, group_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                libsql::params![
                    id.as_str(),
                    owner,
                    post.content.as_str(),
                    post.group_id.clone(),
                    unix_millis_now()
                ],
            )
            .await?;
        Ok(id)
    }

    async fn create_comment(&self, owner: &str, comment: &CommentCreate) -> CollabResult<bool> {
        let post_exists = self
            .exists(
                "SELECT 1 FROM posts WHERE id = ?1 LIMIT 1",
                libsql::params![comment.post_id.as_str()],
            )
            .await?;
        if !post_exists {
            return Err(CollabError::NotFound {
                kind: "post",
                id: comment.post_id.clone(),
            });
        }

        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO comments (id, post_id, author, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                libsql::params![
                    comment.comment_id.as_str(),
                    comment.post_id.as_str(),
                    owner,
                    comment.content.as_str(),
                    unix_millis_now()
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn like_exists(
        &self,
        owner: &str,
        target_type: LikeTarget,
        target_id: &str,
    ) -> CollabResult<bool> {
        self.exists(
            "SELECT 1 FROM likes WHERE owner = ?1 AND target_type = ?2 AND target_id = ?3",
            libsql::params![owner, target_type.as_str(), target_id],
        )
        .await
    }

    async fn create_like(
        &self,
        owner: &str,
        target_type: LikeTarget,
        target_id: &str,
    ) -> CollabResult<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO likes (owner, target_type, target_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                libsql::params![owner, target_type.as_str(), target_id, unix_millis_now()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn count_likes(&self, target_type: LikeTarget, target_id: &str) -> CollabResult<u64> {
        self.count(
            "SELECT COUNT(*) FROM likes WHERE target_type = ?1 AND target_id = ?2",
            libsql::params![target_type.as_str(), target_id],
        )
        .await
    }
}

#[async_trait]
impl MessageStore for LibSqlCollaborators {
    async fn send_message(&self, owner: &str, message: &MessageSend) -> CollabResult<String> {
        let id = message
            .message_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        self.conn
            .execute(
                "INSERT OR IGNORE INTO messages (id, sender, recipient, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                libsql::params![
                    id.as_str(),
                    owner,
                    message.recipient_id.as_str(),
                    message.content.as_str(),
                    unix_millis_now()
                ],
            )
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl CourseProgressStore for LibSqlCollaborators {
    async fn upsert_lesson_progress(
        &self,
        owner: &str,
        progress: &LessonProgress,
    ) -> CollabResult<()> {
        self.conn
            .execute(
                "INSERT INTO lesson_progress
                    (owner, lesson_id, course_id, progress_percent, time_spent_secs, completed, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(owner, lesson_id) DO UPDATE SET
                    course_id = excluded.course_id,
                    progress_percent = MAX(progress_percent, excluded.progress_percent),
                    time_spent_secs = MAX(time_spent_secs, excluded.time_spent_secs),
                    completed = MAX(completed, excluded.completed),
                    updated_at = excluded.updated_at",
                libsql::params![
                    owner,
                    progress.lesson_id.as_str(),
                    progress.course_id.as_str(),
                    i64::from(progress.progress_percent),
                    i64::try_from(progress.time_spent_secs).unwrap_or(i64::MAX),
                    i64::from(progress.completed),
                    unix_millis_now()
                ],
            )
            .await?;
        Ok(())
    }

    async fn submit_quiz(&self, owner: &str, quiz: &QuizSubmission) -> CollabResult<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO quiz_submissions
                    (id, owner, quiz_id, answers, score, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                libsql::params![
                    quiz.submission_id.as_str(),
                    owner,
                    quiz.quiz_id.as_str(),
                    serde_json::to_string(&quiz.answers)?,
                    quiz.score,
                    unix_millis_now()
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn submit_assignment(
        &self,
        owner: &str,
        assignment: &AssignmentSubmission,
    ) -> CollabResult<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO assignment_submissions
                    (id, owner, assignment_id, content, attachment_urls, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                libsql::params![
                    assignment.submission_id.as_str(),
                    owner,
                    assignment.assignment_id.as_str(),
                    assignment.content.as_str(),
                    serde_json::to_string(&assignment.attachment_urls)?,
                    unix_millis_now()
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn enroll(&self, owner: &str, course_id: &str) -> CollabResult<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO enrollments (owner, course_id, enrolled_at)
                 VALUES (?1, ?2, ?3)",
                libsql::params![owner, course_id, unix_millis_now()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn complete_course(&self, owner: &str, course_id: &str) -> CollabResult<bool> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO course_completions (owner, course_id, completed_at)
                 VALUES (?1, ?2, ?3)",
                libsql::params![owner, course_id, unix_millis_now()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn is_enrolled(&self, owner: &str, course_id: &str) -> CollabResult<bool> {
        self.exists(
            "SELECT 1 FROM enrollments WHERE owner = ?1 AND course_id = ?2",
            libsql::params![owner, course_id],
        )
        .await
    }
}

#[async_trait]
impl FlashcardStore for LibSqlCollaborators {
    async fn apply_review(
        &self,
        owner: &str,
        review: &FlashcardReview,
    ) -> CollabResult<CardSchedule> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO flashcard_reviews (owner, card_id, reviewed_at, quality)
                 VALUES (?1, ?2, ?3, ?4)",
                libsql::params![
                    owner,
                    review.card_id.as_str(),
                    review.reviewed_at,
                    i64::from(review.quality)
                ],
            )
            .await?;

        let mut rows = self
            .conn
            .query(
                "SELECT quality, reviewed_at FROM flashcard_reviews
                 WHERE owner = ?1 AND card_id = ?2
                 ORDER BY reviewed_at ASC",
                libsql::params![owner, review.card_id.as_str()],
            )
            .await?;
        let mut history = Vec::new();
        while let Some(row) = rows.next().await? {
            let quality: i64 = row.get(0)?;
            history.push((u8::try_from(quality).unwrap_or(0), row.get::<i64>(1)?));
        }

        let schedule = schedule_reviews(&history).ok_or_else(|| {
            CollabError::Storage(format!("no review history for card {}", review.card_id))
        })?;

        self.conn
            .execute(
                "INSERT INTO flashcard_schedules
                    (owner, card_id, ease_factor, interval_days, repetitions, due_at, last_reviewed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(owner, card_id) DO UPDATE SET
                    ease_factor = excluded.ease_factor,
                    interval_days = excluded.interval_days,
                    repetitions = excluded.repetitions,
                    due_at = excluded.due_at,
                    last_reviewed_at = excluded.last_reviewed_at",
                libsql::params![
                    owner,
                    review.card_id.as_str(),
                    schedule.ease_factor,
                    schedule.interval_days,
                    schedule.repetitions,
                    schedule.due_at,
                    schedule.last_reviewed_at
                ],
            )
            .await?;

        Ok(schedule)
    }

    async fn get_schedule(
        &self,
        owner: &str,
        card_id: &str,
    ) -> CollabResult<Option<CardSchedule>> {
        let mut rows = self
            .conn
            .query(
                "SELECT ease_factor, interval_days, repetitions, due_at, last_reviewed_at
                 FROM flashcard_schedules WHERE owner = ?1 AND card_id = ?2",
                libsql::params![owner, card_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(CardSchedule {
            ease_factor: row.get(0)?,
            interval_days: row.get(1)?,
            repetitions: row.get(2)?,
            due_at: row.get(3)?,
            last_reviewed_at: row.get(4)?,
        }))
    }
}

#[async_trait]
impl StudySessionStore for LibSqlCollaborators {
    async fn complete_session(
        &self,
        owner: &str,
        session: &PomodoroComplete,
    ) -> CollabResult<()> {
        self.conn
            .execute(
                "INSERT INTO study_sessions (id, owner, duration_minutes, completed, completed_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(owner, id) DO UPDATE SET
                    duration_minutes = excluded.duration_minutes,
                    completed = 1,
                    completed_at = excluded.completed_at",
                libsql::params![
                    session.session_id.as_str(),
                    owner,
                    i64::from(session.duration_minutes),
                    session.completed_at
                ],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> (Database, LibSqlCollaborators) {
        let db = Database::open_in_memory().await.unwrap();
        let store = LibSqlCollaborators::new(db.connection().clone());
        (db, store)
    }

    fn note(id: &str, text: &str) -> NoteCreate {
        NoteCreate {
            id: id.to_string(),
            text: text.to_string(),
            course_id: None,
            lesson_id: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_note_create_is_idempotent() {
        let (_db, store) = setup().await;

        assert!(store.create_note("u1", &note("n1", "a")).await.unwrap());
        assert!(!store.create_note("u1", &note("n1", "changed")).await.unwrap());

        let stored = store.get_note("u1", "n1").await.unwrap().unwrap();
        assert_eq!(stored.text, "a");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_notes_are_owner_scoped() {
        let (_db, store) = setup().await;

        store.create_note("u1", &note("n1", "mine")).await.unwrap();
        assert!(store.get_note("u2", "n1").await.unwrap().is_none());

        let update = NoteUpdate {
            id: "n1".to_string(),
            text: "theirs".to_string(),
            base_version: None,
        };
        let err = store.update_note("u2", &update, true).await.unwrap_err();
        assert!(matches!(err, CollabError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_note_update_detects_stale_base_version() {
        let (_db, store) = setup().await;
        store.create_note("u1", &note("n1", "a")).await.unwrap();

        let fresh = NoteUpdate {
            id: "n1".to_string(),
            text: "b".to_string(),
            base_version: Some(1),
        };
        assert_eq!(store.update_note("u1", &fresh, true).await.unwrap(), 2);

        let stale = NoteUpdate {
            id: "n1".to_string(),
            text: "c".to_string(),
            base_version: Some(1),
        };
        let err = store.update_note("u1", &stale, true).await.unwrap_err();
        let CollabError::VersionConflict { current, .. } = err else {
            panic!("expected version conflict, got {err:?}");
        };
        assert_eq!(current["text"], "b");
        assert_eq!(current["version"], 2);

        // Blind replay ignores the base version
        assert_eq!(store.update_note("u1", &stale, false).await.unwrap(), 3);
        let stored = store.get_note("u1", "n1").await.unwrap().unwrap();
        assert_eq!(stored.text, "c");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_note_delete_missing_is_not_an_error() {
        let (_db, store) = setup().await;
        store.create_note("u1", &note("n1", "a")).await.unwrap();

        assert!(store.delete_note("u1", "n1").await.unwrap());
        assert!(!store.delete_note("u1", "n1").await.unwrap());
        assert!(!store.delete_note("u1", "never-existed").await.unwrap());
        assert!(store.get_note("u1", "n1").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_like_is_unique_per_owner_and_target() {
        let (_db, store) = setup().await;

        assert!(store.create_like("u1", LikeTarget::Post, "p1").await.unwrap());
        assert!(!store.create_like("u1", LikeTarget::Post, "p1").await.unwrap());
        assert!(store.create_like("u2", LikeTarget::Post, "p1").await.unwrap());
        assert!(store.like_exists("u1", LikeTarget::Post, "p1").await.unwrap());
        assert!(!store.like_exists("u1", LikeTarget::Comment, "p1").await.unwrap());
        assert_eq!(store.count_likes(LikeTarget::Post, "p1").await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lesson_progress_never_regresses() {
        let (db, store) = setup().await;

        let mut progress = LessonProgress {
            course_id: "c1".to_string(),
            lesson_id: "l1".to_string(),
            progress_percent: 80,
            time_spent_secs: 300,
            completed: false,
        };
        store.upsert_lesson_progress("u1", &progress).await.unwrap();
        progress.progress_percent = 40;
        progress.time_spent_secs = 100;
        store.upsert_lesson_progress("u1", &progress).await.unwrap();

        let mut rows = db
            .connection()
            .query(
                "SELECT progress_percent, time_spent_secs FROM lesson_progress WHERE owner = 'u1'",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 80);
        assert_eq!(row.get::<i64>(1).unwrap(), 300);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flashcard_review_replay_is_idempotent() {
        let (_db, store) = setup().await;

        let review = FlashcardReview {
            card_id: "card-1".to_string(),
            quality: 4,
            reviewed_at: 1_000,
        };
        let first = store.apply_review("u1", &review).await.unwrap();
        let second = store.apply_review("u1", &review).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.repetitions, 1);
        assert_eq!(
            store.get_schedule("u1", "card-1").await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enrollment_and_completion_dedupe() {
        let (_db, store) = setup().await;

        assert!(store.enroll("u1", "c1").await.unwrap());
        assert!(!store.enroll("u1", "c1").await.unwrap());
        assert!(store.is_enrolled("u1", "c1").await.unwrap());
        assert!(store.complete_course("u1", "c1").await.unwrap());
        assert!(!store.complete_course("u1", "c1").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_post_without_client_id_allows_multiplicity() {
        let (_db, store) = setup().await;

        let anonymous = PostCreate {
            post_id: None,
            content: "hello".to_string(),
            group_id: None,
        };
        let first = store.create_post("u1", &anonymous).await.unwrap();
        let second = store.create_post("u1", &anonymous).await.unwrap();
        assert_ne!(first, second);

        let keyed = PostCreate {
            post_id: Some("p1".to_string()),
            ..anonymous
        };
        assert_eq!(store.create_post("u1", &keyed).await.unwrap(), "p1");
        assert_eq!(store.create_post("u1", &keyed).await.unwrap(), "p1");
    }

    async fn rows_for(store: &LibSqlCollaborators, sql: &str, owner: &str) -> i64 {
        let mut rows = store.conn.query(sql, [owner]).await.unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_ids_are_scoped_per_owner() {
        let (_db, store) = setup().await;

        let quiz = QuizSubmission {
            submission_id: "s1".to_string(),
            quiz_id: "q1".to_string(),
            answers: serde_json::json!({ "1": "b" }),
            score: None,
        };
        assert!(store.submit_quiz("u1", &quiz).await.unwrap());
        assert!(store.submit_quiz("u2", &quiz).await.unwrap());
        assert!(!store.submit_quiz("u2", &quiz).await.unwrap());

        let assignment = AssignmentSubmission {
            submission_id: "s1".to_string(),
            assignment_id: "a1".to_string(),
            content: "essay".to_string(),
            attachment_urls: Vec::new(),
        };
        assert!(store.submit_assignment("u1", &assignment).await.unwrap());
        assert!(store.submit_assignment("u2", &assignment).await.unwrap());

        let post = PostCreate {
            post_id: Some("p1".to_string()),
            content: "hello".to_string(),
            group_id: None,
        };
        store.create_post("u1", &post).await.unwrap();
        store.create_post("u2", &post).await.unwrap();

        let message = MessageSend {
            message_id: Some("m1".to_string()),
            recipient_id: "u3".to_string(),
            content: "hi".to_string(),
        };
        store.send_message("u1", &message).await.unwrap();
        store.send_message("u2", &message).await.unwrap();

        let comment = CommentCreate {
            comment_id: "c1".to_string(),
            post_id: "p1".to_string(),
            content: "nice".to_string(),
        };
        assert!(store.create_comment("u1", &comment).await.unwrap());
        assert!(store.create_comment("u2", &comment).await.unwrap());

        let session = PomodoroComplete {
            session_id: "ses1".to_string(),
            duration_minutes: 25,
            completed_at: 1_000,
        };
        store.complete_session("u1", &session).await.unwrap();
        store.complete_session("u2", &session).await.unwrap();

        for owner in ["u1", "u2"] {
            for sql in [
                "SELECT COUNT(*) FROM quiz_submissions WHERE owner = ?1",
                "SELECT COUNT(*) FROM assignment_submissions WHERE owner = ?1",
                "SELECT COUNT(*) FROM posts WHERE author = ?1",
                "SELECT COUNT(*) FROM messages WHERE sender = ?1",
                "SELECT COUNT(*) FROM comments WHERE author = ?1",
                "SELECT COUNT(*) FROM study_sessions WHERE owner = ?1 AND completed = 1",
            ] {
                assert_eq!(rows_for(&store, sql, owner).await, 1, "{sql} for {owner}");
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_comment_requires_existing_post() {
        let (_db, store) = setup().await;

        let comment = CommentCreate {
            comment_id: "c1".to_string(),
            post_id: "p404".to_string(),
            content: "first".to_string(),
        };
        let err = store.create_comment("u1", &comment).await.unwrap_err();
        assert!(matches!(err, CollabError::NotFound { kind: "post", ref id } if id == "p404"));

        // Any user's post can be commented on
        let post = PostCreate {
            post_id: Some("p404".to_string()),
            content: "late post".to_string(),
            group_id: None,
        };
        store.create_post("u2", &post).await.unwrap();
        assert!(store.create_comment("u1", &comment).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recreating_deleted_note_revives_it() {
        let (_db, store) = setup().await;

        store.create_note("u1", &note("n1", "first")).await.unwrap();
        store.delete_note("u1", "n1").await.unwrap();
        assert!(store.get_note("u1", "n1").await.unwrap().is_none());

        assert!(store.create_note("u1", &note("n1", "second")).await.unwrap());
        let revived = store.get_note("u1", "n1").await.unwrap().unwrap();
        assert_eq!(revived.text, "second");
        assert_eq!(revived.version, 3);

        // A live note still ignores a repeated create
        assert!(!store.create_note("u1", &note("n1", "third")).await.unwrap());
        let stored = store.get_note("u1", "n1").await.unwrap().unwrap();
        assert_eq!(stored.text, "second");
    }
}
