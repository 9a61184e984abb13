//! Collaborator stores written by replayed actions
//!
//! The sync engine does not own the business rules of notes, social content,
//! messaging, course progress, flashcards or study sessions. It reaches each
//! subsystem through a narrow write trait whose only contract is:
//! creates keyed by natural identifiers do not duplicate on repeat calls, and
//! updates/deletes surface "not found" distinctly from "conflicting version".

mod spaced_repetition;
mod store;

use std::sync::Arc;

use async_trait::async_trait;
use libsql::Connection;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{
    AssignmentSubmission, CommentCreate, FlashcardReview, LessonProgress, LikeTarget, MessageSend,
    NoteCreate, NoteUpdate, PomodoroComplete, PostCreate, QuizSubmission,
};

pub use spaced_repetition::{schedule_reviews, CardSchedule};
pub use store::LibSqlCollaborators;

/// Errors surfaced by collaborator stores
#[derive(Debug, Error)]
pub enum CollabError {
    /// Target resource does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Target resource changed in a way incompatible with the client's base state
    #[error("{kind} {id} was modified on the server")]
    VersionConflict {
        kind: &'static str,
        id: String,
        /// Current server-side state of the resource
        current: Value,
    },

    /// Transient storage or availability failure
    #[error("collaborator storage error: {0}")]
    Storage(String),
}

impl From<libsql::Error> for CollabError {
    fn from(error: libsql::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for CollabError {
    fn from(error: serde_json::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

pub type CollabResult<T> = Result<T, CollabError>;

/// Server-side state of a note
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredNote {
    pub id: String,
    pub text: String,
    pub version: i64,
    pub course_id: Option<String>,
    pub lesson_id: Option<String>,
    pub updated_at: i64,
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Create a note unless a live one with the same id exists. A soft-deleted
    /// note is revived. Returns whether a row was written.
    async fn create_note(&self, owner: &str, note: &NoteCreate) -> CollabResult<bool>;

    /// Replace a note's text; checks `base_version` when `enforce_base_version`
    /// is set. Returns the new version.
    async fn update_note(
        &self,
        owner: &str,
        update: &NoteUpdate,
        enforce_base_version: bool,
    ) -> CollabResult<i64>;

    /// Delete a note; returns `false` when it was already absent
    async fn delete_note(&self, owner: &str, note_id: &str) -> CollabResult<bool>;

    async fn get_note(&self, owner: &str, note_id: &str) -> CollabResult<Option<StoredNote>>;
}

#[async_trait]
pub trait SocialStore: Send + Sync {
    /// Create a post; dedupes on a client-supplied id. Returns the post id.
    async fn create_post(&self, owner: &str, post: &PostCreate) -> CollabResult<String>;

    /// Comment on an existing post; `NotFound` when the post is unknown
    async fn create_comment(&self, owner: &str, comment: &CommentCreate) -> CollabResult<bool>;

    async fn like_exists(
        &self,
        owner: &str,
        target_type: LikeTarget,
        target_id: &str,
    ) -> CollabResult<bool>;

    async fn create_like(
        &self,
        owner: &str,
        target_type: LikeTarget,
        target_id: &str,
    ) -> CollabResult<bool>;

    async fn count_likes(&self, target_type: LikeTarget, target_id: &str) -> CollabResult<u64>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a direct message; dedupes on a client-supplied id. Returns the message id.
    async fn send_message(&self, owner: &str, message: &MessageSend) -> CollabResult<String>;
}

#[async_trait]
pub trait CourseProgressStore: Send + Sync {
    /// Upsert progress keyed by `(owner, lesson)`; progress never regresses
    async fn upsert_lesson_progress(
        &self,
        owner: &str,
        progress: &LessonProgress,
    ) -> CollabResult<()>;

    async fn submit_quiz(&self, owner: &str, quiz: &QuizSubmission) -> CollabResult<bool>;

    async fn submit_assignment(
        &self,
        owner: &str,
        assignment: &AssignmentSubmission,
    ) -> CollabResult<bool>;

    async fn enroll(&self, owner: &str, course_id: &str) -> CollabResult<bool>;

    async fn complete_course(&self, owner: &str, course_id: &str) -> CollabResult<bool>;

    async fn is_enrolled(&self, owner: &str, course_id: &str) -> CollabResult<bool>;
}

#[async_trait]
pub trait FlashcardStore: Send + Sync {
    /// Record a review outcome and return the card's recomputed schedule
    async fn apply_review(&self, owner: &str, review: &FlashcardReview)
        -> CollabResult<CardSchedule>;

    async fn get_schedule(&self, owner: &str, card_id: &str)
        -> CollabResult<Option<CardSchedule>>;
}

#[async_trait]
pub trait StudySessionStore: Send + Sync {
    /// Mark a study session completed, creating it if the server never saw it start
    async fn complete_session(&self, owner: &str, session: &PomodoroComplete)
        -> CollabResult<()>;
}

/// Handles to every collaborator the dispatcher writes into
#[derive(Clone)]
pub struct Collaborators {
    pub notes: Arc<dyn NoteStore>,
    pub social: Arc<dyn SocialStore>,
    pub messages: Arc<dyn MessageStore>,
    pub progress: Arc<dyn CourseProgressStore>,
    pub flashcards: Arc<dyn FlashcardStore>,
    pub sessions: Arc<dyn StudySessionStore>,
}

impl Collaborators {
    /// All collaborators backed by tables in the shared libSQL database
    pub fn libsql(conn: Connection) -> Self {
        let store = Arc::new(LibSqlCollaborators::new(conn));
        Self {
            notes: store.clone(),
            social: store.clone(),
            messages: store.clone(),
            progress: store.clone(),
            flashcards: store.clone(),
            sessions: store,
        }
    }
}
