//! Queued action record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ActionPayload;
use crate::error::Error;

/// A unique identifier for a queued action, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new unique action ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Closed set of action kinds a client device may queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    LessonProgressUpdate,
    QuizSubmission,
    AssignmentSubmission,
    NoteCreate,
    NoteUpdate,
    NoteDelete,
    PostCreate,
    CommentCreate,
    LikeCreate,
    MessageSend,
    FlashcardReview,
    PomodoroComplete,
    CourseEnrollment,
    CourseCompletion,
}

impl ActionType {
    /// Every variant, in declaration order
    pub const ALL: [Self; 14] = [
        Self::LessonProgressUpdate,
        Self::QuizSubmission,
        Self::AssignmentSubmission,
        Self::NoteCreate,
        Self::NoteUpdate,
        Self::NoteDelete,
        Self::PostCreate,
        Self::CommentCreate,
        Self::LikeCreate,
        Self::MessageSend,
        Self::FlashcardReview,
        Self::PomodoroComplete,
        Self::CourseEnrollment,
        Self::CourseCompletion,
    ];

    /// Wire name of the action type
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LessonProgressUpdate => "lesson_progress_update",
            Self::QuizSubmission => "quiz_submission",
            Self::AssignmentSubmission => "assignment_submission",
            Self::NoteCreate => "note_create",
            Self::NoteUpdate => "note_update",
            Self::NoteDelete => "note_delete",
            Self::PostCreate => "post_create",
            Self::CommentCreate => "comment_create",
            Self::LikeCreate => "like_create",
            Self::MessageSend => "message_send",
            Self::FlashcardReview => "flashcard_review",
            Self::PomodoroComplete => "pomodoro_complete",
            Self::CourseEnrollment => "course_enrollment",
            Self::CourseCompletion => "course_completion",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| Error::InvalidActionType(wanted.to_string()))
    }
}

/// Lifecycle state of a queued action
///
/// `pending -> syncing -> {synced | failed | conflict}`; `failed` and
/// `conflict` return to `pending` only through explicit re-submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
    Conflict,
}

impl ActionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            "conflict" => Ok(Self::Conflict),
            other => Err(Error::Database(format!("unknown action status `{other}`"))),
        }
    }
}

/// Strategy chosen by the client to settle a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Server state wins; the queued action is dropped without replay
    Server,
    /// Client data overwrites the payload and is replayed blind
    Client,
    /// Server snapshot and client data are combined, then replayed blind
    Merge,
}

impl ConflictResolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "client" => Ok(Self::Client),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!(
                "resolution must be one of server, client, merge (got `{other}`)"
            ))),
        }
    }
}

/// One queued client action and its synchronization state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// Unique identifier
    pub id: ActionId,
    /// User whose device produced the action
    pub owner: String,
    /// Type-tagged payload, serialized as `actionType` + `actionData`
    #[serde(flatten)]
    pub payload: ActionPayload,
    pub status: ActionStatus,
    /// Failed replay attempts since the last explicit re-submission
    pub retry_count: u32,
    /// Unix ms of the most recent failed attempt
    pub last_retry_at: Option<i64>,
    pub error_message: Option<String>,
    pub conflict_resolution: Option<ConflictResolution>,
    /// Collaborator state captured when the conflict was detected
    pub server_version: Option<serde_json::Value>,
    /// Enqueue timestamp (Unix ms), the replay ordering key
    pub created_at: i64,
    /// Last state transition (Unix ms)
    pub updated_at: i64,
    pub synced_at: Option<i64>,
}

impl ActionRecord {
    /// Declared type of this action
    pub const fn action_type(&self) -> ActionType {
        self.payload.action_type()
    }
}
