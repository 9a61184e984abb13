//! Typed action payloads
//!
//! Each `ActionType` owns exactly one payload shape. Payloads arrive as
//! untyped JSON (`actionData`) and are parsed into `ActionPayload` once, at
//! ingestion, so the replay path only ever sees well-formed variants.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ActionType;
use crate::error::{Error, Result};

/// Payload of a queued action, tagged by its action type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "actionType", content = "actionData", rename_all = "snake_case")]
pub enum ActionPayload {
    LessonProgressUpdate(LessonProgress),
    QuizSubmission(QuizSubmission),
    AssignmentSubmission(AssignmentSubmission),
    NoteCreate(NoteCreate),
    NoteUpdate(NoteUpdate),
    NoteDelete(NoteDelete),
    PostCreate(PostCreate),
    CommentCreate(CommentCreate),
    LikeCreate(LikeCreate),
    MessageSend(MessageSend),
    FlashcardReview(FlashcardReview),
    PomodoroComplete(PomodoroComplete),
    CourseEnrollment(CourseRef),
    CourseCompletion(CourseRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub course_id: String,
    pub lesson_id: String,
    pub progress_percent: u8,
    #[serde(default)]
    pub time_spent_secs: u64,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    pub submission_id: String,
    pub quiz_id: String,
    pub answers: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSubmission {
    pub submission_id: String,
    pub assignment_id: String,
    pub content: String,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteCreate {
    /// Client-generated note id (natural key)
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteUpdate {
    pub id: String,
    pub text: String,
    /// Note version the client edited; a mismatch is a conflict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDelete {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreate {
    /// Optional client id; without it re-delivery may create duplicates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentCreate {
    pub comment_id: String,
    pub post_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeTarget {
    Post,
    Comment,
}

impl LikeTarget {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeCreate {
    pub target_type: LikeTarget,
    pub target_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub recipient_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardReview {
    pub card_id: String,
    /// SM-2 recall quality, 0 (blackout) to 5 (perfect)
    pub quality: u8,
    /// Unix ms the review happened on the device
    pub reviewed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroComplete {
    pub session_id: String,
    pub duration_minutes: u32,
    pub completed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRef {
    pub course_id: String,
}

impl ActionPayload {
    /// Parse untyped action data for the given action type and validate it.
    pub fn parse(action_type: ActionType, data: Value) -> Result<Self> {
        if !data.is_object() {
            return Err(Error::InvalidPayload(format!(
                "{action_type} payload must be a JSON object"
            )));
        }
        let tagged = json!({ "actionType": action_type.as_str(), "actionData": data });
        let payload: Self = serde_json::from_value(tagged)
            .map_err(|error| Error::InvalidPayload(format!("{action_type}: {error}")))?;
        payload.validate()?;
        Ok(payload)
    }

    /// Parse from the raw type name and data, as received from a client.
    pub fn from_parts(action_type: &str, data: Value) -> Result<Self> {
        let action_type: ActionType = action_type.parse()?;
        Self::parse(action_type, data)
    }

    /// The action type this payload belongs to
    pub const fn action_type(&self) -> ActionType {
        match self {
            Self::LessonProgressUpdate(_) => ActionType::LessonProgressUpdate,
            Self::QuizSubmission(_) => ActionType::QuizSubmission,
            Self::AssignmentSubmission(_) => ActionType::AssignmentSubmission,
            Self::NoteCreate(_) => ActionType::NoteCreate,
            Self::NoteUpdate(_) => ActionType::NoteUpdate,
            Self::NoteDelete(_) => ActionType::NoteDelete,
            Self::PostCreate(_) => ActionType::PostCreate,
            Self::CommentCreate(_) => ActionType::CommentCreate,
            Self::LikeCreate(_) => ActionType::LikeCreate,
            Self::MessageSend(_) => ActionType::MessageSend,
            Self::FlashcardReview(_) => ActionType::FlashcardReview,
            Self::PomodoroComplete(_) => ActionType::PomodoroComplete,
            Self::CourseEnrollment(_) => ActionType::CourseEnrollment,
            Self::CourseCompletion(_) => ActionType::CourseCompletion,
        }
    }

    /// The untagged `actionData` object
    pub fn data(&self) -> Result<Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("actionData")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::LessonProgressUpdate(progress) => {
                require_non_blank("courseId", &progress.course_id)?;
                require_non_blank("lessonId", &progress.lesson_id)?;
                if progress.progress_percent > 100 {
                    return Err(Error::InvalidPayload(
                        "progressPercent must be in [0, 100]".to_string(),
                    ));
                }
            }
            Self::QuizSubmission(quiz) => {
                require_non_blank("submissionId", &quiz.submission_id)?;
                require_non_blank("quizId", &quiz.quiz_id)?;
                if quiz.score.is_some_and(|score| !score.is_finite() || score < 0.0) {
                    return Err(Error::InvalidPayload(
                        "score must be a non-negative number".to_string(),
                    ));
                }
            }
            Self::AssignmentSubmission(assignment) => {
                require_non_blank("submissionId", &assignment.submission_id)?;
                require_non_blank("assignmentId", &assignment.assignment_id)?;
                require_non_blank("content", &assignment.content)?;
            }
            Self::NoteCreate(note) => require_non_blank("id", &note.id)?,
            Self::NoteUpdate(note) => require_non_blank("id", &note.id)?,
            Self::NoteDelete(note) => require_non_blank("id", &note.id)?,
            Self::PostCreate(post) => {
                if let Some(post_id) = &post.post_id {
                    require_non_blank("postId", post_id)?;
                }
                require_non_blank("content", &post.content)?;
            }
            Self::CommentCreate(comment) => {
                require_non_blank("commentId", &comment.comment_id)?;
                require_non_blank("postId", &comment.post_id)?;
                require_non_blank("content", &comment.content)?;
            }
            Self::LikeCreate(like) => require_non_blank("targetId", &like.target_id)?,
            Self::MessageSend(message) => {
                if let Some(message_id) = &message.message_id {
                    require_non_blank("messageId", message_id)?;
                }
                require_non_blank("recipientId", &message.recipient_id)?;
                require_non_blank("content", &message.content)?;
            }
            Self::FlashcardReview(review) => {
                require_non_blank("cardId", &review.card_id)?;
                if review.quality > 5 {
                    return Err(Error::InvalidPayload(
                        "quality must be in [0, 5]".to_string(),
                    ));
                }
            }
            Self::PomodoroComplete(session) => {
                require_non_blank("sessionId", &session.session_id)?;
                if session.duration_minutes == 0 {
                    return Err(Error::InvalidPayload(
                        "durationMinutes must be positive".to_string(),
                    ));
                }
            }
            Self::CourseEnrollment(course) | Self::CourseCompletion(course) => {
                require_non_blank("courseId", &course.course_id)?;
            }
        }
        Ok(())
    }
}

fn require_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidPayload(format!("{field} must not be empty")));
    }
    Ok(())
}
