//! Standard handlers, one per collaborator family

use std::sync::Arc;

use async_trait::async_trait;

use super::{ActionHandler, ReplayError};
use crate::collab::{
    CourseProgressStore, FlashcardStore, MessageStore, NoteStore, SocialStore, StudySessionStore,
};
use crate::models::{ActionPayload, ActionRecord};

fn unsupported(handler: &str, record: &ActionRecord) -> ReplayError {
    ReplayError::Retryable(format!(
        "{handler} handler cannot replay {}",
        record.action_type()
    ))
}

/// `note_create`, `note_update` and `note_delete`
pub struct NoteHandler {
    notes: Arc<dyn NoteStore>,
}

impl NoteHandler {
    pub fn new(notes: Arc<dyn NoteStore>) -> Self {
        Self { notes }
    }
}

#[async_trait]
impl ActionHandler for NoteHandler {
    async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError> {
        let owner = record.owner.as_str();
        match &record.payload {
            ActionPayload::NoteCreate(note) => {
                self.notes.create_note(owner, note).await?;
            }
            ActionPayload::NoteUpdate(update) => {
                // A resolved conflict is applied over the current server version
                let enforce_base_version = record.conflict_resolution.is_none();
                self.notes
                    .update_note(owner, update, enforce_base_version)
                    .await?;
            }
            ActionPayload::NoteDelete(delete) => {
                self.notes.delete_note(owner, &delete.id).await?;
            }
            _ => return Err(unsupported("note", record)),
        }
        Ok(())
    }
}

/// `post_create`, `comment_create` and `like_create`
pub struct SocialHandler {
    social: Arc<dyn SocialStore>,
}

impl SocialHandler {
    pub fn new(social: Arc<dyn SocialStore>) -> Self {
        Self { social }
    }
}

#[async_trait]
impl ActionHandler for SocialHandler {
    async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError> {
        let owner = record.owner.as_str();
        match &record.payload {
            ActionPayload::PostCreate(post) => {
                self.social.create_post(owner, post).await?;
            }
            ActionPayload::CommentCreate(comment) => {
                self.social.create_comment(owner, comment).await?;
            }
            ActionPayload::LikeCreate(like) => {
                if !self
                    .social
                    .like_exists(owner, like.target_type, &like.target_id)
                    .await?
                {
                    self.social
                        .create_like(owner, like.target_type, &like.target_id)
                        .await?;
                }
            }
            _ => return Err(unsupported("social", record)),
        }
        Ok(())
    }
}

/// `message_send`
pub struct MessageHandler {
    messages: Arc<dyn MessageStore>,
}

impl MessageHandler {
    pub fn new(messages: Arc<dyn MessageStore>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl ActionHandler for MessageHandler {
    async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError> {
        let ActionPayload::MessageSend(message) = &record.payload else {
            return Err(unsupported("message", record));
        };
        self.messages.send_message(&record.owner, message).await?;
        Ok(())
    }
}

/// Lesson progress, quiz and assignment submissions, enrollment and completion
pub struct CourseHandler {
    progress: Arc<dyn CourseProgressStore>,
}

impl CourseHandler {
    pub fn new(progress: Arc<dyn CourseProgressStore>) -> Self {
        Self { progress }
    }
}

#[async_trait]
impl ActionHandler for CourseHandler {
    async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError> {
        let owner = record.owner.as_str();
        match &record.payload {
            ActionPayload::LessonProgressUpdate(progress) => {
                self.progress.upsert_lesson_progress(owner, progress).await?;
            }
            ActionPayload::QuizSubmission(quiz) => {
                self.progress.submit_quiz(owner, quiz).await?;
            }
            ActionPayload::AssignmentSubmission(assignment) => {
                self.progress.submit_assignment(owner, assignment).await?;
            }
            ActionPayload::CourseEnrollment(course) => {
                self.progress.enroll(owner, &course.course_id).await?;
            }
            ActionPayload::CourseCompletion(course) => {
                self.progress.complete_course(owner, &course.course_id).await?;
            }
            _ => return Err(unsupported("course", record)),
        }
        Ok(())
    }
}

/// `flashcard_review`
pub struct FlashcardHandler {
    flashcards: Arc<dyn FlashcardStore>,
}

impl FlashcardHandler {
    pub fn new(flashcards: Arc<dyn FlashcardStore>) -> Self {
        Self { flashcards }
    }
}

#[async_trait]
impl ActionHandler for FlashcardHandler {
    async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError> {
        let ActionPayload::FlashcardReview(review) = &record.payload else {
            return Err(unsupported("flashcard", record));
        };
        let schedule = self.flashcards.apply_review(&record.owner, review).await?;
        tracing::trace!(
            card_id = %review.card_id,
            interval_days = schedule.interval_days,
            "Flashcard rescheduled"
        );
        Ok(())
    }
}

/// `pomodoro_complete`
pub struct StudySessionHandler {
    sessions: Arc<dyn StudySessionStore>,
}

impl StudySessionHandler {
    pub fn new(sessions: Arc<dyn StudySessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl ActionHandler for StudySessionHandler {
    async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError> {
        let ActionPayload::PomodoroComplete(session) = &record.payload else {
            return Err(unsupported("study session", record));
        };
        self.sessions.complete_session(&record.owner, session).await?;
        Ok(())
    }
}
