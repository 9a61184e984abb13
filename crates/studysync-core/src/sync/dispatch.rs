//! Replay dispatch from action type to handler

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::handlers::{
    CourseHandler, FlashcardHandler, MessageHandler, NoteHandler, SocialHandler,
    StudySessionHandler,
};
use crate::collab::{CollabError, Collaborators};
use crate::models::{ActionRecord, ActionType};

/// Why a replay did not apply
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
    /// Transient failure; the record is re-queued up to the retry cap
    #[error("{0}")]
    Retryable(String),

    /// The targeted resource no longer exists; retried like a transient failure
    #[error("{kind} not found: {id}")]
    TargetNotFound { kind: String, id: String },

    /// The handler did not finish in time
    #[error("replay timed out after {0:?}")]
    Timeout(Duration),

    /// The server state is incompatible with a blind replay
    #[error("{message}")]
    Conflict {
        message: String,
        /// Current server-side state of the resource
        server_version: Value,
    },
}

impl ReplayError {
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<CollabError> for ReplayError {
    fn from(error: CollabError) -> Self {
        match error {
            CollabError::NotFound { kind, id } => Self::TargetNotFound {
                kind: kind.to_string(),
                id,
            },
            CollabError::VersionConflict { kind, id, current } => Self::Conflict {
                message: format!("{kind} {id} was modified on the server"),
                server_version: current,
            },
            CollabError::Storage(message) => Self::Retryable(message),
        }
    }
}

/// Applies one queued action to its collaborator
///
/// Replaying the same record more than once must not duplicate domain state,
/// except where the action type accepts at-least-once delivery.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError>;
}

/// Registration map from action type to its handler
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl Dispatcher {
    /// Dispatcher with no handlers; every replay fails as retryable
    pub fn empty() -> Self {
        Self::default()
    }

    /// Dispatcher with a handler for every action type
    pub fn standard(collaborators: &Collaborators) -> Self {
        let notes: Arc<dyn ActionHandler> =
            Arc::new(NoteHandler::new(collaborators.notes.clone()));
        let social: Arc<dyn ActionHandler> =
            Arc::new(SocialHandler::new(collaborators.social.clone()));
        let messages: Arc<dyn ActionHandler> =
            Arc::new(MessageHandler::new(collaborators.messages.clone()));
        let course: Arc<dyn ActionHandler> =
            Arc::new(CourseHandler::new(collaborators.progress.clone()));
        let flashcards: Arc<dyn ActionHandler> =
            Arc::new(FlashcardHandler::new(collaborators.flashcards.clone()));
        let sessions: Arc<dyn ActionHandler> =
            Arc::new(StudySessionHandler::new(collaborators.sessions.clone()));

        let mut dispatcher = Self::empty();
        for action_type in ActionType::ALL {
            let handler = match action_type {
                ActionType::NoteCreate | ActionType::NoteUpdate | ActionType::NoteDelete => &notes,
                ActionType::PostCreate | ActionType::CommentCreate | ActionType::LikeCreate => {
                    &social
                }
                ActionType::MessageSend => &messages,
                ActionType::LessonProgressUpdate
                | ActionType::QuizSubmission
                | ActionType::AssignmentSubmission
                | ActionType::CourseEnrollment
                | ActionType::CourseCompletion => &course,
                ActionType::FlashcardReview => &flashcards,
                ActionType::PomodoroComplete => &sessions,
            };
            dispatcher.register(action_type, handler.clone());
        }
        dispatcher
    }

    /// Register `handler` for `action_type`, returning the handler it replaced
    pub fn register(
        &mut self,
        action_type: ActionType,
        handler: Arc<dyn ActionHandler>,
    ) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.insert(action_type, handler)
    }

    pub fn is_registered(&self, action_type: ActionType) -> bool {
        self.handlers.contains_key(&action_type)
    }

    /// Replay a record through the handler registered for its action type
    pub async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError> {
        let action_type = record.action_type();
        let Some(handler) = self.handlers.get(&action_type) else {
            return Err(ReplayError::Retryable(format!(
                "no handler registered for {action_type}"
            )));
        };
        handler.replay(record).await
    }
}
