//! Data models for studysync

mod action;
mod payload;
mod summary;

pub use action::{ActionId, ActionRecord, ActionStatus, ActionType, ConflictResolution};
pub use payload::{
    ActionPayload, AssignmentSubmission, CommentCreate, CourseRef, FlashcardReview, LessonProgress,
    LikeCreate, LikeTarget, MessageSend, NoteCreate, NoteDelete, NoteUpdate, PomodoroComplete,
    PostCreate, QuizSubmission,
};
pub use summary::SyncSummary;
