//! Offline action sync engine
//!
//! Actions queued by a client while offline are appended per owner
//! (`ingest`), replayed against their collaborator stores in creation order
//! (`processor` over `dispatch`), escalated to conflict resolution when the
//! server state diverged (`resolver`), and purged once synced (`sweeper`).
//! Every mutation of one owner's queue runs under that owner's lock.

mod dispatch;
mod handlers;
mod ingest;
mod owner_lock;
mod policy;
mod processor;
mod resolver;
mod sweeper;

pub use dispatch::{ActionHandler, Dispatcher, ReplayError};
pub use handlers::{
    CourseHandler, FlashcardHandler, MessageHandler, NoteHandler, SocialHandler,
    StudySessionHandler,
};
pub use ingest::QueueIngestor;
pub use owner_lock::{OwnerGuard, OwnerLocks};
pub use policy::SyncPolicy;
pub use processor::{ReplayOutcome, SyncProcessor};
pub use resolver::ConflictResolver;
pub use sweeper::{RetentionSweeper, DEFAULT_RETENTION_DAYS};

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// Validate and normalize the owning user id of a queue operation
pub(crate) fn owner_id(owner: &str) -> Result<String> {
    normalize_text_option(Some(owner.to_string()))
        .ok_or_else(|| Error::InvalidInput("owner must not be empty".to_string()))
}

#[cfg(test)]
pub(crate) mod testing;
