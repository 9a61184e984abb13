//! studysync-core - Core library for studysync
//!
//! This crate contains the action queue model, the libSQL storage layer, the
//! collaborator stores that queued actions write into, and the sync engine
//! (ingestion, replay dispatch, processing, conflict resolution, retention)
//! shared by the API server and the operator CLI.

pub mod collab;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    ActionId, ActionPayload, ActionRecord, ActionStatus, ActionType, ConflictResolution,
    SyncSummary,
};
pub use services::SyncService;
pub use sync::SyncPolicy;
