//! Test fixtures for the sync engine

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ActionHandler, Dispatcher, QueueIngestor, ReplayError, SyncPolicy, SyncProcessor};
use crate::collab::{Collaborators, LibSqlCollaborators};
use crate::db::{Database, LibSqlActionRepository};
use crate::models::{ActionId, ActionRecord, ActionType};

/// In-memory database with every sync component wired over it
pub struct Harness {
    pub db: Database,
    pub repo: LibSqlActionRepository,
    pub store: LibSqlCollaborators,
    pub collaborators: Collaborators,
    pub ingestor: QueueIngestor,
}

impl Harness {
    pub async fn new() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let conn = db.connection().clone();
        let repo = LibSqlActionRepository::new(conn.clone());
        Self {
            store: LibSqlCollaborators::new(conn.clone()),
            collaborators: Collaborators::libsql(conn),
            ingestor: QueueIngestor::new(repo.clone()),
            repo,
            db,
        }
    }

    pub fn standard_dispatcher(&self) -> Dispatcher {
        Dispatcher::standard(&self.collaborators)
    }

    pub fn processor(&self, dispatcher: Dispatcher, policy: SyncPolicy) -> SyncProcessor {
        SyncProcessor::new(self.repo.clone(), Arc::new(dispatcher), policy)
    }

    /// Standard dispatcher with `handler` observing (or replacing) `action_type`
    pub fn processor_with(
        &self,
        action_type: ActionType,
        handler: Arc<RecordingHandler>,
        policy: SyncPolicy,
    ) -> SyncProcessor {
        let mut dispatcher = self.standard_dispatcher();
        dispatcher.register(action_type, handler);
        self.processor(dispatcher, policy)
    }
}

enum Behavior {
    Delegate(Arc<dyn ActionHandler>),
    Fail(ReplayError),
    Stall(Duration),
}

/// Handler that records every replayed record id before acting
pub struct RecordingHandler {
    behavior: Behavior,
    replayed: Mutex<Vec<ActionId>>,
}

impl RecordingHandler {
    fn with(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            replayed: Mutex::new(Vec::new()),
        })
    }

    /// Forward to `inner`
    pub fn delegating(inner: Arc<dyn ActionHandler>) -> Arc<Self> {
        Self::with(Behavior::Delegate(inner))
    }

    /// Always fail with `error`
    pub fn failing(error: ReplayError) -> Arc<Self> {
        Self::with(Behavior::Fail(error))
    }

    /// Sleep for `delay`, then succeed
    pub fn stalling(delay: Duration) -> Arc<Self> {
        Self::with(Behavior::Stall(delay))
    }

    pub fn replayed(&self) -> Vec<ActionId> {
        self.replayed.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.replayed.lock().unwrap().len()
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn replay(&self, record: &ActionRecord) -> Result<(), ReplayError> {
        self.replayed.lock().unwrap().push(record.id);
        match &self.behavior {
            Behavior::Delegate(inner) => inner.replay(record).await,
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
        }
    }
}
