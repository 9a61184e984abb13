//! Services shared by the API server and the CLI

mod sync_service;

pub use sync_service::SyncService;
