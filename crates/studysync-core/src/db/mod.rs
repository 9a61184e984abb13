//! Database layer for studysync

mod action_repository;
mod connection;
mod migrations;

pub use action_repository::{ActionRepository, LibSqlActionRepository};
pub use connection::Database;
