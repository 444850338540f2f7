//! Persistence seams for checkpoint and restore records
//!
//! The engine only needs commit/load; durable backends live behind these
//! traits. A commit must fully succeed or fail before returning so
//! status writes stay ordered for external observers.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{Checkpoint, Restore};

pub mod memory;

pub use memory::{MemoryCheckpointStore, MemoryRestoreStore};

/// Errors from the persistence layer
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// No checkpoint with this id
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// No restore with this id
    #[error("restore not found: {0}")]
    RestoreNotFound(String),

    /// The backend rejected the write
    #[error("commit failed: {0}")]
    CommitFailed(String),
}

/// Storage for checkpoint records.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist the record, replacing any previous version atomically.
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), PersistenceError>;

    /// Load a record by id.
    async fn load(&self, id: &str) -> Result<Checkpoint, PersistenceError>;
}

/// Storage for restore records.
#[async_trait]
pub trait RestoreStore: Send + Sync {
    /// Persist the record, replacing any previous version atomically.
    async fn save(&self, restore: &Restore) -> Result<(), PersistenceError>;

    /// Load a record by id.
    async fn load(&self, id: &str) -> Result<Restore, PersistenceError>;
}
