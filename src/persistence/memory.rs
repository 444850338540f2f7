//! In-memory record stores
//!
//! Reference implementation of the store traits, used by tests and
//! single-process deployments. Each store also keeps the sequence of
//! statuses written per record, which lets tests assert that a terminal
//! status was committed exactly once.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::persistence::{CheckpointStore, PersistenceError, RestoreStore};
use crate::record::{Checkpoint, CheckpointStatus, Restore, RestoreStatus};

/// In-memory checkpoint storage.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    records: DashMap<String, Checkpoint>,
    status_log: DashMap<String, Vec<CheckpointStatus>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status ever committed for a checkpoint, in write order.
    pub fn status_history(&self, id: &str) -> Vec<CheckpointStatus> {
        self.status_log.get(id).map(|e| e.value().clone()).unwrap_or_default()
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Snapshot of every stored record.
    pub fn records(&self) -> Vec<Checkpoint> {
        self.records.iter().map(|e| e.value().clone()).collect()
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        self.status_log
            .entry(checkpoint.id.clone())
            .or_default()
            .push(checkpoint.status);
        self.records.insert(checkpoint.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Checkpoint, PersistenceError> {
        self.records
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PersistenceError::CheckpointNotFound(id.to_string()))
    }
}

/// In-memory restore storage.
#[derive(Default)]
pub struct MemoryRestoreStore {
    records: DashMap<String, Restore>,
    status_log: DashMap<String, Vec<RestoreStatus>>,
}

impl MemoryRestoreStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status ever saved for a restore, in write order.
    pub fn status_history(&self, id: &str) -> Vec<RestoreStatus> {
        self.status_log.get(id).map(|e| e.value().clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RestoreStore for MemoryRestoreStore {
    async fn save(&self, restore: &Restore) -> Result<(), PersistenceError> {
        self.status_log
            .entry(restore.id.clone())
            .or_default()
            .push(restore.status);
        self.records.insert(restore.id.clone(), restore.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Restore, PersistenceError> {
        self.records
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PersistenceError::RestoreNotFound(id.to_string()))
    }
}
