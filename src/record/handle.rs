//! Shared handles pairing a record with the store that persists it
//!
//! Bracket tasks receive these through the flow store. A handle clones
//! cheaply, mutates the record under a lock, and commits a snapshot so
//! no lock is held across the await into the persistence layer.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::persistence::{CheckpointStore, PersistenceError, RestoreStore};
use crate::record::{Checkpoint, CheckpointStatus, Restore, RestoreStatus, StatusError};
use crate::resource::ResourceGraph;

/// Shared mutable checkpoint plus its persistence store.
#[derive(Clone)]
pub struct CheckpointHandle {
    inner: Arc<Mutex<Checkpoint>>,
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointHandle {
    /// Wrap a checkpoint with the store that persists it.
    pub fn new(checkpoint: Checkpoint, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(checkpoint)),
            store,
        }
    }

    /// Checkpoint id.
    pub fn id(&self) -> String {
        self.inner.lock().id.clone()
    }

    /// Current status.
    pub fn status(&self) -> CheckpointStatus {
        self.inner.lock().status
    }

    /// Read the record under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&Checkpoint) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Attach the resource graph this checkpoint protects.
    pub fn set_resource_graph(&self, graph: ResourceGraph) {
        self.inner.lock().resource_graph = Some(graph);
    }

    /// Transition the status, rejecting backwards moves.
    pub fn set_status(&self, to: CheckpointStatus) -> Result<(), StatusError> {
        self.inner.lock().transition(to)
    }

    /// Persist the current record state.
    pub async fn commit(&self) -> Result<(), PersistenceError> {
        let snapshot = self.inner.lock().clone();
        debug!(checkpoint_id = %snapshot.id, status = %snapshot.status, "committing checkpoint");
        self.store.commit(&snapshot).await
    }
}

impl std::fmt::Debug for CheckpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.inner.lock();
        f.debug_struct("CheckpointHandle")
            .field("id", &record.id)
            .field("status", &record.status)
            .finish()
    }
}

/// Shared mutable restore record plus its persistence store.
#[derive(Clone)]
pub struct RestoreHandle {
    inner: Arc<Mutex<Restore>>,
    store: Arc<dyn RestoreStore>,
}

impl RestoreHandle {
    /// Wrap a restore record with the store that persists it.
    pub fn new(restore: Restore, store: Arc<dyn RestoreStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(restore)),
            store,
        }
    }

    /// Restore id.
    pub fn id(&self) -> String {
        self.inner.lock().id.clone()
    }

    /// Current status.
    pub fn status(&self) -> RestoreStatus {
        self.inner.lock().status
    }

    /// Read the record under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&Restore) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Transition the status, rejecting backwards moves.
    pub fn set_status(&self, to: RestoreStatus) -> Result<(), StatusError> {
        self.inner.lock().transition(to)
    }

    /// Persist the current record state.
    pub async fn save(&self) -> Result<(), PersistenceError> {
        let snapshot = self.inner.lock().clone();
        debug!(restore_id = %snapshot.id, status = %snapshot.status, "saving restore");
        self.store.save(&snapshot).await
    }
}

impl std::fmt::Debug for RestoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.inner.lock();
        f.debug_struct("RestoreHandle")
            .field("id", &record.id)
            .field("status", &record.status)
            .finish()
    }
}
