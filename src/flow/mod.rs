//! Flow model: tasks, compiled flows, and the execute/compensate protocol
//!
//! A [`FlowTask`] is a unit of forward work with an optional compensating
//! `revert`. Tasks declare the store bindings they require and provide;
//! the engine wires values between them through the [`store::FlowStore`]
//! so no task knows its neighbors.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub mod compiler;
pub mod engine;
pub mod protect;
pub mod restore;
pub mod store;

pub use compiler::{build_resource_flow, CompileError, PluginRegistry, ProtectionPlugin};
pub use engine::{EngineError, FlowEngine, RevertFailure};
pub use store::{FlowStore, StoreError, StoreValue, TaskOutput};

use crate::monitor::MonitorError;
use crate::persistence::PersistenceError;
use crate::provision::ProvisionError;
use crate::record::StatusError;

/// The two operation kinds a flow can be compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Back resources up into a checkpoint
    Protect,
    /// Restore resources from a checkpoint
    Restore,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Protect => f.write_str("protect"),
            OperationType::Restore => f.write_str("restore"),
        }
    }
}

/// Error returned by a task's execute or revert.
#[derive(Error, Debug)]
pub enum TaskError {
    /// A required store binding was missing or of the wrong kind
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record commit failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A status transition was rejected
    #[error(transparent)]
    Status(#[from] StatusError),

    /// A provisioning call failed
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// A monitored wait failed
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    /// Plugin-specific failure
    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// Convenience constructor for plugin-specific failures.
    pub fn other(message: impl Into<String>) -> Self {
        TaskError::Other(message.into())
    }
}

/// A unit of work in a flow.
///
/// `execute` reads its declared inputs from the store and returns the
/// bindings it publishes. `revert` compensates a successful execute; the
/// default does nothing, which is right for tasks with no side effects
/// to undo.
#[async_trait]
pub trait FlowTask: Send + Sync {
    /// Task name, used in ordering assertions and logs.
    fn name(&self) -> String;

    /// Store bindings that must exist before this task runs.
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// Store bindings this task publishes on success.
    fn provides(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run the forward action.
    async fn execute(&self, store: &FlowStore) -> Result<TaskOutput, TaskError>;

    /// Compensate a previously successful execute.
    async fn revert(&self, store: &FlowStore) -> Result<(), TaskError> {
        let _ = store;
        Ok(())
    }
}

/// An ordered sequence of tasks plus the bindings that seed the store.
pub struct CompiledFlow {
    /// Flow name, used in logs
    pub name: String,

    /// Tasks in execution order
    pub tasks: Vec<Box<dyn FlowTask>>,

    /// Initial store bindings
    pub seed: FlowStore,
}

impl CompiledFlow {
    /// Create an empty flow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            seed: FlowStore::new(),
        }
    }

    /// Append a task.
    pub fn push(&mut self, task: Box<dyn FlowTask>) {
        self.tasks.push(task);
    }

    /// Seed a store binding.
    pub fn bind(&mut self, name: impl Into<String>, value: StoreValue) {
        self.seed.bind(name, value);
    }

    /// Task names in execution order.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the flow has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl fmt::Debug for CompiledFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledFlow")
            .field("name", &self.name)
            .field("tasks", &self.task_names())
            .finish()
    }
}
