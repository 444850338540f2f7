//! # Custos
//!
//! A workflow engine for orchestrating multi-resource protect (backup)
//! and restore operations across a graph of interdependent resources.
//!
//! ## Overview
//!
//! A caller submits a plan (resources to protect) or a checkpoint to
//! restore. Custos builds a dependency graph over the resources,
//! compiles it into an ordered task flow using pluggable per-type
//! handlers, and executes the flow with forward actions and, on
//! failure, compensating reverts. Operation status is tracked through
//! monotonic state machines persisted on every transition, and restores
//! that trigger external provisioning block on a bounded poller until
//! the work reaches a terminal state.
//!
//! ## Quick Start
//!
//! Waiting on an external operation with the completion monitor:
//!
//! ```rust
//! use std::time::Duration;
//! use custos::monitor::{CompletionMonitor, PollStatus};
//! use futures::FutureExt;
//!
//! # async fn example() -> Result<(), custos::monitor::MonitorError> {
//! let monitor = CompletionMonitor::new(Duration::from_millis(10));
//! let mut remaining = 2;
//! monitor
//!     .wait_for_terminal(move || {
//!         remaining -= 1;
//!         let status = if remaining == 0 {
//!             PollStatus::Succeeded
//!         } else {
//!             PollStatus::Pending
//!         };
//!         async move { Ok(status) }.boxed()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`resource`]: resource model and dependency graph builder
//! - [`flow`]: task protocol, compiler, execution engine, and the
//!   protect/restore flows
//! - [`record`]: checkpoint/restore records and their state machines
//! - [`persistence`]: record store seams plus in-memory implementations
//! - [`provision`]: external provisioning seam for targeted restores
//! - [`monitor`]: bounded cancellable polling with an injected clock
//! - [`service`]: end-to-end protect/restore entry points

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for custos operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for custos operations
#[derive(Error, Debug)]
pub enum Error {
    /// Resource graph construction error
    #[error("graph build error: {0}")]
    Graph(#[from] resource::GraphBuildError),

    /// Flow compilation error
    #[error("flow compile error: {0}")]
    Compile(#[from] flow::CompileError),

    /// Flow execution error
    #[error("flow execution error: {0}")]
    Engine(#[from] flow::EngineError),

    /// Task-level error
    #[error("task error: {0}")]
    Task(#[from] flow::TaskError),

    /// Binding store error
    #[error("store error: {0}")]
    Store(#[from] flow::StoreError),

    /// Rejected status transition
    #[error("status error: {0}")]
    Status(#[from] record::StatusError),

    /// Persistence layer error
    #[error("persistence error: {0}")]
    Persistence(#[from] persistence::PersistenceError),

    /// Provisioning service error
    #[error("provisioning error: {0}")]
    Provision(#[from] provision::ProvisionError),

    /// Completion monitor error
    #[error("monitor error: {0}")]
    Monitor(#[from] monitor::MonitorError),
}

/// Caller context threaded through an operation
pub mod context;

/// Resource model and dependency graph
pub mod resource;

/// Tasks, flows, compiler, and execution engine
pub mod flow;

/// Operation records and state machines
pub mod record;

/// Record persistence seams
pub mod persistence;

/// External provisioning seam
pub mod provision;

/// Asynchronous completion monitor
pub mod monitor;

/// End-to-end protect/restore service
pub mod service;
