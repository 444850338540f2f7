//! Persisted operation records and their status state machines
//!
//! A [`Checkpoint`] tracks one protection run, a [`Restore`] one
//! restoration run. Both carry a monotonic status enum: a record can
//! re-commit its current status (idempotent) or move forward, never
//! back. Only the flow bracket tasks transition these records.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::resource::{Resource, ResourceGraph};

pub mod handle;

pub use handle::{CheckpointHandle, RestoreHandle};

/// Error for rejected status transitions
#[derive(Error, Debug)]
pub enum StatusError {
    /// The requested transition would move the machine backwards
    #[error("illegal {kind} status transition: {from} -> {to}")]
    IllegalTransition {
        /// Record kind, `"checkpoint"` or `"restore"`
        kind: &'static str,
        /// Current status
        from: String,
        /// Rejected target status
        to: String,
    },
}

/// A protect request: the resources to protect plus per-resource parameters.
///
/// Parameters are keyed `"<type>#<id>"` for a specific resource with a
/// `"<type>"` fallback for type-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier
    pub id: String,

    /// Human-readable plan name
    pub name: String,

    /// Resources to protect; dependencies are discovered at flow build time
    pub resources: BTreeSet<Resource>,

    /// Per-resource task parameters
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl Plan {
    /// Create a plan over a set of resources.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        resources: BTreeSet<Resource>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            resources,
            parameters: HashMap::new(),
        }
    }

    /// Set the parameter table.
    pub fn with_parameters(mut self, parameters: HashMap<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Lifecycle status of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    /// Created, protection not yet started
    Pending,
    /// Protection flow is running
    Protecting,
    /// Protection completed successfully (terminal)
    Available,
    /// Protection failed (terminal)
    Error,
}

impl CheckpointStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckpointStatus::Available | CheckpointStatus::Error)
    }

    fn can_transition(self, to: CheckpointStatus) -> bool {
        use CheckpointStatus::*;
        self == to
            || matches!(
                (self, to),
                (Pending, Protecting) | (Protecting, Available) | (Protecting, Error)
            )
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::Protecting => "protecting",
            CheckpointStatus::Available => "available",
            CheckpointStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Persisted record of one protection run.
///
/// The resource graph is attached before the flow starts so a later
/// restore can replay the same dependency ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint identifier
    pub id: String,

    /// Plan this checkpoint was taken for
    pub plan_id: String,

    /// Current lifecycle status
    pub status: CheckpointStatus,

    /// Dependency graph protected by this checkpoint
    pub resource_graph: Option<ResourceGraph>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a pending checkpoint for a plan.
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plan_id: plan_id.into(),
            status: CheckpointStatus::Pending,
            resource_graph: None,
            created_at: Utc::now(),
        }
    }

    /// Move to a new status, rejecting backwards transitions.
    pub fn transition(&mut self, to: CheckpointStatus) -> Result<(), StatusError> {
        if !self.status.can_transition(to) {
            return Err(StatusError::IllegalTransition {
                kind: "checkpoint",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Lifecycle status of a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    /// Created, restoration not yet started
    Pending,
    /// Restore flow is running
    InProgress,
    /// Restoration completed successfully (terminal)
    Success,
    /// Restoration failed (terminal)
    Failure,
}

impl RestoreStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RestoreStatus::Success | RestoreStatus::Failure)
    }

    fn can_transition(self, to: RestoreStatus) -> bool {
        use RestoreStatus::*;
        self == to
            || matches!(
                (self, to),
                (Pending, InProgress) | (InProgress, Success) | (InProgress, Failure)
            )
    }
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestoreStatus::Pending => "pending",
            RestoreStatus::InProgress => "in_progress",
            RestoreStatus::Success => "success",
            RestoreStatus::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Credentials for reaching the restore target's provisioning endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RestoreAuth {
    /// Username/password authentication
    Password {
        /// Login user
        username: String,
        /// Login password
        password: String,
    },
}

/// Persisted record of one restoration run against a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restore {
    /// Restore identifier
    pub id: String,

    /// Checkpoint being restored
    pub checkpoint_id: String,

    /// Current lifecycle status
    pub status: RestoreStatus,

    /// Provisioning endpoint of the target; `None` restores in place
    /// without external provisioning
    pub restore_target: Option<String>,

    /// Credentials for the target endpoint
    pub restore_auth: Option<RestoreAuth>,

    /// Per-resource task parameters, same keying as [`Plan::parameters`]
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,

    /// Start timestamp
    pub started_at: DateTime<Utc>,
}

impl Restore {
    /// Create a pending restore for a checkpoint.
    pub fn new(checkpoint_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            checkpoint_id: checkpoint_id.into(),
            status: RestoreStatus::Pending,
            restore_target: None,
            restore_auth: None,
            parameters: HashMap::new(),
            started_at: Utc::now(),
        }
    }

    /// Set the provisioning target endpoint.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.restore_target = Some(target.into());
        self
    }

    /// Set the target credentials.
    pub fn with_auth(mut self, auth: RestoreAuth) -> Self {
        self.restore_auth = Some(auth);
        self
    }

    /// Set the parameter table.
    pub fn with_parameters(mut self, parameters: HashMap<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Move to a new status, rejecting backwards transitions.
    pub fn transition(&mut self, to: RestoreStatus) -> Result<(), StatusError> {
        if !self.status.can_transition(to) {
            return Err(StatusError::IllegalTransition {
                kind: "restore",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_normal_path() {
        let mut c = Checkpoint::new("plan-1");
        assert_eq!(c.status, CheckpointStatus::Pending);
        c.transition(CheckpointStatus::Protecting).unwrap();
        c.transition(CheckpointStatus::Available).unwrap();
        assert!(c.status.is_terminal());
    }

    #[test]
    fn test_checkpoint_failure_path() {
        let mut c = Checkpoint::new("plan-1");
        c.transition(CheckpointStatus::Protecting).unwrap();
        c.transition(CheckpointStatus::Error).unwrap();
        assert!(c.status.is_terminal());
    }

    #[test]
    fn test_checkpoint_rejects_backwards_transition() {
        let mut c = Checkpoint::new("plan-1");
        c.transition(CheckpointStatus::Protecting).unwrap();
        c.transition(CheckpointStatus::Available).unwrap();

        let err = c.transition(CheckpointStatus::Protecting).unwrap_err();
        assert!(matches!(err, StatusError::IllegalTransition { kind: "checkpoint", .. }));
        assert_eq!(c.status, CheckpointStatus::Available);
    }

    #[test]
    fn test_self_transition_is_idempotent() {
        let mut c = Checkpoint::new("plan-1");
        c.transition(CheckpointStatus::Protecting).unwrap();
        c.transition(CheckpointStatus::Protecting).unwrap();
        assert_eq!(c.status, CheckpointStatus::Protecting);
    }

    #[test]
    fn test_restore_transitions_mirror_checkpoint() {
        let mut r = Restore::new("chk-1");
        r.transition(RestoreStatus::InProgress).unwrap();
        r.transition(RestoreStatus::Failure).unwrap();
        assert!(r.transition(RestoreStatus::Success).is_err());
    }

    #[test]
    fn test_restore_skipping_in_progress_is_rejected() {
        let mut r = Restore::new("chk-1");
        assert!(r.transition(RestoreStatus::Success).is_err());
        assert_eq!(r.status, RestoreStatus::Pending);
    }

    #[test]
    fn test_restore_auth_serde_tagging() {
        let auth = RestoreAuth::Password {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["type"], "password");
        assert_eq!(json["username"], "admin");
    }
}
