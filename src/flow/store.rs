//! Named binding table for passing values between tasks
//!
//! Tasks communicate exclusively through this store: a task's outputs
//! are published under names downstream tasks declared as inputs. The
//! value space is a closed enum so a binding mismatch is a typed error,
//! not a downcast panic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::provision::{ProvisioningClient, StackTemplate};
use crate::record::{CheckpointHandle, RestoreHandle};

/// Well-known binding names used by the built-in flows.
pub mod keys {
    /// The checkpoint handle for a protect flow
    pub const CHECKPOINT: &str = "checkpoint";
    /// The restore handle for a restore flow
    pub const RESTORE: &str = "restore";
    /// Provisioning client created for the restore target
    pub const CLIENT: &str = "provisioning_client";
    /// Stack template describing the resources to stand up
    pub const TEMPLATE: &str = "stack_template";
    /// Id of the submitted provisioning stack
    pub const STACK_ID: &str = "stack_id";
}

/// Errors from store lookups
#[derive(Error, Debug)]
pub enum StoreError {
    /// No value bound under the requested name
    #[error("no binding named {0:?} in flow store")]
    MissingBinding(String),

    /// A value exists but holds a different kind
    #[error("binding {name:?} holds a {found}, expected {expected}")]
    WrongKind {
        /// Binding name
        name: String,
        /// Kind actually bound
        found: &'static str,
        /// Kind the caller asked for
        expected: &'static str,
    },
}

/// A value that can flow between tasks.
#[derive(Clone)]
pub enum StoreValue {
    /// Plain data
    Json(serde_json::Value),
    /// Checkpoint record handle
    Checkpoint(CheckpointHandle),
    /// Restore record handle
    Restore(RestoreHandle),
    /// Provisioning service client
    Client(Arc<dyn ProvisioningClient>),
    /// Stack template
    Template(StackTemplate),
}

impl StoreValue {
    /// Kind name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreValue::Json(_) => "json",
            StoreValue::Checkpoint(_) => "checkpoint",
            StoreValue::Restore(_) => "restore",
            StoreValue::Client(_) => "client",
            StoreValue::Template(_) => "template",
        }
    }
}

impl fmt::Debug for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Json(v) => f.debug_tuple("Json").field(v).finish(),
            StoreValue::Checkpoint(h) => f.debug_tuple("Checkpoint").field(&h.id()).finish(),
            StoreValue::Restore(h) => f.debug_tuple("Restore").field(&h.id()).finish(),
            StoreValue::Client(_) => f.write_str("Client(..)"),
            StoreValue::Template(t) => f.debug_tuple("Template").field(&t.len()).finish(),
        }
    }
}

/// Bindings a task publishes: `(name, value)` pairs.
pub type TaskOutput = Vec<(String, StoreValue)>;

/// The in-memory binding table for one flow run.
#[derive(Debug, Default, Clone)]
pub struct FlowStore {
    values: HashMap<String, StoreValue>,
}

impl FlowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value, replacing any previous binding of the same name.
    pub fn bind(&mut self, name: impl Into<String>, value: StoreValue) {
        self.values.insert(name.into(), value);
    }

    /// Whether a binding exists.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Raw lookup.
    pub fn get(&self, name: &str) -> Result<&StoreValue, StoreError> {
        self.values
            .get(name)
            .ok_or_else(|| StoreError::MissingBinding(name.to_string()))
    }

    /// Fetch a plain-data binding.
    pub fn json(&self, name: &str) -> Result<&serde_json::Value, StoreError> {
        match self.get(name)? {
            StoreValue::Json(v) => Ok(v),
            other => Err(self.wrong_kind(name, other, "json")),
        }
    }

    /// Fetch a plain-data binding expected to be a string.
    pub fn string(&self, name: &str) -> Result<String, StoreError> {
        let value = self.json(name)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| StoreError::WrongKind {
                name: name.to_string(),
                found: "json",
                expected: "json string",
            })
    }

    /// Fetch a checkpoint handle.
    pub fn checkpoint(&self, name: &str) -> Result<CheckpointHandle, StoreError> {
        match self.get(name)? {
            StoreValue::Checkpoint(h) => Ok(h.clone()),
            other => Err(self.wrong_kind(name, other, "checkpoint")),
        }
    }

    /// Fetch a restore handle.
    pub fn restore(&self, name: &str) -> Result<RestoreHandle, StoreError> {
        match self.get(name)? {
            StoreValue::Restore(h) => Ok(h.clone()),
            other => Err(self.wrong_kind(name, other, "restore")),
        }
    }

    /// Fetch a provisioning client.
    pub fn client(&self, name: &str) -> Result<Arc<dyn ProvisioningClient>, StoreError> {
        match self.get(name)? {
            StoreValue::Client(c) => Ok(c.clone()),
            other => Err(self.wrong_kind(name, other, "client")),
        }
    }

    /// Fetch a stack template.
    pub fn template(&self, name: &str) -> Result<StackTemplate, StoreError> {
        match self.get(name)? {
            StoreValue::Template(t) => Ok(t.clone()),
            other => Err(self.wrong_kind(name, other, "template")),
        }
    }

    fn wrong_kind(&self, name: &str, found: &StoreValue, expected: &'static str) -> StoreError {
        StoreError::WrongKind {
            name: name.to_string(),
            found: found.kind(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binding() {
        let store = FlowStore::new();
        let err = store.json("nope").unwrap_err();
        assert!(matches!(err, StoreError::MissingBinding(name) if name == "nope"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut store = FlowStore::new();
        store.bind("stack_id", StoreValue::Json(serde_json::json!("stack-1")));
        assert_eq!(store.string("stack_id").unwrap(), "stack-1");
    }

    #[test]
    fn test_wrong_kind_is_typed() {
        let mut store = FlowStore::new();
        store.bind("stack_id", StoreValue::Json(serde_json::json!(42)));

        let err = store.string("stack_id").unwrap_err();
        assert!(matches!(err, StoreError::WrongKind { expected: "json string", .. }));

        let err = store.template("stack_id").unwrap_err();
        assert!(
            matches!(err, StoreError::WrongKind { found: "json", expected: "template", .. })
        );
    }

    #[test]
    fn test_rebinding_replaces() {
        let mut store = FlowStore::new();
        store.bind("k", StoreValue::Json(serde_json::json!(1)));
        store.bind("k", StoreValue::Json(serde_json::json!(2)));
        assert_eq!(store.json("k").unwrap(), &serde_json::json!(2));
    }
}
