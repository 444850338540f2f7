//! Caller context threaded through graph building, compilation, and tasks

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and request metadata for one operation invocation.
///
/// The engine never interprets `extra`; it exists so collaborators
/// (dependency discovery, plugins, client factories) can carry whatever
/// auth or scoping data they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Unique id for this invocation, used in logs
    pub request_id: String,

    /// Project/tenant the operation runs on behalf of
    pub project_id: String,

    /// Opaque collaborator-specific data
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl OperationContext {
    /// Create a context for a project with a fresh request id.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            extra: serde_json::Value::Null,
        }
    }

    /// Attach collaborator-specific data.
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }
}
