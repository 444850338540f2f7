//! External provisioning seam used by the restore path
//!
//! A restore that targets another endpoint stands resources up through a
//! provisioning service: a declarative [`StackTemplate`] is submitted as
//! a stack and polled until it reaches a terminal status. The concrete
//! service lives behind [`ProvisioningClient`] / [`ClientFactory`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::OperationContext;
use crate::record::{Restore, RestoreAuth};
use crate::resource::ResourceGraph;

/// Errors from the provisioning service
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The endpoint or credentials were invalid or unreachable
    #[error("failed to create provisioning client for {endpoint}: {reason}")]
    ClientCreation {
        /// Endpoint that was dialed
        endpoint: String,
        /// Service-reported reason
        reason: String,
    },

    /// The service rejected the stack submission
    #[error("stack submission rejected: {0}")]
    Submission(String),

    /// A stack status query failed
    #[error("stack status query failed: {0}")]
    Query(String),
}

/// Status of a provisioning stack.
///
/// Classification is deliberately coarse: creation is either still in
/// progress, complete, or a failure. Any status outside the first two is
/// treated as failure without inspecting which failure it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackStatus {
    /// Creation still running
    CreateInProgress,
    /// Creation finished successfully
    CreateComplete,
    /// Anything else, carried verbatim from the service
    Other(String),
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackStatus::CreateInProgress => f.write_str("CREATE_IN_PROGRESS"),
            StackStatus::CreateComplete => f.write_str("CREATE_COMPLETE"),
            StackStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Connection settings for the provisioning endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Auth endpoint of the target
    pub auth_url: String,

    /// Login user, for password auth
    pub username: Option<String>,

    /// Login password, for password auth
    pub password: Option<String>,
}

impl ProvisioningConfig {
    /// Derive the config from a restore record.
    ///
    /// Returns `None` when the restore has no target, which disables the
    /// provisioning steps entirely. Password auth contributes
    /// credentials; other auth data is ignored here.
    pub fn from_restore(restore: &Restore) -> Option<Self> {
        let target = restore.restore_target.as_ref()?;
        let mut config = ProvisioningConfig {
            auth_url: target.clone(),
            username: None,
            password: None,
        };
        if let Some(RestoreAuth::Password { username, password }) = &restore.restore_auth {
            config.username = Some(username.clone());
            config.password = Some(password.clone());
        }
        Some(config)
    }
}

/// Declarative description of the resources a restore stands up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackTemplate {
    /// Template description
    pub description: String,

    /// Resource entries keyed by `"<type>-<id>"`
    pub resources: BTreeMap<String, serde_json::Value>,
}

impl StackTemplate {
    /// Create an empty template.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            resources: BTreeMap::new(),
        }
    }

    /// Build a template with one entry per graph node.
    pub fn from_graph(graph: &ResourceGraph) -> Self {
        let mut template = StackTemplate::new("custos restore stack");
        for resource in graph.resources() {
            template.resources.insert(
                format!("{}-{}", resource.resource_type, resource.id),
                serde_json::json!({
                    "type": resource.resource_type,
                    "id": resource.id,
                    "name": resource.name,
                    "properties": resource.extra,
                }),
            );
        }
        template
    }

    /// Add or replace a resource entry.
    pub fn add_resource(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.resources.insert(key.into(), value);
    }

    /// Number of resource entries.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when the template has no resource entries.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The wire form submitted to the service.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "description": self.description,
            "resources": self.resources,
        })
    }
}

/// Handle to a provisioning service.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    /// Submit a template for asynchronous provisioning; returns the stack id.
    async fn create_stack(
        &self,
        name: &str,
        template: &StackTemplate,
    ) -> Result<String, ProvisionError>;

    /// Query the current status of a stack.
    async fn get_stack(&self, stack_id: &str) -> Result<StackStatus, ProvisionError>;
}

/// Builds provisioning clients bound to an endpoint and credentials.
pub trait ClientFactory: Send + Sync {
    /// Create a client for the configured endpoint.
    fn create_client(
        &self,
        ctx: &OperationContext,
        config: &ProvisioningConfig,
    ) -> Result<Arc<dyn ProvisioningClient>, ProvisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Restore;
    use crate::resource::{build_graph, DependencyProvider, Resource, ResourceType};
    use std::collections::BTreeSet;

    #[test]
    fn test_config_absent_without_target() {
        let restore = Restore::new("chk-1");
        assert!(ProvisioningConfig::from_restore(&restore).is_none());
    }

    #[test]
    fn test_config_carries_password_auth() {
        let restore = Restore::new("chk-1")
            .with_target("http://target:5000/v3")
            .with_auth(RestoreAuth::Password {
                username: "admin".to_string(),
                password: "secret".to_string(),
            });

        let config = ProvisioningConfig::from_restore(&restore).unwrap();
        assert_eq!(config.auth_url, "http://target:5000/v3");
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_config_target_without_auth() {
        let restore = Restore::new("chk-1").with_target("http://target:5000/v3");
        let config = ProvisioningConfig::from_restore(&restore).unwrap();
        assert!(config.username.is_none());
        assert!(config.password.is_none());
    }

    struct Leaves;

    impl DependencyProvider for Leaves {
        fn related_resources(
            &self,
            _ctx: &OperationContext,
            _resource: &Resource,
        ) -> Result<BTreeSet<Resource>, crate::resource::GraphBuildError> {
            Ok(BTreeSet::new())
        }
    }

    #[test]
    fn test_template_from_graph_covers_every_node() {
        let ctx = OperationContext::new("proj");
        let requested: BTreeSet<Resource> = [
            Resource::new(ResourceType::Server, "s1"),
            Resource::new(ResourceType::Volume, "v1"),
        ]
        .into_iter()
        .collect();
        let graph = build_graph(&ctx, &Leaves, &requested).unwrap();

        let template = StackTemplate::from_graph(&graph);
        assert_eq!(template.len(), 2);
        assert!(template.resources.contains_key("server-s1"));
        assert!(template.resources.contains_key("volume-v1"));
        assert_eq!(template.to_json()["resources"]["server-s1"]["id"], "s1");
    }
}
