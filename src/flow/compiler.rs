//! Compile a resource graph into a dependency-ordered task sequence
//!
//! Per-resource tasks come from plugins registered by resource type.
//! The compiler resolves the registry once per node, injects the
//! parameter subset for that resource, and emits tasks in topological
//! order. It executes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::context::OperationContext;
use crate::flow::{FlowTask, OperationType};
use crate::resource::{GraphBuildError, Resource, ResourceGraph, ResourceType};

/// Errors raised during flow compilation
#[derive(Error, Debug)]
pub enum CompileError {
    /// The registry has no plugin for an encountered resource type
    #[error("no plugin registered for resource type {0}")]
    UnsupportedResourceType(ResourceType),

    /// The checkpoint being restored carries no resource graph
    #[error("checkpoint {0} has no resource graph")]
    MissingResourceGraph(String),

    /// The graph could not be ordered
    #[error(transparent)]
    Graph(#[from] GraphBuildError),
}

/// Factory for per-resource tasks, polymorphic over the operation kind.
///
/// One plugin handles one resource type and knows how to build both the
/// protect and the restore task for a graph node.
pub trait ProtectionPlugin: Send + Sync {
    /// Build the protect task for a node.
    fn protect_task(
        &self,
        resource: &Resource,
        ctx: &OperationContext,
        parameters: &serde_json::Value,
    ) -> Box<dyn FlowTask>;

    /// Build the restore task for a node.
    fn restore_task(
        &self,
        resource: &Resource,
        ctx: &OperationContext,
        parameters: &serde_json::Value,
    ) -> Box<dyn FlowTask>;
}

/// Resource type -> plugin table, resolved once at startup.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<ResourceType, Arc<dyn ProtectionPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the plugin for a resource type, replacing any previous one.
    pub fn register(&mut self, resource_type: ResourceType, plugin: Arc<dyn ProtectionPlugin>) {
        self.plugins.insert(resource_type, plugin);
    }

    /// Look up the plugin for a resource type.
    pub fn get(&self, resource_type: ResourceType) -> Option<&Arc<dyn ProtectionPlugin>> {
        self.plugins.get(&resource_type)
    }

    /// Types with a registered plugin.
    pub fn registered_types(&self) -> Vec<ResourceType> {
        let mut types: Vec<_> = self.plugins.keys().copied().collect();
        types.sort();
        types
    }
}

/// Resolve the parameter subset for one resource.
///
/// `"<type>#<id>"` wins over the `"<type>"` default; with neither, an
/// empty object.
pub fn resource_parameters(
    parameters: &HashMap<String, serde_json::Value>,
    resource: &Resource,
) -> serde_json::Value {
    parameters
        .get(&resource.parameter_key())
        .or_else(|| parameters.get(resource.resource_type.as_str()))
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}))
}

/// Compile the per-resource sub-flow for an operation.
///
/// Tasks come out in a topological order of the graph: the task for a
/// node is always sequenced after the tasks of everything it depends
/// on. Compilation is deterministic for a given graph and registry.
pub fn build_resource_flow(
    operation: OperationType,
    ctx: &OperationContext,
    graph: &ResourceGraph,
    registry: &PluginRegistry,
    parameters: &HashMap<String, serde_json::Value>,
) -> Result<Vec<Box<dyn FlowTask>>, CompileError> {
    let order = graph.topo_order()?;
    let mut tasks: Vec<Box<dyn FlowTask>> = Vec::with_capacity(order.len());

    for resource in order {
        let plugin = registry
            .get(resource.resource_type)
            .ok_or(CompileError::UnsupportedResourceType(resource.resource_type))?;
        let params = resource_parameters(parameters, resource);
        let task = match operation {
            OperationType::Protect => plugin.protect_task(resource, ctx, &params),
            OperationType::Restore => plugin.restore_task(resource, ctx, &params),
        };
        debug!(%operation, resource = %resource, task = %task.name(), "compiled resource task");
        tasks.push(task);
    }

    Ok(tasks)
}
