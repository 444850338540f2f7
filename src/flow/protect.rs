//! Protect flow: bracket tasks and flow assembly
//!
//! The per-resource sub-flow is wrapped by `InitiateProtectTask` and
//! `CompleteProtectTask`, which drive the checkpoint state machine and
//! commit on every transition. If anything downstream fails, the
//! initiate task's revert records the terminal `Error` status.

use async_trait::async_trait;
use tracing::debug;

use crate::context::OperationContext;
use crate::flow::store::keys;
use crate::flow::{
    build_resource_flow, CompiledFlow, FlowStore, FlowTask, OperationType, PluginRegistry,
    StoreValue, TaskError, TaskOutput,
};
use crate::record::{CheckpointHandle, CheckpointStatus, Plan};
use crate::resource::{build_graph, DependencyProvider};
use crate::Error;

/// Marks the checkpoint as protecting; on flow failure, as errored.
pub struct InitiateProtectTask;

#[async_trait]
impl FlowTask for InitiateProtectTask {
    fn name(&self) -> String {
        "initiate-protect".to_string()
    }

    fn requires(&self) -> Vec<String> {
        vec![keys::CHECKPOINT.to_string()]
    }

    async fn execute(&self, store: &FlowStore) -> Result<TaskOutput, TaskError> {
        let checkpoint = store.checkpoint(keys::CHECKPOINT)?;
        debug!(checkpoint_id = %checkpoint.id(), "initiate protect");
        checkpoint.set_status(CheckpointStatus::Protecting)?;
        checkpoint.commit().await?;
        Ok(Vec::new())
    }

    async fn revert(&self, store: &FlowStore) -> Result<(), TaskError> {
        let checkpoint = store.checkpoint(keys::CHECKPOINT)?;
        debug!(checkpoint_id = %checkpoint.id(), "protect failed");
        checkpoint.set_status(CheckpointStatus::Error)?;
        checkpoint.commit().await?;
        Ok(())
    }
}

/// Marks the checkpoint available. Runs only when the whole sub-flow
/// succeeded, and has nothing to compensate.
pub struct CompleteProtectTask;

#[async_trait]
impl FlowTask for CompleteProtectTask {
    fn name(&self) -> String {
        "complete-protect".to_string()
    }

    fn requires(&self) -> Vec<String> {
        vec![keys::CHECKPOINT.to_string()]
    }

    async fn execute(&self, store: &FlowStore) -> Result<TaskOutput, TaskError> {
        let checkpoint = store.checkpoint(keys::CHECKPOINT)?;
        debug!(checkpoint_id = %checkpoint.id(), "complete protect");
        checkpoint.set_status(CheckpointStatus::Available)?;
        checkpoint.commit().await?;
        Ok(Vec::new())
    }
}

/// Assemble the protect flow for a plan.
///
/// Builds the resource graph, attaches it to the checkpoint and commits
/// (so the graph is durable before any resource work starts), compiles
/// the per-resource sub-flow, and brackets it.
pub async fn get_flow(
    ctx: &OperationContext,
    plan: &Plan,
    provider: &dyn DependencyProvider,
    registry: &PluginRegistry,
    checkpoint: CheckpointHandle,
) -> Result<CompiledFlow, Error> {
    let graph = build_graph(ctx, provider, &plan.resources)?;
    checkpoint.set_resource_graph(graph.clone());
    checkpoint.commit().await?;

    let sub_flow =
        build_resource_flow(OperationType::Protect, ctx, &graph, registry, &plan.parameters)?;

    let mut flow = CompiledFlow::new(format!("protect-{}", plan.id));
    flow.push(Box::new(InitiateProtectTask));
    for task in sub_flow {
        flow.push(task);
    }
    flow.push(Box::new(CompleteProtectTask));
    flow.bind(keys::CHECKPOINT, StoreValue::Checkpoint(checkpoint));

    debug!(flow = %flow.name, tasks = flow.len(), "protect flow assembled");
    Ok(flow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{CheckpointStore, MemoryCheckpointStore};
    use crate::record::Checkpoint;
    use crate::resource::{GraphBuildError, Resource, ResourceType};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    struct Leaves;

    impl DependencyProvider for Leaves {
        fn related_resources(
            &self,
            _ctx: &OperationContext,
            _resource: &Resource,
        ) -> Result<BTreeSet<Resource>, GraphBuildError> {
            Ok(BTreeSet::new())
        }
    }

    struct NoopPlugin;

    impl crate::flow::ProtectionPlugin for NoopPlugin {
        fn protect_task(
            &self,
            resource: &Resource,
            _ctx: &OperationContext,
            _parameters: &serde_json::Value,
        ) -> Box<dyn FlowTask> {
            struct Noop(String);
            #[async_trait]
            impl FlowTask for Noop {
                fn name(&self) -> String {
                    self.0.clone()
                }
                async fn execute(&self, _store: &FlowStore) -> Result<TaskOutput, TaskError> {
                    Ok(Vec::new())
                }
            }
            Box::new(Noop(format!("protect:{resource}")))
        }

        fn restore_task(
            &self,
            resource: &Resource,
            ctx: &OperationContext,
            parameters: &serde_json::Value,
        ) -> Box<dyn FlowTask> {
            self.protect_task(resource, ctx, parameters)
        }
    }

    #[tokio::test]
    async fn test_flow_is_bracketed_and_graph_committed() {
        let ctx = OperationContext::new("proj");
        let resources: BTreeSet<Resource> =
            [Resource::new(ResourceType::Volume, "v1")].into_iter().collect();
        let plan = Plan::new("plan-1", "nightly", resources);
        let store = Arc::new(MemoryCheckpointStore::new());
        let handle = CheckpointHandle::new(Checkpoint::new(plan.id.clone()), store.clone());
        let checkpoint_id = handle.id();

        let mut registry = PluginRegistry::new();
        registry.register(ResourceType::Volume, Arc::new(NoopPlugin));

        let flow = get_flow(&ctx, &plan, &Leaves, &registry, handle).await.unwrap();

        assert_eq!(
            flow.task_names(),
            vec!["initiate-protect", "protect:volume#v1", "complete-protect"]
        );
        // the graph was committed before any task ran
        let persisted = store.load(&checkpoint_id).await.unwrap();
        assert_eq!(persisted.status, crate::record::CheckpointStatus::Pending);
        assert!(persisted.resource_graph.is_some());
    }
}
