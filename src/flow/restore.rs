//! Restore flow: bracket tasks, provisioning steps, and flow assembly
//!
//! Mirrors the protect flow with an extra external side: when the
//! restore targets another endpoint, the flow creates a provisioning
//! client and template up front, submits the template as a stack after
//! the per-resource sub-flow, and blocks on a completion monitor until
//! the stack reaches a terminal status. Without a target all three
//! provisioning steps are omitted.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::OperationContext;
use crate::flow::store::keys;
use crate::flow::{
    build_resource_flow, CompileError, CompiledFlow, FlowStore, FlowTask, OperationType,
    PluginRegistry, StoreValue, TaskError, TaskOutput,
};
use crate::monitor::{CompletionMonitor, MonitorError, PollStatus};
use crate::provision::{ClientFactory, ProvisioningConfig, StackStatus, StackTemplate};
use crate::record::{Checkpoint, RestoreHandle, RestoreStatus};
use crate::Error;

/// Marks the restore as in progress; on flow failure, as failed.
pub struct InitiateRestoreTask;

#[async_trait]
impl FlowTask for InitiateRestoreTask {
    fn name(&self) -> String {
        "initiate-restore".to_string()
    }

    fn requires(&self) -> Vec<String> {
        vec![keys::RESTORE.to_string()]
    }

    async fn execute(&self, store: &FlowStore) -> Result<TaskOutput, TaskError> {
        let restore = store.restore(keys::RESTORE)?;
        debug!(restore_id = %restore.id(), "initiate restore");
        restore.set_status(RestoreStatus::InProgress)?;
        restore.save().await?;
        Ok(Vec::new())
    }

    async fn revert(&self, store: &FlowStore) -> Result<(), TaskError> {
        let restore = store.restore(keys::RESTORE)?;
        debug!(restore_id = %restore.id(), "restore failed");
        restore.set_status(RestoreStatus::Failure)?;
        restore.save().await?;
        Ok(())
    }
}

/// Marks the restore successful. No revert: nothing to compensate once
/// every restoration step has completed.
pub struct CompleteRestoreTask;

#[async_trait]
impl FlowTask for CompleteRestoreTask {
    fn name(&self) -> String {
        "complete-restore".to_string()
    }

    fn requires(&self) -> Vec<String> {
        vec![keys::RESTORE.to_string()]
    }

    async fn execute(&self, store: &FlowStore) -> Result<TaskOutput, TaskError> {
        let restore = store.restore(keys::RESTORE)?;
        debug!(restore_id = %restore.id(), "complete restore");
        restore.set_status(RestoreStatus::Success)?;
        restore.save().await?;
        Ok(Vec::new())
    }
}

/// Creates the provisioning client for the restore target and the
/// declarative template describing the resources to stand up.
pub struct CreateProvisioningClientTask {
    factory: Arc<dyn ClientFactory>,
    config: ProvisioningConfig,
    ctx: OperationContext,
    template: StackTemplate,
}

impl CreateProvisioningClientTask {
    /// Build the task from the target config and the checkpoint's graph.
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        config: ProvisioningConfig,
        ctx: OperationContext,
        template: StackTemplate,
    ) -> Self {
        Self {
            factory,
            config,
            ctx,
            template,
        }
    }
}

#[async_trait]
impl FlowTask for CreateProvisioningClientTask {
    fn name(&self) -> String {
        "create-provisioning-client".to_string()
    }

    fn provides(&self) -> Vec<String> {
        vec![keys::CLIENT.to_string(), keys::TEMPLATE.to_string()]
    }

    async fn execute(&self, _store: &FlowStore) -> Result<TaskOutput, TaskError> {
        info!(target = %self.config.auth_url, "creating provisioning client");
        let client = self.factory.create_client(&self.ctx, &self.config)?;
        Ok(vec![
            (keys::CLIENT.to_string(), StoreValue::Client(client)),
            (keys::TEMPLATE.to_string(), StoreValue::Template(self.template.clone())),
        ])
    }
}

/// Submits the template as a provisioning stack.
pub struct CreateStackTask;

#[async_trait]
impl FlowTask for CreateStackTask {
    fn name(&self) -> String {
        "create-stack".to_string()
    }

    fn requires(&self) -> Vec<String> {
        vec![keys::CLIENT.to_string(), keys::TEMPLATE.to_string()]
    }

    fn provides(&self) -> Vec<String> {
        vec![keys::STACK_ID.to_string()]
    }

    async fn execute(&self, store: &FlowStore) -> Result<TaskOutput, TaskError> {
        let client = store.client(keys::CLIENT)?;
        let template = store.template(keys::TEMPLATE)?;
        let stack_name = format!("restore-{}", Uuid::new_v4());
        info!(stack = %stack_name, resources = template.len(), "creating stack");
        let stack_id = client.create_stack(&stack_name, &template).await?;
        debug!(stack_id = %stack_id, "stack submitted");
        Ok(vec![(
            keys::STACK_ID.to_string(),
            StoreValue::Json(serde_json::json!(stack_id)),
        )])
    }
}

/// Blocks the flow until the submitted stack reaches a terminal status.
pub struct SyncStackStatusTask {
    monitor: CompletionMonitor,
}

impl SyncStackStatusTask {
    /// Build the task around a configured monitor.
    pub fn new(monitor: CompletionMonitor) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl FlowTask for SyncStackStatusTask {
    fn name(&self) -> String {
        "sync-stack-status".to_string()
    }

    fn requires(&self) -> Vec<String> {
        vec![keys::CLIENT.to_string(), keys::STACK_ID.to_string()]
    }

    async fn execute(&self, store: &FlowStore) -> Result<TaskOutput, TaskError> {
        let client = store.client(keys::CLIENT)?;
        let stack_id = store.string(keys::STACK_ID)?;
        info!(stack_id = %stack_id, "syncing stack status");

        let poll = move || {
            let client = client.clone();
            let stack_id = stack_id.clone();
            async move {
                let status = client
                    .get_stack(&stack_id)
                    .await
                    .map_err(|e| MonitorError::Poll(Box::new(e)))?;
                Ok(match status {
                    StackStatus::CreateInProgress => PollStatus::Pending,
                    StackStatus::CreateComplete => PollStatus::Succeeded,
                    other => PollStatus::Failed(format!("stack entered status {other}")),
                })
            }
            .boxed()
        };

        self.monitor.wait_for_terminal(poll).await?;
        Ok(Vec::new())
    }
}

/// Assemble the restore flow for a checkpoint.
///
/// The per-resource sub-flow replays the dependency order persisted in
/// the checkpoint. Provisioning steps are present only when the restore
/// record names a target.
pub fn get_flow(
    ctx: &OperationContext,
    checkpoint: &Checkpoint,
    registry: &PluginRegistry,
    restore: RestoreHandle,
    factory: Arc<dyn ClientFactory>,
    monitor: CompletionMonitor,
) -> Result<CompiledFlow, Error> {
    let graph = checkpoint
        .resource_graph
        .clone()
        .ok_or_else(|| CompileError::MissingResourceGraph(checkpoint.id.clone()))?;

    let (config, parameters) = restore.with(|r| {
        (ProvisioningConfig::from_restore(r), r.parameters.clone())
    });

    let sub_flow =
        build_resource_flow(OperationType::Restore, ctx, &graph, registry, &parameters)?;

    let mut flow = CompiledFlow::new(format!("restore-{}", checkpoint.id));
    flow.push(Box::new(InitiateRestoreTask));
    if let Some(config) = &config {
        let template = StackTemplate::from_graph(&graph);
        flow.push(Box::new(CreateProvisioningClientTask::new(
            factory,
            config.clone(),
            ctx.clone(),
            template,
        )));
    }
    for task in sub_flow {
        flow.push(task);
    }
    if config.is_some() {
        flow.push(Box::new(CreateStackTask));
        flow.push(Box::new(SyncStackStatusTask::new(monitor)));
    }
    flow.push(Box::new(CompleteRestoreTask));
    flow.bind(keys::RESTORE, StoreValue::Restore(restore));

    debug!(flow = %flow.name, tasks = flow.len(), "restore flow assembled");
    Ok(flow)
}
