//! End-to-end entry points over the flow machinery
//!
//! [`ProtectionService`] bundles the collaborators one deployment wires
//! up once (dependency discovery, plugins, stores, client factory) and
//! exposes protect/restore calls that create the record, assemble the
//! flow, and drive it to a terminal status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::context::OperationContext;
use crate::flow::{protect, restore, FlowEngine, PluginRegistry};
use crate::monitor::{Clock, CompletionMonitor, TokioClock};
use crate::persistence::{CheckpointStore, RestoreStore};
use crate::provision::ClientFactory;
use crate::record::{
    Checkpoint, CheckpointHandle, Plan, Restore, RestoreAuth, RestoreHandle,
};
use crate::resource::DependencyProvider;
use crate::Error;

/// Parameters for one restore invocation.
#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    /// Checkpoint to restore from
    pub checkpoint_id: String,

    /// Provisioning endpoint of the target, if restoring elsewhere
    pub restore_target: Option<String>,

    /// Credentials for the target
    pub restore_auth: Option<RestoreAuth>,

    /// Per-resource task parameters
    pub parameters: HashMap<String, serde_json::Value>,
}

/// Orchestrates protect and restore operations.
pub struct ProtectionService {
    provider: Arc<dyn DependencyProvider>,
    registry: Arc<PluginRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    restores: Arc<dyn RestoreStore>,
    client_factory: Arc<dyn ClientFactory>,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl ProtectionService {
    /// Wire up a service from its collaborators.
    pub fn new(
        provider: Arc<dyn DependencyProvider>,
        registry: Arc<PluginRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
        restores: Arc<dyn RestoreStore>,
        client_factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            provider,
            registry,
            checkpoints,
            restores,
            client_factory,
            poll_interval: Duration::from_secs(20),
            clock: Arc::new(TokioClock),
        }
    }

    /// Change the stack-status poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Replace the monitor clock (tests inject a manual clock here).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Protect every resource in a plan into a new checkpoint.
    ///
    /// The checkpoint record is persisted before the flow starts. On
    /// flow failure the terminal `Error` status is already committed
    /// when this returns; load the record through the checkpoint store
    /// to observe it.
    pub async fn protect(
        &self,
        ctx: &OperationContext,
        plan: &Plan,
    ) -> Result<CheckpointHandle, Error> {
        let handle = CheckpointHandle::new(Checkpoint::new(plan.id.clone()), self.checkpoints.clone());
        handle.commit().await?;
        info!(plan_id = %plan.id, checkpoint_id = %handle.id(), "protect requested");

        let flow = protect::get_flow(
            ctx,
            plan,
            self.provider.as_ref(),
            &self.registry,
            handle.clone(),
        )
        .await?;
        FlowEngine::new().run(flow).await?;
        Ok(handle)
    }

    /// Restore a checkpoint.
    ///
    /// Mirrors [`ProtectionService::protect`]: the restore record is
    /// persisted before the flow starts and carries a terminal status
    /// by the time this returns.
    pub async fn restore(
        &self,
        ctx: &OperationContext,
        request: RestoreRequest,
    ) -> Result<RestoreHandle, Error> {
        let checkpoint = self.checkpoints.load(&request.checkpoint_id).await?;

        let mut record = Restore::new(checkpoint.id.clone()).with_parameters(request.parameters);
        if let Some(target) = request.restore_target {
            record = record.with_target(target);
        }
        if let Some(auth) = request.restore_auth {
            record = record.with_auth(auth);
        }
        let handle = RestoreHandle::new(record, self.restores.clone());
        handle.save().await?;
        info!(checkpoint_id = %checkpoint.id, restore_id = %handle.id(), "restore requested");

        let monitor = CompletionMonitor::new(self.poll_interval).with_clock(self.clock.clone());
        let flow = restore::get_flow(
            ctx,
            &checkpoint,
            &self.registry,
            handle.clone(),
            self.client_factory.clone(),
            monitor,
        )?;
        FlowEngine::new().run(flow).await?;
        Ok(handle)
    }
}
