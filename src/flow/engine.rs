//! Sequential task execution with compensation on failure
//!
//! Tasks run in compiled order. When one fails, every task that already
//! succeeded is reverted in strict reverse completion order; revert
//! failures are logged and carried alongside the original error, which
//! is always the one surfaced to the caller.

use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::flow::{CompiledFlow, FlowStore, FlowTask, TaskError};

/// A revert that itself failed. Non-fatal: recorded, never surfaced as
/// the flow's error.
#[derive(Debug)]
pub struct RevertFailure {
    /// Task whose revert failed
    pub task: String,
    /// The revert error
    pub error: TaskError,
}

/// Errors from running a flow
#[derive(Error, Debug)]
pub enum EngineError {
    /// A task's execute failed; compensation has already run
    #[error("task {task} failed: {source}")]
    TaskFailed {
        /// Name of the failing task
        task: String,
        /// The original execute error
        #[source]
        source: TaskError,
        /// Reverts that failed during compensation
        revert_failures: Vec<RevertFailure>,
    },

    /// A task's declared input was not bound when it was scheduled
    #[error("task {task} requires input {input:?} which is not bound")]
    MissingInput {
        /// Task that was about to run
        task: String,
        /// The unbound input name
        input: String,
    },

    /// A task succeeded but did not publish a declared output
    #[error("task {task} declared output {output:?} but did not publish it")]
    MissingOutput {
        /// Task that just ran
        task: String,
        /// The missing output name
        output: String,
    },
}

/// Runs compiled flows.
#[derive(Debug, Default)]
pub struct FlowEngine;

impl FlowEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self
    }

    /// Execute a flow to completion or compensated failure.
    ///
    /// On success the final store is returned so callers can read
    /// published outputs. On failure the returned error carries the
    /// failing task, the original error, and any revert failures.
    #[instrument(skip_all, fields(flow = %flow.name))]
    pub async fn run(&self, flow: CompiledFlow) -> Result<FlowStore, EngineError> {
        let CompiledFlow { name, tasks, seed } = flow;
        let mut store = seed;
        let mut completed: Vec<usize> = Vec::with_capacity(tasks.len());

        debug!(tasks = tasks.len(), "starting flow");
        for (index, task) in tasks.iter().enumerate() {
            let task_name = task.name();

            if let Some(input) = task.requires().into_iter().find(|i| !store.contains(i)) {
                error!(task = %task_name, %input, "required input missing, compensating");
                self.compensate(&tasks, &completed, &store).await;
                return Err(EngineError::MissingInput {
                    task: task_name,
                    input,
                });
            }

            debug!(task = %task_name, "executing");
            match task.execute(&store).await {
                Ok(outputs) => {
                    for (key, value) in outputs {
                        store.bind(key, value);
                    }
                    completed.push(index);
                    if let Some(output) = task.provides().into_iter().find(|o| !store.contains(o)) {
                        error!(task = %task_name, %output, "declared output missing, compensating");
                        self.compensate(&tasks, &completed, &store).await;
                        return Err(EngineError::MissingOutput {
                            task: task_name,
                            output,
                        });
                    }
                    debug!(task = %task_name, "completed");
                }
                Err(err) => {
                    error!(task = %task_name, error = %err, "task failed, compensating");
                    let revert_failures = self.compensate(&tasks, &completed, &store).await;
                    return Err(EngineError::TaskFailed {
                        task: task_name,
                        source: err,
                        revert_failures,
                    });
                }
            }
        }

        debug!(flow = %name, "flow completed");
        Ok(store)
    }

    /// Revert completed tasks in reverse completion order.
    async fn compensate(
        &self,
        tasks: &[Box<dyn FlowTask>],
        completed: &[usize],
        store: &FlowStore,
    ) -> Vec<RevertFailure> {
        let mut failures = Vec::new();
        for &index in completed.iter().rev() {
            let task = &tasks[index];
            let task_name = task.name();
            match task.revert(store).await {
                Ok(()) => debug!(task = %task_name, "reverted"),
                Err(err) => {
                    warn!(task = %task_name, error = %err, "revert failed");
                    failures.push(RevertFailure {
                        task: task_name,
                        error: err,
                    });
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{StoreValue, TaskOutput};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Task that records execute/revert calls into a shared journal.
    struct JournalTask {
        name: String,
        journal: Arc<Mutex<Vec<String>>>,
        fail_execute: bool,
        fail_revert: bool,
        outputs: TaskOutput,
        declared_outputs: Vec<String>,
        inputs: Vec<String>,
    }

    impl JournalTask {
        fn ok(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Box<dyn FlowTask> {
            Box::new(Self {
                name: name.to_string(),
                journal: journal.clone(),
                fail_execute: false,
                fail_revert: false,
                outputs: Vec::new(),
                declared_outputs: Vec::new(),
                inputs: Vec::new(),
            })
        }

        fn failing(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Box<dyn FlowTask> {
            Box::new(Self {
                name: name.to_string(),
                journal: journal.clone(),
                fail_execute: true,
                fail_revert: false,
                outputs: Vec::new(),
                declared_outputs: Vec::new(),
                inputs: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl FlowTask for JournalTask {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn requires(&self) -> Vec<String> {
            self.inputs.clone()
        }

        fn provides(&self) -> Vec<String> {
            self.declared_outputs.clone()
        }

        async fn execute(&self, _store: &FlowStore) -> Result<TaskOutput, TaskError> {
            self.journal.lock().push(format!("execute:{}", self.name));
            if self.fail_execute {
                return Err(TaskError::other("execute boom"));
            }
            Ok(self.outputs.clone())
        }

        async fn revert(&self, _store: &FlowStore) -> Result<(), TaskError> {
            self.journal.lock().push(format!("revert:{}", self.name));
            if self.fail_revert {
                return Err(TaskError::other("revert boom"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tasks_run_in_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut flow = CompiledFlow::new("test");
        flow.push(JournalTask::ok("a", &journal));
        flow.push(JournalTask::ok("b", &journal));
        flow.push(JournalTask::ok("c", &journal));

        FlowEngine::new().run(flow).await.unwrap();

        assert_eq!(*journal.lock(), vec!["execute:a", "execute:b", "execute:c"]);
    }

    #[tokio::test]
    async fn test_failure_reverts_in_reverse_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut flow = CompiledFlow::new("test");
        flow.push(JournalTask::ok("a", &journal));
        flow.push(JournalTask::ok("b", &journal));
        flow.push(JournalTask::failing("c", &journal));
        flow.push(JournalTask::ok("d", &journal));

        let err = FlowEngine::new().run(flow).await.unwrap_err();

        assert!(matches!(&err, EngineError::TaskFailed { task, .. } if task == "c"));
        assert_eq!(
            *journal.lock(),
            vec!["execute:a", "execute:b", "execute:c", "revert:b", "revert:a"]
        );
    }

    #[tokio::test]
    async fn test_revert_failure_does_not_mask_original_error() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut flow = CompiledFlow::new("test");
        flow.push(Box::new(JournalTask {
            name: "a".to_string(),
            journal: journal.clone(),
            fail_execute: false,
            fail_revert: true,
            outputs: Vec::new(),
            declared_outputs: Vec::new(),
            inputs: Vec::new(),
        }));
        flow.push(JournalTask::failing("b", &journal));

        let err = FlowEngine::new().run(flow).await.unwrap_err();

        match err {
            EngineError::TaskFailed { task, revert_failures, .. } => {
                assert_eq!(task, "b");
                assert_eq!(revert_failures.len(), 1);
                assert_eq!(revert_failures[0].task, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_outputs_flow_to_later_tasks() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut flow = CompiledFlow::new("test");
        flow.push(Box::new(JournalTask {
            name: "producer".to_string(),
            journal: journal.clone(),
            fail_execute: false,
            fail_revert: false,
            outputs: vec![("token".to_string(), StoreValue::Json(serde_json::json!("t-1")))],
            declared_outputs: vec!["token".to_string()],
            inputs: Vec::new(),
        }));
        flow.push(Box::new(JournalTask {
            name: "consumer".to_string(),
            journal: journal.clone(),
            fail_execute: false,
            fail_revert: false,
            outputs: Vec::new(),
            declared_outputs: Vec::new(),
            inputs: vec!["token".to_string()],
        }));

        let store = FlowEngine::new().run(flow).await.unwrap();
        assert_eq!(store.string("token").unwrap(), "t-1");
    }

    #[tokio::test]
    async fn test_missing_input_compensates_completed_tasks() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut flow = CompiledFlow::new("test");
        flow.push(JournalTask::ok("a", &journal));
        flow.push(Box::new(JournalTask {
            name: "needs-token".to_string(),
            journal: journal.clone(),
            fail_execute: false,
            fail_revert: false,
            outputs: Vec::new(),
            declared_outputs: Vec::new(),
            inputs: vec!["token".to_string()],
        }));

        let err = FlowEngine::new().run(flow).await.unwrap_err();

        assert!(matches!(&err, EngineError::MissingInput { input, .. } if input == "token"));
        assert_eq!(*journal.lock(), vec!["execute:a", "revert:a"]);
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails_and_reverts() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut flow = CompiledFlow::new("test");
        flow.push(Box::new(JournalTask {
            name: "liar".to_string(),
            journal: journal.clone(),
            fail_execute: false,
            fail_revert: false,
            outputs: Vec::new(),
            declared_outputs: vec!["token".to_string()],
            inputs: Vec::new(),
        }));

        let err = FlowEngine::new().run(flow).await.unwrap_err();

        assert!(matches!(&err, EngineError::MissingOutput { output, .. } if output == "token"));
        // the lying task did execute, so it gets reverted too
        assert_eq!(*journal.lock(), vec!["execute:liar", "revert:liar"]);
    }
}
