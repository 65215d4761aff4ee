//! Workflow engine.
//!
//! Accepts run requests, validates the workflow, snapshots it into an
//! immutable graph and hands the run to the scheduler on a background task.
//! The run record is created in the store before `start_run` returns and
//! sealed there once the scheduler is done.

use crate::definition::Workflow;
use crate::error::EngineError;
use crate::execution::{RunExecutionRecord, RunStatus};
use crate::graph::WorkflowGraph;
use crate::scheduler::ExecutionScheduler;
use crate::store::{RunStore, WorkflowSource};
use crate::validation::{ValidationResult, validate};
use autoflow_core::{WorkflowId, WorkflowRunId};
use rootcause::prelude::*;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

/// Returned when a run is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunHandle {
    pub run_id: WorkflowRunId,
    pub status: RunStatus,
}

const SEAL_ATTEMPTS: u32 = 3;
const SEAL_BACKOFF: Duration = Duration::from_millis(50);

/// A run the engine is still executing.
struct ActiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Entry point for starting and observing workflow runs.
#[derive(Clone)]
pub struct WorkflowEngine {
    workflows: Arc<dyn WorkflowSource>,
    runs: Arc<dyn RunStore>,
    scheduler: Arc<ExecutionScheduler>,
    active: Arc<Mutex<HashMap<WorkflowRunId, ActiveRun>>>,
    /// Terminal records the store refused to seal.
    unsealed: Arc<Mutex<HashMap<WorkflowRunId, RunExecutionRecord>>>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(
        workflows: Arc<dyn WorkflowSource>,
        runs: Arc<dyn RunStore>,
        scheduler: ExecutionScheduler,
    ) -> Self {
        Self {
            workflows,
            runs,
            scheduler: Arc::new(scheduler),
            active: Arc::default(),
            unsealed: Arc::default(),
        }
    }

    /// Checks a stored workflow's structure without running it.
    ///
    /// # Errors
    ///
    /// Fails when the workflow does not exist.
    pub async fn validate_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<ValidationResult, Report<EngineError>> {
        let workflow = self
            .workflows
            .load_workflow(workflow_id)
            .await
            .context(EngineError::WorkflowNotFound { workflow_id })?;
        Ok(validate(&workflow.nodes, &workflow.edges))
    }

    /// Starts a run of the stored workflow and returns immediately.
    ///
    /// # Errors
    ///
    /// Fails without creating a run when the workflow does not exist or is
    /// invalid, or when the run record cannot be stored.
    #[tracing::instrument(skip(self, input), fields(run_id))]
    pub async fn start_run(
        &self,
        workflow_id: WorkflowId,
        input: JsonValue,
    ) -> Result<RunHandle, Report<EngineError>> {
        let workflow = self
            .workflows
            .load_workflow(workflow_id)
            .await
            .context(EngineError::WorkflowNotFound { workflow_id })?;
        self.start_workflow(workflow, input).await
    }

    /// Starts a run of an already loaded workflow.
    ///
    /// # Errors
    ///
    /// Same as [`WorkflowEngine::start_run`], minus the lookup.
    pub async fn start_workflow(
        &self,
        workflow: Workflow,
        input: JsonValue,
    ) -> Result<RunHandle, Report<EngineError>> {
        let workflow_id = workflow.id;
        let validation = validate(&workflow.nodes, &workflow.edges);
        if !validation.is_valid {
            return Err(EngineError::GraphValidation {
                workflow_id,
                errors: validation.errors,
            }
            .into());
        }
        let graph = WorkflowGraph::build(&workflow.nodes, &workflow.edges)
            .context(EngineError::Graph { workflow_id })?;

        let mut record =
            RunExecutionRecord::new(WorkflowRunId::new(), workflow_id, workflow.version, input);
        record.start();
        let run_id = record.run_id;
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        self.runs
            .create_run(&record)
            .await
            .context(EngineError::Store)?;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.active.lock().await.insert(
            run_id,
            ActiveRun {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let scheduler = Arc::clone(&self.scheduler);
        let runs = Arc::clone(&self.runs);
        let active = Arc::clone(&self.active);
        let unsealed = Arc::clone(&self.unsealed);
        let policy = workflow.settings.failure_policy;
        tokio::spawn(async move {
            let finished = scheduler
                .execute(Arc::new(graph), policy, record, cancel)
                .await;
            tracing::info!(%run_id, status = %finished.status, "run finished");
            if !seal_with_retry(runs.as_ref(), &finished).await {
                unsealed.lock().await.insert(run_id, finished);
            }
            active.lock().await.remove(&run_id);
            let _ = done_tx.send(true);
        });

        tracing::info!(%run_id, %workflow_id, "run started");
        Ok(RunHandle {
            run_id,
            status: RunStatus::Running,
        })
    }

    /// Returns the stored record of a run.
    ///
    /// A finished run whose record could not be sealed is served from
    /// memory, so callers always see its terminal status.
    ///
    /// # Errors
    ///
    /// Fails when the run is unknown.
    pub async fn get_run(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<RunExecutionRecord, Report<EngineError>> {
        if let Some(record) = self.unsealed.lock().await.get(&run_id) {
            return Ok(record.clone());
        }
        self.runs
            .get_run(run_id)
            .await
            .context(EngineError::RunNotFound { run_id })
    }

    /// Requests cancellation of a running run.
    ///
    /// Returns false if the run is not executing on this engine.
    pub async fn cancel_run(&self, run_id: WorkflowRunId) -> bool {
        match self.active.lock().await.get(&run_id) {
            Some(run) => {
                tracing::info!(%run_id, "cancellation requested");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Waits until a run is terminal and returns its sealed record.
    ///
    /// # Errors
    ///
    /// Fails when the run is unknown.
    pub async fn wait_for_run(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<RunExecutionRecord, Report<EngineError>> {
        let done = self
            .active
            .lock()
            .await
            .get(&run_id)
            .map(|run| run.done.clone());
        if let Some(mut done) = done {
            // An error means the run task is gone; the store has the answer.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.get_run(run_id).await
    }
}

/// Seals `record`, retrying with linear backoff. Returns false when every
/// attempt failed.
async fn seal_with_retry(runs: &dyn RunStore, record: &RunExecutionRecord) -> bool {
    let run_id = record.run_id;
    for attempt in 1..=SEAL_ATTEMPTS {
        match runs.seal_run(record).await {
            Ok(()) => return true,
            Err(e) if attempt < SEAL_ATTEMPTS => {
                tracing::warn!(%run_id, attempt, error = %e, "sealing run record failed; retrying");
                tokio::time::sleep(SEAL_BACKOFF * attempt).await;
            }
            Err(e) => {
                tracing::error!(
                    %run_id,
                    attempts = SEAL_ATTEMPTS,
                    error = %e,
                    "run record could not be sealed; keeping the terminal record in memory"
                );
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionRegistry;
    use crate::edge::Edge;
    use crate::execution::NodeStatus;
    use crate::node::{Node, TriggerType};
    use crate::registry::NodeExecutorRegistry;
    use crate::scheduler::EngineConfig;
    use crate::store::{InMemoryRunStore, InMemoryWorkflowSource};
    use crate::error::StoreError;
    use crate::validation::ValidationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::test_support::{ScriptedAction, ScriptedAi, ScriptedCode};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        engine: WorkflowEngine,
        workflows: Arc<InMemoryWorkflowSource>,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryRunStore::new()))
    }

    fn fixture_with(runs: Arc<dyn RunStore>) -> Fixture {
        let actions = ActionRegistry::new().with_handler("test.run", Arc::new(ScriptedAction));
        let registry = NodeExecutorRegistry::new(
            actions,
            Arc::new(ScriptedCode::ok("")),
            Arc::new(ScriptedAi::ok("")),
        );
        let workflows = Arc::new(InMemoryWorkflowSource::new());
        let engine = WorkflowEngine::new(
            Arc::clone(&workflows) as Arc<dyn WorkflowSource>,
            runs,
            ExecutionScheduler::new(Arc::new(registry), EngineConfig::default()),
        );
        Fixture { engine, workflows }
    }

    fn workflow(delay_ms: u64) -> Workflow {
        Workflow::new(
            "engine",
            vec![
                Node::trigger("start", TriggerType::Manual),
                Node::action(
                    "work",
                    "test",
                    "run",
                    json!({ "output": { "done": true }, "delay_ms": delay_ms }),
                ),
            ],
            vec![Edge::new("start", "work")],
        )
    }

    #[tokio::test]
    async fn start_run_returns_running_then_seals() {
        let Fixture { engine, workflows } = fixture();
        let definition = workflow(10);
        let workflow_id = definition.id;
        workflows.insert(definition).await;

        let handle = engine.start_run(workflow_id, json!({})).await.expect("start");
        assert_eq!(handle.status, RunStatus::Running);

        let record = engine.wait_for_run(handle.run_id).await.expect("wait");
        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.output, Some(json!({ "done": true })));
        assert!(record.nodes.iter().all(|n| n.status == NodeStatus::Success));

        // Waiting again reads the sealed record.
        let again = engine.wait_for_run(handle.run_id).await.expect("wait");
        assert_eq!(again, record);
    }

    #[tokio::test]
    async fn invalid_workflow_is_rejected_before_a_run_exists() {
        let Fixture { engine, workflows } = fixture();
        let definition = Workflow::new(
            "no trigger",
            vec![Node::action("work", "test", "run", json!({}))],
            vec![],
        );
        let workflow_id = definition.id;
        workflows.insert(definition).await;

        let err = engine.start_run(workflow_id, json!({})).await.expect_err("invalid");
        let message = err.to_string();
        assert!(message.contains("is invalid"), "{message}");
        assert!(message.contains("trigger"), "{message}");
    }

    #[tokio::test]
    async fn unknown_workflow_and_run() {
        let Fixture { engine, .. } = fixture();
        let err = engine
            .start_run(WorkflowId::new(), json!({}))
            .await
            .expect_err("missing workflow");
        assert!(err.to_string().contains("workflow not found"));

        let err = engine.get_run(WorkflowRunId::new()).await.expect_err("missing run");
        assert!(err.to_string().contains("run not found"));
        assert!(!engine.cancel_run(WorkflowRunId::new()).await);
    }

    #[tokio::test]
    async fn cancel_run_ends_in_cancelled() {
        let Fixture { engine, workflows } = fixture();
        let definition = workflow(10_000);
        let workflow_id = definition.id;
        workflows.insert(definition).await;

        let handle = engine.start_run(workflow_id, json!({})).await.expect("start");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.cancel_run(handle.run_id).await);

        let record = engine.wait_for_run(handle.run_id).await.expect("wait");
        assert_eq!(record.status, RunStatus::Cancelled);
        assert_eq!(
            record.error.as_ref().map(|e| e.message.as_str()),
            Some("run cancelled")
        );
        assert!(!engine.cancel_run(handle.run_id).await);
    }

    #[tokio::test]
    async fn validate_workflow_reports_errors() {
        let Fixture { engine, workflows } = fixture();
        let valid = workflow(0);
        let valid_id = valid.id;
        workflows.insert(valid).await;
        let result = engine.validate_workflow(valid_id).await.expect("validate");
        assert!(result.is_valid);

        let mut broken = workflow(0);
        broken.edges.push(Edge::new("work", "ghost"));
        let broken_id = broken.id;
        workflows.insert(broken).await;
        let result = engine.validate_workflow(broken_id).await.expect("validate");
        assert!(!result.is_valid);
        assert!(
            result
                .errors
                .iter()
                .any(|e| matches!(e, ValidationError::DanglingEdgeTarget { .. }))
        );
    }

    /// Creates and reads runs normally but never accepts a seal.
    #[derive(Default)]
    struct UnsealableStore {
        inner: InMemoryRunStore,
        seal_attempts: AtomicU32,
    }

    #[async_trait]
    impl RunStore for UnsealableStore {
        async fn create_run(
            &self,
            record: &RunExecutionRecord,
        ) -> autoflow_core::Result<(), StoreError> {
            self.inner.create_run(record).await
        }

        async fn seal_run(
            &self,
            _record: &RunExecutionRecord,
        ) -> autoflow_core::Result<(), StoreError> {
            self.seal_attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Backend {
                details: "connection reset".to_string(),
            }
            .into())
        }

        async fn get_run(
            &self,
            run_id: WorkflowRunId,
        ) -> autoflow_core::Result<RunExecutionRecord, StoreError> {
            self.inner.get_run(run_id).await
        }
    }

    #[tokio::test]
    async fn failed_seal_still_reports_the_terminal_record() {
        let store = Arc::new(UnsealableStore::default());
        let Fixture { engine, workflows } = fixture_with(Arc::clone(&store) as Arc<dyn RunStore>);
        let definition = workflow(0);
        let workflow_id = definition.id;
        workflows.insert(definition).await;

        let handle = engine.start_run(workflow_id, json!({})).await.expect("start");
        let record = engine.wait_for_run(handle.run_id).await.expect("wait");

        assert_eq!(record.status, RunStatus::Success);
        assert!(record.ended_at.is_some());
        assert_eq!(store.seal_attempts.load(Ordering::SeqCst), SEAL_ATTEMPTS);

        let again = engine.get_run(handle.run_id).await.expect("get");
        assert_eq!(again, record);
    }
}
