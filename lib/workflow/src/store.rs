//! Persistence seams for workflow definitions and run records.

use crate::definition::Workflow;
use crate::error::StoreError;
use crate::execution::RunExecutionRecord;
use async_trait::async_trait;
use autoflow_core::{Result, WorkflowId, WorkflowRunId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Loads workflow definitions by id.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// Loads the current version of a workflow.
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, StoreError>;
}

/// Durable home of run records.
///
/// A record is created when its run starts and written once more when the
/// run reaches a terminal status. After that it is immutable.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Stores a new run record.
    async fn create_run(&self, record: &RunExecutionRecord) -> Result<(), StoreError>;

    /// Replaces a run's record with its terminal version.
    async fn seal_run(&self, record: &RunExecutionRecord) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: WorkflowRunId) -> Result<RunExecutionRecord, StoreError>;
}

/// Workflows held in memory.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowSource {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a workflow.
    pub async fn insert(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }
}

#[async_trait]
impl WorkflowSource for InMemoryWorkflowSource {
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, StoreError> {
        let workflow = self
            .workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound { workflow_id })?;
        Ok(workflow)
    }
}

/// Run records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<WorkflowRunId, RunExecutionRecord>>,
}

impl InMemoryRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create_run(&self, record: &RunExecutionRecord) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&record.run_id) {
            return Err(StoreError::RunExists {
                run_id: record.run_id,
            }
            .into());
        }
        runs.insert(record.run_id, record.clone());
        Ok(())
    }

    async fn seal_run(&self, record: &RunExecutionRecord) -> Result<(), StoreError> {
        let run_id = record.run_id;
        if !record.is_terminal() {
            return Err(StoreError::NotTerminal { run_id }.into());
        }
        let mut runs = self.runs.write().await;
        let stored = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound { run_id })?;
        if stored.is_terminal() {
            return Err(StoreError::AlreadySealed { run_id }.into());
        }
        *stored = record.clone();
        Ok(())
    }

    async fn get_run(&self, run_id: WorkflowRunId) -> Result<RunExecutionRecord, StoreError> {
        let record = self
            .runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound { run_id })?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{RunError, RunStatus};
    use serde_json::json;

    fn running() -> RunExecutionRecord {
        let mut record =
            RunExecutionRecord::new(WorkflowRunId::new(), WorkflowId::new(), 1, json!({}));
        record.start();
        record
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryRunStore::new();
        let record = running();
        store.create_run(&record).await.expect("create");

        let loaded = store.get_run(record.run_id).await.expect("get");
        assert_eq!(loaded, record);

        let err = store.create_run(&record).await.expect_err("duplicate");
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn seal_requires_terminal_and_happens_once() {
        let store = InMemoryRunStore::new();
        let mut record = running();
        store.create_run(&record).await.expect("create");

        let err = store.seal_run(&record).await.expect_err("still running");
        assert!(err.to_string().contains("before it finishes"));

        record.fail(RunStatus::Cancelled, RunError::run("run cancelled"));
        store.seal_run(&record).await.expect("seal");
        assert_eq!(
            store.get_run(record.run_id).await.expect("get").status,
            RunStatus::Cancelled
        );

        let err = store.seal_run(&record).await.expect_err("sealed twice");
        assert!(err.to_string().contains("already sealed"));
    }

    #[tokio::test]
    async fn missing_run_and_workflow() {
        let store = InMemoryRunStore::new();
        let err = store.get_run(WorkflowRunId::new()).await.expect_err("missing");
        assert!(err.to_string().contains("not found"));

        let source = InMemoryWorkflowSource::new();
        let err = source
            .load_workflow(WorkflowId::new())
            .await
            .expect_err("missing");
        assert!(err.to_string().contains("not found"));
    }
}
