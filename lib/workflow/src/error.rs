//! Workflow errors.
//!
//! Each layer has its own enum and wraps the one below with rootcause
//! `.context()`:
//! - `GraphError`: building a graph snapshot
//! - `NodeExecutionError`: a single node failed; recorded in the run, never
//!   propagated as a report
//! - `StoreError`: run and workflow persistence
//! - `EngineError`: engine operations (wraps lower errors via context)

use crate::node::NodeId;
use crate::validation::ValidationError;
use autoflow_ai::AiProvider;
use autoflow_core::{WorkflowId, WorkflowRunId};
use autoflow_sandbox::SandboxError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors from building a [`crate::graph::WorkflowGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An edge names a node that is not in the graph.
    NodeNotFound { node_id: NodeId },
    /// Two nodes share an id.
    DuplicateNode { node_id: NodeId },
    /// The graph does not have exactly one trigger.
    TriggerCount,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node: {node_id}"),
            Self::TriggerCount => write!(f, "graph must have exactly one trigger"),
        }
    }
}

impl std::error::Error for GraphError {}

/// What made a node fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorCause {
    /// The code sandbox reported an error.
    Sandbox { error: SandboxError },
    /// The AI dispatcher gave up.
    Ai { provider: AiProvider, attempts: u32 },
    /// An action handler failed.
    Action { key: String },
    /// No handler is registered for the action.
    UnknownAction { key: String },
    /// A logic expression did not parse or produced an unusable value.
    Expression { expression: String },
    /// The node's input did not have the required shape.
    InvalidInput,
    /// The node's task panicked.
    Panicked,
}

/// A node failed. Recorded on the node and, for the first failure, on the
/// run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionError {
    pub node_id: NodeId,
    pub message: String,
    pub cause: ErrorCause,
}

impl NodeExecutionError {
    #[must_use]
    pub fn new(node_id: NodeId, message: impl Into<String>, cause: ErrorCause) -> Self {
        Self {
            node_id,
            message: message.into(),
            cause,
        }
    }

    /// Wraps a sandbox error.
    #[must_use]
    pub fn sandbox(node_id: NodeId, error: SandboxError) -> Self {
        Self::new(node_id, error.to_string(), ErrorCause::Sandbox { error })
    }

    /// Returns true if the node was killed for exceeding its time budget.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(&self.cause, ErrorCause::Sandbox { error } if error.is_timeout())
    }
}

impl fmt::Display for NodeExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} failed: {}", self.node_id, self.message)
    }
}

impl std::error::Error for NodeExecutionError {}

/// Errors from run and workflow stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No workflow with this id.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// No run with this id.
    RunNotFound { run_id: WorkflowRunId },
    /// A run with this id already exists.
    RunExists { run_id: WorkflowRunId },
    /// The run already has its terminal record.
    AlreadySealed { run_id: WorkflowRunId },
    /// A seal was attempted with a non-terminal record.
    NotTerminal { run_id: WorkflowRunId },
    /// The storage backend failed.
    Backend { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::RunExists { run_id } => write!(f, "run already exists: {run_id}"),
            Self::AlreadySealed { run_id } => write!(f, "run {run_id} is already sealed"),
            Self::NotTerminal { run_id } => {
                write!(f, "run {run_id} cannot be sealed before it finishes")
            }
            Self::Backend { details } => write!(f, "storage error: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// High-level engine errors.
///
/// Use these to add run or workflow context when wrapping lower-level
/// errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Workflow not found.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// Run not found.
    RunNotFound { run_id: WorkflowRunId },
    /// The workflow failed validation; no run was created.
    GraphValidation {
        workflow_id: WorkflowId,
        errors: Vec<ValidationError>,
    },
    /// Error building the graph snapshot (use as context wrapper).
    Graph { workflow_id: WorkflowId },
    /// Error in a store operation (use as context wrapper).
    Store,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::GraphValidation {
                workflow_id,
                errors,
            } => {
                write!(f, "workflow {workflow_id} is invalid")?;
                for error in errors {
                    write!(f, "; {error}")?;
                }
                Ok(())
            }
            Self::Graph { workflow_id } => {
                write!(f, "failed to build graph for workflow {workflow_id}")
            }
            Self::Store => write!(f, "run store operation failed"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_timeout_is_visible_on_node_error() {
        let err = NodeExecutionError::sandbox(
            NodeId::from("script"),
            SandboxError::Timeout { after_ms: 60_000 },
        );
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("node script failed"));
    }

    #[test]
    fn node_error_serializes_cause_with_tag() {
        let err = NodeExecutionError::new(
            NodeId::from("summarize"),
            "rate limited",
            ErrorCause::Ai {
                provider: AiProvider::OpenAi,
                attempts: 3,
            },
        );
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["cause"]["type"], "ai");
        assert_eq!(json["cause"]["attempts"], 3);
        assert!(!err.is_timeout());
    }

    #[test]
    fn validation_error_lists_every_violation() {
        let err = EngineError::GraphValidation {
            workflow_id: WorkflowId::new(),
            errors: vec![
                ValidationError::MissingTrigger,
                ValidationError::OrphanedNode {
                    node_id: NodeId::from("a"),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("no trigger node"));
        assert!(text.contains("node a has no incoming edges"));
    }
}
