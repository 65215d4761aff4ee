//! Workflow engine for the autoflow platform.
//!
//! This crate provides:
//!
//! - **Model**: workflows as nodes joined by edges, with typed per-kind
//!   configuration
//! - **Validation**: structural checks run before any execution
//! - **Graph**: an immutable petgraph snapshot of a validated workflow
//! - **Expressions**: the small language used by guards and logic nodes
//! - **Execution**: the scheduler, per-kind node executors, run records and
//!   the run ledger
//! - **Engine**: run lifecycle on top of pluggable workflow and run stores

pub mod action;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod execution;
pub mod expression;
pub mod graph;
pub mod ledger;
pub mod logic;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use action::{ActionError, ActionHandler, ActionInvocation, ActionRegistry};
pub use definition::{FailurePolicy, Workflow, WorkflowSettings};
pub use edge::Edge;
pub use engine::{RunHandle, WorkflowEngine};
pub use error::{EngineError, ErrorCause, GraphError, NodeExecutionError, StoreError};
pub use execution::{
    NodeExecutionRecord, NodeMetrics, NodeStatus, RunError, RunExecutionRecord, RunMetrics,
    RunStatus,
};
pub use expression::{Expression, ExpressionError};
pub use graph::WorkflowGraph;
pub use ledger::{LogEntry, LogLevel};
pub use node::{Node, NodeConfig, NodeId, NodeKind};
pub use registry::NodeExecutorRegistry;
pub use scheduler::{EngineConfig, ExecutionScheduler};
pub use store::{InMemoryRunStore, InMemoryWorkflowSource, RunStore, WorkflowSource};
pub use validation::{ValidationError, ValidationResult, validate};
