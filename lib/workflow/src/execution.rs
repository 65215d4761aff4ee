//! Run and node execution records.
//!
//! Both records follow a one-way lifecycle: once a terminal status is
//! reached, further transitions are ignored.

use crate::error::{ErrorCause, NodeExecutionError};
use crate::ledger::LogEntry;
use crate::node::NodeId;
use autoflow_ai::TokenUsage;
use autoflow_core::{NodeExecutionId, WorkflowId, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Reads a JSON value field whose presence matters: a missing field is
/// `None`, an explicit `null` is `Some(Null)`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    JsonValue::deserialize(deserializer).map(Some)
}

/// The overall state of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Error,
    /// The run exceeded its wall-clock budget.
    Timeout,
    Cancelled,
}

impl RunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Error | Self::Timeout | Self::Cancelled
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The execution state of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting for predecessors.
    Pending,
    Running,
    Success,
    Error,
    /// Not executed: branch not taken, or the run halted first.
    Skipped,
}

impl NodeStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Skipped)
    }
}

/// Per-node measurements. Kind-specific fields stay empty for other kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub duration_ms: u64,
    /// AI nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    /// AI nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// AI nodes: dispatcher attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Code nodes: artifact references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    /// Code nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Execution record for a single node within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub id: NodeExecutionId,
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Resolved input snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present_value")]
    pub input: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present_value")]
    pub output: Option<JsonValue>,
    pub error: Option<NodeExecutionError>,
    pub skip_reason: Option<String>,
    pub metrics: NodeMetrics,
}

impl NodeExecutionRecord {
    /// Creates a new node execution in pending state.
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self {
            id: NodeExecutionId::new(),
            node_id,
            status: NodeStatus::Pending,
            started_at: None,
            ended_at: None,
            input: None,
            output: None,
            error: None,
            skip_reason: None,
            metrics: NodeMetrics::default(),
        }
    }

    /// Starts execution with the resolved input.
    pub fn start(&mut self, input: JsonValue) -> bool {
        if self.status != NodeStatus::Pending {
            return false;
        }
        self.status = NodeStatus::Running;
        self.started_at = Some(Utc::now());
        self.input = Some(input);
        true
    }

    /// Marks the node as succeeded.
    pub fn succeed(&mut self, output: JsonValue, metrics: NodeMetrics) -> bool {
        if self.status != NodeStatus::Running {
            return false;
        }
        self.status = NodeStatus::Success;
        self.ended_at = Some(Utc::now());
        self.output = Some(output);
        self.metrics = metrics;
        true
    }

    /// Marks the node as failed.
    pub fn fail(&mut self, error: NodeExecutionError, duration_ms: u64) -> bool {
        if self.status != NodeStatus::Running {
            return false;
        }
        self.status = NodeStatus::Error;
        self.ended_at = Some(Utc::now());
        self.error = Some(error);
        self.metrics.duration_ms = duration_ms;
        true
    }

    /// Marks a node that never started as skipped.
    pub fn skip(&mut self, reason: impl Into<String>) -> bool {
        if self.status != NodeStatus::Pending {
            return false;
        }
        self.status = NodeStatus::Skipped;
        self.ended_at = Some(Utc::now());
        self.skip_reason = Some(reason.into());
        true
    }
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    /// The node that failed, for node failures.
    pub node_id: Option<NodeId>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorCause>,
}

impl RunError {
    /// A run-level error not tied to a node.
    #[must_use]
    pub fn run(message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            message: message.into(),
            cause: None,
        }
    }
}

impl From<&NodeExecutionError> for RunError {
    fn from(error: &NodeExecutionError) -> Self {
        Self {
            node_id: Some(error.node_id.clone()),
            message: error.message.clone(),
            cause: Some(error.cause.clone()),
        }
    }
}

/// Run-level measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub duration_ms: u64,
    /// Total tokens over every AI node.
    pub total_tokens: u64,
    pub node_metrics: BTreeMap<NodeId, NodeMetrics>,
}

/// The persisted record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunExecutionRecord {
    pub run_id: WorkflowRunId,
    pub workflow_id: WorkflowId,
    pub workflow_version: u32,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub input: JsonValue,
    /// Set exactly when the run succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present_value")]
    pub output: Option<JsonValue>,
    /// Set exactly when the run ended in error, timeout or cancellation.
    pub error: Option<RunError>,
    pub logs: Vec<LogEntry>,
    pub metrics: RunMetrics,
    /// One record per node, in declaration order.
    pub nodes: Vec<NodeExecutionRecord>,
}

impl RunExecutionRecord {
    /// Creates a pending run record.
    #[must_use]
    pub fn new(
        run_id: WorkflowRunId,
        workflow_id: WorkflowId,
        workflow_version: u32,
        input: JsonValue,
    ) -> Self {
        Self {
            run_id,
            workflow_id,
            workflow_version,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            input,
            output: None,
            error: None,
            logs: Vec::new(),
            metrics: RunMetrics::default(),
            nodes: Vec::new(),
        }
    }

    /// Moves a pending run to running.
    pub fn start(&mut self) -> bool {
        if self.status != RunStatus::Pending {
            return false;
        }
        self.status = RunStatus::Running;
        self.started_at = Utc::now();
        true
    }

    /// Marks the run as succeeded with its output.
    pub fn succeed(&mut self, output: JsonValue) -> bool {
        if !self.finish(RunStatus::Success) {
            return false;
        }
        self.output = Some(output);
        true
    }

    /// Ends the run with an error, timeout or cancellation.
    pub fn fail(&mut self, status: RunStatus, error: RunError) -> bool {
        if status == RunStatus::Success || !self.finish(status) {
            return false;
        }
        self.error = Some(error);
        true
    }

    fn finish(&mut self, status: RunStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        let ended_at = Utc::now();
        self.status = status;
        self.ended_at = Some(ended_at);
        self.metrics.duration_ms = (ended_at - self.started_at)
            .num_milliseconds()
            .try_into()
            .unwrap_or(0);
        true
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the record for a node.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeExecutionRecord> {
        self.nodes.iter().find(|n| n.node_id.as_str() == node_id)
    }
}
