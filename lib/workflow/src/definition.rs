//! Workflow definition types.
//!
//! A workflow is a named, versioned automation: an ordered list of nodes,
//! an ordered list of edges, and run settings. Declaration order matters:
//! it breaks ties wherever the engine has to choose between nodes.

use crate::edge::Edge;
use crate::node::Node;
use autoflow_core::WorkflowId;
use serde::{Deserialize, Serialize};

/// What the scheduler does when a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop dispatching new nodes and fail the run.
    #[default]
    Halt,
    /// Skip what depends only on the failed node and keep going.
    Continue,
}

/// Per-workflow run settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// A persisted workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: WorkflowId,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

fn default_version() -> u32 {
    1
}

impl Workflow {
    /// Creates a workflow with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            id: WorkflowId::new(),
            name: name.into(),
            version: default_version(),
            description: None,
            nodes,
            edges,
            settings: WorkflowSettings::default(),
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.settings.failure_policy = policy;
        self
    }
}
