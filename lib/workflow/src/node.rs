//! Node definitions.
//!
//! A node pairs a workflow-unique id with a kind-specific configuration
//! (trigger, action, logic, ai or code). Logic nodes route through named
//! output ports that edges select with `source_port`.

use autoflow_ai::{AiProvider, AiTaskType};
use autoflow_sandbox::Language;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Borrow;
use std::fmt;

/// Identifier of a node within one workflow, as authored in the editor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Port every non-branching node emits on.
pub const DEFAULT_OUTPUT_PORT: &str = "output";
/// Port a `switch` emits on when no case matches.
pub const SWITCH_DEFAULT_PORT: &str = "default";

/// The kind of a node, without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    Action,
    Logic,
    Ai,
    Code,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Logic => "logic",
            Self::Ai => "ai",
            Self::Code => "code",
        };
        f.write_str(name)
    }
}

/// How a run gets started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Webhook,
    Schedule,
    Manual,
    Event,
}

/// Trigger settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Required; left optional so the validator can report it missing.
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
    /// Cron expression for schedule triggers.
    #[serde(default)]
    pub schedule: Option<String>,
    /// Event name for event triggers.
    #[serde(default)]
    pub event: Option<String>,
    /// Hook identifier for webhook triggers.
    #[serde(default)]
    pub webhook_id: Option<String>,
}

/// Configuration for action nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Service namespace, e.g. `http`.
    pub service: String,
    /// Operation within the service, e.g. `get`.
    pub action: String,
    /// Handler-specific parameters.
    #[serde(default)]
    pub parameters: JsonValue,
}

impl ActionConfig {
    /// Registry key, `service.action`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}.{}", self.service, self.action)
    }
}

/// Configuration for logic nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "logic_type", rename_all = "snake_case")]
pub enum LogicConfig {
    /// Emits on `true` or `false` depending on a boolean expression.
    If { condition: String },
    /// Emits on the port named by the matching case, or `default`.
    Switch {
        expression: String,
        cases: Vec<String>,
    },
    /// Evaluates an expression to a list and passes it downstream.
    Loop { items: String },
}

/// Configuration for AI nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiNodeConfig {
    #[serde(default = "default_task_type")]
    pub task_type: AiTaskType,
    pub provider: AiProvider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub target_language: Option<String>,
}

fn default_task_type() -> AiTaskType {
    AiTaskType::Custom
}

/// Configuration for code nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeConfig {
    pub language: Language,
    /// Source to run; the validator rejects empty source.
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub packages: Vec<String>,
    /// Shortens the sandbox's budget; the configured cap still applies.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Kind-specific node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Action(ActionConfig),
    Logic(LogicConfig),
    Ai(AiNodeConfig),
    Code(CodeConfig),
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable name shown in the editor.
    #[serde(default)]
    pub label: String,
    pub config: NodeConfig,
}

impl Node {
    /// Creates a node.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            config,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Returns the node's kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self.config {
            NodeConfig::Trigger(_) => NodeKind::Trigger,
            NodeConfig::Action(_) => NodeKind::Action,
            NodeConfig::Logic(_) => NodeKind::Logic,
            NodeConfig::Ai(_) => NodeKind::Ai,
            NodeConfig::Code(_) => NodeKind::Code,
        }
    }

    /// Returns true for the run's entry node.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        matches!(self.config, NodeConfig::Trigger(_))
    }

    /// Ports this node can emit on.
    #[must_use]
    pub fn output_ports(&self) -> Vec<String> {
        match &self.config {
            NodeConfig::Logic(LogicConfig::If { .. }) => {
                vec!["true".to_string(), "false".to_string()]
            }
            NodeConfig::Logic(LogicConfig::Switch { cases, .. }) => cases
                .iter()
                .cloned()
                .chain(std::iter::once(SWITCH_DEFAULT_PORT.to_string()))
                .collect(),
            _ => vec![DEFAULT_OUTPUT_PORT.to_string()],
        }
    }

    /// Returns true if the node declares an output port with this name.
    #[must_use]
    pub fn has_output_port(&self, name: &str) -> bool {
        self.output_ports().iter().any(|port| port == name)
    }

    /// Trigger node with the given sub-type.
    #[must_use]
    pub fn trigger(id: impl Into<NodeId>, trigger_type: TriggerType) -> Self {
        Self::new(
            id,
            NodeConfig::Trigger(TriggerConfig {
                trigger_type: Some(trigger_type),
                ..TriggerConfig::default()
            }),
        )
    }

    /// Action node for `service.action` with the given parameters.
    #[must_use]
    pub fn action(
        id: impl Into<NodeId>,
        service: impl Into<String>,
        action: impl Into<String>,
        parameters: JsonValue,
    ) -> Self {
        Self::new(
            id,
            NodeConfig::Action(ActionConfig {
                service: service.into(),
                action: action.into(),
                parameters,
            }),
        )
    }

    /// `if` logic node.
    #[must_use]
    pub fn if_node(id: impl Into<NodeId>, condition: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Logic(LogicConfig::If {
                condition: condition.into(),
            }),
        )
    }

    /// Code node with no packages.
    #[must_use]
    pub fn code(id: impl Into<NodeId>, language: Language, code: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::Code(CodeConfig {
                language,
                code: code.into(),
                packages: Vec::new(),
                timeout_secs: None,
            }),
        )
    }

    /// AI node with default model and sampling options.
    #[must_use]
    pub fn ai(id: impl Into<NodeId>, task_type: AiTaskType, provider: AiProvider) -> Self {
        Self::new(
            id,
            NodeConfig::Ai(AiNodeConfig {
                task_type,
                provider,
                model: None,
                prompt: None,
                temperature: None,
                max_tokens: None,
                target_language: None,
            }),
        )
    }
}
