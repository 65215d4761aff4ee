//! Per-kind node execution.
//!
//! Dispatch is an exhaustive match over [`NodeConfig`]; each kind prepares
//! its collaborator request from the node's resolved input, calls the
//! collaborator and maps the result to a [`NodeOutcome`]. The registry does
//! no I/O of its own.

use crate::action::{ActionInvocation, ActionRegistry};
use crate::error::{ErrorCause, NodeExecutionError};
use crate::execution::NodeMetrics;
use crate::expression::Scope;
use crate::ledger::NodeLog;
use crate::logic;
use crate::node::{ActionConfig, AiNodeConfig, CodeConfig, LogicConfig, Node, NodeConfig, NodeId};
use autoflow_ai::{AiTask, TaskExecutor, TaskOptions};
use autoflow_core::WorkflowRunId;
use autoflow_sandbox::{CodeRequest, CodeRunner, SandboxOutput};
use serde_json::{Value as JsonValue, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Read-only run state a node can see while executing.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub run_id: WorkflowRunId,
    pub run_input: Arc<JsonValue>,
    /// Outputs committed before this node was dispatched.
    pub outputs: Arc<HashMap<NodeId, JsonValue>>,
}

impl NodeContext {
    /// Expression scope with `$` bound to `current`.
    #[must_use]
    pub fn scope<'a>(&'a self, current: &'a JsonValue) -> Scope<'a> {
        Scope {
            current,
            run: self.run_input.as_ref(),
            nodes: self.outputs.as_ref(),
        }
    }
}

/// A node's successful result.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub output: JsonValue,
    pub metrics: NodeMetrics,
    /// Ports the node emitted on; `None` means all of them.
    pub active_ports: Option<Vec<String>>,
    /// Log lines to attribute to the node.
    pub logs: Vec<NodeLog>,
}

impl NodeOutcome {
    #[must_use]
    pub fn new(output: JsonValue) -> Self {
        Self {
            output,
            metrics: NodeMetrics::default(),
            active_ports: None,
            logs: Vec::new(),
        }
    }

    /// Returns true if an edge leaving `port` should be followed.
    #[must_use]
    pub fn is_port_active(&self, port: &str) -> bool {
        self.active_ports
            .as_ref()
            .is_none_or(|ports| ports.iter().any(|p| p == port))
    }
}

/// Executes nodes of every kind.
#[derive(Clone)]
pub struct NodeExecutorRegistry {
    actions: ActionRegistry,
    code: Arc<dyn CodeRunner>,
    ai: Arc<dyn TaskExecutor>,
}

impl fmt::Debug for NodeExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeExecutorRegistry")
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

impl NodeExecutorRegistry {
    #[must_use]
    pub fn new(actions: ActionRegistry, code: Arc<dyn CodeRunner>, ai: Arc<dyn TaskExecutor>) -> Self {
        Self { actions, code, ai }
    }

    #[must_use]
    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Executes `node` with its resolved input.
    ///
    /// # Errors
    ///
    /// Every collaborator failure comes back as a [`NodeExecutionError`]
    /// naming the node.
    pub async fn execute(
        &self,
        node: &Node,
        input: JsonValue,
        ctx: &NodeContext,
    ) -> Result<NodeOutcome, NodeExecutionError> {
        match &node.config {
            NodeConfig::Trigger(_) => Ok(NodeOutcome::new(input)),
            NodeConfig::Action(config) => self.execute_action(&node.id, config, input).await,
            NodeConfig::Logic(config) => execute_logic(&node.id, config, &input, ctx),
            NodeConfig::Ai(config) => self.execute_ai(&node.id, config, &input).await,
            NodeConfig::Code(config) => self.execute_code(&node.id, config, input).await,
        }
    }

    async fn execute_action(
        &self,
        node_id: &NodeId,
        config: &ActionConfig,
        input: JsonValue,
    ) -> Result<NodeOutcome, NodeExecutionError> {
        let key = config.key();
        let Some(handler) = self.actions.get(&key) else {
            return Err(NodeExecutionError::new(
                node_id.clone(),
                format!("no handler registered for action {key}"),
                ErrorCause::UnknownAction { key },
            ));
        };

        let invocation = ActionInvocation {
            node_id: node_id.clone(),
            parameters: config.parameters.clone(),
            input,
        };
        let output = handler
            .invoke(invocation)
            .await
            .map_err(|e| NodeExecutionError::new(node_id.clone(), e.message, ErrorCause::Action { key }))?;
        Ok(NodeOutcome::new(output))
    }

    async fn execute_ai(
        &self,
        node_id: &NodeId,
        config: &AiNodeConfig,
        input: &JsonValue,
    ) -> Result<NodeOutcome, NodeExecutionError> {
        let task = ai_task(config, input);
        let response = self.ai.execute(task).await;

        if !response.success {
            let message = response
                .error
                .unwrap_or_else(|| "AI task failed".to_string());
            return Err(NodeExecutionError::new(
                node_id.clone(),
                message,
                ErrorCause::Ai {
                    provider: config.provider,
                    attempts: response.attempts,
                },
            ));
        }

        let mut outcome = NodeOutcome::new(json!({
            "output": response.output,
            "model": response.model,
            "usage": response.usage,
        }));
        outcome.metrics.tokens = response.usage;
        outcome.metrics.model = Some(response.model);
        outcome.metrics.attempts = Some(response.attempts);
        Ok(outcome)
    }

    async fn execute_code(
        &self,
        node_id: &NodeId,
        config: &CodeConfig,
        input: JsonValue,
    ) -> Result<NodeOutcome, NodeExecutionError> {
        let mut request = CodeRequest::new(config.language, config.code.clone(), input)
            .with_packages(config.packages.clone());
        if let Some(secs) = config.timeout_secs {
            request = request.with_timeout(Duration::from_secs(secs));
        }

        let output = self
            .code
            .run(request)
            .await
            .map_err(|e| NodeExecutionError::sandbox(node_id.clone(), e))?;
        Ok(code_outcome(output))
    }
}

fn execute_logic(
    node_id: &NodeId,
    config: &LogicConfig,
    input: &JsonValue,
    ctx: &NodeContext,
) -> Result<NodeOutcome, NodeExecutionError> {
    let evaluated = logic::evaluate(node_id, config, &ctx.scope(input))?;
    let mut outcome = NodeOutcome::new(evaluated.output);
    outcome.active_ports = Some(vec![evaluated.port]);
    Ok(outcome)
}

fn ai_task(config: &AiNodeConfig, input: &JsonValue) -> AiTask {
    let text = match input {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut task = AiTask::new(config.task_type, config.provider, text).with_options(TaskOptions {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        target_language: config.target_language.clone(),
    });
    if let Some(prompt) = &config.prompt {
        task = task.with_prompt(prompt.clone());
    }
    if let Some(model) = &config.model {
        task = task.with_model(model.clone());
    }
    task
}

fn code_outcome(output: SandboxOutput) -> NodeOutcome {
    let logs = output
        .stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(NodeLog::info)
        .chain(
            output
                .stderr
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(NodeLog::warn),
        )
        .collect();
    let artifacts: Vec<String> = output.artifacts.iter().map(|a| a.uri.clone()).collect();
    let result = serde_json::from_str::<JsonValue>(output.stdout.trim()).unwrap_or(JsonValue::Null);

    NodeOutcome {
        output: json!({
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exit_code": output.exit_code,
            "artifacts": output.artifacts,
            "result": result,
        }),
        metrics: NodeMetrics {
            exit_code: Some(output.exit_code),
            artifacts,
            ..NodeMetrics::default()
        },
        active_ports: None,
        logs,
    }
}
