//! Deterministic collaborators for tests.

use crate::action::{ActionError, ActionHandler, ActionInvocation};
use async_trait::async_trait;
use autoflow_ai::{AiResponse, AiTask, TaskExecutor, TokenUsage};
use autoflow_sandbox::{CodeRequest, CodeRunner, SandboxError, SandboxOutput};
use serde_json::{Value as JsonValue, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Returns its parameters and input.
pub struct EchoAction;

#[async_trait]
impl ActionHandler for EchoAction {
    async fn invoke(&self, invocation: ActionInvocation) -> Result<JsonValue, ActionError> {
        Ok(json!({ "parameters": invocation.parameters, "input": invocation.input }))
    }
}

/// Returns the `output` parameter, after `delay_ms` when set; fails when the
/// parameters contain `fail`.
pub struct ScriptedAction;

#[async_trait]
impl ActionHandler for ScriptedAction {
    async fn invoke(&self, invocation: ActionInvocation) -> Result<JsonValue, ActionError> {
        if let Some(ms) = invocation.parameters["delay_ms"].as_u64() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(message) = invocation.parameters["fail"].as_str() {
            return Err(ActionError::new(message));
        }
        Ok(invocation.parameters["output"].clone())
    }
}

/// Panics on every call.
pub struct PanickingAction;

#[async_trait]
impl ActionHandler for PanickingAction {
    async fn invoke(&self, _invocation: ActionInvocation) -> Result<JsonValue, ActionError> {
        panic!("handler bug");
    }
}

/// Answers every task the same way and records what it saw.
pub struct ScriptedAi {
    response: Result<String, (String, u32)>,
    seen: Arc<Mutex<Vec<AiTask>>>,
}

impl ScriptedAi {
    pub fn ok(output: &str) -> Self {
        Self {
            response: Ok(output.to_string()),
            seen: Arc::default(),
        }
    }

    pub fn failing(message: &str, attempts: u32) -> Self {
        Self {
            response: Err((message.to_string(), attempts)),
            seen: Arc::default(),
        }
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<AiTask>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl TaskExecutor for ScriptedAi {
    async fn execute(&self, task: AiTask) -> AiResponse {
        let model = task.resolved_model();
        self.seen.lock().expect("lock").push(task);
        match &self.response {
            Ok(output) => AiResponse::succeeded(
                output.clone(),
                model,
                TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
                1,
            ),
            Err((message, attempts)) => AiResponse::failed(model, message.clone(), *attempts),
        }
    }
}

/// Returns a fixed sandbox result.
pub struct ScriptedCode {
    result: Result<SandboxOutput, SandboxError>,
}

impl ScriptedCode {
    pub fn ok(stdout: &str) -> Self {
        Self::with_output(SandboxOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            artifacts: Vec::new(),
            duration_ms: 1,
        })
    }

    pub fn with_output(output: SandboxOutput) -> Self {
        Self { result: Ok(output) }
    }

    pub fn err(error: SandboxError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl CodeRunner for ScriptedCode {
    async fn run(&self, _request: CodeRequest) -> Result<SandboxOutput, SandboxError> {
        self.result.clone()
    }
}
