//! AI tasks and prompt construction.

use crate::backend::{AiProvider, TokenUsage};
use serde::{Deserialize, Serialize};

/// System prompt sent with every task.
pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// What the task asks the model to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiTaskType {
    Summarize,
    Classify,
    Translate,
    /// Free-form: the task's prompt followed by its input.
    Custom,
}

/// Sampling options; unset fields fall back to the dispatcher defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Language `translate` tasks produce.
    pub target_language: Option<String>,
}

/// One unit of work for the AI dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiTask {
    pub task_type: AiTaskType,
    pub input: String,
    pub prompt: Option<String>,
    pub provider: AiProvider,
    pub model: Option<String>,
    #[serde(default)]
    pub options: TaskOptions,
}

impl AiTask {
    /// Creates a task with default model and options.
    #[must_use]
    pub fn new(task_type: AiTaskType, provider: AiProvider, input: impl Into<String>) -> Self {
        Self {
            task_type,
            input: input.into(),
            prompt: None,
            provider,
            model: None,
            options: TaskOptions::default(),
        }
    }

    /// Sets the instruction used by `custom` tasks.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Pins the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Replaces the sampling options.
    #[must_use]
    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// The model that will serve this task.
    #[must_use]
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    /// Builds the user prompt for the task type.
    #[must_use]
    pub fn build_prompt(&self, default_target_language: &str) -> String {
        match self.task_type {
            AiTaskType::Summarize => {
                format!("Summarize the following text concisely:\n\n{}", self.input)
            }
            AiTaskType::Classify => format!(
                "Analyze and classify the following text:\n\n{}\n\nKeep the result brief.",
                self.input
            ),
            AiTaskType::Translate => {
                let target = self
                    .options
                    .target_language
                    .as_deref()
                    .unwrap_or(default_target_language);
                format!(
                    "Translate the following text into {target}:\n\n{}",
                    self.input
                )
            }
            AiTaskType::Custom => match &self.prompt {
                Some(prompt) => format!("{prompt}\n\n{}", self.input),
                None => self.input.clone(),
            },
        }
    }
}

/// Outcome of a task. The dispatcher reports failure here rather than
/// returning an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub success: bool,
    pub output: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
}

impl AiResponse {
    /// A successful response.
    #[must_use]
    pub fn succeeded(output: String, model: String, usage: TokenUsage, attempts: u32) -> Self {
        Self {
            success: true,
            output,
            model,
            usage: Some(usage),
            error: None,
            attempts,
        }
    }

    /// A failed response carrying the last error message.
    #[must_use]
    pub fn failed(model: String, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: false,
            output: String::new(),
            model,
            usage: None,
            error: Some(error.into()),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_prompt_precedes_input() {
        let task = AiTask::new(AiTaskType::Custom, AiProvider::OpenAi, "the input")
            .with_prompt("Reply with OK");
        assert_eq!(task.build_prompt("English"), "Reply with OK\n\nthe input");
    }

    #[test]
    fn custom_without_prompt_is_just_input() {
        let task = AiTask::new(AiTaskType::Custom, AiProvider::OpenAi, "raw");
        assert_eq!(task.build_prompt("English"), "raw");
    }

    #[test]
    fn translate_uses_task_language_over_default() {
        let mut task = AiTask::new(AiTaskType::Translate, AiProvider::Anthropic, "hello");
        assert!(task.build_prompt("Korean").contains("into Korean"));

        task.options.target_language = Some("French".to_string());
        assert!(task.build_prompt("Korean").contains("into French"));
    }

    #[test]
    fn resolved_model_defaults_per_provider() {
        let task = AiTask::new(AiTaskType::Summarize, AiProvider::Anthropic, "x");
        assert_eq!(task.resolved_model(), "claude-3-haiku");
        assert_eq!(task.with_model("claude-3-opus").resolved_model(), "claude-3-opus");
    }
}
