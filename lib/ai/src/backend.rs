//! LLM backend abstraction.
//!
//! Provides a unified interface over the hosted providers an AI node can
//! target.

use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Providers an AI node may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// OpenAI chat completions API.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Google models. Selectable in workflows, no backend ships for it.
    Google,
}

impl AiProvider {
    /// Model used when a task does not name one.
    #[must_use]
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-3.5-turbo",
            Self::Anthropic => "claude-3-haiku",
            Self::Google => "gemini-pro",
        }
    }

    /// Models offered for selection in the workflow editor.
    #[must_use]
    pub fn available_models(&self) -> &'static [&'static str] {
        match self {
            Self::OpenAi => &["gpt-3.5-turbo", "gpt-4", "gpt-4-turbo"],
            Self::Anthropic => &["claude-3-haiku", "claude-3-sonnet", "claude-3-opus"],
            Self::Google => &["gemini-pro"],
        }
    }
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Google => write!(f, "google"),
        }
    }
}

/// One completion call, fully resolved: the dispatcher fills in every
/// default before a backend sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A provider's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model the provider reports, which may be more specific than the one
    /// requested.
    pub model: String,
}

/// Prompt and completion token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// A hosted model API.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Makes one completion call. Retrying is the caller's business.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, non-success statuses and
    /// unreadable bodies.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn provider(&self) -> AiProvider;
}
