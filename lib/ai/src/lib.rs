//! AI task dispatch for autoflow AI nodes.
//!
//! - **Tasks**: summarize, classify, translate, or custom prompts
//! - **Backends**: OpenAI and Anthropic over HTTP behind [`LlmBackend`]
//! - **Dispatcher**: routes a task to its provider and retries with
//!   exponential backoff; failures come back as unsuccessful responses,
//!   never as errors

pub mod anthropic;
pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod openai;
pub mod task;

pub use anthropic::AnthropicBackend;
pub use backend::{AiProvider, LlmBackend, LlmRequest, LlmResponse, TokenUsage};
pub use config::{AiConfig, ProviderConfig, RetryConfig};
pub use dispatcher::{AiDispatcher, TaskExecutor};
pub use error::LlmError;
pub use openai::OpenAiBackend;
pub use task::{AiResponse, AiTask, AiTaskType, TaskOptions};
