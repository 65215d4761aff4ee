//! AI task dispatch with retry and exponential backoff.

use crate::anthropic::AnthropicBackend;
use crate::backend::{AiProvider, LlmBackend, LlmRequest};
use crate::config::AiConfig;
use crate::error::LlmError;
use crate::openai::OpenAiBackend;
use crate::task::{AiResponse, AiTask, SYSTEM_PROMPT};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Anything that can carry out an [`AiTask`].
///
/// Implementations never fail: every problem is reported through an
/// unsuccessful [`AiResponse`].
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: AiTask) -> AiResponse;
}

/// Routes tasks to provider backends, retrying failed attempts.
pub struct AiDispatcher {
    backends: HashMap<AiProvider, Arc<dyn LlmBackend>>,
    config: AiConfig,
}

impl AiDispatcher {
    /// Creates a dispatcher with no backends registered.
    #[must_use]
    pub fn new(config: AiConfig) -> Self {
        Self {
            backends: HashMap::new(),
            config,
        }
    }

    /// Creates a dispatcher with a backend for every provider that has
    /// credentials in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_config(config: AiConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let mut backends: HashMap<AiProvider, Arc<dyn LlmBackend>> = HashMap::new();
        if let Some(openai) = &config.openai {
            backends.insert(
                AiProvider::OpenAi,
                Arc::new(OpenAiBackend::new(openai, timeout)?),
            );
        }
        if let Some(anthropic) = &config.anthropic {
            backends.insert(
                AiProvider::Anthropic,
                Arc::new(AnthropicBackend::new(anthropic, timeout)?),
            );
        }
        Ok(Self { backends, config })
    }

    /// Registers (or replaces) the backend for its provider.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backends.insert(backend.provider(), backend);
        self
    }

    /// Providers with a registered backend.
    #[must_use]
    pub fn configured_providers(&self) -> Vec<AiProvider> {
        let mut providers: Vec<_> = self.backends.keys().copied().collect();
        providers.sort_by_key(|p| p.to_string());
        providers
    }

    /// Models offered for `provider`.
    #[must_use]
    pub fn available_models(&self, provider: AiProvider) -> &'static [&'static str] {
        provider.available_models()
    }

    /// Sends a trivial task and reports whether the provider answered.
    pub async fn test_connection(&self, provider: AiProvider) -> bool {
        let task = AiTask::new(crate::task::AiTaskType::Custom, provider, "Hello")
            .with_prompt("Reply with \"OK\"");
        self.execute(task).await.success
    }

    fn request_for(&self, task: &AiTask, model: &str) -> LlmRequest {
        LlmRequest {
            model: model.to_string(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: task.build_prompt(&self.config.default_target_language),
            temperature: task
                .options
                .temperature
                .unwrap_or(self.config.default_temperature),
            max_tokens: task
                .options
                .max_tokens
                .unwrap_or(self.config.default_max_tokens),
        }
    }
}

#[async_trait]
impl TaskExecutor for AiDispatcher {
    async fn execute(&self, task: AiTask) -> AiResponse {
        let model = task.resolved_model();
        let Some(backend) = self.backends.get(&task.provider) else {
            let err = LlmError::ProviderUnavailable {
                provider: task.provider.to_string(),
                reason: "no backend configured".to_string(),
            };
            tracing::warn!(provider = %task.provider, "AI task for unconfigured provider");
            return AiResponse::failed(model, err.to_string(), 0);
        };

        let request = self.request_for(&task, &model);
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::from("unknown error");

        for attempt in 0..max_attempts {
            match backend.generate(&request).await {
                Ok(response) => {
                    let served_by = if response.model.is_empty() {
                        model
                    } else {
                        response.model
                    };
                    tracing::debug!(
                        provider = %task.provider,
                        model = %served_by,
                        attempts = attempt + 1,
                        tokens = response.usage.total(),
                        "AI task completed"
                    );
                    return AiResponse::succeeded(
                        response.content,
                        served_by,
                        response.usage,
                        attempt + 1,
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %task.provider,
                        attempt = attempt + 1,
                        error = %e,
                        "AI attempt failed"
                    );
                    last_error = e.to_string();
                    if !e.is_retryable() {
                        return AiResponse::failed(model, last_error, attempt + 1);
                    }
                    if attempt + 1 < max_attempts {
                        let backoff = self.config.retry.delay_after(attempt);
                        let wait = e.retry_after().map_or(backoff, |hint| hint.max(backoff));
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        AiResponse::failed(model, last_error, max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LlmResponse, TokenUsage};
    use crate::config::RetryConfig;
    use crate::task::{AiTaskType, TaskOptions};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then answers with the prompt it saw.
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
        seen: Mutex<Vec<LlmRequest>>,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for FlakyBackend {
        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            self.seen.lock().expect("lock").push(request.clone());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(LlmError::RequestFailed {
                    reason: format!("upstream 503 on call {}", call + 1),
                });
            }
            Ok(LlmResponse {
                content: format!("echo: {}", request.prompt),
                usage: TokenUsage {
                    input_tokens: 12,
                    output_tokens: 3,
                },
                model: request.model.clone(),
            })
        }

        fn provider(&self) -> AiProvider {
            AiProvider::OpenAi
        }
    }

    fn no_delay() -> AiConfig {
        AiConfig {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 0,
            },
            ..AiConfig::default()
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let backend = Arc::new(FlakyBackend::new(2));
        let dispatcher = AiDispatcher::new(no_delay()).with_backend(backend.clone());

        let response = dispatcher
            .execute(AiTask::new(AiTaskType::Summarize, AiProvider::OpenAi, "long text"))
            .await;

        assert!(response.success);
        assert_eq!(response.attempts, 3);
        assert_eq!(response.model, "gpt-3.5-turbo");
        assert_eq!(response.usage.map(|u| u.total()), Some(15));
        assert!(response.output.contains("long text"));
    }

    #[tokio::test]
    async fn exhausting_attempts_reports_last_error() {
        let backend = Arc::new(FlakyBackend::new(u32::MAX));
        let dispatcher = AiDispatcher::new(no_delay()).with_backend(backend.clone());

        let response = dispatcher
            .execute(AiTask::new(AiTaskType::Classify, AiProvider::OpenAi, "x"))
            .await;

        assert!(!response.success);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            response.error.as_deref(),
            Some("LLM request failed: upstream 503 on call 3")
        );
        assert!(response.output.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_one_then_two_seconds() {
        let backend = Arc::new(FlakyBackend::new(u32::MAX));
        let dispatcher = AiDispatcher::new(AiConfig::default()).with_backend(backend);

        let started = tokio::time::Instant::now();
        let response = dispatcher
            .execute(AiTask::new(AiTaskType::Custom, AiProvider::OpenAi, "x"))
            .await;

        assert!(!response.success);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4));
    }

    /// Rate-limits the first call with a `retry-after` hint, then answers.
    struct RateLimitedOnce {
        calls: AtomicU32,
        retry_after_secs: u64,
    }

    #[async_trait]
    impl LlmBackend for RateLimitedOnce {
        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(LlmError::RateLimited {
                    retry_after_secs: Some(self.retry_after_secs),
                });
            }
            Ok(LlmResponse {
                content: "ok".to_string(),
                usage: TokenUsage::default(),
                model: String::new(),
            })
        }

        fn provider(&self) -> AiProvider {
            AiProvider::OpenAi
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_stretches_the_backoff() {
        let backend = Arc::new(RateLimitedOnce {
            calls: AtomicU32::new(0),
            retry_after_secs: 5,
        });
        let dispatcher = AiDispatcher::new(AiConfig::default()).with_backend(backend.clone());

        let started = tokio::time::Instant::now();
        let response = dispatcher
            .execute(AiTask::new(AiTaskType::Custom, AiProvider::OpenAi, "x"))
            .await;

        assert!(response.success);
        assert_eq!(response.attempts, 2);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn unconfigured_provider_fails_without_retrying() {
        let dispatcher = AiDispatcher::new(no_delay());

        let response = dispatcher
            .execute(AiTask::new(AiTaskType::Custom, AiProvider::Google, "x"))
            .await;

        assert!(!response.success);
        assert_eq!(response.attempts, 0);
        assert_eq!(response.model, "gemini-pro");
        assert!(response.error.unwrap_or_default().contains("google"));
    }

    #[tokio::test]
    async fn request_carries_system_prompt_and_defaults() {
        let backend = Arc::new(FlakyBackend::new(0));
        let dispatcher = AiDispatcher::new(no_delay()).with_backend(backend.clone());

        let task = AiTask::new(AiTaskType::Custom, AiProvider::OpenAi, "data")
            .with_prompt("Do it")
            .with_options(TaskOptions {
                max_tokens: Some(50),
                ..TaskOptions::default()
            });
        dispatcher.execute(task).await;

        let seen = backend.seen.lock().expect("lock");
        assert_eq!(seen[0].system, SYSTEM_PROMPT);
        assert_eq!(seen[0].prompt, "Do it\n\ndata");
        assert_eq!(seen[0].temperature, 0.7);
        assert_eq!(seen[0].max_tokens, 50);
    }

    #[tokio::test]
    async fn connection_test_reflects_backend_health() {
        let healthy = AiDispatcher::new(no_delay()).with_backend(Arc::new(FlakyBackend::new(0)));
        assert!(healthy.test_connection(AiProvider::OpenAi).await);
        assert!(!healthy.test_connection(AiProvider::Anthropic).await);
        assert_eq!(healthy.configured_providers(), vec![AiProvider::OpenAi]);
    }
}
