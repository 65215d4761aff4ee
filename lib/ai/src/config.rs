//! AI dispatcher configuration.

use serde::Deserialize;
use std::time::Duration;

/// Credentials and endpoint for one hosted provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Overrides the provider's public endpoint, e.g. for a proxy.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Retry behavior for failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure; doubles after each further failure.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the failed attempt numbered `attempt` (0-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Configuration for the AI dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub openai: Option<ProviderConfig>,

    #[serde(default)]
    pub anthropic: Option<ProviderConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-request HTTP timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Language `translate` tasks target when the task names none.
    #[serde(default = "default_target_language")]
    pub default_target_language: String,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_target_language() -> String {
    "Korean".to_string()
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            openai: None,
            anthropic: None,
            retry: RetryConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            default_target_language: default_target_language(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_one_second() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.delay_after(0), Duration::from_secs(1));
        assert_eq!(retry.delay_after(1), Duration::from_secs(2));
        assert_eq!(retry.delay_after(2), Duration::from_secs(4));
    }

    #[test]
    fn defaults_match_task_defaults() {
        let config = AiConfig::default();
        assert!((config.default_temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.default_max_tokens, 1000);
        assert!(config.openai.is_none());
    }
}
