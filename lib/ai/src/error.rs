//! Error types for the AI crate.
//!
//! `LlmError` is what a backend returns for one attempt. The dispatcher
//! never lets it escape: after the final attempt it is flattened into an
//! unsuccessful [`AiResponse`](crate::task::AiResponse).

use std::fmt;
use std::time::Duration;

/// Why one attempt at an AI task failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// No backend is configured for the provider.
    ProviderUnavailable { provider: String, reason: String },
    /// Transport failure or a non-success status.
    RequestFailed { reason: String },
    /// The body did not have the expected shape.
    MalformedResponse { reason: String },
    Timeout,
    /// HTTP 429, with the provider's `retry-after` hint when it sent one.
    RateLimited { retry_after_secs: Option<u64> },
}

impl LlmError {
    /// Returns true if another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ProviderUnavailable { .. })
    }

    /// The provider's requested wait before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderUnavailable { provider, reason } => {
                write!(f, "LLM provider '{provider}' unavailable: {reason}")
            }
            Self::RequestFailed { reason } => {
                write!(f, "LLM request failed: {reason}")
            }
            Self::MalformedResponse { reason } => {
                write!(f, "malformed LLM response: {reason}")
            }
            Self::Timeout => write!(f, "LLM request timed out"),
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => write!(f, "rate limited, retry after {secs}s"),
            Self::RateLimited {
                retry_after_secs: None,
            } => write!(f, "rate limited"),
        }
    }
}

impl std::error::Error for LlmError {}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::MalformedResponse {
                reason: e.to_string(),
            }
        } else {
            Self::RequestFailed {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_provider_is_not_retryable() {
        let err = LlmError::ProviderUnavailable {
            provider: "google".to_string(),
            reason: "no backend configured".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(LlmError::Timeout.is_retryable());
    }

    #[test]
    fn rate_limit_display() {
        let err = LlmError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 30s");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(LlmError::Timeout.retry_after(), None);
    }
}
