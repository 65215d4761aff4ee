//! Error types for the sandbox crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors from a single sandboxed execution.
///
/// These are carried inside node execution records, so they are plain data
/// rather than wrapped I/O errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SandboxError {
    /// The program ran but exited unsuccessfully.
    NonZeroExit {
        /// Exit code, absent when the process was killed by a signal.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// The program exceeded its wall-clock budget and was killed.
    Timeout { after_ms: u64 },
    /// The program wrote more than the output cap and was killed.
    OutputLimit { limit_bytes: usize },
    /// The interpreter could not be started or waited on.
    Spawn { message: String },
    /// The disposable workspace could not be prepared.
    Workspace { message: String },
}

impl SandboxError {
    /// Returns true if the execution was killed for exceeding its budget.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit { exit_code, stderr } => match exit_code {
                Some(code) => write!(f, "code exited with status {code}: {}", stderr.trim()),
                None => write!(f, "code terminated by signal: {}", stderr.trim()),
            },
            Self::Timeout { after_ms } => write!(f, "code execution timed out after {after_ms}ms"),
            Self::OutputLimit { limit_bytes } => {
                write!(f, "code output exceeded the {limit_bytes} byte limit")
            }
            Self::Spawn { message } => write!(f, "failed to start interpreter: {message}"),
            Self::Workspace { message } => write!(f, "sandbox workspace error: {message}"),
        }
    }
}

impl std::error::Error for SandboxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_trims_stderr() {
        let err = SandboxError::NonZeroExit {
            exit_code: Some(1),
            stderr: "Traceback...\n".to_string(),
        };
        assert_eq!(err.to_string(), "code exited with status 1: Traceback...");
    }

    #[test]
    fn timeout_is_tagged_for_records() {
        let err = SandboxError::Timeout { after_ms: 60_000 };
        assert!(err.is_timeout());
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["after_ms"], 60_000);
    }
}
