//! Code sandbox for autoflow code nodes.
//!
//! Runs user-supplied Python or JavaScript out of process:
//!
//! - **Workspace**: a fresh temporary directory per execution, removed on
//!   every exit path
//! - **Packages**: requested packages are filtered against a per-language
//!   allowlist before the generated script installs them
//! - **Budget**: executions are killed when they exceed their timeout
//! - **Artifacts**: files the code leaves behind are reported and optionally
//!   copied out before the workspace is removed

pub mod config;
pub mod error;
pub mod runner;
pub mod script;

pub use config::{Language, LanguageConfig, SandboxConfig};
pub use error::SandboxError;
pub use runner::{Artifact, CodeRequest, CodeRunner, SandboxOutput, SandboxRunner};
