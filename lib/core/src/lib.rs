//! Core types shared by every autoflow crate.
//!
//! Provides the typed identifiers used in run records and the rootcause-based
//! `Result` alias.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{NodeExecutionId, ParseIdError, WorkflowId, WorkflowRunId};
