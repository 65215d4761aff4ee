//! Append-only per-run log.
//!
//! The scheduler is the only writer. Capabilities hand their log lines back
//! in [`NodeLog`]s and the scheduler attributes them to the node. Once the
//! run reaches a terminal status the ledger is sealed and further appends
//! are dropped.

use crate::node::NodeId;
use autoflow_core::WorkflowRunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// `None` for run-level entries.
    pub node_id: Option<NodeId>,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

/// A log line produced while executing a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLog {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl NodeLog {
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    #[must_use]
    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

/// The ledger of one run.
#[derive(Debug, Clone)]
pub struct RunLedger {
    run_id: WorkflowRunId,
    entries: Vec<LogEntry>,
    sealed: bool,
}

impl RunLedger {
    #[must_use]
    pub fn new(run_id: WorkflowRunId) -> Self {
        Self {
            run_id,
            entries: Vec::new(),
            sealed: false,
        }
    }

    /// Appends an entry and mirrors it to tracing.
    ///
    /// Returns false, and records nothing, once the ledger is sealed.
    pub fn append(
        &mut self,
        node_id: Option<&NodeId>,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<JsonValue>,
    ) -> bool {
        let message = message.into();
        if self.sealed {
            tracing::debug!(
                run_id = %self.run_id,
                message = %message,
                "ledger sealed; entry dropped"
            );
            return false;
        }

        let node = node_id.map_or("-", NodeId::as_str);
        match level {
            LogLevel::Debug => tracing::debug!(run_id = %self.run_id, node_id = node, "{message}"),
            LogLevel::Info => tracing::info!(run_id = %self.run_id, node_id = node, "{message}"),
            LogLevel::Warn => tracing::warn!(run_id = %self.run_id, node_id = node, "{message}"),
            LogLevel::Error => tracing::error!(run_id = %self.run_id, node_id = node, "{message}"),
        }

        self.entries.push(LogEntry {
            node_id: node_id.cloned(),
            timestamp: Utc::now(),
            level,
            message,
            data,
        });
        true
    }

    /// Appends a run-level entry.
    pub fn run(&mut self, level: LogLevel, message: impl Into<String>) -> bool {
        self.append(None, level, message, None)
    }

    /// Appends an entry attributed to a node.
    pub fn node(&mut self, node_id: &NodeId, level: LogLevel, message: impl Into<String>) -> bool {
        self.append(Some(node_id), level, message, None)
    }

    /// Appends a capability's log line, attributed to its node.
    pub fn node_log(&mut self, node_id: &NodeId, log: NodeLog) -> bool {
        self.append(Some(node_id), log.level, log.message, log.data)
    }

    /// Stops accepting entries.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

/// Node ids in the order they first appear in `entries`.
#[must_use]
pub fn visit_order(entries: &[LogEntry]) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|e| e.node_id.as_ref())
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect()
}
