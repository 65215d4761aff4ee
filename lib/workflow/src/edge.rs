//! Edge types for workflow graphs.
//!
//! An edge carries a source node's output to a target node. It may select
//! one of the source's output ports, name the key the value lands under in
//! the target's input, and carry a guard expression that must hold for the
//! edge to be followed.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Editor-assigned id, used in diagnostics when present.
    #[serde(default)]
    pub id: Option<String>,
    pub source: NodeId,
    /// Output port on the source; `None` follows the edge whatever port fired.
    #[serde(default)]
    pub source_port: Option<String>,
    pub target: NodeId,
    /// Key the source output is stored under in the target's input.
    #[serde(default)]
    pub target_port: Option<String>,
    /// Boolean expression evaluated when the target is dispatched.
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Edge {
    /// Creates an unguarded edge between default ports.
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: None,
            source: source.into(),
            source_port: None,
            target: target.into(),
            target_port: None,
            guard: None,
            label: None,
        }
    }

    /// Sets the editor id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Selects a source output port.
    #[must_use]
    pub fn from_port(mut self, port: impl Into<String>) -> Self {
        self.source_port = Some(port.into());
        self
    }

    /// Names the key the value lands under in the target's input.
    #[must_use]
    pub fn to_port(mut self, port: impl Into<String>) -> Self {
        self.target_port = Some(port.into());
        self
    }

    /// Attaches a guard expression.
    #[must_use]
    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    /// Short description for logs and validation messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.id {
            Some(id) => format!("{id} ({} -> {})", self.source, self.target),
            None => format!("{} -> {}", self.source, self.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_edge_json() {
        let edge: Edge = serde_json::from_value(json!({ "source": "a", "target": "b" }))
            .expect("deserialize");
        assert_eq!(edge, Edge::new("a", "b"));
        assert_eq!(edge.describe(), "a -> b");
    }

    #[test]
    fn builder_sets_ports_and_guard() {
        let edge = Edge::new("check", "notify")
            .with_id("e7")
            .from_port("true")
            .to_port("decision")
            .with_guard("score > 70");

        assert_eq!(edge.source_port.as_deref(), Some("true"));
        assert_eq!(edge.target_port.as_deref(), Some("decision"));
        assert_eq!(edge.guard.as_deref(), Some("score > 70"));
        assert_eq!(edge.describe(), "e7 (check -> notify)");
    }
}
