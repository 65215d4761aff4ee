//! Structural validation of workflow graphs.
//!
//! Validation never short-circuits: every rule runs and every violation is
//! reported, so the editor can show all problems at once. A malformed graph
//! is an ordinary outcome, not a failure of the validator.

use crate::edge::Edge;
use crate::expression::Expression;
use crate::node::{LogicConfig, Node, NodeConfig, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationError {
    /// The workflow has no nodes.
    EmptyWorkflow,
    /// No trigger node, so the run has no entry point.
    MissingTrigger,
    /// More than one trigger node; the start is ambiguous.
    MultipleTriggers { node_ids: Vec<NodeId> },
    /// Two nodes share an id.
    DuplicateNodeId { node_id: NodeId },
    /// An edge's source does not name a node.
    DanglingEdgeSource { edge: String, node_id: NodeId },
    /// An edge's target does not name a node.
    DanglingEdgeTarget { edge: String, node_id: NodeId },
    /// A non-trigger node nothing points at.
    OrphanedNode { node_id: NodeId },
    /// The trigger leads nowhere.
    TriggerWithoutOutgoing { node_id: NodeId },
    /// Something points at the trigger.
    TriggerHasIncoming { node_id: NodeId },
    /// The graph contains a cycle through these nodes.
    CycleDetected { members: Vec<NodeId> },
    /// A trigger without a trigger type.
    MissingTriggerType { node_id: NodeId },
    /// A code node with empty source.
    MissingCode { node_id: NodeId },
    /// A switch node with no cases.
    EmptySwitch { node_id: NodeId },
    /// A guard or logic expression that does not parse.
    InvalidExpression { subject: String, message: String },
    /// An edge selects a port its source does not emit on.
    UnknownPort {
        edge: String,
        node_id: NodeId,
        port: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyWorkflow => write!(f, "workflow has no nodes"),
            Self::MissingTrigger => write!(f, "workflow has no trigger node (no entry point)"),
            Self::MultipleTriggers { node_ids } => {
                let ids: Vec<_> = node_ids.iter().map(NodeId::as_str).collect();
                write!(f, "workflow has multiple trigger nodes: {}", ids.join(", "))
            }
            Self::DuplicateNodeId { node_id } => write!(f, "duplicate node id {node_id}"),
            Self::DanglingEdgeSource { edge, node_id } => {
                write!(f, "edge {edge} references missing source node {node_id}")
            }
            Self::DanglingEdgeTarget { edge, node_id } => {
                write!(f, "edge {edge} references missing target node {node_id}")
            }
            Self::OrphanedNode { node_id } => {
                write!(f, "node {node_id} has no incoming edges")
            }
            Self::TriggerWithoutOutgoing { node_id } => {
                write!(f, "trigger {node_id} has no outgoing edges")
            }
            Self::TriggerHasIncoming { node_id } => {
                write!(f, "trigger {node_id} has incoming edges")
            }
            Self::CycleDetected { members } => {
                let ids: Vec<_> = members.iter().map(NodeId::as_str).collect();
                write!(f, "workflow contains a cycle: {}", ids.join(" -> "))
            }
            Self::MissingTriggerType { node_id } => {
                write!(f, "trigger {node_id} does not declare a trigger type")
            }
            Self::MissingCode { node_id } => write!(f, "code node {node_id} has no source code"),
            Self::EmptySwitch { node_id } => write!(f, "switch node {node_id} has no cases"),
            Self::InvalidExpression { subject, message } => {
                write!(f, "{subject}: {message}")
            }
            Self::UnknownPort {
                edge,
                node_id,
                port,
            } => write!(f, "edge {edge} selects unknown port '{port}' on node {node_id}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Outcome of validating a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validates a node and edge set.
#[must_use]
pub fn validate(nodes: &[Node], edges: &[Edge]) -> ValidationResult {
    let mut errors = Vec::new();

    if nodes.is_empty() {
        errors.push(ValidationError::EmptyWorkflow);
    }

    // First occurrence wins for duplicated ids.
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        if index_of.contains_key(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        } else {
            index_of.insert(node.id.as_str(), index);
        }
    }

    check_triggers(nodes, edges, &mut errors);
    check_edges(nodes, edges, &index_of, &mut errors);
    check_orphans(nodes, edges, &mut errors);
    if let Some(members) = find_cycle(nodes.len(), edges, &index_of) {
        let members: Vec<NodeId> = members.into_iter().map(|i| nodes[i].id.clone()).collect();
        tracing::warn!(
            cycle = ?members.iter().map(NodeId::as_str).collect::<Vec<_>>(),
            "workflow graph contains a cycle"
        );
        errors.push(ValidationError::CycleDetected { members });
    }
    for node in nodes {
        check_node_config(node, &mut errors);
    }

    ValidationResult::from_errors(errors)
}

fn check_triggers(nodes: &[Node], edges: &[Edge], errors: &mut Vec<ValidationError>) {
    let triggers: Vec<&Node> = nodes.iter().filter(|n| n.is_trigger()).collect();
    match triggers.len() {
        0 if !nodes.is_empty() => errors.push(ValidationError::MissingTrigger),
        0 | 1 => {}
        _ => errors.push(ValidationError::MultipleTriggers {
            node_ids: triggers.iter().map(|n| n.id.clone()).collect(),
        }),
    }

    for trigger in triggers {
        if !edges.iter().any(|e| e.source == trigger.id) {
            errors.push(ValidationError::TriggerWithoutOutgoing {
                node_id: trigger.id.clone(),
            });
        }
        if edges.iter().any(|e| e.target == trigger.id) {
            errors.push(ValidationError::TriggerHasIncoming {
                node_id: trigger.id.clone(),
            });
        }
    }
}

fn check_edges(
    nodes: &[Node],
    edges: &[Edge],
    index_of: &HashMap<&str, usize>,
    errors: &mut Vec<ValidationError>,
) {
    for edge in edges {
        let source = index_of.get(edge.source.as_str()).map(|&i| &nodes[i]);
        match source {
            None => errors.push(ValidationError::DanglingEdgeSource {
                edge: edge.describe(),
                node_id: edge.source.clone(),
            }),
            Some(source) => {
                if let Some(port) = &edge.source_port {
                    if !source.has_output_port(port) {
                        errors.push(ValidationError::UnknownPort {
                            edge: edge.describe(),
                            node_id: source.id.clone(),
                            port: port.clone(),
                        });
                    }
                }
            }
        }
        if !index_of.contains_key(edge.target.as_str()) {
            errors.push(ValidationError::DanglingEdgeTarget {
                edge: edge.describe(),
                node_id: edge.target.clone(),
            });
        }
        if let Some(Err(e)) = edge.guard.as_deref().map(Expression::parse) {
            errors.push(ValidationError::InvalidExpression {
                subject: format!("guard on edge {}", edge.describe()),
                message: e.to_string(),
            });
        }
    }
}

fn check_orphans(nodes: &[Node], edges: &[Edge], errors: &mut Vec<ValidationError>) {
    let targeted: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
    for node in nodes.iter().filter(|n| !n.is_trigger()) {
        if !targeted.contains(node.id.as_str()) {
            errors.push(ValidationError::OrphanedNode {
                node_id: node.id.clone(),
            });
        }
    }
}

fn check_expression(node: &Node, what: &str, source: &str, errors: &mut Vec<ValidationError>) {
    if let Err(e) = Expression::parse(source) {
        errors.push(ValidationError::InvalidExpression {
            subject: format!("{what} of node {}", node.id),
            message: e.to_string(),
        });
    }
}

fn check_node_config(node: &Node, errors: &mut Vec<ValidationError>) {
    match &node.config {
        NodeConfig::Trigger(config) => {
            if config.trigger_type.is_none() {
                errors.push(ValidationError::MissingTriggerType {
                    node_id: node.id.clone(),
                });
            }
        }
        NodeConfig::Code(config) => {
            if config.code.trim().is_empty() {
                errors.push(ValidationError::MissingCode {
                    node_id: node.id.clone(),
                });
            }
        }
        NodeConfig::Logic(LogicConfig::If { condition }) => {
            check_expression(node, "condition", condition, errors);
        }
        NodeConfig::Logic(LogicConfig::Switch { expression, cases }) => {
            check_expression(node, "expression", expression, errors);
            if cases.is_empty() {
                errors.push(ValidationError::EmptySwitch {
                    node_id: node.id.clone(),
                });
            }
        }
        NodeConfig::Logic(LogicConfig::Loop { items }) => {
            check_expression(node, "items", items, errors);
        }
        NodeConfig::Action(_) | NodeConfig::Ai(_) => {}
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Iterative depth-first search with an explicit recursion stack.
///
/// Returns the members of the first cycle found, in traversal order.
fn find_cycle(
    node_count: usize,
    edges: &[Edge],
    index_of: &HashMap<&str, usize>,
) -> Option<Vec<usize>> {
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for edge in edges {
        if let (Some(&source), Some(&target)) = (
            index_of.get(edge.source.as_str()),
            index_of.get(edge.target.as_str()),
        ) {
            adjacency[source].push(target);
        }
    }

    let mut marks = vec![Mark::Unvisited; node_count];
    // (node, position of the next neighbour to visit)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..node_count {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        stack.push((root, 0));

        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            let Some(&neighbour) = adjacency[node].get(*next) else {
                marks[node] = Mark::Done;
                stack.pop();
                continue;
            };
            *next += 1;

            match marks[neighbour] {
                Mark::Unvisited => {
                    marks[neighbour] = Mark::OnStack;
                    stack.push((neighbour, 0));
                }
                Mark::OnStack => {
                    let start = stack
                        .iter()
                        .position(|&(n, _)| n == neighbour)
                        .unwrap_or(0);
                    return Some(stack[start..].iter().map(|&(n, _)| n).collect());
                }
                Mark::Done => {}
            }
        }
    }
    None
}
