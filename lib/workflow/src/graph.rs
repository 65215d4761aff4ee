//! Run-time view of a workflow as a petgraph `DiGraph`.
//!
//! A `WorkflowGraph` is the immutable snapshot a run executes against. It is
//! built from a validated workflow at run start and never mutated afterwards.
//! Neighbour queries return edges in declaration order (petgraph itself
//! iterates adjacency lists newest-first).

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::{Node, NodeId};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// An edge as seen from one of its endpoints.
#[derive(Debug, Clone, Copy)]
pub struct EdgeView<'a> {
    pub index: EdgeIndex,
    /// The node at the other end.
    pub peer: NodeIndex,
    pub edge: &'a Edge,
}

/// Nodes and edges of one workflow version, indexed for traversal.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Edge>,
    node_index_map: HashMap<NodeId, NodeIndex>,
    trigger: NodeIndex,
}

impl WorkflowGraph {
    /// Builds a graph from a node and edge list.
    ///
    /// Only the invariants the scheduler relies on are checked here; run
    /// [`crate::validation::validate`] first for a complete report.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate ids, edges with unknown endpoints, or a
    /// trigger count other than one.
    pub fn build(nodes: &[Node], edges: &[Edge]) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut node_index_map = HashMap::with_capacity(nodes.len());
        let mut trigger = None;

        for node in nodes {
            if node_index_map.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode {
                    node_id: node.id.clone(),
                });
            }
            let index = graph.add_node(node.clone());
            node_index_map.insert(node.id.clone(), index);
            if node.is_trigger() {
                if trigger.is_some() {
                    return Err(GraphError::TriggerCount);
                }
                trigger = Some(index);
            }
        }
        let trigger = trigger.ok_or(GraphError::TriggerCount)?;

        for edge in edges {
            let lookup = |id: &NodeId| {
                node_index_map
                    .get(id)
                    .copied()
                    .ok_or_else(|| GraphError::NodeNotFound {
                        node_id: id.clone(),
                    })
            };
            let source = lookup(&edge.source)?;
            let target = lookup(&edge.target)?;
            graph.add_edge(source, target, edge.clone());
        }

        Ok(Self {
            graph,
            node_index_map,
            trigger,
        })
    }

    /// The trigger node's index.
    #[must_use]
    pub fn trigger(&self) -> NodeIndex {
        self.trigger
    }

    /// Returns a node by index.
    ///
    /// # Panics
    ///
    /// Panics if the index did not come from this graph.
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    /// Looks a node up by its workflow-level id.
    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    #[must_use]
    pub fn index_of(&self, node_id: &NodeId) -> Option<NodeIndex> {
        self.node_index_map.get(node_id).copied()
    }

    /// Node indices in declaration order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Returns all nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Outgoing edges of `index`, in declaration order.
    #[must_use]
    pub fn outgoing(&self, index: NodeIndex) -> Vec<EdgeView<'_>> {
        self.neighbours(index, Direction::Outgoing)
    }

    /// Incoming edges of `index`, in declaration order.
    #[must_use]
    pub fn incoming(&self, index: NodeIndex) -> Vec<EdgeView<'_>> {
        self.neighbours(index, Direction::Incoming)
    }

    fn neighbours(&self, index: NodeIndex, direction: Direction) -> Vec<EdgeView<'_>> {
        let mut views: Vec<_> = self
            .graph
            .edges_directed(index, direction)
            .map(|e| EdgeView {
                index: e.id(),
                peer: match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                },
                edge: e.weight(),
            })
            .collect();
        views.sort_by_key(|v| v.index);
        views
    }

    /// Number of edges pointing at `index`, guarded ones included.
    #[must_use]
    pub fn in_degree(&self, index: NodeIndex) -> usize {
        self.graph.edges_directed(index, Direction::Incoming).count()
    }

    /// Returns true for nodes without outgoing edges.
    #[must_use]
    pub fn is_sink(&self, index: NodeIndex) -> bool {
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .next()
            .is_none()
    }

    /// Sink nodes; their outputs become the run output.
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.graph
            .node_indices()
            .filter(|&idx| self.is_sink(idx))
            .map(|idx| &self.graph[idx])
            .collect()
    }
}
