//! Graph infrastructure for control-flow analysis.
//!
//! # Key Components
//!
//! - [`NodeId`] - Strongly-typed dense node identifier
//! - [`GraphBase`], [`Successors`], [`Predecessors`], [`RootedGraph`] - Views
//!   that algorithms are written against
//! - [`AdjacencyGraph`] - A small owned graph, handy for building graphs by hand
//! - [`algorithms`] - Traversal orders and dominator trees

pub mod algorithms;
mod node;
mod traits;

pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};

/// An owned directed graph stored as adjacency lists.
///
/// Node `0` is the entry. Parallel edges are collapsed.
#[derive(Debug, Clone, Default)]
pub struct AdjacencyGraph {
    succs: Vec<Vec<NodeId>>,
    preds: Vec<Vec<NodeId>>,
}

impl AdjacencyGraph {
    /// Creates a graph with `nodes` nodes and no edges.
    #[must_use]
    pub fn with_nodes(nodes: usize) -> Self {
        Self {
            succs: vec![Vec::new(); nodes],
            preds: vec![Vec::new(); nodes],
        }
    }

    /// Creates a graph from an edge list over node indices.
    #[must_use]
    pub fn from_edges(nodes: usize, edges: &[(usize, usize)]) -> Self {
        let mut graph = Self::with_nodes(nodes);
        for &(from, to) in edges {
            graph.add_edge(NodeId::new(from), NodeId::new(to));
        }
        graph
    }

    /// Adds the edge `from -> to`. Out-of-range nodes are ignored.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        if from.index() >= self.succs.len() || to.index() >= self.succs.len() {
            return;
        }
        if !self.succs[from.index()].contains(&to) {
            self.succs[from.index()].push(to);
            self.preds[to.index()].push(from);
        }
    }
}

impl GraphBase for AdjacencyGraph {
    fn node_count(&self) -> usize {
        self.succs.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.succs.len()).map(NodeId::new)
    }
}

impl Successors for AdjacencyGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.succs[node.index()].iter().copied()
    }
}

impl Predecessors for AdjacencyGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.preds[node.index()].iter().copied()
    }
}

impl RootedGraph for AdjacencyGraph {
    fn entry(&self) -> NodeId {
        NodeId::new(0)
    }
}
