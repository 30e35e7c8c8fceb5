//! Views that the graph algorithms are generic over.
//!
//! [`FunctionCfg`](crate::analysis::cfg::FunctionCfg) implements all four, as
//! does the hand-built [`AdjacencyGraph`](super::AdjacencyGraph) used in tests.

use crate::utils::graph::NodeId;

/// Node set of a graph. Ids are dense, `0..node_count()`.
pub trait GraphBase {
    /// How many nodes the graph holds.
    fn node_count(&self) -> usize;

    /// Every node, lowest index first.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Outgoing edges.
pub trait Successors: GraphBase {
    /// Targets of the edges leaving `node`, each reported once.
    ///
    /// # Panics
    ///
    /// Implementations index by `node` and may panic when it is out of range.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Incoming edges.
pub trait Predecessors: GraphBase {
    /// Sources of the edges entering `node`, each reported once.
    ///
    /// # Panics
    ///
    /// Implementations index by `node` and may panic when it is out of range.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// A graph with an entry node, which dominator trees are rooted at.
pub trait RootedGraph: Successors + Predecessors {
    /// The entry node; block 0 for a function.
    fn entry(&self) -> NodeId;
}
