//! Depth-first orders.
//!
//! Everything here runs on an explicit stack, so long chains of blocks do not
//! recurse. Nodes are marked when they are popped rather than when they are
//! pushed, which gives the same orders a recursive walk would.

use crate::utils::graph::{NodeId, Successors};

/// Pre-order walk returned by [`dfs`].
pub struct DfsIterator<'g, G: Successors> {
    graph: &'g G,
    pending: Vec<NodeId>,
    seen: Vec<bool>,
}

impl<G: Successors> Iterator for DfsIterator<'_, G> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.pending.pop() {
            if std::mem::replace(&mut self.seen[node.index()], true) {
                continue;
            }
            let start = self.pending.len();
            self.pending
                .extend(self.graph.successors(node).filter(|s| !self.seen[s.index()]));
            // First successor on top of the stack.
            self.pending[start..].reverse();
            return Some(node);
        }
        None
    }
}

/// Visits every node reachable from `start` once, parents before children.
///
/// An out-of-range start visits nothing.
///
/// ```rust,ignore
/// use lambdaize::utils::graph::{algorithms::dfs, AdjacencyGraph, NodeId};
///
/// let graph = AdjacencyGraph::from_edges(3, &[(0, 1), (1, 2)]);
/// assert_eq!(dfs(&graph, NodeId::new(0)).count(), 3);
/// ```
pub fn dfs<G: Successors>(graph: &G, start: NodeId) -> DfsIterator<'_, G> {
    let count = graph.node_count();
    DfsIterator {
        graph,
        pending: if start.index() < count { vec![start] } else { Vec::new() },
        seen: vec![false; count],
    }
}

/// `result[i]` is set when node `i` can be reached from `start`.
#[must_use]
pub fn reachable<G: Successors>(graph: &G, start: NodeId) -> Vec<bool> {
    let mut result = vec![false; graph.node_count()];
    dfs(graph, start).for_each(|node| result[node.index()] = true);
    result
}

/// Nodes reachable from `start`, each emitted after everything it leads to
/// in the depth-first tree.
#[must_use]
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let count = graph.node_count();
    let mut order = Vec::with_capacity(count);
    if start.index() >= count {
        return order;
    }

    let mut seen = vec![false; count];
    // `true` marks a node whose successors have all been handled.
    let mut work = vec![(start, false)];
    while let Some((node, finished)) = work.pop() {
        if finished {
            order.push(node);
            continue;
        }
        if std::mem::replace(&mut seen[node.index()], true) {
            continue;
        }
        work.push((node, true));
        let first = work.len();
        work.extend(
            graph
                .successors(node)
                .filter(|s| !seen[s.index()])
                .map(|s| (s, false)),
        );
        work[first..].reverse();
    }
    order
}

/// [`postorder`] reversed: every node precedes its successors except along
/// back edges. Dominators and loop discovery walk blocks in this order.
#[must_use]
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut order = postorder(graph, start);
    order.reverse();
    order
}
