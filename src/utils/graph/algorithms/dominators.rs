//! Dominator trees.
//!
//! `d` dominates `n` when every path from the entry to `n` goes through `d`;
//! the closest strict dominator is the immediate one and becomes the parent
//! in the tree. Loop discovery uses the tree to tell back edges apart, and
//! preheader insertion relies on the header dominating the whole body.
//!
//! The computation is the Cooper, Harvey and Kennedy fixed point over reverse
//! postorder. Nodes the entry cannot reach get no parent and dominate nothing.

use crate::utils::graph::{
    algorithms::traversal::reverse_postorder, NodeId, Predecessors, RootedGraph, Successors,
};

/// Immediate dominators of every node reachable from the entry.
///
/// ```rust,ignore
/// use lambdaize::utils::graph::{AdjacencyGraph, NodeId, algorithms::compute_dominators};
///
/// // Diamond: 0 -> {1, 2} -> 3
/// let graph = AdjacencyGraph::from_edges(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
/// let tree = compute_dominators(&graph, NodeId::new(0));
/// assert_eq!(tree.immediate_dominator(NodeId::new(3)), Some(NodeId::new(0)));
/// ```
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Root of the tree.
    entry: NodeId,
    /// Parent per node. The entry points at itself; unreachable nodes are `None`.
    idom: Vec<Option<NodeId>>,
}

impl DominatorTree {
    /// The root.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Whether the entry reaches `node`.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.idom.get(node.index()).is_some_and(Option::is_some)
    }

    /// Parent of `node`; `None` for the root and for unreachable nodes.
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry {
            None
        } else {
            self.idom.get(node.index()).copied().flatten()
        }
    }

    /// Whether `a` is on the tree path from the root to `b`, `b` included.
    /// Walks up from `b`, so the cost is its depth.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(b) {
            return false;
        }
        self.dominators(b).any(|d| d == a)
    }

    /// [`dominates`](Self::dominates) with `a != b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// `node`, its parent, and so on up to the root. Empty when unreachable.
    #[must_use]
    pub fn dominators(&self, node: NodeId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: self.is_reachable(node).then_some(node),
        }
    }

    /// Distance from the root; the root is at depth 0.
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        self.dominators(node).count().saturating_sub(1)
    }

    /// Nodes whose parent is `node`, lowest index first.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        (0..self.idom.len())
            .map(NodeId::new)
            .filter(|&n| n != self.entry && self.idom[n.index()] == Some(node))
            .collect()
    }

    /// Size of the graph the tree was built from.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Walk towards the root, see [`DominatorTree::dominators`].
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<NodeId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.immediate_dominator(current);
        Some(current)
    }
}

/// Builds the dominator tree of `graph` with `entry` as root.
///
/// Each sweep is linear in the graph; reducible graphs settle after two.
#[must_use]
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors + Predecessors,
{
    let node_count = graph.node_count();
    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    if entry.index() >= node_count {
        return DominatorTree { entry, idom };
    }

    let rpo = reverse_postorder(graph, entry);
    let mut rpo_number = vec![usize::MAX; node_count];
    for (i, node) in rpo.iter().enumerate() {
        rpo_number[node.index()] = i;
    }

    let intersect = |idom: &[Option<NodeId>], mut a: NodeId, mut b: NodeId| -> NodeId {
        while a != b {
            while rpo_number[a.index()] > rpo_number[b.index()] {
                a = idom[a.index()].unwrap_or(entry);
            }
            while rpo_number[b.index()] > rpo_number[a.index()] {
                b = idom[b.index()].unwrap_or(entry);
            }
        }
        a
    };

    idom[entry.index()] = Some(entry);
    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for pred in graph.predecessors(node) {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, pred, current),
                });
            }
            if new_idom.is_some() && idom[node.index()] != new_idom {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    DominatorTree { entry, idom }
}

/// [`compute_dominators`] from the graph's own entry.
#[must_use]
pub fn compute_dominators_rooted<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph,
{
    compute_dominators(graph, graph.entry())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::AdjacencyGraph;

    fn n(i: usize) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_diamond() {
        let graph = AdjacencyGraph::from_edges(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let tree = compute_dominators_rooted(&graph);
        assert_eq!(tree.immediate_dominator(n(0)), None);
        assert_eq!(tree.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(tree.immediate_dominator(n(3)), Some(n(0)));
        assert!(!tree.strictly_dominates(n(1), n(3)));
        assert!(tree.dominates(n(0), n(3)));
        assert_eq!(tree.children(n(0)), vec![n(1), n(2), n(3)]);
    }

    #[test]
    fn test_loop() {
        // 0 -> 1 (header) -> 2 (body) -> 1, 1 -> 3 (exit)
        let graph = AdjacencyGraph::from_edges(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let tree = compute_dominators(&graph, n(0));
        assert!(tree.dominates(n(1), n(2)));
        assert!(tree.dominates(n(1), n(3)));
        assert!(!tree.dominates(n(2), n(1)));
        assert_eq!(tree.depth(n(2)), 2);
        assert_eq!(tree.dominators(n(2)).collect::<Vec<_>>(), vec![n(2), n(1), n(0)]);
    }

    #[test]
    fn test_unreachable_node() {
        let graph = AdjacencyGraph::from_edges(3, &[(0, 1), (2, 1)]);
        let tree = compute_dominators(&graph, n(0));
        assert!(!tree.is_reachable(n(2)));
        assert_eq!(tree.immediate_dominator(n(2)), None);
        assert!(!tree.dominates(n(0), n(2)));
        assert_eq!(tree.immediate_dominator(n(1)), Some(n(0)));
    }

    #[test]
    fn test_irreducible_entry_edges() {
        // 0 -> 1, 0 -> 2, 1 <-> 2: neither 1 nor 2 dominates the other
        let graph = AdjacencyGraph::from_edges(3, &[(0, 1), (0, 2), (1, 2), (2, 1)]);
        let tree = compute_dominators(&graph, n(0));
        assert_eq!(tree.immediate_dominator(n(1)), Some(n(0)));
        assert_eq!(tree.immediate_dominator(n(2)), Some(n(0)));
    }
}
