//! Natural loop detection.
//!
//! Loops are found from back edges: an edge `n -> h` where `h` dominates `n`.
//! All back edges sharing a header form one loop whose body is every node that
//! reaches a latch without passing through the header.
//!
//! ```text
//!     [preheader]        <- sole outside predecessor of the header, if any
//!          |
//!          v
//!     [header] <------+  <- dominates every node of the loop
//!          |          |
//!     [body ...]      |
//!          |          |
//!     [latch] --------+  <- source of a back edge
//!          |
//!          v
//!     [exit ...]         <- outside the loop, reached from inside
//! ```
//!
//! The detector works on any graph implementing the traits of
//! [`crate::utils::graph`]; for IR functions that is
//! [`FunctionCfg`](super::FunctionCfg), whose nodes map back to blocks.

use std::collections::{BTreeSet, HashMap};

use crate::utils::graph::{algorithms::DominatorTree, GraphBase, NodeId, Predecessors, Successors};

/// Shape of a loop, by where it is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopType {
    /// Only the header leaves the loop (`while`).
    PreTested,
    /// Only the single latch leaves the loop (`do ... while`).
    PostTested,
    /// Nothing leaves the loop.
    Infinite,
    /// Several latches or exits from the middle of the body.
    Complex,
}

/// An edge leaving a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoopExit {
    /// The node inside the loop that branches out.
    pub exiting_block: NodeId,
    /// The node outside the loop that is branched to.
    pub exit_block: NodeId,
}

/// One natural loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// The single entry node; dominates the whole body.
    pub header: NodeId,
    /// All nodes of the loop, header and nested loops included.
    pub body: BTreeSet<NodeId>,
    /// Sources of back edges, ascending.
    pub latches: Vec<NodeId>,
    /// The single outside predecessor of the header, if there is exactly one.
    pub preheader: Option<NodeId>,
    /// Exit edges, ascending by exiting node.
    pub exits: Vec<LoopExit>,
    /// Nesting depth, `0` for outermost loops.
    pub depth: usize,
    /// Shape classification.
    pub loop_type: LoopType,
    /// Header of the smallest enclosing loop.
    pub parent: Option<NodeId>,
    /// Headers of the loops directly nested in this one.
    pub children: Vec<NodeId>,
}

impl LoopInfo {
    /// Creates a loop consisting of its header only.
    #[must_use]
    pub fn new(header: NodeId) -> Self {
        Self {
            header,
            body: BTreeSet::from([header]),
            latches: Vec::new(),
            preheader: None,
            exits: Vec::new(),
            depth: 0,
            loop_type: LoopType::Complex,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Returns `true` if `node` belongs to the loop.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.body.contains(&node)
    }

    /// Number of nodes in the loop.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Returns `true` if exactly one back edge enters the header.
    #[must_use]
    pub fn has_single_latch(&self) -> bool {
        self.latches.len() == 1
    }

    /// The latch, if there is exactly one.
    #[must_use]
    pub fn single_latch(&self) -> Option<NodeId> {
        match self.latches.as_slice() {
            [latch] => Some(*latch),
            _ => None,
        }
    }

    /// Returns `true` if the header has a single outside predecessor.
    #[must_use]
    pub fn has_preheader(&self) -> bool {
        self.preheader.is_some()
    }

    /// Preheader and single latch present.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.has_preheader() && self.has_single_latch()
    }

    /// Returns `true` if no loop is nested in this one.
    #[must_use]
    pub fn is_innermost(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns `true` if no loop encloses this one.
    #[must_use]
    pub fn is_outermost(&self) -> bool {
        self.parent.is_none()
    }

    /// Distinct exit targets, ascending.
    #[must_use]
    pub fn exit_blocks(&self) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self.exits.iter().map(|e| e.exit_block).collect();
        set.into_iter().collect()
    }

    /// Distinct nodes with an edge out of the loop, ascending.
    #[must_use]
    pub fn exiting_blocks(&self) -> Vec<NodeId> {
        let set: BTreeSet<NodeId> = self.exits.iter().map(|e| e.exiting_block).collect();
        set.into_iter().collect()
    }

    /// Number of exit edges.
    #[must_use]
    pub fn exit_count(&self) -> usize {
        self.exits.len()
    }

    /// Returns `true` if the header branches out of the loop.
    #[must_use]
    pub fn header_is_exiting(&self) -> bool {
        self.exits.iter().any(|e| e.exiting_block == self.header)
    }

    /// Returns `true` if the single latch branches out of the loop.
    #[must_use]
    pub fn latch_is_exiting(&self) -> bool {
        self.single_latch()
            .is_some_and(|latch| self.exits.iter().any(|e| e.exiting_block == latch))
    }
}

/// All loops of one graph with their nesting.
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    loops: Vec<LoopInfo>,
    /// Innermost loop per node.
    node_to_loop: Vec<Option<usize>>,
}

impl LoopForest {
    /// Creates an empty forest for a graph of `node_count` nodes.
    #[must_use]
    pub fn new(node_count: usize) -> Self {
        Self {
            loops: Vec::new(),
            node_to_loop: vec![None; node_count],
        }
    }

    /// Adds a loop. Each node keeps pointing at the deepest loop containing it.
    pub fn add_loop(&mut self, info: LoopInfo) {
        let idx = self.loops.len();
        for &node in &info.body {
            let Some(slot) = self.node_to_loop.get_mut(node.index()) else {
                continue;
            };
            match *slot {
                Some(existing) if self.loops[existing].depth >= info.depth => {}
                _ => *slot = Some(idx),
            }
        }
        self.loops.push(info);
    }

    /// All loops, ascending by header.
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns `true` if the graph has no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// The deepest loop containing `node`.
    #[must_use]
    pub fn innermost_loop(&self, node: NodeId) -> Option<&LoopInfo> {
        self.node_to_loop
            .get(node.index())
            .copied()
            .flatten()
            .map(|idx| &self.loops[idx])
    }

    /// The loop headed by `header`.
    #[must_use]
    pub fn loop_for_header(&self, header: NodeId) -> Option<&LoopInfo> {
        self.loops.iter().find(|l| l.header == header)
    }

    /// Number of loops containing `node`.
    #[must_use]
    pub fn loop_depth(&self, node: NodeId) -> usize {
        self.innermost_loop(node).map_or(0, |l| l.depth + 1)
    }

    /// Returns `true` if some loop contains `node`.
    #[must_use]
    pub fn is_in_loop(&self, node: NodeId) -> bool {
        self.innermost_loop(node).is_some()
    }

    /// Iterates over the loops.
    pub fn iter(&self) -> impl Iterator<Item = &LoopInfo> {
        self.loops.iter()
    }

    /// Loops, outermost first.
    #[must_use]
    pub fn by_depth_ascending(&self) -> Vec<&LoopInfo> {
        let mut sorted: Vec<_> = self.loops.iter().collect();
        sorted.sort_by_key(|l| l.depth);
        sorted
    }

    /// Loops, innermost first. Loops of equal depth keep header order.
    #[must_use]
    pub fn by_depth_descending(&self) -> Vec<&LoopInfo> {
        let mut sorted: Vec<_> = self.loops.iter().collect();
        sorted.sort_by_key(|l| std::cmp::Reverse(l.depth));
        sorted
    }
}

/// Detects all natural loops of `graph`.
///
/// # Algorithm
///
/// 1. Every edge `n -> h` with `h` dominating `n` is a back edge
/// 2. The body of `h`'s loop is every node reaching a latch without passing `h`
/// 3. Preheader, exits and shape are derived from the body
/// 4. Nesting follows from body containment
///
/// Unreachable nodes are never part of a loop. Irreducible cycles have no
/// dominating header and are therefore not reported.
#[must_use]
pub fn detect_loops<G>(graph: &G, dominators: &DominatorTree) -> LoopForest
where
    G: GraphBase + Successors + Predecessors,
{
    let mut forest = LoopForest::new(graph.node_count());
    let mut by_header: HashMap<NodeId, LoopInfo> = HashMap::new();

    for node in graph.node_ids() {
        if !dominators.is_reachable(node) {
            continue;
        }
        for succ in graph.successors(node) {
            if dominators.dominates(succ, node) {
                let info = by_header
                    .entry(succ)
                    .or_insert_with(|| LoopInfo::new(succ));
                if !info.latches.contains(&node) {
                    info.latches.push(node);
                }
                expand_loop_body(graph, dominators, info, node);
            }
        }
    }

    for info in by_header.values_mut() {
        info.latches.sort_unstable();
        compute_preheader(graph, info);
        compute_exits(graph, info);
        info.loop_type = classify_loop(info);
    }

    let mut loops: Vec<LoopInfo> = by_header.into_values().collect();
    loops.sort_by_key(|l| l.header);
    compute_nesting(&mut loops);

    for info in loops {
        forest.add_loop(info);
    }
    forest
}

/// Returns `true` as soon as one back edge is found.
#[must_use]
pub fn has_back_edges<G>(graph: &G, dominators: &DominatorTree) -> bool
where
    G: GraphBase + Successors,
{
    graph.node_ids().any(|node| {
        dominators.is_reachable(node) && graph.successors(node).any(|s| dominators.dominates(s, node))
    })
}

fn expand_loop_body<G>(graph: &G, dominators: &DominatorTree, info: &mut LoopInfo, latch: NodeId)
where
    G: Predecessors,
{
    let mut worklist = vec![latch];
    while let Some(node) = worklist.pop() {
        if !info.body.insert(node) {
            continue;
        }
        for pred in graph.predecessors(node) {
            if pred != info.header && dominators.is_reachable(pred) && !info.body.contains(&pred) {
                worklist.push(pred);
            }
        }
    }
}

fn compute_preheader<G>(graph: &G, info: &mut LoopInfo)
where
    G: Predecessors,
{
    let outside: Vec<NodeId> = graph
        .predecessors(info.header)
        .filter(|p| !info.body.contains(p))
        .collect();
    info.preheader = match outside.as_slice() {
        [single] => Some(*single),
        _ => None,
    };
}

fn compute_exits<G>(graph: &G, info: &mut LoopInfo)
where
    G: Successors,
{
    info.exits.clear();
    for &node in &info.body {
        for succ in graph.successors(node) {
            if !info.body.contains(&succ) {
                info.exits.push(LoopExit {
                    exiting_block: node,
                    exit_block: succ,
                });
            }
        }
    }
    info.exits.sort_unstable();
    info.exits.dedup();
}

fn classify_loop(info: &LoopInfo) -> LoopType {
    if info.exits.is_empty() {
        return LoopType::Infinite;
    }
    if info.latches.len() > 1 {
        return LoopType::Complex;
    }
    if let Some(latch) = info.single_latch() {
        if info.exits.iter().all(|e| e.exiting_block == latch) {
            return LoopType::PostTested;
        }
    }
    if info.exits.iter().all(|e| e.exiting_block == info.header) {
        return LoopType::PreTested;
    }
    LoopType::Complex
}

fn compute_nesting(loops: &mut [LoopInfo]) {
    let index: HashMap<NodeId, usize> = loops
        .iter()
        .enumerate()
        .map(|(i, l)| (l.header, i))
        .collect();

    // The parent is the smallest other loop containing our header.
    for i in 0..loops.len() {
        let header = loops[i].header;
        loops[i].parent = (0..loops.len())
            .filter(|&j| j != i && loops[j].body.contains(&header))
            .min_by_key(|&j| loops[j].size())
            .map(|j| loops[j].header);
    }

    for i in 0..loops.len() {
        if let Some(parent) = loops[i].parent.and_then(|h| index.get(&h).copied()) {
            let child = loops[i].header;
            loops[parent].children.push(child);
        }
    }

    for i in 0..loops.len() {
        let mut depth = 0;
        let mut current = loops[i].parent;
        while let Some(&idx) = current.and_then(|h| index.get(&h)) {
            depth += 1;
            current = loops[idx].parent;
        }
        loops[i].depth = depth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::{algorithms::compute_dominators_rooted, AdjacencyGraph};

    fn detect(nodes: usize, edges: &[(usize, usize)]) -> LoopForest {
        let graph = AdjacencyGraph::from_edges(nodes, edges);
        let dom = compute_dominators_rooted(&graph);
        detect_loops(&graph, &dom)
    }

    #[test]
    fn test_loop_info_creation() {
        let header = NodeId::new(0);
        let info = LoopInfo::new(header);
        assert!(info.contains(header));
        assert_eq!(info.size(), 1);
        assert!(!info.has_single_latch());
        assert!(!info.is_canonical());
    }

    #[test]
    fn test_while_loop() {
        // 0 -> 1 (header) -> 2 (body) -> 1, 1 -> 3 (exit)
        let forest = detect(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        assert_eq!(forest.len(), 1);
        let info = &forest.loops()[0];
        assert_eq!(info.header, NodeId::new(1));
        assert_eq!(info.preheader, Some(NodeId::new(0)));
        assert_eq!(info.single_latch(), Some(NodeId::new(2)));
        assert_eq!(info.exit_blocks(), vec![NodeId::new(3)]);
        assert_eq!(info.loop_type, LoopType::PreTested);
        assert!(info.is_canonical());
        assert!(info.header_is_exiting());
        assert!(!info.latch_is_exiting());
    }

    #[test]
    fn test_do_while_and_infinite() {
        let forest = detect(3, &[(0, 1), (1, 1), (1, 2)]);
        assert_eq!(forest.loops()[0].loop_type, LoopType::PostTested);

        let forest = detect(3, &[(0, 1), (1, 2), (2, 1)]);
        assert_eq!(forest.loops()[0].loop_type, LoopType::Infinite);
    }

    #[test]
    fn test_nesting() {
        // 0 -> 1 (outer) -> 2 (inner) -> 3 -> 2, 3 -> 4 -> 1, 1 -> 5
        let forest = detect(6, &[(0, 1), (1, 2), (2, 3), (3, 2), (3, 4), (4, 1), (1, 5)]);
        assert_eq!(forest.len(), 2);
        let outer = forest.loop_for_header(NodeId::new(1)).map(|l| l.depth);
        let inner = forest.loop_for_header(NodeId::new(2));
        assert_eq!(outer, Some(0));
        assert_eq!(inner.map(|l| l.depth), Some(1));
        assert_eq!(inner.and_then(|l| l.parent), Some(NodeId::new(1)));
        assert_eq!(forest.loop_depth(NodeId::new(3)), 2);
        assert_eq!(forest.loop_depth(NodeId::new(4)), 1);
        assert_eq!(forest.loop_depth(NodeId::new(5)), 0);
        let order: Vec<_> = forest.by_depth_descending().iter().map(|l| l.header).collect();
        assert_eq!(order, vec![NodeId::new(2), NodeId::new(1)]);
    }

    #[test]
    fn test_multiple_latches_and_exits() {
        // header 1, latches 2 and 3, exits from 2 and 3 to 4 and 5
        let forest = detect(
            6,
            &[(0, 1), (1, 2), (1, 3), (2, 1), (3, 1), (2, 4), (3, 5)],
        );
        let info = &forest.loops()[0];
        assert_eq!(info.latches, vec![NodeId::new(2), NodeId::new(3)]);
        assert_eq!(info.exit_blocks(), vec![NodeId::new(4), NodeId::new(5)]);
        assert_eq!(info.loop_type, LoopType::Complex);
        assert!(!info.has_single_latch());
    }

    #[test]
    fn test_no_preheader_with_two_entries() {
        let forest = detect(4, &[(0, 1), (0, 2), (1, 2), (2, 3), (3, 2)]);
        let info = forest.loop_for_header(NodeId::new(2));
        assert!(info.is_some_and(|l| l.preheader.is_none()));
    }

    #[test]
    fn test_has_back_edges() {
        let graph = AdjacencyGraph::from_edges(3, &[(0, 1), (1, 2)]);
        let dom = compute_dominators_rooted(&graph);
        assert!(!has_back_edges(&graph, &dom));
    }
}
