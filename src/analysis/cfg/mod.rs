//! Control flow graph view over IR functions.
//!
//! [`FunctionCfg`] is an immutable snapshot of a [`Function`]'s block graph.
//! Live blocks are numbered densely in layout order, so the entry block is
//! always node `0`; the snapshot implements the generic graph traits from
//! [`crate::utils::graph`] so that traversal orders, dominators and loop
//! detection run on it directly.
//!
//! A snapshot does not track later mutations of the function. Transformations
//! rebuild it after every change of the block graph.
//!
//! # Examples
//!
//! ```rust,ignore
//! use lambdaize::analysis::cfg::{detect_loops, FunctionCfg};
//!
//! let cfg = FunctionCfg::new(&function);
//! let dominators = cfg.dominators();
//! let forest = detect_loops(&cfg, &dominators);
//! for info in forest.by_depth_descending() {
//!     println!("loop at {}", cfg.block_id(info.header));
//! }
//! ```

mod loops;

use std::collections::HashMap;

pub use loops::{detect_loops, has_back_edges, LoopExit, LoopForest, LoopInfo, LoopType};

use crate::{
    ir::{BlockId, Function},
    utils::graph::{
        algorithms::{compute_dominators, reverse_postorder, DominatorTree},
        GraphBase, NodeId, Predecessors, RootedGraph, Successors,
    },
};

/// Snapshot of the control flow graph of one function.
#[derive(Debug, Clone)]
pub struct FunctionCfg {
    blocks: Vec<BlockId>,
    nodes: HashMap<BlockId, NodeId>,
    succs: Vec<Vec<NodeId>>,
    preds: Vec<Vec<NodeId>>,
}

impl FunctionCfg {
    /// Builds the graph of `function`'s live blocks.
    ///
    /// Edges to blocks that are not in the layout are dropped; the verifier
    /// reports them separately.
    #[must_use]
    pub fn new(function: &Function) -> Self {
        let blocks: Vec<BlockId> = function.layout().to_vec();
        let nodes: HashMap<BlockId, NodeId> = blocks
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, NodeId::new(i)))
            .collect();

        let mut succs = vec![Vec::new(); blocks.len()];
        let mut preds = vec![Vec::new(); blocks.len()];
        for (i, &block) in blocks.iter().enumerate() {
            let Some(data) = function.block(block) else {
                continue;
            };
            for succ in data.successors() {
                if let Some(&target) = nodes.get(&succ) {
                    succs[i].push(target);
                    preds[target.index()].push(NodeId::new(i));
                }
            }
        }

        Self {
            blocks,
            nodes,
            succs,
            preds,
        }
    }

    /// The block behind a node.
    ///
    /// # Panics
    ///
    /// Panics if `node` does not belong to this graph.
    #[must_use]
    pub fn block_id(&self, node: NodeId) -> BlockId {
        self.blocks[node.index()]
    }

    /// The node of a block, `None` if the block was not live when the
    /// snapshot was taken.
    #[must_use]
    pub fn node(&self, block: BlockId) -> Option<NodeId> {
        self.nodes.get(&block).copied()
    }

    /// Returns `true` if the graph has no nodes (a declaration).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of edges, counting parallel edges once.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.succs.iter().map(Vec::len).sum()
    }

    /// Computes the dominator tree rooted at the entry block.
    #[must_use]
    pub fn dominators(&self) -> DominatorTree {
        compute_dominators(self, NodeId::new(0))
    }

    /// Detects the natural loops of the function.
    #[must_use]
    pub fn loops(&self) -> LoopForest {
        if self.is_empty() {
            return LoopForest::default();
        }
        detect_loops(self, &self.dominators())
    }

    /// Translates a detected loop into block handles.
    #[must_use]
    pub fn region(&self, info: &LoopInfo) -> LoopRegion {
        LoopRegion {
            header: self.block_id(info.header),
            blocks: info.body.iter().map(|&n| self.block_id(n)).collect(),
            latches: info.latches.iter().map(|&n| self.block_id(n)).collect(),
            preheader: info.preheader.map(|n| self.block_id(n)),
            exits: info
                .exits
                .iter()
                .map(|e| (self.block_id(e.exiting_block), self.block_id(e.exit_block)))
                .collect(),
            depth: info.depth,
            children: info.children.iter().map(|&n| self.block_id(n)).collect(),
        }
    }

    /// Blocks in reverse postorder from the entry. Unreachable blocks are
    /// omitted.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        if self.is_empty() {
            return Vec::new();
        }
        reverse_postorder(self, NodeId::new(0))
            .into_iter()
            .map(|n| self.block_id(n))
            .collect()
    }
}

/// A loop of one function, in block handles.
///
/// Unlike [`LoopInfo`] a region stays meaningful after the snapshot it was
/// computed from is dropped, as long as the function's block graph is not
/// changed. Transformations recompute it with [`find_loop`] after each edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRegion {
    /// The loop header.
    pub header: BlockId,
    /// Member blocks in layout order.
    pub blocks: Vec<BlockId>,
    /// Sources of back edges.
    pub latches: Vec<BlockId>,
    /// The single outside predecessor of the header, if any.
    pub preheader: Option<BlockId>,
    /// Exit edges as `(exiting, exit)`.
    pub exits: Vec<(BlockId, BlockId)>,
    /// Nesting depth, `0` for outermost loops.
    pub depth: usize,
    /// Headers of directly nested loops.
    pub children: Vec<BlockId>,
}

impl LoopRegion {
    /// Returns `true` if `block` belongs to the loop.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// Distinct exit blocks in order of first appearance.
    #[must_use]
    pub fn exit_blocks(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        for &(_, exit) in &self.exits {
            if !out.contains(&exit) {
                out.push(exit);
            }
        }
        out
    }

    /// Distinct exiting blocks in order of first appearance.
    #[must_use]
    pub fn exiting_blocks(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        for &(exiting, _) in &self.exits {
            if !out.contains(&exiting) {
                out.push(exiting);
            }
        }
        out
    }
}

/// Finds the loop headed by `header` in the current state of `function`.
#[must_use]
pub fn find_loop(function: &Function, header: BlockId) -> Option<LoopRegion> {
    let cfg = FunctionCfg::new(function);
    let node = cfg.node(header)?;
    let forest = cfg.loops();
    forest.loop_for_header(node).map(|info| cfg.region(info))
}

impl GraphBase for FunctionCfg {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.blocks.len()).map(NodeId::new)
    }
}

impl Successors for FunctionCfg {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.succs[node.index()].iter().copied()
    }
}

impl Predecessors for FunctionCfg {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.preds[node.index()].iter().copied()
    }
}

impl RootedGraph for FunctionCfg {
    fn entry(&self) -> NodeId {
        NodeId::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::Module, Result};

    const DIAMOND: &str = r"
define void @f(i1 %c) {
entry:
  br i1 %c, label %left, label %right
left:
  br label %join
right:
  br label %join
join:
  ret void
}
";

    #[test]
    fn test_snapshot_edges() -> Result<()> {
        let module = Module::parse(DIAMOND)?;
        let f = module.function(module.defined_functions()[0]).ok_or_else(|| malformed_error!("no function"))?;
        let cfg = FunctionCfg::new(f);
        assert_eq!(cfg.node_count(), 4);
        assert_eq!(cfg.edge_count(), 4);
        let join = f.block_by_name("join").ok_or_else(|| malformed_error!("no join"))?;
        let node = cfg.node(join).ok_or_else(|| malformed_error!("no node"))?;
        assert_eq!(cfg.predecessors(node).count(), 2);
        assert_eq!(cfg.block_id(node), join);
        Ok(())
    }

    #[test]
    fn test_region_uses_block_handles() -> Result<()> {
        let module = Module::parse(
            r"
define void @f(i32 %n) {
entry:
  br label %head
head:
  %i = phi i32 [ 0, %entry ], [ %next, %body ]
  %c = icmp slt i32 %i, %n
  br i1 %c, label %body, label %done
body:
  %next = add i32 %i, 1
  br label %head
done:
  ret void
}
",
        )?;
        let f = module.function(module.defined_functions()[0]).ok_or_else(|| malformed_error!("no function"))?;
        let id = |name: &str| f.block_by_name(name).ok_or_else(|| malformed_error!("no block {}", name));
        let region = find_loop(f, id("head")?).ok_or_else(|| malformed_error!("no loop"))?;
        assert_eq!(region.blocks, vec![id("head")?, id("body")?]);
        assert_eq!(region.latches, vec![id("body")?]);
        assert_eq!(region.preheader, Some(id("entry")?));
        assert_eq!(region.exit_blocks(), vec![id("done")?]);
        assert_eq!(region.exiting_blocks(), vec![id("head")?]);
        assert!(find_loop(f, id("body")?).is_none());
        Ok(())
    }

    #[test]
    fn test_dominators_and_order() -> Result<()> {
        let module = Module::parse(DIAMOND)?;
        let f = module.function(module.defined_functions()[0]).ok_or_else(|| malformed_error!("no function"))?;
        let cfg = FunctionCfg::new(f);
        let dom = cfg.dominators();
        let entry = NodeId::new(0);
        let join = NodeId::new(3);
        assert_eq!(dom.immediate_dominator(join), Some(entry));
        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo.first(), f.entry().as_ref());
        assert_eq!(rpo.last().map(|b| f[*b].name.as_str()), Some("join"));
        Ok(())
    }
}
