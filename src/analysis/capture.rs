//! Capture-set analysis.
//!
//! The capture set of a group of blocks is every frame-local value the blocks
//! read but do not define: function parameters and instruction results from
//! outside the group. Constants, globals, function addresses and poison are
//! position independent and never captured; block targets are not operands.
//!
//! The result is ordered by a stable key (parameters by position, then
//! instruction results by handle) and free of duplicates, so running the
//! analysis twice over the same blocks yields the same sequence.

use std::collections::{BTreeSet, HashSet};

use crate::ir::{Block, Operand, ValueId};

/// Sort key of a captured operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CaptureKey {
    Arg(u32),
    Value(ValueId),
}

impl CaptureKey {
    fn operand(self) -> Operand {
        match self {
            CaptureKey::Arg(i) => Operand::Arg(i),
            CaptureKey::Value(v) => Operand::Value(v),
        }
    }
}

/// Computes the ordered capture set of `blocks`.
///
/// # Examples
///
/// ```rust,ignore
/// let captures = capture_set(isolated.blocks());
/// assert!(captures.iter().all(Operand::is_local));
/// ```
pub fn capture_set<'b>(blocks: impl IntoIterator<Item = &'b Block> + Clone) -> Vec<Operand> {
    let defined: HashSet<ValueId> = blocks
        .clone()
        .into_iter()
        .flat_map(Block::defined_values)
        .collect();

    let mut keys = BTreeSet::new();
    for block in blocks {
        let term_ops = block.terminator.iter().flat_map(|t| t.operands());
        for op in block.insts.iter().flat_map(|i| i.operands()).chain(term_ops) {
            match op {
                Operand::Arg(i) => {
                    keys.insert(CaptureKey::Arg(i));
                }
                Operand::Value(v) if !defined.contains(&v) => {
                    keys.insert(CaptureKey::Value(v));
                }
                _ => {}
            }
        }
    }
    keys.into_iter().map(CaptureKey::operand).collect()
}
