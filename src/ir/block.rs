//! Basic blocks.

use crate::ir::{Instruction, MdId, Terminator, ValueId};

/// A straight-line sequence of instructions ending in one terminator.
///
/// Phi instructions, if any, form a prefix of [`Block::insts`]. A block under
/// construction may lack its terminator; the verifier rejects such blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Label, unique within the function.
    pub name: String,
    /// Non-terminator instructions.
    pub insts: Vec<Instruction>,
    /// The terminator, once set.
    pub terminator: Option<Terminator>,
    /// Loop metadata attached to the terminator (`!llvm.loop`).
    pub loop_md: Option<MdId>,
}

impl Block {
    /// Creates an empty block.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            insts: Vec::new(),
            terminator: None,
            loop_md: None,
        }
    }

    /// Number of leading phi instructions.
    #[must_use]
    pub fn phi_count(&self) -> usize {
        self.insts.iter().take_while(|i| i.is_phi()).count()
    }

    /// The leading phi instructions.
    #[must_use]
    pub fn phis(&self) -> &[Instruction] {
        &self.insts[..self.phi_count()]
    }

    /// Values defined by this block, in order.
    pub fn defined_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.insts.iter().filter_map(|i| i.result)
    }

    /// Successors of the terminator, deduplicated. Empty without terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<crate::ir::BlockId> {
        self.terminator
            .as_ref()
            .map(Terminator::unique_successors)
            .unwrap_or_default()
    }
}
