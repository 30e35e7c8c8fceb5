//! Metadata nodes.
//!
//! Only the subset needed for loop annotations is modelled:
//!
//! ```text
//! br label %header, !llvm.loop !0
//! !0 = distinct !{!0, !1}
//! !1 = !{!"lambdaizeloop"}
//! ```
//!
//! A loop node's first operand is a reference to itself; the remaining
//! operands are property nodes (or, for compactness, bare strings).

use crate::ir::MdId;

/// One operand of a metadata node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdOperand {
    /// Reference to another node, `!N`.
    Node(MdId),
    /// String, `!"text"`.
    String(String),
    /// Typed integer, `i32 4`.
    Int(i64),
}

/// A metadata node, `!{...}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MdNode {
    /// Nodes marked `distinct` are never merged with structurally equal ones.
    pub distinct: bool,
    /// Operands in order.
    pub operands: Vec<MdOperand>,
}

impl MdNode {
    /// Creates a node with the given operands.
    #[must_use]
    pub fn new(operands: Vec<MdOperand>) -> Self {
        Self {
            distinct: false,
            operands,
        }
    }

    /// Returns the leading string of a property node such as `!{!"name", ...}`.
    #[must_use]
    pub fn property_name(&self) -> Option<&str> {
        match self.operands.first() {
            Some(MdOperand::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}
