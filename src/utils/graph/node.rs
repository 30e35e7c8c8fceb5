//! Dense node ids.

use std::fmt;

/// Index of a node in a graph view.
///
/// A graph of `n` nodes uses the ids `0..n`, so per-node analysis state lives
/// in vectors indexed by [`NodeId::index`]. A [`FunctionCfg`] maps block ids
/// onto node ids in layout order.
///
/// [`FunctionCfg`]: crate::analysis::cfg::FunctionCfg
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Wraps a raw index.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// The raw index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}
