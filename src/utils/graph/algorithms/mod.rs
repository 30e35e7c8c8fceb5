//! Traversal orders and dominator trees over the [`graph`](super) views.
//!
//! Loop discovery needs both: a dominator tree to recognise back edges and a
//! reverse postorder to visit blocks in a stable order.

mod dominators;
mod traversal;

pub use dominators::{compute_dominators, compute_dominators_rooted, DominatorIterator, DominatorTree};
pub use traversal::{dfs, postorder, reachable, reverse_postorder, DfsIterator};
