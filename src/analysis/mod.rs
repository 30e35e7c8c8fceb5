//! Program analyses over the IR.
//!
//! - [`cfg`] - Control flow graph snapshots and natural loop detection
//! - [`capture`] - Values a group of blocks reads from its surroundings
//! - [`metrics`] - Cyclomatic complexity
//!
//! Analyses never modify the IR. Their results describe the function at the
//! time they ran and are recomputed after every transformation.

pub mod capture;
pub mod cfg;
pub mod metrics;

pub use capture::capture_set;
pub use cfg::{detect_loops, find_loop, FunctionCfg, LoopExit, LoopForest, LoopInfo, LoopRegion, LoopType};
pub use metrics::{cyclomatic_complexity, ComplexityReport};
