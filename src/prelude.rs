//! # lambdaize Prelude
//!
//! The types needed to parse a module, run the pass over it and execute the
//! result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all lambdaize operations
pub use crate::Error;

/// The result type used throughout lambdaize
pub use crate::Result;

// ================================================================================================
// IR
// ================================================================================================

pub use crate::ir::{
    parse_module, print_function, print_module, verify_module, Block, BlockId, Builder, FuncId,
    Function, InstKind, Module, Operand, Terminator, Type, ValueId,
};

// ================================================================================================
// Analysis
// ================================================================================================

pub use crate::analysis::{
    capture_set, cyclomatic_complexity, find_loop, ComplexityReport, FunctionCfg, LoopRegion,
};

// ================================================================================================
// Transformation
// ================================================================================================

pub use crate::transform::{
    Eligibility, ExtractionStyle, LambdaizeConfig, LambdaizePass, SkipReason,
};

pub use crate::compiler::{
    DerivedStats, EventKind, EventLog, ModulePass, PassPipeline, PassRegistry,
};

// ================================================================================================
// Runtime
// ================================================================================================

pub use crate::runtime::{
    fix, run_function, DriveReport, DriverStrategy, Execution, Interpreter, Looper, VaList,
};
