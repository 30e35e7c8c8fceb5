//! Runtime support for lambdaized programs.
//!
//! - [`Looper`] - The repetition driver behind `@looper`
//! - [`VaList`] - The capture cursor handed to extracted functions
//! - [`fix`] - The fixed-point combinator the driver recurses through
//! - [`interp`] - A reference interpreter for the IR, used to check that a
//!   transformed module computes what the original did

mod combinator;
pub mod interp;
mod looper;
mod valist;

pub use combinator::fix;
pub use interp::{run_function, Execution, Interpreter, RtValue, DEFAULT_STEP_LIMIT};
pub use looper::{DriveReport, Looper};
pub use valist::VaList;

use strum::{Display, EnumString, IntoStaticStr};

/// Recursion depth at which the driver switches from recursion to iteration.
pub const DEFAULT_MAX_RECURSION: usize = 512;

/// How the repetition driver is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum DriverStrategy {
    /// A plain loop, no recursion at all.
    Iterative,
    /// Fixed-point recursion over a single curried state argument; the loopee
    /// is captured by the step.
    OneArgument,
    /// Fixed-point recursion forwarding loopee, cursor and depth on every step.
    #[default]
    MultipleArguments,
}
