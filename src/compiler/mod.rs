//! Pass infrastructure.
//!
//! - [`ModulePass`] - interface of every module transformation
//! - [`PassRegistry`] - maps pass names to factories and parses pipeline text
//! - [`PassPipeline`] - an ordered list of passes run over one module
//! - [`EventLog`] - change tracking and diagnostics shared by all passes
//!
//! # Example
//!
//! ```rust,no_run
//! use lambdaize::{compiler::{EventLog, PassRegistry}, ir::Module, transform::LambdaizeConfig};
//!
//! let mut module = Module::parse(&std::fs::read_to_string("input.ll")?)?;
//! let registry = PassRegistry::with_defaults(&LambdaizeConfig::default());
//! let mut pipeline = registry.parse_pipeline("lambdaize-loop,verify")?;
//! let events = EventLog::new();
//! let changed = pipeline.run(&mut module, &events)?;
//! println!("changed: {changed}\n{}", events.summary());
//! # Ok::<(), lambdaize::Error>(())
//! ```

mod events;
mod pass;
mod registry;
mod verify;

pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::ModulePass;
pub use registry::{PassFactory, PassPipeline, PassRegistry};
pub use verify::VerifyPass;
