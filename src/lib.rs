// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0


#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # lambdaize
//!
//! A loop-to-closure obfuscation pass. Every eligible loop of a module is
//! replaced by an out-of-line function running one iteration and returning a
//! continue/stop signal, plus a call to a runtime repetition driver,
//! `looper`, that keeps calling it. After the rewrite the host function has
//! no back edge left; the iteration lives in a fixed-point combinator.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lambdaize::prelude::*;
//!
//! let source = std::fs::read_to_string("sum.ll")?;
//! let mut module = Module::parse(&source)?;
//!
//! let config = LambdaizeConfig::default().with_transform_all(true);
//! let events = EventLog::new();
//! let mut pass = LambdaizePass::new(config);
//! pass.initialize(&module)?;
//! if pass.run(&mut module, &events)? {
//!     verify_module(&module)?;
//!     print!("{}", print_module(&module));
//! }
//! # Ok::<(), lambdaize::Error>(())
//! ```
//!
//! Loops are opted in with loop metadata on the latch terminator:
//!
//! ```text
//! br i1 %done, label %exit, label %loop, !llvm.loop !0
//! !0 = distinct !{!0, !1}
//! !1 = !{!"lambdaizeloop"}
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - SSA IR: types, operands, blocks, functions, modules, builder,
//!   textual parser and printer, verifier
//! - [`analysis`] - CFG snapshots, the natural loop forest, capture sets and
//!   complexity metrics
//! - [`transform`] - CFG canonicalisation and the lambdaize pass itself
//! - [`compiler`] - pass trait, registry, pipelines and the event log
//! - [`runtime`] - the repetition driver and a reference interpreter
//! - [`utils`] - generic graph algorithms
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Repetition driver
//!
//! ```rust
//! use lambdaize::runtime::{DriverStrategy, Looper, VaList};
//!
//! let mut n = 0;
//! let report = Looper::new(DriverStrategy::MultipleArguments, 512).run(
//!     |_cursor: VaList<()>| -> Result<bool, ()> {
//!         n += 1;
//!         Ok(n < 10_000)
//!     },
//!     VaList::new(Vec::new()),
//! )?;
//! assert_eq!(report.iterations, 10_000);
//! assert_eq!(report.max_depth, 512);
//! # Ok::<(), ()>(())
//! ```

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,no_run
/// use lambdaize::prelude::*;
///
/// let module = Module::parse("define void @f() {\nentry:\n  ret void\n}\n")?;
/// verify_module(&module)?;
/// # Ok::<(), lambdaize::Error>(())
/// ```
pub mod prelude;

pub mod analysis;
pub mod compiler;
pub mod ir;
pub mod runtime;
pub mod transform;
pub mod utils;

/// `lambdaize` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `lambdaize` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for
/// the variants.
pub use error::Error;
