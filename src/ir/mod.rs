//! The intermediate representation transformed by this crate.
//!
//! A small, typed, SSA-style IR modelled on LLVM's textual form. It has just
//! enough surface for loop-shaped control flow: integer arithmetic,
//! comparisons, stack slots, calls (including variadic ones), capture cursors
//! (`va_arg`) and `!llvm.loop` metadata.
//!
//! # Key Components
//!
//! - [`Module`] / [`Function`] / [`Block`] - Ownership hierarchy; entities are addressed by handles
//! - [`Instruction`] / [`Terminator`] / [`Operand`] - Instruction set
//! - [`Builder`] - Appends instructions to a block
//! - [`print_module`] / [`Module::parse`] - Textual form
//! - [`verify_module`] - Structural and dominance checks
//!
//! # Textual form
//!
//! ```text
//! define i32 @sum() {
//! entry:
//!   br label %loop
//! loop:
//!   %i = phi i32 [ 1, %entry ], [ %i.next, %loop ]
//!   %i.next = add i32 %i, 1
//!   %done = icmp sgt i32 %i.next, 10
//!   br i1 %done, label %exit, label %loop, !llvm.loop !0
//! exit:
//!   ret i32 %i.next
//! }
//! !0 = distinct !{!0, !1}
//! !1 = !{!"lambdaizeloop"}
//! ```

mod block;
mod builder;
mod function;
mod instruction;
pub mod lexer;
mod metadata;
mod module;
mod parser;
mod printer;
mod types;
mod value;
mod verify;

pub use block::Block;
pub use builder::Builder;
pub use function::{Function, Param, ValueData};
pub use instruction::{BinaryOp, CastOp, IcmpPred, InstKind, Instruction, Terminator};
pub use metadata::{MdNode, MdOperand};
pub use module::{Global, Module, ModuleSnapshot};
pub use parser::parse_module;
pub use printer::{print_function, print_module};
pub use types::{FnAttrs, Linkage, StructType, Type};
pub use value::{BlockId, Constant, FuncId, GlobalId, MdId, Operand, ValueId};
pub use verify::{verify_function, verify_module};
