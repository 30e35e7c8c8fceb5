//! Runtime values of the interpreter.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    ir::FuncId,
    runtime::{interp::memory::Pointer, VaList},
};

/// A shared handle to a capture cursor, as seen by `va_arg`.
pub type CursorRef = Rc<RefCell<VaList<RtValue>>>;

/// A value held by an SSA name, a parameter or a memory cell.
#[derive(Debug, Clone)]
pub enum RtValue {
    /// An integer of any width, sign-extended to 64 bits (`i1` is `0`/`1`).
    Int(i64),
    /// An address into interpreter memory.
    Ptr(Pointer),
    /// The address of a function.
    Func(FuncId),
    /// A capture cursor.
    Cursor(CursorRef),
}

impl RtValue {
    /// The null pointer, represented as integer zero.
    pub const NULL: RtValue = RtValue::Int(0);

    /// Integer payload, if any.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RtValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Truth value of an `i1`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        matches!(self, RtValue::Int(v) if *v != 0)
    }

    /// Kind name, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RtValue::Int(_) => "integer",
            RtValue::Ptr(_) => "pointer",
            RtValue::Func(_) => "function",
            RtValue::Cursor(_) => "cursor",
        }
    }
}

impl From<bool> for RtValue {
    fn from(value: bool) -> Self {
        RtValue::Int(i64::from(value))
    }
}

impl PartialEq for RtValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RtValue::Int(a), RtValue::Int(b)) => a == b,
            (RtValue::Ptr(a), RtValue::Ptr(b)) => a == b,
            (RtValue::Func(a), RtValue::Func(b)) => a == b,
            (RtValue::Cursor(a), RtValue::Cursor(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtValue::Int(v) => write!(f, "{v}"),
            RtValue::Ptr(p) => write!(f, "{p}"),
            RtValue::Func(id) => write!(f, "{id:?}"),
            RtValue::Cursor(c) => write!(f, "cursor@{}", c.borrow().position()),
        }
    }
}
