//! Handles and operands.
//!
//! Every entity of the IR is addressed through a small copyable handle into
//! an arena owned by its parent: [`ValueId`] and [`BlockId`] index into a
//! [`Function`](crate::ir::Function), [`FuncId`], [`GlobalId`] and [`MdId`]
//! index into a [`Module`](crate::ir::Module). Handles are allocation-order
//! identities; names attached to them are cosmetic and only used by the
//! printer.

use std::fmt;

use crate::ir::Type;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates a handle from a raw arena index.
            #[must_use]
            #[inline]
            #[allow(clippy::cast_possible_truncation)]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Returns the raw arena index.
            #[must_use]
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Handle of an instruction result within a function.
    ValueId,
    "v"
);
arena_id!(
    /// Handle of a basic block within a function.
    BlockId,
    "bb"
);
arena_id!(
    /// Handle of a function within a module.
    FuncId,
    "fn"
);
arena_id!(
    /// Handle of a global variable within a module.
    GlobalId,
    "g"
);
arena_id!(
    /// Handle of a metadata node within a module.
    MdId,
    "md"
);

/// An integer or pointer constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constant {
    /// Type of the constant.
    pub ty: Type,
    /// Value, normalised to the width of `ty`. `null` is a `ptr` constant of `0`.
    pub value: i64,
}

impl Constant {
    /// An integer constant, wrapped to the width of `ty`.
    #[must_use]
    pub fn int(ty: Type, value: i64) -> Self {
        Self {
            ty,
            value: ty.normalize(value),
        }
    }

    /// An `i1` constant.
    #[must_use]
    pub const fn bool(value: bool) -> Self {
        Self {
            ty: Type::I1,
            value: value as i64,
        }
    }

    /// The null pointer.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ty: Type::Ptr,
            value: 0,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Type::I1 => f.write_str(if self.value != 0 { "true" } else { "false" }),
            Type::Ptr if self.value == 0 => f.write_str("null"),
            _ => write!(f, "{}", self.value),
        }
    }
}

/// An instruction operand.
///
/// Block targets of terminators and phi incoming blocks are *not* operands;
/// they are stored as [`BlockId`]s next to the operands that flow along them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// The result of an instruction of the enclosing function.
    Value(ValueId),
    /// A parameter of the enclosing function, by position.
    Arg(u32),
    /// A literal.
    Const(Constant),
    /// The address of a global variable.
    Global(GlobalId),
    /// The address of a function.
    Func(FuncId),
    /// A placeholder for a value that is never inspected.
    Poison(Type),
}

impl Operand {
    /// Shorthand for an integer constant operand.
    #[must_use]
    pub fn int(ty: Type, value: i64) -> Self {
        Operand::Const(Constant::int(ty, value))
    }

    /// Shorthand for an `i1` constant operand.
    #[must_use]
    pub const fn bool(value: bool) -> Self {
        Operand::Const(Constant::bool(value))
    }

    /// Returns the instruction result this operand refers to, if any.
    #[must_use]
    pub const fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the constant payload, if any.
    #[must_use]
    pub const fn as_const(&self) -> Option<Constant> {
        match self {
            Operand::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Returns `true` for operands whose value depends on the enclosing
    /// function's frame (instruction results and parameters).
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Operand::Value(_) | Operand::Arg(_))
    }
}

impl From<ValueId> for Operand {
    fn from(id: ValueId) -> Self {
        Operand::Value(id)
    }
}

impl From<Constant> for Operand {
    fn from(c: Constant) -> Self {
        Operand::Const(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_wraps() {
        assert_eq!(Constant::int(Type::I8, 300).value, 44);
        assert_eq!(Constant::int(Type::I1, 2).value, 0);
        assert_eq!(Constant::bool(true).to_string(), "true");
        assert_eq!(Constant::null().to_string(), "null");
        assert_eq!(Constant::int(Type::I32, -7).to_string(), "-7");
    }

    #[test]
    fn test_operand_helpers() {
        let v = Operand::from(ValueId::new(3));
        assert_eq!(v.as_value(), Some(ValueId::new(3)));
        assert!(v.is_local());
        assert!(Operand::Arg(0).is_local());
        assert!(!Operand::int(Type::I32, 1).is_local());
        assert!(!Operand::Func(FuncId::new(0)).is_local());
        assert_eq!(format!("{:?}", BlockId::new(2)), "bb2");
    }
}
