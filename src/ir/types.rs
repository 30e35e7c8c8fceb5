//! Type system of the IR.
//!
//! The IR is deliberately small: first-class values are integers of a fixed
//! width or opaque pointers. Aggregate types only exist as module-level named
//! struct declarations (see [`StructType`]) which describe ABI records such as
//! the capture-cursor layout; they never flow through instructions.

use std::fmt;

use bitflags::bitflags;
use strum::{Display, EnumString, IntoStaticStr};

/// A first-class IR type.
///
/// The textual spelling of every variant matches the one used by the printer
/// and accepted by the parser (`"i32".parse::<Type>()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum Type {
    /// No value. Only valid as a function return type or for instructions
    /// that produce nothing (`store`, void calls).
    #[strum(serialize = "void")]
    Void,
    /// Boolean.
    #[strum(serialize = "i1")]
    I1,
    /// 8-bit integer.
    #[strum(serialize = "i8")]
    I8,
    /// 16-bit integer.
    #[strum(serialize = "i16")]
    I16,
    /// 32-bit integer.
    #[strum(serialize = "i32")]
    I32,
    /// 64-bit integer.
    #[strum(serialize = "i64")]
    I64,
    /// Opaque pointer.
    #[strum(serialize = "ptr")]
    Ptr,
}

impl Type {
    /// Returns the bit width of an integer type, `None` otherwise.
    #[must_use]
    pub const fn bits(self) -> Option<u32> {
        match self {
            Type::I1 => Some(1),
            Type::I8 => Some(8),
            Type::I16 => Some(16),
            Type::I32 => Some(32),
            Type::I64 => Some(64),
            Type::Void | Type::Ptr => None,
        }
    }

    /// Returns `true` for integer types (including `i1`).
    #[must_use]
    pub const fn is_integer(self) -> bool {
        self.bits().is_some()
    }

    /// Returns `true` for the pointer type.
    #[must_use]
    pub const fn is_pointer(self) -> bool {
        matches!(self, Type::Ptr)
    }

    /// Returns `true` if values of this type can be used as operands.
    #[must_use]
    pub const fn is_first_class(self) -> bool {
        !matches!(self, Type::Void)
    }

    /// Truncates `value` to this type's width and sign-extends it back to 64 bits.
    ///
    /// `i1` is the exception: it is kept as `0` or `1` rather than `0` / `-1`.
    #[must_use]
    pub fn normalize(self, value: i64) -> i64 {
        match self.bits() {
            Some(1) => value & 1,
            Some(64) | None => value,
            Some(bits) => {
                let shift = 64 - bits;
                (value << shift) >> shift
            }
        }
    }

    /// Returns the value zero-extended from this type's width.
    #[must_use]
    pub fn zero_extend(self, value: i64) -> i64 {
        match self.bits() {
            Some(64) | None => value,
            Some(bits) => value & ((1i64 << bits) - 1),
        }
    }
}

/// A named aggregate type declared at module level.
///
/// ```text
/// %struct.va_list = type { i32, i32, ptr, ptr }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    /// Name without the leading `%`.
    pub name: String,
    /// Field types in declaration order.
    pub fields: Vec<Type>,
}

impl StructType {
    /// Name of the capture-cursor record type.
    pub const VA_LIST: &'static str = "struct.va_list";

    /// The record mirroring the System V AMD64 `va_list` element:
    ///
    /// ```c
    /// typedef struct {
    ///    unsigned int gp_offset;
    ///    unsigned int fp_offset;
    ///    void *overflow_arg_area;
    ///    void *reg_save_area;
    /// } va_list[1];
    /// ```
    ///
    /// Extracted functions and the repetition driver agree on this layout for
    /// the capture cursor they pass around.
    #[must_use]
    pub fn va_list() -> Self {
        Self {
            name: Self::VA_LIST.to_string(),
            fields: vec![Type::I32, Type::I32, Type::Ptr, Type::Ptr],
        }
    }
}

impl fmt::Display for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{} = type {{ ", self.name)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str(" }")
    }
}

/// Symbol visibility of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Linkage {
    /// Visible to other modules.
    #[default]
    External,
    /// Local to the module, but keeps a symbol table entry.
    Internal,
    /// Local to the module, no symbol table entry.
    Private,
}

bitflags! {
    /// Function attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FnAttrs: u8 {
        /// Never inline this function. Set on extracted functions so later
        /// optimisation cannot fold the loop back into its host.
        const NOINLINE = 0b0000_0001;
        /// The function does not call itself, directly or indirectly.
        const NORECURSE = 0b0000_0010;
        /// Skip optimisation of this function.
        const OPTNONE = 0b0000_0100;
    }
}

impl FnAttrs {
    /// Textual spelling of each attribute, in printing order.
    pub const SPELLINGS: [(FnAttrs, &'static str); 3] = [
        (FnAttrs::NOINLINE, "noinline"),
        (FnAttrs::NORECURSE, "norecurse"),
        (FnAttrs::OPTNONE, "optnone"),
    ];

    /// Looks up a single attribute by its textual spelling.
    #[must_use]
    pub fn from_spelling(word: &str) -> Option<FnAttrs> {
        Self::SPELLINGS
            .iter()
            .find(|(_, spelling)| *spelling == word)
            .map(|(attr, _)| *attr)
    }
}

impl fmt::Display for FnAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (attr, spelling) in Self::SPELLINGS {
            if self.contains(attr) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(spelling)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_spelling_roundtrip() {
        for ty in [Type::Void, Type::I1, Type::I8, Type::I16, Type::I32, Type::I64, Type::Ptr] {
            let text = ty.to_string();
            assert_eq!(text.parse::<Type>().ok(), Some(ty), "{text}");
        }
        assert!("i7".parse::<Type>().is_err());
    }

    #[test]
    fn test_normalize_wraps_to_width() {
        assert_eq!(Type::I8.normalize(255), -1);
        assert_eq!(Type::I8.normalize(128), -128);
        assert_eq!(Type::I32.normalize(i64::from(u32::MAX)), -1);
        assert_eq!(Type::I1.normalize(3), 1);
        assert_eq!(Type::I64.normalize(-5), -5);
        assert_eq!(Type::I8.zero_extend(-1), 255);
    }

    #[test]
    fn test_va_list_layout() {
        let record = StructType::va_list();
        assert_eq!(record.fields, vec![Type::I32, Type::I32, Type::Ptr, Type::Ptr]);
        assert_eq!(record.to_string(), "%struct.va_list = type { i32, i32, ptr, ptr }");
    }

    #[test]
    fn test_fn_attrs_display() {
        assert_eq!(FnAttrs::empty().to_string(), "");
        assert_eq!((FnAttrs::NOINLINE | FnAttrs::OPTNONE).to_string(), "noinline optnone");
        assert_eq!(FnAttrs::from_spelling("norecurse"), Some(FnAttrs::NORECURSE));
        assert_eq!(FnAttrs::from_spelling("cold"), None);
    }
}
