//! Instructions and terminators.
//!
//! A basic block is a list of [`Instruction`]s followed by exactly one
//! [`Terminator`]. Instructions carry their operand types explicitly, the same
//! way the textual form spells them, so the printer never has to consult the
//! defining context of an operand.

use strum::{Display, EnumString, IntoStaticStr};

use crate::ir::{BlockId, Operand, Type, ValueId};

/// Two-operand integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Signed division, traps on zero.
    SDiv,
    /// Unsigned division, traps on zero.
    UDiv,
    /// Signed remainder, traps on zero.
    SRem,
    /// Unsigned remainder, traps on zero.
    URem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Shift left.
    Shl,
    /// Logical shift right.
    LShr,
    /// Arithmetic shift right.
    AShr,
}

impl BinaryOp {
    /// Evaluates the operation on two values of type `ty`.
    ///
    /// Returns `None` for division or remainder by zero.
    #[must_use]
    pub fn eval(self, ty: Type, lhs: i64, rhs: i64) -> Option<i64> {
        let bits = ty.bits().unwrap_or(64);
        let ul = ty.zero_extend(lhs) as u64;
        let ur = ty.zero_extend(rhs) as u64;
        let raw = match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::SDiv => lhs.checked_div(rhs).or_else(|| (rhs == -1).then_some(lhs.wrapping_neg()))?,
            BinaryOp::UDiv => ul.checked_div(ur)? as i64,
            BinaryOp::SRem => lhs.checked_rem(rhs).or_else(|| (rhs == -1).then_some(0))?,
            BinaryOp::URem => ul.checked_rem(ur)? as i64,
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
            BinaryOp::Shl => lhs.wrapping_shl((ur % u64::from(bits)) as u32),
            BinaryOp::LShr => (ul >> (ur % u64::from(bits))) as i64,
            BinaryOp::AShr => lhs.wrapping_shr((ur % u64::from(bits)) as u32),
        };
        Some(ty.normalize(raw))
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum IcmpPred {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less than.
    Slt,
    /// Signed less or equal.
    Sle,
    /// Signed greater than.
    Sgt,
    /// Signed greater or equal.
    Sge,
    /// Unsigned less than.
    Ult,
    /// Unsigned less or equal.
    Ule,
    /// Unsigned greater than.
    Ugt,
    /// Unsigned greater or equal.
    Uge,
}

impl IcmpPred {
    /// Evaluates the comparison on two values of type `ty`.
    #[must_use]
    pub fn eval(self, ty: Type, lhs: i64, rhs: i64) -> bool {
        let ul = ty.zero_extend(lhs) as u64;
        let ur = ty.zero_extend(rhs) as u64;
        match self {
            IcmpPred::Eq => lhs == rhs,
            IcmpPred::Ne => lhs != rhs,
            IcmpPred::Slt => lhs < rhs,
            IcmpPred::Sle => lhs <= rhs,
            IcmpPred::Sgt => lhs > rhs,
            IcmpPred::Sge => lhs >= rhs,
            IcmpPred::Ult => ul < ur,
            IcmpPred::Ule => ul <= ur,
            IcmpPred::Ugt => ul > ur,
            IcmpPred::Uge => ul >= ur,
        }
    }

    /// The predicate that holds exactly when this one does not.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            IcmpPred::Eq => IcmpPred::Ne,
            IcmpPred::Ne => IcmpPred::Eq,
            IcmpPred::Slt => IcmpPred::Sge,
            IcmpPred::Sle => IcmpPred::Sgt,
            IcmpPred::Sgt => IcmpPred::Sle,
            IcmpPred::Sge => IcmpPred::Slt,
            IcmpPred::Ult => IcmpPred::Uge,
            IcmpPred::Ule => IcmpPred::Ugt,
            IcmpPred::Ugt => IcmpPred::Ule,
            IcmpPred::Uge => IcmpPred::Ult,
        }
    }
}

/// Integer width conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CastOp {
    /// Zero extension.
    ZExt,
    /// Sign extension.
    SExt,
    /// Truncation.
    Trunc,
}

impl CastOp {
    /// Converts `value` of type `from` to type `to`.
    #[must_use]
    pub fn eval(self, from: Type, to: Type, value: i64) -> i64 {
        match self {
            CastOp::ZExt => to.normalize(from.zero_extend(value)),
            CastOp::SExt | CastOp::Trunc => to.normalize(value),
        }
    }
}

/// The operation performed by an [`Instruction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstKind {
    /// `alloca T[, i32 N]` - reserves `count` cells of `ty` in the current frame.
    Alloca {
        /// Element type.
        ty: Type,
        /// Number of elements.
        count: u32,
    },
    /// `load T, ptr p`
    Load {
        /// Loaded type.
        ty: Type,
        /// Address.
        ptr: Operand,
    },
    /// `store T v, ptr p`
    Store {
        /// Stored type.
        ty: Type,
        /// Stored value.
        value: Operand,
        /// Address.
        ptr: Operand,
    },
    /// `getelementptr T, ptr base, I index`
    Gep {
        /// Element type stepped over.
        elem: Type,
        /// Base address.
        base: Operand,
        /// Type of the index operand.
        index_ty: Type,
        /// Element index.
        index: Operand,
    },
    /// `op T a, b`
    Binary {
        /// Operation.
        op: BinaryOp,
        /// Operand and result type.
        ty: Type,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// `icmp pred T a, b`
    Icmp {
        /// Predicate.
        pred: IcmpPred,
        /// Operand type.
        ty: Type,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// `op T v to U`
    Cast {
        /// Conversion.
        op: CastOp,
        /// Source type.
        from: Type,
        /// Converted value.
        value: Operand,
        /// Destination type.
        to: Type,
    },
    /// `select i1 c, T a, T b`
    Select {
        /// Result type.
        ty: Type,
        /// Condition.
        cond: Operand,
        /// Result when the condition holds.
        on_true: Operand,
        /// Result otherwise.
        on_false: Operand,
    },
    /// `phi T [v, %pred], ...`
    Phi {
        /// Result type.
        ty: Type,
        /// Value flowing in from each predecessor.
        incoming: Vec<(Operand, BlockId)>,
    },
    /// `call R callee(T a, ...)`
    Call {
        /// Return type.
        ret: Type,
        /// Called function: a [`Operand::Func`] for direct calls, any pointer otherwise.
        callee: Operand,
        /// Typed arguments.
        args: Vec<(Type, Operand)>,
    },
    /// `va_arg ptr cursor, T` - pops the next argument from a capture cursor.
    VaArg {
        /// Type of the argument read.
        ty: Type,
        /// The cursor.
        cursor: Operand,
    },
}

/// An instruction, optionally producing a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The value defined by this instruction, `None` for `store` and void calls.
    pub result: Option<ValueId>,
    /// The operation.
    pub kind: InstKind,
}

impl Instruction {
    /// Creates an instruction.
    #[must_use]
    pub fn new(result: Option<ValueId>, kind: InstKind) -> Self {
        Self { result, kind }
    }

    /// The textual opcode of this instruction.
    #[must_use]
    pub fn opcode(&self) -> &'static str {
        match &self.kind {
            InstKind::Alloca { .. } => "alloca",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Gep { .. } => "getelementptr",
            InstKind::Binary { op, .. } => (*op).into(),
            InstKind::Icmp { .. } => "icmp",
            InstKind::Cast { op, .. } => (*op).into(),
            InstKind::Select { .. } => "select",
            InstKind::Phi { .. } => "phi",
            InstKind::Call { .. } => "call",
            InstKind::VaArg { .. } => "va_arg",
        }
    }

    /// Returns `true` for `phi`.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self.kind, InstKind::Phi { .. })
    }

    /// Returns `true` for `alloca`.
    #[must_use]
    pub fn is_alloca(&self) -> bool {
        matches!(self.kind, InstKind::Alloca { .. })
    }

    /// The type of the defined value, `Type::Void` if nothing is defined.
    #[must_use]
    pub fn result_type(&self) -> Type {
        match &self.kind {
            InstKind::Alloca { .. } | InstKind::Gep { .. } => Type::Ptr,
            InstKind::Load { ty, .. }
            | InstKind::Binary { ty, .. }
            | InstKind::Select { ty, .. }
            | InstKind::Phi { ty, .. }
            | InstKind::VaArg { ty, .. } => *ty,
            InstKind::Icmp { .. } => Type::I1,
            InstKind::Cast { to, .. } => *to,
            InstKind::Call { ret, .. } => *ret,
            InstKind::Store { .. } => Type::Void,
        }
    }

    /// All operands in textual order. Phi incoming blocks are not included.
    #[must_use]
    pub fn operands(&self) -> Vec<Operand> {
        match &self.kind {
            InstKind::Alloca { .. } => Vec::new(),
            InstKind::Load { ptr, .. } => vec![*ptr],
            InstKind::Store { value, ptr, .. } => vec![*value, *ptr],
            InstKind::Gep { base, index, .. } => vec![*base, *index],
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Cast { value, .. } => vec![*value],
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![*cond, *on_true, *on_false],
            InstKind::Phi { incoming, .. } => incoming.iter().map(|(v, _)| *v).collect(),
            InstKind::Call { callee, args, .. } => std::iter::once(*callee)
                .chain(args.iter().map(|(_, a)| *a))
                .collect(),
            InstKind::VaArg { cursor, .. } => vec![*cursor],
        }
    }

    /// Mutable references to all operands, in the same order as [`Instruction::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match &mut self.kind {
            InstKind::Alloca { .. } => Vec::new(),
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { value, ptr, .. } => vec![value, ptr],
            InstKind::Gep { base, index, .. } => vec![base, index],
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![cond, on_true, on_false],
            InstKind::Phi { incoming, .. } => incoming.iter_mut().map(|(v, _)| v).collect(),
            InstKind::Call { callee, args, .. } => std::iter::once(callee)
                .chain(args.iter_mut().map(|(_, a)| a))
                .collect(),
            InstKind::VaArg { cursor, .. } => vec![cursor],
        }
    }

    /// Replaces every occurrence of `from` among the operands with `to`.
    ///
    /// Returns the number of replaced operands.
    pub fn replace_operand(&mut self, from: Operand, to: Operand) -> usize {
        let mut count = 0;
        for op in self.operands_mut() {
            if *op == from {
                *op = to;
                count += 1;
            }
        }
        count
    }

    /// Rewrites phi incoming blocks `from` to `to`. No-op for other instructions.
    pub fn replace_incoming_block(&mut self, from: BlockId, to: BlockId) {
        if let InstKind::Phi { incoming, .. } = &mut self.kind {
            for (_, block) in incoming.iter_mut() {
                if *block == from {
                    *block = to;
                }
            }
        }
    }
}

/// The instruction that ends a basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// `br label %target`
    Br {
        /// Destination.
        target: BlockId,
    },
    /// `br i1 c, label %then, label %else`
    CondBr {
        /// Condition.
        cond: Operand,
        /// Destination when the condition holds.
        then_dest: BlockId,
        /// Destination otherwise.
        else_dest: BlockId,
    },
    /// `switch T v, label %default [ T n, label %dest ... ]`
    Switch {
        /// Type of the scrutinee.
        ty: Type,
        /// Scrutinee.
        value: Operand,
        /// Destination when no case matches.
        default: BlockId,
        /// Case values and their destinations.
        cases: Vec<(i64, BlockId)>,
    },
    /// `ret void` / `ret T v`
    Ret {
        /// Returned value with its type.
        value: Option<(Type, Operand)>,
    },
    /// `unreachable`
    Unreachable,
}

impl Terminator {
    /// The textual opcode.
    #[must_use]
    pub fn opcode(&self) -> &'static str {
        match self {
            Terminator::Br { .. } | Terminator::CondBr { .. } => "br",
            Terminator::Switch { .. } => "switch",
            Terminator::Ret { .. } => "ret",
            Terminator::Unreachable => "unreachable",
        }
    }

    /// Returns `true` for `br` and `switch`, the terminators that only transfer
    /// control within the function.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Terminator::Br { .. } | Terminator::CondBr { .. } | Terminator::Switch { .. }
        )
    }

    /// Successor blocks in textual order. A block reached through several
    /// edges appears once per edge.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br { target } => vec![*target],
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            Terminator::Switch { default, cases, .. } => std::iter::once(*default)
                .chain(cases.iter().map(|(_, b)| *b))
                .collect(),
            Terminator::Ret { .. } | Terminator::Unreachable => Vec::new(),
        }
    }

    /// Successor blocks with duplicates removed, keeping first-occurrence order.
    #[must_use]
    pub fn unique_successors(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        for succ in self.successors() {
            if !out.contains(&succ) {
                out.push(succ);
            }
        }
        out
    }

    /// Mutable references to every successor slot.
    pub fn successors_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            Terminator::Br { target } => vec![target],
            Terminator::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![then_dest, else_dest],
            Terminator::Switch { default, cases, .. } => std::iter::once(default)
                .chain(cases.iter_mut().map(|(_, b)| b))
                .collect(),
            Terminator::Ret { .. } | Terminator::Unreachable => Vec::new(),
        }
    }

    /// Redirects every edge to `from` so that it targets `to` instead.
    ///
    /// Returns `true` if at least one edge was redirected.
    pub fn replace_successor(&mut self, from: BlockId, to: BlockId) -> bool {
        let mut changed = false;
        for slot in self.successors_mut() {
            if *slot == from {
                *slot = to;
                changed = true;
            }
        }
        changed
    }

    /// Value operands of the terminator.
    #[must_use]
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Terminator::CondBr { cond, .. } => vec![*cond],
            Terminator::Switch { value, .. } => vec![*value],
            Terminator::Ret { value: Some((_, v)) } => vec![*v],
            _ => Vec::new(),
        }
    }

    /// Mutable references to the value operands.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Terminator::CondBr { cond, .. } => vec![cond],
            Terminator::Switch { value, .. } => vec![value],
            Terminator::Ret { value: Some((_, v)) } => vec![v],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_eval_wraps() {
        assert_eq!(BinaryOp::Add.eval(Type::I8, 127, 1), Some(-128));
        assert_eq!(BinaryOp::Mul.eval(Type::I32, 65536, 65536), Some(0));
        assert_eq!(BinaryOp::SDiv.eval(Type::I32, 7, 0), None);
        assert_eq!(BinaryOp::SDiv.eval(Type::I32, -7, 2), Some(-3));
        assert_eq!(BinaryOp::SRem.eval(Type::I32, -7, 2), Some(-1));
        assert_eq!(BinaryOp::UDiv.eval(Type::I8, -1, 2), Some(127));
        assert_eq!(BinaryOp::LShr.eval(Type::I8, -128, 7), Some(1));
        assert_eq!(BinaryOp::AShr.eval(Type::I8, -128, 7), Some(-1));
        assert_eq!(BinaryOp::Xor.eval(Type::I1, 1, 1), Some(0));
    }

    #[test]
    fn test_icmp_signedness() {
        assert!(IcmpPred::Slt.eval(Type::I32, -1, 0));
        assert!(!IcmpPred::Ult.eval(Type::I32, -1, 0));
        for pred in [IcmpPred::Eq, IcmpPred::Slt, IcmpPred::Uge] {
            assert_ne!(pred.eval(Type::I32, 3, 4), pred.inverse().eval(Type::I32, 3, 4));
        }
        assert_eq!("sle".parse::<IcmpPred>().ok(), Some(IcmpPred::Sle));
        assert_eq!(BinaryOp::SDiv.to_string(), "sdiv");
        assert_eq!(BinaryOp::LShr.to_string(), "lshr");
    }

    #[test]
    fn test_casts() {
        assert_eq!(CastOp::ZExt.eval(Type::I8, Type::I32, -1), 255);
        assert_eq!(CastOp::SExt.eval(Type::I8, Type::I32, -1), -1);
        assert_eq!(CastOp::Trunc.eval(Type::I32, Type::I8, 511), -1);
        assert_eq!(CastOp::ZExt.eval(Type::I1, Type::I32, 1), 1);
    }

    #[test]
    fn test_terminator_edges() {
        let a = BlockId::new(1);
        let b = BlockId::new(2);
        let mut term = Terminator::Switch {
            ty: Type::I32,
            value: Operand::Arg(0),
            default: a,
            cases: vec![(0, b), (1, a)],
        };
        assert_eq!(term.successors(), vec![a, b, a]);
        assert_eq!(term.unique_successors(), vec![a, b]);
        assert!(term.replace_successor(a, b));
        assert_eq!(term.unique_successors(), vec![b]);
        assert!(!Terminator::Unreachable.is_branch());
    }

    #[test]
    fn test_replace_operand_counts() {
        let v = Operand::Value(ValueId::new(0));
        let mut inst = Instruction::new(
            Some(ValueId::new(1)),
            InstKind::Binary {
                op: BinaryOp::Add,
                ty: Type::I32,
                lhs: v,
                rhs: v,
            },
        );
        assert_eq!(inst.replace_operand(v, Operand::Arg(0)), 2);
        assert_eq!(inst.operands(), vec![Operand::Arg(0), Operand::Arg(0)]);
        assert_eq!(inst.opcode(), "add");
    }
}
