//! Instruction builder.
//!
//! [`Builder`] appends instructions to a block of a [`Function`], allocating
//! result handles as it goes. Phis are always inserted after the existing phi
//! prefix of the block so that the block stays well-formed.
//!
//! # Examples
//!
//! ```rust,ignore
//! let mut f = Function::new("count", Type::I32, vec![Param::named(Type::I32, "n")]);
//! let entry = f.add_block("entry");
//! let mut b = Builder::at_end(&mut f, entry);
//! let twice = b.binary(BinaryOp::Add, Type::I32, Operand::Arg(0), Operand::Arg(0), Some("twice"));
//! b.ret(Some((Type::I32, twice.into())));
//! ```

use crate::ir::{
    BinaryOp, BlockId, CastOp, Function, IcmpPred, InstKind, Instruction, Operand, Terminator, Type,
    ValueId,
};

/// Appends or inserts instructions into one block.
pub struct Builder<'f> {
    func: &'f mut Function,
    block: BlockId,
    at: Option<usize>,
}

impl<'f> Builder<'f> {
    /// A builder appending to the end of `block` (before its terminator).
    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        Self {
            func,
            block,
            at: None,
        }
    }

    /// A builder inserting before the instruction at `index` of `block`.
    pub fn before(func: &'f mut Function, block: BlockId, index: usize) -> Self {
        Self {
            func,
            block,
            at: Some(index),
        }
    }

    /// A builder inserting after the phi prefix of `block`.
    pub fn after_phis(func: &'f mut Function, block: BlockId) -> Self {
        let index = func.block(block).map_or(0, |b| b.phi_count());
        Self::before(func, block, index)
    }

    /// The block being built.
    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// The function being built.
    pub fn function(&mut self) -> &mut Function {
        self.func
    }

    /// Moves to the end of another block.
    pub fn position_at_end(&mut self, block: BlockId) {
        self.block = block;
        self.at = None;
    }

    fn insert(&mut self, inst: Instruction) {
        let Some(block) = self.func.block_mut(self.block) else {
            return;
        };
        match self.at.as_mut() {
            Some(index) => {
                let pos = (*index).min(block.insts.len());
                block.insts.insert(pos, inst);
                *index = pos + 1;
            }
            None => block.insts.push(inst),
        }
    }

    /// Emits an instruction producing a value of `kind`'s result type.
    pub fn emit(&mut self, kind: InstKind, name: Option<&str>) -> ValueId {
        let probe = Instruction::new(None, kind);
        let id = self.func.new_value(probe.result_type(), name);
        self.insert(Instruction::new(Some(id), probe.kind));
        id
    }

    /// Emits an instruction without result.
    pub fn emit_void(&mut self, kind: InstKind) {
        self.insert(Instruction::new(None, kind));
    }

    /// `alloca ty, i32 count`
    pub fn alloca(&mut self, ty: Type, count: u32, name: Option<&str>) -> ValueId {
        self.emit(InstKind::Alloca { ty, count }, name)
    }

    /// `load ty, ptr p`
    pub fn load(&mut self, ty: Type, ptr: Operand, name: Option<&str>) -> ValueId {
        self.emit(InstKind::Load { ty, ptr }, name)
    }

    /// `store ty value, ptr p`
    pub fn store(&mut self, ty: Type, value: Operand, ptr: Operand) {
        self.emit_void(InstKind::Store { ty, value, ptr });
    }

    /// `getelementptr elem, ptr base, i64 index`
    pub fn gep(&mut self, elem: Type, base: Operand, index: Operand, name: Option<&str>) -> ValueId {
        self.emit(
            InstKind::Gep {
                elem,
                base,
                index_ty: Type::I64,
                index,
            },
            name,
        )
    }

    /// Two-operand arithmetic.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
        name: Option<&str>,
    ) -> ValueId {
        self.emit(InstKind::Binary { op, ty, lhs, rhs }, name)
    }

    /// `icmp pred ty lhs, rhs`
    pub fn icmp(
        &mut self,
        pred: IcmpPred,
        ty: Type,
        lhs: Operand,
        rhs: Operand,
        name: Option<&str>,
    ) -> ValueId {
        self.emit(InstKind::Icmp { pred, ty, lhs, rhs }, name)
    }

    /// Width conversion.
    pub fn cast(&mut self, op: CastOp, from: Type, value: Operand, to: Type, name: Option<&str>) -> ValueId {
        self.emit(InstKind::Cast { op, from, value, to }, name)
    }

    /// `xor i1 value, true`
    pub fn not(&mut self, value: Operand, name: Option<&str>) -> ValueId {
        self.binary(BinaryOp::Xor, Type::I1, value, Operand::bool(true), name)
    }

    /// `select i1 cond, ty a, ty b`
    pub fn select(
        &mut self,
        ty: Type,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
        name: Option<&str>,
    ) -> ValueId {
        self.emit(
            InstKind::Select {
                ty,
                cond,
                on_true,
                on_false,
            },
            name,
        )
    }

    /// A phi, placed at the end of the block's phi prefix regardless of the
    /// builder's position.
    pub fn phi(&mut self, ty: Type, incoming: Vec<(Operand, BlockId)>, name: Option<&str>) -> ValueId {
        let id = self.func.new_value(ty, name);
        if let Some(block) = self.func.block_mut(self.block) {
            let pos = block.phi_count();
            block
                .insts
                .insert(pos, Instruction::new(Some(id), InstKind::Phi { ty, incoming }));
            if let Some(index) = self.at.as_mut() {
                if *index >= pos {
                    *index += 1;
                }
            }
        }
        id
    }

    /// A call. Returns the result handle unless `ret` is `void`.
    pub fn call(
        &mut self,
        ret: Type,
        callee: Operand,
        args: Vec<(Type, Operand)>,
        name: Option<&str>,
    ) -> Option<ValueId> {
        let kind = InstKind::Call { ret, callee, args };
        if ret == Type::Void {
            self.emit_void(kind);
            None
        } else {
            Some(self.emit(kind, name))
        }
    }

    /// `va_arg ptr cursor, ty`
    pub fn va_arg(&mut self, ty: Type, cursor: Operand, name: Option<&str>) -> ValueId {
        self.emit(InstKind::VaArg { ty, cursor }, name)
    }

    /// Sets the terminator to `br label %target`.
    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br { target });
    }

    /// Sets the terminator to a conditional branch.
    pub fn cond_br(&mut self, cond: Operand, then_dest: BlockId, else_dest: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        });
    }

    /// Sets the terminator to a `switch`.
    pub fn switch(&mut self, ty: Type, value: Operand, default: BlockId, cases: Vec<(i64, BlockId)>) {
        self.terminate(Terminator::Switch {
            ty,
            value,
            default,
            cases,
        });
    }

    /// Sets the terminator to `ret`.
    pub fn ret(&mut self, value: Option<(Type, Operand)>) {
        self.terminate(Terminator::Ret { value });
    }

    /// Sets the terminator, replacing any existing one.
    pub fn terminate(&mut self, term: Terminator) {
        self.func.set_terminator(self.block, term);
    }
}
