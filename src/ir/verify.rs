//! IR verifier.
//!
//! Checks the invariants every transformation must preserve:
//!
//! - every live block ends in a terminator whose targets are live blocks
//! - the entry block has no predecessors
//! - phis form a prefix of their block and have exactly one incoming value
//!   per predecessor
//! - every value is defined once, and every use is dominated by its definition
//! - operand types match the instruction, direct calls match the callee's
//!   signature
//!
//! All problems of a function are reported together in one [`Error::Verify`].

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::cfg::FunctionCfg,
    ir::{BlockId, Function, InstKind, Module, Operand, Terminator, Type, ValueId},
    utils::graph::algorithms::DominatorTree,
    Error, Result,
};

/// Verifies every defined function of `module`.
///
/// # Errors
///
/// Returns [`Error::Verify`] listing the problems of the first function that
/// fails.
pub fn verify_module(module: &Module) -> Result<()> {
    for (_, function) in module.functions() {
        verify_function(module, function)?;
    }
    Ok(())
}

/// Verifies one function in the context of its module.
///
/// # Errors
///
/// Returns [`Error::Verify`] listing every problem found.
pub fn verify_function(module: &Module, function: &Function) -> Result<()> {
    if function.is_declaration() {
        return Ok(());
    }
    let mut verifier = Verifier::new(module, function);
    verifier.run();
    if verifier.problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Verify(format!(
            "@{}: {}",
            function.name,
            verifier.problems.join("; ")
        )))
    }
}

/// Where a value is defined: block and instruction index.
type Site = (BlockId, usize);

struct Verifier<'a> {
    module: &'a Module,
    func: &'a Function,
    cfg: FunctionCfg,
    dom: DominatorTree,
    preds: HashMap<BlockId, Vec<BlockId>>,
    defs: HashMap<ValueId, Site>,
    problems: Vec<String>,
}

impl<'a> Verifier<'a> {
    fn new(module: &'a Module, func: &'a Function) -> Self {
        let cfg = FunctionCfg::new(func);
        let dom = cfg.dominators();
        Self {
            module,
            func,
            cfg,
            dom,
            preds: func.predecessors(),
            defs: HashMap::new(),
            problems: Vec::new(),
        }
    }

    fn report(&mut self, message: String) {
        self.problems.push(message);
    }

    fn run(&mut self) {
        self.check_blocks();
        self.collect_definitions();
        if !self.problems.is_empty() {
            return;
        }
        let func = self.func;
        for (id, _) in func.blocks() {
            self.check_block(id);
        }
    }

    fn check_blocks(&mut self) {
        let func = self.func;
        if let Some(entry) = func.entry() {
            if self.preds.get(&entry).is_some_and(|p| !p.is_empty()) {
                self.report(format!("entry block '{}' has predecessors", func[entry].name));
            }
        }
        for (id, block) in func.blocks() {
            let Some(term) = &block.terminator else {
                self.report(format!("block '{}' has no terminator", block.name));
                continue;
            };
            for succ in term.successors() {
                if !func.contains_block(succ) {
                    self.report(format!("block '{}' branches to dead block {succ}", block.name));
                }
            }
            let phis = block.phi_count();
            if block.insts[phis..].iter().any(|i| i.is_phi()) {
                self.report(format!("block '{}' has a phi after a non-phi", block.name));
            }
            if self.cfg.node(id).is_none() {
                self.report(format!("block '{}' is missing from the graph", block.name));
            }
        }
    }

    fn collect_definitions(&mut self) {
        let func = self.func;
        for (id, block) in func.blocks() {
            for (index, inst) in block.insts.iter().enumerate() {
                let Some(result) = inst.result else {
                    continue;
                };
                if result.index() >= func.value_count() {
                    self.report(format!("{result} in '{}' has no value entry", block.name));
                } else if self.defs.insert(result, (id, index)).is_some() {
                    self.report(format!("{result} is defined more than once"));
                }
            }
        }
    }

    fn dominates_use(&self, def: Site, use_block: BlockId, use_index: usize) -> bool {
        let (Some(def_node), Some(use_node)) = (self.cfg.node(def.0), self.cfg.node(use_block)) else {
            return false;
        };
        if !self.dom.is_reachable(use_node) {
            return true;
        }
        if def.0 == use_block {
            return def.1 < use_index;
        }
        self.dom.dominates(def_node, use_node)
    }

    /// Checks a use of `op` at `(block, index)`; `index` is the instruction
    /// count for terminator uses.
    fn check_use(&mut self, op: Operand, block: BlockId, index: usize) {
        match op {
            Operand::Value(v) => match self.defs.get(&v).copied() {
                None => self.report(format!("{v} used in '{}' is never defined", self.func[block].name)),
                Some(site) if !self.dominates_use(site, block, index) => self.report(format!(
                    "{v} does not dominate its use in '{}'",
                    self.func[block].name
                )),
                Some(_) => {}
            },
            Operand::Arg(i) if i as usize >= self.func.params.len() => {
                self.report(format!("parameter #{i} out of range"));
            }
            Operand::Global(g) if self.module.global(g).is_none() => {
                self.report(format!("unknown global {g}"));
            }
            Operand::Func(f) if self.module.function(f).is_none() => {
                self.report(format!("unknown function {f}"));
            }
            _ => {}
        }
    }

    fn expect_type(&mut self, op: &Operand, expected: Type, what: &str) {
        if matches!(op, Operand::Poison(_)) {
            return;
        }
        let actual = self.func.operand_type(op);
        if actual != expected {
            self.report(format!("{what}: expected {expected}, found {actual}"));
        }
    }

    fn check_block(&mut self, id: BlockId) {
        let func = self.func;
        let block = &func[id];
        let preds: HashSet<BlockId> = self.preds.get(&id).into_iter().flatten().copied().collect();

        for (index, inst) in block.insts.iter().enumerate() {
            if let InstKind::Phi { ty, incoming } = &inst.kind {
                let sources: Vec<BlockId> = incoming.iter().map(|(_, b)| *b).collect();
                let unique: HashSet<BlockId> = sources.iter().copied().collect();
                if unique.len() != sources.len() || unique != preds {
                    self.report(format!(
                        "phi in '{}' does not match the block's predecessors",
                        block.name
                    ));
                }
                for (value, from) in incoming {
                    self.expect_type(value, *ty, "phi incoming");
                    if func.contains_block(*from) {
                        let end = func[*from].insts.len();
                        self.check_use(*value, *from, end + 1);
                    }
                }
                continue;
            }
            for op in inst.operands() {
                self.check_use(op, id, index);
            }
            self.check_types(&inst.kind);
        }

        if let Some(term) = &block.terminator {
            for op in term.operands() {
                self.check_use(op, id, block.insts.len());
            }
            match term {
                Terminator::CondBr { cond, .. } => self.expect_type(cond, Type::I1, "branch condition"),
                Terminator::Switch { ty, value, .. } => self.expect_type(value, *ty, "switch value"),
                Terminator::Ret { value: None } if func.ret != Type::Void => {
                    self.report(format!("'{}' returns void from a {} function", block.name, func.ret));
                }
                Terminator::Ret { value: Some((ty, v)) } => {
                    if *ty != func.ret {
                        self.report(format!("'{}' returns {ty} from a {} function", block.name, func.ret));
                    }
                    self.expect_type(v, *ty, "return value");
                }
                _ => {}
            }
        }
    }

    fn check_types(&mut self, kind: &InstKind) {
        match kind {
            InstKind::Alloca { .. } | InstKind::Phi { .. } => {}
            InstKind::Load { ptr, .. } => self.expect_type(ptr, Type::Ptr, "load address"),
            InstKind::Store { ty, value, ptr } => {
                self.expect_type(value, *ty, "stored value");
                self.expect_type(ptr, Type::Ptr, "store address");
            }
            InstKind::Gep {
                base,
                index_ty,
                index,
                ..
            } => {
                self.expect_type(base, Type::Ptr, "gep base");
                self.expect_type(index, *index_ty, "gep index");
            }
            InstKind::Binary { ty, lhs, rhs, op } => {
                let what = format!("{op} operand");
                self.expect_type(lhs, *ty, &what);
                self.expect_type(rhs, *ty, &what);
            }
            InstKind::Icmp { ty, lhs, rhs, .. } => {
                self.expect_type(lhs, *ty, "icmp operand");
                self.expect_type(rhs, *ty, "icmp operand");
            }
            InstKind::Cast { from, value, .. } => self.expect_type(value, *from, "cast operand"),
            InstKind::Select {
                ty,
                cond,
                on_true,
                on_false,
            } => {
                self.expect_type(cond, Type::I1, "select condition");
                self.expect_type(on_true, *ty, "select operand");
                self.expect_type(on_false, *ty, "select operand");
            }
            InstKind::Call { ret, callee, args } => {
                for (ty, arg) in args {
                    self.expect_type(arg, *ty, "call argument");
                }
                let Operand::Func(id) = callee else {
                    self.expect_type(callee, Type::Ptr, "callee");
                    return;
                };
                let Some(target) = self.module.function(*id) else {
                    return;
                };
                if target.ret != *ret {
                    self.report(format!("call to @{} expects {} but declares {ret}", target.name, target.ret));
                }
                let arity_ok = if target.variadic {
                    args.len() >= target.params.len()
                } else {
                    args.len() == target.params.len()
                };
                if !arity_ok {
                    self.report(format!(
                        "call to @{} passes {} arguments, expected {}",
                        target.name,
                        args.len(),
                        target.params.len()
                    ));
                }
                for ((ty, _), param) in args.iter().zip(&target.params) {
                    if *ty != param.ty {
                        self.report(format!("call to @{} passes {ty} for a {} parameter", target.name, param.ty));
                    }
                }
            }
            InstKind::VaArg { cursor, .. } => self.expect_type(cursor, Type::Ptr, "va_arg cursor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Builder, Param};

    #[test]
    fn test_accepts_well_formed_loop() -> Result<()> {
        let module = Module::parse(
            r"
define i32 @f(i32 %n) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %next, %loop ]
  %next = add i32 %i, 1
  %done = icmp sge i32 %next, %n
  br i1 %done, label %exit, label %loop
exit:
  ret i32 %next
}
",
        )?;
        verify_module(&module)
    }

    #[test]
    fn test_rejects_missing_terminator() -> Result<()> {
        let mut module = Module::new("m");
        let mut f = Function::new("f", Type::Void, vec![]);
        f.add_block("entry");
        module.add_function(f)?;
        let err = verify_module(&module);
        assert!(matches!(err, Err(Error::Verify(ref m)) if m.contains("no terminator")));
        Ok(())
    }

    #[test]
    fn test_rejects_use_not_dominated() -> Result<()> {
        let mut module = Module::new("m");
        let mut f = Function::new("f", Type::I32, vec![Param::named(Type::I1, "c")]);
        let entry = f.add_block("entry");
        let left = f.add_block("left");
        let join = f.add_block("join");
        let mut b = Builder::at_end(&mut f, entry);
        b.cond_br(Operand::Arg(0), left, join);
        b.position_at_end(left);
        let x = b.binary(
            BinaryOp::Add,
            Type::I32,
            Operand::int(Type::I32, 1),
            Operand::int(Type::I32, 2),
            Some("x"),
        );
        b.br(join);
        b.position_at_end(join);
        b.ret(Some((Type::I32, x.into())));
        module.add_function(f)?;
        let err = verify_module(&module);
        assert!(matches!(err, Err(Error::Verify(ref m)) if m.contains("does not dominate")));
        Ok(())
    }

    #[test]
    fn test_rejects_phi_predecessor_mismatch() -> Result<()> {
        let module = Module::parse(
            r"
define i32 @f() {
entry:
  br label %next
next:
  %p = phi i32 [ 0, %entry ], [ 1, %other ]
  ret i32 %p
other:
  br label %other
}
",
        )?;
        let err = verify_module(&module);
        assert!(matches!(err, Err(Error::Verify(ref m)) if m.contains("predecessors")));
        Ok(())
    }

    #[test]
    fn test_rejects_call_arity() -> Result<()> {
        let module = Module::parse(
            r"
declare void @print_i64(i64)

define void @f() {
entry:
  call void @print_i64(i64 1, i64 2)
  ret void
}
",
        )?;
        assert!(verify_module(&module).is_err());
        Ok(())
    }
}
