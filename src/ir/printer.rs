//! Textual form of the IR.
//!
//! The output is accepted by [`Module::parse`](crate::ir::Module::parse), so
//! `parse(print(m))` reproduces `m` up to handle numbering. Unnamed values are
//! numbered `%0, %1, ...` per function, parameters first; names that collide
//! get a `.N` suffix.

use std::{
    collections::HashSet,
    fmt::{self, Write},
};

use crate::ir::{
    Function, Global, InstKind, Instruction, MdNode, MdOperand, Module, Operand, Terminator,
};

/// Printed names of the parameters and values of one function.
struct LocalNames {
    params: Vec<String>,
    values: Vec<Option<String>>,
}

fn is_numeric(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

impl LocalNames {
    fn assign(func: &Function) -> Self {
        let mut taken: HashSet<String> = HashSet::new();
        let mut counter = 0usize;
        let mut pick = |name: Option<&str>, taken: &mut HashSet<String>| -> String {
            match name.filter(|n| !n.is_empty() && !is_numeric(n)) {
                Some(base) => {
                    let mut candidate = base.to_string();
                    let mut n = 1;
                    while taken.contains(&candidate) {
                        candidate = format!("{base}.{n}");
                        n += 1;
                    }
                    taken.insert(candidate.clone());
                    candidate
                }
                None => {
                    let candidate = counter.to_string();
                    counter += 1;
                    candidate
                }
            }
        };

        let params = func
            .params
            .iter()
            .map(|p| pick(p.name.as_deref(), &mut taken))
            .collect();
        let mut values = vec![None; func.value_count()];
        for (_, block) in func.blocks() {
            for value in block.defined_values() {
                if let Some(slot) = values.get_mut(value.index()) {
                    let name = func.value(value).and_then(|v| v.name.as_deref());
                    *slot = Some(pick(name, &mut taken));
                }
            }
        }
        Self { params, values }
    }
}

struct FunctionPrinter<'a> {
    module: &'a Module,
    func: &'a Function,
    names: LocalNames,
}

impl FunctionPrinter<'_> {
    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Value(id) => match self.names.values.get(id.index()).and_then(Option::as_ref) {
                Some(name) => format!("%{name}"),
                None => format!("%<undefined {id}>"),
            },
            Operand::Arg(i) => match self.names.params.get(*i as usize) {
                Some(name) => format!("%{name}"),
                None => format!("%<arg {i}>"),
            },
            Operand::Const(c) => c.to_string(),
            Operand::Global(id) => match self.module.global(*id) {
                Some(g) => format!("@{}", g.name),
                None => format!("@<{id}>"),
            },
            Operand::Func(id) => match self.module.function(*id) {
                Some(f) => format!("@{}", f.name),
                None => format!("@<{id}>"),
            },
            Operand::Poison(_) => "poison".to_string(),
        }
    }

    fn label(&self, id: crate::ir::BlockId) -> String {
        match self.func.block(id) {
            Some(b) => format!("%{}", b.name),
            None => format!("%<detached {id}>"),
        }
    }

    fn instruction(&self, out: &mut String, inst: &Instruction) -> fmt::Result {
        out.push_str("  ");
        if let Some(result) = inst.result {
            write!(out, "{} = ", self.operand(&Operand::Value(result)))?;
        }
        match &inst.kind {
            InstKind::Alloca { ty, count } => {
                write!(out, "alloca {ty}")?;
                if *count != 1 {
                    write!(out, ", i32 {count}")?;
                }
            }
            InstKind::Load { ty, ptr } => write!(out, "load {ty}, ptr {}", self.operand(ptr))?,
            InstKind::Store { ty, value, ptr } => write!(
                out,
                "store {ty} {}, ptr {}",
                self.operand(value),
                self.operand(ptr)
            )?,
            InstKind::Gep {
                elem,
                base,
                index_ty,
                index,
            } => write!(
                out,
                "getelementptr {elem}, ptr {}, {index_ty} {}",
                self.operand(base),
                self.operand(index)
            )?,
            InstKind::Binary { op, ty, lhs, rhs } => write!(
                out,
                "{op} {ty} {}, {}",
                self.operand(lhs),
                self.operand(rhs)
            )?,
            InstKind::Icmp { pred, ty, lhs, rhs } => write!(
                out,
                "icmp {pred} {ty} {}, {}",
                self.operand(lhs),
                self.operand(rhs)
            )?,
            InstKind::Cast { op, from, value, to } => {
                write!(out, "{op} {from} {} to {to}", self.operand(value))?;
            }
            InstKind::Select {
                ty,
                cond,
                on_true,
                on_false,
            } => write!(
                out,
                "select i1 {}, {ty} {}, {ty} {}",
                self.operand(cond),
                self.operand(on_true),
                self.operand(on_false)
            )?,
            InstKind::Phi { ty, incoming } => {
                write!(out, "phi {ty} ")?;
                for (i, (value, block)) in incoming.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write!(out, "[ {}, {} ]", self.operand(value), self.label(*block))?;
                }
            }
            InstKind::Call { ret, callee, args } => {
                write!(out, "call {ret} {}(", self.operand(callee))?;
                for (i, (ty, arg)) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write!(out, "{ty} {}", self.operand(arg))?;
                }
                out.push(')');
            }
            InstKind::VaArg { ty, cursor } => {
                write!(out, "va_arg ptr {}, {ty}", self.operand(cursor))?;
            }
        }
        out.push('\n');
        Ok(())
    }

    fn terminator(&self, out: &mut String, term: &Terminator, loop_md: Option<crate::ir::MdId>) -> fmt::Result {
        out.push_str("  ");
        match term {
            Terminator::Br { target } => write!(out, "br label {}", self.label(*target))?,
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => write!(
                out,
                "br i1 {}, label {}, label {}",
                self.operand(cond),
                self.label(*then_dest),
                self.label(*else_dest)
            )?,
            Terminator::Switch {
                ty,
                value,
                default,
                cases,
            } => {
                write!(
                    out,
                    "switch {ty} {}, label {} [",
                    self.operand(value),
                    self.label(*default)
                )?;
                for (case, dest) in cases {
                    write!(out, "\n    {ty} {case}, label {}", self.label(*dest))?;
                }
                out.push_str("\n  ]");
            }
            Terminator::Ret { value: None } => out.push_str("ret void"),
            Terminator::Ret {
                value: Some((ty, value)),
            } => write!(out, "ret {ty} {}", self.operand(value))?,
            Terminator::Unreachable => out.push_str("unreachable"),
        }
        if let Some(md) = loop_md {
            write!(out, ", !llvm.loop !{}", md.index())?;
        }
        out.push('\n');
        Ok(())
    }

    fn print(&self, out: &mut String) -> fmt::Result {
        let func = self.func;
        let keyword = if func.is_declaration() { "declare" } else { "define" };
        write!(out, "{keyword} ")?;
        if func.linkage != crate::ir::Linkage::External {
            write!(out, "{} ", func.linkage)?;
        }
        write!(out, "{} @{}(", func.ret, func.name)?;
        for (i, param) in func.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write!(out, "{}", param.ty)?;
            if !func.is_declaration() {
                write!(out, " %{}", self.names.params[i])?;
            }
        }
        if func.variadic {
            if !func.params.is_empty() {
                out.push_str(", ");
            }
            out.push_str("...");
        }
        out.push(')');
        if !func.attrs.is_empty() {
            write!(out, " {}", func.attrs)?;
        }
        if func.is_declaration() {
            out.push('\n');
            return Ok(());
        }
        out.push_str(" {\n");
        for (i, (_, block)) in func.blocks().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            writeln!(out, "{}:", block.name)?;
            for inst in &block.insts {
                self.instruction(out, inst)?;
            }
            match &block.terminator {
                Some(term) => self.terminator(out, term, block.loop_md)?,
                None => out.push_str("  ; missing terminator\n"),
            }
        }
        out.push_str("}\n");
        Ok(())
    }
}

fn print_global(out: &mut String, global: &Global) -> fmt::Result {
    let kind = if global.constant { "constant" } else { "global" };
    if global.count == 1 {
        writeln!(out, "@{} = {kind} {} {}", global.name, global.ty, global.init)
    } else {
        writeln!(
            out,
            "@{} = {kind} [{} x {}] zeroinitializer",
            global.name, global.count, global.ty
        )
    }
}

fn print_metadata(out: &mut String, index: usize, node: &MdNode) -> fmt::Result {
    write!(out, "!{index} = ")?;
    if node.distinct {
        out.push_str("distinct ");
    }
    out.push_str("!{");
    for (i, operand) in node.operands.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match operand {
            MdOperand::Node(id) => write!(out, "!{}", id.index())?,
            MdOperand::String(s) => write!(out, "!\"{s}\"")?,
            MdOperand::Int(v) => write!(out, "i64 {v}")?,
        }
    }
    out.push_str("}\n");
    Ok(())
}

/// Renders one function of `module`.
#[must_use]
pub fn print_function(module: &Module, func: &Function) -> String {
    let printer = FunctionPrinter {
        module,
        func,
        names: LocalNames::assign(func),
    };
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = printer.print(&mut out);
    out
}

/// Renders a whole module.
#[must_use]
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    let _ = write_module(&mut out, module);
    out
}

fn write_module(out: &mut String, module: &Module) -> fmt::Result {
    if !module.name.is_empty() {
        writeln!(out, "source_filename = \"{}\"", module.name)?;
        out.push('\n');
    }
    for ty in &module.structs {
        writeln!(out, "{ty}")?;
    }
    if !module.structs.is_empty() {
        out.push('\n');
    }
    let mut any_global = false;
    for (_, global) in module.globals() {
        print_global(out, global)?;
        any_global = true;
    }
    if any_global {
        out.push('\n');
    }
    for (i, (_, func)) in module.functions().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&print_function(module, func));
    }
    let mut first = true;
    for (id, node) in module.metadata() {
        if first {
            out.push('\n');
            first = false;
        }
        print_metadata(out, id.index(), node)?;
    }
    Ok(())
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&print_module(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, Builder, Param, Type};

    #[test]
    fn test_unnamed_values_are_numbered() {
        let mut module = Module::new("");
        let mut f = Function::new("f", Type::I32, vec![Param::unnamed(Type::I32)]);
        let entry = f.add_block("entry");
        let mut b = Builder::at_end(&mut f, entry);
        let x = b.binary(BinaryOp::Add, Type::I32, Operand::Arg(0), Operand::int(Type::I32, 1), None);
        let y = b.binary(BinaryOp::Mul, Type::I32, x.into(), x.into(), Some("y"));
        b.ret(Some((Type::I32, y.into())));
        module.add_function(f).ok();
        let text = module.to_string();
        assert!(text.contains("define i32 @f(i32 %0) {"), "{text}");
        assert!(text.contains("%1 = add i32 %0, 1"), "{text}");
        assert!(text.contains("%y = mul i32 %1, %1"), "{text}");
        assert!(text.contains("ret i32 %y"), "{text}");
    }

    #[test]
    fn test_colliding_names_get_suffix() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let entry = f.add_block("entry");
        let mut b = Builder::at_end(&mut f, entry);
        b.alloca(Type::I32, 1, Some("slot"));
        b.alloca(Type::I32, 4, Some("slot"));
        b.ret(None);
        let module = Module::new("");
        let text = print_function(&module, &f);
        assert!(text.contains("%slot = alloca i32\n"), "{text}");
        assert!(text.contains("%slot.1 = alloca i32, i32 4"), "{text}");
    }
}
