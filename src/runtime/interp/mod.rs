//! Reference interpreter for the IR.
//!
//! Executes a module function by function, block by block. It exists so the
//! effect of a transformation can be observed: a module and its lambdaized
//! counterpart must return the same values and print the same output.
//!
//! # Externals
//!
//! Declarations are resolved by name:
//!
//! | Symbol | Behaviour |
//! |---|---|
//! | `looper(ptr f, ...)` | drives `f` through the configured [`Looper`] |
//! | `print_i64(i64)` | appends the decimal value and a newline to the output |
//! | `putchar(i32)` | appends one character to the output, returns it |
//!
//! # Limits
//!
//! Every executed instruction and terminator counts against a step budget;
//! running out yields [`Error::StepLimit`]. Since every driver step is a
//! nested call, deep drivers need a large native stack; [`run_function`]
//! runs the interpreter on a dedicated thread for that reason.

mod memory;
mod value;

pub use memory::{Memory, Pointer};
pub use value::{CursorRef, RtValue};

use std::{cell::RefCell, rc::Rc, thread};

use crate::{
    ir::{BlockId, FuncId, Function, GlobalId, IcmpPred, InstKind, Module, Operand, Terminator, Type, ValueId},
    runtime::{Looper, VaList},
    Error, Result,
};

/// Default instruction budget.
pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;

/// Native stack size of the thread used by [`run_function`].
const INTERPRETER_STACK: usize = 512 * 1024 * 1024;

/// Observable outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Execution {
    /// Integer return value, `None` for `void` functions.
    pub ret: Option<i64>,
    /// Text written through `print_i64` and `putchar`.
    pub output: String,
    /// Instructions and terminators executed.
    pub steps: u64,
    /// Calls of `@looper`.
    pub driver_calls: u64,
    /// Loop-body calls made by the drivers.
    pub iterations: u64,
}

/// Per-call state.
struct Frame {
    values: Vec<Option<RtValue>>,
    args: Vec<RtValue>,
    allocations: Vec<usize>,
}

impl Frame {
    fn new(function: &Function, args: Vec<RtValue>) -> Self {
        Self {
            values: vec![None; function.value_count()],
            args,
            allocations: Vec::new(),
        }
    }

    fn set(&mut self, id: ValueId, value: RtValue) {
        if let Some(slot) = self.values.get_mut(id.index()) {
            *slot = Some(value);
        }
    }
}

/// Where control goes after a terminator.
enum Flow {
    Jump(BlockId),
    Return(Option<RtValue>),
}

/// Executes functions of one module.
pub struct Interpreter<'m> {
    module: &'m Module,
    memory: Memory,
    globals: Vec<Pointer>,
    looper: Looper,
    step_limit: u64,
    steps: u64,
    output: String,
    driver_calls: u64,
    iterations: u64,
}

impl<'m> Interpreter<'m> {
    /// Creates an interpreter with the default driver and step budget.
    ///
    /// Globals are materialised immediately.
    #[must_use]
    pub fn new(module: &'m Module) -> Self {
        let mut memory = Memory::new();
        let globals = module
            .globals()
            .map(|(_, g)| memory.allocate(g.count as usize, RtValue::Int(g.init), !g.constant))
            .collect();
        Self {
            module,
            memory,
            globals,
            looper: Looper::default(),
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
            output: String::new(),
            driver_calls: 0,
            iterations: 0,
        }
    }

    /// Uses `looper` for `@looper` calls.
    #[must_use]
    pub fn with_looper(mut self, looper: Looper) -> Self {
        self.looper = looper;
        self
    }

    /// Sets the instruction budget.
    #[must_use]
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Text written so far.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Steps executed so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Calls the function named `name` with integer arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSymbol`] if there is no such function, or any
    /// fault raised while executing it.
    pub fn call(&mut self, name: &str, args: &[i64]) -> Result<Execution> {
        let id = self
            .module
            .function_by_name(name)
            .ok_or_else(|| Error::UnknownSymbol(format!("@{name}")))?;
        let args = args.iter().map(|&v| RtValue::Int(v)).collect();
        let ret = self.call_function(id, args)?;
        Ok(Execution {
            ret: ret.and_then(|v| v.as_int()),
            output: self.output.clone(),
            steps: self.steps,
            driver_calls: self.driver_calls,
            iterations: self.iterations,
        })
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(Error::StepLimit(self.step_limit));
        }
        Ok(())
    }

    fn global(&self, id: GlobalId) -> Result<Pointer> {
        self.globals
            .get(id.index())
            .copied()
            .ok_or_else(|| Error::UnknownSymbol(format!("{id:?}")))
    }

    fn eval(&self, frame: &Frame, op: &Operand) -> Result<RtValue> {
        match op {
            Operand::Value(id) => frame
                .values
                .get(id.index())
                .and_then(|v| v.clone())
                .ok_or_else(|| Error::Runtime(format!("use of undefined value {id:?}"))),
            Operand::Arg(i) => frame
                .args
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| Error::Runtime(format!("missing argument {i}"))),
            Operand::Const(c) => Ok(RtValue::Int(c.value)),
            Operand::Global(g) => self.global(*g).map(RtValue::Ptr),
            Operand::Func(f) => Ok(RtValue::Func(*f)),
            Operand::Poison(_) => Ok(RtValue::Int(0)),
        }
    }

    fn eval_int(&self, frame: &Frame, op: &Operand) -> Result<i64> {
        let value = self.eval(frame, op)?;
        value
            .as_int()
            .ok_or_else(|| Error::Runtime(format!("expected an integer, found a {}", value.kind())))
    }

    fn eval_ptr(&self, frame: &Frame, op: &Operand) -> Result<Pointer> {
        match self.eval(frame, op)? {
            RtValue::Ptr(p) => Ok(p),
            RtValue::Int(0) => Err(Error::Runtime("null pointer dereference".to_string())),
            other => Err(Error::Runtime(format!("expected a pointer, found a {}", other.kind()))),
        }
    }

    /// Calls a defined function or an external.
    fn call_function(&mut self, id: FuncId, args: Vec<RtValue>) -> Result<Option<RtValue>> {
        let module = self.module;
        let function = module
            .function(id)
            .ok_or_else(|| Error::UnknownSymbol(format!("{id:?}")))?;
        if function.is_declaration() {
            return self.call_external(function, args);
        }

        let mut frame = Frame::new(function, args);
        let result = self.execute(function, &mut frame);
        for object in frame.allocations.drain(..) {
            self.memory.release(object);
        }
        result
    }

    fn execute(&mut self, function: &'m Function, frame: &mut Frame) -> Result<Option<RtValue>> {
        let mut block = function
            .entry()
            .ok_or_else(|| Error::Runtime(format!("@{} has no body", function.name)))?;
        let mut prev = None;

        loop {
            let current = function
                .block(block)
                .ok_or_else(|| Error::Runtime(format!("jump to missing block {block:?}")))?;

            // Phis read their inputs before any of them is written.
            let mut incoming = Vec::with_capacity(current.phi_count());
            for phi in current.phis() {
                let InstKind::Phi { incoming: edges, .. } = &phi.kind else {
                    continue;
                };
                let from = prev.ok_or_else(|| Error::Runtime(format!("phi in entry block of @{}", function.name)))?;
                let (op, _) = edges
                    .iter()
                    .find(|(_, pred)| *pred == from)
                    .ok_or_else(|| Error::Runtime(format!("phi has no value for {from:?}")))?;
                incoming.push((phi.result, self.eval(frame, op)?));
            }
            for (result, value) in incoming {
                self.tick()?;
                if let Some(id) = result {
                    frame.set(id, value);
                }
            }

            for inst in &current.insts[current.phi_count()..] {
                self.tick()?;
                if let Some(value) = self.execute_inst(frame, &inst.kind)? {
                    if let Some(id) = inst.result {
                        frame.set(id, value);
                    }
                }
            }

            self.tick()?;
            let term = current
                .terminator
                .as_ref()
                .ok_or_else(|| Error::Runtime(format!("block %{} has no terminator", current.name)))?;
            match self.execute_terminator(frame, term)? {
                Flow::Jump(next) => {
                    prev = Some(block);
                    block = next;
                }
                Flow::Return(value) => return Ok(value),
            }
        }
    }

    fn execute_inst(&mut self, frame: &mut Frame, kind: &InstKind) -> Result<Option<RtValue>> {
        let value = match kind {
            InstKind::Alloca { count, .. } => {
                let ptr = self.memory.allocate(*count as usize, RtValue::Int(0), true);
                frame.allocations.push(ptr.object);
                RtValue::Ptr(ptr)
            }
            InstKind::Load { ty, ptr } => {
                let ptr = self.eval_ptr(frame, ptr)?;
                match self.memory.load(ptr)? {
                    RtValue::Int(v) => RtValue::Int(ty.normalize(v)),
                    other => other,
                }
            }
            InstKind::Store { value, ptr, .. } => {
                let value = self.eval(frame, value)?;
                let ptr = self.eval_ptr(frame, ptr)?;
                self.memory.store(ptr, value)?;
                return Ok(None);
            }
            InstKind::Gep { base, index, .. } => {
                let base = self.eval_ptr(frame, base)?;
                RtValue::Ptr(base.offset_by(self.eval_int(frame, index)?))
            }
            InstKind::Binary { op, ty, lhs, rhs } => {
                let (l, r) = (self.eval_int(frame, lhs)?, self.eval_int(frame, rhs)?);
                let v = op
                    .eval(*ty, l, r)
                    .ok_or_else(|| Error::Runtime(format!("{op} by zero")))?;
                RtValue::Int(v)
            }
            InstKind::Icmp { pred, ty, lhs, rhs } => {
                let (l, r) = (self.eval(frame, lhs)?, self.eval(frame, rhs)?);
                match (&l, &r) {
                    (RtValue::Int(a), RtValue::Int(b)) => pred.eval(*ty, *a, *b).into(),
                    _ => match pred {
                        IcmpPred::Eq => (l == r).into(),
                        IcmpPred::Ne => (l != r).into(),
                        _ => {
                            return Err(Error::Runtime(format!(
                                "icmp {pred} on a {} and a {}",
                                l.kind(),
                                r.kind()
                            )))
                        }
                    },
                }
            }
            InstKind::Cast { op, from, value, to } => RtValue::Int(op.eval(*from, *to, self.eval_int(frame, value)?)),
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                if self.eval(frame, cond)?.is_true() {
                    self.eval(frame, on_true)?
                } else {
                    self.eval(frame, on_false)?
                }
            }
            InstKind::Phi { .. } => {
                return Err(Error::Runtime("phi after the phi prefix".to_string()));
            }
            InstKind::Call { callee, args, .. } => {
                let target = match self.eval(frame, callee)? {
                    RtValue::Func(id) => id,
                    other => return Err(Error::Runtime(format!("call through a {}", other.kind()))),
                };
                let args = args
                    .iter()
                    .map(|(_, a)| self.eval(frame, a))
                    .collect::<Result<Vec<_>>>()?;
                return self.call_function(target, args);
            }
            InstKind::VaArg { cursor, .. } => match self.eval(frame, cursor)? {
                RtValue::Cursor(cursor) => cursor
                    .borrow_mut()
                    .next_arg()
                    .ok_or_else(|| Error::Runtime("va_arg past the last capture".to_string()))?,
                other => return Err(Error::Runtime(format!("va_arg on a {}", other.kind()))),
            },
        };
        Ok(Some(value))
    }

    fn execute_terminator(&mut self, frame: &Frame, term: &Terminator) -> Result<Flow> {
        Ok(match term {
            Terminator::Br { target } => Flow::Jump(*target),
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => {
                if self.eval(frame, cond)?.is_true() {
                    Flow::Jump(*then_dest)
                } else {
                    Flow::Jump(*else_dest)
                }
            }
            Terminator::Switch {
                ty,
                value,
                default,
                cases,
            } => {
                let v = ty.normalize(self.eval_int(frame, value)?);
                let target = cases
                    .iter()
                    .find(|(case, _)| ty.normalize(*case) == v)
                    .map_or(*default, |(_, dest)| *dest);
                Flow::Jump(target)
            }
            Terminator::Ret { value } => Flow::Return(match value {
                Some((_, op)) => Some(self.eval(frame, op)?),
                None => None,
            }),
            Terminator::Unreachable => return Err(Error::Runtime("reached unreachable".to_string())),
        })
    }

    fn call_external(&mut self, function: &Function, args: Vec<RtValue>) -> Result<Option<RtValue>> {
        let int_arg = |i: usize| {
            args.get(i)
                .and_then(RtValue::as_int)
                .ok_or_else(|| Error::Runtime(format!("@{} expects an integer argument", function.name)))
        };
        match function.name.as_str() {
            "looper" => {
                let Some(RtValue::Func(loopee)) = args.first().cloned() else {
                    return Err(Error::Runtime("@looper expects a function as first argument".to_string()));
                };
                let cursor = VaList::new(args.iter().skip(1).cloned().collect());
                self.drive(loopee, cursor)?;
                Ok(None)
            }
            "print_i64" => {
                let v = int_arg(0)?;
                self.output.push_str(&format!("{v}\n"));
                Ok(None)
            }
            "putchar" => {
                let v = int_arg(0)?;
                let c = u8::try_from(v & 0xff).map(char::from).unwrap_or('?');
                self.output.push(c);
                Ok(Some(RtValue::Int(Type::I32.normalize(v))))
            }
            other => Err(Error::UnknownSymbol(format!("@{other}"))),
        }
    }

    /// Runs one `@looper` call.
    fn drive(&mut self, loopee: FuncId, cursor: VaList<RtValue>) -> Result<()> {
        self.driver_calls += 1;
        let looper = self.looper;
        let report = looper.run(
            |cursor| {
                let handle: CursorRef = Rc::new(RefCell::new(cursor));
                let proceed = self.call_function(loopee, vec![RtValue::Cursor(handle)])?;
                Ok::<bool, Error>(proceed.is_some_and(|v| v.is_true()))
            },
            cursor,
        )?;
        self.iterations += report.iterations;
        log::trace!(
            "@looper: {} iterations, depth {}",
            report.iterations,
            report.max_depth
        );
        Ok(())
    }
}

/// Runs `@name(args)` of `module` on a thread with a large stack.
///
/// # Errors
///
/// Returns whatever the interpreter raises, or [`Error::Runtime`] if the
/// thread cannot be spawned or panics.
pub fn run_function(module: &Module, name: &str, args: &[i64], looper: Looper, step_limit: u64) -> Result<Execution> {
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("lambdaize-interp".to_string())
            .stack_size(INTERPRETER_STACK)
            .spawn_scoped(scope, || {
                Interpreter::new(module)
                    .with_looper(looper)
                    .with_step_limit(step_limit)
                    .call(name, args)
            })
            .map_err(|e| Error::Runtime(format!("cannot spawn interpreter thread: {e}")))?;
        handle
            .join()
            .map_err(|_| Error::Runtime("interpreter thread panicked".to_string()))?
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::DriverStrategy;

    #[test]
    fn test_sum_loop() -> Result<()> {
        let module = Module::parse(
            r"
define i32 @sum() {
entry:
  br label %loop
loop:
  %i = phi i32 [ 1, %entry ], [ %i.next, %loop ]
  %acc = phi i32 [ 0, %entry ], [ %acc.next, %loop ]
  %acc.next = add i32 %acc, %i
  %i.next = add i32 %i, 1
  %done = icmp sgt i32 %i.next, 10
  br i1 %done, label %exit, label %loop
exit:
  ret i32 %acc.next
}
",
        )?;
        let run = Interpreter::new(&module).call("sum", &[])?;
        assert_eq!(run.ret, Some(55));
        assert!(run.steps > 0);
        Ok(())
    }

    #[test]
    fn test_output_and_globals() -> Result<()> {
        let module = Module::parse(
            r"
@g = global i64 41
declare void @print_i64(i64)
declare i32 @putchar(i32)
define void @main() {
entry:
  %v = load i64, ptr @g
  %w = add i64 %v, 1
  store i64 %w, ptr @g
  call void @print_i64(i64 %w)
  %c = call i32 @putchar(i32 33)
  ret void
}
",
        )?;
        let run = Interpreter::new(&module).call("main", &[])?;
        assert_eq!(run.output, "42\n!");
        assert_eq!(run.ret, None);
        Ok(())
    }

    #[test]
    fn test_looper_external() -> Result<()> {
        let module = Module::parse(
            r"
declare void @looper(ptr, ...)
define private i1 @body(ptr %cursor) {
entry:
  %p = va_arg ptr %cursor, ptr
  %v = load i32, ptr %p
  %w = add i32 %v, 1
  store i32 %w, ptr %p
  %more = icmp slt i32 %w, 10000
  ret i1 %more
}
define i32 @main() {
entry:
  %slot = alloca i32
  store i32 0, ptr %slot
  call void (ptr, ...) @looper(ptr @body, ptr %slot)
  %r = load i32, ptr %slot
  ret i32 %r
}
",
        )?;
        let looper = Looper::new(DriverStrategy::MultipleArguments, 512);
        let run = run_function(&module, "main", &[], looper, DEFAULT_STEP_LIMIT)?;
        assert_eq!(run.ret, Some(10_000));
        assert_eq!(run.driver_calls, 1);
        assert_eq!(run.iterations, 10_000);
        Ok(())
    }

    #[test]
    fn test_step_limit() -> Result<()> {
        let module = Module::parse(
            r"
define void @spin() {
entry:
  br label %l
l:
  br label %l
}
",
        )?;
        let err = Interpreter::new(&module).with_step_limit(100).call("spin", &[]);
        assert!(matches!(err, Err(Error::StepLimit(100))));
        Ok(())
    }

    #[test]
    fn test_division_by_zero_traps() -> Result<()> {
        let module = Module::parse(
            r"
define i32 @f(i32 %x) {
entry:
  %q = sdiv i32 1, %x
  ret i32 %q
}
",
        )?;
        assert!(matches!(Interpreter::new(&module).call("f", &[0]), Err(Error::Runtime(_))));
        assert_eq!(Interpreter::new(&module).call("f", &[1])?.ret, Some(1));
        Ok(())
    }
}
