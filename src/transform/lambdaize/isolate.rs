//! Loop-body isolation.
//!
//! Turns a canonical loop into a self-contained block set that computes one
//! iteration and ends in a continue/break signal:
//!
//! ```text
//! Host before:                       Host after:        Detached:
//!
//! [preheader]                        [preheader]        [header] ...
//!     |                                  |                 |
//!     v                                  v              [latch] --c--> [loop.ret]
//! [header] <-+                         [exit]                 %continue = phi i1
//!     |      |                                                ret i1 %continue
//!    ...  [latch] --> [exit]
//! ```
//!
//! Every back edge becomes an edge to `loop.ret` carrying `true`, every exit
//! edge one carrying `false`. A conditional branch whose two successors are
//! the header and the exit passes its own condition (negated with `xor` when
//! the header is the false successor). `switch` edges go through shared
//! `loop.continue` / `loop.break` stubs.
//!
//! All preconditions are checked before the first mutation, so a rejected loop
//! leaves the function untouched.

use std::collections::HashSet;

use crate::{
    analysis::LoopRegion,
    ir::{Block, BlockId, Builder, Function, Operand, Terminator, Type},
    transform::lambdaize::eligibility::SkipReason,
};

/// The detached blocks of one loop.
#[derive(Debug, Clone)]
pub struct IsolatedLoop {
    /// Blocks with their former handles: header first, `loop.ret` last.
    pub blocks: Vec<(BlockId, Block)>,
    /// The host block that now branches to the exit.
    pub preheader: BlockId,
    /// The loop's exit block in the host.
    pub exit: BlockId,
}

impl IsolatedLoop {
    /// Former handle of the header.
    #[must_use]
    pub fn header(&self) -> Option<BlockId> {
        self.blocks.first().map(|(id, _)| *id)
    }
}

/// Checks everything the isolation relies on.
fn validate(func: &Function, region: &LoopRegion) -> Result<(BlockId, BlockId), SkipReason> {
    let header = region.header;
    if func.entry() == Some(header) {
        return Err(SkipReason::HeaderIsEntry);
    }

    let preheader = region.preheader.ok_or(SkipReason::NoPreheader)?;
    let enters_directly = matches!(
        func.block(preheader).and_then(|b| b.terminator.as_ref()),
        Some(Terminator::Br { target }) if *target == header
    );
    if !enters_directly {
        return Err(SkipReason::NoPreheader);
    }

    if region.latches.len() != 1 {
        return Err(SkipReason::MultipleLatches);
    }

    let exit = match region.exit_blocks().as_slice() {
        [] => return Err(SkipReason::NoExit),
        [single] => *single,
        _ => return Err(SkipReason::MultipleExits),
    };

    for block in region.blocks.iter().filter_map(|&b| func.block(b)) {
        match &block.terminator {
            Some(term) if term.is_branch() => {}
            Some(term) => {
                return Err(SkipReason::UnsupportedTerminator {
                    opcode: term.opcode(),
                })
            }
            None => return Err(SkipReason::UnsupportedTerminator { opcode: "none" }),
        }
    }

    if func.block(header).is_some_and(|b| b.phi_count() > 0) {
        return Err(SkipReason::HeaderPhis);
    }
    if func.block(exit).is_some_and(|b| b.phi_count() > 0) {
        return Err(SkipReason::ExitPhis);
    }

    let inside: HashSet<BlockId> = region.blocks.iter().copied().collect();
    let defined: HashSet<Operand> = region
        .blocks
        .iter()
        .filter_map(|&b| func.block(b))
        .flat_map(|b| b.defined_values().map(Operand::Value))
        .collect();
    let escapes = func
        .blocks()
        .filter(|(id, _)| !inside.contains(id))
        .any(|(_, b)| {
            b.insts
                .iter()
                .flat_map(|i| i.operands())
                .chain(b.terminator.iter().flat_map(|t| t.operands()))
                .any(|op| defined.contains(&op))
        });
    if escapes {
        return Err(SkipReason::EscapingValue);
    }

    Ok((preheader, exit))
}

/// Rewrites and detaches the loop described by `region`.
///
/// # Errors
///
/// Returns the [`SkipReason`] of the first failed precondition; the function
/// is not modified in that case.
pub fn isolate_loop(func: &mut Function, region: &LoopRegion) -> Result<IsolatedLoop, SkipReason> {
    let (preheader, exit) = validate(func, region)?;
    let header = region.header;

    // Step 1: The host skips the loop
    func.redirect_edge(preheader, header, exit);

    // Step 2: Route back edges and exit edges to the terminal block
    let ret = func.create_block("loop.ret");
    let mut stubs: [Option<BlockId>; 2] = [None, None];
    let mut incoming: Vec<(Operand, BlockId)> = Vec::new();
    let signal = |target: BlockId| match target {
        t if t == header => Some(true),
        t if t == exit => Some(false),
        _ => None,
    };

    for &block in &region.blocks {
        let Some(term) = func.block(block).and_then(|b| b.terminator.clone()) else {
            continue;
        };
        let rewritten = match term {
            Terminator::Br { target } => signal(target).map(|flag| {
                incoming.push((Operand::bool(flag), block));
                Terminator::Br { target: ret }
            }),
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            } => match (signal(then_dest), signal(else_dest)) {
                (None, None) => None,
                (Some(on_true), Some(on_false)) => {
                    let value = match (on_true, on_false) {
                        (true, false) => cond,
                        (false, true) => {
                            Operand::Value(Builder::at_end(func, block).not(cond, Some("continue.not")))
                        }
                        (same, _) => Operand::bool(same),
                    };
                    incoming.push((value, block));
                    Some(Terminator::Br { target: ret })
                }
                (Some(flag), None) => {
                    incoming.push((Operand::bool(flag), block));
                    Some(Terminator::CondBr {
                        cond,
                        then_dest: ret,
                        else_dest,
                    })
                }
                (None, Some(flag)) => {
                    incoming.push((Operand::bool(flag), block));
                    Some(Terminator::CondBr {
                        cond,
                        then_dest,
                        else_dest: ret,
                    })
                }
            },
            Terminator::Switch {
                ty,
                value,
                default,
                cases,
            } => {
                let mut stub_for = |target: BlockId, func: &mut Function| -> BlockId {
                    match signal(target) {
                        Some(flag) => {
                            let slot = &mut stubs[usize::from(!flag)];
                            *slot.get_or_insert_with(|| {
                                func.create_block(if flag { "loop.continue" } else { "loop.break" })
                            })
                        }
                        None => target,
                    }
                };
                let default = stub_for(default, func);
                let cases = cases
                    .into_iter()
                    .map(|(case, dest)| (case, stub_for(dest, func)))
                    .collect();
                Some(Terminator::Switch {
                    ty,
                    value,
                    default,
                    cases,
                })
            }
            Terminator::Ret { .. } | Terminator::Unreachable => None,
        };
        if let Some(term) = rewritten {
            func.set_terminator(block, term);
        }
    }

    for (flag, stub) in [true, false].into_iter().zip(stubs) {
        if let Some(stub) = stub {
            Builder::at_end(func, stub).br(ret);
            incoming.push((Operand::bool(flag), stub));
        }
    }
    let mut b = Builder::at_end(func, ret);
    let signal = b.phi(Type::I1, incoming, Some("continue"));
    b.ret(Some((Type::I1, Operand::Value(signal))));

    // Step 3: Detach, header first and terminal block last
    let mut order: Vec<BlockId> = vec![header];
    order.extend(
        func.layout()
            .iter()
            .copied()
            .filter(|b| *b != header && region.contains(*b)),
    );
    order.extend(stubs.into_iter().flatten());
    order.push(ret);

    let mut blocks = Vec::with_capacity(order.len());
    for id in order {
        if let Some(mut block) = func.detach_block(id) {
            block.loop_md = None;
            blocks.push((id, block));
        }
    }

    Ok(IsolatedLoop {
        blocks,
        preheader,
        exit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::find_loop,
        ir::{InstKind, Module},
        Result,
    };

    fn isolate(text: &str) -> Result<(Function, std::result::Result<IsolatedLoop, SkipReason>)> {
        let module = Module::parse(text)?;
        let mut func = module
            .function(module.defined_functions()[0])
            .cloned()
            .ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(&func, head).ok_or_else(|| malformed_error!("no loop"))?;
        let result = isolate_loop(&mut func, &region);
        Ok((func, result))
    }

    #[test]
    fn test_isolation_signals() -> Result<()> {
        let (func, isolated) = isolate(
            r"
define void @f(ptr %p) {
entry:
  br label %head
head:
  %v = load i32, ptr %p
  %c = icmp slt i32 %v, 10
  br i1 %c, label %body, label %out
body:
  %w = add i32 %v, 1
  store i32 %w, ptr %p
  br label %head
out:
  ret void
}
",
        )?;
        let isolated = isolated.map_err(|r| malformed_error!("{}", r))?;
        let names: Vec<&str> = isolated.blocks.iter().map(|(_, b)| b.name.as_str()).collect();
        assert_eq!(names, vec!["head", "body", "loop.ret"]);

        let (_, ret) = &isolated.blocks[2];
        match &ret.insts[0].kind {
            InstKind::Phi { incoming, .. } => {
                assert_eq!(incoming.len(), 2);
                assert_eq!(incoming[0].0, Operand::bool(false));
                assert_eq!(incoming[1].0, Operand::bool(true));
            }
            other => panic!("expected phi, got {other:?}"),
        }

        // entry now jumps straight to the exit
        let entry = func.entry().ok_or_else(|| malformed_error!("no entry"))?;
        let out = func.block_by_name("out").ok_or_else(|| malformed_error!("no out"))?;
        assert_eq!(func[entry].successors(), vec![out]);
        assert_eq!(func.block_count(), 2);
        Ok(())
    }

    #[test]
    fn test_condition_is_forwarded_and_negated() -> Result<()> {
        let (_, isolated) = isolate(
            r"
define void @f(i1 %c) {
entry:
  br label %head
head:
  br i1 %c, label %out, label %head
out:
  ret void
}
",
        )?;
        let isolated = isolated.map_err(|r| malformed_error!("{}", r))?;
        let (_, head) = &isolated.blocks[0];
        assert!(matches!(
            head.insts.last().map(|i| &i.kind),
            Some(InstKind::Binary { .. })
        ));
        assert!(matches!(head.terminator, Some(Terminator::Br { .. })));
        Ok(())
    }

    #[test]
    fn test_switch_edges_use_stubs() -> Result<()> {
        let (_, isolated) = isolate(
            r"
define void @f(i32 %n) {
entry:
  br label %head
head:
  switch i32 %n, label %head [ i32 1, label %out
                               i32 2, label %out
                               i32 3, label %head ]
out:
  ret void
}
",
        )?;
        let isolated = isolated.map_err(|r| malformed_error!("{}", r))?;
        let names: Vec<&str> = isolated.blocks.iter().map(|(_, b)| b.name.as_str()).collect();
        assert_eq!(names, vec!["head", "loop.continue", "loop.break", "loop.ret"]);
        Ok(())
    }

    #[test]
    fn test_rejection_leaves_function_untouched() -> Result<()> {
        let text = r"
define void @f(i1 %c) {
entry:
  br i1 %c, label %head, label %out
head:
  br i1 %c, label %head, label %out
out:
  ret void
}
";
        let module = Module::parse(text)?;
        let original = module
            .function(module.defined_functions()[0])
            .cloned()
            .ok_or_else(|| malformed_error!("no function"))?;
        let (func, isolated) = isolate(text)?;
        assert_eq!(isolated.err(), Some(SkipReason::NoPreheader));
        assert_eq!(func, original);
        Ok(())
    }
}
