//! Exit unification through a control-flow hub.
//!
//! A loop leaving to several blocks is given a single exit:
//!
//! ```text
//! Before:                           After:
//!
//! [a] --c--> [x]                    [a]: store (c ? 0 : idx(b-succ)) -> %sel
//!  |                                 |      \
//!  v                                 v       \-> [loop.exit]
//! [b] --d--> [y]                    [b]: store 1 -> %sel  /     |
//!  |                                 |  \----------------/      | switch %sel
//!  v                                 v                         / \
//! [header]                          [header]                 [x] [y]
//! ```
//!
//! Every exiting block records the index of the exit it is about to take in an
//! entry-block `i32` selector slot, immediately before its terminator. All exit
//! edges then go to the `loop.exit` hub, which reloads the selector and
//! dispatches to the original exit. The last store executed before leaving the
//! loop is always the one of the edge actually taken.

use crate::{
    analysis::LoopRegion,
    ir::{BlockId, Builder, Function, IcmpPred, Operand, Terminator, Type},
    transform::canonical::demote::SlotAllocator,
    Result,
};

/// Computes the selector value stored by one exiting block.
///
/// `index` maps a successor to its exit index, `None` for in-loop successors.
fn emit_selector(
    func: &mut Function,
    block: BlockId,
    term: &Terminator,
    index: impl Fn(BlockId) -> Option<i64>,
) -> Operand {
    let i32_const = |v: i64| Operand::int(Type::I32, v);

    let mut distinct: Vec<i64> = term.successors().into_iter().filter_map(&index).collect();
    distinct.sort_unstable();
    distinct.dedup();
    if let [only] = distinct.as_slice() {
        return i32_const(*only);
    }

    match term {
        Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        } => {
            // Both successors are distinct exits here.
            let on_true = index(*then_dest).unwrap_or_default();
            let on_false = index(*else_dest).unwrap_or_default();
            let sel = Builder::at_end(func, block).select(
                Type::I32,
                *cond,
                i32_const(on_true),
                i32_const(on_false),
                Some("exit.sel"),
            );
            Operand::Value(sel)
        }
        Terminator::Switch {
            ty,
            value,
            default,
            cases,
        } => {
            // In-loop cases may select anything: the loop goes on and stores again.
            let fallback = distinct.first().copied().unwrap_or_default();
            let mut acc = i32_const(index(*default).unwrap_or(fallback));
            for (case, dest) in cases {
                let Some(target) = index(*dest) else {
                    continue;
                };
                let mut b = Builder::at_end(func, block);
                let hit = b.icmp(IcmpPred::Eq, *ty, *value, Operand::int(*ty, *case), Some("exit.case"));
                acc = Operand::Value(b.select(
                    Type::I32,
                    Operand::Value(hit),
                    i32_const(target),
                    acc,
                    Some("exit.sel"),
                ));
            }
            acc
        }
        _ => i32_const(distinct.first().copied().unwrap_or_default()),
    }
}

/// Routes the exits of `region` through a single hub block.
///
/// Returns the hub, `None` if the loop already had at most one exit block.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if an exit block still has phis (they
/// must be demoted first) or an exiting block has no terminator.
pub fn unify_exits(func: &mut Function, region: &LoopRegion) -> Result<Option<BlockId>> {
    let exits = region.exit_blocks();
    if exits.len() < 2 {
        return Ok(None);
    }
    for &exit in &exits {
        if func.block(exit).is_some_and(|b| b.phi_count() > 0) {
            return Err(malformed_error!(
                "Exit {} of the loop at {} still has phis",
                exit,
                region.header
            ));
        }
    }
    let exiting = region.exiting_blocks();
    let mut terms = Vec::with_capacity(exiting.len());
    for &block in &exiting {
        let term = func
            .block(block)
            .and_then(|b| b.terminator.clone())
            .ok_or_else(|| malformed_error!("Exiting block {} has no terminator", block))?;
        terms.push((block, term));
    }

    // Step 1: Selector slot and hub
    let mut slots = SlotAllocator::new(func)?;
    let selector = slots.slot(func, Type::I32, "exit.slot");
    let last_member = region
        .blocks
        .iter()
        .copied()
        .max_by_key(|b| func.layout().iter().position(|l| l == b))
        .unwrap_or(region.header);
    let hub = func.insert_block_after(last_member, "loop.exit");

    let index_of = |block: BlockId| {
        exits
            .iter()
            .position(|&e| e == block)
            .and_then(|i| i64::try_from(i).ok())
    };

    // Step 2: Record the taken exit and redirect the exit edges
    for (block, term) in &terms {
        let sel = emit_selector(func, *block, term, &index_of);
        Builder::at_end(func, *block).store(Type::I32, sel, selector.into());
        for &exit in &exits {
            func.redirect_edge(*block, exit, hub);
        }
    }

    // Step 3: Dispatch from the hub
    let mut b = Builder::at_end(func, hub);
    let which = b.load(Type::I32, selector.into(), Some("exit.which"));
    let cases = exits
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, &exit)| i64::try_from(i).ok().map(|i| (i, exit)))
        .collect();
    b.switch(Type::I32, Operand::Value(which), exits[0], cases);

    log::trace!(
        "@{}: routed {} exits of the loop at {} through {}",
        func.name,
        exits.len(),
        region.header,
        hub
    );
    Ok(Some(hub))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::find_loop,
        ir::{verify_function, InstKind, Module},
    };

    #[test]
    fn test_two_exits_become_one() -> Result<()> {
        let mut module = Module::parse(
            r"
define i32 @f(i32 %n) {
entry:
  br label %head
head:
  %c = icmp eq i32 %n, 3
  br i1 %c, label %three, label %body
body:
  %d = icmp eq i32 %n, 4
  br i1 %d, label %four, label %head
three:
  ret i32 3
four:
  ret i32 4
}
",
        )?;
        let id = module.defined_functions()[0];
        let func = module.function_mut(id).ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        assert_eq!(region.exit_blocks().len(), 2);

        let hub = unify_exits(func, &region)?.ok_or_else(|| malformed_error!("unchanged"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        assert_eq!(region.exit_blocks(), vec![hub]);
        assert!(matches!(
            func[hub].terminator,
            Some(Terminator::Switch { ref cases, .. }) if cases.len() == 1
        ));
        assert!(matches!(func[head].insts.last().map(|i| &i.kind), Some(InstKind::Store { .. })));

        let module_ref = &module;
        verify_function(module_ref, module_ref.function(id).ok_or_else(|| malformed_error!("no function"))?)?;
        Ok(())
    }

    #[test]
    fn test_switch_exits_use_select_chain() -> Result<()> {
        let mut module = Module::parse(
            r"
define i32 @f(i32 %n) {
entry:
  br label %head
head:
  switch i32 %n, label %head [ i32 1, label %one
                               i32 2, label %two ]
one:
  ret i32 1
two:
  ret i32 2
}
",
        )?;
        let id = module.defined_functions()[0];
        let func = module.function_mut(id).ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;

        unify_exits(func, &region)?.ok_or_else(|| malformed_error!("unchanged"))?;
        let selects = func[head]
            .insts
            .iter()
            .filter(|i| matches!(i.kind, InstKind::Select { .. }))
            .count();
        assert_eq!(selects, 2);

        let module_ref = &module;
        verify_function(module_ref, module_ref.function(id).ok_or_else(|| malformed_error!("no function"))?)?;
        Ok(())
    }

    #[test]
    fn test_single_exit_untouched() -> Result<()> {
        let mut module = Module::parse(
            r"
define void @f(i1 %c) {
entry:
  br label %head
head:
  br i1 %c, label %head, label %out
out:
  ret void
}
",
        )?;
        let id = module.defined_functions()[0];
        let func = module.function_mut(id).ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        assert_eq!(unify_exits(func, &region)?, None);
        Ok(())
    }
}
