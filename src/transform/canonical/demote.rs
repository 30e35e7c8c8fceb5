//! Register demotion of loop-carried SSA values.
//!
//! After demotion a loop exchanges state with the rest of its function only
//! through entry-block stack slots:
//!
//! ```text
//! Before:                              After:
//!
//! header:                              entry:
//!   %i = phi [0, %pre], [%n, %latch]     %i.slot = alloca i32
//!   ...                                pre:
//! latch:                                 store i32 0, ptr %i.slot
//!   %n = add i32 %i, 1                 header:
//!   br label %header                     %i = load i32, ptr %i.slot
//! exit:                                latch:
//!   use %n                               %n = add i32 %i, 1
//!                                        store i32 %n, ptr %i.slot
//!                                        store i32 %n, ptr %n.slot
//!                                        br label %header
//!                                      exit:
//!                                        %n.reload = load i32, ptr %n.slot
//! ```
//!
//! Three kinds of values are demoted, in this order:
//!
//! 1. Header phis: a store at the end of every incoming predecessor, a load at
//!    the top of the header.
//! 2. Phis of exit blocks: the same treatment, since their in-loop incoming
//!    edges disappear when the loop is extracted.
//! 3. Values defined inside the loop and used outside it: a store right after
//!    the definition and a load in front of every outside use.

use std::collections::{BTreeSet, HashSet};

use crate::{
    analysis::LoopRegion,
    ir::{BlockId, Builder, Function, InstKind, Operand, Type, ValueId},
    Result,
};

/// Allocates stack slots after the leading `alloca`s of the entry block.
pub(crate) struct SlotAllocator {
    entry: BlockId,
    next: usize,
}

impl SlotAllocator {
    /// Creates an allocator for `func`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for declarations.
    pub(crate) fn new(func: &Function) -> Result<Self> {
        let entry = func
            .entry()
            .ok_or_else(|| malformed_error!("@{} has no body", func.name))?;
        let next = func
            .block(entry)
            .map_or(0, |b| b.insts.iter().take_while(|i| i.is_alloca()).count());
        Ok(Self { entry, next })
    }

    /// Emits `alloca ty` in the entry block.
    pub(crate) fn slot(&mut self, func: &mut Function, ty: Type, name: &str) -> ValueId {
        let id = Builder::before(func, self.entry, self.next).alloca(ty, 1, Some(name));
        self.next += 1;
        id
    }
}

fn base_name(func: &Function, value: ValueId) -> String {
    func.value(value)
        .and_then(|v| v.name.clone())
        .unwrap_or_else(|| "tmp".to_string())
}

/// Demotes every phi of `block`.
///
/// Returns the number of demoted phis.
fn demote_phis(func: &mut Function, block: BlockId, slots: &mut SlotAllocator) -> Result<usize> {
    let phis: Vec<_> = {
        let data = func
            .block_mut(block)
            .ok_or_else(|| malformed_error!("{} is not a live block", block))?;
        let count = data.phi_count();
        data.insts.drain(..count).collect()
    };

    let mut reloads = Vec::with_capacity(phis.len());
    for phi in &phis {
        let (Some(result), InstKind::Phi { ty, incoming }) = (phi.result, &phi.kind) else {
            continue;
        };
        let name = base_name(func, result);
        let slot = slots.slot(func, *ty, &format!("{name}.slot"));
        for (value, pred) in incoming {
            Builder::at_end(func, *pred).store(*ty, *value, slot.into());
        }
        reloads.push((result, *ty, slot, name));
    }

    for (index, (result, ty, slot, name)) in reloads.iter().enumerate() {
        let load = Builder::before(func, block, index).load(*ty, (*slot).into(), Some(name.as_str()));
        func.replace_all_uses(Operand::Value(*result), Operand::Value(load));
    }

    Ok(reloads.len())
}

/// Position right after the definition of `value` in `block`, skipping the
/// phi prefix when the definition is a phi.
fn after_definition(func: &Function, block: BlockId, value: ValueId) -> Option<usize> {
    let data = func.block(block)?;
    let index = data.insts.iter().position(|i| i.result == Some(value))?;
    if data.insts[index].is_phi() {
        Some(data.phi_count())
    } else {
        Some(index + 1)
    }
}

/// Rewrites every use of `value` outside `inside` to a fresh load of `slot`.
fn reload_outside_uses(
    func: &mut Function,
    inside: &HashSet<BlockId>,
    value: ValueId,
    ty: Type,
    slot: ValueId,
    name: &str,
) {
    let target = Operand::Value(value);
    let outside: Vec<BlockId> = func
        .layout()
        .iter()
        .copied()
        .filter(|b| !inside.contains(b))
        .collect();
    let reload_name = format!("{name}.reload");

    let mut phi_edges: Vec<(BlockId, usize, BlockId)> = Vec::new();
    for block in outside {
        let mut index = 0;
        loop {
            let Some(data) = func.block(block) else {
                break;
            };
            let Some(inst) = data.insts.get(index) else {
                break;
            };
            if let InstKind::Phi { incoming, .. } = &inst.kind {
                for (op, pred) in incoming {
                    if *op == target {
                        phi_edges.push((block, index, *pred));
                    }
                }
                index += 1;
                continue;
            }
            if inst.operands().contains(&target) {
                let load = Builder::before(func, block, index).load(ty, slot.into(), Some(&reload_name));
                if let Some(data) = func.block_mut(block) {
                    data.insts[index + 1].replace_operand(target, Operand::Value(load));
                }
                index += 2;
            } else {
                index += 1;
            }
        }

        let uses_in_terminator = func
            .block(block)
            .and_then(|b| b.terminator.as_ref())
            .is_some_and(|t| t.operands().contains(&target));
        if uses_in_terminator {
            let load = Builder::at_end(func, block).load(ty, slot.into(), Some(&reload_name));
            if let Some(term) = func.block_mut(block).and_then(|b| b.terminator.as_mut()) {
                for op in term.operands_mut() {
                    if *op == target {
                        *op = Operand::Value(load);
                    }
                }
            }
        }
    }

    // A phi use reads the value at the end of its incoming block.
    for (block, index, pred) in phi_edges {
        let load = Builder::at_end(func, pred).load(ty, slot.into(), Some(&reload_name));
        if let Some(InstKind::Phi { incoming, .. }) = func
            .block_mut(block)
            .and_then(|b| b.insts.get_mut(index))
            .map(|i| &mut i.kind)
        {
            for (op, from) in incoming.iter_mut() {
                if *from == pred && *op == target {
                    *op = Operand::Value(load);
                }
            }
        }
    }
}

/// Values defined in the loop and used by blocks outside it, in handle order.
fn escaping_values(func: &Function, inside: &HashSet<BlockId>) -> BTreeSet<ValueId> {
    let defined: HashSet<ValueId> = inside
        .iter()
        .filter_map(|&b| func.block(b))
        .flat_map(|b| b.defined_values())
        .collect();

    let mut escaping = BTreeSet::new();
    for (id, block) in func.blocks() {
        if inside.contains(&id) {
            continue;
        }
        let inst_ops = block.insts.iter().flat_map(|i| i.operands());
        let term_ops = block.terminator.iter().flat_map(|t| t.operands());
        for op in inst_ops.chain(term_ops) {
            if let Operand::Value(v) = op {
                if defined.contains(&v) {
                    escaping.insert(v);
                }
            }
        }
    }
    escaping
}

/// Demotes the loop-carried values of `region`.
///
/// Returns the number of values moved to stack slots.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the function has no body or a block
/// of the region is not live.
pub fn demote_loop_values(func: &mut Function, region: &LoopRegion) -> Result<usize> {
    let mut slots = SlotAllocator::new(func)?;
    let mut demoted = demote_phis(func, region.header, &mut slots)?;

    for exit in region.exit_blocks() {
        demoted += demote_phis(func, exit, &mut slots)?;
    }

    let inside: HashSet<BlockId> = region.blocks.iter().copied().collect();
    let definitions = func.definitions();
    for value in escaping_values(func, &inside) {
        let Some(&block) = definitions.get(&value) else {
            continue;
        };
        let ty = func
            .value(value)
            .map(|v| v.ty)
            .ok_or_else(|| malformed_error!("Unknown value {}", value))?;
        let name = base_name(func, value);
        let slot = slots.slot(func, ty, &format!("{name}.slot"));
        let at = after_definition(func, block, value)
            .ok_or_else(|| malformed_error!("Definition of {} vanished from {}", value, block))?;
        Builder::before(func, block, at).store(ty, value.into(), slot.into());
        reload_outside_uses(func, &inside, value, ty, slot, &name);
        demoted += 1;
    }

    if demoted > 0 {
        log::trace!(
            "@{}: demoted {} values of the loop at {}",
            func.name,
            demoted,
            region.header
        );
    }
    Ok(demoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::find_loop,
        ir::{verify_function, Module},
    };

    const CARRIED: &str = r"
define i32 @sum(i32 %n) {
entry:
  br label %head
head:
  %i = phi i32 [ 0, %entry ], [ %i.next, %body ]
  %acc = phi i32 [ 0, %entry ], [ %acc.next, %body ]
  %c = icmp slt i32 %i, %n
  br i1 %c, label %body, label %done
body:
  %acc.next = add i32 %acc, %i
  %i.next = add i32 %i, 1
  br label %head
done:
  %r = phi i32 [ %acc, %head ]
  ret i32 %r
}
";

    #[test]
    fn test_demotion_removes_loop_phis() -> Result<()> {
        let mut module = Module::parse(CARRIED)?;
        let id = module.defined_functions()[0];
        let func = module.function_mut(id).ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;

        let demoted = demote_loop_values(func, &region)?;
        assert_eq!(demoted, 3);
        assert_eq!(func[head].phi_count(), 0);
        let done = func.block_by_name("done").ok_or_else(|| malformed_error!("no done"))?;
        assert_eq!(func[done].phi_count(), 0);

        let entry = func.entry().ok_or_else(|| malformed_error!("no entry"))?;
        assert_eq!(func[entry].insts.iter().filter(|i| i.is_alloca()).count(), 3);

        let module_ref = &module;
        verify_function(module_ref, module_ref.function(id).ok_or_else(|| malformed_error!("no function"))?)?;
        Ok(())
    }

    #[test]
    fn test_escaping_value_is_reloaded() -> Result<()> {
        let mut module = Module::parse(
            r"
define i32 @last(i32 %n) {
entry:
  br label %head
head:
  %x = add i32 %n, 7
  %c = icmp eq i32 %x, 0
  br i1 %c, label %head, label %out
out:
  %y = mul i32 %x, 2
  ret i32 %y
}
",
        )?;
        let id = module.defined_functions()[0];
        let func = module.function_mut(id).ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;

        assert_eq!(demote_loop_values(func, &region)?, 1);
        let out = func.block_by_name("out").ok_or_else(|| malformed_error!("no out"))?;
        assert!(matches!(func[out].insts[0].kind, InstKind::Load { .. }));
        assert!(matches!(func[head].insts[1].kind, InstKind::Store { .. }));

        let module_ref = &module;
        verify_function(module_ref, module_ref.function(id).ok_or_else(|| malformed_error!("no function"))?)?;
        Ok(())
    }

    #[test]
    fn test_nothing_to_demote() -> Result<()> {
        let mut module = Module::parse(
            r"
define void @spin(ptr %p) {
entry:
  br label %head
head:
  %v = load i32, ptr %p
  %c = icmp eq i32 %v, 0
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
        let before = func.clone();
        assert_eq!(demote_loop_values(func, &region)?, 0);
        assert_eq!(*func, before);
        Ok(())
    }
}
