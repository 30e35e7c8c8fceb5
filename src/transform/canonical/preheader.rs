//! Preheader insertion.
//!
//! A loop is entered through a preheader when its header has exactly one
//! predecessor outside the loop and that predecessor branches unconditionally
//! to the header. Otherwise a fresh `loop.preheader` block is placed in front
//! of the header and every outside edge is routed through it:
//!
//! ```text
//!     A       B                 A       B
//!      \     /                   \     /
//!       v   v                     v   v
//!     [header] <--+          [loop.preheader]
//!         |       |                 |
//!        ...   [latch]              v
//!                             [header] <--+
//!                                 |       |
//!                                ...   [latch]
//! ```
//!
//! Header phis, if any are left, get their outside incoming values merged by a
//! phi in the new block.

use crate::{
    analysis::LoopRegion,
    ir::{BlockId, Builder, Function, InstKind, Operand, Terminator},
    Result,
};

/// Outside predecessors of the loop header, in layout order.
fn outside_predecessors(func: &Function, region: &LoopRegion) -> Vec<BlockId> {
    func.predecessors()
        .remove(&region.header)
        .unwrap_or_default()
        .into_iter()
        .filter(|pred| !region.contains(*pred))
        .collect()
}

/// Returns `true` if `region` already has a dedicated preheader.
#[must_use]
pub fn has_dedicated_preheader(func: &Function, region: &LoopRegion) -> bool {
    let preds = outside_predecessors(func, region);
    match preds.as_slice() {
        [single] => matches!(
            func.block(*single).and_then(|b| b.terminator.as_ref()),
            Some(Terminator::Br { target }) if *target == region.header
        ),
        _ => false,
    }
}

/// Inserts a preheader for `region` unless it already has one.
///
/// Returns the new block, `None` if nothing changed.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the header has no outside
/// predecessor (a loop headed by the entry block).
pub fn insert_preheader(func: &mut Function, region: &LoopRegion) -> Result<Option<BlockId>> {
    if has_dedicated_preheader(func, region) {
        return Ok(None);
    }
    let outside = outside_predecessors(func, region);
    if outside.is_empty() {
        return Err(malformed_error!(
            "Loop at {} of @{} has no entry edge",
            region.header,
            func.name
        ));
    }

    // Step 1: Create the block directly in front of the header
    let position = func
        .layout()
        .iter()
        .position(|&b| b == region.header)
        .ok_or_else(|| malformed_error!("{} is not in the layout", region.header))?;
    let preheader = match position.checked_sub(1).map(|p| func.layout()[p]) {
        Some(before) => func.insert_block_after(before, "loop.preheader"),
        None => func.add_block("loop.preheader"),
    };

    // Step 2: Move the outside incoming values of header phis into the preheader
    let phi_count = func.block(region.header).map_or(0, |b| b.phi_count());
    for index in 0..phi_count {
        let Some((ty, entering)) = func.block(region.header).and_then(|b| match &b.insts[index].kind {
            InstKind::Phi { ty, incoming } => Some((
                *ty,
                incoming
                    .iter()
                    .filter(|(_, pred)| outside.contains(pred))
                    .copied()
                    .collect::<Vec<_>>(),
            )),
            _ => None,
        }) else {
            continue;
        };

        let merged = match entering.as_slice() {
            [] => continue,
            [(value, _)] => *value,
            _ => Operand::Value(Builder::at_end(func, preheader).phi(ty, entering.clone(), Some("ph"))),
        };

        if let Some(InstKind::Phi { incoming, .. }) = func
            .block_mut(region.header)
            .and_then(|b| b.insts.get_mut(index))
            .map(|i| &mut i.kind)
        {
            incoming.retain(|(_, pred)| !outside.contains(pred));
            incoming.push((merged, preheader));
        }
    }

    // Step 3: Route every outside edge through the preheader
    Builder::at_end(func, preheader).br(region.header);
    for pred in &outside {
        func.redirect_edge(*pred, region.header, preheader);
    }

    log::trace!(
        "@{}: inserted preheader {} for the loop at {}",
        func.name,
        preheader,
        region.header
    );
    Ok(Some(preheader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::find_loop,
        ir::{verify_function, Module},
    };

    #[test]
    fn test_preheader_insertion() -> Result<()> {
        let mut module = Module::parse(
            r"
define i32 @f(i1 %c, i32 %n) {
entry:
  br i1 %c, label %a, label %b
a:
  br label %head
b:
  br label %head
head:
  %i = phi i32 [ 0, %a ], [ 5, %b ], [ %j, %head ]
  %j = add i32 %i, 1
  %done = icmp sge i32 %j, %n
  br i1 %done, label %exit, label %head
exit:
  ret i32 %j
}
",
        )?;
        let id = module.defined_functions()[0];
        let func = module.function_mut(id).ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        assert!(region.preheader.is_none());

        let preheader = insert_preheader(func, &region)?.ok_or_else(|| malformed_error!("unchanged"))?;
        assert_eq!(func[preheader].name, "loop.preheader");
        assert_eq!(func[preheader].phi_count(), 1);
        assert_eq!(func[head].phis()[0].operands().len(), 2);

        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        assert_eq!(region.preheader, Some(preheader));
        assert!(has_dedicated_preheader(func, &region));
        assert_eq!(insert_preheader(func, &region)?, None);

        let module_ref = &module;
        verify_function(module_ref, module_ref.function(id).ok_or_else(|| malformed_error!("no function"))?)?;
        Ok(())
    }

    #[test]
    fn test_conditional_entry_needs_preheader() -> Result<()> {
        let mut module = Module::parse(
            r"
define void @f(i1 %c) {
entry:
  br i1 %c, label %head, label %exit
head:
  br i1 %c, label %head, label %exit
exit:
  ret void
}
",
        )?;
        let id = module.defined_functions()[0];
        let func = module.function_mut(id).ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        assert!(!has_dedicated_preheader(func, &region));
        let preheader = insert_preheader(func, &region)?.ok_or_else(|| malformed_error!("unchanged"))?;
        assert_eq!(func.layout()[1], preheader);
        Ok(())
    }
}
