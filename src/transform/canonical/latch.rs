//! Latch unification.
//!
//! When several blocks branch back to the header, a new `loop.latch` block is
//! created that receives every back edge and jumps to the header. The loop's
//! `!llvm.loop` annotation moves to the new latch.

use crate::{
    analysis::LoopRegion,
    ir::{BlockId, Builder, Function, InstKind, Operand},
    Result,
};

/// Merges the back edges of `region` into one latch block.
///
/// Returns the new latch, `None` if the loop already had a single latch.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a latch is not a live block.
pub fn unify_latches(func: &mut Function, region: &LoopRegion) -> Result<Option<BlockId>> {
    if region.latches.len() < 2 {
        return Ok(None);
    }

    let last_member = region
        .blocks
        .iter()
        .copied()
        .max_by_key(|b| func.layout().iter().position(|l| l == b))
        .unwrap_or(region.header);
    let latch = func.insert_block_after(last_member, "loop.latch");

    // Step 1: Merge the back-edge values of header phis
    let phi_count = func.block(region.header).map_or(0, |b| b.phi_count());
    for index in 0..phi_count {
        let Some((ty, back)) = func.block(region.header).and_then(|b| match &b.insts[index].kind {
            InstKind::Phi { ty, incoming } => Some((
                *ty,
                incoming
                    .iter()
                    .filter(|(_, pred)| region.latches.contains(pred))
                    .copied()
                    .collect::<Vec<_>>(),
            )),
            _ => None,
        }) else {
            continue;
        };

        let merged = match back.as_slice() {
            [] => continue,
            [(value, _)] => *value,
            _ => Operand::Value(Builder::at_end(func, latch).phi(ty, back.clone(), Some("latch"))),
        };

        if let Some(InstKind::Phi { incoming, .. }) = func
            .block_mut(region.header)
            .and_then(|b| b.insts.get_mut(index))
            .map(|i| &mut i.kind)
        {
            incoming.retain(|(_, pred)| !region.latches.contains(pred));
            incoming.push((merged, latch));
        }
    }

    // Step 2: Redirect the back edges and move the loop annotation
    Builder::at_end(func, latch).br(region.header);
    let mut loop_md = None;
    for &old in &region.latches {
        func.redirect_edge(old, region.header, latch);
        let block = func
            .block_mut(old)
            .ok_or_else(|| malformed_error!("Latch {} is not a live block", old))?;
        loop_md = loop_md.or(block.loop_md.take());
    }
    if let Some(block) = func.block_mut(latch) {
        block.loop_md = loop_md;
    }

    log::trace!(
        "@{}: unified {} latches of the loop at {} into {}",
        func.name,
        region.latches.len(),
        region.header,
        latch
    );
    Ok(Some(latch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::find_loop,
        ir::{verify_function, Module},
    };

    #[test]
    fn test_latch_unification() -> Result<()> {
        let mut module = Module::parse(
            r#"
define i32 @f(i32 %n) {
entry:
  br label %head
head:
  %i = phi i32 [ 0, %entry ], [ %a, %left ], [ %b, %right ]
  %odd = and i32 %i, 1
  %c = icmp eq i32 %odd, 0
  br i1 %c, label %left, label %right
left:
  %a = add i32 %i, 1
  br label %head
right:
  %b = add i32 %i, 3
  %stop = icmp sgt i32 %b, %n
  br i1 %stop, label %exit, label %head, !llvm.loop !0
exit:
  ret i32 %b
}
!0 = distinct !{!0, !1}
!1 = !{!"lambdaizeloop"}
"#,
        )?;
        let id = module.defined_functions()[0];
        let func = module.function_mut(id).ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        assert_eq!(region.latches.len(), 2);

        let latch = unify_latches(func, &region)?.ok_or_else(|| malformed_error!("unchanged"))?;
        assert_eq!(func[latch].name, "loop.latch");
        assert_eq!(func[latch].phi_count(), 1);
        assert!(func[latch].loop_md.is_some());

        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        assert_eq!(region.latches, vec![latch]);
        assert_eq!(unify_latches(func, &region)?, None);

        let module_ref = &module;
        verify_function(module_ref, module_ref.function(id).ok_or_else(|| malformed_error!("no function"))?)?;
        Ok(())
    }
}
