//! Control flow canonicalisation of a single loop.
//!
//! Extraction needs a loop with one way in, one back edge and one way out,
//! whose state crosses iteration boundaries only through memory. The steps
//! below establish that shape for one loop, each of them preserving the
//! function's semantics:
//!
//! 1. [`demote_loop_values`] - header phis, exit phis and values escaping the
//!    loop move to entry-block stack slots
//! 2. [`insert_preheader`] - a dedicated block in front of the header
//! 3. [`unify_latches`] - a single back edge
//! 4. [`unify_exits`] - a single exit block (control-flow hub)
//!
//! Demotion runs first so the later steps never have phis to patch.

mod demote;
mod exits;
mod latch;
mod preheader;

pub use demote::demote_loop_values;
pub use exits::unify_exits;
pub use latch::unify_latches;
pub use preheader::{has_dedicated_preheader, insert_preheader};

use crate::{
    analysis::{find_loop, LoopRegion},
    compiler::{EventKind, EventLog},
    ir::{BlockId, Function},
    Result,
};

/// Brings the loop headed by `header` into canonical shape.
///
/// Every applied step is recorded in `events`. Returns the loop as it looks
/// afterwards.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if `header` no longer heads a loop or
/// one of the steps finds the function inconsistent.
pub fn canonicalize_loop(func: &mut Function, header: BlockId, events: &EventLog) -> Result<LoopRegion> {
    let lookup = |func: &Function| {
        find_loop(func, header)
            .ok_or_else(|| malformed_error!("{} of @{} does not head a loop", header, func.name))
    };
    let label = func.block(header).map(|b| b.name.clone()).unwrap_or_default();

    let region = lookup(func)?;
    let demoted = demote_loop_values(func, &region)?;
    if demoted > 0 {
        events
            .record(EventKind::ValueDemoted)
            .at(&func.name, &label)
            .message(format!("{demoted} values moved to stack slots"));
    }

    if let Some(block) = insert_preheader(func, &region)? {
        events
            .record(EventKind::PreheaderInserted)
            .at(&func.name, &label)
            .message(format!("inserted %{}", func[block].name));
    }

    let region = lookup(func)?;
    if let Some(block) = unify_latches(func, &region)? {
        events
            .record(EventKind::LatchesUnified)
            .at(&func.name, &label)
            .message(format!(
                "{} back edges merged into %{}",
                region.latches.len(),
                func[block].name
            ));
    }

    let region = lookup(func)?;
    if let Some(block) = unify_exits(func, &region)? {
        events
            .record(EventKind::ExitsUnified)
            .at(&func.name, &label)
            .message(format!(
                "{} exits routed through %{}",
                region.exit_blocks().len(),
                func[block].name
            ));
    }

    lookup(func)
}
