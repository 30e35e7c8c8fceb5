//! Eligibility gate.
//!
//! Decides, without touching the IR, whether a loop is transformed. The checks
//! run in a fixed order and the first failing one names the [`SkipReason`].

use std::fmt;

use rand::Rng;

use crate::{
    analysis::LoopRegion,
    ir::{Function, MdOperand, Module, Terminator},
    transform::lambdaize::config::LambdaizeConfig,
};

/// Why a loop was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The loop carries no annotation with the configured marker.
    NotAnnotated,
    /// The sampling draw rejected the loop.
    NotSampled,
    /// An inner loop is still present (it was skipped itself).
    NestedLoopRemains,
    /// A block of the loop ends in something other than `br` or `switch`.
    UnsupportedTerminator {
        /// Opcode of the offending terminator.
        opcode: &'static str,
    },
    /// A block in the middle of the loop leaves it straight into a `ret` or
    /// `unreachable` block.
    EarlyReturn,
    /// The loop body allocates stack memory.
    AllocaInLoop,
    /// The loop never exits.
    NoExit,
    /// The loop header is the function's entry block.
    HeaderIsEntry,
    /// No dedicated preheader after canonicalisation.
    NoPreheader,
    /// More than one back edge after canonicalisation.
    MultipleLatches,
    /// More than one exit block after canonicalisation.
    MultipleExits,
    /// The header still has phis.
    HeaderPhis,
    /// The exit block has phis.
    ExitPhis,
    /// A value defined in the loop is used after it.
    EscapingValue,
}

impl SkipReason {
    /// Returns `false` for the reasons that come from configuration
    /// (annotation and sampling) rather than from the loop's shape.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::NotAnnotated | Self::NotSampled)
    }

    /// Stable kebab-case identifier, used in machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnnotated => "not-annotated",
            Self::NotSampled => "not-sampled",
            Self::NestedLoopRemains => "nested-loop-remains",
            Self::UnsupportedTerminator { .. } => "unsupported-terminator",
            Self::EarlyReturn => "early-return",
            Self::AllocaInLoop => "alloca-in-loop",
            Self::NoExit => "no-exit",
            Self::HeaderIsEntry => "header-is-entry",
            Self::NoPreheader => "no-preheader",
            Self::MultipleLatches => "multiple-latches",
            Self::MultipleExits => "multiple-exits",
            Self::HeaderPhis => "header-phis",
            Self::ExitPhis => "exit-phis",
            Self::EscapingValue => "escaping-value",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnnotated => f.write_str("loop is not annotated"),
            Self::NotSampled => f.write_str("loop was not sampled"),
            Self::NestedLoopRemains => f.write_str("an inner loop remains"),
            Self::UnsupportedTerminator { opcode } => {
                write!(f, "loop contains a '{opcode}' terminator")
            }
            Self::EarlyReturn => f.write_str("loop body returns from the function"),
            Self::AllocaInLoop => f.write_str("loop body contains an alloca"),
            Self::NoExit => f.write_str("loop has no exit"),
            Self::HeaderIsEntry => f.write_str("loop header is the entry block"),
            Self::NoPreheader => f.write_str("loop has no dedicated preheader"),
            Self::MultipleLatches => f.write_str("loop has several latches"),
            Self::MultipleExits => f.write_str("loop has several exit blocks"),
            Self::HeaderPhis => f.write_str("loop header has phis"),
            Self::ExitPhis => f.write_str("loop exit has phis"),
            Self::EscapingValue => f.write_str("a loop value is used after the loop"),
        }
    }
}

/// Verdict of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// The loop is transformed.
    Eligible,
    /// The loop is left untouched.
    Skip(SkipReason),
}

impl Eligibility {
    /// Returns `true` for [`Eligibility::Eligible`].
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Returns `true` if one of the loop's latches carries loop metadata listing
/// `marker` after the self-reference.
#[must_use]
pub fn has_marker(module: &Module, func: &Function, region: &LoopRegion, marker: &str) -> bool {
    region
        .latches
        .iter()
        .filter_map(|&latch| func.block(latch).and_then(|b| b.loop_md))
        .filter_map(|md| module.metadata_node(md))
        .any(|node| {
            node.operands.iter().skip(1).any(|op| match op {
                MdOperand::String(s) => s == marker,
                MdOperand::Node(id) => module
                    .metadata_node(*id)
                    .and_then(|n| n.property_name())
                    .is_some_and(|name| name == marker),
                MdOperand::Int(_) => false,
            })
        })
}

/// Structural checks that do not depend on configuration.
fn check_structure(func: &Function, region: &LoopRegion) -> Option<SkipReason> {
    if !region.children.is_empty() {
        return Some(SkipReason::NestedLoopRemains);
    }
    for block in region.blocks.iter().filter_map(|&b| func.block(b)) {
        match &block.terminator {
            Some(term) if term.is_branch() => {}
            Some(term) => {
                return Some(SkipReason::UnsupportedTerminator {
                    opcode: term.opcode(),
                })
            }
            None => return Some(SkipReason::UnsupportedTerminator { opcode: "none" }),
        }
    }
    // Exits taken from the header or a latch are the loop condition; any other
    // exiting block reaching a returning block is a `return` in the body.
    let early_return = region
        .exits
        .iter()
        .filter(|(exiting, _)| *exiting != region.header && !region.latches.contains(exiting))
        .filter_map(|&(_, exit)| func.block(exit))
        .any(|b| matches!(b.terminator, Some(Terminator::Ret { .. } | Terminator::Unreachable)));
    if early_return {
        return Some(SkipReason::EarlyReturn);
    }
    let allocates = region
        .blocks
        .iter()
        .filter_map(|&b| func.block(b))
        .any(|b| b.insts.iter().any(|i| i.is_alloca()));
    if allocates {
        return Some(SkipReason::AllocaInLoop);
    }
    if region.exits.is_empty() {
        return Some(SkipReason::NoExit);
    }
    if func.entry() == Some(region.header) {
        return Some(SkipReason::HeaderIsEntry);
    }
    None
}

/// Filters loops before any mutation.
pub struct EligibilityGate<'c> {
    config: &'c LambdaizeConfig,
}

impl<'c> EligibilityGate<'c> {
    /// Creates a gate for `config`.
    #[must_use]
    pub fn new(config: &'c LambdaizeConfig) -> Self {
        Self { config }
    }

    /// Runs every check on `region`, drawing from `rng` for sampling.
    pub fn check<R: Rng + ?Sized>(
        &self,
        module: &Module,
        func: &Function,
        region: &LoopRegion,
        rng: &mut R,
    ) -> Eligibility {
        if !self.config.transform_all && !has_marker(module, func, region, &self.config.marker) {
            return Eligibility::Skip(SkipReason::NotAnnotated);
        }
        if rng.gen::<f64>() >= self.config.probability {
            return Eligibility::Skip(SkipReason::NotSampled);
        }
        match check_structure(func, region) {
            Some(reason) => Eligibility::Skip(reason),
            None => Eligibility::Eligible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    use crate::{analysis::find_loop, Result};

    const ANNOTATED: &str = r#"
define i32 @f(i32 %n) {
entry:
  br label %head
head:
  %i = phi i32 [ 0, %entry ], [ %j, %head ]
  %j = add i32 %i, 1
  %c = icmp slt i32 %j, %n
  br i1 %c, label %head, label %out, !llvm.loop !0
out:
  ret i32 %j
}
!0 = distinct !{!0, !1}
!1 = !{!"lambdaizeloop"}
"#;

    fn verdict(text: &str, config: &LambdaizeConfig) -> Result<Eligibility> {
        let module = Module::parse(text)?;
        let func = module
            .function(module.defined_functions()[0])
            .ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("head").ok_or_else(|| malformed_error!("no head"))?;
        let region = find_loop(func, head).ok_or_else(|| malformed_error!("no loop"))?;
        let mut rng = StdRng::seed_from_u64(7);
        Ok(EligibilityGate::new(config).check(&module, func, &region, &mut rng))
    }

    #[test]
    fn test_annotated_loop_is_eligible() -> Result<()> {
        assert_eq!(verdict(ANNOTATED, &LambdaizeConfig::default())?, Eligibility::Eligible);
        Ok(())
    }

    #[test]
    fn test_marker_mismatch() -> Result<()> {
        let config = LambdaizeConfig::default().with_marker("other");
        assert_eq!(verdict(ANNOTATED, &config)?, Eligibility::Skip(SkipReason::NotAnnotated));
        let config = config.with_transform_all(true);
        assert_eq!(verdict(ANNOTATED, &config)?, Eligibility::Eligible);
        Ok(())
    }

    #[test]
    fn test_probability_zero_skips() -> Result<()> {
        let config = LambdaizeConfig::default().with_probability(0.0);
        assert_eq!(verdict(ANNOTATED, &config)?, Eligibility::Skip(SkipReason::NotSampled));
        Ok(())
    }

    #[test]
    fn test_returning_exit_is_eligible() -> Result<()> {
        let text = r"
define i32 @f(i32 %n) {
entry:
  br label %head
head:
  %c = icmp eq i32 %n, 0
  br i1 %c, label %bail, label %head
bail:
  ret i32 1
}
";
        let config = LambdaizeConfig::default().with_transform_all(true);
        assert_eq!(verdict(text, &config)?, Eligibility::Eligible);
        Ok(())
    }

    #[test]
    fn test_return_in_loop_body_leaves_no_loop() -> Result<()> {
        // The increment block is unreachable once the body returns.
        let module = Module::parse(
            r"
define i32 @return_in_loop() {
entry:
  br label %for.cond
for.cond:
  br i1 true, label %for.body, label %for.end
for.body:
  ret i32 100
for.inc:
  br label %for.cond
for.end:
  ret i32 -1
}
",
        )?;
        let func = module
            .function(module.defined_functions()[0])
            .ok_or_else(|| malformed_error!("no function"))?;
        let head = func.block_by_name("for.cond").ok_or_else(|| malformed_error!("no head"))?;
        assert!(find_loop(func, head).is_none());
        Ok(())
    }

    #[test]
    fn test_conditional_return_in_body() -> Result<()> {
        let text = r"
define i32 @f(i32 %n) {
entry:
  %i = alloca i32
  store i32 0, ptr %i
  br label %head
head:
  %v = load i32, ptr %i
  %c = icmp slt i32 %v, %n
  br i1 %c, label %body, label %out
body:
  %hit = icmp eq i32 %v, 7
  br i1 %hit, label %early, label %inc
inc:
  %w = add i32 %v, 1
  store i32 %w, ptr %i
  br label %head
early:
  ret i32 100
out:
  ret i32 -1
}
";
        let config = LambdaizeConfig::default().with_transform_all(true);
        assert_eq!(verdict(text, &config)?, Eligibility::Skip(SkipReason::EarlyReturn));
        Ok(())
    }

    #[test]
    fn test_alloca_in_loop() -> Result<()> {
        let text = r"
define void @f(i1 %c) {
entry:
  br label %head
head:
  %p = alloca i32
  br i1 %c, label %head, label %out
out:
  ret void
}
";
        let config = LambdaizeConfig::default().with_transform_all(true);
        assert_eq!(verdict(text, &config)?, Eligibility::Skip(SkipReason::AllocaInLoop));
        Ok(())
    }

    #[test]
    fn test_infinite_loop() -> Result<()> {
        let text = r"
define void @f() {
entry:
  br label %head
head:
  br label %head
}
";
        let config = LambdaizeConfig::default().with_transform_all(true);
        assert_eq!(verdict(text, &config)?, Eligibility::Skip(SkipReason::NoExit));
        Ok(())
    }

    #[test]
    fn test_skip_reason_text() {
        let reason = SkipReason::UnsupportedTerminator { opcode: "ret" };
        assert_eq!(reason.to_string(), "loop contains a 'ret' terminator");
        assert_eq!(reason.code(), "unsupported-terminator");
    }
}
