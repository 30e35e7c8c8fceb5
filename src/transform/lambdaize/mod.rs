//! Loop lambdaization.
//!
//! Replaces loops by out-of-line functions that run a single iteration, plus a
//! call to the `looper` repetition driver that keeps calling them until they
//! return `false`:
//!
//! ```text
//! Before:                                After:
//!
//! entry:                                 entry:
//!   br label %head                         call void @looper(ptr @extracted_0, ptr %i.slot)
//! head:                                    br label %out
//!   ...                                  out:
//!   br i1 %c, label %head, label %out      ...
//! out:
//!   ...                                  define private i1 @extracted_0(ptr %cursor) noinline
//! ```
//!
//! # Pipeline per loop
//!
//! 1. [`EligibilityGate`] - read-only filtering (annotation, sampling, shape)
//! 2. [`canonicalize_loop`](crate::transform::canonical::canonicalize_loop) -
//!    demotion, preheader, single latch, single exit
//! 3. [`isolate_loop`] - continue/break signal and block detachment
//! 4. [`extract_function`] - new function with capture unpacking
//! 5. [`rewrite_call_site`] - `looper` call in the preheader
//!
//! Loops are visited innermost first; after every extraction the loop forest
//! of the host is recomputed, so an outer loop becomes a candidate once its
//! inner loops are gone. Steps 2 to 5 run against a backup of the host and a
//! [`ModuleSnapshot`]; when the isolator still rejects the loop, or a later
//! step fails, both are restored so the module is left as it was.
//!
//! A loop that carries the marker but is skipped for its shape also gets a
//! [`EventKind::Warning`].

mod callsite;
mod config;
mod eligibility;
mod extract;
mod isolate;

pub use callsite::{declare_looper, rewrite_call_site, LOOPER};
pub use config::{ExtractionStyle, LambdaizeConfig, DEFAULT_MARKER};
pub use eligibility::{has_marker, Eligibility, EligibilityGate, SkipReason};
pub use extract::{extract_function, Extraction, EXTRACTED_PREFIX, TRAMPOLINE_PREFIX};
pub use isolate::{isolate_loop, IsolatedLoop};

use std::collections::HashSet;

use rand::Rng;

use crate::{
    analysis::{FunctionCfg, LoopRegion},
    compiler::{EventKind, EventLog, ModulePass},
    ir::{BlockId, FuncId, Function, Module, ModuleSnapshot},
    transform::canonical::canonicalize_loop,
    Result,
};

/// Outcome of one attempted loop.
enum Attempt {
    Extracted(Extraction),
    Skipped(SkipReason),
}

/// The `lambdaize-loop` module pass.
pub struct LambdaizePass {
    config: LambdaizeConfig,
}

impl LambdaizePass {
    /// Registered pass name.
    pub const NAME: &'static str = "lambdaize-loop";

    /// Creates the pass.
    #[must_use]
    pub fn new(config: LambdaizeConfig) -> Self {
        Self { config }
    }

    /// The configuration the pass runs with.
    #[must_use]
    pub fn config(&self) -> &LambdaizeConfig {
        &self.config
    }

    /// Next loop to look at: the deepest one whose header was not visited yet.
    fn next_candidate(module: &Module, id: FuncId, visited: &HashSet<BlockId>) -> Option<LoopRegion> {
        let func = module.function(id)?;
        let cfg = FunctionCfg::new(func);
        let forest = cfg.loops();
        forest
            .by_depth_descending()
            .into_iter()
            .map(|info| cfg.region(info))
            .find(|region| !visited.contains(&region.header))
    }

    /// Runs steps 2 to 5 on the loop headed by `header`.
    fn transform_loop(&self, module: &mut Module, id: FuncId, header: BlockId, events: &EventLog) -> Result<Attempt> {
        let func = module
            .function_mut(id)
            .ok_or_else(|| malformed_error!("Unknown function {:?}", id))?;
        let region = canonicalize_loop(func, header, events)?;
        let isolated = match isolate_loop(func, &region) {
            Ok(isolated) => isolated,
            Err(reason) => return Ok(Attempt::Skipped(reason)),
        };
        if !module.is_symbol_free(LOOPER) && module.function_by_name(LOOPER).is_none() {
            return Err(malformed_error!("Symbol @{} is taken by a global", LOOPER));
        }
        let preheader = isolated.preheader;
        let extraction = extract_function(module, id, isolated, self.config.style)?;
        rewrite_call_site(module, id, preheader, &extraction)?;
        Ok(Attempt::Extracted(extraction))
    }

    /// Lambdaizes the eligible loops of one function.
    ///
    /// Returns the number of extracted loops.
    fn run_on_function<R: Rng + ?Sized>(
        &self,
        module: &mut Module,
        id: FuncId,
        events: &EventLog,
        rng: &mut R,
    ) -> Result<usize> {
        let gate = EligibilityGate::new(&self.config);
        let mut visited = HashSet::new();
        let mut extracted = 0;

        while let Some(region) = Self::next_candidate(module, id, &visited) {
            visited.insert(region.header);
            let func = module
                .function(id)
                .ok_or_else(|| malformed_error!("Unknown function {:?}", id))?;
            let name = func.name.clone();
            let label = func.block(region.header).map(|b| b.name.clone()).unwrap_or_default();
            let annotated = has_marker(module, func, &region, &self.config.marker);

            if let Eligibility::Skip(reason) = gate.check(module, func, &region, rng) {
                self.skip(events, &name, &label, reason, annotated);
                continue;
            }

            // Canonicalisation events only count if the loop is extracted.
            let backup = func.clone();
            let snapshot = module.snapshot();
            let scratch = EventLog::new();
            let attempt = self.transform_loop(module, id, region.header, &scratch);
            match attempt {
                Ok(Attempt::Extracted(extraction)) => {
                    events.merge(&scratch);
                    self.extracted(module, events, &name, &label, &extraction);
                    extracted += 1;
                }
                Ok(Attempt::Skipped(reason)) => {
                    self.restore(module, id, backup, snapshot)?;
                    self.skip(events, &name, &label, reason, annotated);
                }
                Err(e) => {
                    self.restore(module, id, backup, snapshot)?;
                    return Err(e);
                }
            }
        }
        Ok(extracted)
    }

    /// Puts the host back and drops every symbol the attempt added.
    fn restore(&self, module: &mut Module, id: FuncId, backup: Function, snapshot: ModuleSnapshot) -> Result<()> {
        module.restore(snapshot);
        let slot = module
            .function_mut(id)
            .ok_or_else(|| malformed_error!("Unknown function {:?}", id))?;
        *slot = backup;
        Ok(())
    }

    fn skip(&self, events: &EventLog, function: &str, label: &str, reason: SkipReason, annotated: bool) {
        log::debug!("@{function}: loop at %{label} skipped: {reason}");
        events
            .record(EventKind::LoopSkipped)
            .at(function, label)
            .message(reason.code())
            .pass(Self::NAME);
        if annotated && reason.is_structural() {
            log::warn!("@{function}: annotated loop at %{label} left in place: {reason}");
            events
                .record(EventKind::Warning)
                .at(function, label)
                .message(format!("annotated loop left in place ({})", reason.code()))
                .pass(Self::NAME);
        }
    }

    fn extracted(&self, module: &Module, events: &EventLog, function: &str, label: &str, extraction: &Extraction) {
        let symbol = |id| module.function(id).map(|f| f.name.clone()).unwrap_or_default();
        log::debug!(
            "@{function}: loop at %{label} extracted into @{} with {} captures",
            symbol(extraction.function),
            extraction.captures.len()
        );
        events
            .record(EventKind::LoopExtracted)
            .at(function, label)
            .message(format!(
                "@{} ({} captures)",
                symbol(extraction.function),
                extraction.captures.len()
            ))
            .pass(Self::NAME);
        if extraction.has_trampoline() {
            events
                .record(EventKind::TrampolineCreated)
                .at(function, label)
                .message(format!("@{}", symbol(extraction.entry_point)))
                .pass(Self::NAME);
        }
    }
}

impl Default for LambdaizePass {
    fn default() -> Self {
        Self::new(LambdaizeConfig::default())
    }
}

impl ModulePass for LambdaizePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Replaces loops by extracted per-iteration functions driven by @looper"
    }

    fn initialize(&mut self, _module: &Module) -> Result<()> {
        self.config.validate()
    }

    fn run(&mut self, module: &mut Module, events: &EventLog) -> Result<bool> {
        let mut rng = self.config.rng();
        let mut total = 0;
        for id in module.defined_functions() {
            total += self.run_on_function(module, id, events, &mut rng)?;
        }
        Ok(total > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{print_function, verify_module, InstKind};

    const ANNOTATED_SUM: &str = r#"
define i32 @sum() {
entry:
  br label %loop
loop:
  %i = phi i32 [ 1, %entry ], [ %i.next, %loop ]
  %acc = phi i32 [ 0, %entry ], [ %acc.next, %loop ]
  %acc.next = add i32 %acc, %i
  %i.next = add i32 %i, 1
  %done = icmp sgt i32 %i.next, 10
  br i1 %done, label %exit, label %loop, !llvm.loop !0
exit:
  ret i32 %acc.next
}
!0 = distinct !{!0, !1}
!1 = !{!"lambdaizeloop"}
"#;

    fn has_call_to(module: &Module, caller: &str, callee: &str) -> bool {
        let Some(callee) = module.function_by_name(callee) else {
            return false;
        };
        module
            .function_by_name(caller)
            .and_then(|id| module.function(id))
            .is_some_and(|f| {
                f.blocks().any(|(_, b)| {
                    b.insts.iter().any(|i| {
                        matches!(i.kind, InstKind::Call { callee: c, .. } if c == crate::ir::Operand::Func(callee))
                    })
                })
            })
    }

    #[test]
    fn test_annotated_loop_is_extracted() -> Result<()> {
        let mut module = Module::parse(ANNOTATED_SUM)?;
        let events = EventLog::new();
        let mut pass = LambdaizePass::default();
        pass.initialize(&module)?;
        assert!(pass.run(&mut module, &events)?);

        assert!(has_call_to(&module, "sum", LOOPER));
        assert!(module.function_by_name("extracted_0").is_some());
        assert_eq!(events.count_kind(EventKind::LoopExtracted), 1);
        assert!(events.has(EventKind::ValueDemoted));

        let sum = module.function_by_name("sum").and_then(|id| module.function(id));
        let sum = sum.ok_or_else(|| malformed_error!("no sum"))?;
        assert!(FunctionCfg::new(sum).loops().is_empty());
        verify_module(&module)?;
        Ok(())
    }

    #[test]
    fn test_unannotated_module_is_unchanged() -> Result<()> {
        let text = ANNOTATED_SUM.replace(", !llvm.loop !0", "");
        let mut module = Module::parse(&text)?;
        let before = module.clone();
        let events = EventLog::new();
        assert!(!LambdaizePass::default().run(&mut module, &events)?);
        assert_eq!(module, before);
        assert_eq!(events.count_kind(EventKind::LoopSkipped), 1);
        Ok(())
    }

    #[test]
    fn test_unsampled_loop_is_untouched() -> Result<()> {
        let mut module = Module::parse(ANNOTATED_SUM)?;
        let id = module.defined_functions()[0];
        let before = module.function(id).map(|f| print_function(&module, f));
        let config = LambdaizeConfig::default().with_probability(0.0);
        let events = EventLog::new();
        assert!(!LambdaizePass::new(config).run(&mut module, &events)?);
        assert_eq!(module.function(id).map(|f| print_function(&module, f)), before);
        assert!(module.function_by_name(LOOPER).is_none());
        assert_eq!(
            events.filter_kind(EventKind::LoopSkipped).next().map(|e| e.message.clone()),
            Some("not-sampled".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_transform_all_ignores_annotation() -> Result<()> {
        let text = ANNOTATED_SUM.replace(", !llvm.loop !0", "");
        let mut module = Module::parse(&text)?;
        let config = LambdaizeConfig::default().with_transform_all(true).with_seed(1);
        assert!(LambdaizePass::new(config).run(&mut module, &EventLog::new())?);
        verify_module(&module)?;
        Ok(())
    }

    #[test]
    fn test_c_program_output_is_preserved() -> Result<()> {
        use crate::test::{execute, lambdaize, TEST_C};

        let original = Module::parse(TEST_C)?;
        let mut transformed = original.clone();
        let (changed, events) = lambdaize(&mut transformed, LambdaizeConfig::default())?;
        assert!(changed);
        assert_eq!(events.count_kind(EventKind::LoopExtracted), 9);

        let before = execute(&original, "main", &[])?;
        let after = execute(&transformed, "main", &[])?;
        assert_eq!(before.output, "30\n100\n42\n488\n1\n2\n3\n\n2\n4\n6\n\n3\n6\n9\n\n1000\n");
        assert_eq!(after.output, before.output);
        assert_eq!(after.ret, Some(0));
        assert_eq!(before.driver_calls, 0);
        assert!(after.driver_calls > 0);
        Ok(())
    }

    #[test]
    fn test_annotated_loop_skipped_for_shape_warns() -> Result<()> {
        let text = r#"
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
  br label %head, !llvm.loop !0
early:
  ret i32 100
out:
  ret i32 -1
}
!0 = distinct !{!0, !1}
!1 = !{!"lambdaizeloop"}
"#;
        let mut module = Module::parse(text)?;
        let events = EventLog::new();
        assert!(!LambdaizePass::default().run(&mut module, &events)?);

        let warnings: Vec<_> = events.filter_kind(EventKind::Warning).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].function.as_deref(), Some("f"));
        assert_eq!(warnings[0].location.as_deref(), Some("head"));
        assert_eq!(warnings[0].message, "annotated loop left in place (early-return)");

        // Without the annotation the same skip is routine.
        let mut module = Module::parse(&text.replace(", !llvm.loop !0", ""))?;
        let events = EventLog::new();
        let config = LambdaizeConfig::default().with_transform_all(true);
        assert!(!LambdaizePass::new(config).run(&mut module, &events)?);
        assert_eq!(events.count_kind(EventKind::LoopSkipped), 1);
        assert!(!events.has(EventKind::Warning));
        Ok(())
    }

    #[test]
    fn test_invalid_config_fails_initialize() {
        let module = Module::new("m");
        let mut pass = LambdaizePass::new(LambdaizeConfig::default().with_probability(2.0));
        assert!(pass.initialize(&module).is_err());
    }
}
