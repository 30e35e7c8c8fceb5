//! End-to-end tests of the `lambdaize-loop` pass.
//!
//! Every test parses a fixture, runs the pass, verifies the result and, where
//! the program computes something, runs both versions through the interpreter
//! and compares return values and output.

use lambdaize::{
    analysis::FunctionCfg,
    compiler::{EventKind, EventLog, ModulePass, PassRegistry},
    ir::{print_function, print_module, verify_module, Module},
    runtime::{run_function, DriverStrategy, Execution, Looper, DEFAULT_STEP_LIMIT},
    transform::{ExtractionStyle, LambdaizeConfig, LambdaizePass, EXTRACTED_PREFIX, LOOPER, TRAMPOLINE_PREFIX},
    Result,
};

const TEST_C: &str = include_str!("fixtures/test_c.ll");
const KERNELS: &str = include_str!("fixtures/kernels.ll");

/// Parses `source`, lambdaizes it with `config` and verifies the result.
fn transform(source: &str, config: LambdaizeConfig) -> Result<(Module, Module, EventLog)> {
    let original = Module::parse(source)?;
    let mut module = original.clone();
    let events = EventLog::new();
    let mut pass = LambdaizePass::new(config);
    pass.initialize(&module)?;
    pass.run(&mut module, &events)?;
    pass.finalize(&module)?;
    verify_module(&module)?;
    Ok((original, module, events))
}

fn run(module: &Module, name: &str, args: &[i64]) -> Result<Execution> {
    run_function(module, name, args, Looper::default(), DEFAULT_STEP_LIMIT)
}

/// Runs `name` on both modules and checks they agree; returns the result.
fn same_result(original: &Module, transformed: &Module, name: &str, args: &[i64]) -> Result<Execution> {
    let before = run(original, name, args)?;
    let after = run(transformed, name, args)?;
    assert_eq!(before.ret, after.ret, "@{name}{args:?} return value");
    assert_eq!(before.output, after.output, "@{name}{args:?} output");
    Ok(after)
}

fn function_text(module: &Module, name: &str) -> Option<String> {
    let id = module.function_by_name(name)?;
    module.function(id).map(|f| print_function(module, f))
}

fn loop_count(module: &Module) -> usize {
    module
        .functions()
        .filter(|(_, f)| !f.is_declaration())
        .map(|(_, f)| FunctionCfg::new(f).loops().len())
        .sum()
}

#[test]
fn test_sum_to_ten_is_55() -> Result<()> {
    let (original, module, events) = transform(KERNELS, LambdaizeConfig::default())?;
    let after = same_result(&original, &module, "sum_to", &[10])?;
    assert_eq!(after.ret, Some(55));
    assert_eq!(after.driver_calls, 1);
    assert_eq!(after.iterations, 10);
    assert!(events.has(EventKind::ValueDemoted));
    Ok(())
}

#[test]
fn test_switch_in_loop_is_42() -> Result<()> {
    let (original, module, _) = transform(TEST_C, LambdaizeConfig::default())?;
    assert_eq!(same_result(&original, &module, "switch_in_loop", &[])?.ret, Some(42));
    assert_eq!(same_result(&original, &module, "switch_in_loop_squared", &[])?.ret, Some(488));
    Ok(())
}

#[test]
fn test_multiple_loops_is_30() -> Result<()> {
    let (original, module, _) = transform(TEST_C, LambdaizeConfig::default())?;
    let after = same_result(&original, &module, "multiple_loops", &[])?;
    assert_eq!(after.ret, Some(30));
    assert_eq!(after.driver_calls, 2);
    assert_eq!(after.iterations, 32);
    Ok(())
}

#[test]
fn test_return_in_loop_is_left_alone() -> Result<()> {
    let (original, module, events) = transform(TEST_C, LambdaizeConfig::default())?;
    assert_eq!(function_text(&module, "return_in_loop"), function_text(&original, "return_in_loop"));
    assert_eq!(same_result(&original, &module, "return_in_loop", &[])?.ret, Some(100));
    assert_eq!(events.filter_function("return_in_loop").count(), 0);

    let (original, module, events) = transform(KERNELS, LambdaizeConfig::default())?;
    assert_eq!(function_text(&module, "first_odd_from"), function_text(&original, "first_odd_from"));
    assert!(events
        .filter_kind(EventKind::LoopSkipped)
        .any(|e| e.function.as_deref() == Some("first_odd_from") && e.message == "early-return"));
    assert_eq!(same_result(&original, &module, "first_odd_from", &[4])?.ret, Some(5));
    Ok(())
}

#[test]
fn test_whole_program_output() -> Result<()> {
    let (original, module, events) = transform(TEST_C, LambdaizeConfig::default())?;
    let after = same_result(&original, &module, "main", &[])?;
    assert_eq!(after.output, "30\n100\n42\n488\n1\n2\n3\n\n2\n4\n6\n\n3\n6\n9\n\n1000\n");
    assert_eq!(events.count_kind(EventKind::LoopExtracted), 9);
    assert_eq!(loop_count(&module), 0);
    Ok(())
}

#[test]
fn test_nested_loops_innermost_first() -> Result<()> {
    let (original, module, events) = transform(TEST_C, LambdaizeConfig::default())?;
    let after = same_result(&original, &module, "triple_nested_loop", &[])?;
    assert_eq!(after.ret, Some(1000));
    // 1 outer + 10 middle + 100 inner driver calls.
    assert_eq!(after.driver_calls, 111);

    let order: Vec<_> = events
        .filter_kind(EventKind::LoopExtracted)
        .filter(|e| e.function.as_deref() == Some("triple_nested_loop"))
        .filter_map(|e| e.location.clone())
        .collect();
    assert_eq!(order, vec!["for.cond4", "for.cond1", "for.cond"]);

    let out = same_result(&original, &module, "double_nested_loop", &[])?;
    assert_eq!(out.output, "1\n2\n3\n\n2\n4\n6\n\n3\n6\n9\n\n");
    Ok(())
}

#[test]
fn test_depth_cutoff_with_ten_thousand_iterations() -> Result<()> {
    let (original, module, _) = transform(KERNELS, LambdaizeConfig::default())?;
    for strategy in [
        DriverStrategy::Iterative,
        DriverStrategy::OneArgument,
        DriverStrategy::MultipleArguments,
    ] {
        let looper = Looper::new(strategy, 512);
        let after = run_function(&module, "count_to", &[10_000], looper, DEFAULT_STEP_LIMIT)?;
        assert_eq!(after.ret, Some(10_000), "{strategy}");
        assert_eq!(after.iterations, 10_001, "{strategy}");
    }
    assert_eq!(run(&original, "count_to", &[10_000])?.ret, Some(10_000));
    Ok(())
}

#[test]
fn test_multi_exit_loop_goes_through_hub() -> Result<()> {
    let (original, module, events) = transform(KERNELS, LambdaizeConfig::default())?;
    assert!(events
        .filter_kind(EventKind::ExitsUnified)
        .any(|e| e.function.as_deref() == Some("find_square")));
    assert_eq!(same_result(&original, &module, "find_square", &[49])?.ret, Some(7));
    assert_eq!(same_result(&original, &module, "find_square", &[50])?.ret, Some(-1));
    assert_eq!(same_result(&original, &module, "find_square", &[0])?.ret, Some(0));
    Ok(())
}

#[test]
fn test_two_latches_are_unified() -> Result<()> {
    let (original, module, events) = transform(KERNELS, LambdaizeConfig::default())?;
    assert!(events
        .filter_kind(EventKind::LatchesUnified)
        .any(|e| e.function.as_deref() == Some("two_latches")));
    assert_eq!(same_result(&original, &module, "two_latches", &[10])?.ret, Some(5));
    assert_eq!(same_result(&original, &module, "two_latches", &[1])?.ret, Some(0));
    Ok(())
}

#[test]
fn test_probability_zero_and_one() -> Result<()> {
    let config = LambdaizeConfig::default().with_probability(0.0);
    let (original, module, events) = transform(TEST_C, config)?;
    assert_eq!(print_module(&module), print_module(&original));
    assert_eq!(events.count_kind(EventKind::LoopExtracted), 0);
    assert!(module.function_by_name(LOOPER).is_none());

    let config = LambdaizeConfig::default().with_probability(1.0).with_seed(3);
    let (_, module, events) = transform(TEST_C, config)?;
    assert_eq!(events.count_kind(EventKind::LoopExtracted), 9);
    assert!(module.function_by_name(LOOPER).is_some());
    Ok(())
}

#[test]
fn test_sampling_is_reproducible_with_a_seed() -> Result<()> {
    let config = LambdaizeConfig::default().with_probability(0.5).with_seed(42);
    let (original, first, _) = transform(TEST_C, config.clone())?;
    let (_, second, _) = transform(TEST_C, config)?;
    assert_eq!(print_module(&first), print_module(&second));
    same_result(&original, &first, "main", &[])?;
    Ok(())
}

#[test]
fn test_typed_style_creates_trampolines() -> Result<()> {
    let config = LambdaizeConfig::default().with_style(ExtractionStyle::Typed);
    let (original, module, events) = transform(TEST_C, config)?;
    assert_eq!(events.count_kind(EventKind::TrampolineCreated), 9);
    let trampoline = format!("{TRAMPOLINE_PREFIX}{EXTRACTED_PREFIX}0");
    let func = module
        .function_by_name(&trampoline)
        .and_then(|id| module.function(id))
        .expect("trampoline is defined");
    assert_eq!(func.params.len(), 1);
    same_result(&original, &module, "main", &[])?;
    Ok(())
}

#[test]
fn test_transformed_module_round_trips() -> Result<()> {
    let (_, module, _) = transform(KERNELS, LambdaizeConfig::default())?;
    let text = print_module(&module);
    let reparsed = Module::parse(&text)?;
    verify_module(&reparsed)?;
    assert_eq!(print_module(&reparsed), text);
    assert_eq!(run(&reparsed, "sum_to", &[100])?.ret, Some(5050));
    Ok(())
}

#[test]
fn test_pipeline_text() -> Result<()> {
    let mut module = Module::parse(KERNELS)?;
    let registry = PassRegistry::with_defaults(&LambdaizeConfig::default());
    let events = EventLog::new();
    let changed = registry.parse_pipeline("lambdaize-loop,verify")?.run(&mut module, &events)?;
    assert!(changed);
    assert_eq!(events.count_kind(EventKind::PassCompleted), 2);
    assert!(registry.parse_pipeline("lambdaize-loops").is_err());
    Ok(())
}

#[test]
fn test_unannotated_loops_need_transform_all() -> Result<()> {
    let (_, module, events) = transform(TEST_C, LambdaizeConfig::default().with_marker("nothing"))?;
    assert_eq!(loop_count(&module), 9);
    assert!(events.filter_kind(EventKind::LoopSkipped).all(|e| e.message == "not-annotated"));

    let config = LambdaizeConfig::default().with_marker("nothing").with_transform_all(true);
    let (original, module, _) = transform(TEST_C, config)?;
    assert_eq!(loop_count(&module), 0);
    same_result(&original, &module, "main", &[])?;
    Ok(())
}

const SSA_SUM: &str = r"
define i32 @sum(i32 %n) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %acc = phi i32 [ 0, %entry ], [ %acc.next, %loop ]
  %acc.next = add i32 %acc, %i
  %i.next = add i32 %i, 1
  %done = icmp sgt i32 %i.next, %n
  br i1 %done, label %exit, label %loop
exit:
  ret i32 %acc.next
}
";

#[test]
fn test_typed_extraction_skips_taken_trampoline_name() -> Result<()> {
    let source = format!("{SSA_SUM}\ndefine i32 @pass_to_extracted_0() {{\nentry:\n  ret i32 7\n}}\n");
    let config = LambdaizeConfig::default()
        .with_transform_all(true)
        .with_style(ExtractionStyle::Typed);
    let (original, module, events) = transform(&source, config)?;

    assert_eq!(events.count_kind(EventKind::LoopExtracted), 1);
    assert!(module.function_by_name("extracted_0").is_none());
    assert!(module.function_by_name("extracted_1").is_some());
    assert!(module.function_by_name("pass_to_extracted_1").is_some());
    assert_eq!(
        function_text(&module, "pass_to_extracted_0"),
        function_text(&original, "pass_to_extracted_0")
    );
    assert_eq!(same_result(&original, &module, "sum", &[10])?.ret, Some(55));
    assert_eq!(run(&module, "pass_to_extracted_0", &[])?.ret, Some(7));
    Ok(())
}

#[test]
fn test_failed_attempt_leaves_module_untouched() -> Result<()> {
    // The loop is canonicalised before the driver symbol turns out to be taken.
    let source = format!("@looper = global i32 0\n{SSA_SUM}");
    let mut module = Module::parse(&source)?;
    let before = print_module(&module);
    let host_before = function_text(&module, "sum");

    let events = EventLog::new();
    let config = LambdaizeConfig::default().with_transform_all(true);
    let result = LambdaizePass::new(config).run(&mut module, &events);

    assert!(result.is_err());
    assert_eq!(function_text(&module, "sum"), host_before);
    assert_eq!(print_module(&module), before);
    assert!(module.function_by_name("extracted_0").is_none());
    assert!(module.structs.is_empty());
    assert!(!events.has(EventKind::ValueDemoted));
    assert!(!events.has(EventKind::LoopExtracted));
    Ok(())
}
