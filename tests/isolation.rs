//! Tests of the individual pipeline stages through the public API:
//! canonicalisation, isolation, capture analysis, extraction and call-site
//! rewriting, driven by hand.

use lambdaize::{
    analysis::{capture_set, find_loop},
    compiler::{EventKind, EventLog},
    ir::{print_function, verify_module, FuncId, Module, Operand, Type},
    runtime::{run_function, Looper, DEFAULT_STEP_LIMIT},
    transform::{
        canonical::canonicalize_loop, extract_function, isolate_loop, rewrite_call_site, ExtractionStyle,
        IsolatedLoop, SkipReason, LOOPER,
    },
    Result,
};

const KERNELS: &str = include_str!("fixtures/kernels.ll");

fn function_id(module: &Module, name: &str) -> FuncId {
    module.function_by_name(name).expect("fixture function")
}

/// Canonicalises and isolates the loop headed by `header` in `@name`.
fn isolate(module: &mut Module, name: &str, header: &str, events: &EventLog) -> Result<IsolatedLoop> {
    let id = function_id(module, name);
    let func = module.function_mut(id).expect("fixture function");
    let header = func.block_by_name(header).expect("loop header");
    let region = canonicalize_loop(func, header, events)?;
    Ok(isolate_loop(func, &region).unwrap_or_else(|reason| panic!("isolation failed: {reason}")))
}

#[test]
fn test_capture_set_is_stable() -> Result<()> {
    let mut module = Module::parse(KERNELS)?;
    let isolated = isolate(&mut module, "find_square", "for.cond", &EventLog::new())?;

    let first = capture_set(isolated.blocks.iter().map(|(_, b)| b));
    let second = capture_set(isolated.blocks.iter().map(|(_, b)| b));
    assert_eq!(first, second);

    // %key, %i and the exit selector slot; %r is only used by the exit block.
    assert_eq!(first.len(), 3);
    assert_eq!(first[0], Operand::Arg(0));
    assert!(first[1..].iter().all(|op| matches!(op, Operand::Value(_))));
    Ok(())
}

#[test]
fn test_isolated_blocks_are_header_first_and_terminal_last() -> Result<()> {
    let mut module = Module::parse(KERNELS)?;
    let isolated = isolate(&mut module, "count_to", "while.cond", &EventLog::new())?;
    let names: Vec<_> = isolated.blocks.iter().map(|(_, b)| b.name.as_str()).collect();
    assert_eq!(names, vec!["while.cond", "while.body", "loop.ret"]);

    let func = module.function(function_id(&module, "count_to")).expect("host");
    assert!(func.block_by_name("while.cond").is_none());
    assert_eq!(func[isolated.preheader].terminator.as_ref().map(|t| t.successors()), Some(vec![isolated.exit]));
    Ok(())
}

#[test]
fn test_rejected_loop_is_unchanged() -> Result<()> {
    let mut module = Module::parse(KERNELS)?;
    let id = function_id(&module, "find_square");
    let func = module.function_mut(id).expect("fixture function");
    let before = func.clone();

    // Without canonicalisation the loop still has two exit blocks.
    let header = func.block_by_name("for.cond").expect("loop header");
    let region = find_loop(func, header).expect("loop");
    assert_eq!(region.exit_blocks().len(), 2);
    assert_eq!(isolate_loop(func, &region).err(), Some(SkipReason::MultipleExits));
    assert_eq!(*func, before);
    Ok(())
}

#[test]
fn test_stages_by_hand() -> Result<()> {
    let mut module = Module::parse(KERNELS)?;
    let original = module.clone();
    let events = EventLog::new();
    let isolated = isolate(&mut module, "count_to", "while.cond", &events)?;
    assert!(!events.has(EventKind::PreheaderInserted));

    let host = function_id(&module, "count_to");
    let preheader = isolated.preheader;
    let extraction = extract_function(&mut module, host, isolated, ExtractionStyle::Cursor)?;
    assert_eq!(extraction.captures[0], (Type::I32, Operand::Arg(0)));
    assert_eq!(extraction.captures[1].0, Type::Ptr);
    assert!(!extraction.has_trampoline());

    rewrite_call_site(&mut module, host, preheader, &extraction)?;
    verify_module(&module)?;

    let extracted = module.function(extraction.function).expect("extracted function");
    let text = print_function(&module, extracted);
    assert!(text.starts_with("define private i1 @extracted_0(ptr"));
    assert_eq!(text.matches("va_arg").count(), 2);
    let host_text = print_function(&module, module.function(host).expect("host"));
    assert!(host_text.contains(&format!("@{LOOPER}(ptr @extracted_0")));

    for n in [0, 1, 7, 300] {
        let before = run_function(&original, "count_to", &[n], Looper::default(), DEFAULT_STEP_LIMIT)?;
        let after = run_function(&module, "count_to", &[n], Looper::default(), DEFAULT_STEP_LIMIT)?;
        assert_eq!(before.ret, Some(n));
        assert_eq!(after.ret, Some(n));
        assert_eq!(after.iterations, u64::try_from(n + 1).unwrap_or_default());
    }
    Ok(())
}

#[test]
fn test_typed_extraction_by_hand() -> Result<()> {
    let mut module = Module::parse(KERNELS)?;
    let isolated = isolate(&mut module, "sum_to", "loop", &EventLog::new())?;
    let host = function_id(&module, "sum_to");
    let preheader = isolated.preheader;
    let extraction = extract_function(&mut module, host, isolated, ExtractionStyle::Typed)?;
    assert!(extraction.has_trampoline());

    let body = module.function(extraction.function).expect("body");
    assert_eq!(body.params.len(), extraction.captures.len());
    assert_eq!(body.params[0].ty, Type::I32);
    assert!(body.params[1..].iter().all(|p| p.ty == Type::Ptr));

    rewrite_call_site(&mut module, host, preheader, &extraction)?;
    verify_module(&module)?;
    let after = run_function(&module, "sum_to", &[10], Looper::default(), DEFAULT_STEP_LIMIT)?;
    assert_eq!(after.ret, Some(55));
    Ok(())
}
