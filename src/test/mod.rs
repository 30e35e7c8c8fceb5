//! IR fixtures and helpers shared by the unit tests.

use crate::{
    compiler::{EventLog, ModulePass},
    ir::{verify_module, Module},
    runtime::{run_function, Execution, Looper, DEFAULT_STEP_LIMIT},
    transform::{LambdaizeConfig, LambdaizePass},
    Result,
};

/// A lowered C program exercising sequential, switch, nested and returning loops.
pub const TEST_C: &str = include_str!("../../tests/fixtures/test_c.ll");

/// Loops that need demotion, a preheader, a single latch or an exit hub.
pub const KERNELS: &str = include_str!("../../tests/fixtures/kernels.ll");

/// Runs `lambdaize-loop` with `config` and checks the result with the verifier.
pub fn lambdaize(module: &mut Module, config: LambdaizeConfig) -> Result<(bool, EventLog)> {
    let events = EventLog::new();
    let mut pass = LambdaizePass::new(config);
    pass.initialize(module)?;
    let changed = pass.run(module, &events)?;
    pass.finalize(module)?;
    verify_module(module)?;
    Ok((changed, events))
}

/// Runs `@name(args)` with the default driver.
pub fn execute(module: &Module, name: &str, args: &[i64]) -> Result<Execution> {
    run_function(module, name, args, Looper::default(), DEFAULT_STEP_LIMIT)
}
