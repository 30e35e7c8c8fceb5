use std::{
    io::Read,
    path::Path,
    time::{Duration, Instant},
};

use anyhow::Context;
use lambdaize::{
    compiler::{EventLog, ModulePass},
    ir::{verify_module, Module},
    transform::{LambdaizeConfig, LambdaizePass},
};

/// Read and parse a textual IR module. `-` reads stdin.
pub fn load_module(path: &Path) -> anyhow::Result<Module> {
    let text = if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read module from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read module: {}", path.display()))?
    };
    Module::parse(&text).with_context(|| format!("failed to parse module: {}", path.display()))
}

/// Outcome of one `lambdaize-loop` run.
pub struct Lambdaized {
    pub changed: bool,
    pub events: EventLog,
    pub elapsed: Duration,
}

/// Run the `lambdaize-loop` pass on `module` and verify the result.
pub fn lambdaize_module(module: &mut Module, config: LambdaizeConfig) -> anyhow::Result<Lambdaized> {
    let events = EventLog::new();
    let start = Instant::now();
    let mut pass = LambdaizePass::new(config);
    pass.initialize(module)?;
    let changed = pass.run(module, &events)?;
    pass.finalize(module)?;
    verify_module(module).context("transformed module failed verification")?;
    Ok(Lambdaized {
        changed,
        events,
        elapsed: start.elapsed(),
    })
}
