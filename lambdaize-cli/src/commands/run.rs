use std::path::Path;

use anyhow::Context;
use lambdaize::{
    compiler::EventKind,
    runtime::{run_function, Looper},
    transform::LambdaizeConfig,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{lambdaize_module, load_module},
    output::{print_fields, print_output},
};

#[derive(Debug, Serialize)]
struct RunOutput {
    function: String,
    args: Vec<i64>,
    lambdaized: bool,
    loops_extracted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    ret: Option<i64>,
    output: String,
    steps: u64,
    driver_calls: u64,
    iterations: u64,
}

pub fn run(
    path: &Path,
    function: &str,
    args: &[i64],
    config: Option<LambdaizeConfig>,
    step_limit: u64,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let mut module = load_module(path)?;

    let (looper, loops_extracted) = match config {
        Some(config) => {
            config.validate()?;
            let looper = config.looper();
            let result = lambdaize_module(&mut module, config)?;
            log::info!("lambdaized in {:?}", result.elapsed);
            (looper, result.events.count_kind(EventKind::LoopExtracted))
        }
        None => (Looper::default(), 0),
    };

    let execution = run_function(&module, function, args, looper, step_limit)
        .with_context(|| format!("failed to run @{function}"))?;

    let data = RunOutput {
        function: function.to_string(),
        args: args.to_vec(),
        lambdaized: loops_extracted > 0,
        loops_extracted,
        ret: execution.ret,
        output: execution.output,
        steps: execution.steps,
        driver_calls: execution.driver_calls,
        iterations: execution.iterations,
    };

    print_output(&data, opts, |d| {
        print!("{}", d.output);
        if !d.output.is_empty() && !d.output.ends_with('\n') {
            println!();
        }
        let ret = d.ret.map_or_else(|| "void".to_string(), |v| v.to_string());
        let mut fields = vec![
            ("Function", format!("@{}", d.function)),
            ("Returned", ret),
            ("Steps", d.steps.to_string()),
        ];
        if d.lambdaized {
            fields.push(("Loops extracted", d.loops_extracted.to_string()));
            fields.push(("Driver calls", d.driver_calls.to_string()));
            fields.push(("Iterations", d.iterations.to_string()));
        }
        eprintln!();
        print_fields(&fields);
    })
}
