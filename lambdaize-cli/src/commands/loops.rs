use std::path::Path;

use lambdaize::{
    analysis::FunctionCfg,
    ir::{BlockId, Function, Module},
    transform::{has_marker, Eligibility, EligibilityGate, LambdaizeConfig},
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_module,
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct LoopOutput {
    function: String,
    header: String,
    depth: usize,
    blocks: usize,
    latches: usize,
    exits: usize,
    annotated: bool,
    verdict: String,
}

fn label(func: &Function, block: BlockId) -> String {
    func.block(block).map(|b| b.name.clone()).unwrap_or_default()
}

/// The gate's verdict for every loop of `func`, innermost first.
fn collect(module: &Module, func: &Function, gate: &EligibilityGate<'_>, config: &LambdaizeConfig) -> Vec<LoopOutput> {
    let cfg = FunctionCfg::new(func);
    let forest = cfg.loops();
    let mut rng = config.rng();
    forest
        .by_depth_descending()
        .into_iter()
        .map(|info| {
            let region = cfg.region(info);
            let verdict = match gate.check(module, func, &region, &mut rng) {
                Eligibility::Eligible => "eligible".to_string(),
                Eligibility::Skip(reason) => reason.code().to_string(),
            };
            LoopOutput {
                function: func.name.clone(),
                header: label(func, region.header),
                depth: region.depth,
                blocks: region.blocks.len(),
                latches: region.latches.len(),
                exits: region.exit_blocks().len(),
                annotated: has_marker(module, func, &region, &config.marker),
                verdict,
            }
        })
        .collect()
}

pub fn run(path: &Path, function: Option<&str>, config: &LambdaizeConfig, opts: &GlobalOptions) -> anyhow::Result<()> {
    config.validate()?;
    let module = load_module(path)?;
    if let Some(name) = function {
        anyhow::ensure!(module.function_by_name(name).is_some(), "no function named @{name}");
    }

    let gate = EligibilityGate::new(config);
    let loops: Vec<LoopOutput> = module
        .functions()
        .filter(|(_, f)| !f.is_declaration())
        .filter(|(_, f)| function.is_none_or(|name| f.name == name))
        .flat_map(|(_, f)| collect(&module, f, &gate, config))
        .collect();

    print_output(&loops, opts, |loops| {
        if loops.is_empty() {
            println!("No loops found.");
            return;
        }
        let mut table = TabWriter::new(vec![
            ("Function", Align::Left),
            ("Header", Align::Left),
            ("Depth", Align::Right),
            ("Blocks", Align::Right),
            ("Latches", Align::Right),
            ("Exits", Align::Right),
            ("Annotated", Align::Left),
            ("Verdict", Align::Left),
        ]);
        for l in loops {
            table.row(vec![
                format!("@{}", l.function),
                l.header.clone(),
                l.depth.to_string(),
                l.blocks.to_string(),
                l.latches.to_string(),
                l.exits.to_string(),
                if l.annotated { "yes" } else { "no" }.to_string(),
                l.verdict.clone(),
            ]);
        }
        table.print();
    })
}
