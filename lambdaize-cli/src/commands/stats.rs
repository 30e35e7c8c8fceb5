use std::path::Path;

use lambdaize::{
    analysis::{cyclomatic_complexity, ComplexityReport},
    compiler::DerivedStats,
    transform::LambdaizeConfig,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{lambdaize_module, load_module},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ComplexityOutput {
    functions: usize,
    edges: usize,
    nodes: usize,
    cyclomatic: i64,
}

impl From<ComplexityReport> for ComplexityOutput {
    fn from(report: ComplexityReport) -> Self {
        Self {
            functions: report.functions,
            edges: report.edges,
            nodes: report.nodes,
            cyclomatic: report.cyclomatic(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    changed: bool,
    loops_extracted: usize,
    loops_skipped: usize,
    values_demoted: usize,
    before: ComplexityOutput,
    after: ComplexityOutput,
}

pub fn run(path: &Path, config: &LambdaizeConfig, opts: &GlobalOptions) -> anyhow::Result<()> {
    config.validate()?;
    let mut module = load_module(path)?;
    let before = cyclomatic_complexity(&module);
    let result = lambdaize_module(&mut module, config.clone())?;
    let after = cyclomatic_complexity(&module);
    let stats = DerivedStats::from_log(&result.events).with_time(result.elapsed);
    log::debug!("{}", stats.summary());

    let data = StatsOutput {
        changed: result.changed,
        loops_extracted: stats.loops_extracted,
        loops_skipped: stats.loops_skipped,
        values_demoted: stats.values_demoted,
        before: before.into(),
        after: after.into(),
    };

    print_output(&data, opts, |d| {
        let mut table = TabWriter::new(vec![
            ("", Align::Left),
            ("Before", Align::Right),
            ("After", Align::Right),
        ]);
        let rows = [
            ("Functions Count", d.before.functions as i64, d.after.functions as i64),
            ("Edges Count", d.before.edges as i64, d.after.edges as i64),
            ("Nodes Count", d.before.nodes as i64, d.after.nodes as i64),
            ("Cyclomatic Complexity", d.before.cyclomatic, d.after.cyclomatic),
        ];
        for (label, before, after) in rows {
            table.row(vec![label.to_string(), before.to_string(), after.to_string()]);
        }
        table.print();
        println!();
        println!(
            "{} loops extracted, {} skipped, {} values demoted",
            d.loops_extracted, d.loops_skipped, d.values_demoted
        );
    })
}
