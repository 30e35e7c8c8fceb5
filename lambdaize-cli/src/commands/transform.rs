use std::{collections::BTreeMap, path::Path, time::Instant};

use anyhow::Context;
use lambdaize::{
    compiler::{DerivedStats, EventLog, PassRegistry},
    ir::print_module,
    transform::LambdaizeConfig,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::load_module,
    output::{print_fields, print_output, Align, TabWriter},
};

pub struct TransformOptions<'a> {
    pub output: Option<&'a Path>,
    pub passes: &'a str,
    pub events: bool,
    pub config: LambdaizeConfig,
    pub global: &'a GlobalOptions,
}

#[derive(Debug, Serialize)]
struct EventOutput {
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    message: String,
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    functions_transformed: usize,
    loops_extracted: usize,
    loops_skipped: usize,
    trampolines: usize,
    preheaders_inserted: usize,
    latches_unified: usize,
    exit_hubs: usize,
    values_demoted: usize,
    elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
struct TransformOutput {
    passes: Vec<String>,
    changed: bool,
    stats: StatsOutput,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    skip_reasons: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<EventOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    module: Option<String>,
}

fn collect_events(events: &EventLog) -> Vec<EventOutput> {
    events
        .iter()
        .map(|e| EventOutput {
            kind: e.kind.to_string(),
            function: e.function.clone(),
            location: e.location.clone(),
            message: e.message.clone(),
        })
        .collect()
}

pub fn run(path: &Path, opts: &TransformOptions<'_>) -> anyhow::Result<()> {
    opts.config.validate()?;
    let mut module = load_module(path)?;

    let registry = PassRegistry::with_defaults(&opts.config);
    let mut pipeline = registry
        .parse_pipeline(opts.passes)
        .with_context(|| format!("invalid pass pipeline '{}'", opts.passes))?;

    let events = EventLog::new();
    let start = Instant::now();
    let changed = pipeline.run(&mut module, &events)?;
    let stats = DerivedStats::from_log(&events).with_time(start.elapsed());
    log::info!("{}", stats.summary());

    let text = print_module(&module);
    if let Some(output) = opts.output {
        std::fs::write(output, &text)
            .with_context(|| format!("failed to write module: {}", output.display()))?;
        log::info!("wrote {}", output.display());
    }

    let data = TransformOutput {
        passes: pipeline.names().map(str::to_string).collect(),
        changed,
        stats: StatsOutput {
            functions_transformed: stats.functions_transformed,
            loops_extracted: stats.loops_extracted,
            loops_skipped: stats.loops_skipped,
            trampolines: stats.trampolines,
            preheaders_inserted: stats.preheaders_inserted,
            latches_unified: stats.latches_unified,
            exit_hubs: stats.exit_hubs,
            values_demoted: stats.values_demoted,
            elapsed_ms: stats.total_time.as_millis(),
        },
        skip_reasons: events
            .skip_reasons()
            .into_iter()
            .map(|(reason, count)| (reason.to_string(), count))
            .collect(),
        events: if opts.events || opts.global.json {
            collect_events(&events)
        } else {
            Vec::new()
        },
        module: opts.output.is_none().then_some(text),
    };

    print_output(&data, opts.global, |d| {
        if let Some(module) = &d.module {
            print!("{module}");
        }
        if opts.events && d.module.is_some() {
            // The module owns stdout; the report goes to stderr with the logs.
            eprintln!();
            for event in &d.events {
                let place = match (&event.function, &event.location) {
                    (Some(f), Some(l)) => format!("@{f}:{l}"),
                    (Some(f), None) => format!("@{f}"),
                    _ => String::new(),
                };
                eprintln!("{:<20} {place:<30} {}", event.kind, event.message);
            }
        }
        if d.module.is_none() {
            print_fields(&[
                ("Passes", d.passes.join(",")),
                ("Changed", d.changed.to_string()),
                ("Loops extracted", d.stats.loops_extracted.to_string()),
                ("Loops skipped", d.stats.loops_skipped.to_string()),
            ]);
            for (reason, count) in &d.skip_reasons {
                println!("  {reason:<24} {count}");
            }
            if !d.events.is_empty() {
                println!();
                let mut table = TabWriter::new(vec![
                    ("Event", Align::Left),
                    ("Function", Align::Left),
                    ("Loop", Align::Left),
                    ("Detail", Align::Left),
                ])
                .indent("  ");
                for event in &d.events {
                    table.row(vec![
                        event.kind.clone(),
                        event.function.clone().unwrap_or_default(),
                        event.location.clone().unwrap_or_default(),
                        event.message.clone(),
                    ]);
                }
                table.print();
            }
        }
    })
}
