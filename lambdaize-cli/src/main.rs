mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command, GlobalOptions};

/// Library logs go to stderr at info level, debug with `-v`. `RUST_LOG`
/// takes precedence; `--json` keeps stderr quiet.
fn init_logging(opts: &GlobalOptions) {
    if opts.json {
        return;
    }
    let level = if opts.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("lambdaize", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    init_logging(&cli.global);

    match &cli.command {
        Command::Transform {
            path,
            output,
            passes,
            events,
            pass,
        } => commands::transform::run(
            path,
            &commands::transform::TransformOptions {
                output: output.as_deref(),
                passes,
                events: *events,
                config: pass.config(),
                global: &cli.global,
            },
        ),
        Command::Run {
            path,
            function,
            args,
            lambdaize,
            step_limit,
            pass,
        } => commands::run::run(
            path,
            function,
            args,
            lambdaize.then(|| pass.config()),
            *step_limit,
            &cli.global,
        ),
        Command::Stats { path, pass } => commands::stats::run(path, &pass.config(), &cli.global),
        Command::Loops {
            path,
            function,
            pass,
        } => commands::loops::run(path, function.as_deref(), &pass.config(), &cli.global),
    }
}
