use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lambdaize::{
    runtime::{DriverStrategy, DEFAULT_MAX_RECURSION, DEFAULT_STEP_LIMIT},
    transform::{ExtractionStyle, LambdaizeConfig, DEFAULT_MARKER},
};

/// lambdaize - replace loops by closures driven through a fixed-point combinator
#[derive(Debug, Parser)]
#[command(name = "lambdaize", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Flags of the `lambdaize-loop` pass.
#[derive(Debug, Clone, Args)]
pub struct PassOptions {
    /// Transform every loop, ignoring `lambdaizeloop` annotations.
    #[arg(long)]
    pub lambdaize_all: bool,

    /// Probability in [0, 1] that an eligible loop is transformed.
    #[arg(long, value_name = "P", default_value_t = 1.0)]
    pub lambdaize_probability: f64,

    /// Seed for loop sampling. Seeds from the OS when omitted.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Loop metadata property marking loops for transformation.
    #[arg(long, default_value = DEFAULT_MARKER)]
    pub marker: String,

    /// Recursion depth at which the driver falls back to iteration.
    #[arg(long, value_name = "DEPTH", default_value_t = DEFAULT_MAX_RECURSION)]
    pub max_recursion: usize,

    /// Driver implementation: iterative, one-argument or multiple-arguments.
    #[arg(long, default_value = "multiple-arguments")]
    pub driver: DriverStrategy,

    /// Generate typed loop functions reached through a trampoline.
    #[arg(long)]
    pub typed: bool,
}

impl PassOptions {
    /// Maps the flags onto a pass configuration.
    pub fn config(&self) -> LambdaizeConfig {
        let style = if self.typed {
            ExtractionStyle::Typed
        } else {
            ExtractionStyle::Cursor
        };
        let config = LambdaizeConfig::new()
            .with_transform_all(self.lambdaize_all)
            .with_probability(self.lambdaize_probability)
            .with_marker(self.marker.clone())
            .with_style(style)
            .with_max_recursion(self.max_recursion)
            .with_driver(self.driver);
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a pass pipeline over a module and print the result.
    Transform {
        /// Path to the textual IR module, or `-` for stdin.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Write the transformed module here instead of stdout.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Comma-separated pass names.
        #[arg(long, default_value = "lambdaize-loop,verify")]
        passes: String,

        /// Print every recorded pass event.
        #[arg(long)]
        events: bool,

        #[command(flatten)]
        pass: PassOptions,
    },

    /// Interpret a function, optionally after lambdaizing the module.
    Run {
        /// Path to the textual IR module, or `-` for stdin.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Function to call.
        #[arg(short, long, default_value = "main")]
        function: String,

        /// Integer arguments passed to the function.
        #[arg(value_name = "ARGS", allow_negative_numbers = true)]
        args: Vec<i64>,

        /// Lambdaize the module before running it.
        #[arg(long)]
        lambdaize: bool,

        /// Instruction budget of the interpreter.
        #[arg(long, default_value_t = DEFAULT_STEP_LIMIT)]
        step_limit: u64,

        #[command(flatten)]
        pass: PassOptions,
    },

    /// Report control-flow complexity before and after lambdaization.
    Stats {
        /// Path to the textual IR module, or `-` for stdin.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        #[command(flatten)]
        pass: PassOptions,
    },

    /// List natural loops and whether the pass would transform them.
    Loops {
        /// Path to the textual IR module, or `-` for stdin.
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Show only loops of this function.
        #[arg(long, value_name = "NAME")]
        function: Option<String>,

        #[command(flatten)]
        pass: PassOptions,
    },
}
