use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Errors returned by the library.
///
/// A loop that cannot be transformed is not an error. The eligibility gate
/// reports it as a [`SkipReason`](crate::transform::SkipReason) and the pass
/// moves on to the next loop. These variants cover input that cannot be
/// read, settings that make no sense and faults raised by the interpreter.
///
/// # Examples
///
/// ```rust
/// use lambdaize::{ir::Module, Error};
///
/// match Module::parse("define i32 @f() {") {
///     Err(Error::Parse { line, column, message }) => {
///         eprintln!("{line}:{column}: {message}");
///     }
///     Err(e) => eprintln!("other error: {e}"),
///     Ok(_) => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// Textual IR could not be parsed.
    /// The position is that of the offending token.
    #[error("Parse error at {line}:{column}: {message}")]
    Parse {
        /// 1-based line.
        line: usize,
        /// 1-based column.
        column: usize,
        /// What the parser expected.
        message: String,
    },

    /// The IR breaks a structural rule, such as a block without terminator.
    /// Built through `malformed_error!`, which records where it was raised.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// What is wrong.
        message: String,
        /// Source file that raised the error.
        file: &'static str,
        /// Source line that raised the error.
        line: u32,
    },

    /// The IR failed verification.
    #[error("Verification failed: {0}")]
    Verify(String),

    /// A function or global referenced by name does not exist.
    #[error("Unknown symbol - {0}")]
    UnknownSymbol(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration - {0}")]
    InvalidConfig(String),

    /// Pipeline text referenced a pass that is not registered.
    #[error("Unknown pass - {0}")]
    UnknownPass(String),

    /// The interpreter trapped while executing a program.
    #[error("Runtime fault - {0}")]
    Runtime(String),

    /// The interpreter exceeded its configured instruction budget.
    #[error("Instruction budget of {0} exhausted")]
    StepLimit(u64),

    /// Reading or writing a module file failed.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
