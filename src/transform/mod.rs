//! IR transformations.
//!
//! - [`canonical`] - Loop canonicalisation utilities (demotion, preheader,
//!   latch and exit unification)
//! - [`LambdaizePass`] - Loop-to-closure extraction driven by `@looper`

pub mod canonical;
mod lambdaize;

pub use lambdaize::{
    declare_looper, extract_function, has_marker, isolate_loop, rewrite_call_site, Eligibility,
    EligibilityGate, Extraction, ExtractionStyle, IsolatedLoop, LambdaizeConfig, LambdaizePass,
    SkipReason, DEFAULT_MARKER, EXTRACTED_PREFIX, LOOPER, TRAMPOLINE_PREFIX,
};
