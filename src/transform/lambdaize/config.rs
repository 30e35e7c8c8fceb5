//! Configuration of the loop lambdaization pass.
//!
//! The configuration is threaded explicitly into the pass; there is no global
//! state. The CLI maps its flags onto [`LambdaizeConfig`].

use rand::{rngs::StdRng, SeedableRng};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    runtime::{DriverStrategy, Looper, DEFAULT_MAX_RECURSION},
    Error, Result,
};

/// Loop metadata property that opts a loop into the transformation.
pub const DEFAULT_MARKER: &str = "lambdaizeloop";

/// Signature of the generated loop functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ExtractionStyle {
    /// `i1 @extracted_N(ptr %cursor)`; the function pulls its captures from
    /// the cursor itself.
    #[default]
    Cursor,
    /// `i1 @extracted_N(T0 %c0, T1 %c1, ...)` plus a
    /// `i1 @pass_to_extracted_N(ptr %cursor)` trampoline that unpacks the
    /// cursor and forwards the values.
    Typed,
}

/// Configuration for [`LambdaizePass`](crate::transform::LambdaizePass).
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaizeConfig {
    /// Transform every loop, ignoring annotations (default: false).
    pub transform_all: bool,

    /// Probability in `[0, 1]` that an eligible loop is transformed (default: 1.0).
    pub probability: f64,

    /// Seed of the sampling generator. `None` seeds from the OS.
    pub seed: Option<u64>,

    /// Loop metadata property that marks a loop for transformation.
    pub marker: String,

    /// Shape of the generated functions.
    pub style: ExtractionStyle,

    /// Recursion depth at which the repetition driver switches to iteration
    /// (default: 512).
    pub max_recursion: usize,

    /// Repetition driver implementation used by the interpreter.
    pub driver: DriverStrategy,
}

impl Default for LambdaizeConfig {
    fn default() -> Self {
        Self {
            transform_all: false,
            probability: 1.0,
            seed: None,
            marker: DEFAULT_MARKER.to_string(),
            style: ExtractionStyle::Cursor,
            max_recursion: DEFAULT_MAX_RECURSION,
            driver: DriverStrategy::MultipleArguments,
        }
    }
}

impl LambdaizeConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transforms every loop regardless of annotations.
    #[must_use]
    pub fn with_transform_all(mut self, all: bool) -> Self {
        self.transform_all = all;
        self
    }

    /// Sets the sampling probability.
    #[must_use]
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    /// Fixes the sampling seed for reproducible output.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the annotation marker.
    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Sets the extraction style.
    #[must_use]
    pub fn with_style(mut self, style: ExtractionStyle) -> Self {
        self.style = style;
        self
    }

    /// Sets the recursion cutoff of the repetition driver.
    #[must_use]
    pub fn with_max_recursion(mut self, depth: usize) -> Self {
        self.max_recursion = depth;
        self
    }

    /// Sets the repetition driver implementation.
    #[must_use]
    pub fn with_driver(mut self, driver: DriverStrategy) -> Self {
        self.driver = driver;
        self
    }

    /// Checks that every field is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(Error::InvalidConfig(format!(
                "probability must be within [0, 1], got {}",
                self.probability
            )));
        }
        if self.marker.is_empty() {
            return Err(Error::InvalidConfig("marker must not be empty".to_string()));
        }
        if self.max_recursion == 0 {
            return Err(Error::InvalidConfig(
                "max_recursion must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The sampling generator.
    #[must_use]
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// The repetition driver matching this configuration.
    #[must_use]
    pub fn looper(&self) -> Looper {
        Looper::new(self.driver, self.max_recursion)
    }
}
