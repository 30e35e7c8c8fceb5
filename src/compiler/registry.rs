//! Pass registration and pipeline parsing.
//!
//! A pipeline is written as a comma-separated list of registered pass names,
//! e.g. `"lambdaize-loop,verify"`. Whitespace around names is ignored.

use std::{collections::BTreeMap, fmt, time::Instant};

use crate::{
    compiler::{EventKind, EventLog, ModulePass, VerifyPass},
    ir::Module,
    transform::{LambdaizeConfig, LambdaizePass},
    Error, Result,
};

/// Creates a fresh pass instance.
pub type PassFactory = Box<dyn Fn() -> Box<dyn ModulePass>>;

/// Name-to-factory table.
#[derive(Default)]
pub struct PassRegistry {
    factories: BTreeMap<&'static str, PassFactory>,
}

impl PassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `lambdaize-loop` (configured with `config`)
    /// and `verify`.
    #[must_use]
    pub fn with_defaults(config: &LambdaizeConfig) -> Self {
        let mut registry = Self::new();
        let config = config.clone();
        registry.register(LambdaizePass::NAME, move || {
            Box::new(LambdaizePass::new(config.clone()))
        });
        registry.register(VerifyPass::NAME, || Box::new(VerifyPass));
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn() -> Box<dyn ModulePass> + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// Instantiates the pass registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPass`] if `name` is not registered.
    pub fn create(&self, name: &str) -> Result<Box<dyn ModulePass>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownPass(name.to_string()))
    }

    /// Builds a pipeline from its textual form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPass`] for the first unregistered or empty name.
    pub fn parse_pipeline(&self, text: &str) -> Result<PassPipeline> {
        let mut pipeline = PassPipeline::new();
        for name in text.split(',').map(str::trim) {
            if name.is_empty() {
                return Err(Error::UnknownPass(format!("empty pass name in '{text}'")));
            }
            pipeline.push(self.create(name)?);
        }
        Ok(pipeline)
    }
}

impl fmt::Debug for PassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// An ordered list of passes.
#[derive(Default)]
pub struct PassPipeline {
    passes: Vec<Box<dyn ModulePass>>,
}

impl PassPipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pass.
    pub fn push(&mut self, pass: Box<dyn ModulePass>) {
        self.passes.push(pass);
    }

    /// Number of passes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Returns `true` if the pipeline has no passes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Pass names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|p| p.name())
    }

    fn run_pass(pass: &mut dyn ModulePass, module: &mut Module, events: &EventLog) -> Result<bool> {
        pass.initialize(module)?;
        let changed = pass.run(module, events)?;
        pass.finalize(module)?;
        Ok(changed)
    }

    /// Runs every pass once, in order.
    ///
    /// Returns `true` if any pass changed the module.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error of `initialize`, `run` or
    /// `finalize`, after recording it as an [`EventKind::Error`] event.
    pub fn run(&mut self, module: &mut Module, events: &EventLog) -> Result<bool> {
        let mut changed = false;
        for pass in &mut self.passes {
            let name = pass.name();
            events.record(EventKind::PassStarted).pass(name);
            log::debug!("running pass {name}");
            let start = Instant::now();

            let pass_changed = match Self::run_pass(pass.as_mut(), module, events) {
                Ok(changed) => changed,
                Err(e) => {
                    events.record(EventKind::Error).message(e.to_string()).pass(name);
                    return Err(e);
                }
            };

            log::debug!("pass {name} finished in {:?} (changed: {pass_changed})", start.elapsed());
            events
                .record(EventKind::PassCompleted)
                .message(if pass_changed { "changed" } else { "unchanged" })
                .pass(name);
            changed |= pass_changed;
        }
        Ok(changed)
    }
}

impl fmt::Debug for PassPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pipeline() -> Result<()> {
        let registry = PassRegistry::with_defaults(&LambdaizeConfig::default());
        let pipeline = registry.parse_pipeline(" lambdaize-loop , verify")?;
        assert_eq!(pipeline.names().collect::<Vec<_>>(), vec!["lambdaize-loop", "verify"]);
        assert_eq!(registry.names().count(), 2);
        Ok(())
    }

    #[test]
    fn test_unknown_pass() {
        let registry = PassRegistry::with_defaults(&LambdaizeConfig::default());
        assert!(matches!(registry.parse_pipeline("lambdaize-loop,licm"), Err(Error::UnknownPass(n)) if n == "licm"));
        assert!(matches!(registry.parse_pipeline("verify,,verify"), Err(Error::UnknownPass(_))));
    }

    #[test]
    fn test_pipeline_records_pass_events() -> Result<()> {
        let mut module = Module::parse("define i32 @f() {\nentry:\n  ret i32 0\n}\n")?;
        let registry = PassRegistry::with_defaults(&LambdaizeConfig::default());
        let events = EventLog::new();
        let changed = registry.parse_pipeline("lambdaize-loop,verify")?.run(&mut module, &events)?;
        assert!(!changed);
        assert_eq!(events.count_kind(EventKind::PassStarted), 2);
        assert_eq!(events.count_kind(EventKind::PassCompleted), 2);
        Ok(())
    }

    #[test]
    fn test_failing_pass_is_recorded() -> Result<()> {
        let mut module = Module::parse("define i32 @f() {\nentry:\n  ret i32 0\n}\n")?;
        let config = LambdaizeConfig::default().with_probability(2.0);
        let registry = PassRegistry::with_defaults(&config);
        let events = EventLog::new();
        let result = registry.parse_pipeline("lambdaize-loop,verify")?.run(&mut module, &events);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert_eq!(events.count_kind(EventKind::Error), 1);
        assert_eq!(events.count_kind(EventKind::PassCompleted), 0);
        Ok(())
    }
}
