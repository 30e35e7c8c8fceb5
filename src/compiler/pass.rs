//! Pass trait for module transformations.

use crate::{compiler::EventLog, ir::Module, Result};

/// A transformation over a whole [`Module`].
///
/// Passes receive mutable access to the module and record what they did in
/// the shared [`EventLog`]. A pass that finds nothing to do must leave the
/// module exactly as it was and return `false`.
///
/// # Lifecycle
///
/// [`PassPipeline`](crate::compiler::PassPipeline) calls `initialize` once,
/// then `run` once, then `finalize` once per module.
pub trait ModulePass {
    /// Unique name, as used in pipeline text.
    fn name(&self) -> &'static str;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Called once before the pass runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass cannot run with its current settings.
    fn initialize(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// Runs the pass.
    ///
    /// Returns `true` if the module was changed.
    ///
    /// # Arguments
    ///
    /// * `module` - The module to transform.
    /// * `events` - Log receiving transformation and diagnostic events.
    ///
    /// # Errors
    ///
    /// Returns an error if the module is found inconsistent. Inputs the pass
    /// merely declines to transform are not errors.
    fn run(&mut self, module: &mut Module, events: &EventLog) -> Result<bool>;

    /// Called once after the pass ran.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn finalize(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }
}
