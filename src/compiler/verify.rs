//! Verification as a pipeline step.

use crate::{
    compiler::{EventLog, ModulePass},
    ir::{verify_module, Module},
    Result,
};

/// Runs the IR verifier; never changes the module.
///
/// Placed after a transformation in pipeline text (`"lambdaize-loop,verify"`)
/// it turns a structurally broken result into an [`Error::Verify`](crate::Error::Verify).
#[derive(Debug, Default)]
pub struct VerifyPass;

impl VerifyPass {
    /// Registered pass name.
    pub const NAME: &'static str = "verify";
}

impl ModulePass for VerifyPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Checks the structural invariants of the IR"
    }

    fn run(&mut self, module: &mut Module, events: &EventLog) -> Result<bool> {
        verify_module(module)?;
        events.info(format!("module {} verified", module.name));
        Ok(false)
    }
}
