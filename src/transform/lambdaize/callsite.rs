//! Call-site rewriting.
//!
//! The preheader of an extracted loop ends up as
//!
//! ```text
//! loop.preheader:
//!   call void (ptr, ...) @looper(ptr @extracted_0, i32 %n, ptr %sum.slot)
//!   br label %exit
//! ```

use crate::{
    ir::{BlockId, Builder, FuncId, Module, Operand, Type},
    transform::lambdaize::extract::Extraction,
    Result,
};

/// Symbol of the repetition driver.
pub const LOOPER: &str = "looper";

/// Declares `void @looper(ptr, ...)` unless the module already has it.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a global already uses the name.
pub fn declare_looper(module: &mut Module) -> Result<FuncId> {
    module.get_or_declare(LOOPER, Type::Void, &[Type::Ptr], true)
}

/// Appends the driver call to `preheader` of `host`, right before its
/// terminator.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if `host` or `preheader` is unknown.
pub fn rewrite_call_site(module: &mut Module, host: FuncId, preheader: BlockId, extraction: &Extraction) -> Result<()> {
    let looper = declare_looper(module)?;
    let func = module
        .function_mut(host)
        .ok_or_else(|| malformed_error!("Unknown function {:?}", host))?;
    if func.block(preheader).is_none() {
        return Err(malformed_error!("Preheader {} is not in @{}", preheader, func.name));
    }

    let args = std::iter::once((Type::Ptr, Operand::Func(extraction.entry_point)))
        .chain(extraction.captures.iter().copied())
        .collect();
    Builder::at_end(func, preheader).call(Type::Void, Operand::Func(looper), args, None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstKind;

    #[test]
    fn test_call_goes_before_terminator() -> Result<()> {
        let mut module = Module::parse(
            r"
define void @f(i32 %n) {
entry:
  br label %out
out:
  ret void
}
",
        )?;
        let host = module.defined_functions()[0];
        let extraction = Extraction {
            function: host,
            entry_point: host,
            captures: vec![(Type::I32, Operand::Arg(0))],
        };
        let entry = module
            .function(host)
            .and_then(|f| f.entry())
            .ok_or_else(|| malformed_error!("no entry"))?;
        rewrite_call_site(&mut module, host, entry, &extraction)?;
        rewrite_call_site(&mut module, host, entry, &extraction)?;

        let looper = module.function_by_name(LOOPER).ok_or_else(|| malformed_error!("no looper"))?;
        assert!(module.function(looper).is_some_and(|f| f.variadic));
        assert_eq!(module.function_count(), 2);

        let func = module.function(host).ok_or_else(|| malformed_error!("no function"))?;
        match &func[entry].insts[0].kind {
            InstKind::Call { callee, args, .. } => {
                assert_eq!(*callee, Operand::Func(looper));
                assert_eq!(args.len(), 2);
                assert_eq!(args[0], (Type::Ptr, Operand::Func(host)));
            }
            other => panic!("expected call, got {other:?}"),
        }
        assert!(func[entry].terminator.is_some());
        Ok(())
    }
}
