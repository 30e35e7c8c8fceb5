//! Function extraction.
//!
//! Moves the blocks of an [`IsolatedLoop`] into a new private function that
//! runs one iteration and returns `i1` (continue / stop). Values the blocks
//! read from the host travel through the capture cursor:
//!
//! ```text
//! define private i1 @extracted_0(ptr %cursor) noinline {
//! entry:
//!   %n = va_arg ptr %cursor, i32
//!   %sum.slot = va_arg ptr %cursor, ptr
//!   br label %head
//! head:
//!   ...
//! loop.ret:
//!   %continue = phi i1 [ ... ]
//!   ret i1 %continue
//! }
//! ```
//!
//! With [`ExtractionStyle::Typed`] the captures become typed parameters and a
//! `@pass_to_extracted_0(ptr %cursor)` trampoline does the unpacking.

use std::collections::HashMap;

use crate::{
    analysis::capture_set,
    ir::{
        Block, BlockId, Builder, FnAttrs, FuncId, Function, InstKind, Linkage, Module, Operand,
        Param, StructType, Type,
    },
    transform::lambdaize::{config::ExtractionStyle, isolate::IsolatedLoop},
    Result,
};

/// Symbol prefix of extracted functions.
pub const EXTRACTED_PREFIX: &str = "extracted_";

/// Symbol prefix of typed-style trampolines.
pub const TRAMPOLINE_PREFIX: &str = "pass_to_";

/// Result of one extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The function holding the loop body.
    pub function: FuncId,
    /// The function handed to the repetition driver: `function` itself in
    /// cursor style, the trampoline in typed style.
    pub entry_point: FuncId,
    /// Host operands to pass behind the entry point, in cursor order.
    pub captures: Vec<(Type, Operand)>,
}

impl Extraction {
    /// Returns `true` if a trampoline was generated.
    #[must_use]
    pub fn has_trampoline(&self) -> bool {
        self.function != self.entry_point
    }
}

/// Old-to-new handle tables of one extraction.
#[derive(Default)]
struct Remap {
    blocks: HashMap<BlockId, BlockId>,
    operands: HashMap<Operand, Operand>,
}

impl Remap {
    fn block(&self, old: BlockId) -> Result<BlockId> {
        self.blocks
            .get(&old)
            .copied()
            .ok_or_else(|| malformed_error!("Branch to {} leaves the extracted blocks", old))
    }

    fn operand(&self, old: Operand) -> Result<Operand> {
        if !old.is_local() {
            return Ok(old);
        }
        self.operands
            .get(&old)
            .copied()
            .ok_or_else(|| malformed_error!("Operand {:?} is neither captured nor defined", old))
    }

    fn rewrite(&self, block: &mut Block) -> Result<()> {
        for inst in &mut block.insts {
            if let Some(result) = inst.result {
                inst.result = self.operand(Operand::Value(result))?.as_value();
            }
            for op in inst.operands_mut() {
                *op = self.operand(*op)?;
            }
            if let InstKind::Phi { incoming, .. } = &mut inst.kind {
                for (_, pred) in incoming.iter_mut() {
                    *pred = self.block(*pred)?;
                }
            }
        }
        if let Some(term) = block.terminator.as_mut() {
            for op in term.operands_mut() {
                *op = self.operand(*op)?;
            }
            for succ in term.successors_mut() {
                *succ = self.block(*succ)?;
            }
        }
        Ok(())
    }
}

/// Cosmetic name of a captured host operand.
fn capture_name(host: &Function, op: &Operand) -> Option<String> {
    match op {
        Operand::Value(v) => host.value(*v).and_then(|d| d.name.clone()),
        Operand::Arg(i) => host.params.get(*i as usize).and_then(|p| p.name.clone()),
        _ => None,
    }
}

/// Emits one `va_arg` per capture into `block`, returning the loaded values.
fn unpack_cursor(func: &mut Function, block: BlockId, captures: &[(Type, Operand)], names: &[Option<String>]) -> Vec<Operand> {
    let mut b = Builder::at_end(func, block);
    captures
        .iter()
        .zip(names)
        .map(|((ty, _), name)| Operand::Value(b.va_arg(*ty, Operand::Arg(0), name.as_deref())))
        .collect()
}

fn private(mut func: Function) -> Function {
    func.linkage = Linkage::Private;
    func.attrs |= FnAttrs::NOINLINE;
    func
}

/// Builds the body function from the detached blocks.
fn build_body(
    name: String,
    host: &Function,
    isolated: IsolatedLoop,
    captures: &[(Type, Operand)],
    names: &[Option<String>],
    style: ExtractionStyle,
) -> Result<Function> {
    let params = match style {
        ExtractionStyle::Cursor => vec![Param::named(Type::Ptr, "cursor")],
        ExtractionStyle::Typed => captures
            .iter()
            .zip(names)
            .map(|((ty, _), name)| Param {
                ty: *ty,
                name: name.clone(),
            })
            .collect(),
    };
    let mut func = private(Function::new(name, Type::I1, params));
    let entry = func.add_block("entry");
    let mut remap = Remap::default();

    let incoming: Vec<Operand> = match style {
        ExtractionStyle::Cursor => unpack_cursor(&mut func, entry, captures, names),
        ExtractionStyle::Typed => (0..captures.len())
            .map(|i| u32::try_from(i).map(Operand::Arg))
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| malformed_error!("Too many captures"))?,
    };
    for ((_, old), new) in captures.iter().zip(incoming) {
        remap.operands.insert(*old, new);
    }

    // Sweep 1: new handles for every block and every value it defines
    for (old, block) in &isolated.blocks {
        let new = func.create_block(&block.name);
        func.place_block(new);
        remap.blocks.insert(*old, new);
        for value in block.defined_values() {
            let data = host
                .value(value)
                .ok_or_else(|| malformed_error!("Unknown value {:?} in @{}", value, host.name))?;
            let fresh = func.new_value(data.ty, data.name.as_deref());
            remap.operands.insert(Operand::Value(value), Operand::Value(fresh));
        }
    }
    let header = isolated
        .header()
        .ok_or_else(|| malformed_error!("Nothing to extract from @{}", host.name))?;
    Builder::at_end(&mut func, entry).br(remap.block(header)?);

    // Sweep 2: rewrite operands, incoming blocks and targets
    for (old, mut block) in isolated.blocks {
        let new = remap.block(old)?;
        remap.rewrite(&mut block)?;
        let slot = func
            .block_mut(new)
            .ok_or_else(|| malformed_error!("Lost block {} while extracting", new))?;
        block.name = std::mem::take(&mut slot.name);
        *slot = block;
    }
    Ok(func)
}

/// Name of the trampoline in front of `body_name`.
fn trampoline_name(body_name: &str) -> String {
    format!("{TRAMPOLINE_PREFIX}{body_name}")
}

/// Picks `extracted_<N>` for the smallest `N` whose body name, and trampoline
/// name in typed style, are both unused.
fn reserve_names(module: &Module, style: ExtractionStyle) -> (String, Option<String>) {
    if style == ExtractionStyle::Cursor {
        return (module.unique_symbol(EXTRACTED_PREFIX), None);
    }
    (0u64..)
        .map(|n| format!("{EXTRACTED_PREFIX}{n}"))
        .map(|body| {
            let trampoline = trampoline_name(&body);
            (body, trampoline)
        })
        .find(|(body, trampoline)| module.is_symbol_free(body) && module.is_symbol_free(trampoline))
        .map(|(body, trampoline)| (body, Some(trampoline)))
        .unwrap_or_else(|| (EXTRACTED_PREFIX.to_string(), Some(trampoline_name(EXTRACTED_PREFIX))))
}

/// Builds `i1 @pass_to_<body>(ptr %cursor)`.
fn build_trampoline(name: String, body: FuncId, captures: &[(Type, Operand)], names: &[Option<String>]) -> Function {
    let mut func = private(Function::new(
        name,
        Type::I1,
        vec![Param::named(Type::Ptr, "cursor")],
    ));
    let entry = func.add_block("entry");
    let args = unpack_cursor(&mut func, entry, captures, names);
    let mut b = Builder::at_end(&mut func, entry);
    let args = captures.iter().map(|(ty, _)| *ty).zip(args).collect();
    let result = b.call(Type::I1, Operand::Func(body), args, Some("continue"));
    b.ret(result.map(|r| (Type::I1, Operand::Value(r))));
    func
}

/// Moves `isolated` out of `host` into a new function of `module`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the blocks reference a value or a
/// block that is neither captured nor part of the set. The caller restores
/// the module on error; extraction may have added the body already.
pub fn extract_function(
    module: &mut Module,
    host: FuncId,
    isolated: IsolatedLoop,
    style: ExtractionStyle,
) -> Result<Extraction> {
    let (name, trampoline) = reserve_names(module, style);
    let host_fn = module
        .function(host)
        .ok_or_else(|| malformed_error!("Unknown function {:?}", host))?;

    let captures: Vec<(Type, Operand)> = capture_set(isolated.blocks.iter().map(|(_, b)| b))
        .into_iter()
        .map(|op| (host_fn.operand_type(&op), op))
        .collect();
    let names: Vec<Option<String>> = captures.iter().map(|(_, op)| capture_name(host_fn, op)).collect();
    let body = build_body(name.clone(), host_fn, isolated, &captures, &names, style)?;

    module.ensure_struct(StructType::va_list());
    let function = module.add_function(body)?;
    let entry_point = match trampoline {
        Some(trampoline) => module.add_function(build_trampoline(trampoline, function, &captures, &names))?,
        None => function,
    };

    log::trace!(
        "extracted @{} with {} captures (entry point {:?})",
        name,
        captures.len(),
        entry_point
    );
    Ok(Extraction {
        function,
        entry_point,
        captures,
    })
}
