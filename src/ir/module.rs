//! Modules: the unit of transformation.

use crate::{
    ir::{FuncId, Function, GlobalId, MdId, MdNode, Param, StructType, Type},
    Result,
};

/// A module-level variable.
///
/// ```text
/// @counter = global i32 0
/// @limit = constant i64 10
/// @buffer = global [16 x i8] zeroinitializer
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    /// Symbol name without `@`.
    pub name: String,
    /// Element type.
    pub ty: Type,
    /// Number of elements, `1` for scalars.
    pub count: u32,
    /// Initial value of every element.
    pub init: i64,
    /// Whether the variable is read-only.
    pub constant: bool,
}

/// Table sizes of a [`Module`] at one point in time.
///
/// Restoring it drops everything appended since; entries that already
/// existed are kept as they are now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSnapshot {
    structs: usize,
    globals: usize,
    functions: usize,
    metadata: usize,
}

/// A translation unit: named types, globals, functions and metadata.
///
/// Functions and globals are addressed by [`FuncId`] / [`GlobalId`]. Tables
/// only grow, so a handle stays valid unless a [`ModuleSnapshot`] taken before
/// it was created is restored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    /// Source file name, printed as `source_filename`.
    pub name: String,
    /// Named struct types.
    pub structs: Vec<StructType>,
    globals: Vec<Global>,
    functions: Vec<Function>,
    metadata: Vec<MdNode>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses a module from its textual form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Parse`] with the position of the first offending
    /// token.
    pub fn parse(text: &str) -> Result<Self> {
        crate::ir::parser::parse_module(text)
    }

    /// All functions with their handles, in definition order.
    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> + '_ {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId::new(i), f))
    }

    /// Number of functions, declarations included.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Looks up a function.
    #[must_use]
    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    /// Looks up a function for modification.
    pub fn function_mut(&mut self, id: FuncId) -> Option<&mut Function> {
        self.functions.get_mut(id.index())
    }

    /// Finds a function by symbol name.
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(FuncId::new)
    }

    /// Adds a function.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the name is already taken.
    pub fn add_function(&mut self, function: Function) -> Result<FuncId> {
        if self.function_by_name(&function.name).is_some()
            || self.global_by_name(&function.name).is_some()
        {
            return Err(malformed_error!("Symbol @{} is already defined", function.name));
        }
        self.functions.push(function);
        Ok(FuncId::new(self.functions.len() - 1))
    }

    /// Returns the function named `name`, declaring it with the given
    /// signature if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a global uses the name.
    pub fn get_or_declare(
        &mut self,
        name: &str,
        ret: Type,
        params: &[Type],
        variadic: bool,
    ) -> Result<FuncId> {
        if let Some(id) = self.function_by_name(name) {
            return Ok(id);
        }
        let mut decl = Function::new(
            name,
            ret,
            params.iter().map(|&ty| Param::unnamed(ty)).collect(),
        );
        decl.variadic = variadic;
        self.add_function(decl)
    }

    /// Returns `true` if no function or global is called `name`.
    #[must_use]
    pub fn is_symbol_free(&self, name: &str) -> bool {
        self.function_by_name(name).is_none() && self.global_by_name(name).is_none()
    }

    /// Returns `prefix<N>` for the smallest `N` not used as a symbol name.
    #[must_use]
    pub fn unique_symbol(&self, prefix: &str) -> String {
        (0..)
            .map(|n| format!("{prefix}{n}"))
            .find(|name| self.is_symbol_free(name))
            .unwrap_or_else(|| prefix.to_string())
    }

    /// Records the current table sizes.
    #[must_use]
    pub fn snapshot(&self) -> ModuleSnapshot {
        ModuleSnapshot {
            structs: self.structs.len(),
            globals: self.globals.len(),
            functions: self.functions.len(),
            metadata: self.metadata.len(),
        }
    }

    /// Drops every struct, global, function and metadata node added after
    /// `snapshot` was taken.
    pub fn restore(&mut self, snapshot: ModuleSnapshot) {
        self.structs.truncate(snapshot.structs);
        self.globals.truncate(snapshot.globals);
        self.functions.truncate(snapshot.functions);
        self.metadata.truncate(snapshot.metadata);
    }

    /// All globals with their handles.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> + '_ {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId::new(i), g))
    }

    /// Looks up a global.
    #[must_use]
    pub fn global(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(id.index())
    }

    /// Looks up a global for modification.
    pub fn global_mut(&mut self, id: GlobalId) -> Option<&mut Global> {
        self.globals.get_mut(id.index())
    }

    /// Finds a global by symbol name.
    #[must_use]
    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(GlobalId::new)
    }

    /// Adds a global.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the name is already taken.
    pub fn add_global(&mut self, global: Global) -> Result<GlobalId> {
        if self.function_by_name(&global.name).is_some() || self.global_by_name(&global.name).is_some() {
            return Err(malformed_error!("Symbol @{} is already defined", global.name));
        }
        self.globals.push(global);
        Ok(GlobalId::new(self.globals.len() - 1))
    }

    /// All metadata nodes with their handles.
    pub fn metadata(&self) -> impl Iterator<Item = (MdId, &MdNode)> + '_ {
        self.metadata
            .iter()
            .enumerate()
            .map(|(i, m)| (MdId::new(i), m))
    }

    /// Looks up a metadata node.
    #[must_use]
    pub fn metadata_node(&self, id: MdId) -> Option<&MdNode> {
        self.metadata.get(id.index())
    }

    /// Looks up a metadata node for modification.
    pub fn metadata_node_mut(&mut self, id: MdId) -> Option<&mut MdNode> {
        self.metadata.get_mut(id.index())
    }

    /// Adds a metadata node.
    pub fn add_metadata(&mut self, node: MdNode) -> MdId {
        self.metadata.push(node);
        MdId::new(self.metadata.len() - 1)
    }

    /// Adds a named struct type unless one with the same name exists.
    ///
    /// Returns `true` if the type was added.
    pub fn ensure_struct(&mut self, ty: StructType) -> bool {
        if self.structs.iter().any(|s| s.name == ty.name) {
            return false;
        }
        self.structs.push(ty);
        true
    }

    /// Handles of all functions with a body.
    #[must_use]
    pub fn defined_functions(&self) -> Vec<FuncId> {
        self.functions()
            .filter(|(_, f)| !f.is_declaration())
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbols_are_unique() -> Result<()> {
        let mut module = Module::new("m");
        let f = module.add_function(Function::new("extracted_0", Type::I1, vec![]))?;
        assert!(module.add_function(Function::new("extracted_0", Type::I1, vec![])).is_err());
        assert_eq!(module.unique_symbol("extracted_"), "extracted_1");
        assert_eq!(module.function_by_name("extracted_0"), Some(f));
        Ok(())
    }

    #[test]
    fn test_get_or_declare_is_idempotent() -> Result<()> {
        let mut module = Module::new("m");
        let a = module.get_or_declare("looper", Type::Void, &[Type::Ptr], true)?;
        let b = module.get_or_declare("looper", Type::Void, &[Type::Ptr], true)?;
        assert_eq!(a, b);
        assert_eq!(module.function_count(), 1);
        assert!(module.function(a).is_some_and(|f| f.variadic && f.is_declaration()));
        Ok(())
    }

    #[test]
    fn test_restore_drops_later_additions() -> Result<()> {
        let mut module = Module::new("m");
        let kept = module.add_function(Function::new("kept", Type::Void, vec![]))?;
        let snapshot = module.snapshot();

        module.add_function(Function::new("extracted_0", Type::I1, vec![]))?;
        module.ensure_struct(StructType::va_list());
        module.get_or_declare("looper", Type::Void, &[Type::Ptr], true)?;
        assert_eq!(module.function_count(), 3);

        module.restore(snapshot);
        assert_eq!(module.function_count(), 1);
        assert!(module.structs.is_empty());
        assert_eq!(module.function_by_name("kept"), Some(kept));
        assert!(module.is_symbol_free("extracted_0"));
        assert_eq!(module.snapshot(), snapshot);
        Ok(())
    }

    #[test]
    fn test_ensure_struct() {
        let mut module = Module::new("m");
        assert!(module.ensure_struct(StructType::va_list()));
        assert!(!module.ensure_struct(StructType::va_list()));
        assert_eq!(module.structs.len(), 1);
    }
}
