//! Functions: a block arena, a value table and a block layout.

use std::{
    collections::{HashMap, HashSet},
    ops::{Index, IndexMut},
};

use crate::ir::{Block, BlockId, FnAttrs, Linkage, Operand, Terminator, Type, ValueId};

/// A formal parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter type.
    pub ty: Type,
    /// Cosmetic name.
    pub name: Option<String>,
}

impl Param {
    /// A named parameter.
    #[must_use]
    pub fn named(ty: Type, name: impl Into<String>) -> Self {
        Self {
            ty,
            name: Some(name.into()),
        }
    }

    /// An unnamed parameter.
    #[must_use]
    pub fn unnamed(ty: Type) -> Self {
        Self { ty, name: None }
    }
}

/// Per-value information kept by the function's value table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueData {
    /// Type of the value.
    pub ty: Type,
    /// Cosmetic name.
    pub name: Option<String>,
}

/// A function definition or declaration.
///
/// Blocks live in an arena indexed by [`BlockId`]. Removing a block from the
/// function ([`Function::detach_block`]) leaves a tombstone so the handles of
/// the remaining blocks stay valid. Program order is given by the layout; its
/// first block is the entry block.
///
/// A function without blocks is a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Symbol name without the leading `@`.
    pub name: String,
    /// Symbol visibility.
    pub linkage: Linkage,
    /// Attributes.
    pub attrs: FnAttrs,
    /// Return type.
    pub ret: Type,
    /// Formal parameters.
    pub params: Vec<Param>,
    /// Whether the function accepts additional trailing arguments (`...`).
    pub variadic: bool,
    blocks: Vec<Option<Block>>,
    layout: Vec<BlockId>,
    values: Vec<ValueData>,
}

impl Function {
    /// Creates a function without body.
    ///
    /// # Arguments
    ///
    /// * `name` - Symbol name without `@`
    /// * `ret` - Return type
    /// * `params` - Formal parameters
    #[must_use]
    pub fn new(name: impl Into<String>, ret: Type, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            linkage: Linkage::External,
            attrs: FnAttrs::empty(),
            ret,
            params,
            variadic: false,
            blocks: Vec::new(),
            layout: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Returns `true` if the function has no body.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    /// The entry block, `None` for declarations.
    #[must_use]
    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Live blocks in program order.
    #[must_use]
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    /// Size of the block arena, including tombstones. Any [`BlockId`] of this
    /// function has an index below this bound.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Looks up a live block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    /// Looks up a live block for modification.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Iterates live blocks in program order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> + '_ {
        self.layout
            .iter()
            .filter_map(|&id| self.block(id).map(|b| (id, b)))
    }

    /// Returns `true` if `id` names a block in the layout.
    #[must_use]
    pub fn contains_block(&self, id: BlockId) -> bool {
        self.block(id).is_some() && self.layout.contains(&id)
    }

    /// Finds a block by label.
    #[must_use]
    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks().find(|(_, b)| b.name == name).map(|(id, _)| id)
    }

    /// Returns `base` if no live block uses it as label, otherwise `base.N`
    /// for the smallest free `N`.
    #[must_use]
    pub fn unique_block_name(&self, base: &str) -> String {
        let taken: HashSet<&str> = self
            .blocks
            .iter()
            .flatten()
            .map(|b| b.name.as_str())
            .collect();
        if !taken.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}.{n}"))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| base.to_string())
    }

    /// Allocates a block in the arena without placing it in the layout.
    ///
    /// Used by the parser for forward references; call
    /// [`Function::place_block`] once the block's position is known.
    pub fn create_block(&mut self, name: &str) -> BlockId {
        let name = self.unique_block_name(name);
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Some(Block::new(name)));
        id
    }

    /// Appends an allocated block to the end of the layout.
    pub fn place_block(&mut self, id: BlockId) {
        if self.block(id).is_some() && !self.layout.contains(&id) {
            self.layout.push(id);
        }
    }

    /// Creates a block at the end of the layout.
    pub fn add_block(&mut self, name: &str) -> BlockId {
        let id = self.create_block(name);
        self.layout.push(id);
        id
    }

    /// Creates a block placed directly after `after` in the layout, or at the
    /// end if `after` is not in the layout.
    pub fn insert_block_after(&mut self, after: BlockId, name: &str) -> BlockId {
        let id = self.create_block(name);
        match self.layout.iter().position(|&b| b == after) {
            Some(pos) => self.layout.insert(pos + 1, id),
            None => self.layout.push(id),
        }
        id
    }

    /// Removes a block from the function and returns it.
    ///
    /// The arena slot becomes a tombstone; the handle is never reused.
    pub fn detach_block(&mut self, id: BlockId) -> Option<Block> {
        let block = self.blocks.get_mut(id.index())?.take()?;
        self.layout.retain(|&b| b != id);
        Some(block)
    }

    /// Moves a block into this function at the end of the layout, renaming it
    /// if its label is taken.
    pub fn attach_block(&mut self, mut block: Block) -> BlockId {
        block.name = self.unique_block_name(&block.name);
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Some(block));
        self.layout.push(id);
        id
    }

    /// Allocates a fresh value handle.
    pub fn new_value(&mut self, ty: Type, name: Option<&str>) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(ValueData {
            ty,
            name: name.map(str::to_string),
        });
        id
    }

    /// Number of allocated value handles.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Information about a value, if the handle is valid.
    #[must_use]
    pub fn value(&self, id: ValueId) -> Option<&ValueData> {
        self.values.get(id.index())
    }

    /// Renames a value.
    pub fn set_value_name(&mut self, id: ValueId, name: Option<&str>) {
        if let Some(data) = self.values.get_mut(id.index()) {
            data.name = name.map(str::to_string);
        }
    }

    /// Type of an operand as seen from inside this function.
    ///
    /// Globals and functions are addresses and therefore `ptr`. Unknown
    /// values and out-of-range parameters yield `Type::Void`.
    #[must_use]
    pub fn operand_type(&self, op: &Operand) -> Type {
        match op {
            Operand::Value(id) => self.value(*id).map_or(Type::Void, |v| v.ty),
            Operand::Arg(i) => self
                .params
                .get(*i as usize)
                .map_or(Type::Void, |p| p.ty),
            Operand::Const(c) => c.ty,
            Operand::Global(_) | Operand::Func(_) => Type::Ptr,
            Operand::Poison(ty) => *ty,
        }
    }

    /// Unique predecessors of every live block, in layout order of the
    /// predecessor. Blocks without predecessors map to an empty list.
    #[must_use]
    pub fn predecessors(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut preds: HashMap<BlockId, Vec<BlockId>> =
            self.layout.iter().map(|&b| (b, Vec::new())).collect();
        for (id, block) in self.blocks() {
            for succ in block.successors() {
                let entry = preds.entry(succ).or_default();
                if !entry.contains(&id) {
                    entry.push(id);
                }
            }
        }
        preds
    }

    /// The block defining each value, for all live blocks.
    #[must_use]
    pub fn definitions(&self) -> HashMap<ValueId, BlockId> {
        let mut defs = HashMap::new();
        for (id, block) in self.blocks() {
            for value in block.defined_values() {
                defs.insert(value, id);
            }
        }
        defs
    }

    /// Replaces every use of `from` in live blocks with `to`.
    ///
    /// Returns the number of rewritten operands.
    pub fn replace_all_uses(&mut self, from: Operand, to: Operand) -> usize {
        let mut count = 0;
        let layout = self.layout.clone();
        for id in layout {
            if let Some(block) = self.block_mut(id) {
                for inst in &mut block.insts {
                    count += inst.replace_operand(from, to);
                }
                if let Some(term) = block.terminator.as_mut() {
                    for op in term.operands_mut() {
                        if *op == from {
                            *op = to;
                            count += 1;
                        }
                    }
                }
            }
        }
        count
    }

    /// Redirects the edges `from -> old` to `from -> new`. Phis are not touched.
    ///
    /// Returns `true` if the terminator of `from` changed.
    pub fn redirect_edge(&mut self, from: BlockId, old: BlockId, new: BlockId) -> bool {
        self.block_mut(from)
            .and_then(|b| b.terminator.as_mut())
            .is_some_and(|t| t.replace_successor(old, new))
    }

    /// Sets the terminator of a block, returning the previous one.
    pub fn set_terminator(&mut self, id: BlockId, term: Terminator) -> Option<Terminator> {
        self.block_mut(id)
            .and_then(|b| b.terminator.replace(term))
    }

    /// Total number of instructions, terminators included.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks()
            .map(|(_, b)| b.insts.len() + usize::from(b.terminator.is_some()))
            .sum()
    }
}

impl Index<BlockId> for Function {
    type Output = Block;

    /// # Panics
    ///
    /// Panics if `id` is a tombstone or out of range.
    fn index(&self, id: BlockId) -> &Block {
        match self.block(id) {
            Some(block) => block,
            None => panic!("{id} is not a live block of @{}", self.name),
        }
    }
}

impl IndexMut<BlockId> for Function {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        let name = self.name.clone();
        match self.block_mut(id) {
            Some(block) => block,
            None => panic!("{id} is not a live block of @{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_names_are_unique() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let a = f.add_block("loop");
        let b = f.add_block("loop");
        let c = f.add_block("loop");
        assert_eq!(f[a].name, "loop");
        assert_eq!(f[b].name, "loop.1");
        assert_eq!(f[c].name, "loop.2");
    }

    #[test]
    fn test_detach_leaves_tombstone() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let a = f.add_block("a");
        let b = f.add_block("b");
        let c = f.add_block("c");
        let detached = f.detach_block(b);
        assert_eq!(detached.map(|blk| blk.name), Some("b".to_string()));
        assert_eq!(f.layout(), &[a, c]);
        assert!(f.block(b).is_none());
        assert_eq!(f[c].name, "c");
        assert!(f.detach_block(b).is_none());
        let d = f.add_block("d");
        assert_eq!(d.index(), 3);
    }

    #[test]
    fn test_insert_after_and_predecessors() {
        let mut f = Function::new("f", Type::Void, vec![]);
        let a = f.add_block("a");
        let c = f.add_block("c");
        let b = f.insert_block_after(a, "b");
        assert_eq!(f.layout(), &[a, b, c]);
        f.set_terminator(a, Terminator::Br { target: c });
        f.set_terminator(b, Terminator::Br { target: c });
        f.set_terminator(c, Terminator::Ret { value: None });
        let preds = f.predecessors();
        assert_eq!(preds[&c], vec![a, b]);
        assert!(preds[&a].is_empty());
        assert!(f.redirect_edge(a, c, b));
        assert_eq!(f.predecessors()[&b], vec![a]);
    }

    #[test]
    fn test_operand_types() {
        let mut f = Function::new("f", Type::I32, vec![Param::named(Type::I64, "n")]);
        let v = f.new_value(Type::I1, Some("c"));
        assert_eq!(f.operand_type(&Operand::Arg(0)), Type::I64);
        assert_eq!(f.operand_type(&Operand::Value(v)), Type::I1);
        assert_eq!(f.operand_type(&Operand::Arg(5)), Type::Void);
        assert!(f.is_declaration());
    }
}
