//! Parser for the textual IR.
//!
//! Parsing runs in two passes over the token stream. The first pass registers
//! every module-level symbol (function definitions and declarations, globals)
//! so bodies can reference functions defined further down. The second pass
//! builds the bodies; forward references to local values (phi operands) and
//! blocks are resolved by reserving their handles at first use and checking at
//! the end of each function that every reservation was defined.

use std::collections::{HashMap, HashSet};

use crate::{
    ir::{
        lexer::{tokenize, Spanned, Token},
        BinaryOp, BlockId, CastOp, FnAttrs, Function, Global, IcmpPred, InstKind, Instruction,
        Linkage, MdId, MdNode, MdOperand, Module, Operand, Param, StructType, Terminator, Type,
        ValueId, Constant,
    },
    Error, Result,
};

/// Parses a complete module.
///
/// # Errors
///
/// Returns [`Error::Parse`] describing the first problem found.
pub fn parse_module(source: &str) -> Result<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(&tokens);
    parser.register_symbols()?;
    parser.parse_items()?;
    parser.finish()
}

/// Local name resolution state of the function being parsed.
#[derive(Default)]
struct LocalScope {
    values: HashMap<String, Operand>,
    pending: HashMap<String, (ValueId, usize, usize)>,
    blocks: HashMap<String, BlockId>,
    placed: HashSet<BlockId>,
    block_refs: HashMap<BlockId, (usize, usize)>,
}

struct Parser<'t> {
    tokens: &'t [Spanned],
    pos: usize,
    module: Module,
    md_numbers: HashMap<u32, MdId>,
    md_defined: HashSet<u32>,
    md_refs: HashMap<u32, (usize, usize)>,
}

fn is_numeric(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Resolves a block label, reserving a block for labels not seen yet.
fn block_ref(func: &mut Function, scope: &mut LocalScope, name: &str, position: (usize, usize)) -> BlockId {
    if let Some(id) = scope.blocks.get(name) {
        return *id;
    }
    let id = func.create_block(name);
    scope.blocks.insert(name.to_string(), id);
    scope.block_refs.insert(id, position);
    id
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Spanned]) -> Self {
        Self {
            tokens,
            pos: 0,
            module: Module::new(""),
            md_numbers: HashMap::new(),
            md_defined: HashSet::new(),
            md_refs: HashMap::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Token helpers
    // ---------------------------------------------------------------------

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn position(&self) -> (usize, usize) {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or((1, 1), |s| (s.line, s.column))
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let (line, column) = self.position();
        Error::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    fn error_at(&self, (line, column): (usize, usize), message: impl Into<String>) -> Error {
        Error::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        match self.peek() {
            Some(token) => self.error(format!("expected {expected}, found {}", token.describe())),
            None => self.error(format!("expected {expected}, found end of input")),
        }
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos).map(|s| &s.token);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&expected.describe()))
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<()> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{word}'")))
        }
    }

    fn expect_int(&mut self) -> Result<i64> {
        match self.peek() {
            Some(Token::Int(v)) => {
                self.pos += 1;
                Ok(*v)
            }
            _ => Err(self.unexpected("integer")),
        }
    }

    fn expect_local(&mut self) -> Result<&'t str> {
        match self.peek() {
            Some(Token::Local(name)) => {
                self.pos += 1;
                Ok(name.as_str())
            }
            _ => Err(self.unexpected("local name")),
        }
    }

    fn parse_type(&mut self) -> Result<Type> {
        if let Some(Token::Word(w)) = self.peek() {
            if let Ok(ty) = w.parse::<Type>() {
                self.pos += 1;
                return Ok(ty);
            }
        }
        Err(self.unexpected("type"))
    }

    /// Skips `, align N` and similar trailing `, word N` annotations.
    fn skip_align(&mut self) {
        while self.peek() == Some(&Token::Comma)
            && matches!(self.peek_at(1), Some(Token::Word(w)) if w == "align")
        {
            self.pos += 3;
        }
    }

    /// Skips parameter and return attributes such as `noundef` or `signext`.
    fn skip_value_attrs(&mut self) {
        while let Some(Token::Word(w)) = self.peek() {
            if w.parse::<Type>().is_ok() || matches!(w.as_str(), "true" | "false" | "null" | "poison" | "undef" | "zeroinitializer") {
                break;
            }
            self.pos += 1;
        }
    }

    // ---------------------------------------------------------------------
    // Pass 1: module-level symbols
    // ---------------------------------------------------------------------

    fn register_symbols(&mut self) -> Result<()> {
        let tokens = self.tokens;
        let mut depth = 0usize;
        let mut md_definitions = Vec::new();
        for (i, spanned) in tokens.iter().enumerate() {
            match &spanned.token {
                Token::LBrace | Token::MetaOpen => depth += 1,
                Token::RBrace => depth = depth.saturating_sub(1),
                Token::Word(w) if depth == 0 && (w == "define" || w == "declare") => {
                    let name = tokens[i + 1..]
                        .iter()
                        .find_map(|s| match &s.token {
                            Token::Global(name) => Some(name.clone()),
                            _ => None,
                        })
                        .ok_or_else(|| self.error_at((spanned.line, spanned.column), "function without name"))?;
                    self.module
                        .add_function(Function::new(name.clone(), Type::Void, Vec::new()))
                        .map_err(|_| self.error_at((spanned.line, spanned.column), format!("redefinition of @{name}")))?;
                }
                Token::Global(name)
                    if depth == 0 && matches!(tokens.get(i + 1).map(|s| &s.token), Some(Token::Equals)) =>
                {
                    self.module
                        .add_global(Global {
                            name: name.clone(),
                            ty: Type::I32,
                            count: 1,
                            init: 0,
                            constant: false,
                        })
                        .map_err(|_| self.error_at((spanned.line, spanned.column), format!("redefinition of @{name}")))?;
                }
                Token::MetaRef(n)
                    if depth == 0 && matches!(tokens.get(i + 1).map(|s| &s.token), Some(Token::Equals)) =>
                {
                    md_definitions.push(*n);
                }
                _ => {}
            }
        }
        // Numbered nodes get handles in ascending number order.
        md_definitions.sort_unstable();
        for number in md_definitions {
            self.md_id(number);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Pass 2: items
    // ---------------------------------------------------------------------

    fn parse_items(&mut self) -> Result<()> {
        while let Some(token) = self.peek() {
            match token {
                Token::Word(w) if w == "source_filename" => {
                    self.pos += 1;
                    self.expect(&Token::Equals)?;
                    match self.next() {
                        Some(Token::Str(name)) => self.module.name = name.clone(),
                        _ => return Err(self.unexpected("string")),
                    }
                }
                Token::Word(w) if w == "target" => {
                    self.pos += 1;
                    self.next();
                    self.expect(&Token::Equals)?;
                    self.next();
                }
                Token::Word(w) if w == "define" || w == "declare" => self.parse_function()?,
                Token::Local(_) => self.parse_struct()?,
                Token::Global(_) => self.parse_global()?,
                Token::MetaRef(_) => self.parse_metadata_def()?,
                Token::MetaName(_) => {
                    // Named metadata such as `!llvm.module.flags = !{!0}` carries nothing we model.
                    self.pos += 1;
                    self.expect(&Token::Equals)?;
                    self.parse_md_node()?;
                }
                _ => return Err(self.unexpected("top-level entity")),
            }
        }
        Ok(())
    }

    fn parse_struct(&mut self) -> Result<()> {
        let name = self.expect_local()?.to_string();
        self.expect(&Token::Equals)?;
        self.expect_word("type")?;
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        if !self.eat(&Token::RBrace) {
            loop {
                fields.push(self.parse_type()?);
                if self.eat(&Token::RBrace) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }
        if !self.module.ensure_struct(StructType { name: name.clone(), fields }) {
            return Err(self.error(format!("redefinition of type %{name}")));
        }
        Ok(())
    }

    fn parse_global(&mut self) -> Result<()> {
        let Some(Token::Global(name)) = self.next() else {
            return Err(self.unexpected("global name"));
        };
        self.expect(&Token::Equals)?;
        let constant = loop {
            match self.next() {
                Some(Token::Word(w)) if w == "global" => break false,
                Some(Token::Word(w)) if w == "constant" => break true,
                Some(Token::Word(_)) => {}
                _ => return Err(self.unexpected("'global' or 'constant'")),
            }
        };
        let (ty, count, init) = if self.eat(&Token::LBracket) {
            let count = self.expect_int()?;
            self.expect_word("x")?;
            let ty = self.parse_type()?;
            self.expect(&Token::RBracket)?;
            self.expect_word("zeroinitializer")?;
            let count = u32::try_from(count).map_err(|_| self.error("array size out of range"))?;
            (ty, count, 0)
        } else {
            let ty = self.parse_type()?;
            let init = match self.next() {
                Some(Token::Int(v)) => *v,
                Some(Token::Word(w)) if w == "true" => 1,
                Some(Token::Word(w)) if w == "false" || w == "null" || w == "zeroinitializer" => 0,
                _ => return Err(self.unexpected("initializer")),
            };
            (ty, 1, ty.normalize(init))
        };
        self.skip_align();
        let id = self
            .module
            .global_by_name(name)
            .ok_or_else(|| self.error(format!("unknown global @{name}")))?;
        if let Some(global) = self.module.global_mut(id) {
            global.ty = ty;
            global.count = count;
            global.init = init;
            global.constant = constant;
        }
        Ok(())
    }

    fn md_id(&mut self, number: u32) -> MdId {
        if let Some(id) = self.md_numbers.get(&number) {
            return *id;
        }
        let position = self.position();
        self.md_refs.entry(number).or_insert(position);
        let id = self.module.add_metadata(MdNode::default());
        self.md_numbers.insert(number, id);
        id
    }

    fn parse_metadata_def(&mut self) -> Result<()> {
        let Some(Token::MetaRef(number)) = self.next() else {
            return Err(self.unexpected("metadata number"));
        };
        let number = *number;
        self.expect(&Token::Equals)?;
        if !self.md_defined.insert(number) {
            return Err(self.error(format!("redefinition of !{number}")));
        }
        let id = self.md_id(number);
        let node = self.parse_md_node()?;
        if let Some(slot) = self.module.metadata_node_mut(id) {
            *slot = node;
        }
        Ok(())
    }

    fn parse_md_node(&mut self) -> Result<MdNode> {
        let distinct = self.eat_word("distinct");
        self.expect(&Token::MetaOpen)?;
        let mut operands = Vec::new();
        if !self.eat(&Token::RBrace) {
            loop {
                let nested = self.peek() == Some(&Token::MetaOpen) || self.is_word("distinct");
                let operand = match self.peek() {
                    _ if nested => {
                        let node = self.parse_md_node()?;
                        MdOperand::Node(self.module.add_metadata(node))
                    }
                    Some(Token::MetaRef(n)) => {
                        let id = self.md_id(*n);
                        self.pos += 1;
                        MdOperand::Node(id)
                    }
                    Some(Token::MetaString(s)) => {
                        self.pos += 1;
                        MdOperand::String(s.clone())
                    }
                    Some(Token::Word(_)) => {
                        self.parse_type()?;
                        MdOperand::Int(self.expect_int()?)
                    }
                    _ => return Err(self.unexpected("metadata operand")),
                };
                operands.push(operand);
                if self.eat(&Token::RBrace) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }
        Ok(MdNode { distinct, operands })
    }

    fn parse_function(&mut self) -> Result<()> {
        let is_definition = self.is_word("define");
        self.pos += 1;

        let mut linkage = Linkage::External;
        let ret = loop {
            match self.peek() {
                Some(Token::Word(w)) => {
                    if let Ok(ty) = w.parse::<Type>() {
                        self.pos += 1;
                        break ty;
                    }
                    if let Ok(l) = w.parse::<Linkage>() {
                        linkage = l;
                    }
                    self.pos += 1;
                }
                _ => return Err(self.unexpected("return type")),
            }
        };
        let Some(Token::Global(name)) = self.next() else {
            return Err(self.unexpected("function name"));
        };
        let id = self
            .module
            .function_by_name(name)
            .ok_or_else(|| self.error(format!("unknown function @{name}")))?;

        let mut scope = LocalScope::default();
        let mut params = Vec::new();
        let mut variadic = false;
        self.expect(&Token::LParen)?;
        if !self.eat(&Token::RParen) {
            loop {
                if self.eat(&Token::Ellipsis) {
                    variadic = true;
                    self.expect(&Token::RParen)?;
                    break;
                }
                let ty = self.parse_type()?;
                self.skip_value_attrs();
                let param_name = match self.peek() {
                    Some(Token::Local(n)) => {
                        self.pos += 1;
                        Some(n.as_str())
                    }
                    _ => None,
                };
                if let Some(n) = param_name {
                    let index = u32::try_from(params.len()).map_err(|_| self.error("too many parameters"))?;
                    if scope.values.insert(n.to_string(), Operand::Arg(index)).is_some() {
                        return Err(self.error(format!("duplicate parameter %{n}")));
                    }
                }
                params.push(Param {
                    ty,
                    name: param_name.filter(|n| !is_numeric(n)).map(str::to_string),
                });
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }

        let mut attrs = FnAttrs::empty();
        while let Some(Token::Word(w)) = self.peek() {
            if matches!(w.as_str(), "define" | "declare" | "source_filename" | "target") {
                break;
            }
            if let Some(attr) = FnAttrs::from_spelling(w) {
                attrs |= attr;
            }
            self.pos += 1;
        }

        let mut func = Function::new(name.clone(), ret, params);
        func.linkage = linkage;
        func.attrs = attrs;
        func.variadic = variadic;

        if is_definition {
            self.expect(&Token::LBrace)?;
            self.parse_body(&mut func, &mut scope)?;
        }

        if let Some(slot) = self.module.function_mut(id) {
            *slot = func;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Function bodies
    // ---------------------------------------------------------------------

    fn parse_label(&mut self, func: &mut Function, scope: &mut LocalScope) -> Result<BlockId> {
        self.expect_word("label")?;
        self.parse_block_ref(func, scope)
    }

    fn parse_block_ref(&mut self, func: &mut Function, scope: &mut LocalScope) -> Result<BlockId> {
        let position = self.position();
        let name = self.expect_local()?;
        Ok(block_ref(func, scope, name, position))
    }

    fn parse_body(&mut self, func: &mut Function, scope: &mut LocalScope) -> Result<()> {
        let mut first = true;
        while !self.eat(&Token::RBrace) {
            let name = match self.peek() {
                Some(Token::LabelDef(name)) => {
                    self.pos += 1;
                    name.clone()
                }
                _ if first => "entry".to_string(),
                _ => return Err(self.unexpected("block label")),
            };
            first = false;
            let id = block_ref(func, scope, &name, self.position());
            if !scope.placed.insert(id) {
                return Err(self.error(format!("redefinition of block %{name}")));
            }
            func.place_block(id);
            self.parse_block(func, scope, id)?;
        }

        if let Some((name, (_, line, column))) = scope.pending.iter().next() {
            return Err(self.error_at((*line, *column), format!("use of undefined value %{name}")));
        }
        for (name, id) in &scope.blocks {
            if !scope.placed.contains(id) {
                let position = scope.block_refs.get(id).copied().unwrap_or_else(|| self.position());
                return Err(self.error_at(position, format!("use of undefined label %{name}")));
            }
        }
        Ok(())
    }

    fn parse_block(&mut self, func: &mut Function, scope: &mut LocalScope, block: BlockId) -> Result<()> {
        loop {
            let result_name = match (self.peek(), self.peek_at(1)) {
                (Some(Token::Local(name)), Some(Token::Equals)) => {
                    self.pos += 2;
                    Some(name.as_str())
                }
                _ => None,
            };
            let opcode = match self.peek() {
                Some(Token::Word(w)) => w.as_str(),
                _ => return Err(self.unexpected("instruction")),
            };

            if matches!(opcode, "br" | "switch" | "ret" | "unreachable") {
                if result_name.is_some() {
                    return Err(self.error("terminators do not produce values"));
                }
                self.pos += 1;
                let term = self.parse_terminator(func, scope, opcode)?;
                let loop_md = self.parse_attachments()?;
                if let Some(b) = func.block_mut(block) {
                    b.terminator = Some(term);
                    b.loop_md = loop_md;
                }
                return Ok(());
            }

            let kind = self.parse_instruction(func, scope)?;
            let result_ty = Instruction::new(None, kind.clone()).result_type();
            let result = match result_name {
                Some(name) => {
                    if result_ty == Type::Void {
                        return Err(self.error(format!("%{name} names an instruction without result")));
                    }
                    Some(self.define_value(func, scope, name, result_ty)?)
                }
                None if result_ty != Type::Void => Some(func.new_value(result_ty, None)),
                None => None,
            };
            self.parse_attachments()?;
            if let Some(b) = func.block_mut(block) {
                b.insts.push(Instruction::new(result, kind));
            }
        }
    }

    /// Parses trailing `, !kind !N` attachments, returning the `!llvm.loop` node.
    fn parse_attachments(&mut self) -> Result<Option<MdId>> {
        let mut loop_md = None;
        while self.peek() == Some(&Token::Comma) && matches!(self.peek_at(1), Some(Token::MetaName(_))) {
            self.pos += 1;
            let Some(Token::MetaName(kind)) = self.next() else {
                return Err(self.unexpected("metadata kind"));
            };
            let Some(Token::MetaRef(n)) = self.peek() else {
                return Err(self.unexpected("metadata reference"));
            };
            let id = self.md_id(*n);
            self.pos += 1;
            if kind == "llvm.loop" {
                loop_md = Some(id);
            }
        }
        Ok(loop_md)
    }

    fn define_value(&mut self, func: &mut Function, scope: &mut LocalScope, name: &str, ty: Type) -> Result<ValueId> {
        if scope.values.contains_key(name) {
            return Err(self.error(format!("redefinition of %{name}")));
        }
        let cosmetic = (!is_numeric(name)).then_some(name);
        let id = match scope.pending.remove(name) {
            Some((id, line, column)) => {
                let reserved = func.value(id).map_or(Type::Void, |v| v.ty);
                if reserved != ty {
                    return Err(self.error_at(
                        (line, column),
                        format!("%{name} used as {reserved} but defined as {ty}"),
                    ));
                }
                func.set_value_name(id, cosmetic);
                id
            }
            None => func.new_value(ty, cosmetic),
        };
        scope.values.insert(name.to_string(), Operand::Value(id));
        Ok(id)
    }

    fn parse_operand(&mut self, func: &mut Function, scope: &mut LocalScope, ty: Type) -> Result<Operand> {
        let position = self.position();
        match self.next() {
            Some(Token::Local(name)) => {
                if let Some(op) = scope.values.get(name) {
                    return Ok(*op);
                }
                if let Some((id, _, _)) = scope.pending.get(name) {
                    return Ok(Operand::Value(*id));
                }
                let id = func.new_value(ty, None);
                scope.pending.insert(name.clone(), (id, position.0, position.1));
                Ok(Operand::Value(id))
            }
            Some(Token::Global(name)) => {
                if let Some(id) = self.module.function_by_name(name) {
                    Ok(Operand::Func(id))
                } else if let Some(id) = self.module.global_by_name(name) {
                    Ok(Operand::Global(id))
                } else {
                    Err(self.error_at(position, format!("unknown symbol @{name}")))
                }
            }
            Some(Token::Int(v)) => Ok(Operand::int(ty, *v)),
            Some(Token::Word(w)) => match w.as_str() {
                "true" => Ok(Operand::Const(Constant::int(ty, 1))),
                "false" => Ok(Operand::int(ty, 0)),
                "null" | "zeroinitializer" => Ok(Operand::Const(Constant { ty, value: 0 })),
                "poison" | "undef" => Ok(Operand::Poison(ty)),
                _ => Err(self.error_at(position, format!("expected value, found '{w}'"))),
            },
            Some(other) => Err(self.error_at(position, format!("expected value, found {}", other.describe()))),
            None => Err(self.error_at(position, "expected value, found end of input")),
        }
    }

    fn parse_typed_operand(&mut self, func: &mut Function, scope: &mut LocalScope) -> Result<(Type, Operand)> {
        let ty = self.parse_type()?;
        self.skip_value_attrs();
        let op = self.parse_operand(func, scope, ty)?;
        Ok((ty, op))
    }

    fn parse_instruction(&mut self, func: &mut Function, scope: &mut LocalScope) -> Result<InstKind> {
        let Some(Token::Word(opcode)) = self.next() else {
            return Err(self.unexpected("opcode"));
        };
        let opcode = opcode.as_str();

        if let Ok(op) = opcode.parse::<BinaryOp>() {
            while self.eat_word("nsw") || self.eat_word("nuw") || self.eat_word("exact") {}
            let ty = self.parse_type()?;
            let lhs = self.parse_operand(func, scope, ty)?;
            self.expect(&Token::Comma)?;
            let rhs = self.parse_operand(func, scope, ty)?;
            return Ok(InstKind::Binary { op, ty, lhs, rhs });
        }
        if let Ok(op) = opcode.parse::<CastOp>() {
            let (from, value) = self.parse_typed_operand(func, scope)?;
            self.expect_word("to")?;
            let to = self.parse_type()?;
            return Ok(InstKind::Cast { op, from, value, to });
        }

        match opcode {
            "alloca" => {
                let ty = self.parse_type()?;
                let mut count = 1;
                if self.peek() == Some(&Token::Comma) && self.peek_at(1).is_some_and(|t| !matches!(t, Token::Word(w) if w == "align")) {
                    self.pos += 1;
                    self.parse_type()?;
                    let n = self.expect_int()?;
                    count = u32::try_from(n).map_err(|_| self.error("alloca count out of range"))?;
                }
                self.skip_align();
                Ok(InstKind::Alloca { ty, count })
            }
            "load" => {
                let ty = self.parse_type()?;
                self.expect(&Token::Comma)?;
                let (_, ptr) = self.parse_typed_operand(func, scope)?;
                self.skip_align();
                Ok(InstKind::Load { ty, ptr })
            }
            "store" => {
                let (ty, value) = self.parse_typed_operand(func, scope)?;
                self.expect(&Token::Comma)?;
                let (_, ptr) = self.parse_typed_operand(func, scope)?;
                self.skip_align();
                Ok(InstKind::Store { ty, value, ptr })
            }
            "getelementptr" => {
                self.eat_word("inbounds");
                let elem = self.parse_type()?;
                self.expect(&Token::Comma)?;
                let (_, base) = self.parse_typed_operand(func, scope)?;
                self.expect(&Token::Comma)?;
                let (index_ty, index) = self.parse_typed_operand(func, scope)?;
                Ok(InstKind::Gep {
                    elem,
                    base,
                    index_ty,
                    index,
                })
            }
            "icmp" => {
                let pred = match self.next() {
                    Some(Token::Word(w)) => w
                        .parse::<IcmpPred>()
                        .map_err(|_| self.error(format!("unknown predicate '{w}'")))?,
                    _ => return Err(self.unexpected("predicate")),
                };
                let ty = self.parse_type()?;
                let lhs = self.parse_operand(func, scope, ty)?;
                self.expect(&Token::Comma)?;
                let rhs = self.parse_operand(func, scope, ty)?;
                Ok(InstKind::Icmp { pred, ty, lhs, rhs })
            }
            "select" => {
                let (_, cond) = self.parse_typed_operand(func, scope)?;
                self.expect(&Token::Comma)?;
                let (ty, on_true) = self.parse_typed_operand(func, scope)?;
                self.expect(&Token::Comma)?;
                let (_, on_false) = self.parse_typed_operand(func, scope)?;
                Ok(InstKind::Select {
                    ty,
                    cond,
                    on_true,
                    on_false,
                })
            }
            "phi" => {
                let ty = self.parse_type()?;
                let mut incoming = Vec::new();
                loop {
                    self.expect(&Token::LBracket)?;
                    let value = self.parse_operand(func, scope, ty)?;
                    self.expect(&Token::Comma)?;
                    let block = self.parse_block_ref(func, scope)?;
                    self.expect(&Token::RBracket)?;
                    incoming.push((value, block));
                    if !(self.peek() == Some(&Token::Comma) && self.peek_at(1) == Some(&Token::LBracket)) {
                        break;
                    }
                    self.pos += 1;
                }
                Ok(InstKind::Phi { ty, incoming })
            }
            "tail" | "musttail" | "notail" => {
                if !self.is_word("call") {
                    return Err(self.unexpected("'call'"));
                }
                self.parse_instruction(func, scope)
            }
            "call" => {
                self.skip_value_attrs();
                let ret = self.parse_type()?;
                if self.peek() == Some(&Token::LParen) {
                    // Explicit function type, e.g. `call void (ptr, ...) @looper(...)`.
                    let mut depth = 0usize;
                    while let Some(token) = self.next() {
                        match token {
                            Token::LParen => depth += 1,
                            Token::RParen => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                let callee = self.parse_operand(func, scope, Type::Ptr)?;
                self.expect(&Token::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_typed_operand(func, scope)?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                while let Some(Token::Word(w)) = self.peek() {
                    if FnAttrs::from_spelling(w).is_none() {
                        break;
                    }
                    self.pos += 1;
                }
                Ok(InstKind::Call { ret, callee, args })
            }
            "va_arg" => {
                let (_, cursor) = self.parse_typed_operand(func, scope)?;
                self.expect(&Token::Comma)?;
                let ty = self.parse_type()?;
                Ok(InstKind::VaArg { ty, cursor })
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unknown instruction '{other}'")))
            }
        }
    }

    fn parse_terminator(&mut self, func: &mut Function, scope: &mut LocalScope, opcode: &str) -> Result<Terminator> {
        match opcode {
            "br" => {
                if self.is_word("label") {
                    let target = self.parse_label(func, scope)?;
                    return Ok(Terminator::Br { target });
                }
                let (_, cond) = self.parse_typed_operand(func, scope)?;
                self.expect(&Token::Comma)?;
                let then_dest = self.parse_label(func, scope)?;
                self.expect(&Token::Comma)?;
                let else_dest = self.parse_label(func, scope)?;
                Ok(Terminator::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                })
            }
            "switch" => {
                let (ty, value) = self.parse_typed_operand(func, scope)?;
                self.expect(&Token::Comma)?;
                let default = self.parse_label(func, scope)?;
                self.expect(&Token::LBracket)?;
                let mut cases = Vec::new();
                while !self.eat(&Token::RBracket) {
                    let case_ty = self.parse_type()?;
                    let case = case_ty.normalize(self.expect_int()?);
                    self.expect(&Token::Comma)?;
                    let dest = self.parse_label(func, scope)?;
                    if cases.iter().any(|(c, _)| *c == case) {
                        return Err(self.error(format!("duplicate switch case {case}")));
                    }
                    cases.push((case, dest));
                }
                Ok(Terminator::Switch {
                    ty,
                    value,
                    default,
                    cases,
                })
            }
            "ret" => {
                if self.eat_word("void") {
                    return Ok(Terminator::Ret { value: None });
                }
                let value = self.parse_typed_operand(func, scope)?;
                Ok(Terminator::Ret { value: Some(value) })
            }
            _ => Ok(Terminator::Unreachable),
        }
    }

    fn finish(self) -> Result<Module> {
        for number in self.md_numbers.keys() {
            if !self.md_defined.contains(number) {
                let position = self.md_refs.get(number).copied().unwrap_or((1, 1));
                return Err(self.error_at(position, format!("use of undefined metadata !{number}")));
            }
        }
        Ok(self.module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUM: &str = r#"
source_filename = "sum.c"

@total = global i32 0

declare void @print_i64(i64)

define i32 @main() {
entry:
  br label %loop

loop:
  %i = phi i32 [ 1, %entry ], [ %i.next, %loop ]
  %acc = phi i32 [ 0, %entry ], [ %acc.next, %loop ]
  %acc.next = add nsw i32 %acc, %i
  %i.next = add i32 %i, 1
  %done = icmp sgt i32 %i.next, 10
  br i1 %done, label %exit, label %loop, !llvm.loop !0

exit:
  store i32 %acc.next, ptr @total, align 4
  ret i32 %acc.next
}

!0 = distinct !{!0, !1}
!1 = !{!"lambdaizeloop"}
"#;

    #[test]
    fn test_parse_forward_references() -> Result<()> {
        let module = parse_module(SUM)?;
        assert_eq!(module.name, "sum.c");
        let main = module.function_by_name("main").and_then(|id| module.function(id));
        let Some(main) = main else {
            panic!("main missing");
        };
        assert_eq!(main.block_count(), 3);
        let loop_block = main.block_by_name("loop").map(|id| &main[id]);
        assert_eq!(loop_block.map(|b| b.phi_count()), Some(2));
        assert!(loop_block.is_some_and(|b| b.loop_md.is_some()));
        assert!(module.function_by_name("print_i64").is_some_and(|id| module
            .function(id)
            .is_some_and(Function::is_declaration)));
        Ok(())
    }

    #[test]
    fn test_metadata_shape() -> Result<()> {
        let module = parse_module(SUM)?;
        let nodes: Vec<_> = module.metadata().collect();
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].1.distinct);
        assert_eq!(nodes[0].1.operands[0], MdOperand::Node(nodes[0].0));
        assert_eq!(nodes[1].1.property_name(), Some("lambdaizeloop"));
        Ok(())
    }

    #[test]
    fn test_print_parse_round_trip() -> Result<()> {
        let module = parse_module(SUM)?;
        let printed = module.to_string();
        let reparsed = parse_module(&printed)?;
        assert_eq!(reparsed.to_string(), printed);
        Ok(())
    }

    #[test]
    fn test_undefined_value_is_reported() {
        let err = parse_module("define i32 @f() {\nentry:\n  ret i32 %nope\n}\n");
        match err {
            Err(Error::Parse { line, message, .. }) => {
                assert_eq!(line, 3);
                assert!(message.contains("%nope"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_undefined_label_is_reported() {
        let err = parse_module("define void @f() {\nentry:\n  br label %missing\n}\n");
        assert!(matches!(err, Err(Error::Parse { .. })));
    }

    #[test]
    fn test_unknown_symbol_is_reported() {
        let err = parse_module("define void @f() {\n  call void @g()\n  ret void\n}\n");
        assert!(matches!(err, Err(Error::Parse { ref message, .. }) if message.contains("@g")));
    }

    #[test]
    fn test_explicit_call_type_and_variadic_declaration() -> Result<()> {
        let module = parse_module(
            "declare void @looper(ptr, ...)\n\
             define private i1 @body(ptr %cursor) noinline {\n  ret i1 true\n}\n\
             define void @f(i32 %x) {\n  call void (ptr, ...) @looper(ptr @body, i32 %x)\n  ret void\n}\n",
        )?;
        let looper = module.function_by_name("looper").and_then(|id| module.function(id));
        assert!(looper.is_some_and(|f| f.variadic && f.params.len() == 1));
        let body = module.function_by_name("body").and_then(|id| module.function(id));
        assert!(body.is_some_and(|f| f.linkage == Linkage::Private && f.attrs.contains(FnAttrs::NOINLINE)));
        Ok(())
    }
}
