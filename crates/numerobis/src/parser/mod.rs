//! Recursive-descent parser for the surface language.
//!
//! Produces the statement list and the module [`Header`] (imports, unit and
//! dimension definitions). Unit expressions are handed off to the
//! [`units::UnitParser`] sub-parser running over the same token stream.

mod units;

pub use units::{UnitParser, UnitParserConfig};

use std::{collections::VecDeque, rc::Rc, str::FromStr};

use crate::{
    ast::{
        Annotation, AstNode, DimensionDef, FromImportDef, FunctionAnnotation, Header,
        HeaderImport, ImportDef, NumberLit, Op, OpKind, UnitDef, UnitParam,
    },
    errors::{Errors, ModuleMeta, Result},
    lexer::{Token, TokenKind},
    location::Location,
    typecheck::methods::TYPE_NAMES,
    unit::{Ident, Unit},
};

/// Cursor over the token stream, shared between the statement parser and
/// the unit sub-parser. Whitespace tokens are skipped by the default
/// accessors and visible through the `_raw` ones.
pub struct Cursor {
    tokens: VecDeque<Token>,
    pub errors: Errors,
    /// The most recently consumed token.
    pub tok: Token,
}

impl Cursor {
    pub fn new(tokens: Vec<Token>, module: Rc<ModuleMeta>) -> Self {
        Self {
            tokens: tokens.into(),
            errors: Errors::new(module),
            tok: Token::eof(),
        }
    }

    /// The `n`-th upcoming non-whitespace token (1-based).
    pub fn peek(&self, n: usize) -> &Token {
        static EOF: std::sync::LazyLock<Token> = std::sync::LazyLock::new(Token::eof);
        self.tokens
            .iter()
            .filter(|tok| tok.kind != TokenKind::Whitespace)
            .nth(n - 1)
            .unwrap_or(&EOF)
    }

    /// The `n`-th upcoming token, whitespace included (1-based).
    pub fn peek_raw(&self, n: usize) -> &Token {
        static EOF: std::sync::LazyLock<Token> = std::sync::LazyLock::new(Token::eof);
        self.tokens.get(n - 1).unwrap_or(&EOF)
    }

    /// Drops leading whitespace.
    pub fn clear(&mut self) {
        while self.peek_raw(1).kind == TokenKind::Whitespace {
            self.tokens.pop_front();
        }
    }

    /// Consumes the next non-whitespace token, checking it against `kinds`
    /// when non-empty.
    pub fn consume(&mut self, kinds: &[TokenKind]) -> Result<Token> {
        if self.peek(1).kind == TokenKind::Eof {
            let loc = self.tok.loc.clone();
            return self.errors.throw(2, Some(loc)).fail();
        }
        loop {
            let tok = self.tokens.pop_front().unwrap_or_else(Token::eof);
            if tok.kind == TokenKind::Whitespace {
                continue;
            }
            self.tok = tok.clone();
            if !kinds.is_empty() && !kinds.contains(&tok.kind) {
                return self
                    .errors
                    .throw(1, Some(tok.loc.clone()))
                    .arg("token", &tok.value)
                    .fail();
            }
            return Ok(tok);
        }
    }
}

pub struct Parser {
    cursor: Cursor,
    /// Becomes false at the first statement that is not an import or a
    /// header declaration.
    imports_allowed: bool,
    pub header: Header,
}

pub fn parse(tokens: Vec<Token>, module: Rc<ModuleMeta>) -> Result<(Vec<AstNode>, Header)> {
    let mut parser = Parser {
        cursor: Cursor::new(tokens, module),
        imports_allowed: true,
        header: Header::default(),
    };
    let statements = parser.start()?;
    Ok((statements, parser.header))
}

impl Parser {
    fn start(&mut self) -> Result<Vec<AstNode>> {
        let mut statements = Vec::new();
        while self.cursor.peek(1).kind != TokenKind::Eof {
            statements.push(self.statement()?);
            if self.cursor.peek(1).kind == TokenKind::Semicolon {
                self.cursor.consume(&[TokenKind::Semicolon])?;
            }
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<AstNode> {
        self.cursor.clear();
        let first = self.cursor.peek(1).clone();

        if self.imports_allowed
            && !matches!(
                first.kind,
                TokenKind::Import | TokenKind::From | TokenKind::Unit | TokenKind::Dimension
            )
        {
            self.imports_allowed = false;
        }

        match first.kind {
            TokenKind::Id
                if matches!(self.cursor.peek(2).kind, TokenKind::Assign | TokenKind::Colon) =>
            {
                self.variable()
            }
            TokenKind::Dimension => self.dimension_def(),
            TokenKind::Unit => self.unit_def(),
            TokenKind::If => self.conditional(false),
            TokenKind::For => self.for_loop(),
            TokenKind::While => self.while_loop(),
            TokenKind::Break => {
                let tok = self.cursor.consume(&[TokenKind::Break])?;
                Ok(AstNode::Break { loc: tok.loc })
            }
            TokenKind::Continue => {
                let tok = self.cursor.consume(&[TokenKind::Continue])?;
                Ok(AstNode::Continue { loc: tok.loc })
            }
            TokenKind::Import => self.import_stmt(),
            TokenKind::From => self.from_import_stmt(),
            TokenKind::Id if self.cursor.peek(2).kind == TokenKind::Bang => self.function(false),
            _ => self.block(),
        }
    }

    /// Blocks mix statements and expressions, mostly to allow clean control
    /// structure syntax.
    fn block(&mut self) -> Result<AstNode> {
        match self.cursor.peek(1).kind {
            TokenKind::LBrace => {
                let start = self.cursor.consume(&[TokenKind::LBrace])?;
                let mut body = Vec::new();
                while self.cursor.peek(1).kind != TokenKind::RBrace {
                    body.push(self.statement()?);
                    if self.cursor.peek(1).kind == TokenKind::Semicolon {
                        self.cursor.consume(&[TokenKind::Semicolon])?;
                    }
                }
                let end = self.cursor.consume(&[TokenKind::RBrace])?;
                Ok(AstNode::Block { body, loc: start.loc.merge(&end.loc) })
            }
            TokenKind::Return => {
                let ret = self.cursor.consume(&[TokenKind::Return])?;
                let next = self.cursor.peek_raw(1);
                let ends = matches!(next.kind, TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace)
                    || next.value.contains('\n');
                let value = if ends { None } else { Some(self.expression()?) };
                let loc = match &value {
                    Some(value) => ret.loc.merge(&value.loc()),
                    None => ret.loc,
                };
                Ok(AstNode::Return { value: value.map(Box::new), loc })
            }
            _ => self.index_assignment(),
        }
    }

    fn index_assignment(&mut self) -> Result<AstNode> {
        let left = self.expression()?;
        if self.cursor.peek(1).kind == TokenKind::Assign {
            self.cursor.consume(&[TokenKind::Assign])?;
            let value = self.expression()?;
            if !matches!(left, AstNode::Index { .. }) {
                return self.cursor.errors.throw(21, Some(left.loc())).fail();
            }
            let loc = left.loc().merge(&value.loc());
            return Ok(AstNode::IndexAssignment {
                target: Box::new(left),
                value: Box::new(value),
                loc,
            });
        }
        Ok(left)
    }

    fn expression(&mut self) -> Result<AstNode> {
        let first = self.cursor.peek(1).clone();
        match first.kind {
            TokenKind::If => self.conditional(true),
            TokenKind::At => {
                self.cursor.clear();
                // the referenced name must be adjacent to the '@'
                if !matches!(self.cursor.peek_raw(2).kind, TokenKind::LParen | TokenKind::Id) {
                    let loc = Location::point(first.loc.line, first.loc.col + 1);
                    return self.cursor.errors.throw(3, Some(loc)).fail();
                }
                let at = self.cursor.consume(&[TokenKind::At])?;
                let unit = self.unit(UnitParserConfig::standalone())?;
                let loc = at.loc.merge(&unit.loc);
                Ok(AstNode::UnitReference { unit, loc })
            }
            TokenKind::Bang => self.function(true),
            TokenKind::Id if self.cursor.peek(2).kind == TokenKind::Bang => {
                let loc = first.loc.merge(&self.cursor.peek(2).loc);
                self.cursor.errors.throw(19, Some(loc)).fail()
            }
            _ => self.range(),
        }
    }

    fn variable(&mut self) -> Result<AstNode> {
        let name = self.cursor.consume(&[TokenKind::Id])?;
        let ident = Ident::new(&name.value, name.loc.clone());

        let mut annotation = None;
        if self.cursor.peek(1).kind == TokenKind::Colon {
            self.cursor.consume(&[TokenKind::Colon])?;
            annotation = Some(self.type_annotation()?);
        }

        if annotation.is_some() && self.cursor.peek(1).kind != TokenKind::Assign {
            let loc = name.loc.clone();
            return Ok(AstNode::VariableDeclaration {
                name: ident,
                annotation: annotation.expect("just checked"),
                loc,
            });
        }

        self.cursor.consume(&[TokenKind::Assign])?;
        let value = self.expression()?;
        let loc = name.loc.merge(&value.loc());
        Ok(AstNode::Variable {
            name: ident,
            annotation,
            value: Box::new(value),
            loc,
        })
    }

    fn dimension_def(&mut self) -> Result<AstNode> {
        let start = self.cursor.consume(&[TokenKind::Dimension])?;
        let name = self.cursor.consume(&[TokenKind::Id])?;

        if !self.imports_allowed {
            return self
                .cursor
                .errors
                .throw(20, Some(start.loc))
                .arg("statement", "dimension definitions")
                .fail();
        }

        let mut value = None;
        if self.cursor.peek(1).kind == TokenKind::Assign {
            self.cursor.consume(&[TokenKind::Assign])?;
            self.cursor.clear();
            value = Some(self.unit(UnitParserConfig {
                standalone: true,
                constants: true,
                scalars: true,
                ..UnitParserConfig::default()
            })?);
        }

        let loc = match &value {
            Some(value) => start.loc.merge(&value.loc),
            None => start.loc.merge(&name.loc),
        };
        let def = Rc::new(DimensionDef {
            name: Ident::new(&name.value, name.loc),
            value,
            loc,
        });
        self.header.dimensions.push(Rc::clone(&def));
        Ok(AstNode::DimensionDefinition(def))
    }

    fn unit_def(&mut self) -> Result<AstNode> {
        let start = self.cursor.consume(&[TokenKind::Unit])?;
        let name = self.cursor.consume(&[TokenKind::Id])?;

        if !self.imports_allowed {
            return self
                .cursor
                .errors
                .throw(20, Some(start.loc))
                .arg("statement", "unit definitions")
                .fail();
        }

        let mut dimension = None;
        if self.cursor.peek(1).kind == TokenKind::Colon {
            self.cursor.consume(&[TokenKind::Colon])?;
            let next = self.cursor.peek(1).clone();
            match next.kind {
                TokenKind::Id => {
                    let tok = self.cursor.consume(&[TokenKind::Id])?;
                    dimension = Some(Ident::new(&tok.value, tok.loc));
                }
                TokenKind::Number if next.value == "1" => {
                    let tok = self.cursor.consume(&[TokenKind::Number])?;
                    dimension = Some(Ident::new("1", tok.loc));
                }
                _ => {
                    return self
                        .cursor
                        .errors
                        .throw(1, Some(next.loc))
                        .arg("token", &next.value)
                        .help("expected a dimension")
                        .fail();
                }
            }
        }

        if self.cursor.peek(1).kind == TokenKind::LParen {
            let loc = self.cursor.peek(1).loc.clone();
            return self.cursor.errors.throw(5, Some(loc)).fail();
        }

        let mut params = Vec::new();
        if self.cursor.peek(1).kind == TokenKind::LBracket {
            self.cursor.consume(&[TokenKind::LBracket])?;
            while self.cursor.peek(1).kind != TokenKind::RBracket {
                let pname = self.cursor.consume(&[TokenKind::Id])?;
                if matches!(self.cursor.peek(1).kind, TokenKind::Assign | TokenKind::Comma) {
                    let loc = self.cursor.peek(1).loc.clone();
                    return self.cursor.errors.throw(6, Some(loc)).fail();
                }
                self.cursor.consume(&[TokenKind::Colon])?;
                let annotation = self.unit(UnitParserConfig::standalone())?;

                let mut default = None;
                if self.cursor.peek(1).kind == TokenKind::Assign {
                    self.cursor.consume(&[TokenKind::Assign])?;
                    let number = self.cursor.consume(&[TokenKind::Number])?;
                    let (lit, _is_float) = self.number_lit(&number)?;
                    default = Some(lit);
                }

                let loc = pname.loc.clone();
                params.push(UnitParam {
                    name: Ident::new(&pname.value, pname.loc),
                    annotation: Some(annotation),
                    default,
                    loc,
                });

                if self.cursor.peek(1).kind == TokenKind::Comma {
                    self.cursor.consume(&[TokenKind::Comma])?;
                } else {
                    break;
                }
            }
            self.cursor.consume(&[TokenKind::RBracket])?;
        }

        let mut value = None;
        if self.cursor.peek(1).kind == TokenKind::Assign {
            self.cursor.consume(&[TokenKind::Assign])?;
            self.cursor.clear();
            value = Some(self.unit(UnitParserConfig::definition())?);
        }

        let loc = match &value {
            Some(value) => start.loc.merge(&value.loc),
            None => start.loc.merge(&name.loc),
        };
        let def = Rc::new(UnitDef {
            name: Ident::new(&name.value, name.loc),
            dimension,
            params,
            value,
            loc,
        });
        self.header.units.push(Rc::clone(&def));
        Ok(AstNode::UnitDefinition(def))
    }

    fn function(&mut self, anonymous: bool) -> Result<AstNode> {
        let name = if anonymous {
            None
        } else {
            let tok = self.cursor.consume(&[TokenKind::Id])?;
            Some(Ident::new(&tok.value, tok.loc))
        };

        let bang = self.cursor.consume(&[TokenKind::Bang])?;
        self.cursor.consume(&[TokenKind::LParen])?;

        let mut params = Vec::new();
        while self.cursor.peek(1).kind != TokenKind::RParen {
            let pname = self.cursor.consume(&[TokenKind::Id])?;

            let mut annotation = None;
            if self.cursor.peek(1).kind == TokenKind::Colon {
                self.cursor.consume(&[TokenKind::Colon])?;
                annotation = Some(self.type_annotation()?);
            }

            let mut default = None;
            if self.cursor.peek(1).kind == TokenKind::Assign {
                self.cursor.consume(&[TokenKind::Assign])?;
                default = Some(Box::new(self.expression()?));
            }

            let loc = pname.loc.clone();
            params.push(AstNode::Param {
                name: Ident::new(&pname.value, pname.loc),
                annotation,
                default,
                loc,
            });

            if self.cursor.peek(1).kind == TokenKind::RParen {
                break;
            }
            self.cursor.consume(&[TokenKind::Comma])?;
        }
        self.cursor.consume(&[TokenKind::RParen])?;

        let mut assign = self.cursor.consume(&[TokenKind::Colon, TokenKind::Assign])?;
        let mut return_type = None;
        if assign.kind == TokenKind::Colon {
            return_type = Some(self.type_annotation()?);
            assign = self.cursor.consume(&[TokenKind::Assign])?;
        }

        let body = self.block()?;

        let start_loc = name.as_ref().map_or(&bang.loc, |ident| &ident.loc);
        let loc = start_loc
            .merge(&body.loc())
            .with_checkpoint("assign", assign.loc);
        Ok(AstNode::Function {
            name,
            params,
            return_type,
            body: Some(Box::new(body)),
            loc,
        })
    }

    fn conditional(&mut self, expression: bool) -> Result<AstNode> {
        let start = self.cursor.consume(&[TokenKind::If])?;
        let condition = self.expression()?;
        self.cursor.consume(&[TokenKind::Then])?;
        let then_branch = if expression { self.expression()? } else { self.block()? };

        let mut else_branch = None;
        if self.cursor.peek(1).kind == TokenKind::Else {
            self.cursor.consume(&[TokenKind::Else])?;
            else_branch = Some(if expression { self.expression()? } else { self.block()? });
        } else if expression {
            let loc = start.loc.merge(&then_branch.loc());
            return self.cursor.errors.throw(14, Some(loc)).fail();
        }

        let loc = condition.loc().merge(
            &else_branch.as_ref().map_or_else(|| then_branch.loc(), AstNode::loc),
        );
        Ok(AstNode::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
            expression,
            loc,
        })
    }

    fn for_loop(&mut self) -> Result<AstNode> {
        let start = self.cursor.consume(&[TokenKind::For])?;
        let mut iterators = Vec::new();
        let first = self.cursor.consume(&[TokenKind::Id])?;
        iterators.push(Ident::new(&first.value, first.loc));
        while self.cursor.peek(1).kind == TokenKind::Comma {
            self.cursor.consume(&[TokenKind::Comma])?;
            let tok = self.cursor.consume(&[TokenKind::Id])?;
            iterators.push(Ident::new(&tok.value, tok.loc));
        }

        self.cursor.consume(&[TokenKind::In])?;
        let iterable = self.expression()?;
        self.cursor.consume(&[TokenKind::Do])?;
        let body = self.block()?;

        let loc = start.loc.merge(&body.loc());
        Ok(AstNode::ForLoop {
            iterators,
            iterable: Box::new(iterable),
            body: Box::new(body),
            loc,
        })
    }

    fn while_loop(&mut self) -> Result<AstNode> {
        let start = self.cursor.consume(&[TokenKind::While])?;
        let condition = self.expression()?;
        self.cursor.consume(&[TokenKind::Do])?;
        let body = self.block()?;
        let loc = start.loc.merge(&body.loc());
        Ok(AstNode::WhileLoop {
            condition: Box::new(condition),
            body: Box::new(body),
            loc,
        })
    }

    fn range(&mut self) -> Result<AstNode> {
        let first = self.conversion()?;
        let mut parts = vec![first];

        while self.cursor.peek_raw(1).kind == TokenKind::Range && parts.len() < 3 {
            self.cursor.consume(&[TokenKind::Range])?;
            parts.push(self.conversion()?);
        }

        if parts.len() == 1 {
            return Ok(parts.into_iter().next().expect("one part"));
        }

        let loc = parts[0].loc().merge(&parts.last().expect("last part").loc());
        let mut iter = parts.into_iter();
        let start = iter.next().expect("range start");
        let end = iter.next().expect("range end");
        let step = iter.next();
        Ok(AstNode::Range {
            start: Box::new(start),
            end: Box::new(end),
            step: step.map(Box::new),
            loc,
        })
    }

    fn conversion(&mut self) -> Result<AstNode> {
        let node = self.logic_or()?;
        if self.cursor.peek(1).kind == TokenKind::Conversion {
            let tok = self.cursor.consume(&[TokenKind::Conversion])?;
            let display_only = tok.value.starts_with('(');
            let op = Op::new(OpKind::Conv, tok.loc);
            let target = self.type_annotation()?;

            if matches!(target, Annotation::Function(_)) {
                return self.cursor.errors.throw(538, Some(node.loc())).fail();
            }

            let mut loc = node.loc().merge(&annotation_loc(&target));
            if display_only {
                let rparen = self.cursor.consume(&[TokenKind::RParen])?;
                loc = node.loc().merge(&rparen.loc);
            }
            return Ok(AstNode::Conversion {
                op,
                value: Box::new(node),
                target,
                display_only,
                loc,
            });
        }
        Ok(node)
    }

    fn logic_chain(
        &mut self,
        kind: TokenKind,
        op: OpKind,
        subrule: fn(&mut Self) -> Result<AstNode>,
    ) -> Result<AstNode> {
        let mut node = subrule(self)?;
        while self.cursor.peek(1).kind == kind {
            let tok = self.cursor.consume(&[kind])?;
            let right = subrule(self)?;
            let loc = node.loc().merge(&right.loc());
            node = AstNode::BoolOp {
                op: Op::new(op, tok.loc),
                left: Box::new(node),
                right: Box::new(right),
                loc,
            };
        }
        Ok(node)
    }

    fn logic_or(&mut self) -> Result<AstNode> {
        self.logic_chain(TokenKind::Or, OpKind::Or, Self::logic_xor)
    }

    fn logic_xor(&mut self) -> Result<AstNode> {
        self.logic_chain(TokenKind::Xor, OpKind::Xor, Self::logic_and)
    }

    fn logic_and(&mut self) -> Result<AstNode> {
        self.logic_chain(TokenKind::And, OpKind::And, Self::logic_not)
    }

    fn logic_not(&mut self) -> Result<AstNode> {
        if self.cursor.peek(1).kind == TokenKind::Not {
            let tok = self.cursor.consume(&[TokenKind::Not])?;
            let operand = self.logic_not()?;
            let loc = tok.loc.merge(&operand.loc());
            return Ok(AstNode::UnaryOp {
                op: Op::new(OpKind::Not, tok.loc),
                operand: Box::new(operand),
                loc,
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<AstNode> {
        let node = self.arith()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();

        loop {
            let kind = self.cursor.peek(1).kind;
            let op = match kind {
                TokenKind::Lt => OpKind::Lt,
                TokenKind::Le => OpKind::Le,
                TokenKind::Gt => OpKind::Gt,
                TokenKind::Ge => OpKind::Ge,
                TokenKind::EqEq => OpKind::Eq,
                TokenKind::Ne => OpKind::Ne,
                _ => break,
            };
            let tok = self.cursor.consume(&[kind])?;
            ops.push(Op::new(op, tok.loc));
            comparators.push(self.arith()?);
        }

        if ops.is_empty() {
            return Ok(node);
        }
        let loc = node.loc().merge(&comparators.last().expect("comparator").loc());
        Ok(AstNode::Compare {
            ops,
            left: Box::new(node),
            comparators,
            loc,
        })
    }

    fn bin_chain(
        &mut self,
        table: &[(TokenKind, OpKind)],
        subrule: fn(&mut Self) -> Result<AstNode>,
    ) -> Result<AstNode> {
        let mut node = subrule(self)?;
        loop {
            let kind = self.cursor.peek(1).kind;
            let Some((_, op)) = table.iter().find(|(k, _)| *k == kind) else {
                break;
            };
            let tok = self.cursor.consume(&[kind])?;
            let right = subrule(self)?;
            let loc = node.loc().merge(&right.loc());
            node = AstNode::BinOp {
                op: Op::new(*op, tok.loc),
                left: Box::new(node),
                right: Box::new(right),
                loc,
            };
        }
        Ok(node)
    }

    fn arith(&mut self) -> Result<AstNode> {
        self.bin_chain(
            &[(TokenKind::Plus, OpKind::Add), (TokenKind::Minus, OpKind::Sub)],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<AstNode> {
        self.bin_chain(
            &[
                (TokenKind::Times, OpKind::Mul),
                (TokenKind::Divide, OpKind::Div),
                (TokenKind::IntDivide, OpKind::IntDiv),
                (TokenKind::Mod, OpKind::Mod),
            ],
            Self::power,
        )
    }

    fn power(&mut self) -> Result<AstNode> {
        let node = self.unary()?;
        if self.cursor.peek(1).kind == TokenKind::Power {
            let tok = self.cursor.consume(&[TokenKind::Power])?;
            // right-associative
            let right = self.power()?;
            let loc = node.loc().merge(&right.loc());
            return Ok(AstNode::BinOp {
                op: Op::new(OpKind::Pow, tok.loc),
                left: Box::new(node),
                right: Box::new(right),
                loc,
            });
        }
        Ok(node)
    }

    fn unary(&mut self) -> Result<AstNode> {
        if matches!(self.cursor.peek(1).kind, TokenKind::Plus | TokenKind::Minus) {
            let mut minus_tok = None;
            let mut minuses = 0;
            while matches!(self.cursor.peek(1).kind, TokenKind::Plus | TokenKind::Minus) {
                let tok = self.cursor.consume(&[TokenKind::Plus, TokenKind::Minus])?;
                if tok.kind == TokenKind::Minus {
                    minuses += 1;
                    minus_tok.get_or_insert(tok);
                }
            }

            let operand = self.postfix()?;
            if minuses % 2 == 1 {
                let tok = minus_tok.expect("minus token");
                let loc = tok.loc.merge(&operand.loc());
                return Ok(AstNode::UnaryOp {
                    op: Op::new(OpKind::Sub, tok.loc),
                    operand: Box::new(operand),
                    loc,
                });
            }
            return Ok(operand);
        }
        self.postfix()
    }

    /// Postfix chaining for calls and indexing; `(`/`[` must be adjacent.
    fn postfix(&mut self) -> Result<AstNode> {
        let mut node = self.atom()?;
        loop {
            match self.cursor.peek_raw(1).kind {
                TokenKind::LParen => node = self.call(node)?,
                TokenKind::LBracket => node = self.index(node)?,
                _ => break,
            }
        }
        Ok(node)
    }

    fn call(&mut self, callee: AstNode) -> Result<AstNode> {
        self.cursor.consume(&[TokenKind::LParen])?;
        let mut args = Vec::new();
        while self.cursor.peek(1).kind != TokenKind::RParen {
            let mut name = None;
            if self.cursor.peek(2).kind == TokenKind::Assign {
                let tok = self.cursor.consume(&[TokenKind::Id])?;
                name = Some(Ident::new(&tok.value, tok.loc));
                self.cursor.consume(&[TokenKind::Assign])?;
            }
            let value = self.expression()?;
            let loc = name
                .as_ref()
                .map_or_else(|| value.loc(), |ident| ident.loc.merge(&value.loc()));
            args.push(AstNode::CallArg { name, value: Box::new(value), loc });

            if self.cursor.peek(1).kind == TokenKind::RParen {
                break;
            }
            self.cursor.consume(&[TokenKind::Comma])?;
        }
        let end = self.cursor.consume(&[TokenKind::RParen])?;
        let loc = callee.loc().merge(&end.loc);
        Ok(AstNode::Call { callee: Box::new(callee), args, loc })
    }

    fn index(&mut self, iterable: AstNode) -> Result<AstNode> {
        let open = self.cursor.consume(&[TokenKind::LBracket])?;
        let mut parts: Vec<Option<AstNode>> = Vec::new();
        let mut colons = 0;

        while self.cursor.peek(1).kind != TokenKind::RBracket {
            if self.cursor.peek(1).kind == TokenKind::Colon {
                if colons >= 2 {
                    break;
                }
                parts.push(None);
                self.cursor.consume(&[TokenKind::Colon])?;
                colons += 1;
            } else {
                parts.push(Some(self.expression()?));
                if self.cursor.peek(1).kind == TokenKind::Colon {
                    if colons >= 2 {
                        break;
                    }
                    self.cursor.consume(&[TokenKind::Colon])?;
                    colons += 1;
                }
            }
        }
        let end = self.cursor.consume(&[TokenKind::RBracket])?;

        let index = if colons == 0 {
            match parts.into_iter().next().flatten() {
                Some(index) => index,
                None => {
                    return self
                        .cursor
                        .errors
                        .throw(1, Some(end.loc))
                        .arg("token", "]")
                        .help("expected an index")
                        .fail();
                }
            }
        } else {
            parts.resize_with(3, || None);
            let mut iter = parts.into_iter();
            let loc = open.loc.merge(&end.loc);
            AstNode::Slice {
                start: iter.next().flatten().map(Box::new),
                stop: iter.next().flatten().map(Box::new),
                step: iter.next().flatten().map(Box::new),
                loc,
            }
        };

        let loc = iterable.loc().merge(&end.loc);
        Ok(AstNode::Index {
            iterable: Box::new(iterable),
            index: Box::new(index),
            loc,
        })
    }

    fn list(&mut self, open: &Token) -> Result<AstNode> {
        let mut items = Vec::new();
        while self.cursor.peek(1).kind != TokenKind::RBracket {
            items.push(self.expression()?);
            if self.cursor.peek(1).kind == TokenKind::RBracket {
                break;
            }
            self.cursor.consume(&[TokenKind::Comma])?;
        }
        let end = self.cursor.consume(&[TokenKind::RBracket])?;
        Ok(AstNode::List { items, loc: open.loc.merge(&end.loc) })
    }

    fn unit(&mut self, config: UnitParserConfig) -> Result<Unit> {
        let unit = UnitParser::new(&mut self.cursor, config).start()?;
        Ok(unit.unwrap_or_else(Unit::one))
    }

    fn atom(&mut self) -> Result<AstNode> {
        let tok = self.cursor.consume(&[
            TokenKind::Number,
            TokenKind::True,
            TokenKind::False,
            TokenKind::Id,
            TokenKind::Str,
            TokenKind::LBracket,
            TokenKind::LParen,
        ])?;

        match tok.kind {
            TokenKind::Number => {
                let (mut lit, is_float) = self.number_lit(&tok)?;
                // a literal's unit is adjacent, or separated by a single space
                let raw1 = self.cursor.peek_raw(1);
                let attach = matches!(raw1.kind, TokenKind::LParen | TokenKind::Id)
                    || (raw1.value == " "
                        && matches!(self.cursor.peek_raw(2).kind, TokenKind::LParen | TokenKind::Id));
                if attach {
                    let unit =
                        UnitParser::new(&mut self.cursor, UnitParserConfig::default()).start()?;
                    if let Some(unit) = unit {
                        lit.loc = lit.loc.merge(&unit.loc);
                        lit.unit = Some(unit);
                    }
                }
                Ok(if is_float { AstNode::Float(lit) } else { AstNode::Integer(lit) })
            }
            TokenKind::True | TokenKind::False => Ok(AstNode::Boolean {
                value: tok.kind == TokenKind::True,
                loc: tok.loc,
            }),
            TokenKind::Id => Ok(AstNode::Identifier(Ident::new(&tok.value, tok.loc))),
            TokenKind::Str => Ok(AstNode::Str {
                value: tok.value.trim_matches('"').to_owned(),
                loc: tok.loc,
            }),
            TokenKind::LBracket => self.list(&tok),
            TokenKind::LParen => {
                let node = self.expression()?;
                self.cursor.consume(&[TokenKind::RParen])?;
                Ok(node)
            }
            _ => unreachable!(),
        }
    }

    fn import_stmt(&mut self) -> Result<AstNode> {
        let start = self.cursor.consume(&[TokenKind::Import])?;
        if !self.imports_allowed {
            return self.cursor.errors.throw(801, Some(start.loc)).fail();
        }

        let module_tok = self.cursor.consume(&[TokenKind::Id])?;
        let module = Ident::new(&module_tok.value, module_tok.loc);

        let mut alias = None;
        if self.cursor.peek(1).kind == TokenKind::Id && self.cursor.peek(1).value == "as" {
            self.cursor.consume(&[TokenKind::Id])?;
            let tok = self.cursor.consume(&[TokenKind::Id])?;
            alias = Some(Ident::new(&tok.value, tok.loc));
        }

        let loc = start
            .loc
            .merge(&alias.as_ref().map_or(&module.loc, |ident| &ident.loc).clone());
        let def = Rc::new(ImportDef { module, alias, loc });
        self.header.imports.push(HeaderImport::Import(Rc::clone(&def)));
        Ok(AstNode::Import(def))
    }

    fn from_import_stmt(&mut self) -> Result<AstNode> {
        let start = self.cursor.consume(&[TokenKind::From])?;
        if !self.imports_allowed {
            return self.cursor.errors.throw(801, Some(start.loc)).fail();
        }

        let module_tok = self.cursor.consume(&[TokenKind::Id])?;
        let module = Ident::new(&module_tok.value, module_tok.loc);
        self.cursor.consume(&[TokenKind::Import])?;

        if self.cursor.peek(1).kind == TokenKind::Times {
            let end = self.cursor.consume(&[TokenKind::Times])?;
            let loc = start.loc.merge(&end.loc);
            let def = Rc::new(FromImportDef { module, names: None, aliases: Vec::new(), loc });
            self.header.imports.push(HeaderImport::From(Rc::clone(&def)));
            return Ok(AstNode::FromImport(def));
        }

        let mut names = Vec::new();
        let mut aliases = Vec::new();
        // index up to which names are covered by an `@`/`@(...)` prefix
        let mut atted_until: Option<usize> = None;
        let mut grouped = false;
        let mut i = 0usize;

        loop {
            self.cursor.clear();
            if self.cursor.peek(1).kind == TokenKind::At {
                if atted_until.is_some_and(|until| until >= i) {
                    let loc = self.cursor.peek(1).loc.clone();
                    return self.cursor.errors.throw(15, Some(loc)).fail();
                }
                let at = self.cursor.consume(&[TokenKind::At])?;
                match self.cursor.peek_raw(1).kind {
                    TokenKind::LParen => {
                        self.cursor.consume(&[TokenKind::LParen])?;
                        atted_until = Some(usize::MAX);
                        grouped = true;
                    }
                    TokenKind::Id => atted_until = Some(i),
                    _ => return self.cursor.errors.throw(9, Some(at.loc)).fail(),
                }
            }

            let name_tok = self.cursor.consume(&[TokenKind::Id])?;
            let atted = atted_until.is_some_and(|until| until >= i);
            let name = if atted {
                Ident::new(format!("@{}", name_tok.value), name_tok.loc)
            } else {
                Ident::new(&name_tok.value, name_tok.loc)
            };
            names.push(name);

            let mut alias = None;
            if self.cursor.peek(1).kind == TokenKind::Id && self.cursor.peek(1).value == "as" {
                self.cursor.consume(&[TokenKind::Id])?;
                let tok = self.cursor.consume(&[TokenKind::Id])?;
                alias = Some(Ident::new(&tok.value, tok.loc));
            }
            aliases.push(alias);

            if grouped && self.cursor.peek(1).kind == TokenKind::RParen {
                self.cursor.consume(&[TokenKind::RParen])?;
                atted_until = None;
                grouped = false;
            }
            if self.cursor.peek(1).kind != TokenKind::Comma {
                break;
            }
            self.cursor.consume(&[TokenKind::Comma])?;
            i += 1;
        }

        let end_loc = aliases
            .last()
            .and_then(|alias| alias.as_ref().map(|ident| ident.loc.clone()))
            .or_else(|| names.last().map(|ident| ident.loc.clone()))
            .unwrap_or_default();
        let loc = start.loc.merge(&end_loc);
        let def = Rc::new(FromImportDef { module, names: Some(names), aliases, loc });
        self.header.imports.push(HeaderImport::From(Rc::clone(&def)));
        Ok(AstNode::FromImport(def))
    }

    fn type_annotation(&mut self) -> Result<Annotation> {
        if self.cursor.peek(1).kind == TokenKind::Bang {
            return self.function_annotation();
        }

        let next = self.cursor.peek(1).clone();
        if next.kind == TokenKind::Id && TYPE_NAMES.contains(&next.value.as_str()) {
            let tok = self.cursor.consume(&[TokenKind::Id])?;
            let name = Ident::new(&tok.value, tok.loc);
            if self.cursor.peek(1).kind == TokenKind::LBracket {
                if !matches!(name.name.as_str(), "Int" | "Float" | "List") {
                    let tok = self.cursor.peek(1).clone();
                    return self
                        .cursor
                        .errors
                        .throw(1, Some(tok.loc))
                        .arg("token", &tok.value)
                        .help(format!("type '{}' cannot be parameterized", name.name))
                        .fail();
                }
                self.cursor.consume(&[TokenKind::LBracket])?;
                let param = self.type_annotation()?;
                self.cursor.consume(&[TokenKind::RBracket])?;
                return Ok(Annotation::Type { name, param: Some(Box::new(param)) });
            }
            return Ok(Annotation::Type { name, param: None });
        }

        Ok(Annotation::Unit(self.unit(UnitParserConfig::standalone())?))
    }

    fn function_annotation(&mut self) -> Result<Annotation> {
        let bang = self.cursor.consume(&[TokenKind::Bang])?;
        self.cursor.consume(&[TokenKind::LBracket])?;
        self.cursor.consume(&[TokenKind::LBracket])?;

        let mut params = Vec::new();
        let mut param_names = Vec::new();
        let mut required = 0usize;
        let mut optional_section = false;

        while self.cursor.peek(1).kind != TokenKind::RBracket {
            if self.cursor.peek(1).kind == TokenKind::Divide && !optional_section {
                self.cursor.consume(&[TokenKind::Divide])?;
                optional_section = true;
            } else {
                let tok = self.cursor.consume(&[TokenKind::Id])?;
                param_names.push(Ident::new(&tok.value, tok.loc));
                if self.cursor.peek(1).kind != TokenKind::Colon {
                    let loc = self.cursor.peek(1).loc.clone();
                    return self.cursor.errors.throw(18, Some(loc)).fail();
                }
                self.cursor.consume(&[TokenKind::Colon])?;
                params.push(self.type_annotation()?);
                if !optional_section {
                    required += 1;
                }
            }

            if self.cursor.peek(1).kind != TokenKind::RBracket {
                self.cursor.consume(&[TokenKind::Comma])?;
            }
        }

        self.cursor.consume(&[TokenKind::RBracket])?;
        self.cursor.consume(&[TokenKind::Comma])?;
        let return_type = self.type_annotation()?;
        let end = self.cursor.consume(&[TokenKind::RBracket])?;

        let total = params.len();
        Ok(Annotation::Function(FunctionAnnotation {
            params,
            param_names,
            return_type: Some(Box::new(return_type)),
            arity: (required, total),
            loc: bang.loc.merge(&end.loc),
        }))
    }

    fn number_lit(&mut self, tok: &Token) -> Result<(NumberLit, bool)> {
        let lower = tok.value.to_lowercase();
        let (number, exponent) = match lower.split_once('e') {
            Some((number, exponent)) => (number.replace('_', ""), exponent.to_owned()),
            None => (lower.replace('_', ""), String::new()),
        };
        if exponent.contains('.') {
            return self
                .cursor
                .errors
                .throw(7, Some(tok.loc.clone()))
                .arg("token", &tok.value)
                .fail();
        }
        debug_assert!(rust_decimal::Decimal::from_str(&number).is_ok());

        let is_float = number.contains('.') || exponent.starts_with('-');
        Ok((
            NumberLit {
                value: number,
                exponent,
                unit: None,
                loc: tok.loc.clone(),
            },
            is_float,
        ))
    }
}

fn annotation_loc(annotation: &Annotation) -> Location {
    match annotation {
        Annotation::Type { name, param } => param
            .as_ref()
            .map_or_else(|| name.loc.clone(), |param| name.loc.merge(&annotation_loc(param))),
        Annotation::Function(func) => func.loc.clone(),
        Annotation::Unit(unit) => unit.loc.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_source(source: &str) -> (Vec<AstNode>, Header) {
        let module = ModuleMeta::new("<test>", source);
        let tokens = lex(source, Rc::clone(&module)).unwrap();
        parse(tokens, module).unwrap()
    }

    fn parse_err(source: &str) -> u16 {
        let module = ModuleMeta::new("<test>", source);
        let tokens = lex(source, Rc::clone(&module)).unwrap();
        parse(tokens, module).unwrap_err().code
    }

    #[test]
    fn parses_header_declarations() {
        let (ast, header) = parse_source("unit m\nunit km = 1000 m\ndimension Speed = Length / Time\n");
        assert_eq!(ast.len(), 3);
        assert_eq!(header.units.len(), 2);
        assert_eq!(header.dimensions.len(), 1);
        assert_eq!(header.units[1].name.name, "km");
        assert!(header.units[1].value.is_some());
    }

    #[test]
    fn literal_unit_requires_adjacency() {
        let (ast, _) = parse_source("x = 5 km");
        let AstNode::Variable { value, .. } = &ast[0] else { panic!("expected variable") };
        let AstNode::Integer(lit) = &**value else { panic!("expected integer, got {value:?}") };
        assert!(lit.unit.is_some());

        // a newline between number and identifier does not attach a unit
        let (ast, _) = parse_source("x = 5\ny = 2");
        let AstNode::Variable { value, .. } = &ast[0] else { panic!("expected variable") };
        let AstNode::Integer(lit) = &**value else { panic!("expected integer") };
        assert!(lit.unit.is_none());
    }

    #[test]
    fn parses_function_definition() {
        let (ast, _) = parse_source("f!(a: Int, b: Int = 2): Int = a + b\n");
        let AstNode::Function { name, params, return_type, body, .. } = &ast[0] else {
            panic!("expected function, got {:?}", ast[0]);
        };
        assert_eq!(name.as_ref().unwrap().name, "f");
        assert_eq!(params.len(), 2);
        assert!(return_type.is_some());
        assert!(body.is_some());
    }

    #[test]
    fn conditional_expression_needs_else() {
        assert_eq!(parse_err("x = if true then 1"), 14);
    }

    #[test]
    fn named_function_is_not_an_expression() {
        assert_eq!(parse_err("x = f!(a) = a"), 19);
    }

    #[test]
    fn imports_must_come_first() {
        assert_eq!(parse_err("x = 1\nimport si"), 801);
        assert_eq!(parse_err("x = 1\nunit m"), 20);
    }

    #[test]
    fn parses_from_import_with_unit_prefix() {
        let (_, header) = parse_source("from si import @meter, second\n");
        let HeaderImport::From(def) = &header.imports[0] else { panic!("expected from-import") };
        let names = def.names.as_ref().unwrap();
        assert_eq!(names[0].name, "@meter");
        assert_eq!(names[1].name, "second");
    }

    #[test]
    fn parses_comparison_chain() {
        let (ast, _) = parse_source("x = 1 < 2 < 3");
        let AstNode::Variable { value, .. } = &ast[0] else { panic!() };
        let AstNode::Compare { ops, comparators, .. } = &**value else { panic!("expected compare") };
        assert_eq!(ops.len(), 2);
        assert_eq!(comparators.len(), 2);
    }

    #[test]
    fn parses_slices_and_ranges() {
        let (ast, _) = parse_source("y = xs[1:3]\nz = 0..10..2");
        let AstNode::Variable { value, .. } = &ast[0] else { panic!() };
        let AstNode::Index { index, .. } = &**value else { panic!("expected index") };
        assert!(matches!(**index, AstNode::Slice { .. }));

        let AstNode::Variable { value, .. } = &ast[1] else { panic!() };
        assert!(matches!(**value, AstNode::Range { step: Some(_), .. }));
    }

    #[test]
    fn rejects_sums_in_plain_unit_position() {
        assert_eq!(parse_err("dimension D = Length + Time"), 16);
    }

    #[test]
    fn index_assignment_target_must_be_index() {
        // plain variable assignment goes through `variable`, but a call on
        // the left of `=` is not assignable
        assert_eq!(parse_err("f() = 3"), 21);
    }
}
