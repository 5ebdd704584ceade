//! AST node definitions for language constructs.
//!
//! Nodes are immutable once parsed. After linking, every child reference is
//! an [`AstNode::Link`] into the node table; pass-specific annotations live
//! in a side table keyed by link (see `env::Namespaces`).

use std::rc::Rc;

use crate::{
    location::Location,
    unit::{Ident, Unit},
};

/// Opaque handle identifying an interned AST node within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link(pub u64);

/// Operators, named the way method lookup spells them (`__add__`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Xor,
    Not,
    Conv,
}

impl OpKind {
    /// Human form used in diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::IntDiv => "//",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
            Self::Conv => "->",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Op {
    pub kind: OpKind,
    pub loc: Location,
}

impl Op {
    pub fn new(kind: OpKind, loc: Location) -> Self {
        Self { kind, loc }
    }
}

/// A numeric literal, split into mantissa and exponent as written.
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct NumberLit {
    pub value: String,
    pub exponent: String,
    pub unit: Option<Unit>,
    pub loc: Location,
}

/// A type annotation as written in source. Annotations stay inline on their
/// owning node; they are resolved by the typechecker, not linked.
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum Annotation {
    Type { name: Ident, param: Option<Box<Annotation>> },
    Function(FunctionAnnotation),
    Unit(Unit),
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct FunctionAnnotation {
    pub params: Vec<Annotation>,
    pub param_names: Vec<Ident>,
    pub return_type: Option<Box<Annotation>>,
    pub arity: (usize, usize),
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct UnitParam {
    pub name: Ident,
    pub annotation: Option<Unit>,
    pub default: Option<NumberLit>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct UnitDef {
    pub name: Ident,
    pub dimension: Option<Ident>,
    pub params: Vec<UnitParam>,
    pub value: Option<Unit>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct DimensionDef {
    pub name: Ident,
    pub value: Option<Unit>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct ImportDef {
    pub module: Ident,
    pub alias: Option<Ident>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct FromImportDef {
    pub module: Ident,
    /// `None` means `import *`.
    pub names: Option<Vec<Ident>>,
    pub aliases: Vec<Option<Ident>>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub enum AstNode {
    Link(Link),
    Block {
        body: Vec<AstNode>,
        loc: Location,
    },
    UnitReference {
        unit: Unit,
        loc: Location,
    },
    If {
        condition: Box<AstNode>,
        then_branch: Box<AstNode>,
        else_branch: Option<Box<AstNode>>,
        expression: bool,
        loc: Location,
    },
    Boolean {
        value: bool,
        loc: Location,
    },
    Integer(NumberLit),
    Float(NumberLit),
    Str {
        value: String,
        loc: Location,
    },
    List {
        items: Vec<AstNode>,
        loc: Location,
    },
    UnaryOp {
        op: Op,
        operand: Box<AstNode>,
        loc: Location,
    },
    BinOp {
        op: Op,
        left: Box<AstNode>,
        right: Box<AstNode>,
        loc: Location,
    },
    BoolOp {
        op: Op,
        left: Box<AstNode>,
        right: Box<AstNode>,
        loc: Location,
    },
    Compare {
        ops: Vec<Op>,
        left: Box<AstNode>,
        comparators: Vec<AstNode>,
        loc: Location,
    },
    Conversion {
        op: Op,
        value: Box<AstNode>,
        target: Annotation,
        display_only: bool,
        loc: Location,
    },
    Variable {
        name: Ident,
        annotation: Option<Annotation>,
        value: Box<AstNode>,
        loc: Location,
    },
    VariableDeclaration {
        name: Ident,
        annotation: Annotation,
        loc: Location,
    },
    ForLoop {
        iterators: Vec<Ident>,
        iterable: Box<AstNode>,
        body: Box<AstNode>,
        loc: Location,
    },
    WhileLoop {
        condition: Box<AstNode>,
        body: Box<AstNode>,
        loc: Location,
    },
    Range {
        start: Box<AstNode>,
        end: Box<AstNode>,
        step: Option<Box<AstNode>>,
        loc: Location,
    },
    Identifier(Ident),
    Param {
        name: Ident,
        annotation: Option<Annotation>,
        default: Option<Box<AstNode>>,
        loc: Location,
    },
    Function {
        name: Option<Ident>,
        params: Vec<AstNode>,
        return_type: Option<Annotation>,
        body: Option<Box<AstNode>>,
        loc: Location,
    },
    CallArg {
        name: Option<Ident>,
        value: Box<AstNode>,
        loc: Location,
    },
    Call {
        callee: Box<AstNode>,
        args: Vec<AstNode>,
        loc: Location,
    },
    Index {
        iterable: Box<AstNode>,
        index: Box<AstNode>,
        loc: Location,
    },
    Slice {
        start: Option<Box<AstNode>>,
        stop: Option<Box<AstNode>>,
        step: Option<Box<AstNode>>,
        loc: Location,
    },
    IndexAssignment {
        target: Box<AstNode>,
        value: Box<AstNode>,
        loc: Location,
    },
    Break {
        loc: Location,
    },
    Continue {
        loc: Location,
    },
    Return {
        value: Option<Box<AstNode>>,
        loc: Location,
    },
    UnitDefinition(Rc<UnitDef>),
    DimensionDefinition(Rc<DimensionDef>),
    Import(Rc<ImportDef>),
    FromImport(Rc<FromImportDef>),
}

impl AstNode {
    pub fn loc(&self) -> Location {
        match self {
            Self::Link(_) => Location::default(),
            Self::Block { loc, .. }
            | Self::UnitReference { loc, .. }
            | Self::If { loc, .. }
            | Self::Boolean { loc, .. }
            | Self::Str { loc, .. }
            | Self::List { loc, .. }
            | Self::UnaryOp { loc, .. }
            | Self::BinOp { loc, .. }
            | Self::BoolOp { loc, .. }
            | Self::Compare { loc, .. }
            | Self::Conversion { loc, .. }
            | Self::Variable { loc, .. }
            | Self::VariableDeclaration { loc, .. }
            | Self::ForLoop { loc, .. }
            | Self::WhileLoop { loc, .. }
            | Self::Range { loc, .. }
            | Self::Param { loc, .. }
            | Self::Function { loc, .. }
            | Self::CallArg { loc, .. }
            | Self::Call { loc, .. }
            | Self::Index { loc, .. }
            | Self::Slice { loc, .. }
            | Self::IndexAssignment { loc, .. }
            | Self::Break { loc }
            | Self::Continue { loc }
            | Self::Return { loc, .. } => loc.clone(),
            Self::Integer(lit) | Self::Float(lit) => lit.loc.clone(),
            Self::Identifier(ident) => ident.loc.clone(),
            Self::UnitDefinition(def) => def.loc.clone(),
            Self::DimensionDefinition(def) => def.loc.clone(),
            Self::Import(def) => def.loc.clone(),
            Self::FromImport(def) => def.loc.clone(),
        }
    }

    pub fn as_link(&self) -> Option<Link> {
        match self {
            Self::Link(link) => Some(*link),
            _ => None,
        }
    }
}

/// The declarations a module's header contributes: imports plus unit and
/// dimension definitions, in source order.
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub imports: Vec<HeaderImport>,
    pub units: Vec<Rc<UnitDef>>,
    pub dimensions: Vec<Rc<DimensionDef>>,
}

#[derive(Debug, Clone)]
pub enum HeaderImport {
    Import(Rc<ImportDef>),
    From(Rc<FromImportDef>),
}

impl HeaderImport {
    pub fn module(&self) -> &Ident {
        match self {
            Self::Import(def) => &def.module,
            Self::From(def) => &def.module,
        }
    }

    pub fn loc(&self) -> Location {
        match self {
            Self::Import(def) => def.loc.clone(),
            Self::From(def) => def.loc.clone(),
        }
    }
}

impl Header {
    pub fn merge(&mut self, other: &Self) {
        self.imports.extend(other.imports.iter().cloned());
        self.units.extend(other.units.iter().cloned());
        self.dimensions.extend(other.dimensions.iter().cloned());
    }
}

/// Which operand's method table satisfied an operator lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A resolved structural-method dispatch, recorded for the emitter.
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    pub side: Side,
    /// e.g. `int__add__`
    pub name: String,
    pub operands: (String, String),
}

/// Mutable annotations a pass attaches to an interned node.
#[derive(Debug, Clone, Default)]
pub struct NodeMeta {
    /// Address of the binding this node defines (variables, functions).
    pub address: Option<String>,
    /// Resolved operator method for a `BinOp`.
    pub method: Option<ResolvedMethod>,
    /// Resolved methods for each pair of a comparison chain.
    pub methods: Vec<ResolvedMethod>,
}
