//! The type lattice: dimensioned numbers, containers, function signatures,
//! generic variables, and the unification/dimension-compatibility rules.

use std::{fmt, rc::Rc};

use ahash::AHashMap;

use crate::{
    ast::Link,
    location::Location,
    unit::{Unit, UnitKind},
};

/// Marker bits that ride along on a type without affecting equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeMeta {
    /// The value flows out of a `return` statement.
    pub returns: bool,
    /// Only the dimension of this number matters, not Int vs Float.
    pub dimension_only: bool,
}

impl PartialEq for TypeMeta {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumTyp {
    Int,
    Float,
}

impl NumTyp {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::Float => "Float",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    None,
    Bool,
    Str,
    Slice,
    Never,
    Undefined,
    Any {
        /// Link to the unannotated parameter this stands in for.
        unresolved: Option<Link>,
    },
    Number {
        typ: NumTyp,
        dim: Option<Unit>,
        value: f64,
    },
    List {
        content: Box<Type>,
    },
    Range {
        value: Box<Type>,
    },
    Function(Rc<FunctionSig>),
    Dimension {
        dim: Unit,
    },
    /// A generic variable (`T`) resolved through a [`VarEnv`].
    Var {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub node: Option<Link>,
    pub meta: TypeMeta,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Self { kind, node: None, meta: TypeMeta::default() }
    }

    pub fn never() -> Self {
        Self::new(TypeKind::Never)
    }

    pub fn any() -> Self {
        Self::new(TypeKind::Any { unresolved: None })
    }

    pub fn int() -> Self {
        Self::number(NumTyp::Int, None)
    }

    pub fn float() -> Self {
        Self::number(NumTyp::Float, None)
    }

    pub fn number(typ: NumTyp, dim: Option<Unit>) -> Self {
        Self::new(TypeKind::Number { typ, dim, value: 0.0 })
    }

    pub fn list(content: Self) -> Self {
        Self::new(TypeKind::List { content: Box::new(content) })
    }

    pub fn var(name: &str) -> Self {
        Self::new(TypeKind::Var { name: name.to_owned() })
    }

    pub fn function(sig: FunctionSig) -> Self {
        Self::new(TypeKind::Function(Rc::new(sig)))
    }

    /// Constructs the concrete type a primitive type name denotes, or the
    /// open `Any` for "Any". `None` for unknown names.
    pub fn named(name: &str) -> Option<Self> {
        Some(match name {
            "Any" => Self::any(),
            "None" => Self::new(TypeKind::None),
            "Int" => Self::int(),
            "Float" => Self::float(),
            "Bool" => Self::new(TypeKind::Bool),
            "Str" => Self::new(TypeKind::Str),
            "List" => Self::list(Self::never()),
            "Slice" => Self::new(TypeKind::Slice),
            "Range" => Self::new(TypeKind::Range { value: Box::new(Self::int()) }),
            "Function" => Self::function(FunctionSig::default()),
            _ => return None,
        })
    }

    /// The tag used for method-table lookup and the emitter's `typed` map.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            TypeKind::None => "None",
            TypeKind::Bool => "Bool",
            TypeKind::Str => "Str",
            TypeKind::Slice => "Slice",
            TypeKind::Never => "Never",
            TypeKind::Undefined => "Undefined",
            TypeKind::Any { .. } => "Any",
            TypeKind::Number { typ, .. } => typ.tag(),
            TypeKind::List { .. } => "List",
            TypeKind::Range { .. } => "Range",
            TypeKind::Function(_) => "Function",
            TypeKind::Dimension { .. } => "Dimension",
            TypeKind::Var { .. } => "Var",
        }
    }

    pub fn is(&self, names: &[&str]) -> bool {
        names.contains(&self.name())
    }

    pub fn dim(&self) -> Option<&Unit> {
        match &self.kind {
            TypeKind::Number { dim, .. } => dim.as_ref(),
            TypeKind::Dimension { dim } => Some(dim),
            _ => None,
        }
    }

    /// A dimension counts as present only when it is not `One`.
    pub fn has_dim(&self) -> bool {
        self.dim().is_some_and(Unit::is_truthy)
    }

    #[must_use]
    pub fn with_node(mut self, link: Link) -> Self {
        self.node = Some(link);
        self
    }

    #[must_use]
    pub fn with_dim(mut self, dim: Option<Unit>) -> Self {
        match &mut self.kind {
            TypeKind::Number { dim: slot, .. } => *slot = dim,
            TypeKind::Dimension { dim: slot } => {
                if let Some(dim) = dim {
                    *slot = dim;
                }
            }
            _ => {}
        }
        self
    }

    /// Resolves generic variables through `varenv`; with a `value`, binds
    /// unbound variables to it.
    pub fn complete(&self, varenv: &mut VarEnv, value: Option<&Type>) -> Self {
        match &self.kind {
            TypeKind::Var { name } => match value {
                None => varenv.get(name).unwrap_or_else(|| self.clone()),
                Some(value) => match varenv.get(name) {
                    None => {
                        varenv.bind(name, value.clone());
                        value.clone()
                    }
                    Some(bound) => {
                        if unify(value, &bound).is_some() && dimcheck(value, &bound) {
                            value.clone()
                        } else {
                            self.clone()
                        }
                    }
                },
            },
            TypeKind::List { content } => {
                let inner_value = value.and_then(|v| match &v.kind {
                    TypeKind::List { content } => Some(&**content),
                    _ => None,
                });
                Type::list(content.complete(varenv, inner_value))
            }
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Type {
    /// The user-facing rendering used in diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Number { typ, dim, .. } => {
                f.write_str(typ.tag())?;
                if let Some(dim) = dim {
                    if dim.is_truthy() {
                        write!(f, "[{}]", dim_repr(Some(dim)))?;
                    }
                }
                Ok(())
            }
            TypeKind::List { content } => write!(f, "List[{content}]"),
            TypeKind::Range { .. } => f.write_str("Range"),
            TypeKind::Dimension { dim } => write!(f, "[{}]", dim_repr(Some(dim))),
            TypeKind::Var { name } => write!(f, "?{name}"),
            TypeKind::Function(sig) => {
                f.write_str("![[")?;
                for (i, param) in sig.params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if i == sig.arity.0 && sig.arity.0 != sig.arity.1 {
                        f.write_str("/, ")?;
                    }
                    match sig.param_names.get(i) {
                        Some(name) => write!(f, "{name}: {param}")?,
                        None => write!(f, "{param}")?,
                    }
                }
                write!(f, "], {}]", sig.return_type)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Pretty form of a dimension expression for messages; `1` when absent.
pub fn dim_repr(dim: Option<&Unit>) -> String {
    match dim {
        Some(unit) if unit.is_truthy() => match &unit.kind {
            UnitKind::Expression(inner) => inner.to_string(),
            _ => unit.to_string(),
        },
        _ => "1".to_owned(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// The function is being checked and has no return annotation yet.
    Recursive,
    /// Unannotated parameters force a re-check at every call site.
    Parameters,
}

#[derive(Debug, Clone, Default)]
pub struct FunctionSig {
    pub params: Vec<Type>,
    pub param_names: Vec<String>,
    pub param_addrs: Vec<String>,
    /// Types of the optional parameters' defaults, in declaration order.
    pub param_defaults: Vec<Type>,
    pub return_type: Type,
    /// `(required, total)` positional argument counts.
    pub arity: (usize, usize),
    pub unresolved: Option<Unresolved>,
    pub name: Option<String>,
    pub loc: Location,
    /// The function's own node, for recursion detection and body re-checks.
    pub node: Option<Link>,
    /// Snapshot of the defining scope's name map, merged back in on
    /// re-check so lexical scoping survives currying.
    pub curried: AHashMap<String, String>,
}

impl Default for Type {
    fn default() -> Self {
        Self::any()
    }
}

impl PartialEq for FunctionSig {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
            && self.param_names == other.param_names
            && self.return_type == other.return_type
            && self.arity == other.arity
            && self.unresolved == other.unresolved
    }
}

impl FunctionSig {
    pub fn builtin(name: &str, params: Vec<Type>, param_names: &[&str], return_type: Type) -> Self {
        let arity = (params.len(), params.len());
        Self {
            params,
            param_names: param_names.iter().map(|&n| n.to_owned()).collect(),
            param_addrs: param_names
                .iter()
                .map(|&n| format!("{n}-{}", uuid::Uuid::new_v4()))
                .collect(),
            param_defaults: Vec::new(),
            return_type,
            arity,
            unresolved: None,
            name: Some(name.to_owned()),
            loc: Location::default(),
            node: None,
            curried: AHashMap::new(),
        }
    }

    /// An anonymous signature used in method tables: types only.
    pub fn of(params: Vec<Type>, return_type: Type) -> Self {
        let arity = (params.len(), params.len());
        Self { params, return_type, arity, ..Self::default() }
    }

    /// Matches argument types against the parameters, completing generic
    /// variables through `varenv` (cleared per attempt). On success returns
    /// the signature with its return type concretised.
    pub fn check_args(&self, varenv: &mut VarEnv, args: &[Type]) -> Option<Self> {
        varenv.clear();
        let params: Vec<Type> = self
            .params
            .iter()
            .zip(args)
            .map(|(param, arg)| {
                if matches!(param.kind, TypeKind::Any { .. }) {
                    Type::never()
                } else {
                    param.complete(varenv, Some(arg))
                }
            })
            .collect();

        if args.len() == self.params.len()
            && params.iter().zip(args).all(|(p, a)| unify(p, a).is_some())
        {
            let mut resolved = self.clone();
            resolved.return_type = self.return_type.complete(varenv, None);
            return Some(resolved);
        }
        None
    }
}

/// Binding environment for generic variables, owned by the typechecker and
/// cleared before each overload attempt.
#[derive(Debug, Default)]
pub struct VarEnv {
    types: AHashMap<String, Type>,
}

impl VarEnv {
    pub fn clear(&mut self) {
        self.types.clear();
    }

    pub fn get(&self, name: &str) -> Option<Type> {
        self.types.get(name).cloned()
    }

    pub fn bind(&mut self, name: &str, value: Type) {
        self.types.entry(name.to_owned()).or_insert(value);
    }
}

/// Structural unification. `Never` unifies with anything (yielding the
/// other side); `Any` unifies with nothing; numbers unify on `Int`/`Float`;
/// containers and functions unify componentwise. Commutative only for the
/// non-`Never`, non-`Any` cases.
pub fn unify(a: &Type, b: &Type) -> Option<Type> {
    match (&a.kind, &b.kind) {
        (TypeKind::Never, _) => Some(b.clone()),
        (_, TypeKind::Never) => Some(a.clone()),
        (TypeKind::Any { .. }, _) | (_, TypeKind::Any { .. }) => None,
        (TypeKind::Number { typ: ta, .. }, TypeKind::Number { typ: tb, .. }) => {
            if ta == tb || a.meta.dimension_only || b.meta.dimension_only {
                Some(a.clone())
            } else {
                None
            }
        }
        (TypeKind::List { content: ca }, TypeKind::List { content: cb }) => {
            unify(ca, cb).map(Type::list)
        }
        (TypeKind::Function(fa), TypeKind::Function(fb)) => {
            if fa.arity != fb.arity {
                return None;
            }
            let pairs = fa
                .params
                .iter()
                .chain([&fa.return_type])
                .zip(fb.params.iter().chain([&fb.return_type]));
            for (x, y) in pairs {
                if unify(x, y).is_none() || !dimcheck(x, y) {
                    return None;
                }
            }
            Some(a.clone())
        }
        _ => (a.to_string() == b.to_string()).then(|| a.clone()),
    }
}

/// Dimensional compatibility: passes when either side is `Never`/`Any`,
/// either dimension is unconstrained, or both are equal (as multisets).
pub fn dimcheck(a: &Type, b: &Type) -> bool {
    if a.is(&["Never", "Any"]) || b.is(&["Never", "Any"]) {
        return true;
    }
    match (a.dim(), b.dim()) {
        (Some(da), Some(db)) => da == db,
        _ => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    Type,
    Dimension,
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Type => "type",
            Self::Dimension => "dimension",
        })
    }
}

/// A failed compatibility check, with rendered sides for diagnostics.
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub kind: MismatchKind,
    pub left: String,
    pub right: String,
}

/// The conjunction of [`unify`] and [`dimcheck`]; `Err` carries which of
/// the two failed first.
pub fn nomismatch(a: &Type, b: &Type) -> Result<(), Mismatch> {
    if unify(a, b).is_none() {
        return Err(Mismatch {
            kind: MismatchKind::Type,
            left: a.to_string(),
            right: b.to_string(),
        });
    }
    if !dimcheck(a, b) {
        return Err(Mismatch {
            kind: MismatchKind::Dimension,
            left: dim_repr(a.dim()),
            right: dim_repr(b.dim()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;

    fn dim(name: &str) -> Unit {
        Unit::expression(Unit::identifier(name, Location::default()))
    }

    #[test]
    fn never_unifies_with_everything() {
        for t in [Type::int(), Type::new(TypeKind::Str), Type::list(Type::int())] {
            assert_eq!(unify(&Type::never(), &t).unwrap(), t);
            assert_eq!(unify(&t, &Type::never()).unwrap(), t);
        }
    }

    #[test]
    fn any_unifies_with_nothing() {
        assert!(unify(&Type::any(), &Type::int()).is_none());
        assert!(unify(&Type::int(), &Type::any()).is_none());
    }

    #[test]
    fn numbers_unify_on_typ() {
        assert!(unify(&Type::int(), &Type::int()).is_some());
        assert!(unify(&Type::int(), &Type::float()).is_none());
        let mut relaxed = Type::float();
        relaxed.meta.dimension_only = true;
        assert!(unify(&Type::int(), &relaxed).is_some());
    }

    #[test]
    fn dimcheck_is_symmetric_and_reflexive() {
        let m = Type::number(NumTyp::Float, Some(dim("m")));
        let s = Type::number(NumTyp::Float, Some(dim("s")));
        let free = Type::float();
        assert!(dimcheck(&m, &m));
        assert!(!dimcheck(&m, &s));
        assert!(!dimcheck(&s, &m));
        assert!(dimcheck(&m, &free));
        assert!(dimcheck(&free, &m));
        assert!(dimcheck(&Type::never(), &m));
        assert!(dimcheck(&m, &Type::any()));
    }

    #[test]
    fn list_unification_goes_through_content() {
        let a = Type::list(Type::int());
        let b = Type::list(Type::never());
        assert_eq!(unify(&a, &b).unwrap(), Type::list(Type::int()));
        assert!(unify(&Type::list(Type::int()), &Type::list(Type::new(TypeKind::Str))).is_none());
    }

    #[test]
    fn generic_variables_complete_through_varenv() {
        let mut varenv = VarEnv::default();
        let sig = FunctionSig::of(
            vec![Type::list(Type::var("T")), Type::int()],
            Type::var("T"),
        );
        let resolved = sig
            .check_args(&mut varenv, &[Type::list(Type::new(TypeKind::Str)), Type::int()])
            .unwrap();
        assert_eq!(resolved.return_type.kind, TypeKind::Str);
    }

    #[test]
    fn check_args_rejects_wrong_arity_and_types() {
        let mut varenv = VarEnv::default();
        let sig = FunctionSig::of(vec![Type::int()], Type::int());
        assert!(sig.check_args(&mut varenv, &[]).is_none());
        assert!(sig.check_args(&mut varenv, &[Type::new(TypeKind::Str)]).is_none());
        assert!(sig.check_args(&mut varenv, &[Type::int()]).is_some());
    }

    #[test]
    fn mismatch_reports_dimensions() {
        let m = Type::number(NumTyp::Float, Some(dim("m")));
        let s = Type::number(NumTyp::Float, Some(dim("s")));
        let err = nomismatch(&m, &s).unwrap_err();
        assert_eq!(err.kind, MismatchKind::Dimension);
        assert_eq!(err.left, "m");
        assert_eq!(err.right, "s");
    }
}
