//! Unit and dimension expression nodes.
//!
//! Algebraic expressions over unit identifiers are represented as trees.
//! Equality on [`UnitKind::Product`] and [`UnitKind::Sum`] is multiset
//! equality over the children; this is the semantic basis for dimension
//! compatibility throughout the compiler.

use std::fmt;

use rust_decimal::Decimal;

use crate::location::Location;

/// An identifier with its source span. Equality ignores the span.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    pub name: String,
    pub loc: Location,
}

impl Ident {
    pub fn new(name: impl Into<String>, loc: Location) -> Self {
        Self { name: name.into(), loc }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An exact decimal scalar, optionally annotated with a unit expression.
///
/// `placeholder` marks the scalar as standing in for the conversion input
/// (`_`); it does not participate in equality.
#[derive(Debug, Clone, Hash)]
pub struct Scalar {
    pub value: Decimal,
    pub unit: Option<Box<Unit>>,
    pub placeholder: bool,
}

impl Scalar {
    pub fn new(value: Decimal) -> Self {
        Self { value, unit: None, placeholder: false }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.unit == other.unit
    }
}

/// A named argument in a call emitted by inversion (`logn(base, x)`).
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct UnitArg {
    pub name: Option<Ident>,
    pub value: Unit,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub enum UnitKind {
    Scalar(Scalar),
    Identifier(String),
    /// Reference to a unit parameter (`@p`).
    Constant(String),
    Product(Vec<Unit>),
    Sum(Vec<Unit>),
    Power { base: Box<Unit>, exponent: Box<Unit> },
    Neg(Box<Unit>),
    Call { callee: Box<Unit>, args: Vec<UnitArg> },
    /// Outer wrapper carrying the overall span of a parsed expression.
    Expression(Box<Unit>),
    /// The multiplicative identity, produced by cancellation. Falsy.
    One,
}

#[derive(Debug, Clone, Hash)]
pub struct Unit {
    pub kind: UnitKind,
    pub loc: Location,
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (UnitKind::Product(a), UnitKind::Product(b)) | (UnitKind::Sum(a), UnitKind::Sum(b)) => {
                multiset_eq(a, b)
            }
            (a, b) => a == b,
        }
    }
}

/// Order-insensitive equality with multiplicity.
fn multiset_eq(a: &[Unit], b: &[Unit]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    'outer: for item in a {
        for (i, candidate) in b.iter().enumerate() {
            if !used[i] && item == candidate {
                used[i] = true;
                continue 'outer;
            }
        }
        return false;
    }
    true
}

impl Unit {
    pub fn new(kind: UnitKind, loc: Location) -> Self {
        Self { kind, loc }
    }

    pub fn one() -> Self {
        Self::new(UnitKind::One, Location::default())
    }

    pub fn scalar(value: Decimal) -> Self {
        Self::new(UnitKind::Scalar(Scalar::new(value)), Location::default())
    }

    pub fn identifier(name: impl Into<String>, loc: Location) -> Self {
        Self::new(UnitKind::Identifier(name.into()), loc)
    }

    pub fn product(values: Vec<Self>) -> Self {
        let loc = span_of(&values);
        Self::new(UnitKind::Product(values), loc)
    }

    pub fn sum(values: Vec<Self>) -> Self {
        let loc = span_of(&values);
        Self::new(UnitKind::Sum(values), loc)
    }

    pub fn power(base: Self, exponent: Self) -> Self {
        let loc = base.loc.merge(&exponent.loc);
        Self::new(
            UnitKind::Power { base: Box::new(base), exponent: Box::new(exponent) },
            loc,
        )
    }

    pub fn neg(value: Self) -> Self {
        let loc = value.loc.clone();
        Self::new(UnitKind::Neg(Box::new(value)), loc)
    }

    pub fn expression(value: Self) -> Self {
        let loc = value.loc.clone();
        Self::new(UnitKind::Expression(Box::new(value)), loc)
    }

    /// Wraps into an [`UnitKind::Expression`] unless the node already is one
    /// (or is `One`).
    #[must_use]
    pub fn into_expression(self) -> Self {
        match self.kind {
            UnitKind::Expression(_) | UnitKind::One => self,
            _ => Self::expression(self),
        }
    }

    /// Unwraps one [`UnitKind::Expression`] layer.
    #[must_use]
    pub fn unwrap_expression(self) -> Self {
        match self.kind {
            UnitKind::Expression(inner) => *inner,
            _ => self,
        }
    }

    pub fn is_one(&self) -> bool {
        matches!(self.kind, UnitKind::One)
    }

    /// Boolean value of a node: `One` is falsy, wrappers and n-ary nodes
    /// delegate to their children, everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match &self.kind {
            UnitKind::One => false,
            UnitKind::Expression(value) => value.is_truthy(),
            UnitKind::Product(values) | UnitKind::Sum(values) => {
                values.iter().any(Self::is_truthy)
            }
            _ => true,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match &self.kind {
            UnitKind::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }
}

fn span_of(values: &[Unit]) -> Location {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) => first.loc.merge(&last.loc),
        _ => Location::default(),
    }
}

fn fmt_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            UnitKind::Scalar(scalar) => {
                write!(f, "{}", fmt_decimal(scalar.value))?;
                if let Some(unit) = &scalar.unit {
                    write!(f, " {unit}")?;
                }
                Ok(())
            }
            UnitKind::Identifier(name) => f.write_str(name),
            UnitKind::Constant(name) => write!(f, "@{name}"),
            UnitKind::Product(values) => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" * ")?;
                    }
                    if matches!(value.kind, UnitKind::Sum(_)) {
                        write!(f, "({value})")?;
                    } else {
                        write!(f, "{value}")?;
                    }
                }
                Ok(())
            }
            UnitKind::Sum(values) => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" + ")?;
                    }
                    if matches!(value.kind, UnitKind::Product(_)) {
                        write!(f, "({value})")?;
                    } else {
                        write!(f, "{value}")?;
                    }
                }
                Ok(())
            }
            UnitKind::Power { base, exponent } => {
                match base.kind {
                    UnitKind::Scalar(_) | UnitKind::Identifier(_) => write!(f, "{base}^")?,
                    _ => write!(f, "({base})^")?,
                }
                match exponent.kind {
                    UnitKind::Scalar(_) | UnitKind::Identifier(_) => write!(f, "{exponent}"),
                    _ => write!(f, "({exponent})"),
                }
            }
            UnitKind::Neg(value) => match value.kind {
                UnitKind::Scalar(_) => write!(f, "-{value}"),
                _ => write!(f, "-({value})"),
            },
            UnitKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if let Some(name) = &arg.name {
                        write!(f, "{name}=")?;
                    }
                    write!(f, "{}", arg.value)?;
                }
                f.write_str(")")
            }
            UnitKind::Expression(value) => write!(f, "{value}"),
            UnitKind::One => f.write_str("1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn ident(name: &str) -> Unit {
        Unit::identifier(name, Location::default())
    }

    #[test]
    fn product_equality_is_multiset() {
        let a = Unit::product(vec![ident("m"), ident("s"), ident("m")]);
        let b = Unit::product(vec![ident("s"), ident("m"), ident("m")]);
        let c = Unit::product(vec![ident("s"), ident("s"), ident("m")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn sum_equality_is_multiset() {
        let a = Unit::sum(vec![ident("m"), Unit::scalar(Decimal::ONE)]);
        let b = Unit::sum(vec![Unit::scalar(Decimal::ONE), ident("m")]);
        assert_eq!(a, b);
    }

    #[test]
    fn scalar_equality_ignores_placeholder() {
        let mut a = Scalar::new(Decimal::TWO);
        a.placeholder = true;
        assert_eq!(a, Scalar::new(Decimal::TWO));
    }

    #[test]
    fn one_is_falsy() {
        assert!(!Unit::one().is_truthy());
        assert!(!Unit::product(vec![Unit::one()]).is_truthy());
        assert!(ident("m").is_truthy());
    }

    #[test]
    fn display_parenthesizes_sums_in_products() {
        let unit = Unit::product(vec![ident("a"), Unit::sum(vec![ident("b"), ident("c")])]);
        assert_eq!(unit.to_string(), "a * (b + c)");
    }
}
