//! Normal-form algebra over unit expressions: simplification, cancellation
//! of neutral elements and symbolic inversion.

mod invert;
mod simplify;

pub use invert::invert;
pub use simplify::Simplifier;

use crate::unit::{Scalar, Unit, UnitKind};

/// Removes neutral/empty subnodes; a node whose children all vanish becomes
/// `One`.
pub fn cancel(node: &Unit) -> Unit {
    cancel_inner(node).unwrap_or_else(Unit::one)
}

/// Recursively strips neutral elements; `None` when the node vanishes.
pub fn cancel_inner(node: &Unit) -> Option<Unit> {
    match &node.kind {
        UnitKind::Expression(value) => {
            let inner = cancel(value);
            inner.is_truthy().then(|| Unit::expression(inner))
        }
        UnitKind::Product(values) | UnitKind::Sum(values) => {
            let cancelled: Vec<Unit> = values.iter().map(cancel).filter(Unit::is_truthy).collect();
            match cancelled.len() {
                0 => None,
                1 => cancelled.into_iter().next(),
                _ => Some(match node.kind {
                    UnitKind::Product(_) => Unit::product(cancelled),
                    _ => Unit::sum(cancelled),
                }),
            }
        }
        UnitKind::Neg(value) => {
            let inner = cancel(value);
            inner.is_truthy().then(|| Unit::neg(inner))
        }
        UnitKind::Power { base, exponent } => {
            let inner = cancel(base);
            inner
                .is_truthy()
                .then(|| Unit::power(inner, (**exponent).clone()))
        }
        UnitKind::Scalar(scalar) => {
            let unit = scalar.unit.as_ref()?;
            Some(cancel(strip_expression(unit)))
        }
        _ => Some(node.clone()),
    }
}

fn strip_expression(node: &Unit) -> &Unit {
    match &node.kind {
        UnitKind::Expression(inner) => inner,
        _ => node,
    }
}

/// Whether the subtree mentions the conversion placeholder `_`.
pub fn contains_var(node: &Unit) -> bool {
    match &node.kind {
        UnitKind::Identifier(name) => name == "_",
        UnitKind::Product(values) | UnitKind::Sum(values) => values.iter().any(contains_var),
        UnitKind::Expression(value) | UnitKind::Neg(value) => contains_var(value),
        UnitKind::Power { base, exponent } => contains_var(base) || contains_var(exponent),
        _ => false,
    }
}

/// Whether the subtree contains a `Sum` anywhere.
pub fn contains_sum(node: &Unit) -> bool {
    match &node.kind {
        UnitKind::Sum(_) => true,
        UnitKind::Product(values) => values.iter().any(contains_sum),
        UnitKind::Expression(value) | UnitKind::Neg(value) => contains_sum(value),
        UnitKind::Power { base, exponent } => contains_sum(base) || contains_sum(exponent),
        _ => false,
    }
}

/// `_` may only appear at multiplicative positions. A sum nested below the
/// current node and a power's exponent both activate the check; an active
/// `_` makes the expression non-linear. Root-level sums are the caller's
/// business (see [`contains_sum`]).
pub fn is_linear(node: &Unit, active: bool) -> bool {
    match &node.kind {
        UnitKind::Expression(value) | UnitKind::Neg(value) => is_linear(value, active),
        UnitKind::Product(values) | UnitKind::Sum(values) => values
            .iter()
            .all(|value| is_linear(value, matches!(value.kind, UnitKind::Sum(_)) || active)),
        UnitKind::Power { base, exponent } => is_linear(base, active) && is_linear(exponent, true),
        UnitKind::Identifier(name) if name == "_" => !active,
        UnitKind::Scalar(Scalar { placeholder: true, .. }) => !active,
        _ => true,
    }
}

/// Renames the placeholder `_` to the runtime input variable `x`.
#[must_use]
pub fn to_x(node: &Unit) -> Unit {
    let kind = match &node.kind {
        UnitKind::Identifier(name) if name == "_" => UnitKind::Identifier("x".into()),
        UnitKind::Product(values) => UnitKind::Product(values.iter().map(to_x).collect()),
        UnitKind::Sum(values) => UnitKind::Sum(values.iter().map(to_x).collect()),
        UnitKind::Expression(value) => UnitKind::Expression(Box::new(to_x(value))),
        UnitKind::Neg(value) => UnitKind::Neg(Box::new(to_x(value))),
        UnitKind::Power { base, exponent } => UnitKind::Power {
            base: Box::new(to_x(base)),
            exponent: Box::new(to_x(exponent)),
        },
        other => other.clone(),
    };
    Unit::new(kind, node.loc.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;
    use rust_decimal::Decimal;

    fn ident(name: &str) -> Unit {
        Unit::identifier(name, Location::default())
    }

    #[test]
    fn cancel_of_one_is_one() {
        assert!(cancel(&Unit::one()).is_one());
    }

    #[test]
    fn cancel_strips_empty_and_singleton_products() {
        assert!(cancel(&Unit::product(vec![])).is_one());
        assert_eq!(cancel(&Unit::product(vec![ident("m")])), ident("m"));
        assert!(cancel(&Unit::product(vec![Unit::one(), Unit::one()])).is_one());
    }

    #[test]
    fn cancel_drops_scalars() {
        let node = Unit::product(vec![Unit::scalar(Decimal::TEN), ident("m")]);
        assert_eq!(cancel(&node), ident("m"));
    }

    #[test]
    fn linearity() {
        // _ * 1000 is linear
        let linear = Unit::product(vec![ident("_"), Unit::scalar(Decimal::ONE_THOUSAND)]);
        assert!(is_linear(&linear, false));
        // a nested sum activates: x * (_ + 32) is not linear
        let nested = Unit::product(vec![
            ident("y"),
            Unit::sum(vec![ident("_"), Unit::scalar(Decimal::from(32))]),
        ]);
        assert!(!is_linear(&nested, false));
        // 2 ^ _ is not
        let exponential = Unit::power(Unit::scalar(Decimal::TWO), ident("_"));
        assert!(!is_linear(&exponential, false));
        // _ ^ 2 is (the base is a multiplicative position)
        let squared = Unit::power(ident("_"), Unit::scalar(Decimal::TWO));
        assert!(is_linear(&squared, false));
        // with the check pre-activated any placeholder occurrence fails
        assert!(!is_linear(&linear, true));
    }

    #[test]
    fn to_x_renames_placeholder() {
        let node = Unit::product(vec![ident("_"), ident("m")]);
        assert_eq!(to_x(&node), Unit::product(vec![ident("x"), ident("m")]));
    }

    #[test]
    fn contains_sum_and_var() {
        let node = Unit::product(vec![ident("_"), Unit::sum(vec![ident("a"), ident("b")])]);
        assert!(contains_sum(&node));
        assert!(contains_var(&node));
        assert!(!contains_var(&ident("x")));
    }
}
