//! Normalization of unit expressions.
//!
//! The simplifier rewrites a tree into a normal form: nested products and
//! sums are flattened, scalar factors folded, like bases merged into a
//! single power, and like sum terms merged by coefficient. Invariants after
//! simplification: no `Power` with exponent 0 or 1, no `Scalar(1)` inside a
//! product, no `Scalar(0)` inside a sum.

use std::rc::Rc;

use rust_decimal::{Decimal, MathematicalOps};

use crate::{
    algebra::cancel,
    errors::{Errors, ModuleMeta, Result},
    unit::{Scalar, Unit, UnitKind},
};

pub struct Simplifier {
    errors: Errors,
}

impl Simplifier {
    pub fn new(module: Rc<ModuleMeta>) -> Self {
        Self { errors: Errors::new(module) }
    }

    /// Fully simplifies a node, optionally cancelling neutral elements, and
    /// wraps the result as an `Expression` (or `One`).
    pub fn simplify(&self, node: &Unit, do_cancel: bool) -> Result<Unit> {
        let mut result = self.simplify_node(node)?;
        if do_cancel {
            result = cancel(&result);
        }
        Ok(result.into_expression())
    }

    fn simplify_node(&self, node: &Unit) -> Result<Unit> {
        match &node.kind {
            UnitKind::Expression(value) => self.simplify_node(value),
            UnitKind::Call { .. } => self.call(node),
            UnitKind::Neg(_) => self.neg(node),
            UnitKind::Power { .. } => self.power(node),
            UnitKind::Product(_) => self.product(node),
            UnitKind::Sum(_) => self.sum(node),
            _ => Ok(node.clone()),
        }
    }

    fn call(&self, node: &Unit) -> Result<Unit> {
        let UnitKind::Call { callee, args } = &node.kind else { unreachable!() };
        let args = args
            .iter()
            .map(|arg| {
                Ok(crate::unit::UnitArg {
                    name: arg.name.clone(),
                    value: self.simplify_node(&arg.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Unit::new(
            UnitKind::Call { callee: callee.clone(), args },
            node.loc.clone(),
        ))
    }

    fn neg(&self, node: &Unit) -> Result<Unit> {
        let UnitKind::Neg(value) = &node.kind else { unreachable!() };
        let value = self.simplify_node(value)?;
        Ok(match &value.kind {
            UnitKind::One => Unit::new(
                UnitKind::Scalar(Scalar::new(-Decimal::ONE)),
                node.loc.clone(),
            ),
            UnitKind::Scalar(scalar) => Unit::new(
                UnitKind::Scalar(Scalar::new(-scalar.value)),
                node.loc.clone(),
            ),
            _ => Unit::neg(value),
        })
    }

    fn power(&self, node: &Unit) -> Result<Unit> {
        let UnitKind::Power { base, exponent } = &node.kind else { unreachable!() };
        let base = self.simplify_node(base)?;
        let exponent = self.simplify_node(exponent)?;

        if let Some(scalar) = exponent.as_scalar() {
            if scalar.value.is_zero() {
                return Ok(Unit::scalar(Decimal::ONE));
            }
            if scalar.value == Decimal::ONE {
                return Ok(base);
            }
        }

        match (&base.kind, exponent.as_scalar()) {
            (UnitKind::One, _) => Ok(Unit::scalar(Decimal::ONE)),
            (UnitKind::Scalar(b), Some(e)) => Ok(Unit::scalar(decimal_pow(b.value, e.value))),
            // (x^a)^b -> x^(a*b)
            (UnitKind::Power { base: inner_base, exponent: inner_exp }, _) => {
                let merged =
                    self.simplify_node(&Unit::product(vec![(**inner_exp).clone(), exponent]))?;
                Ok(Unit::power((**inner_base).clone(), merged))
            }
            // (a*b)^n -> a^n * b^n
            (UnitKind::Product(values), _) => {
                let distributed = values
                    .iter()
                    .map(|value| Unit::power(value.clone(), exponent.clone()))
                    .collect();
                self.simplify_node(&Unit::product(distributed))
            }
            _ => Ok(Unit::power(base, exponent)),
        }
    }

    /// Flattens same-kind children and drops `One`s, simplifying each child.
    fn flatten(&self, values: &[Unit], product: bool) -> Result<Vec<Unit>> {
        let mut flat = Vec::with_capacity(values.len());
        for value in values {
            let simplified = self.simplify_node(value)?;
            match simplified.kind {
                UnitKind::Product(children) if product => flat.extend(children),
                UnitKind::Sum(children) if !product => flat.extend(children),
                UnitKind::One => {}
                _ => flat.push(simplified),
            }
        }
        Ok(flat)
    }

    fn finalize(values: Vec<Unit>, product: bool, identity: Decimal) -> Unit {
        match values.len() {
            0 => Unit::scalar(identity),
            1 => values.into_iter().next().unwrap_or_else(Unit::one),
            _ if product => Unit::product(values),
            _ => Unit::sum(values),
        }
    }

    fn product(&self, node: &Unit) -> Result<Unit> {
        let UnitKind::Product(values) = &node.kind else { unreachable!() };
        let terms = self.flatten(values, true)?;

        let mut scalar_acc = Decimal::ONE;
        // base -> accumulated exponents, in first-seen order
        let mut groups: Vec<(Unit, Vec<Unit>)> = Vec::new();

        for term in terms {
            match term.kind {
                UnitKind::Scalar(ref scalar) => {
                    scalar_acc *= scalar.value;
                }
                UnitKind::Power { base, exponent } => {
                    push_group(&mut groups, *base, *exponent);
                }
                _ => {
                    let one = Unit::scalar(Decimal::ONE);
                    push_group(&mut groups, term, one);
                }
            }
        }

        let mut result = Vec::new();
        if scalar_acc != Decimal::ONE {
            result.push(Unit::scalar(scalar_acc));
        }

        for (base, exponents) in groups {
            let total = if exponents.len() > 1 {
                self.sum(&Unit::sum(exponents))?
            } else {
                exponents.into_iter().next().unwrap_or_else(Unit::one)
            };

            if let Some(scalar) = total.as_scalar() {
                if scalar.value.is_zero() {
                    continue;
                }
                if scalar.value == Decimal::ONE {
                    result.push(base);
                    continue;
                }
            }
            result.push(Unit::power(base, total));
        }

        Ok(Self::finalize(result, true, Decimal::ONE))
    }

    fn sum(&self, node: &Unit) -> Result<Unit> {
        let UnitKind::Sum(values) = &node.kind else { unreachable!() };
        let terms = self.flatten(values, false)?;

        let mut scalar_acc = Decimal::ZERO;
        // base -> accumulated coefficient, in first-seen order
        let mut groups: Vec<(Unit, Decimal)> = Vec::new();
        // the single dimension every non-scalar term must share
        let mut ref_base: Option<Unit> = None;

        for term in terms {
            if let UnitKind::Scalar(scalar) = &term.kind {
                if scalar.unit.is_none() {
                    scalar_acc += scalar.value;
                    continue;
                }
            }

            let loc = term.loc.clone();
            let (coeff, base) = decompose(term);

            if base.is_one() {
                scalar_acc += coeff;
                continue;
            }

            match &ref_base {
                None => ref_base = Some(base.clone()),
                Some(reference) if *reference != base => {
                    return self.errors.throw(543, Some(loc)).fail();
                }
                Some(_) => {}
            }

            match groups.iter_mut().find(|(existing, _)| *existing == base) {
                Some((_, total)) => *total += coeff,
                None => groups.push((base, coeff)),
            }
        }

        let mut result = Vec::new();
        if scalar_acc != Decimal::ZERO {
            result.push(Unit::scalar(scalar_acc));
        }

        for (base, coeff) in groups {
            if coeff.is_zero() {
                continue;
            }
            if coeff == Decimal::ONE {
                result.push(base);
                continue;
            }
            // 3 * x -> Product([3, x]); a product base is spliced in place
            let mut factors = vec![Unit::scalar(coeff)];
            match base.kind {
                UnitKind::Product(children) => factors.extend(children),
                _ => factors.push(base),
            }
            result.push(Unit::product(factors));
        }

        Ok(Self::finalize(result, false, Decimal::ZERO))
    }
}

fn push_group(groups: &mut Vec<(Unit, Vec<Unit>)>, base: Unit, exponent: Unit) {
    match groups.iter_mut().find(|(existing, _)| *existing == base) {
        Some((_, exponents)) => exponents.push(exponent),
        None => groups.push((base, vec![exponent])),
    }
}

/// Splits a term into `(coefficient, base)`, e.g. `2 * x` -> `(2, x)`.
fn decompose(node: Unit) -> (Decimal, Unit) {
    if let UnitKind::Product(values) = node.kind {
        let (scalars, others): (Vec<Unit>, Vec<Unit>) = values
            .into_iter()
            .partition(|value| matches!(&value.kind, UnitKind::Scalar(_)));

        if !scalars.is_empty() {
            let coeff = scalars
                .iter()
                .filter_map(Unit::as_scalar)
                .fold(Decimal::ONE, |acc, scalar| acc * scalar.value);
            let base = match others.len() {
                0 => Unit::one(),
                1 => others.into_iter().next().unwrap_or_else(Unit::one),
                _ => Unit::product(others),
            };
            return (coeff, base);
        }
        return (Decimal::ONE, Unit::product(scalars.into_iter().chain(others).collect()));
    }
    (Decimal::ONE, node)
}

/// Exact power for integral exponents, approximate for fractional ones.
fn decimal_pow(base: Decimal, exponent: Decimal) -> Decimal {
    let normalized = exponent.normalize();
    if normalized.scale() == 0 {
        if let Ok(exp) = i64::try_from(normalized.mantissa()) {
            return base.powi(exp);
        }
    }
    base.powd(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Location;
    use pretty_assertions::assert_eq;

    fn simplifier() -> Simplifier {
        Simplifier::new(ModuleMeta::new("<test>", ""))
    }

    fn ident(name: &str) -> Unit {
        Unit::identifier(name, Location::default())
    }

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    #[test]
    fn merges_like_bases() {
        // m * m * s -> m^2 * s
        let node = Unit::product(vec![ident("m"), ident("m"), ident("s")]);
        let simplified = simplifier().simplify(&node, true).unwrap().unwrap_expression();
        let expected = Unit::product(vec![
            Unit::power(ident("m"), Unit::scalar(dec(2))),
            ident("s"),
        ]);
        assert_eq!(simplified, expected);
    }

    #[test]
    fn cancels_inverse_exponents() {
        // m * m^-1 -> 1
        let node = Unit::product(vec![
            ident("m"),
            Unit::power(ident("m"), Unit::scalar(dec(-1))),
        ]);
        let simplified = simplifier().simplify(&node, true).unwrap();
        assert!(simplified.is_one());
    }

    #[test]
    fn folds_scalars_into_accumulator() {
        // 2 * m * 3 -> 6 * m
        let node = Unit::product(vec![Unit::scalar(dec(2)), ident("m"), Unit::scalar(dec(3))]);
        let simplified = simplifier().simplify(&node, false).unwrap().unwrap_expression();
        assert_eq!(simplified, Unit::product(vec![Unit::scalar(dec(6)), ident("m")]));
    }

    #[test]
    fn sum_groups_like_terms() {
        // m + m + 2 -> 2 + 2*m
        let node = Unit::sum(vec![ident("m"), ident("m"), Unit::scalar(dec(2))]);
        let simplified = simplifier().simplify(&node, false).unwrap().unwrap_expression();
        let expected = Unit::sum(vec![
            Unit::scalar(dec(2)),
            Unit::product(vec![Unit::scalar(dec(2)), ident("m")]),
        ]);
        assert_eq!(simplified, expected);
    }

    #[test]
    fn sum_of_distinct_bases_is_rejected() {
        let node = Unit::sum(vec![ident("m"), ident("s")]);
        let err = simplifier().simplify(&node, true).unwrap_err();
        assert_eq!(err.code, 543);
    }

    #[test]
    fn power_rules() {
        // (m^2)^3 -> m^6
        let node = Unit::power(Unit::power(ident("m"), Unit::scalar(dec(2))), Unit::scalar(dec(3)));
        let simplified = simplifier().simplify(&node, false).unwrap().unwrap_expression();
        assert_eq!(simplified, Unit::power(ident("m"), Unit::scalar(dec(6))));

        // (m*s)^2 -> m^2 * s^2
        let node = Unit::power(Unit::product(vec![ident("m"), ident("s")]), Unit::scalar(dec(2)));
        let simplified = simplifier().simplify(&node, false).unwrap().unwrap_expression();
        let expected = Unit::product(vec![
            Unit::power(ident("m"), Unit::scalar(dec(2))),
            Unit::power(ident("s"), Unit::scalar(dec(2))),
        ]);
        assert_eq!(simplified, expected);

        // x^0 -> 1, x^1 -> x
        let node = Unit::power(ident("x"), Unit::scalar(dec(0)));
        assert_eq!(
            simplifier().simplify(&node, false).unwrap().unwrap_expression(),
            Unit::scalar(dec(1))
        );
        let node = Unit::power(ident("x"), Unit::scalar(dec(1)));
        assert_eq!(simplifier().simplify(&node, false).unwrap().unwrap_expression(), ident("x"));
    }

    #[test]
    fn simplify_is_idempotent() {
        let nodes = [
            Unit::product(vec![ident("m"), ident("m"), Unit::scalar(dec(4))]),
            Unit::sum(vec![ident("m"), ident("m")]),
            Unit::power(Unit::product(vec![ident("a"), ident("b")]), Unit::scalar(dec(2))),
            Unit::neg(Unit::scalar(dec(3))),
        ];
        let simplifier = simplifier();
        for node in nodes {
            let once = simplifier.simplify(&node, true).unwrap();
            let twice = simplifier.simplify(&once, true).unwrap();
            assert_eq!(once, twice);
        }
    }
}
