//! Symbolic inversion of conversion expressions.
//!
//! Given a forward expression `y = f(_)`, inversion rearranges it into
//! `_ = g(y)` by peeling one operation per step off the path that contains
//! the placeholder. Subtrees without the placeholder are treated as
//! constants. Exactly one placeholder occurrence is assumed along the
//! inverted path.

use rust_decimal::Decimal;

use crate::{
    algebra::{contains_var, to_x},
    location::Location,
    unit::{Unit, UnitArg, UnitKind},
};

/// Inverts `f(_) = y` into `_ = g(y)`, with `x` naming the runtime input.
#[must_use]
pub fn invert(node: &Unit) -> Unit {
    let inner = match &node.kind {
        UnitKind::Expression(value) => value,
        _ => node,
    };
    let target = Unit::identifier("x", Location::default());
    Unit::expression(invert_step(inner, target))
}

fn invert_step(node: &Unit, target: Unit) -> Unit {
    match &node.kind {
        UnitKind::Identifier(name) if name == "_" => target,

        UnitKind::Product(values) | UnitKind::Sum(values) => {
            let Some(var_index) = values.iter().position(contains_var) else {
                return node.clone();
            };
            let var_node = &values[var_index];
            let others: Vec<Unit> = values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != var_index)
                .map(|(_, value)| value.clone())
                .collect();

            let is_product = matches!(node.kind, UnitKind::Product(_));
            let operand = match others.len() {
                1 => others.into_iter().next().unwrap_or_else(Unit::one),
                _ if is_product => Unit::product(others),
                _ => Unit::sum(others),
            };
            let operand = to_x(&operand);

            let new_target = if is_product {
                // y = _ * a  =>  _ = y * a^-1
                Unit::product(vec![target, Unit::power(operand, Unit::scalar(-Decimal::ONE))])
            } else {
                // y = _ + a  =>  _ = y - a
                Unit::sum(vec![target, Unit::neg(operand)])
            };
            invert_step(var_node, new_target)
        }

        UnitKind::Power { base, exponent } => {
            if contains_var(base) {
                // y = _ ^ a  =>  _ = y ^ (1/a)
                let new_target = Unit::power(
                    target,
                    Unit::power((**exponent).clone(), Unit::scalar(-Decimal::ONE)),
                );
                invert_step(base, new_target)
            } else {
                // y = a ^ _  =>  _ = logn(a, y)
                let log_call = Unit::new(
                    UnitKind::Call {
                        callee: Box::new(Unit::identifier("logn", Location::default())),
                        args: vec![
                            UnitArg { name: None, value: (**base).clone() },
                            UnitArg { name: None, value: target },
                        ],
                    },
                    node.loc.clone(),
                );
                invert_step(exponent, log_call)
            }
        }

        UnitKind::Neg(value) => invert_step(value, Unit::neg(target)),
        UnitKind::Expression(value) => invert_step(value, target),

        _ => node.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{algebra::Simplifier, errors::ModuleMeta};
    use pretty_assertions::assert_eq;

    fn ident(name: &str) -> Unit {
        Unit::identifier(name, Location::default())
    }

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    #[test]
    fn inverts_pure_scaling() {
        // y = _ * 1000  =>  _ = x * 1000^-1
        let forward = Unit::product(vec![ident("_"), Unit::scalar(dec(1000))]);
        let inverse = invert(&forward).unwrap_expression();
        let expected = Unit::product(vec![
            ident("x"),
            Unit::power(Unit::scalar(dec(1000)), Unit::scalar(dec(-1))),
        ]);
        assert_eq!(inverse, expected);
    }

    #[test]
    fn inverts_affine_expression() {
        // y = _ + 32  =>  _ = x - 32
        let forward = Unit::sum(vec![ident("_"), Unit::scalar(dec(32))]);
        let inverse = invert(&forward).unwrap_expression();
        let expected = Unit::sum(vec![ident("x"), Unit::neg(Unit::scalar(dec(32)))]);
        assert_eq!(inverse, expected);
    }

    #[test]
    fn inverts_power_base() {
        // y = _ ^ 2  =>  _ = x ^ (2^-1)
        let forward = Unit::power(ident("_"), Unit::scalar(dec(2)));
        let inverse = invert(&forward).unwrap_expression();
        let expected = Unit::power(
            ident("x"),
            Unit::power(Unit::scalar(dec(2)), Unit::scalar(dec(-1))),
        );
        assert_eq!(inverse, expected);
    }

    #[test]
    fn inverts_exponent_via_logarithm() {
        // y = 10 ^ _  =>  _ = logn(10, x)
        let forward = Unit::power(Unit::scalar(dec(10)), ident("_"));
        let inverse = invert(&forward).unwrap_expression();
        let UnitKind::Call { callee, args } = &inverse.kind else {
            panic!("expected a call, got {inverse}");
        };
        assert_eq!(callee.to_string(), "logn");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].value, Unit::scalar(dec(10)));
        assert_eq!(args[1].value, ident("x"));
    }

    #[test]
    fn forward_and_inverse_compose_to_identity() {
        // simplify(inverse ∘ forward) == x for a linear conversion
        let simplifier = Simplifier::new(ModuleMeta::new("<test>", ""));
        let forward = Unit::product(vec![ident("_"), Unit::scalar(dec(1000))]);
        let inverse = invert(&forward).unwrap_expression();

        // substitute the forward expression (with _ renamed x) for the
        // inverse's input
        let composed = substitute(&inverse, &to_x(&forward));
        let simplified = simplifier.simplify(&composed, true).unwrap().unwrap_expression();
        assert_eq!(simplified, ident("x"));
    }

    fn substitute(node: &Unit, replacement: &Unit) -> Unit {
        let kind = match &node.kind {
            UnitKind::Identifier(name) if name == "x" => return replacement.clone(),
            UnitKind::Product(values) => {
                UnitKind::Product(values.iter().map(|v| substitute(v, replacement)).collect())
            }
            UnitKind::Sum(values) => {
                UnitKind::Sum(values.iter().map(|v| substitute(v, replacement)).collect())
            }
            UnitKind::Power { base, exponent } => UnitKind::Power {
                base: Box::new(substitute(base, replacement)),
                exponent: Box::new(substitute(exponent, replacement)),
            },
            UnitKind::Neg(value) => UnitKind::Neg(Box::new(substitute(value, replacement))),
            UnitKind::Expression(value) => {
                UnitKind::Expression(Box::new(substitute(value, replacement)))
            }
            other => other.clone(),
        };
        Unit::new(kind, node.loc.clone())
    }
}
