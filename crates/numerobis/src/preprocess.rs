//! Unit preprocessing: conversion expressions and literal rewriting.
//!
//! For every `unit` definition this pass builds the forward conversion
//! (`_ → value in base units`), its symbolic inverse (used at runtime to
//! convert back), and the base-identification expression. Units whose
//! forward is not a pure multiplicative factor (offsets, exponentials) are
//! collected in `logarithmic`. Finally, numeric literals with units are
//! rewritten to their base-unit value in the node table.

use std::rc::Rc;

use ahash::AHashSet;
use indexmap::IndexMap;
use rust_decimal::Decimal;

use crate::{
    algebra::{cancel, cancel_inner, contains_sum, invert, is_linear, to_x, Simplifier},
    ast::{AstNode, Header, NumberLit},
    env::{Namespaces, NsKind},
    errors::{Errors, ModuleMeta, Result},
    location::Location,
    unit::{Scalar, Unit, UnitKind},
};

/// The per-module output consumed by the emitter.
#[derive(Debug, Clone, Default)]
pub struct CompiledUnits {
    /// Forward conversion `_ → base value` per unit.
    pub units: IndexMap<String, Unit>,
    /// Inverse conversion `base value → _` per unit.
    pub inverted: IndexMap<String, Unit>,
    /// Base-identification expression per unit.
    pub bases: IndexMap<String, Unit>,
    /// Units whose forward is not a pure multiplicative factor.
    pub logarithmic: AHashSet<String>,
}

pub struct Preprocessor {
    errors: Errors,
    simplifier: Simplifier,
    /// Forward expressions resolved so far (seeded with imported units).
    units: IndexMap<String, Unit>,
}

impl Preprocessor {
    pub fn new(module: Rc<ModuleMeta>) -> Self {
        Self {
            errors: Errors::new(Rc::clone(&module)),
            simplifier: Simplifier::new(module),
            units: IndexMap::new(),
        }
    }

    /// Processes the header's unit definitions, then rewrites every unitful
    /// numeric literal in the node table to its base-unit value.
    pub fn run(&mut self, ns: &mut Namespaces, header: &Header) -> Result<CompiledUnits> {
        self.units = ns
            .units
            .iter()
            .map(|(name, expr)| (name.clone(), expr.clone()))
            .collect();

        let mut compiled = CompiledUnits::default();
        for def in &header.units {
            self.unit_def(ns, def, &mut compiled)?;
        }

        let literals: Vec<(u64, NumberLit, bool)> = ns
            .nodes
            .iter()
            .filter_map(|(link, node)| match node {
                AstNode::Integer(lit) => Some((*link, lit.clone(), false)),
                AstNode::Float(lit) => Some((*link, lit.clone(), true)),
                _ => None,
            })
            .collect();
        for (link, lit, is_float) in literals {
            if let Some(rewritten) = self.rewrite_literal(ns, &lit)? {
                let node = if is_float {
                    AstNode::Float(rewritten)
                } else {
                    AstNode::Integer(rewritten)
                };
                ns.nodes.insert(link, node);
            }
        }

        Ok(compiled)
    }

    fn unit_def(
        &mut self,
        ns: &mut Namespaces,
        def: &crate::ast::UnitDef,
        compiled: &mut CompiledUnits,
    ) -> Result<()> {
        let name = def.name.name.clone();
        let placeholder = Unit::identifier("_", Location::default());

        let mut expr = match def.value.as_ref().filter(|value| value.is_truthy()) {
            None => Unit::expression(placeholder.clone()),
            Some(value) => {
                let resolved = self.resolve(ns, value, &placeholder)?;
                let inner = resolved.clone().unwrap_expression();
                if is_linear(&inner, true) && !contains_sum(&inner) {
                    // a pure constant factor means "times the input":
                    // prepend the placeholder as a multiplicative factor
                    let prefixed = match inner.kind {
                        UnitKind::Product(mut values) => {
                            values.insert(0, placeholder.clone());
                            Unit::product(values)
                        }
                        _ => Unit::product(vec![placeholder.clone(), resolved.clone()]),
                    };
                    Unit::expression(prefixed)
                } else {
                    resolved
                }
            }
        };
        expr = self.resolve(ns, &expr, &placeholder)?;

        let mut inverted = invert(&self.simplifier.simplify(&expr, false)?);
        inverted = self.simplifier.simplify(&inverted, false)?;
        if inverted.is_one() {
            inverted = Unit::expression(Unit::identifier("x", Location::default()));
        }

        self.units.insert(name.clone(), expr.clone());
        ns.units.insert(name.clone(), expr.clone());

        let is_sum = contains_sum(&expr);
        let base = if is_sum {
            Unit::one()
        } else {
            match cancel_inner(&self.to_base(ns, &expr)) {
                None => Unit::one(),
                Some(base) => {
                    let simplified = self.simplifier.simplify(&base, true)?;
                    if simplified.is_truthy() {
                        invert(&simplified)
                    } else {
                        simplified
                    }
                }
            }
        };

        compiled.bases.insert(name.clone(), to_x(&base).into_expression());
        if !is_linear(&expr, false) || is_sum {
            compiled.logarithmic.insert(name.clone());
        }

        compiled.units.insert(name.clone(), expr);
        compiled.inverted.insert(name, inverted);
        Ok(())
    }

    /// A literal with a unit is shorthand for the literal multiplied by the
    /// unit's forward expression; the mantissa is replaced by the resolved
    /// base-unit value.
    fn rewrite_literal(&self, ns: &Namespaces, lit: &NumberLit) -> Result<Option<NumberLit>> {
        let Some(unit) = lit.unit.as_ref().filter(|unit| unit.is_truthy()) else {
            return Ok(None);
        };
        let value: Decimal = lit.value.parse().map_err(|_| {
            self.errors
                .throw(7, Some(lit.loc.clone()))
                .arg("token", &lit.value)
        })?;

        let scalar = Unit::new(
            UnitKind::Scalar(Scalar {
                value,
                unit: Some(Box::new(cancel(unit))),
                placeholder: false,
            }),
            lit.loc.clone(),
        );
        let placeholder = Unit::identifier("_", Location::default());
        let resolved = self.resolve(ns, &scalar, &placeholder)?;
        let number = self.simplifier.simplify(&resolved, false)?.unwrap_expression();

        let UnitKind::Scalar(scalar) = &number.kind else {
            // a logarithmic unit in literal position resolves through a sum
            // and stays a runtime conversion
            return Ok(None);
        };

        let mut rewritten = lit.clone();
        rewritten.value = scalar.value.normalize().to_string();
        // the value is in base units now; dropping the unit keeps a second
        // pass over merged node tables from scaling it again
        rewritten.unit = None;
        Ok(Some(rewritten))
    }

    fn resolve(&self, ns: &Namespaces, node: &Unit, n: &Unit) -> Result<Unit> {
        Ok(self.resolve_inner(ns, node, n)?.into_expression())
    }

    /// Substitutes unit references with their forward expressions and the
    /// placeholder `_` with `n`.
    fn resolve_inner(&self, ns: &Namespaces, node: &Unit, n: &Unit) -> Result<Unit> {
        match &node.kind {
            UnitKind::Neg(value) => Ok(Unit::new(
                UnitKind::Neg(Box::new(self.resolve_inner(ns, value, n)?)),
                node.loc.clone(),
            )),
            UnitKind::Expression(value) => self.resolve_inner(ns, value, n),
            UnitKind::Product(values) => {
                let resolved = values
                    .iter()
                    .map(|value| self.resolve_inner(ns, value, n))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Unit::product(resolved))
            }
            UnitKind::Sum(values) => {
                let resolved = values
                    .iter()
                    .map(|value| self.resolve_inner(ns, value, n))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Unit::sum(resolved))
            }
            UnitKind::Power { base, exponent } => {
                let base = self.resolve_inner(ns, base, n)?;
                let exponent = self.resolve_inner(ns, exponent, n)?;
                Ok(Unit::power(base, exponent))
            }
            UnitKind::Scalar(scalar) => {
                let Some(unit) = &scalar.unit else {
                    return Ok(node.clone());
                };
                let value = if scalar.placeholder {
                    n.clone()
                } else {
                    Unit::scalar(scalar.value)
                };
                let placeholder = Unit::identifier("_", Location::default());

                let base = match cancel_inner(&self.to_base(ns, unit)) {
                    Some(base) if base.is_truthy() => base,
                    _ => Unit::scalar(Decimal::ONE),
                };

                let mut resolved = self.resolve_inner(
                    ns,
                    &Unit::product(vec![
                        (**unit).clone(),
                        Unit::power(base, Unit::scalar(-Decimal::ONE)),
                    ]),
                    &placeholder,
                )?;

                let is_sum = contains_sum(&resolved);
                if is_sum {
                    resolved = self.resolve_inner(
                        ns,
                        &Unit::product(vec![(**unit).clone(), Unit::scalar(Decimal::ONE)]),
                        &placeholder,
                    )?;
                }

                resolved = self.simplifier.simplify(&resolved, false)?;

                if is_linear(&resolved, false) && !is_sum {
                    resolved = Unit::product(vec![placeholder, resolved]);
                }

                self.resolve_inner(ns, &resolved, &value)
            }
            UnitKind::Identifier(name) => {
                if name == "_" {
                    return Ok(n.clone());
                }
                let Some(forward) = self.units.get(name) else {
                    let suggestion = ns.suggest(NsKind::Units, name);
                    return self
                        .errors
                        .throw(602, Some(node.loc.clone()))
                        .arg("kind", "unit")
                        .arg("name", name)
                        .help_opt(suggestion.map(|s| format!("did you mean '{s}'?")))
                        .fail();
                };
                Ok(self.resolve_inner(ns, &forward.clone(), n)?.unwrap_expression())
            }
            _ => Ok(node.clone()),
        }
    }

    /// Walks an expression down to primitive units: derived units are
    /// substituted, primitives become `_` (dimensioned) or `1`
    /// (dimensionless), scalar factors are dropped.
    fn to_base(&self, ns: &Namespaces, node: &Unit) -> Unit {
        match &node.kind {
            UnitKind::Expression(value) => Unit::expression(self.to_base(ns, value)),
            UnitKind::Neg(value) => Unit::neg(self.to_base(ns, value)),
            UnitKind::Product(values) | UnitKind::Sum(values) => {
                let based: Vec<Unit> = values
                    .iter()
                    .map(|value| self.to_base(ns, value))
                    .filter(|value| !matches!(value.kind, UnitKind::Scalar(_)))
                    .collect();
                match node.kind {
                    UnitKind::Product(_) => Unit::product(based),
                    _ => Unit::sum(based),
                }
            }
            UnitKind::Power { base, exponent } => {
                Unit::power(self.to_base(ns, base), self.to_base(ns, exponent))
            }
            UnitKind::Identifier(name) => {
                let Some(forward) = self.units.get(name) else {
                    return node.clone();
                };
                let inner = forward.clone().unwrap_expression();
                if matches!(&inner.kind, UnitKind::Identifier(placeholder) if placeholder == "_") {
                    let dimensioned = ns
                        .dimensionized
                        .get(name)
                        .is_some_and(Unit::is_truthy);
                    if dimensioned {
                        return Unit::identifier("_", Location::default());
                    }
                    return Unit::scalar(Decimal::ONE);
                }
                self.to_base(ns, forward)
            }
            _ => node.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dimcheck::Dimchecker, lexer::lex, parser::parse};

    fn preprocess(source: &str) -> (Namespaces, CompiledUnits) {
        let module = ModuleMeta::new("<test>", source);
        let tokens = lex(source, Rc::clone(&module)).unwrap();
        let (ast, header) = parse(tokens, Rc::clone(&module)).unwrap();

        let mut ns = Namespaces::default();
        Dimchecker::new(Rc::clone(&module))
            .check_header(&mut ns, &header)
            .unwrap();
        crate::link::link(ast, &mut ns.nodes);

        let compiled = Preprocessor::new(module).run(&mut ns, &header).unwrap();
        (ns, compiled)
    }

    fn literal_values(ns: &Namespaces) -> Vec<String> {
        ns.nodes
            .values()
            .filter_map(|node| match node {
                AstNode::Integer(lit) | AstNode::Float(lit) => Some(lit.value.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn rewrites_literals_to_base_units() {
        let (ns, _) = preprocess("unit m\nunit km = 1000 m\nx = 5 km\n");
        assert_eq!(literal_values(&ns), vec!["5000".to_owned()]);
    }

    #[test]
    fn base_unit_literals_stay_put() {
        let (ns, _) = preprocess("unit m\nx = 5 m\n");
        assert_eq!(literal_values(&ns), vec!["5".to_owned()]);
    }

    #[test]
    fn chained_units_compose_factors() {
        let (ns, _) = preprocess("unit mm\nunit m = 1000 mm\nunit km = 1000 m\nx = 2 km\n");
        assert_eq!(literal_values(&ns), vec!["2000000".to_owned()]);
    }

    #[test]
    fn primitive_unit_forward_is_identity() {
        let (_, compiled) = preprocess("unit m\n");
        let forward = compiled.units["m"].clone().unwrap_expression();
        assert_eq!(forward, Unit::identifier("_", Location::default()));
        assert!(!compiled.logarithmic.contains("m"));
    }

    #[test]
    fn affine_units_are_logarithmic() {
        // a Fahrenheit-style definition contains a sum
        let (_, compiled) = preprocess("unit F = 5/9 * (_ - 32)\n");
        assert!(compiled.logarithmic.contains("F"));
        assert!(compiled.bases["F"].is_one());
    }

    #[test]
    fn inverse_of_scaling_unit_divides() {
        let (_, compiled) = preprocess("unit m\nunit km = 1000 m\n");
        let inverse = compiled.inverted["km"].clone().unwrap_expression();
        // x * 1000^-1, simplified to a multiplication by 0.001
        let rendered = inverse.to_string();
        assert!(rendered.contains('x'), "inverse should mention x: {rendered}");
        assert!(rendered.contains("0.001"), "inverse should scale by 0.001: {rendered}");
    }

    #[test]
    fn percent_style_constant_gets_input_prefix() {
        let (ns, compiled) = preprocess("unit pct = 0.01\nx = 50 pct\n");
        assert!(!compiled.logarithmic.contains("pct"));
        assert_eq!(literal_values(&ns), vec!["0.5".to_owned()]);
    }
}
