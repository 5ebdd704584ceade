//! Dimensional resolution of module headers.
//!
//! Processes `dimension` and `unit` definitions in source order, resolving
//! unit expressions to dimensional expressions and validating declared
//! against computed dimensions. Populates `Namespaces::dimensions` and
//! `Namespaces::dimensionized` (unit name → base dimension).

use std::rc::Rc;

use rust_decimal::Decimal;

use crate::{
    algebra::Simplifier,
    ast::{DimensionDef, Header, UnitDef},
    env::{Namespaces, NsKind},
    errors::{Errors, ModuleMeta, Result},
    typecheck::methods::TYPE_NAMES,
    unit::{Scalar, Unit, UnitKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dimension,
    Unit,
}

impl Mode {
    fn namespace(self) -> NsKind {
        match self {
            Self::Dimension => NsKind::Dimensions,
            Self::Unit => NsKind::Dimensionized,
        }
    }

    fn noun(self) -> &'static str {
        match self {
            Self::Dimension => "dimension",
            Self::Unit => "unit",
        }
    }
}

pub struct Dimchecker {
    errors: Errors,
    simplifier: Simplifier,
}

impl Dimchecker {
    pub fn new(module: Rc<ModuleMeta>) -> Self {
        Self {
            errors: Errors::new(Rc::clone(&module)),
            simplifier: Simplifier::new(module),
        }
    }

    /// Processes a header. Re-running on an already-checked header only
    /// produces redefinition errors; it does not alter stored dimensions.
    pub fn check_header(&self, ns: &mut Namespaces, header: &Header) -> Result<()> {
        for def in &header.dimensions {
            self.process_dimension(ns, def)?;
        }
        for def in &header.units {
            self.process_unit(ns, def)?;
        }
        Ok(())
    }

    fn process_dimension(&self, ns: &mut Namespaces, def: &DimensionDef) -> Result<()> {
        let name = &def.name.name;
        if ns.dimensionized.contains_key(name) || ns.dimensions.contains_key(name) {
            return self
                .errors
                .throw(603, Some(def.name.loc.clone()))
                .arg("name", name)
                .fail();
        }

        let dimension = match &def.value {
            Some(value) if value.is_truthy() => self.dimensionize(ns, value, Mode::Dimension)?,
            // no value: the dimension is primitive and denotes itself
            _ => Unit::expression(Unit::identifier(name, def.name.loc.clone())),
        };
        let dimension = self.simplifier.simplify(&dimension, true)?;
        ns.dimensions.insert(name.clone(), dimension);
        Ok(())
    }

    fn process_unit(&self, ns: &mut Namespaces, def: &UnitDef) -> Result<()> {
        let name = &def.name.name;
        if ns.dimensionized.contains_key(name) || ns.dimensions.contains_key(name) {
            return self
                .errors
                .throw(603, Some(def.name.loc.clone()))
                .arg("name", name)
                .fail();
        }

        let mut dimension: Option<Unit> = None;
        if let Some(declared) = &def.dimension {
            if declared.name == "1" {
                dimension = Some(Unit::one());
            } else {
                match ns.dimensions.get(&declared.name) {
                    Some(found) => dimension = Some(found.clone()),
                    None => {
                        let suggestion = ns.suggest(NsKind::Dimensions, &declared.name);
                        return self
                            .errors
                            .throw(602, Some(declared.loc.clone()))
                            .arg("kind", "dimension")
                            .arg("name", &declared.name)
                            .help_opt(suggestion.map(|s| format!("did you mean '{s}'?")))
                            .fail();
                    }
                }
            }
        }

        if let Some(value) = def.value.as_ref().filter(|value| value.is_truthy()) {
            let computed = self.dimensionize(ns, value, Mode::Unit)?;
            let computed = self.simplifier.simplify(&computed, true)?;

            match &dimension {
                Some(declared) if def.dimension.is_some() && computed != *declared => {
                    return self
                        .errors
                        .throw(704, Some(def.name.loc.clone()))
                        .arg("name", name)
                        .arg("expected", declared)
                        .arg("actual", &computed)
                        .fail();
                }
                Some(_) => {}
                None => dimension = Some(computed),
            }
        }

        if def.dimension.is_none() && def.value.is_none() {
            // Independent units without a dimension annotation get a
            // dimension named by their title-cased name, as long as that
            // name is still free.
            let titled = title_case(name);
            let auto = Unit::expression(Unit::identifier(&titled, def.name.loc.clone()));

            let first_is_ascii_alpha = name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic());
            if ns.dimensionized.contains_key(&titled) || titled == *name || !first_is_ascii_alpha {
                return self
                    .errors
                    .throw(705, Some(def.name.loc.clone()))
                    .arg("name", name)
                    .fail();
            }

            if !ns.dimensions.contains_key(&titled) {
                ns.dimensions.insert(titled, auto.clone());
            }
            dimension = Some(auto);
        }

        ns.dimensionized
            .insert(name.clone(), dimension.unwrap_or_else(Unit::one));
        Ok(())
    }

    /// Rewrites a unit expression into a dimensional expression by
    /// resolving identifiers through the mode's namespace.
    pub fn dimensionize(&self, ns: &Namespaces, node: &Unit, mode: Mode) -> Result<Unit> {
        match &node.kind {
            UnitKind::Expression(inner) => {
                if inner.is_one() {
                    return Ok(node.clone());
                }
                Ok(Unit::expression(self.dimensionize(ns, inner, mode)?))
            }
            UnitKind::Identifier(name) => self.identifier(ns, node, name, mode),
            UnitKind::Neg(value) => {
                let value = self.dimensionize(ns, value, mode)?;
                if let UnitKind::Scalar(scalar) = &value.kind {
                    let mut negated = scalar.clone();
                    negated.value = -negated.value;
                    return Ok(Unit::new(UnitKind::Scalar(negated), node.loc.clone()));
                }
                Ok(Unit::new(UnitKind::Neg(Box::new(value)), node.loc.clone()))
            }
            UnitKind::Power { base, exponent } => {
                let base = self.dimensionize(ns, base, mode)?;
                let exponent_loc = exponent.loc.clone();
                let exponent = self.dimensionize(ns, exponent, mode)?;
                let exponent = self
                    .simplifier
                    .simplify(&exponent, false)?
                    .unwrap_expression();

                let UnitKind::Scalar(exp) = &exponent.kind else {
                    return self
                        .errors
                        .throw(101, Some(exponent_loc))
                        .arg("value", format!(", got '{exponent}'"))
                        .fail();
                };

                if let UnitKind::Scalar(b) = &base.kind {
                    return Ok(Unit::new(
                        UnitKind::Scalar(Scalar {
                            value: decimal_pow(b.value, exp.value),
                            unit: b.unit.clone(),
                            placeholder: false,
                        }),
                        node.loc.clone(),
                    ));
                }
                Ok(Unit::power(base, exponent))
            }
            UnitKind::Product(values) => {
                Ok(Unit::product(self.spliced(ns, values, mode)?))
            }
            UnitKind::Sum(values) => Ok(Unit::sum(self.spliced(ns, values, mode)?)),
            UnitKind::Scalar(scalar) => match &scalar.unit {
                None => Ok(node.clone()),
                Some(unit) => self.dimensionize(ns, unit, mode),
            },
            _ => Ok(node.clone()),
        }
    }

    fn spliced(&self, ns: &Namespaces, values: &[Unit], mode: Mode) -> Result<Vec<Unit>> {
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            let value = self.dimensionize(ns, value, mode)?;
            match value.kind {
                UnitKind::Product(children) => out.extend(children),
                _ => out.push(value),
            }
        }
        Ok(out)
    }

    fn identifier(&self, ns: &Namespaces, node: &Unit, name: &str, mode: Mode) -> Result<Unit> {
        if TYPE_NAMES.contains(&name) {
            return self
                .errors
                .throw(503, Some(node.loc.clone()))
                .arg("node", name)
                .arg("actual", mode.noun())
                .fail();
        }
        if name == "_" {
            return Ok(Unit::one());
        }

        let table = match mode {
            Mode::Dimension => &ns.dimensions,
            Mode::Unit => &ns.dimensionized,
        };
        let Some(resolved) = table.get(name) else {
            let suggestion = ns.suggest(mode.namespace(), name);
            return self
                .errors
                .throw(602, Some(node.loc.clone()))
                .arg("kind", mode.noun())
                .arg("name", name)
                .help_opt(suggestion.map(|s| format!("did you mean '{s}'?")))
                .fail();
        };

        let mut resolved = resolved.clone().unwrap_expression();
        resolved.loc = node.loc.clone();
        Ok(resolved)
    }
}

/// First letter uppercased, the rest lowercased, like Python's `str.title`
/// for single-word names.
fn title_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn decimal_pow(base: Decimal, exponent: Decimal) -> Decimal {
    use rust_decimal::MathematicalOps;
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
    use crate::{lexer::lex, parser::parse};

    fn header_of(source: &str) -> (Rc<ModuleMeta>, Header) {
        let module = ModuleMeta::new("<test>", source);
        let tokens = lex(source, Rc::clone(&module)).unwrap();
        let (_, header) = parse(tokens, Rc::clone(&module)).unwrap();
        (module, header)
    }

    fn check(source: &str) -> Result<Namespaces> {
        let (module, header) = header_of(source);
        let mut ns = Namespaces::default();
        Dimchecker::new(module).check_header(&mut ns, &header)?;
        Ok(ns)
    }

    #[test]
    fn auto_assigns_title_case_dimension() {
        let ns = check("unit m\n").unwrap();
        assert!(ns.dimensions.contains_key("M"));
        assert!(ns.dimensionized["m"].is_truthy());
    }

    #[test]
    fn derived_unit_resolves_to_base_dimension() {
        let ns = check("unit m\nunit km = 1000 m\n").unwrap();
        assert_eq!(ns.dimensionized["km"], ns.dimensionized["m"]);
    }

    #[test]
    fn redefinition_is_rejected() {
        assert_eq!(check("unit m\nunit m\n").unwrap_err().code, 603);
        assert_eq!(check("dimension D\ndimension D\n").unwrap_err().code, 603);
    }

    #[test]
    fn unknown_dimension_suggests_closest() {
        let err = check("dimension Length\nunit m : Lenght\n").unwrap_err();
        assert_eq!(err.code, 602);
        assert_eq!(err.help.as_deref(), Some("did you mean 'Length'?"));
    }

    #[test]
    fn declared_dimension_must_match_value() {
        let source = "dimension Length\ndimension Time\nunit m : Length\nunit s : Time\nunit mph : Time = m / s\n";
        assert_eq!(check(source).unwrap_err().code, 704);
    }

    #[test]
    fn declared_dimension_accepts_matching_value() {
        let source = "dimension Length\nunit m : Length\nunit km : Length = 1000 m\n";
        let ns = check(source).unwrap();
        assert_eq!(ns.dimensionized["km"], ns.dimensionized["m"]);
    }

    #[test]
    fn capitalised_unit_name_cannot_auto_derive() {
        assert_eq!(check("unit M\n").unwrap_err().code, 705);
        assert_eq!(check("unit °C\n").unwrap_err().code, 705);
    }

    #[test]
    fn primitive_type_names_are_reserved() {
        assert_eq!(check("dimension D = Int\n").unwrap_err().code, 503);
    }

    #[test]
    fn exponent_must_be_scalar() {
        let err = check("unit m\nunit s\nunit weird = m ^ (s)\n").unwrap_err();
        assert_eq!(err.code, 101);
    }

    #[test]
    fn explicit_dimensionless_unit() {
        let ns = check("unit rad : 1\n").unwrap();
        assert!(ns.dimensionized["rad"].is_one());
    }
}
