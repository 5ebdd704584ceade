//! Sub-parser for unit and dimension expressions.
//!
//! Runs over the same token stream as the statement parser. The
//! configuration decides which constructs are legal at the current position:
//! a literal's unit (`5 km`) ends at the first whitespace, a `unit`
//! definition body may contain sums, calls and placeholders.

use rust_decimal::Decimal;

use crate::{
    errors::Result,
    lexer::TokenKind,
    location::Location,
    parser::Cursor,
    unit::{Scalar, Unit, UnitKind},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct UnitParserConfig {
    /// Whitespace inside the expression is insignificant.
    pub standalone: bool,
    pub calls: bool,
    /// Numbers may themselves carry units (`5 km` inside a definition).
    pub unitful_numbers: bool,
    /// `@name` parameter references are allowed.
    pub constants: bool,
    /// Sums (`+`/`-` between terms) are allowed.
    pub addition: bool,
    pub scalars: bool,
}

impl UnitParserConfig {
    /// Everything enabled: the body of a `unit` definition.
    pub fn definition() -> Self {
        Self {
            standalone: true,
            calls: true,
            unitful_numbers: true,
            constants: true,
            addition: true,
            scalars: true,
        }
    }

    pub fn standalone() -> Self {
        Self { standalone: true, ..Self::default() }
    }
}

pub struct UnitParser<'c> {
    cursor: &'c mut Cursor,
    config: UnitParserConfig,
}

impl<'c> UnitParser<'c> {
    pub fn new(cursor: &'c mut Cursor, config: UnitParserConfig) -> Self {
        Self { cursor, config }
    }

    fn peek_kind(&self) -> TokenKind {
        if self.config.standalone {
            self.cursor.peek(1).kind
        } else {
            self.cursor.peek_raw(1).kind
        }
    }

    /// Parses an optional unit expression; `None` when the stream does not
    /// start one. In inline position the unit must be adjacent or separated
    /// by exactly one space, so a newline ends the expression.
    pub fn start(mut self) -> Result<Option<Unit>> {
        if self.config.standalone {
            self.cursor.clear();
        } else {
            let first = self.cursor.peek_raw(1);
            let adjacent = matches!(
                first.kind,
                TokenKind::Id | TokenKind::Number | TokenKind::LParen
            ) || (first.value == " "
                && matches!(
                    self.cursor.peek_raw(2).kind,
                    TokenKind::Id | TokenKind::LParen
                ));
            if !adjacent {
                return Ok(None);
            }
            self.cursor.clear();
        }

        if !matches!(self.peek_kind(), TokenKind::Id | TokenKind::Number | TokenKind::LParen) {
            return Ok(None);
        }

        let mut parenthesized = false;
        if self.peek_kind() == TokenKind::LParen && !self.config.calls {
            self.cursor.consume(&[TokenKind::LParen])?;
            self.config.standalone = true;
            parenthesized = true;
        }

        let unit = self.sum()?;

        if self.config.standalone && parenthesized {
            self.cursor.consume(&[TokenKind::RParen])?;
        }

        Ok(Some(Unit::expression(unit)))
    }

    fn sum(&mut self) -> Result<Unit> {
        let mut values = vec![self.product()?];

        if !self.config.addition
            && matches!(self.peek_kind(), TokenKind::Plus | TokenKind::Minus)
        {
            let tok = self.cursor.peek(1);
            return self
                .cursor
                .errors
                .throw(16, Some(tok.loc.clone()))
                .arg("operator", &tok.value)
                .fail();
        }

        while matches!(self.peek_kind(), TokenKind::Plus | TokenKind::Minus) {
            let op = self.cursor.consume(&[TokenKind::Plus, TokenKind::Minus])?;
            let value = self.product()?;
            if op.kind == TokenKind::Plus {
                values.push(value);
            } else {
                values.push(Unit::neg(value));
            }
        }

        Ok(if values.len() == 1 {
            values.into_iter().next().unwrap_or_else(Unit::one)
        } else {
            Unit::sum(values)
        })
    }

    fn product(&mut self) -> Result<Unit> {
        let mut values = vec![self.power()?];

        while matches!(self.peek_kind(), TokenKind::Times | TokenKind::Divide) {
            let op = self.cursor.consume(&[TokenKind::Times, TokenKind::Divide])?;
            let value = self.power()?;
            if op.kind == TokenKind::Times {
                values.push(value);
            } else {
                values.push(Unit::power(value, Unit::scalar(-Decimal::ONE)));
            }
        }

        Ok(if values.len() == 1 {
            values.into_iter().next().unwrap_or_else(Unit::one)
        } else {
            Unit::product(values)
        })
    }

    fn power(&mut self) -> Result<Unit> {
        let value = self.unary()?;
        if self.peek_kind() == TokenKind::Power {
            self.cursor.consume(&[TokenKind::Power])?;
            let exponent = if self.peek_kind() == TokenKind::Number {
                let tok = self.cursor.consume(&[TokenKind::Number])?;
                self.parse_number(&tok)?
            } else {
                self.cursor.consume(&[TokenKind::LParen])?;
                let exponent = self.sum()?;
                self.cursor.consume(&[TokenKind::RParen])?;
                exponent
            };
            return Ok(Unit::power(value, exponent));
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<Unit> {
        let mut minuses = 0;
        while matches!(self.peek_kind(), TokenKind::Plus | TokenKind::Minus) {
            let op = self.cursor.consume(&[TokenKind::Plus, TokenKind::Minus])?;
            if op.kind == TokenKind::Minus {
                minuses += 1;
            }
        }
        let operand = self.atom()?;
        Ok(if minuses % 2 == 1 { Unit::neg(operand) } else { operand })
    }

    fn atom(&mut self) -> Result<Unit> {
        let tok = self.cursor.consume(&[
            TokenKind::Id,
            TokenKind::Number,
            TokenKind::LParen,
            TokenKind::At,
        ])?;
        match tok.kind {
            TokenKind::Number => self.parse_number(&tok),
            TokenKind::Id if tok.value == "_" => self.parse_placeholder(&tok),
            TokenKind::Id => Ok(Unit::identifier(tok.value, tok.loc)),
            TokenKind::LParen => {
                let node = self.sum()?;
                self.cursor.consume(&[TokenKind::RParen])?;
                Ok(node)
            }
            TokenKind::At => {
                if !self.config.constants {
                    return self
                        .cursor
                        .errors
                        .throw(1, Some(tok.loc))
                        .arg("token", &tok.value)
                        .help("parameters cannot be referenced here")
                        .fail();
                }
                if self.cursor.peek_raw(1).kind != TokenKind::Id {
                    return self.cursor.errors.throw(9, Some(tok.loc)).fail();
                }
                let name = self.cursor.consume(&[TokenKind::Id])?;
                Ok(Unit::new(UnitKind::Constant(name.value), name.loc))
            }
            _ => unreachable!(),
        }
    }

    fn parse_number(&mut self, tok: &crate::lexer::Token) -> Result<Unit> {
        let (value, loc) = self.decimal_of(tok)?;

        let unit = if self.config.unitful_numbers {
            UnitParser::new(self.cursor, UnitParserConfig::default()).start()?
        } else {
            None
        };

        Ok(Unit::new(
            UnitKind::Scalar(Scalar {
                value,
                unit: unit.map(Box::new),
                placeholder: false,
            }),
            loc,
        ))
    }

    /// `_` optionally followed by a unit: a placeholder scalar carrying the
    /// unit, or a bare placeholder identifier.
    fn parse_placeholder(&mut self, tok: &crate::lexer::Token) -> Result<Unit> {
        if self.config.unitful_numbers {
            let unit = UnitParser::new(self.cursor, UnitParserConfig::default()).start()?;
            if let Some(unit) = unit {
                let loc = tok.loc.merge(&unit.loc);
                return Ok(Unit::new(
                    UnitKind::Scalar(Scalar {
                        value: Decimal::ONE,
                        unit: Some(Box::new(unit)),
                        placeholder: true,
                    }),
                    loc,
                ));
            }
        }
        Ok(Unit::identifier("_", tok.loc.clone()))
    }

    fn decimal_of(&self, tok: &crate::lexer::Token) -> Result<(Decimal, Location)> {
        let lower = tok.value.to_lowercase();
        let (number, exponent) = match lower.split_once('e') {
            Some((number, exponent)) => (number.replace('_', ""), Some(exponent.to_owned())),
            None => (lower.replace('_', ""), None),
        };
        if exponent.as_deref().is_some_and(|e| e.contains('.')) {
            return self
                .cursor
                .errors
                .throw(7, Some(tok.loc.clone()))
                .arg("token", &tok.value)
                .fail();
        }
        let scientific = match &exponent {
            Some(exponent) => format!("{number}e{exponent}"),
            None => number.clone(),
        };
        let value = Decimal::from_scientific(&scientific)
            .or_else(|_| number.parse::<Decimal>())
            .map_err(|_| {
                self.cursor
                    .errors
                    .throw(7, Some(tok.loc.clone()))
                    .arg("token", &tok.value)
            })?;
        Ok((value, tok.loc.clone()))
    }
}
