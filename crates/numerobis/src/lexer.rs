//! Tokenizer for the surface language.
//!
//! Whitespace is kept in the token stream: literal units (`5 km`), range
//! dots and postfix calls are whitespace-sensitive, so the parser decides
//! when to skip it.

use std::rc::Rc;

use crate::{
    errors::{Errors, ModuleMeta, Result},
    location::Location,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // literals
    Id,
    Number,
    Str,
    // keywords
    If,
    Then,
    Else,
    For,
    In,
    Do,
    While,
    True,
    False,
    Or,
    And,
    Not,
    Xor,
    Unit,
    Dimension,
    Break,
    Continue,
    Return,
    Import,
    From,
    // operators
    Plus,
    Minus,
    Times,
    Divide,
    IntDivide,
    Mod,
    Power,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    Conversion,
    Range,
    Assign,
    // delimiters
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Period,
    Semicolon,
    Colon,
    At,
    Bang,
    Whitespace,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub loc: Location,
}

impl Token {
    pub fn eof() -> Self {
        Self {
            kind: TokenKind::Eof,
            value: "EOF".into(),
            loc: Location::default(),
        }
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "if" => TokenKind::If,
        "then" => TokenKind::Then,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "do" => TokenKind::Do,
        "while" => TokenKind::While,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "or" => TokenKind::Or,
        "and" => TokenKind::And,
        "not" => TokenKind::Not,
        "xor" => TokenKind::Xor,
        "unit" => TokenKind::Unit,
        "dimension" => TokenKind::Dimension,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "return" => TokenKind::Return,
        "import" => TokenKind::Import,
        "from" => TokenKind::From,
        _ => return None,
    })
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '°'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '°'
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: i32,
    col: i32,
    errors: Errors,
}

pub fn lex(source: &str, module: Rc<ModuleMeta>) -> Result<Vec<Token>> {
    let lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        col: 1,
        errors: Errors::new(module),
    };
    lexer.run()
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn location(&self, text: &str) -> Location {
        let mut end_line = self.line;
        let mut end_col = self.col + text.chars().count() as i32 - 1;
        if let Some(last_newline) = text.rfind('\n') {
            end_line += text.matches('\n').count() as i32;
            end_col = text[last_newline + 1..].chars().count() as i32;
        }
        Location::new(self.line, self.col, end_line, end_col)
    }

    fn advance(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn take_while(&self, start: usize, predicate: impl Fn(char) -> bool) -> String {
        self.chars[start..]
            .iter()
            .take_while(|c| predicate(**c))
            .collect()
    }

    /// Digits with optional `_` group separators: `1_000`.
    fn digits(&self, start: usize) -> String {
        let mut out = String::new();
        let mut i = start;
        while let Some(c) = self.chars.get(i) {
            if c.is_ascii_digit() || (*c == '_' && self.chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
                out.push(*c);
                i += 1;
            } else {
                break;
            }
        }
        out
    }

    fn number(&self) -> String {
        let mut out = self.digits(self.pos);
        let mut i = self.pos + out.chars().count();
        if self.chars.get(i) == Some(&'.') && self.chars.get(i + 1).is_some_and(char::is_ascii_digit) {
            let frac = self.digits(i + 1);
            out.push('.');
            out.push_str(&frac);
            i += 1 + frac.chars().count();
        }
        if matches!(self.chars.get(i), Some('e' | 'E')) {
            let mut exp = String::new();
            let mut j = i + 1;
            if matches!(self.chars.get(j), Some('+' | '-')) {
                exp.push(self.chars[j]);
                j += 1;
            }
            let exp_digits = self.digits(j);
            if !exp_digits.is_empty() {
                exp.push_str(&exp_digits);
                j += exp_digits.chars().count();
                // a fractional exponent still lexes; the parser rejects it
                if self.chars.get(j) == Some(&'.') && self.chars.get(j + 1).is_some_and(char::is_ascii_digit) {
                    exp.push('.');
                    exp.push_str(&self.digits(j + 1));
                }
                out.push(self.chars[i]);
                out.push_str(&exp);
            }
        }
        out
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(c) = self.peek(0) {
            // comments
            if c == '#' {
                if self.peek(1) == Some('[') {
                    let rest: String = self.chars[self.pos..].iter().collect();
                    let text = match rest.find("]#") {
                        Some(end) => rest[..end + 2].to_owned(),
                        None => rest,
                    };
                    self.advance(&text);
                } else {
                    let text = self.take_while(self.pos, |c| c != '\n');
                    self.advance(&text);
                }
                continue;
            }

            if c.is_whitespace() {
                let text = self.take_while(self.pos, char::is_whitespace);
                let loc = self.location(&text);
                self.advance(&text);
                tokens.push(Token { kind: TokenKind::Whitespace, value: text, loc });
                continue;
            }

            let (kind, text) = if c.is_ascii_digit() {
                (TokenKind::Number, self.number())
            } else if is_ident_start(c) {
                let text = self.take_while(self.pos, is_ident_continue);
                (keyword(&text).unwrap_or(TokenKind::Id), text)
            } else if c == '"' {
                let mut text = String::from('"');
                let mut i = self.pos + 1;
                loop {
                    match self.chars.get(i) {
                        None | Some('\n') => {
                            let loc = self.location(&text);
                            return self.errors.throw(1, Some(loc)).arg("token", &text).fail();
                        }
                        Some('\\') => {
                            text.push('\\');
                            if let Some(escaped) = self.chars.get(i + 1) {
                                text.push(*escaped);
                            }
                            i += 2;
                        }
                        Some('"') => {
                            text.push('"');
                            break;
                        }
                        Some(other) => {
                            text.push(*other);
                            i += 1;
                        }
                    }
                }
                (TokenKind::Str, text)
            } else {
                self.operator(c)?
            };

            let loc = self.location(&text);
            self.advance(&text);
            tokens.push(Token { kind, value: text, loc });
        }

        Ok(tokens)
    }

    fn operator(&self, c: char) -> Result<(TokenKind, String)> {
        let two: String = self.chars[self.pos..].iter().take(2).collect();
        let three: String = self.chars[self.pos..].iter().take(3).collect();

        if three == "(->" {
            return Ok((TokenKind::Conversion, three));
        }
        let kind = match two.as_str() {
            "->" => Some(TokenKind::Conversion),
            "//" => Some(TokenKind::IntDivide),
            ".." => Some(TokenKind::Range),
            "==" => Some(TokenKind::EqEq),
            "!=" => Some(TokenKind::Ne),
            "<=" => Some(TokenKind::Le),
            ">=" => Some(TokenKind::Ge),
            _ => None,
        };
        if let Some(kind) = kind {
            return Ok((kind, two));
        }

        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Times,
            '/' => TokenKind::Divide,
            '%' => TokenKind::Mod,
            '^' => TokenKind::Power,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '=' => TokenKind::Assign,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Period,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '@' => TokenKind::At,
            '!' => TokenKind::Bang,
            _ => {
                let loc = Location::point(self.line, self.col);
                return self.errors.throw(1, Some(loc)).arg("token", c).fail();
            }
        };
        Ok((kind, c.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source, ModuleMeta::new("<test>", source))
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| *k != TokenKind::Whitespace)
            .collect()
    }

    #[test]
    fn lexes_unit_definition() {
        assert_eq!(
            kinds("unit km = 1000 m"),
            vec![
                TokenKind::Unit,
                TokenKind::Id,
                TokenKind::Assign,
                TokenKind::Number,
                TokenKind::Id,
            ]
        );
    }

    #[test]
    fn lexes_numbers_with_separators_and_exponents() {
        let tokens = lex("1_000 1.5e-3 2e10", ModuleMeta::new("<test>", "")).unwrap();
        let numbers: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.value.as_str())
            .collect();
        assert_eq!(numbers, vec!["1_000", "1.5e-3", "2e10"]);
    }

    #[test]
    fn conversion_operator_variants() {
        assert_eq!(kinds("x -> K"), vec![TokenKind::Id, TokenKind::Conversion, TokenKind::Id]);
        let tokens = lex("x (-> K)", ModuleMeta::new("<test>", "")).unwrap();
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Conversion && t.value == "(->"));
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(kinds("1 # comment\n#[ block\ncomment ]# 2"), vec![TokenKind::Number, TokenKind::Number]);
    }

    #[test]
    fn tracks_locations() {
        let tokens = lex("a\n  bb", ModuleMeta::new("<test>", "")).unwrap();
        let bb = tokens.iter().find(|t| t.value == "bb").unwrap();
        assert_eq!((bb.loc.line, bb.loc.col, bb.loc.end_col), (2, 3, 4));
    }

    #[test]
    fn degree_sign_is_an_identifier() {
        assert_eq!(kinds("unit °C"), vec![TokenKind::Unit, TokenKind::Id]);
    }

    #[test]
    fn rejects_stray_characters() {
        let err = lex("x = $", ModuleMeta::new("<test>", "x = $")).unwrap_err();
        assert_eq!(err.code, 1);
    }
}
