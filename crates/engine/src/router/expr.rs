// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Condition expression language for routing rules.
//!
//! `{MSH-9.1} = "ADT" AND NOT ({PV1-2} IN ("E", "P"))`
//!
//! Field references resolve through the parsed view; a missing field
//! yields the empty string, so every comparison is total. Parsed once
//! at load into a small AST; no scripting engine.

use mw_hl7::{FieldPath, ParsedView};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("invalid condition at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("invalid field reference: {0}")]
    Path(#[from] mw_hl7::PathError),
}

/// String or integer literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Str(String),
    Int(i64),
}

impl Literal {
    fn as_text(&self) -> String {
        match self {
            Literal::Str(s) => s.clone(),
            Literal::Int(i) => i.to_string(),
        }
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(FieldPath),
    Literal(Literal),
}

impl Operand {
    fn resolve(&self, view: &ParsedView) -> String {
        match self {
            Operand::Field(path) => view.field(path).unwrap_or_default(),
            Operand::Literal(lit) => lit.as_text(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    Contains,
    StartsWith,
    EndsWith,
}

/// Parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Empty condition: always true.
    True,
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    Str(StrOp, Operand, Operand),
    In(Operand, Vec<Literal>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Parse a condition. Empty or whitespace-only input is the
    /// always-true condition.
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        if input.trim().is_empty() {
            return Ok(Expr::True);
        }
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, position: 0 };
        let expr = parser.or_expr()?;
        if parser.position < parser.tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    /// Evaluate against a parsed view. Total: never fails.
    pub fn matches(&self, view: &ParsedView) -> bool {
        match self {
            Expr::True => true,
            Expr::Eq(left, right) => compare(left, right, view),
            Expr::Ne(left, right) => !compare(left, right, view),
            Expr::Str(op, left, right) => {
                let haystack = left.resolve(view);
                let needle = right.resolve(view);
                match op {
                    StrOp::Contains => haystack.contains(&needle),
                    StrOp::StartsWith => haystack.starts_with(&needle),
                    StrOp::EndsWith => haystack.ends_with(&needle),
                }
            }
            Expr::In(operand, items) => {
                let value = operand.resolve(view);
                items.iter().any(|item| item.as_text() == value)
            }
            Expr::And(a, b) => a.matches(view) && b.matches(view),
            Expr::Or(a, b) => a.matches(view) || b.matches(view),
            Expr::Not(inner) => !inner.matches(view),
        }
    }
}

/// Integer comparison when both sides are numeric, string otherwise.
fn compare(left: &Operand, right: &Operand, view: &ParsedView) -> bool {
    let l = left.resolve(view);
    let r = right.resolve(view);
    match (l.parse::<i64>(), r.parse::<i64>()) {
        (Ok(li), Ok(ri)) => li == ri,
        _ => l == r,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Str(String),
    Int(i64),
    Word(String),
    Eq,
    Ne,
    LParen,
    RParen,
    Comma,
}

struct Located {
    token: Token,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Located>, ExprError> {
    let bytes: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Located { token: Token::LParen, offset: i });
                i += 1;
            }
            ')' => {
                tokens.push(Located { token: Token::RParen, offset: i });
                i += 1;
            }
            ',' => {
                tokens.push(Located { token: Token::Comma, offset: i });
                i += 1;
            }
            '=' => {
                tokens.push(Located { token: Token::Eq, offset: i });
                i += 1;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&'=') {
                    tokens.push(Located { token: Token::Ne, offset: i });
                    i += 2;
                } else {
                    return Err(ExprError::Parse {
                        offset: i,
                        message: "expected '=' after '!'".to_string(),
                    });
                }
            }
            '{' => {
                let start = i + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|c| *c == '}')
                    .map(|p| start + p)
                    .ok_or(ExprError::Parse {
                        offset: i,
                        message: "unterminated field reference".to_string(),
                    })?;
                let path: String = bytes[start..end].iter().collect();
                tokens.push(Located { token: Token::Field(path), offset: i });
                i = end + 1;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|ch| *ch == quote)
                    .map(|p| start + p)
                    .ok_or(ExprError::Parse {
                        offset: i,
                        message: "unterminated string literal".to_string(),
                    })?;
                let text: String = bytes[start..end].iter().collect();
                tokens.push(Located { token: Token::Str(text), offset: i });
                i = end + 1;
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = bytes[start..i].iter().collect();
                let value = text.parse().map_err(|_| ExprError::Parse {
                    offset: start,
                    message: format!("invalid integer {text:?}"),
                })?;
                tokens.push(Located { token: Token::Int(value), offset: start });
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let word: String = bytes[start..i].iter().collect();
                tokens.push(Located { token: Token::Word(word), offset: start });
            }
            other => {
                return Err(ExprError::Parse {
                    offset: i,
                    message: format!("unexpected character {other:?}"),
                })
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Located>,
    position: usize,
}

impl Parser {
    fn error(&self, message: &str) -> ExprError {
        let offset = self
            .tokens
            .get(self.position)
            .map(|t| t.offset)
            .or_else(|| self.tokens.last().map(|t| t.offset))
            .unwrap_or(0);
        ExprError::Parse { offset, message: message.to_string() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|t| &t.token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).map(|t| t.token.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary_expr()?;
        while self.eat_keyword("AND") {
            let right = self.unary_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Expr, ExprError> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.unary_expr()?)));
        }
        if self.peek() == Some(&Token::LParen) {
            // Parenthesized boolean group.
            self.position += 1;
            let inner = self.or_expr()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                _ => return Err(self.error("expected ')'")),
            }
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.operand()?;

        if self.peek() == Some(&Token::Eq) {
            self.position += 1;
            return Ok(Expr::Eq(left, self.operand()?));
        }
        if self.peek() == Some(&Token::Ne) {
            self.position += 1;
            return Ok(Expr::Ne(left, self.operand()?));
        }
        for (keyword, op) in [
            ("Contains", StrOp::Contains),
            ("StartsWith", StrOp::StartsWith),
            ("EndsWith", StrOp::EndsWith),
        ] {
            if self.eat_keyword(keyword) {
                return Ok(Expr::Str(op, left, self.operand()?));
            }
        }
        if self.eat_keyword("IN") {
            if self.next() != Some(Token::LParen) {
                return Err(self.error("expected '(' after IN"));
            }
            let mut items = Vec::new();
            loop {
                match self.next() {
                    Some(Token::Str(s)) => items.push(Literal::Str(s)),
                    Some(Token::Int(i)) => items.push(Literal::Int(i)),
                    _ => return Err(self.error("expected literal in IN list")),
                }
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(self.error("expected ',' or ')' in IN list")),
                }
            }
            return Ok(Expr::In(left, items));
        }

        Err(self.error("expected comparison operator"))
    }

    fn operand(&mut self) -> Result<Operand, ExprError> {
        match self.next() {
            Some(Token::Field(path)) => Ok(Operand::Field(FieldPath::parse(&path)?)),
            Some(Token::Str(s)) => Ok(Operand::Literal(Literal::Str(s))),
            Some(Token::Int(i)) => Ok(Operand::Literal(Literal::Int(i))),
            _ => Err(self.error("expected field reference or literal")),
        }
    }
}

#[cfg(test)]
#[path = "expr_tests.rs"]
mod tests;
