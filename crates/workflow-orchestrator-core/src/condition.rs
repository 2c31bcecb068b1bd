// Copyright (c) 2025 Workflow Orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The condition/expression evaluator: `evaluateCondition(text, context) -> bool`.
//!
//! Renders `text` through the template resolver first (so `{{ ... }}`
//! interpolations are substituted), then parses the result as a small,
//! host-language-free boolean expression: comparison operators (`==`,
//! `!=`, `<`, `<=`, `>`, `>=`), logical connectives (`&&`, `||`, `!`), and
//! an `in` membership test. There is no escape hatch to evaluate
//! arbitrary Rust/host code — the grammar below is the entire surface.

use crate::context::ExecutionContext;
use crate::error::{OrchestratorError, Result};
use crate::resolver::{resolve_path_in_context, resolve_template_string};
use serde_json::Value;

/// Renders `text` and evaluates it as a boolean expression.
pub fn evaluate_condition(text: &str, context: &ExecutionContext) -> Result<bool> {
    let rendered = resolve_template_string(text, context)?;
    let mut parser = Parser::new(&rendered, context);
    let value = parser.parse_or()?;
    parser.expect_end()?;
    Ok(truthy(&value))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    In,
    End,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("!="));
                    i += 2;
                } else {
                    tokens.push(Token::Op("!"));
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("=="));
                    i += 2;
                } else {
                    return Err(OrchestratorError::Condition(format!(
                        "unexpected '=' at position {} (did you mean '=='?)",
                        i
                    )));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("<="));
                    i += 2;
                } else {
                    tokens.push(Token::Op("<"));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(">="));
                    i += 2;
                } else {
                    tokens.push(Token::Op(">"));
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Op("&&"));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Op("||"));
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(OrchestratorError::Condition("unterminated string literal".into()));
                }
                i += 1;
                tokens.push(Token::String(s));
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map(|d| d.is_ascii_digit()).unwrap_or(false)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let lexeme: String = chars[start..i].iter().collect();
                let n: f64 = lexeme
                    .parse()
                    .map_err(|_| OrchestratorError::Condition(format!("invalid number literal '{}'", lexeme)))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric()
                        || chars[i] == '_'
                        || chars[i] == '.'
                        || chars[i] == '['
                        || chars[i] == ']'
                        || chars[i] == '$')
                {
                    i += 1;
                }
                let lexeme: String = chars[start..i].iter().collect();
                match lexeme.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    "null" | "undefined" => tokens.push(Token::Null),
                    "in" => tokens.push(Token::In),
                    _ => tokens.push(Token::Ident(lexeme)),
                }
            }
            other => {
                return Err(OrchestratorError::Condition(format!(
                    "unexpected character '{}' in condition expression",
                    other
                )))
            }
        }
    }
    tokens.push(Token::End);
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    context: &'a ExecutionContext,
}

impl<'a> Parser<'a> {
    fn new(input: &str, context: &'a ExecutionContext) -> Self {
        let tokens = tokenize(input).unwrap_or_else(|_| vec![Token::End]);
        Self { tokens, pos: 0, context }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect_end(&mut self) -> Result<()> {
        if matches!(self.peek(), Token::End) {
            Ok(())
        } else {
            Err(OrchestratorError::Condition(format!(
                "trailing tokens after expression: {:?}",
                self.peek()
            )))
        }
    }

    fn parse_or(&mut self) -> Result<Value> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Token::Op("||")) {
            self.advance();
            let right = self.parse_and()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Token::Op("&&")) {
            self.advance();
            let right = self.parse_not()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Value> {
        if matches!(self.peek(), Token::Op("!")) {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Value::Bool(!truthy(&operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Value> {
        let left = self.parse_membership()?;
        let op = match self.peek() {
            Token::Op(op @ ("==" | "!=" | "<" | "<=" | ">" | ">=")) => *op,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_membership()?;
        Ok(Value::Bool(compare(op, &left, &right)))
    }

    fn parse_membership(&mut self) -> Result<Value> {
        let left = self.parse_primary()?;
        if matches!(self.peek(), Token::In) {
            self.advance();
            let right = self.parse_primary()?;
            let found = match &right {
                Value::Array(items) => items.contains(&left),
                Value::String(s) => left.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
                Value::Object(map) => left.as_str().map(|key| map.contains_key(key)).unwrap_or(false),
                _ => false,
            };
            return Ok(Value::Bool(found));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Value> {
        match self.advance() {
            Token::Number(n) => Ok(serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)),
            Token::String(s) => Ok(Value::String(s)),
            Token::Bool(b) => Ok(Value::Bool(b)),
            Token::Null => Ok(Value::Null),
            Token::Ident(path) => Ok(resolve_path_in_context(self.context, &path)),
            Token::LParen => {
                let inner = self.parse_or()?;
                if !matches!(self.advance(), Token::RParen) {
                    return Err(OrchestratorError::Condition("expected ')'".into()));
                }
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if matches!(self.peek(), Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                if !matches!(self.advance(), Token::RBracket) {
                    return Err(OrchestratorError::Condition("expected ']'".into()));
                }
                Ok(Value::Array(items))
            }
            other => Err(OrchestratorError::Condition(format!(
                "unexpected token in expression: {:?}",
                other
            ))),
        }
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return match op {
            "==" => a == b,
            "!=" => a != b,
            "<" => a < b,
            "<=" => a <= b,
            ">" => a > b,
            ">=" => a >= b,
            _ => false,
        };
    }
    match op {
        "==" => left == right,
        "!=" => left != right,
        "<" | "<=" | ">" | ">=" => {
            let (Some(a), Some(b)) = (left.as_str(), right.as_str()) else {
                return false;
            };
            match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                ">=" => a >= b,
                _ => unreachable!(),
            }
        }
        _ => false,
    }
}
