//! Condition Evaluator - restricted boolean expressions
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! or      := and (("||" | "or") and)*
//! and     := not (("&&" | "and") not)*
//! not     := ("!" | "not") not | cmp
//! cmp     := operand (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in") operand)?
//! operand := literal | path | "(" or ")"
//! path    := ident ("." ident | "[" int "]" | "[" string "]")*
//! ```
//!
//! Nothing outside this grammar is ever executed. Evaluation failures are
//! reported through `warn!` and read as `false`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Number, Value};
use tracing::warn;

use crate::error::{OrcaError, Result};

use super::path::{self, is_ident_char, Scope, Segment};

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Cmp(CmpOp),
    And,
    Or,
    Not,
    Eof,
}

struct Lexer<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, position: usize, details: impl Into<String>) -> OrcaError {
        OrcaError::ExpressionSyntax {
            expression: self.source.to_string(),
            position,
            details: details.into(),
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>> {
        let mut tokens = Vec::new();
        loop {
            while self.current().is_some_and(char::is_whitespace) {
                self.pos += 1;
            }
            let start = self.pos;
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push((token, start));
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        let Some(c) = self.current() else {
            return Ok(Token::Eof);
        };
        let next = self.peek();
        let two = |second: char| next == Some(second);

        let (token, width) = match c {
            '.' => (Token::Dot, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '=' if two('=') => (Token::Cmp(CmpOp::Eq), 2),
            '!' if two('=') => (Token::Cmp(CmpOp::Ne), 2),
            '!' => (Token::Not, 1),
            '<' if two('=') => (Token::Cmp(CmpOp::Le), 2),
            '<' => (Token::Cmp(CmpOp::Lt), 1),
            '>' if two('=') => (Token::Cmp(CmpOp::Ge), 2),
            '>' => (Token::Cmp(CmpOp::Gt), 1),
            '&' if two('&') => (Token::And, 2),
            '|' if two('|') => (Token::Or, 2),
            '"' | '\'' => return self.read_string(c),
            '-' if self.peek().is_some_and(|n| n.is_ascii_digit()) => return self.read_number(),
            c if c.is_ascii_digit() => return self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' => return Ok(self.read_word()),
            other => return Err(self.error(self.pos, format!("unexpected character '{}'", other))),
        };
        self.pos += width;
        Ok(token)
    }

    fn read_number(&mut self) -> Result<Token> {
        let start = self.pos;
        if self.current() == Some('-') {
            self.pos += 1;
        }
        while self.current().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        // Only consume '.' when a digit follows: `items.0.name` stays a path
        if self.current() == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            while self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(start, format!("invalid number '{}'", text)))
    }

    fn read_string(&mut self, quote: char) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.current() {
            self.pos += 1;
            match c {
                '\\' => {
                    if let Some(escaped) = self.current() {
                        out.push(escaped);
                        self.pos += 1;
                    }
                }
                c if c == quote => return Ok(Token::Str(out)),
                c => out.push(c),
            }
        }
        Err(self.error(start, "unterminated string"))
    }

    fn read_word(&mut self) -> Token {
        let start = self.pos;
        while self.current().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "in" => Token::Cmp(CmpOp::In),
            "true" | "True" => Token::True,
            "false" | "False" => Token::False,
            "null" | "None" => Token::Null,
            _ => Token::Ident(word),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Literal(Value),
    Path(Vec<Segment>),
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, details: impl Into<String>) -> OrcaError {
        OrcaError::ExpressionSyntax {
            expression: self.source.to_string(),
            position: self.tokens[self.pos].1,
            details: details.into(),
        }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].0.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if *self.current() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", expected, self.current())))
        }
    }

    fn parse(mut self) -> Result<Expr> {
        if *self.current() == Token::Eof {
            return Err(self.error("empty expression"));
        }
        let expr = self.parse_or()?;
        if *self.current() != Token::Eof {
            return Err(self.error(format!("unexpected {:?}", self.current())));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_and()?];
        while *self.current() == Token::Or {
            self.advance();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_not()?];
        while *self.current() == Token::And {
            self.advance();
            terms.push(self.parse_not()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if *self.current() == Token::Not {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_operand()?;
        if let Token::Cmp(op) = *self.current() {
            self.advance();
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_operand(&mut self) -> Result<Expr> {
        let start = self.pos;
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(root) => self.parse_path(root),
            other => {
                // report the position of the offending token
                self.pos = start;
                Err(self.error(format!("expected a value, found {:?}", other)))
            }
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expr> {
        let mut segments = vec![Segment::Field(root)];
        loop {
            match self.current().clone() {
                Token::Dot => {
                    self.advance();
                    match self.advance() {
                        Token::Ident(name) => segments.push(Segment::Field(name)),
                        Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => {
                            segments.push(Segment::Index(n as usize))
                        }
                        _ => return Err(self.error("expected a field name after '.'")),
                    }
                }
                Token::LBracket => {
                    self.advance();
                    match self.advance() {
                        Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => {
                            segments.push(Segment::Index(n as usize))
                        }
                        Token::Str(key) => segments.push(Segment::Field(key)),
                        _ => return Err(self.error("expected an index or a quoted key")),
                    }
                    self.expect(Token::RBracket)?;
                }
                _ => return Ok(Expr::Path(segments)),
            }
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn path_text(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Field(name) if out.is_empty() => out.push_str(name),
            Segment::Field(name) => {
                out.push('.');
                out.push_str(name);
            }
            Segment::Index(idx) => out.push_str(&format!("[{}]", idx)),
        }
    }
    out
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truthiness: null/false/0/""/[]/{} are false
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> Result<bool> {
    let mismatch = || OrcaError::TypeMismatch {
        left: type_name(left).to_string(),
        op: op.to_string(),
        right: type_name(right).to_string(),
    };

    match op {
        CmpOp::Eq => Ok(values_equal(left, right)),
        CmpOp::Ne => Ok(!values_equal(left, right)),
        CmpOp::In => match (left, right) {
            (needle, Value::Array(items)) => Ok(items.iter().any(|i| values_equal(needle, i))),
            (Value::String(needle), Value::String(hay)) => Ok(hay.contains(needle.as_str())),
            (Value::String(key), Value::Object(map)) => Ok(map.contains_key(key)),
            _ => Err(mismatch()),
        },
        _ => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            }
            .ok_or_else(mismatch)?;

            Ok(match op {
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

fn eval_value<S: Scope + ?Sized>(expr: &Expr, scope: &S) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Path(segments) => {
            path::lookup(scope, segments).ok_or_else(|| OrcaError::ReferenceNotFound {
                reference: path_text(segments),
            })
        }
        other => eval_bool(other, scope).map(Value::Bool),
    }
}

fn eval_bool<S: Scope + ?Sized>(expr: &Expr, scope: &S) -> Result<bool> {
    match expr {
        Expr::Or(terms) => {
            for term in terms {
                if eval_bool(term, scope)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::And(terms) => {
            for term in terms {
                if !eval_bool(term, scope)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expr::Not(inner) => Ok(!eval_bool(inner, scope)?),
        Expr::Compare(left, op, right) => {
            let left = eval_value(left, scope)?;
            let right = eval_value(right, scope)?;
            compare(&left, *op, &right)
        }
        operand => eval_value(operand, scope).map(|v| truthy(&v)),
    }
}

fn compile(expression: &str) -> Result<Expr> {
    let tokens = Lexer::new(expression).tokenize()?;
    Parser {
        source: expression,
        tokens,
        pos: 0,
    }
    .parse()
}

/// Evaluates condition expressions against an execution scope
///
/// Parsed expressions are cached, so loop and wait conditions are
/// compiled once per evaluator.
#[derive(Debug, Default)]
pub struct ConditionEvaluator {
    cache: DashMap<String, Arc<Expr>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that an expression parses, without evaluating it
    pub fn check_syntax(expression: &str) -> Result<()> {
        compile(expression).map(|_| ())
    }

    /// Evaluate to a boolean; any failure reads as `false`
    pub fn evaluate<S: Scope + ?Sized>(&self, expression: &str, scope: &S) -> bool {
        match self.try_evaluate(expression, scope) {
            Ok(value) => value,
            Err(e) => {
                warn!(expression, error = %e, "condition evaluation failed, treating as false");
                false
            }
        }
    }

    /// Evaluate, surfacing syntax, reference and type errors
    pub fn try_evaluate<S: Scope + ?Sized>(&self, expression: &str, scope: &S) -> Result<bool> {
        let expr = match self.cache.get(expression) {
            Some(cached) => Arc::clone(&cached),
            None => {
                let compiled = Arc::new(compile(expression)?);
                self.cache
                    .insert(expression.to_string(), Arc::clone(&compiled));
                compiled
            }
        };
        eval_bool(&expr, scope)
    }
}
