//! Boolean predicates over a [`RunContext`], used to gate graph edges.
//!
//! Supported forms:
//! - literals: `true`, `false`, `null`, numbers, `"strings"` / `'strings'`
//! - dotted paths into the context: `retrieval.hits.0.score`
//! - comparisons: `==`, `!=`, `<`, `<=`, `>`, `>=`, `contains`
//! - `exists path`, `!`, `&&`, `||`, parentheses
//!
//! A bare path is tested for truthiness. Missing keys compare unequal to
//! everything; ordering a missing or non-numeric operand is an evaluation error.

use crate::{RunContext, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("{0}")]
    Eval(String),
}

/// A pre-parsed condition, evaluated once per edge traversal.
#[derive(Debug, Clone)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some((offset, token)) = parser.tokens.get(parser.pos) {
            return Err(ConditionError::Parse {
                offset: *offset,
                message: format!("unexpected token {:?}", token),
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ctx: &RunContext) -> Result<bool, ConditionError> {
        self.expr.eval(ctx)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Exists(Vec<String>),
    Compare(Operand, CompareOp, Operand),
    Truthy(Operand),
}

#[derive(Debug, Clone)]
enum Operand {
    Literal(Value),
    Path(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl Operand {
    fn resolve(&self, ctx: &RunContext) -> Option<Value> {
        match self {
            Operand::Literal(value) => Some(value.clone()),
            Operand::Path(path) => {
                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                ctx.lookup(&segments)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Operand::Literal(value) => format!("{:?}", value),
            Operand::Path(path) => path.join("."),
        }
    }
}

impl Expr {
    fn eval(&self, ctx: &RunContext) -> Result<bool, ConditionError> {
        match self {
            Expr::Or(lhs, rhs) => Ok(lhs.eval(ctx)? || rhs.eval(ctx)?),
            Expr::And(lhs, rhs) => Ok(lhs.eval(ctx)? && rhs.eval(ctx)?),
            Expr::Not(inner) => Ok(!inner.eval(ctx)?),
            Expr::Exists(path) => {
                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                Ok(ctx.lookup(&segments).is_some_and(|v| !v.is_null()))
            }
            Expr::Truthy(operand) => Ok(operand.resolve(ctx).is_some_and(|v| v.is_truthy())),
            Expr::Compare(lhs, op, rhs) => compare(lhs, *op, rhs, ctx),
        }
    }
}

fn compare(
    lhs: &Operand,
    op: CompareOp,
    rhs: &Operand,
    ctx: &RunContext,
) -> Result<bool, ConditionError> {
    let left = lhs.resolve(ctx);
    let right = rhs.resolve(ctx);

    match op {
        CompareOp::Eq | CompareOp::Ne => {
            let equal = match (&left, &right) {
                (Some(l), Some(r)) => loosely_equal(l, r),
                _ => false,
            };
            Ok(if op == CompareOp::Eq { equal } else { !equal })
        }
        CompareOp::Contains => match (left, right) {
            (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                Ok(haystack.contains(needle.as_str()))
            }
            (Some(Value::Array(items)), Some(needle)) => {
                Ok(items.iter().any(|item| loosely_equal(item, &needle)))
            }
            (Some(Value::Object(map)), Some(Value::String(key))) => Ok(map.contains_key(&key)),
            (None, _) | (_, None) => Ok(false),
            (Some(l), Some(r)) => Err(ConditionError::Eval(format!(
                "cannot test whether {} ({}) contains {}",
                lhs.describe(),
                l.kind(),
                r.kind()
            ))),
        },
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let l = numeric(lhs, left)?;
            let r = numeric(rhs, right)?;
            Ok(match op {
                CompareOp::Lt => l < r,
                CompareOp::Le => l <= r,
                CompareOp::Gt => l > r,
                _ => l >= r,
            })
        }
    }
}

fn numeric(operand: &Operand, value: Option<Value>) -> Result<f64, ConditionError> {
    match value {
        Some(Value::Number(n)) => Ok(n),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
            ConditionError::Eval(format!("{} is not numeric: {:?}", operand.describe(), s))
        }),
        Some(other) => Err(ConditionError::Eval(format!(
            "{} is {}, expected number",
            operand.describe(),
            other.kind()
        ))),
        None => Err(ConditionError::Eval(format!(
            "{} is not present in the context",
            operand.describe()
        ))),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().is_ok_and(|parsed| parsed == *n)
        }
        _ => left == right,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    Not,
    And,
    Or,
    Op(CompareOp),
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((offset, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((offset, Token::RParen));
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push((offset, Token::And));
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push((offset, Token::Or));
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push((offset, Token::Op(CompareOp::Eq)));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push((offset, Token::Op(CompareOp::Ne)));
                i += 2;
            }
            '!' => {
                tokens.push((offset, Token::Not));
                i += 1;
            }
            '<' | '>' => {
                let op = match (c, next == Some('=')) {
                    ('<', true) => CompareOp::Le,
                    ('<', false) => CompareOp::Lt,
                    ('>', true) => CompareOp::Ge,
                    _ => CompareOp::Gt,
                };
                tokens.push((offset, Token::Op(op)));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let (_, ch) = chars[j];
                    if ch == '\\' {
                        if let Some((_, escaped)) = chars.get(j + 1) {
                            text.push(*escaped);
                            j += 2;
                            continue;
                        }
                    }
                    if ch == quote {
                        closed = true;
                        break;
                    }
                    text.push(ch);
                    j += 1;
                }
                if !closed {
                    return Err(ConditionError::Parse {
                        offset,
                        message: "unterminated string".to_string(),
                    });
                }
                tokens.push((offset, Token::Str(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let text = &source[offset..end];
                let number = text.parse::<f64>().map_err(|_| ConditionError::Parse {
                    offset,
                    message: format!("invalid number '{}'", text),
                })?;
                tokens.push((offset, Token::Num(number)));
                i = j;
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut j = i + 1;
                while j < chars.len()
                    && (chars[j].1.is_alphanumeric() || matches!(chars[j].1, '_' | '.' | '-'))
                {
                    j += 1;
                }
                let end = chars.get(j).map(|(o, _)| *o).unwrap_or(source.len());
                let word = &source[offset..end];
                let token = match word {
                    "contains" => Token::Op(CompareOp::Contains),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((offset, token));
                i = j;
            }
            other => {
                return Err(ConditionError::Parse {
                    offset,
                    message: format!("unexpected character '{}'", other),
                })
            }
        }
    }

    if tokens.is_empty() {
        return Err(ConditionError::Parse {
            offset: 0,
            message: "empty condition".to_string(),
        });
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(o, _)| *o)
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ConditionError {
        ConditionError::Parse {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            expr = Expr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut expr = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_unary()?;
            expr = Expr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        match self.peek() {
            Some(Token::Not) => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Ident(word)) if word == "exists" => {
                self.advance();
                match self.advance() {
                    Some(Token::Ident(path)) => Ok(Expr::Exists(split_path(&path))),
                    _ => Err(self.error("expected a path after 'exists'")),
                }
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_operand()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.advance();
            let rhs = self.parse_operand()?;
            return Ok(Expr::Compare(lhs, op, rhs));
        }
        Ok(Expr::Truthy(lhs))
    }

    fn parse_operand(&mut self) -> Result<Operand, ConditionError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Operand::Literal(Value::Number(n))),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                "null" => Operand::Literal(Value::Null),
                _ => Operand::Path(split_path(&word)),
            }),
            Some(other) => {
                self.pos -= 1;
                Err(self.error(format!("expected a value, found {:?}", other)))
            }
            None => Err(self.error("unexpected end of condition")),
        }
    }
}

fn split_path(word: &str) -> Vec<String> {
    word.split('.').map(str::to_string).collect()
}
