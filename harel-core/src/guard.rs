//! Transition guards.
//!
//! A guard decides whether a matched transition is actually taken. Charts
//! built in Rust use closures over the context type; JSON charts use the
//! small expression language implemented by [`GuardExpr`]:
//!
//! - `ctx.field` / `event.field` - truthy check on the context or the event data
//! - `ctx.a.b` - nested field access
//! - `==`, `!=` against strings, numbers, booleans and `null`
//! - `>`, `>=`, `<`, `<=` against numbers
//! - `!expr`, `expr && expr`, `expr || expr` (`&&` binds tighter), `(expr)`
//!
//! Examples:
//! - `ctx.retries < 3`
//! - `event.amount > 100 && !ctx.frozen`
//! - `(ctx.a || ctx.b) && event.kind == "manual"`

use crate::configuration::Configuration;
use crate::error::CoreError;
use crate::id::StateNodeId;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Predicate over the context only.
pub type ContextPredicate<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// Predicate over the context and the triggering event's data.
pub type EventPredicate<C> = Arc<dyn Fn(&C, &Value) -> bool + Send + Sync>;

/// A resolved guard attached to a transition.
pub enum Guard<C> {
    /// True while the given state is active.
    InState(StateNodeId),
    Context(ContextPredicate<C>),
    ContextAndEvent(EventPredicate<C>),
}

impl<C> Guard<C> {
    /// Evaluates the guard. `configuration` is the configuration the event
    /// was dequeued against.
    pub fn evaluate(&self, configuration: &Configuration, ctx: &C, data: &Value) -> bool {
        match self {
            Guard::InState(id) => configuration.contains(id),
            Guard::Context(pred) => pred(ctx),
            Guard::ContextAndEvent(pred) => pred(ctx, data),
        }
    }
}

impl<C> Clone for Guard<C> {
    fn clone(&self) -> Self {
        match self {
            Guard::InState(id) => Guard::InState(id.clone()),
            Guard::Context(pred) => Guard::Context(pred.clone()),
            Guard::ContextAndEvent(pred) => Guard::ContextAndEvent(pred.clone()),
        }
    }
}

impl<C> fmt::Debug for Guard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::InState(id) => f.debug_tuple("InState").field(id).finish(),
            Guard::Context(_) => f.write_str("Context(..)"),
            Guard::ContextAndEvent(_) => f.write_str("ContextAndEvent(..)"),
        }
    }
}

/// Guard as written in a definition, before in-state names are resolved.
pub enum GuardDef<C> {
    /// State name resolved like a transition target.
    InState(String),
    Context(ContextPredicate<C>),
    ContextAndEvent(EventPredicate<C>),
}

impl<C> GuardDef<C> {
    pub fn context(pred: impl Fn(&C) -> bool + Send + Sync + 'static) -> Self {
        GuardDef::Context(Arc::new(pred))
    }

    pub fn context_and_event(pred: impl Fn(&C, &Value) -> bool + Send + Sync + 'static) -> Self {
        GuardDef::ContextAndEvent(Arc::new(pred))
    }

    pub fn in_state(target: impl Into<String>) -> Self {
        GuardDef::InState(target.into())
    }
}

impl GuardDef<Value> {
    /// Parses a guard expression into a definition-level guard.
    pub fn expr(source: &str) -> Result<Self, CoreError> {
        let expr = GuardExpr::parse(source)?;
        Ok(GuardDef::ContextAndEvent(Arc::new(move |ctx, data| {
            expr.evaluate(ctx, data)
        })))
    }
}

impl<C> fmt::Debug for GuardDef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardDef::InState(name) => f.debug_tuple("InState").field(name).finish(),
            GuardDef::Context(_) => f.write_str("Context(..)"),
            GuardDef::ContextAndEvent(_) => f.write_str("ContextAndEvent(..)"),
        }
    }
}

/// Where a field path is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Context,
    Event,
}

/// A `ctx.`/`event.` rooted field path.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    pub scope: Scope,
    pub path: Vec<String>,
}

impl FieldRef {
    fn lookup<'a>(&self, ctx: &'a Value, event: &'a Value) -> &'a Value {
        static NULL: Value = Value::Null;
        let mut current = match self.scope {
            Scope::Context => ctx,
            Scope::Event => event,
        };
        for part in &self.path {
            current = match current {
                Value::Object(map) => map.get(part).unwrap_or(&NULL),
                _ => return &NULL,
            };
        }
        current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExpr {
    Truthy(FieldRef),
    Compare(FieldRef, CmpOp, Value),
    And(Box<GuardExpr>, Box<GuardExpr>),
    Or(Box<GuardExpr>, Box<GuardExpr>),
    Not(Box<GuardExpr>),
}

impl GuardExpr {
    /// Parses a guard expression.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::InvalidGuard {
                reason: "empty guard expression".to_string(),
            });
        }

        let mut parser = Parser::new(s);
        let expr = parser.parse_or()?;
        parser.skip_whitespace();
        if !parser.at_end() {
            return Err(CoreError::InvalidGuard {
                reason: format!("unexpected input at offset {}", parser.pos),
            });
        }
        Ok(expr)
    }

    /// Evaluates against a context and the event data.
    pub fn evaluate(&self, ctx: &Value, event: &Value) -> bool {
        match self {
            GuardExpr::Truthy(field) => is_truthy(field.lookup(ctx, event)),
            GuardExpr::Compare(field, op, expected) => {
                compare(field.lookup(ctx, event), *op, expected)
            }
            GuardExpr::And(left, right) => {
                left.evaluate(ctx, event) && right.evaluate(ctx, event)
            }
            GuardExpr::Or(left, right) => left.evaluate(ctx, event) || right.evaluate(ctx, event),
            GuardExpr::Not(inner) => !inner.evaluate(ctx, event),
        }
    }
}

fn compare(value: &Value, op: CmpOp, expected: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(value, expected),
        CmpOp::Ne => !values_equal(value, expected),
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
            let (Some(v), Some(e)) = (value.as_f64(), expected.as_f64()) else {
                return false;
            };
            match op {
                CmpOp::Gt => v > e,
                CmpOp::Ge => v >= e,
                CmpOp::Lt => v < e,
                _ => v <= e,
            }
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| (a - b).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Array(_), _) | (Value::Object(_), _) => false,
        _ => a == b,
    }
}

/// Recursive descent parser for guard expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_or(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.eat("||") {
            let right = self.parse_and()?;
            left = GuardExpr::Or(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<GuardExpr, CoreError> {
        let mut left = self.parse_unary()?;
        self.skip_whitespace();

        while self.eat("&&") {
            let right = self.parse_unary()?;
            left = GuardExpr::And(Box::new(left), Box::new(right));
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<GuardExpr, CoreError> {
        self.skip_whitespace();

        // `!=` never starts an operand, so a leading `!` is always negation.
        if self.eat("!") {
            let inner = self.parse_unary()?;
            return Ok(GuardExpr::Not(Box::new(inner)));
        }

        if self.eat("(") {
            let expr = self.parse_or()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(CoreError::InvalidGuard {
                    reason: "expected ')'".to_string(),
                });
            }
            return Ok(expr);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<GuardExpr, CoreError> {
        let field = self.parse_field()?;
        self.skip_whitespace();

        let op = if self.eat("==") {
            CmpOp::Eq
        } else if self.eat("!=") {
            CmpOp::Ne
        } else if self.eat(">=") {
            CmpOp::Ge
        } else if self.eat("<=") {
            CmpOp::Le
        } else if self.eat(">") {
            CmpOp::Gt
        } else if self.eat("<") {
            CmpOp::Lt
        } else {
            return Ok(GuardExpr::Truthy(field));
        };

        self.skip_whitespace();
        let value = match op {
            CmpOp::Eq | CmpOp::Ne => self.parse_literal()?,
            _ => self.parse_number()?,
        };
        Ok(GuardExpr::Compare(field, op, value))
    }

    fn parse_field(&mut self) -> Result<FieldRef, CoreError> {
        let scope = if self.eat("ctx.") {
            Scope::Context
        } else if self.eat("event.") {
            Scope::Event
        } else {
            return Err(CoreError::InvalidGuard {
                reason: "field must start with 'ctx.' or 'event.'".to_string(),
            });
        };

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }

        let raw = &self.input[start..self.pos];
        let path: Vec<String> = raw.split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(CoreError::InvalidGuard {
                reason: format!("invalid field path '{}'", raw),
            });
        }

        Ok(FieldRef { scope, path })
    }

    fn parse_literal(&mut self) -> Result<Value, CoreError> {
        if self.eat("true") {
            return Ok(Value::Bool(true));
        }
        if self.eat("false") {
            return Ok(Value::Bool(false));
        }
        if self.eat("null") {
            return Ok(Value::Null);
        }
        if self.peek_char() == Some('"') {
            return self.parse_string();
        }
        self.parse_number()
    }

    fn parse_string(&mut self) -> Result<Value, CoreError> {
        self.pos += 1;
        let mut out = String::new();
        let mut escaped = false;

        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                return Ok(Value::String(out));
            } else {
                out.push(c);
            }
        }

        Err(CoreError::InvalidGuard {
            reason: "unterminated string".to_string(),
        })
    }

    fn parse_number(&mut self) -> Result<Value, CoreError> {
        let start = self.pos;
        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() || c == '.' {
                self.pos += 1;
            } else {
                break;
            }
        }

        let text = &self.input[start..self.pos];
        let invalid = || CoreError::InvalidGuard {
            reason: format!("invalid number: '{}'", text),
        };
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::from(n));
        }
        let n = text.parse::<f64>().map_err(|_| invalid())?;
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(invalid)
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.input[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }
}
