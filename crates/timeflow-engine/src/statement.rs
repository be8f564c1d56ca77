//! Selection statement model
//!
//! The parser is an external collaborator; it delivers a fully resolved
//! statement tree. This module defines that tree plus the handful of
//! transformations the planner performs on it: dimension normalization,
//! per-field substatement extraction and `now()` substitution.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators appearing in field and condition expressions.
///
/// Only the four arithmetic operators are evaluated by the engine itself;
/// comparison and logical operators are passed through to storage inside the
/// condition tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    /// True for the operators the binary expression evaluator supports
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        };
        f.write_str(s)
    }
}

/// Literal values appearing in expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    /// Absolute time, nanoseconds since epoch
    Time(i64),
    /// Duration in nanoseconds
    Duration(i64),
}

/// A resolved expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a field of the source measurement
    VarRef(String),
    /// Function call, e.g. `count(value)` or `now()`
    Call { name: String, args: Vec<Expr> },
    /// Binary expression
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Parenthesized expression
    Paren(Box<Expr>),
    /// Literal value
    Literal(Literal),
}

impl Expr {
    /// Reference a field by name
    pub fn var_ref(name: impl Into<String>) -> Self {
        Expr::VarRef(name.into())
    }

    /// Call a function
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    /// Combine two expressions with a binary operator
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Numeric literal
    pub fn number(v: f64) -> Self {
        Expr::Literal(Literal::Number(v))
    }

    /// The `now()` call, replaced by the planner with its query clock
    pub fn now() -> Self {
        Expr::call("now", Vec::new())
    }

    /// True if any node in this expression is a function call
    pub fn has_call(&self) -> bool {
        match self {
            Expr::Call { .. } => true,
            Expr::Binary { lhs, rhs, .. } => lhs.has_call() || rhs.has_call(),
            Expr::Paren(inner) => inner.has_call(),
            Expr::VarRef(_) | Expr::Literal(_) => false,
        }
    }

    /// Replace every `now()` call with an absolute time literal
    fn replace_now(&mut self, now_ns: i64) {
        match self {
            Expr::Call { name, args } => {
                if name.eq_ignore_ascii_case("now") && args.is_empty() {
                    *self = Expr::Literal(Literal::Time(now_ns));
                } else {
                    for arg in args {
                        arg.replace_now(now_ns);
                    }
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.replace_now(now_ns);
                rhs.replace_now(now_ns);
            }
            Expr::Paren(inner) => inner.replace_now(now_ns),
            Expr::VarRef(_) | Expr::Literal(_) => {}
        }
    }
}

/// A selected field: an expression plus an optional alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Field {
    /// Create an unaliased field
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    /// Create an aliased field
    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    /// Display name of this field; empty when the expression has no natural
    /// name (the row assembler falls back to a positional column name).
    pub fn name(&self) -> &str {
        if let Some(alias) = &self.alias {
            return alias;
        }
        match &self.expr {
            Expr::VarRef(name) => name,
            Expr::Call { name, .. } => name,
            _ => "",
        }
    }
}

/// The single measurement a selection statement reads from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    /// Possibly qualified name, e.g. `db.autogen.cpu`
    pub name: String,
}

impl Measurement {
    /// Create a new measurement reference
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The last dot-separated segment of the name
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// One GROUP BY dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Dimension {
    /// Group by a tag key
    Tag(String),
    /// Group by time buckets of the given width in nanoseconds
    Time(i64),
}

/// A parsed, validated selection statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStatement {
    pub fields: Vec<Field>,
    pub source: Measurement,
    pub condition: Option<Expr>,
    pub dimensions: Vec<Dimension>,
    /// Set by the planner when the statement selects undecoded points
    pub raw: bool,
}

impl SelectStatement {
    /// Create a new statement builder
    pub fn builder(measurement: impl Into<String>) -> StatementBuilder {
        StatementBuilder::new(measurement)
    }

    /// Split the dimensions into a time interval and the ordered tag-key
    /// list. At most one time dimension is allowed.
    pub fn normalize_dimensions(&self) -> Result<(i64, Vec<String>)> {
        let mut interval = 0i64;
        let mut tag_keys = Vec::new();
        for dim in &self.dimensions {
            match dim {
                Dimension::Tag(key) => tag_keys.push(key.clone()),
                Dimension::Time(width) => {
                    if interval != 0 {
                        return Err(EngineError::InvalidDimensions(
                            "multiple time dimensions".to_string(),
                        ));
                    }
                    if *width <= 0 {
                        return Err(EngineError::InvalidDimensions(format!(
                            "non-positive time interval: {}",
                            width
                        )));
                    }
                    interval = *width;
                }
            }
        }
        Ok((interval, tag_keys))
    }

    /// Build the simplified single-field statement handed to the transaction
    /// when creating iterators for one aggregated field.
    pub fn substatement(&self, var: &str) -> SelectStatement {
        SelectStatement {
            fields: vec![Field::new(Expr::var_ref(var))],
            source: self.source.clone(),
            condition: self.condition.clone(),
            dimensions: self.dimensions.clone(),
            raw: false,
        }
    }

    /// Replace every `now()` in the condition with an absolute time literal
    pub fn replace_now(&mut self, now_ns: i64) {
        if let Some(cond) = &mut self.condition {
            cond.replace_now(now_ns);
        }
    }
}

/// Builder for selection statements
pub struct StatementBuilder {
    fields: Vec<Field>,
    source: Measurement,
    condition: Option<Expr>,
    dimensions: Vec<Dimension>,
}

impl StatementBuilder {
    /// Create a builder for a measurement
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            fields: Vec::new(),
            source: Measurement::new(measurement),
            condition: None,
            dimensions: Vec::new(),
        }
    }

    /// Select an expression
    pub fn field(mut self, expr: Expr) -> Self {
        self.fields.push(Field::new(expr));
        self
    }

    /// Select an expression under an alias
    pub fn field_as(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.fields.push(Field::aliased(expr, alias));
        self
    }

    /// Set the condition tree
    pub fn condition(mut self, expr: Expr) -> Self {
        self.condition = Some(expr);
        self
    }

    /// Group by a tag key
    pub fn group_by_tag(mut self, key: impl Into<String>) -> Self {
        self.dimensions.push(Dimension::Tag(key.into()));
        self
    }

    /// Group by time buckets of the given width in nanoseconds
    pub fn group_by_time(mut self, interval_ns: i64) -> Self {
        self.dimensions.push(Dimension::Time(interval_ns));
        self
    }

    /// Build and validate the statement
    pub fn build(self) -> Result<SelectStatement> {
        if self.source.name.is_empty() {
            return Err(EngineError::InvalidStatement(
                "empty measurement".to_string(),
            ));
        }
        if self.fields.is_empty() {
            return Err(EngineError::InvalidStatement("no fields".to_string()));
        }
        let stmt = SelectStatement {
            fields: self.fields,
            source: self.source,
            condition: self.condition,
            dimensions: self.dimensions,
            raw: false,
        };
        stmt.normalize_dimensions()?;
        Ok(stmt)
    }
}
