//! Query planner
//!
//! Walks a validated selection statement and produces an executor holding
//! one processor per selected field (or a single raw-query processor when
//! the statement selects a bare field).

use crate::aggregate;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::Executor;
use crate::mapper::Mapper;
use crate::processor::{BinaryExprEvaluator, LiteralProcessor, Processor};
use crate::reducer::Reducer;
use crate::statement::{Expr, Literal, SelectStatement};
use crate::tx::{Database, Transaction};
use std::sync::Arc;
use timeflow_core::FieldValue;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn default_now() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// Creates execution plans for selection statements.
pub struct Planner<D: Database> {
    db: D,
    config: EngineConfig,
    now: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl<D: Database> Planner<D> {
    /// Create a planner over a database
    pub fn new(db: D) -> Self {
        Self {
            db,
            config: EngineConfig::default(),
            now: Box::new(default_now),
        }
    }

    /// Override the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Pin the query clock, mainly for deterministic tests
    pub fn with_now(mut self, now: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.now = Box::new(now);
        self
    }

    /// Create an execution plan for the statement and return an executor
    pub fn plan(&self, stmt: &SelectStatement) -> Result<Executor<D::Tx>> {
        if stmt.fields.is_empty() {
            return Err(EngineError::InvalidStatement("no fields".to_string()));
        }

        // Pin the query clock and resolve now() in the condition before
        // storage sees the statement.
        let now = (self.now)();
        let mut stmt = stmt.clone();
        stmt.replace_now(now);

        // Begin an unopened transaction; the executor opens it.
        let mut tx = self.db.begin()?;
        tx.set_now(now);

        let (interval, tag_keys) = stmt.normalize_dimensions()?;
        let token = CancellationToken::new();

        let mut processors: Vec<Box<dyn Processor>> = Vec::new();
        if matches!(stmt.fields[0].expr, Expr::VarRef(_)) {
            processors.push(self.plan_raw_query(&mut stmt, &mut tx, interval)?);
        } else {
            for field in &stmt.fields {
                processors.push(self.plan_expr(&stmt, &field.expr, &mut tx, interval, &token)?);
            }
        }

        debug!(
            "planned {} processor(s) for {} (interval {} ns, {} tag key(s))",
            processors.len(),
            stmt.source.name,
            interval,
            tag_keys.len()
        );

        Ok(Executor::new(
            tx,
            stmt,
            processors,
            interval,
            tag_keys,
            token,
            self.config.clone(),
        ))
    }

    fn plan_raw_query(
        &self,
        stmt: &mut SelectStatement,
        tx: &mut D::Tx,
        interval: i64,
    ) -> Result<Box<dyn Processor>> {
        if stmt.fields.iter().any(|f| f.expr.has_call()) {
            return Err(EngineError::RawFieldWithAggregate);
        }
        stmt.raw = true;

        let itrs = tx.create_iterators(stmt)?;

        // Verify every selected field resolves before execution starts.
        tx.field_ids(&stmt.fields)?;

        let mappers: Vec<Mapper> = itrs
            .into_iter()
            .map(|itr| {
                Mapper::new(
                    Arc::new(aggregate::map_raw),
                    itr,
                    interval,
                    self.config.emitter_capacity,
                )
            })
            .collect();
        debug!("raw query over {} iterator(s)", mappers.len());

        let reducer = Reducer::new(
            Arc::new(aggregate::reduce_raw),
            mappers,
            self.config.emitter_capacity,
        )
        .named(stmt.source.short_name())
        .raw();
        Ok(Box::new(reducer))
    }

    fn plan_expr(
        &self,
        stmt: &SelectStatement,
        expr: &Expr,
        tx: &mut D::Tx,
        interval: i64,
        token: &CancellationToken,
    ) -> Result<Box<dyn Processor>> {
        match expr {
            Expr::VarRef(_) => Err(EngineError::RawFieldWithAggregate),
            Expr::Call { name, args } => self.plan_call(stmt, name, args, tx, interval),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.plan_expr(stmt, lhs, tx, interval, token)?;
                let rhs = self.plan_expr(stmt, rhs, tx, interval, token)?;
                Ok(Box::new(BinaryExprEvaluator::new(
                    *op,
                    lhs,
                    rhs,
                    self.config.emitter_capacity,
                    token.clone(),
                )))
            }
            Expr::Paren(inner) => self.plan_expr(stmt, inner, tx, interval, token),
            Expr::Literal(lit) => Ok(Box::new(LiteralProcessor::new(
                literal_value(lit),
                self.config.emitter_capacity,
                token.child_token(),
            ))),
        }
    }

    fn plan_call(
        &self,
        stmt: &SelectStatement,
        name: &str,
        args: &[Expr],
        tx: &mut D::Tx,
        interval: i64,
    ) -> Result<Box<dyn Processor>> {
        let (map_fn, reduce_fn) = aggregate::lookup(name, args)?;

        let var = match args.first() {
            Some(Expr::VarRef(var)) => var.clone(),
            _ => return Err(EngineError::NotAFieldArgument(name.to_string())),
        };

        let sub = stmt.substatement(&var);
        let itrs = tx.create_iterators(&sub)?;
        let mappers: Vec<Mapper> = itrs
            .into_iter()
            .map(|itr| {
                Mapper::new(
                    Arc::clone(&map_fn),
                    itr,
                    interval,
                    self.config.emitter_capacity,
                )
            })
            .collect();
        debug!("{}({}) over {} iterator(s)", name, var, mappers.len());

        let reducer = Reducer::new(reduce_fn, mappers, self.config.emitter_capacity)
            .named(stmt.source.short_name());
        Ok(Box::new(reducer))
    }
}

fn literal_value(lit: &Literal) -> FieldValue {
    match lit {
        Literal::Number(v) => FieldValue::Float(*v),
        Literal::String(s) => FieldValue::String(s.clone()),
        Literal::Boolean(b) => FieldValue::Boolean(*b),
        Literal::Time(t) => FieldValue::Integer(*t),
        Literal::Duration(d) => FieldValue::Integer(*d),
    }
}
