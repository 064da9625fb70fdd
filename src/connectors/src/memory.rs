// Copyright 2023 FedSQL Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An in-process data source. It executes the same rendered sub-SQL a
//! remote source would receive, over seeded tables, which lets tests
//! drive the whole dispatch path without a running database. Knobs for
//! artificial scan latency and transient acquire failures exist to
//! exercise timeout, cancellation and retry handling.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use catalog::{DataSource, SchemaMeta, SourceKind, TableMeta, TableType};
use common_rows::{MemoryRowStream, Row, SendableRowStream};
use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema, SchemaRef, Value};
use sql::ast;
use sql::dialect::Dialect;
use sql::parser::ParserContext;
use sql::statements::Statement;

use crate::error::{self, Result};
use crate::{Capabilities, Connector, HealthReport, Session};

#[derive(Clone)]
struct MemTable {
    meta: Arc<TableMeta>,
    rows: Arc<Vec<Row>>,
}

#[derive(Default)]
struct Inner {
    /// Keyed by `schema.table`, lower-cased.
    tables: Mutex<BTreeMap<String, MemTable>>,
    scan_delay: Mutex<Option<Duration>>,
    fail_remaining: AtomicUsize,
    acquire_attempts: AtomicUsize,
}

pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    pub fn register_table(&self, schema: &str, meta: TableMeta, rows: Vec<Row>) {
        let key = format!(
            "{}.{}",
            schema.to_ascii_lowercase(),
            meta.name.to_ascii_lowercase()
        );
        self.inner.tables.lock().unwrap().insert(
            key,
            MemTable {
                meta: Arc::new(meta),
                rows: Arc::new(rows),
            },
        );
    }

    /// Delay every scan by `delay`; `None` removes the delay. Used to
    /// simulate slow or blocking sources.
    pub fn set_scan_delay(&self, delay: Option<Duration>) {
        *self.inner.scan_delay.lock().unwrap() = delay;
    }

    /// Make the next `n` session acquisitions fail with a retryable error.
    pub fn fail_next_acquires(&self, n: usize) {
        self.inner
            .fail_remaining
            .store(n, AtomicOrdering::Release);
    }

    /// Total acquisition attempts observed, successful or not.
    pub fn acquire_attempts(&self) -> usize {
        self.inner.acquire_attempts.load(AtomicOrdering::Acquire)
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Memory
    }

    fn native_dialect(&self) -> Dialect {
        Dialect::Standard
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NO_JOIN
    }

    async fn health_check(&self, _source: &DataSource) -> Result<HealthReport> {
        Ok(HealthReport::from_probe(Duration::from_millis(0), None))
    }

    async fn acquire(&self, source: &DataSource) -> Result<Box<dyn Session>> {
        self.inner
            .acquire_attempts
            .fetch_add(1, AtomicOrdering::AcqRel);
        let remaining = self.inner.fail_remaining.load(AtomicOrdering::Acquire);
        if remaining > 0
            && self
                .inner
                .fail_remaining
                .compare_exchange(
                    remaining,
                    remaining - 1,
                    AtomicOrdering::AcqRel,
                    AtomicOrdering::Acquire,
                )
                .is_ok()
        {
            return error::ConnectionRefusedSnafu {
                source_name: source.name.clone(),
                detail: "injected transient failure".to_string(),
            }
            .fail();
        }
        Ok(Box::new(MemorySession {
            inner: self.inner.clone(),
            source_name: source.name.clone(),
        }))
    }

    async fn discover_schema(
        &self,
        source: &DataSource,
        schema: Option<&str>,
    ) -> Result<Vec<SchemaMeta>> {
        let tables = self.inner.tables.lock().unwrap();
        let mut schemas: BTreeMap<String, SchemaMeta> = BTreeMap::new();
        for table in tables.values() {
            let schema_name = table.meta.schema_name.clone();
            if let Some(only) = schema {
                if !schema_name.eq_ignore_ascii_case(only) {
                    continue;
                }
            }
            let entry = schemas
                .entry(schema_name.to_ascii_lowercase())
                .or_insert_with(|| SchemaMeta::physical(schema_name, source.id.clone()));
            *entry = entry.clone().with_table((*table.meta).clone());
        }
        Ok(schemas.into_values().collect())
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    source_name: String,
}

#[async_trait]
impl Session for MemorySession {
    async fn execute_query(self: Box<Self>, sql: &str) -> Result<SendableRowStream> {
        let delay = *self.inner.scan_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let statement =
            ParserContext::parse_single(sql, Dialect::Standard).map_err(|e| exec_error(
                &self.source_name,
                format!("cannot parse pushed sub-query: {e}"),
            ))?;
        let Statement::Query(query) = statement else {
            return Err(exec_error(
                &self.source_name,
                "memory sources only execute SELECT".to_string(),
            ));
        };

        let tables = self.inner.tables.lock().unwrap().clone();
        let (schema, rows) = SelectInterpreter {
            tables: &tables,
            source_name: &self.source_name,
        }
        .run(&query)?;
        Ok(Box::pin(MemoryRowStream::new(schema, rows)))
    }

    async fn execute_update(&mut self, _sql: &str) -> Result<u64> {
        error::UnsupportedOperationSnafu {
            operation: "update",
            kind: SourceKind::Memory.to_string(),
        }
        .fail()
    }

    async fn execute_ddl(&mut self, _sql: &str) -> Result<()> {
        error::UnsupportedOperationSnafu {
            operation: "ddl",
            kind: SourceKind::Memory.to_string(),
        }
        .fail()
    }
}

fn exec_error(source_name: &str, detail: String) -> error::Error {
    error::QueryExecutionSnafu {
        source_name: source_name.to_string(),
        detail,
    }
    .build()
}

/// Evaluates the single-table SELECT subset that pushdown stages emit:
/// projection, WHERE, GROUP BY with the splittable aggregates, ORDER BY,
/// LIMIT and OFFSET.
struct SelectInterpreter<'a> {
    tables: &'a BTreeMap<String, MemTable>,
    source_name: &'a str,
}

impl SelectInterpreter<'_> {
    fn run(&self, query: &ast::Query) -> Result<(SchemaRef, Vec<Row>)> {
        let ast::SetExpr::Select(select) = query.body.as_ref() else {
            return Err(self.unsupported("non-SELECT query body"));
        };
        let table = self.resolve_table(select)?;
        let base_schema = Arc::new(table.meta.row_schema());

        let mut rows: Vec<Row> = Vec::new();
        for row in table.rows.iter() {
            let keep = match &select.selection {
                Some(predicate) => {
                    eval_expr(predicate, &base_schema, row)?.as_bool().unwrap_or(false)
                }
                None => true,
            };
            if keep {
                rows.push(row.clone());
            }
        }

        let group_exprs = match &select.group_by {
            ast::GroupByExpr::Expressions(exprs) => exprs.clone(),
            _ => return Err(self.unsupported("GROUP BY ALL")),
        };
        let has_aggregate = !group_exprs.is_empty()
            || select
                .projection
                .iter()
                .any(|item| projection_expr(item).map(is_aggregate).unwrap_or(false));

        let (out_schema, mut out_rows) = if has_aggregate {
            let (schema, mut grouped) = self.aggregate(select, &group_exprs, &base_schema, rows)?;
            if !query.order_by.is_empty() {
                sort_rows(&query.order_by, &schema, &mut grouped)?;
            }
            (schema, grouped)
        } else {
            // Sorting happens against the base row type before projection so
            // ORDER BY may reference columns the projection drops.
            if !query.order_by.is_empty() {
                sort_rows(&query.order_by, &base_schema, &mut rows)?;
            }
            self.project(select, &base_schema, rows)?
        };

        let offset = match &query.offset {
            Some(offset) => eval_const_usize(&offset.value)?,
            None => 0,
        };
        let limit = match &query.limit {
            Some(limit) => Some(eval_const_usize(limit)?),
            None => None,
        };
        if offset > 0 {
            out_rows.drain(..offset.min(out_rows.len()));
        }
        if let Some(limit) = limit {
            out_rows.truncate(limit);
        }
        Ok((out_schema, out_rows))
    }

    fn resolve_table(&self, select: &ast::Select) -> Result<MemTable> {
        let [table_with_joins] = select.from.as_slice() else {
            return Err(self.unsupported("multi-table FROM"));
        };
        if !table_with_joins.joins.is_empty() {
            return Err(self.unsupported("JOIN"));
        }
        let ast::TableFactor::Table { name, .. } = &table_with_joins.relation else {
            return Err(self.unsupported("derived tables"));
        };
        let parts: Vec<String> = name
            .0
            .iter()
            .map(|i| i.value.to_ascii_lowercase())
            .collect();
        let table_key = |schema: &str, table: &str| format!("{schema}.{table}");

        let tables = self.tables;
        let found = match parts.as_slice() {
            [table] => tables
                .iter()
                .find(|(key, _)| key.ends_with(&format!(".{table}")))
                .map(|(_, t)| t.clone()),
            [schema, table] => tables.get(&table_key(schema, table)).cloned(),
            _ => None,
        };
        found.ok_or_else(|| {
            error::TableNotFoundSnafu {
                schema: parts.first().cloned().unwrap_or_default(),
                table: parts.last().cloned().unwrap_or_default(),
            }
            .build()
        })
    }

    fn project(
        &self,
        select: &ast::Select,
        base_schema: &SchemaRef,
        rows: Vec<Row>,
    ) -> Result<(SchemaRef, Vec<Row>)> {
        // SELECT * short-circuits to the base row type.
        if select.projection.len() == 1
            && matches!(select.projection[0], ast::SelectItem::Wildcard(_))
        {
            return Ok((base_schema.clone(), rows));
        }

        let mut columns = Vec::new();
        let mut exprs = Vec::new();
        for item in &select.projection {
            let (expr, alias) = match item {
                ast::SelectItem::UnnamedExpr(expr) => (expr, None),
                ast::SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                _ => return Err(self.unsupported("qualified wildcard")),
            };
            let name = alias.unwrap_or_else(|| expr_name(expr));
            let data_type = infer_type(expr, base_schema);
            columns.push(ColumnSchema::new(name, data_type, true));
            exprs.push(expr.clone());
        }
        let schema = Arc::new(Schema::new(columns));

        let mut projected = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(exprs.len());
            for expr in &exprs {
                values.push(eval_expr(expr, base_schema, &row)?);
            }
            projected.push(Row::new(values));
        }
        Ok((schema, projected))
    }

    fn aggregate(
        &self,
        select: &ast::Select,
        group_exprs: &[ast::Expr],
        base_schema: &SchemaRef,
        rows: Vec<Row>,
    ) -> Result<(SchemaRef, Vec<Row>)> {
        // Partition rows by group key.
        let mut groups: BTreeMap<String, (Vec<Value>, Vec<Row>)> = BTreeMap::new();
        for row in rows {
            let mut key_values = Vec::with_capacity(group_exprs.len());
            for expr in group_exprs {
                key_values.push(eval_expr(expr, base_schema, &row)?);
            }
            let key = key_values
                .iter()
                .map(|v| format!("{v}"))
                .collect::<Vec<_>>()
                .join("\u{1}");
            groups
                .entry(key)
                .or_insert_with(|| (key_values, Vec::new()))
                .1
                .push(row);
        }
        // A global aggregate over no rows still yields one group.
        if groups.is_empty() && group_exprs.is_empty() {
            groups.insert(String::new(), (Vec::new(), Vec::new()));
        }

        let mut columns = Vec::new();
        let mut outputs: Vec<(Option<usize>, Option<ast::Expr>)> = Vec::new();
        for item in &select.projection {
            let (expr, alias) = match item {
                ast::SelectItem::UnnamedExpr(expr) => (expr, None),
                ast::SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                _ => return Err(self.unsupported("wildcard with GROUP BY")),
            };
            let name = alias.unwrap_or_else(|| expr_name(expr));
            if is_aggregate(expr) {
                columns.push(ColumnSchema::new(name, agg_output_type(expr, base_schema), true));
                outputs.push((None, Some(expr.clone())));
            } else {
                let position = group_exprs.iter().position(|g| g == expr).ok_or_else(|| {
                    self.unsupported("projected column not in GROUP BY")
                })?;
                columns.push(ColumnSchema::new(name, infer_type(expr, base_schema), true));
                outputs.push((Some(position), None));
            }
        }
        let schema = Arc::new(Schema::new(columns));

        let mut result = Vec::with_capacity(groups.len());
        for (_, (key_values, group_rows)) in groups {
            let mut values = Vec::with_capacity(outputs.len());
            for (key_index, agg_expr) in &outputs {
                match (key_index, agg_expr) {
                    (Some(i), _) => values.push(key_values[*i].clone()),
                    (None, Some(expr)) => {
                        values.push(eval_aggregate(expr, base_schema, &group_rows)?)
                    }
                    _ => unreachable!(),
                }
            }
            result.push(Row::new(values));
        }
        Ok((schema, result))
    }

    fn unsupported(&self, what: &str) -> error::Error {
        exec_error(self.source_name, format!("unsupported in memory source: {what}"))
    }
}

fn projection_expr(item: &ast::SelectItem) -> Option<&ast::Expr> {
    match item {
        ast::SelectItem::UnnamedExpr(expr) => Some(expr),
        ast::SelectItem::ExprWithAlias { expr, .. } => Some(expr),
        _ => None,
    }
}

fn is_aggregate(expr: &ast::Expr) -> bool {
    if let ast::Expr::Function(f) = expr {
        let name = f.name.to_string().to_ascii_uppercase();
        matches!(name.as_str(), "COUNT" | "SUM" | "MIN" | "MAX" | "AVG")
    } else {
        false
    }
}

fn expr_name(expr: &ast::Expr) -> String {
    match expr {
        ast::Expr::Identifier(ident) => ident.value.clone(),
        ast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_else(|| expr.to_string()),
        _ => expr.to_string().to_ascii_lowercase(),
    }
}

fn infer_type(expr: &ast::Expr, schema: &SchemaRef) -> ConcreteDataType {
    match expr {
        ast::Expr::Identifier(ident) => schema
            .index_of(&ident.value)
            .map(|i| schema.column_schema(i).data_type)
            .unwrap_or(ConcreteDataType::String),
        ast::Expr::CompoundIdentifier(parts) => parts
            .last()
            .and_then(|i| schema.index_of(&i.value))
            .map(|i| schema.column_schema(i).data_type)
            .unwrap_or(ConcreteDataType::String),
        _ => ConcreteDataType::Double,
    }
}

fn agg_output_type(expr: &ast::Expr, schema: &SchemaRef) -> ConcreteDataType {
    let ast::Expr::Function(f) = expr else {
        return ConcreteDataType::Double;
    };
    match f.name.to_string().to_ascii_uppercase().as_str() {
        "COUNT" => ConcreteDataType::Long,
        "AVG" | "SUM" => ConcreteDataType::Double,
        _ => agg_argument(f)
            .map(|arg| infer_type(arg, schema))
            .unwrap_or(ConcreteDataType::Double),
    }
}

fn agg_argument(f: &ast::Function) -> Option<&ast::Expr> {
    f.args.iter().find_map(|arg| match arg {
        ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(expr)) => Some(expr),
        _ => None,
    })
}

fn eval_aggregate(expr: &ast::Expr, schema: &SchemaRef, rows: &[Row]) -> Result<Value> {
    let ast::Expr::Function(f) = expr else {
        return Err(exec_error("memory", format!("not an aggregate: {expr}")));
    };
    let name = f.name.to_string().to_ascii_uppercase();

    let is_star = f
        .args
        .iter()
        .any(|a| matches!(a, ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard)));
    if name == "COUNT" && is_star {
        return Ok(Value::Long(rows.len() as i64));
    }

    let Some(arg) = agg_argument(f) else {
        return Err(exec_error("memory", format!("missing aggregate argument: {expr}")));
    };
    let mut inputs = Vec::with_capacity(rows.len());
    for row in rows {
        let value = eval_expr(arg, schema, row)?;
        if !value.is_null() {
            inputs.push(value);
        }
    }

    let result = match name.as_str() {
        "COUNT" => Value::Long(inputs.len() as i64),
        "SUM" => {
            if inputs.is_empty() {
                Value::Null
            } else {
                Value::Double(inputs.iter().filter_map(|v| v.as_f64()).sum())
            }
        }
        "AVG" => {
            if inputs.is_empty() {
                Value::Null
            } else {
                let sum: f64 = inputs.iter().filter_map(|v| v.as_f64()).sum();
                Value::Double(sum / inputs.len() as f64)
            }
        }
        "MIN" => inputs
            .into_iter()
            .reduce(|a, b| if a.compare(&b) == Ordering::Less { a } else { b })
            .unwrap_or(Value::Null),
        "MAX" => inputs
            .into_iter()
            .reduce(|a, b| if a.compare(&b) == Ordering::Greater { a } else { b })
            .unwrap_or(Value::Null),
        other => {
            return Err(exec_error("memory", format!("unsupported aggregate {other}")));
        }
    };
    Ok(result)
}

fn sort_rows(
    order_by: &[ast::OrderByExpr],
    schema: &SchemaRef,
    rows: &mut [Row],
) -> Result<()> {
    let mut keys = Vec::with_capacity(order_by.len());
    for order in order_by {
        let name = expr_name(&order.expr);
        let index = schema
            .index_of(&name)
            .ok_or_else(|| exec_error("memory", format!("unknown sort column {name}")))?;
        keys.push((index, order.asc.unwrap_or(true)));
    }
    rows.sort_by(|a, b| {
        for (index, ascending) in &keys {
            let ordering = a.value(*index).compare(b.value(*index));
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn eval_const_usize(expr: &ast::Expr) -> Result<usize> {
    match expr {
        ast::Expr::Value(ast::Value::Number(n, _)) => n
            .parse::<usize>()
            .map_err(|e| exec_error("memory", format!("bad limit literal {n}: {e}"))),
        other => Err(exec_error("memory", format!("non-literal limit {other}"))),
    }
}

fn column_value(schema: &SchemaRef, row: &Row, name: &str) -> Result<Value> {
    schema
        .index_of(name)
        .map(|i| row.value(i).clone())
        .ok_or_else(|| exec_error("memory", format!("unknown column {name}")))
}

fn eval_expr(expr: &ast::Expr, schema: &SchemaRef, row: &Row) -> Result<Value> {
    use ast::Expr;
    let value = match expr {
        Expr::Identifier(ident) => column_value(schema, row, &ident.value)?,
        Expr::CompoundIdentifier(parts) => {
            let name = &parts.last().unwrap().value;
            column_value(schema, row, name)?
        }
        Expr::Value(v) => literal_value(v)?,
        Expr::Nested(inner) => eval_expr(inner, schema, row)?,
        Expr::UnaryOp { op, expr } => {
            let inner = eval_expr(expr, schema, row)?;
            match op {
                ast::UnaryOperator::Not => match inner.as_bool() {
                    Some(b) => Value::Boolean(!b),
                    None => Value::Null,
                },
                ast::UnaryOperator::Minus => match inner {
                    Value::Integer(v) => Value::Integer(-v),
                    Value::Long(v) => Value::Long(-v),
                    Value::Double(v) => Value::Double(-v),
                    _ => Value::Null,
                },
                _ => Value::Null,
            }
        }
        Expr::IsNull(inner) => Value::Boolean(eval_expr(inner, schema, row)?.is_null()),
        Expr::IsNotNull(inner) => Value::Boolean(!eval_expr(inner, schema, row)?.is_null()),
        Expr::BinaryOp { left, op, right } => {
            eval_binary(op, eval_expr(left, schema, row)?, eval_expr(right, schema, row)?)?
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let target = eval_expr(expr, schema, row)?;
            let pattern = eval_expr(pattern, schema, row)?;
            match (target.as_str(), pattern.as_str()) {
                (Some(target), Some(pattern)) => {
                    let matched = like_match(target, pattern);
                    Value::Boolean(matched != *negated)
                }
                _ => Value::Null,
            }
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let target = eval_expr(expr, schema, row)?;
            if target.is_null() {
                Value::Null
            } else {
                let mut found = false;
                for item in list {
                    let candidate = eval_expr(item, schema, row)?;
                    if target.compare(&candidate) == Ordering::Equal && !candidate.is_null() {
                        found = true;
                        break;
                    }
                }
                Value::Boolean(found != *negated)
            }
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let target = eval_expr(expr, schema, row)?;
            let low = eval_expr(low, schema, row)?;
            let high = eval_expr(high, schema, row)?;
            if target.is_null() || low.is_null() || high.is_null() {
                Value::Null
            } else {
                let inside = target.compare(&low) != Ordering::Less
                    && target.compare(&high) != Ordering::Greater;
                Value::Boolean(inside != *negated)
            }
        }
        Expr::Cast { expr, .. } => eval_expr(expr, schema, row)?,
        Expr::Function(f) => eval_scalar_function(f, schema, row)?,
        other => {
            return Err(exec_error("memory", format!("unsupported expression {other}")));
        }
    };
    Ok(value)
}

fn literal_value(v: &ast::Value) -> Result<Value> {
    let value = match v {
        ast::Value::Number(n, _) => {
            if n.contains('.') || n.contains('e') || n.contains('E') {
                Value::Double(
                    n.parse::<f64>()
                        .map_err(|e| exec_error("memory", format!("bad number {n}: {e}")))?,
                )
            } else {
                Value::Long(
                    n.parse::<i64>()
                        .map_err(|e| exec_error("memory", format!("bad number {n}: {e}")))?,
                )
            }
        }
        ast::Value::SingleQuotedString(s) | ast::Value::DoubleQuotedString(s) => {
            Value::String(s.clone())
        }
        ast::Value::Boolean(b) => Value::Boolean(*b),
        ast::Value::Null => Value::Null,
        other => {
            return Err(exec_error("memory", format!("unsupported literal {other}")));
        }
    };
    Ok(value)
}

fn eval_binary(op: &ast::BinaryOperator, left: Value, right: Value) -> Result<Value> {
    use ast::BinaryOperator as Op;

    // Three-valued logic for AND/OR.
    match op {
        Op::And => {
            return Ok(match (left.as_bool(), right.as_bool()) {
                (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            })
        }
        Op::Or => {
            return Ok(match (left.as_bool(), right.as_bool()) {
                (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            })
        }
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    let value = match op {
        Op::Eq => Value::Boolean(left.compare(&right) == Ordering::Equal),
        Op::NotEq => Value::Boolean(left.compare(&right) != Ordering::Equal),
        Op::Lt => Value::Boolean(left.compare(&right) == Ordering::Less),
        Op::LtEq => Value::Boolean(left.compare(&right) != Ordering::Greater),
        Op::Gt => Value::Boolean(left.compare(&right) == Ordering::Greater),
        Op::GtEq => Value::Boolean(left.compare(&right) != Ordering::Less),
        Op::Plus | Op::Minus | Op::Multiply | Op::Divide | Op::Modulo => {
            arithmetic(op, &left, &right)?
        }
        Op::StringConcat => match (left.as_str(), right.as_str()) {
            (Some(l), Some(r)) => Value::String(format!("{l}{r}")),
            _ => Value::Null,
        },
        other => {
            return Err(exec_error("memory", format!("unsupported operator {other}")));
        }
    };
    Ok(value)
}

fn arithmetic(op: &ast::BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    use ast::BinaryOperator as Op;

    // Integer arithmetic stays integral except for division.
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        if !matches!(op, Op::Divide) {
            let result = match op {
                Op::Plus => l.wrapping_add(r),
                Op::Minus => l.wrapping_sub(r),
                Op::Multiply => l.wrapping_mul(r),
                Op::Modulo if r != 0 => l % r,
                Op::Modulo => return Ok(Value::Null),
                _ => unreachable!(),
            };
            return Ok(Value::Long(result));
        }
    }

    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return Ok(Value::Null);
    };
    let value = match op {
        Op::Plus => Value::Double(l + r),
        Op::Minus => Value::Double(l - r),
        Op::Multiply => Value::Double(l * r),
        Op::Divide if r != 0.0 => Value::Double(l / r),
        Op::Divide => Value::Null,
        Op::Modulo if r != 0.0 => Value::Double(l % r),
        Op::Modulo => Value::Null,
        _ => unreachable!(),
    };
    Ok(value)
}

fn eval_scalar_function(f: &ast::Function, schema: &SchemaRef, row: &Row) -> Result<Value> {
    let name = f.name.to_string().to_ascii_uppercase();
    let mut args = Vec::new();
    for arg in &f.args {
        if let ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(expr)) = arg {
            args.push(eval_expr(expr, schema, row)?);
        }
    }
    let value = match name.as_str() {
        "UPPER" => match args.first().and_then(|v| v.as_str()) {
            Some(s) => Value::String(s.to_uppercase()),
            None => Value::Null,
        },
        "LOWER" => match args.first().and_then(|v| v.as_str()) {
            Some(s) => Value::String(s.to_lowercase()),
            None => Value::Null,
        },
        "ABS" => match args.first() {
            Some(Value::Integer(v)) => Value::Integer(v.abs()),
            Some(Value::Long(v)) => Value::Long(v.abs()),
            Some(Value::Double(v)) => Value::Double(v.abs()),
            _ => Value::Null,
        },
        "COALESCE" => args
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        "CONCAT" => {
            let mut out = String::new();
            for arg in &args {
                if arg.is_null() {
                    return Ok(Value::Null);
                }
                out.push_str(&arg.to_string());
            }
            Value::String(out)
        }
        other => {
            return Err(exec_error("memory", format!("unsupported function {other}")));
        }
    };
    Ok(value)
}

/// SQL LIKE with `%` and `_`, case-sensitive.
fn like_match(target: &str, pattern: &str) -> bool {
    fn inner(t: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => t.is_empty(),
            Some((pc, p_rest)) if *pc == '%' => {
                (0..=t.len()).any(|skip| inner(&t[skip..], p_rest))
            }
            Some((pc, p_rest)) => match t.split_first() {
                Some((tc, t_rest)) => (*pc == '_' || pc == tc) && inner(t_rest, p_rest),
                None => false,
            },
        }
    }
    let t: Vec<char> = target.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    inner(&t, &p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::ColumnMeta;
    use common_rows::util;

    fn seeded() -> MemoryConnector {
        let connector = MemoryConnector::new();
        let meta = TableMeta::try_new(
            "users",
            "app",
            TableType::Table,
            vec![
                ColumnMeta::new("id", ConcreteDataType::Integer, false),
                ColumnMeta::new("name", ConcreteDataType::String, true),
                ColumnMeta::new("status", ConcreteDataType::String, true),
                ColumnMeta::new("score", ConcreteDataType::Double, true),
            ],
        )
        .unwrap();
        let rows = vec![
            Row::new(vec![
                Value::Integer(1),
                Value::from("ann"),
                Value::from("active"),
                Value::Double(10.0),
            ]),
            Row::new(vec![
                Value::Integer(2),
                Value::from("bob"),
                Value::from("idle"),
                Value::Double(20.0),
            ]),
            Row::new(vec![
                Value::Integer(3),
                Value::from("cid"),
                Value::from("active"),
                Value::Double(30.0),
            ]),
        ];
        connector.register_table("app", meta, rows);
        connector
    }

    fn source() -> DataSource {
        DataSource::new("mem-1", "mem", SourceKind::Memory, "memory://")
    }

    async fn run(connector: &MemoryConnector, sql: &str) -> Vec<Row> {
        let session = connector.acquire(&source()).await.unwrap();
        let stream = session.execute_query(sql).await.unwrap();
        util::collect(stream).await.unwrap()
    }

    #[tokio::test]
    async fn test_filter_project_limit() {
        let connector = seeded();
        let rows = run(
            &connector,
            "SELECT id, name FROM users WHERE status = 'active' ORDER BY id DESC LIMIT 1",
        )
        .await;
        assert_eq!(1, rows.len());
        assert_eq!(&Value::Integer(3), rows[0].value(0));
        assert_eq!(&Value::from("cid"), rows[0].value(1));
    }

    #[tokio::test]
    async fn test_group_by_aggregates() {
        let connector = seeded();
        let rows = run(
            &connector,
            "SELECT status, COUNT(*) AS cnt, SUM(score) AS total FROM users \
             GROUP BY status ORDER BY status",
        )
        .await;
        assert_eq!(2, rows.len());
        assert_eq!(&Value::from("active"), rows[0].value(0));
        assert_eq!(&Value::Long(2), rows[0].value(1));
        assert_eq!(&Value::Double(40.0), rows[0].value(2));
    }

    #[tokio::test]
    async fn test_like_and_in() {
        let connector = seeded();
        let rows = run(
            &connector,
            "SELECT id FROM users WHERE name LIKE '%b%' OR id IN (3)",
        )
        .await;
        assert_eq!(2, rows.len());
    }

    #[tokio::test]
    async fn test_injected_acquire_failures_are_retryable() {
        use common_error::prelude::ErrorExt;

        let connector = seeded();
        connector.fail_next_acquires(1);
        let err = connector.acquire(&source()).await.unwrap_err();
        assert!(err.status_code().is_retryable());
        assert!(connector.acquire(&source()).await.is_ok());
    }
}
