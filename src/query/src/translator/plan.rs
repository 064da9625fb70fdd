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

//! Renders a pushdown plan subtree back to SQL text in a source's native
//! dialect. Nodes fold into one SELECT where slots are free; otherwise
//! the child nests as a derived table and later references drop their
//! relation qualifier.

use sql::dialect::Dialect;

use crate::error::{self, Result};
use crate::expr::{AggregateFunc, BinaryOp, Expr};
use crate::plan::{AggregateMode, JoinType, LogicalPlan, TableScan};
use crate::translator::{pagination_clause, render_function, render_literal};

pub fn render_plan(plan: &LogicalPlan, dialect: Dialect) -> Result<String> {
    let mut counter = 0;
    render(plan, dialect, &mut counter)
}

fn render(plan: &LogicalPlan, dialect: Dialect, counter: &mut usize) -> Result<String> {
    if let LogicalPlan::Union(union) = plan {
        let mut rendered = Vec::with_capacity(union.inputs.len());
        for input in &union.inputs {
            rendered.push(render(input, dialect, counter)?);
        }
        return Ok(rendered.join(" UNION ALL "));
    }
    let mut parts = build(plan, dialect, counter)?;

    // The stage consumer relies on the column order of the subtree schema;
    // make the projection explicit when nothing set one.
    if parts.projections.is_empty() {
        let schema = plan.schema();
        for column in schema.column_schemas() {
            let relation = if parts.qualify {
                column.relation.as_deref()
            } else {
                None
            };
            parts.projections.push(qualified(relation, &column.name, dialect));
        }
    }
    assemble(parts, dialect)
}

/// One SELECT statement under construction.
struct SelectParts {
    projections: Vec<String>,
    from: String,
    joins: Vec<String>,
    wheres: Vec<String>,
    group_by: Vec<String>,
    having: Vec<String>,
    order_by: Vec<String>,
    skip: usize,
    fetch: Option<usize>,
    has_aggregate: bool,
    /// Whether column references may keep their relation qualifier; after
    /// nesting into a derived table they may not.
    qualify: bool,
}

impl SelectParts {
    fn over(from: String, qualify: bool) -> Self {
        Self {
            projections: Vec::new(),
            from,
            joins: Vec::new(),
            wheres: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            skip: 0,
            fetch: None,
            has_aggregate: false,
            qualify,
        }
    }

    fn has_pagination(&self) -> bool {
        self.skip > 0 || self.fetch.is_some()
    }

    fn must_nest_below_projection(&self) -> bool {
        self.has_aggregate || self.has_pagination() || !self.order_by.is_empty()
    }
}

fn build(plan: &LogicalPlan, dialect: Dialect, counter: &mut usize) -> Result<SelectParts> {
    match plan {
        LogicalPlan::TableScan(scan) => build_scan(scan, dialect),
        LogicalPlan::Filter(filter) => {
            let mut parts = build(&filter.input, dialect, counter)?;
            if parts.has_pagination() {
                parts = nest(parts, dialect, counter)?;
            }
            let rendered = render_expr(&filter.predicate, dialect, parts.qualify)?;
            if parts.has_aggregate {
                parts.having.push(rendered);
            } else {
                parts.wheres.push(rendered);
            }
            Ok(parts)
        }
        LogicalPlan::Project(project) => {
            let mut parts = build(&project.input, dialect, counter)?;
            // An identity projection adds nothing to the rendered SELECT.
            let child_width = project.input.schema().num_columns();
            let identity = project.exprs.len() == child_width
                && project.exprs.iter().enumerate().all(|(i, (expr, name))| {
                    matches!(expr, Expr::Column(c) if c.index == i && &c.name == name)
                });
            if identity {
                return Ok(parts);
            }
            // Projection is row-for-row, so it composes with pagination and
            // ordering; only aggregate output aliases force a derived table.
            if parts.has_aggregate {
                parts = nest(parts, dialect, counter)?;
            }
            parts.projections.clear();
            for (expr, name) in &project.exprs {
                parts
                    .projections
                    .push(projection_item(expr, name, dialect, parts.qualify)?);
            }
            Ok(parts)
        }
        LogicalPlan::Aggregate(agg) => {
            let mut parts = build(&agg.input, dialect, counter)?;
            if parts.must_nest_below_projection() {
                parts = nest(parts, dialect, counter)?;
            }
            parts.projections.clear();
            for (expr, name) in &agg.group_exprs {
                parts
                    .projections
                    .push(projection_item(expr, name, dialect, parts.qualify)?);
                parts
                    .group_by
                    .push(render_expr(expr, dialect, parts.qualify)?);
            }
            for aggregate in &agg.aggregates {
                let arg = match &aggregate.arg {
                    Some(expr) => render_expr(expr, dialect, parts.qualify)?,
                    None => "*".to_string(),
                };
                let distinct = if aggregate.distinct { "DISTINCT " } else { "" };
                match (agg.mode, aggregate.func) {
                    // The partial half of AVG ships its sum and count.
                    (AggregateMode::Partial, AggregateFunc::Avg) => {
                        parts.projections.push(format!(
                            "SUM({arg}) AS {}",
                            quote_alias(&format!("{}_sum", aggregate.alias), dialect)
                        ));
                        parts.projections.push(format!(
                            "COUNT({arg}) AS {}",
                            quote_alias(&format!("{}_count", aggregate.alias), dialect)
                        ));
                    }
                    _ => {
                        parts.projections.push(format!(
                            "{}({distinct}{arg}) AS {}",
                            aggregate.func.name(),
                            quote_alias(&aggregate.alias, dialect)
                        ));
                    }
                }
            }
            if parts.projections.is_empty() {
                parts.projections.push("COUNT(*)".to_string());
            }
            parts.has_aggregate = true;
            Ok(parts)
        }
        LogicalPlan::Sort(sort) => {
            let mut parts = build(&sort.input, dialect, counter)?;
            if parts.has_pagination() {
                parts = nest(parts, dialect, counter)?;
            }
            for key in &sort.exprs {
                let rendered = render_expr(&key.expr, dialect, parts.qualify)?;
                let direction = if key.ascending { "ASC" } else { "DESC" };
                parts.order_by.push(format!("{rendered} {direction}"));
            }
            if let Some(fetch) = sort.fetch {
                parts.fetch = Some(parts.fetch.map_or(fetch, |f| f.min(fetch)));
            }
            Ok(parts)
        }
        LogicalPlan::Limit(limit) => {
            let mut parts = build(&limit.input, dialect, counter)?;
            if parts.has_pagination() && limit.skip > 0 {
                parts = nest(parts, dialect, counter)?;
            }
            parts.skip += limit.skip;
            parts.fetch = match (parts.fetch, limit.fetch) {
                (Some(existing), Some(new)) => Some(existing.min(new)),
                (None, new) => new,
                (existing, None) => existing,
            };
            Ok(parts)
        }
        LogicalPlan::Join(join) => build_join(join, dialect, counter),
        LogicalPlan::Union(_) => {
            let sql = render(plan, dialect, counter)?;
            *counter += 1;
            Ok(SelectParts::over(format!("({sql}) AS sub{counter}"), false))
        }
    }
}

fn scan_from(scan: &TableScan, dialect: Dialect) -> String {
    let mut from = format!(
        "{}.{}",
        maybe_quote(&scan.schema_name, dialect),
        maybe_quote(&scan.table_name, dialect)
    );
    if scan.alias != scan.table_name {
        from.push_str(&format!(" AS {}", maybe_quote(&scan.alias, dialect)));
    }
    from
}

fn build_scan(scan: &TableScan, dialect: Dialect) -> Result<SelectParts> {
    // A scan rendered on its own stays a single-table SELECT (joins fold
    // scans through their own path), so references need no qualifier.
    let mut parts = SelectParts::over(scan_from(scan, dialect), false);
    parts.fetch = scan.fetch;
    if let Some(projection) = &scan.projection {
        for index in projection {
            let column = scan.table_schema.column_schema(*index);
            parts.projections.push(maybe_quote(&column.name, dialect));
        }
    }
    for filter in &scan.filters {
        parts.wheres.push(render_expr(filter, dialect, false)?);
    }
    Ok(parts)
}

fn build_join(
    join: &crate::plan::Join,
    dialect: Dialect,
    counter: &mut usize,
) -> Result<SelectParts> {
    if matches!(join.join_type, JoinType::LeftSemi | JoinType::LeftAnti) {
        return error::UnsupportedFeatureSnafu {
            feature: "semi/anti join pushdown".to_string(),
            suggestion: None,
        }
        .fail();
    }
    if join.join_type == JoinType::Full && dialect == Dialect::Mysql {
        return error::UnsupportedFeatureSnafu {
            feature: "FULL OUTER JOIN in dialect mysql".to_string(),
            suggestion: Some("rewrite as a UNION of LEFT and RIGHT joins".into()),
        }
        .fail();
    }

    // The left side folds when it is a scan or another join; scans keep
    // their alias so the ON condition can reference it.
    let mut parts = match join.left.as_ref() {
        LogicalPlan::TableScan(scan) => {
            let mut parts = SelectParts::over(scan_from(scan, dialect), true);
            for filter in &scan.filters {
                parts.wheres.push(render_expr(filter, dialect, true)?);
            }
            if scan.fetch.is_some() {
                parts = nest(parts_with_fetch(parts, scan.fetch), dialect, counter)?;
            }
            parts
        }
        LogicalPlan::Join(_) => build(&join.left, dialect, counter)?,
        other => {
            let sql = render(other, dialect, counter)?;
            let alias = side_alias(other, counter);
            SelectParts::over(format!("({sql}) AS {}", maybe_quote(&alias, dialect)), true)
        }
    };

    let (right_from, mut on_extra) = match join.right.as_ref() {
        LogicalPlan::TableScan(scan) if scan.fetch.is_none() => {
            let mut extra = Vec::new();
            for filter in &scan.filters {
                extra.push(render_expr(filter, dialect, true)?);
            }
            (scan_from(scan, dialect), extra)
        }
        other => {
            let sql = render(other, dialect, counter)?;
            let alias = side_alias(other, counter);
            (
                format!("({sql}) AS {}", maybe_quote(&alias, dialect)),
                Vec::new(),
            )
        }
    };

    let mut conditions = Vec::new();
    for (left_key, right_key) in &join.on {
        conditions.push(format!(
            "{} = {}",
            render_expr(left_key, dialect, true)?,
            render_expr(right_key, dialect, true)?
        ));
    }
    if let Some(filter) = &join.filter {
        conditions.push(render_expr(filter, dialect, true)?);
    }
    conditions.append(&mut on_extra);

    let on = if conditions.is_empty() {
        "1 = 1".to_string()
    } else {
        conditions.join(" AND ")
    };
    parts.joins.push(format!(
        "{} {} ON {}",
        join.join_type.sql_keyword(),
        right_from,
        on
    ));
    Ok(parts)
}

/// The alias a nested join side is visible under: the shared relation of
/// its output columns when there is one.
fn side_alias(plan: &LogicalPlan, counter: &mut usize) -> String {
    let schema = plan.schema();
    let relations: Vec<&str> = schema
        .column_schemas()
        .iter()
        .filter_map(|c| c.relation.as_deref())
        .collect();
    if !relations.is_empty() && relations.iter().all(|r| *r == relations[0]) {
        relations[0].to_string()
    } else {
        *counter += 1;
        format!("sub{counter}")
    }
}

fn parts_with_fetch(mut parts: SelectParts, fetch: Option<usize>) -> SelectParts {
    parts.fetch = fetch;
    parts
}

/// Render a finished SELECT and wrap it as a derived table.
fn nest(parts: SelectParts, dialect: Dialect, counter: &mut usize) -> Result<SelectParts> {
    let sql = assemble(parts, dialect)?;
    *counter += 1;
    Ok(SelectParts::over(format!("({sql}) AS sub{counter}"), false))
}

fn assemble(parts: SelectParts, dialect: Dialect) -> Result<String> {
    let mut sql = String::from("SELECT ");

    // sqlserver takes TOP in the projection when there is no offset.
    let top_handled = dialect == Dialect::Sqlserver && parts.skip == 0;
    if top_handled {
        if let Some(fetch) = parts.fetch {
            sql.push_str(&format!("TOP {fetch} "));
        }
    }

    if parts.projections.is_empty() {
        sql.push('*');
    } else {
        sql.push_str(&parts.projections.join(", "));
    }
    sql.push_str(&format!(" FROM {}", parts.from));
    for join in &parts.joins {
        sql.push(' ');
        sql.push_str(join);
    }
    if !parts.wheres.is_empty() {
        sql.push_str(&format!(" WHERE {}", parts.wheres.join(" AND ")));
    }
    if !parts.group_by.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", parts.group_by.join(", ")));
    }
    if !parts.having.is_empty() {
        sql.push_str(&format!(" HAVING {}", parts.having.join(" AND ")));
    }
    if !parts.order_by.is_empty() {
        sql.push_str(&format!(" ORDER BY {}", parts.order_by.join(", ")));
    }

    if !top_handled {
        sql.push_str(&pagination_clause(
            dialect,
            parts.skip,
            parts.fetch,
            !parts.order_by.is_empty(),
        )?);
    }
    Ok(sql)
}

fn projection_item(expr: &Expr, name: &str, dialect: Dialect, qualify: bool) -> Result<String> {
    let rendered = render_expr(expr, dialect, qualify)?;
    let natural = expr.output_name();
    if natural == name {
        Ok(rendered)
    } else {
        Ok(format!("{rendered} AS {}", quote_alias(name, dialect)))
    }
}

pub(crate) fn render_expr(expr: &Expr, dialect: Dialect, qualify: bool) -> Result<String> {
    let rendered = match expr {
        Expr::Column(c) => {
            let relation = if qualify { c.relation.as_deref() } else { None };
            qualified(relation, &c.name, dialect)
        }
        Expr::Literal(value) => render_literal(dialect, value)?,
        Expr::BinaryOp { left, op, right } => {
            let left = render_expr(left, dialect, qualify)?;
            let right = render_expr(right, dialect, qualify)?;
            if *op == BinaryOp::Concat {
                render_function(dialect, "CONCAT", vec![left, right])?
            } else {
                format!("{left} {} {right}", op.sql_symbol())
            }
        }
        Expr::Not(inner) => format!("NOT ({})", render_expr(inner, dialect, qualify)?),
        Expr::Negative(inner) => format!("-({})", render_expr(inner, dialect, qualify)?),
        Expr::IsNull(inner) => {
            format!("{} IS NULL", render_expr(inner, dialect, qualify)?)
        }
        Expr::IsNotNull(inner) => {
            format!("{} IS NOT NULL", render_expr(inner, dialect, qualify)?)
        }
        Expr::Like {
            negated,
            expr,
            pattern,
        } => format!(
            "{} {}LIKE {}",
            render_expr(expr, dialect, qualify)?,
            if *negated { "NOT " } else { "" },
            render_expr(pattern, dialect, qualify)?
        ),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let items = list
                .iter()
                .map(|e| render_expr(e, dialect, qualify))
                .collect::<Result<Vec<_>>>()?;
            format!(
                "{} {}IN ({})",
                render_expr(expr, dialect, qualify)?,
                if *negated { "NOT " } else { "" },
                items.join(", ")
            )
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => format!(
            "{} {}BETWEEN {} AND {}",
            render_expr(expr, dialect, qualify)?,
            if *negated { "NOT " } else { "" },
            render_expr(low, dialect, qualify)?,
            render_expr(high, dialect, qualify)?
        ),
        Expr::Function { name, args } => {
            let rendered = args
                .iter()
                .map(|a| render_expr(a, dialect, qualify))
                .collect::<Result<Vec<_>>>()?;
            render_function(dialect, name, rendered)?
        }
        Expr::Cast { expr, to } => {
            let inner = render_expr(expr, dialect, qualify)?;
            let target = cast_type_name(*to, dialect);
            format!("CAST({inner} AS {target})")
        }
        Expr::InSubquery { .. } | Expr::Exists { .. } => {
            return error::UnsupportedFeatureSnafu {
                feature: "subquery in pushed predicate".to_string(),
                suggestion: None,
            }
            .fail();
        }
    };
    Ok(rendered)
}

fn cast_type_name(to: datatypes::prelude::ConcreteDataType, dialect: Dialect) -> &'static str {
    use datatypes::prelude::ConcreteDataType as T;
    match (to, dialect) {
        (T::String, Dialect::Mysql) => "CHAR",
        (T::String, Dialect::Oracle) => "VARCHAR2(4000)",
        (T::String, _) => "VARCHAR",
        (T::Integer, Dialect::Mysql) | (T::Long, Dialect::Mysql) => "SIGNED",
        (T::Integer, _) => "INTEGER",
        (T::Long, Dialect::Oracle) => "NUMBER(19)",
        (T::Long, _) => "BIGINT",
        (T::Double, Dialect::Mysql) => "DECIMAL(38, 10)",
        (T::Double, Dialect::Oracle) => "BINARY_DOUBLE",
        (T::Double, _) => "DOUBLE PRECISION",
        (T::Boolean, Dialect::Oracle) | (T::Boolean, Dialect::Sqlserver) => "NUMBER(1)",
        (T::Boolean, _) => "BOOLEAN",
        (T::Date, _) => "DATE",
        (T::Timestamp, _) => "TIMESTAMP",
        (T::Binary, Dialect::Postgresql) => "BYTEA",
        (T::Binary, _) => "BLOB",
        (T::Json, _) => "JSON",
        (T::Array, _) => "ARRAY",
    }
}

fn qualified(relation: Option<&str>, name: &str, dialect: Dialect) -> String {
    match relation {
        Some(rel) => format!(
            "{}.{}",
            maybe_quote(rel, dialect),
            maybe_quote(name, dialect)
        ),
        None => maybe_quote(name, dialect),
    }
}

fn quote_alias(name: &str, dialect: Dialect) -> String {
    maybe_quote(name, dialect)
}

/// Quote only identifiers that need it: non-word characters or reserved
/// words.
fn maybe_quote(name: &str, dialect: Dialect) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !is_reserved(name);
    if plain {
        name.to_string()
    } else {
        dialect.quote_identifier(name)
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "select"
            | "from"
            | "where"
            | "group"
            | "order"
            | "by"
            | "join"
            | "table"
            | "user"
            | "limit"
            | "offset"
            | "union"
            | "having"
            | "desc"
            | "asc"
            | "and"
            | "or"
            | "not"
            | "in"
            | "as"
            | "on"
    )
}
