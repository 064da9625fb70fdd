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

//! The standalone translate operation: parse SQL in a source dialect and
//! re-render the syntax tree in a target dialect. Pure; no catalog
//! involved.

use sql::ast;
use sql::dialect::Dialect;
use sql::parser::ParserContext;
use sql::statements::Statement;

use crate::error::{self, Result};
use crate::translator::{oracle_to_percent, pagination_clause, render_function};
use snafu::ResultExt;

/// Translate a single SELECT statement between dialects.
pub fn translate(sql_text: &str, from: Dialect, to: Dialect) -> Result<String> {
    let statement =
        ParserContext::parse_single(sql_text, from).context(error::ParseSqlSnafu)?;
    let Statement::Query(query) = statement else {
        return error::UnsupportedFeatureSnafu {
            feature: format!("translate of a {} statement", statement.kind()),
            suggestion: Some("only SELECT queries translate".into()),
        }
        .fail();
    };
    let renderer = Renderer { to };
    renderer.query(&query)
}

struct Renderer {
    to: Dialect,
}

impl Renderer {
    fn query(&self, query: &ast::Query) -> Result<String> {
        if query.with.is_some() {
            return self.unsupported("WITH clause");
        }
        let mut sql = self.set_expr(&query.body)?;

        if !query.order_by.is_empty() {
            let keys = query
                .order_by
                .iter()
                .map(|k| self.order_key(k))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
        }

        let skip = match &query.offset {
            Some(offset) => self.numeric(&offset.value)?,
            None => 0,
        };
        // LIMIT and FETCH FIRST are two spellings of the same bound.
        let mut fetch = query
            .limit
            .as_ref()
            .map(|l| self.numeric(l))
            .transpose()?;
        if fetch.is_none() {
            if let Some(clause) = &query.fetch {
                if let Some(quantity) = &clause.quantity {
                    fetch = Some(self.numeric(quantity)?);
                }
            }
        }

        if skip == 0 && fetch.is_some() && self.to == Dialect::Sqlserver {
            // TOP belongs right after SELECT.
            let fetch = fetch.unwrap();
            if let Some(rest) = sql.strip_prefix("SELECT ") {
                sql = format!("SELECT TOP {fetch} {rest}");
            }
        } else if skip > 0 || fetch.is_some() {
            sql.push_str(&pagination_clause(
                self.to,
                skip,
                fetch,
                !query.order_by.is_empty(),
            )?);
        }
        Ok(sql)
    }

    fn set_expr(&self, body: &ast::SetExpr) -> Result<String> {
        match body {
            ast::SetExpr::Select(select) => self.select(select),
            ast::SetExpr::Query(inner) => Ok(format!("({})", self.query(inner)?)),
            ast::SetExpr::SetOperation {
                op: ast::SetOperator::Union,
                set_quantifier,
                left,
                right,
            } => {
                let keyword = match set_quantifier {
                    ast::SetQuantifier::All => "UNION ALL",
                    _ => "UNION",
                };
                Ok(format!(
                    "{} {} {}",
                    self.set_expr(left)?,
                    keyword,
                    self.set_expr(right)?
                ))
            }
            other => self.unsupported(&format!("query body {other}")),
        }
    }

    fn select(&self, select: &ast::Select) -> Result<String> {
        let mut sql = String::from("SELECT ");
        if select.distinct.is_some() {
            sql.push_str("DISTINCT ");
        }

        let items = select
            .projection
            .iter()
            .map(|item| self.projection_item(item))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&items.join(", "));

        if !select.from.is_empty() {
            let tables = select
                .from
                .iter()
                .map(|t| self.table_with_joins(t))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" FROM {}", tables.join(", ")));
        }
        if let Some(selection) = &select.selection {
            sql.push_str(&format!(" WHERE {}", self.expr(selection)?));
        }
        match &select.group_by {
            ast::GroupByExpr::Expressions(exprs) if !exprs.is_empty() => {
                let keys = exprs
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<Vec<_>>>()?;
                sql.push_str(&format!(" GROUP BY {}", keys.join(", ")));
            }
            ast::GroupByExpr::All => return self.unsupported("GROUP BY ALL"),
            _ => {}
        }
        if let Some(having) = &select.having {
            sql.push_str(&format!(" HAVING {}", self.expr(having)?));
        }
        Ok(sql)
    }

    fn projection_item(&self, item: &ast::SelectItem) -> Result<String> {
        match item {
            ast::SelectItem::Wildcard(_) => Ok("*".to_string()),
            ast::SelectItem::QualifiedWildcard(name, _) => {
                Ok(format!("{}.*", self.object_name(name)))
            }
            ast::SelectItem::UnnamedExpr(expr) => self.expr(expr),
            ast::SelectItem::ExprWithAlias { expr, alias } => Ok(format!(
                "{} AS {}",
                self.expr(expr)?,
                self.ident(alias)
            )),
        }
    }

    fn table_with_joins(&self, table: &ast::TableWithJoins) -> Result<String> {
        let mut sql = self.table_factor(&table.relation)?;
        for join in &table.joins {
            let right = self.table_factor(&join.relation)?;
            let (keyword, constraint) = match &join.join_operator {
                ast::JoinOperator::Inner(c) => ("JOIN", Some(c)),
                ast::JoinOperator::LeftOuter(c) => ("LEFT JOIN", Some(c)),
                ast::JoinOperator::RightOuter(c) => ("RIGHT JOIN", Some(c)),
                ast::JoinOperator::FullOuter(c) => {
                    if self.to == Dialect::Mysql {
                        return error::UnsupportedFeatureSnafu {
                            feature: "FULL OUTER JOIN in dialect mysql".to_string(),
                            suggestion: Some(
                                "rewrite as a UNION of LEFT and RIGHT joins".into(),
                            ),
                        }
                        .fail();
                    }
                    ("FULL OUTER JOIN", Some(c))
                }
                ast::JoinOperator::CrossJoin => ("CROSS JOIN", None),
                other => {
                    return self.unsupported(&format!("join operator {other:?}"));
                }
            };
            sql.push_str(&format!(" {keyword} {right}"));
            if let Some(constraint) = constraint {
                match constraint {
                    ast::JoinConstraint::On(expr) => {
                        sql.push_str(&format!(" ON {}", self.expr(expr)?));
                    }
                    ast::JoinConstraint::Using(columns) => {
                        let names: Vec<String> =
                            columns.iter().map(|c| self.ident(c)).collect();
                        sql.push_str(&format!(" USING ({})", names.join(", ")));
                    }
                    ast::JoinConstraint::Natural => {
                        return self.unsupported("NATURAL JOIN");
                    }
                    ast::JoinConstraint::None => {}
                }
            }
        }
        Ok(sql)
    }

    fn table_factor(&self, factor: &ast::TableFactor) -> Result<String> {
        match factor {
            ast::TableFactor::Table { name, alias, .. } => {
                let mut sql = self.object_name(name);
                if let Some(alias) = alias {
                    sql.push_str(&format!(" AS {}", self.ident(&alias.name)));
                }
                Ok(sql)
            }
            ast::TableFactor::Derived {
                subquery, alias, ..
            } => {
                let mut sql = format!("({})", self.query(subquery)?);
                if let Some(alias) = alias {
                    sql.push_str(&format!(" AS {}", self.ident(&alias.name)));
                }
                Ok(sql)
            }
            ast::TableFactor::NestedJoin {
                table_with_joins, ..
            } => Ok(format!("({})", self.table_with_joins(table_with_joins)?)),
            other => self.unsupported(&format!("table factor {other}")),
        }
    }

    fn order_key(&self, key: &ast::OrderByExpr) -> Result<String> {
        let mut sql = self.expr(&key.expr)?;
        match key.asc {
            Some(true) => sql.push_str(" ASC"),
            Some(false) => sql.push_str(" DESC"),
            None => {}
        }
        Ok(sql)
    }

    fn expr(&self, expr: &ast::Expr) -> Result<String> {
        use ast::Expr as E;
        let rendered = match expr {
            E::Identifier(ident) => self.ident(ident),
            E::CompoundIdentifier(parts) => parts
                .iter()
                .map(|p| self.ident(p))
                .collect::<Vec<_>>()
                .join("."),
            E::Value(value) => self.value(value)?,
            E::Nested(inner) => format!("({})", self.expr(inner)?),
            E::UnaryOp { op, expr } => match op {
                ast::UnaryOperator::Not => format!("NOT {}", self.expr(expr)?),
                ast::UnaryOperator::Minus => format!("-{}", self.expr(expr)?),
                ast::UnaryOperator::Plus => self.expr(expr)?,
                other => return self.unsupported(&format!("unary operator {other}")),
            },
            E::BinaryOp { left, op, right } => {
                let op_text = match op {
                    ast::BinaryOperator::StringConcat => {
                        return render_function(
                            self.to,
                            "CONCAT",
                            vec![self.expr(left)?, self.expr(right)?],
                        );
                    }
                    other => other.to_string(),
                };
                format!("{} {} {}", self.expr(left)?, op_text, self.expr(right)?)
            }
            E::IsNull(inner) => format!("{} IS NULL", self.expr(inner)?),
            E::IsNotNull(inner) => format!("{} IS NOT NULL", self.expr(inner)?),
            E::Like {
                negated,
                expr,
                pattern,
                ..
            } => format!(
                "{} {}LIKE {}",
                self.expr(expr)?,
                if *negated { "NOT " } else { "" },
                self.expr(pattern)?
            ),
            E::InList {
                expr,
                list,
                negated,
            } => {
                let items = list
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<Vec<_>>>()?;
                format!(
                    "{} {}IN ({})",
                    self.expr(expr)?,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                )
            }
            E::InSubquery {
                expr,
                subquery,
                negated,
            } => format!(
                "{} {}IN ({})",
                self.expr(expr)?,
                if *negated { "NOT " } else { "" },
                self.query(subquery)?
            ),
            E::Exists { subquery, negated } => format!(
                "{}EXISTS ({})",
                if *negated { "NOT " } else { "" },
                self.query(subquery)?
            ),
            E::Between {
                expr,
                negated,
                low,
                high,
            } => format!(
                "{} {}BETWEEN {} AND {}",
                self.expr(expr)?,
                if *negated { "NOT " } else { "" },
                self.expr(low)?,
                self.expr(high)?
            ),
            E::Cast {
                expr, data_type, ..
            } => format!("CAST({} AS {})", self.expr(expr)?, data_type),
            E::Function(function) => self.function(function)?,
            other => return self.unsupported(&format!("expression {other}")),
        };
        Ok(rendered)
    }

    fn function(&self, function: &ast::Function) -> Result<String> {
        let written = function.name.to_string().to_ascii_uppercase();
        let mut args = Vec::new();
        for arg in &function.args {
            match arg {
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => {
                    args.push("*".to_string());
                }
                ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                    args.push(self.expr(e)?);
                }
                other => return self.unsupported(&format!("function argument {other}")),
            }
        }

        // Collapse source spellings onto the canonical name; patterns
        // written Oracle-style become %-style canonically.
        let canonical = match written.as_str() {
            "NVL" | "IFNULL" => "COALESCE".to_string(),
            "LEN" => "LENGTH".to_string(),
            "TO_CHAR" => {
                if let Some(pattern) = args.get_mut(1) {
                    *pattern = oracle_to_percent(pattern);
                }
                "DATE_FORMAT".to_string()
            }
            "DATETIME_FORMAT" => "DATE_FORMAT".to_string(),
            other => other.to_string(),
        };
        render_function(self.to, &canonical, args)
    }

    fn value(&self, value: &ast::Value) -> Result<String> {
        let rendered = match value {
            ast::Value::Number(n, _) => n.clone(),
            ast::Value::SingleQuotedString(s) => {
                format!("'{}'", s.replace('\'', "''"))
            }
            ast::Value::DoubleQuotedString(s) => {
                // Double-quoted strings are a mysql-ism; normalize.
                format!("'{}'", s.replace('\'', "''"))
            }
            ast::Value::Boolean(b) => self.to.boolean_literal(*b).to_string(),
            ast::Value::Null => "NULL".to_string(),
            other => return self.unsupported(&format!("literal {other}")),
        };
        Ok(rendered)
    }

    fn numeric(&self, expr: &ast::Expr) -> Result<usize> {
        match expr {
            ast::Expr::Value(ast::Value::Number(n, _)) => n.parse::<usize>().map_err(|_| {
                error::UnsupportedFeatureSnafu {
                    feature: format!("non-integer row bound {n}"),
                    suggestion: None,
                }
                .build()
            }),
            other => self.unsupported(&format!("non-literal row bound {other}")),
        }
    }

    fn ident(&self, ident: &ast::Ident) -> String {
        match ident.quote_style {
            Some(_) => self.to.quote_identifier(&ident.value),
            None => ident.value.clone(),
        }
    }

    fn object_name(&self, name: &ast::ObjectName) -> String {
        name.0
            .iter()
            .map(|i| self.ident(i))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn unsupported<T>(&self, feature: &str) -> Result<T> {
        error::UnsupportedFeatureSnafu {
            feature: feature.to_string(),
            suggestion: None,
        }
        .fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_translates_to_fetch_first() {
        let out = translate("SELECT * FROM users LIMIT 10", Dialect::Mysql, Dialect::Oracle)
            .unwrap();
        assert_eq!("SELECT * FROM users FETCH FIRST 10 ROWS ONLY", out);

        // And back to an equivalent mysql form.
        let back = translate(&out, Dialect::Oracle, Dialect::Mysql).unwrap();
        assert!(back.contains("LIMIT 10"), "got: {back}");
    }

    #[test]
    fn test_same_dialect_round_trip_parses_equal() {
        let sql = "SELECT id, name FROM users WHERE status = 'active' ORDER BY id DESC LIMIT 5";
        let out = translate(sql, Dialect::Mysql, Dialect::Mysql).unwrap();
        let original = ParserContext::parse_single(sql, Dialect::Mysql).unwrap();
        let reparsed = ParserContext::parse_single(&out, Dialect::Mysql).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_top_for_sqlserver() {
        let out = translate(
            "SELECT id FROM users LIMIT 3",
            Dialect::Mysql,
            Dialect::Sqlserver,
        )
        .unwrap();
        assert_eq!("SELECT TOP 3 id FROM users", out);
    }

    #[test]
    fn test_nvl_normalizes_to_coalesce() {
        let out = translate(
            "SELECT NVL(name, 'missing') FROM users",
            Dialect::Oracle,
            Dialect::Postgresql,
        )
        .unwrap();
        assert!(out.contains("COALESCE(name, 'missing')"), "got: {out}");
    }

    #[test]
    fn test_date_format_crosses_pattern_styles() {
        let out = translate(
            "SELECT DATE_FORMAT(created, '%Y-%m-%d') FROM t",
            Dialect::Mysql,
            Dialect::Oracle,
        )
        .unwrap();
        assert!(out.contains("TO_CHAR(created, 'YYYY-MM-DD')"), "got: {out}");
    }

    #[test]
    fn test_non_select_rejected() {
        let err = translate("DELETE FROM t", Dialect::Mysql, Dialect::Oracle).unwrap_err();
        assert!(matches!(err, error::Error::UnsupportedFeature { .. }));
    }
}
