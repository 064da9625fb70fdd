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

use once_cell::sync::Lazy;
use regex::Regex;
use snafu::ensure;
use sqlparser::ast;
use sqlparser::parser::{Parser, ParserError};

use crate::dialect::Dialect;
use crate::error::{self, Result};
use crate::statements::{DdlStatement, DmlKind, DmlStatement, ShowTables, Statement};

/// Entry point for turning SQL text into [`Statement`]s.
pub struct ParserContext;

impl ParserContext {
    /// Parse possibly multiple `;`-separated statements.
    pub fn create_with_dialect(sql: &str, dialect: Dialect) -> Result<Vec<Statement>> {
        ensure!(!sql.trim().is_empty(), error::EmptyStatementSnafu);

        // SHOW TABLES is intercepted before the grammar so it works in
        // every dialect, including those whose grammar rejects it.
        if let Some(show) = try_parse_show_tables(sql) {
            return Ok(vec![Statement::ShowTables(show)]);
        }

        let raw = Parser::parse_sql(dialect.sqlparser_dialect().as_ref(), sql)
            .map_err(|e| locate_error(e, sql))?;

        raw.into_iter().map(convert_statement).collect()
    }

    /// Parse exactly one statement.
    pub fn parse_single(sql: &str, dialect: Dialect) -> Result<Statement> {
        let mut statements = Self::create_with_dialect(sql, dialect)?;
        ensure!(
            statements.len() == 1,
            error::MultipleStatementsSnafu {
                count: statements.len()
            }
        );
        Ok(statements.remove(0))
    }
}

fn convert_statement(stmt: ast::Statement) -> Result<Statement> {
    match stmt {
        ast::Statement::Query(query) => Ok(Statement::Query(query)),
        ast::Statement::Explain {
            statement, ..
        } => {
            let inner = convert_statement(*statement)?;
            Ok(Statement::Explain(Box::new(inner)))
        }
        ast::Statement::ShowTables {
            db_name, filter, ..
        } => {
            let pattern = match filter {
                Some(ast::ShowStatementFilter::Like(p))
                | Some(ast::ShowStatementFilter::ILike(p)) => Some(p),
                _ => None,
            };
            Ok(Statement::ShowTables(ShowTables {
                schema: db_name.map(|n| n.value),
                pattern,
            }))
        }
        ast::Statement::Insert {
            ref table_name, ..
        } => Ok(Statement::Dml(DmlStatement {
            kind: DmlKind::Insert,
            table: table_name.clone(),
            sql: stmt.to_string(),
        })),
        ast::Statement::Update { ref table, .. } => {
            let table_name = table_factor_name(&table.relation)?;
            Ok(Statement::Dml(DmlStatement {
                kind: DmlKind::Update,
                table: table_name,
                sql: stmt.to_string(),
            }))
        }
        ast::Statement::Delete { ref from, .. } => {
            let first = from
                .first()
                .map(|t| table_factor_name(&t.relation))
                .transpose()?;
            match first {
                Some(table) => Ok(Statement::Dml(DmlStatement {
                    kind: DmlKind::Delete,
                    table,
                    sql: stmt.to_string(),
                })),
                None => error::UnsupportedStatementSnafu {
                    kind: "DELETE without FROM".to_string(),
                }
                .fail(),
            }
        }
        ast::Statement::CreateTable { ref name, .. } => Ok(Statement::Ddl(DdlStatement {
            table: Some(name.clone()),
            sql: stmt.to_string(),
        })),
        ast::Statement::CreateView { ref name, .. } => Ok(Statement::Ddl(DdlStatement {
            table: Some(name.clone()),
            sql: stmt.to_string(),
        })),
        ast::Statement::CreateIndex { .. } | ast::Statement::Truncate { .. } => {
            Ok(Statement::Ddl(DdlStatement {
                table: ddl_target(&stmt),
                sql: stmt.to_string(),
            }))
        }
        ast::Statement::AlterTable { ref name, .. } => Ok(Statement::Ddl(DdlStatement {
            table: Some(name.clone()),
            sql: stmt.to_string(),
        })),
        ast::Statement::Drop { ref names, .. } => Ok(Statement::Ddl(DdlStatement {
            table: names.first().cloned(),
            sql: stmt.to_string(),
        })),
        other => error::UnsupportedStatementSnafu {
            kind: statement_kind(&other),
        }
        .fail(),
    }
}

fn ddl_target(stmt: &ast::Statement) -> Option<ast::ObjectName> {
    match stmt {
        ast::Statement::CreateIndex { table_name, .. } => Some(table_name.clone()),
        ast::Statement::Truncate { table_name, .. } => Some(table_name.clone()),
        _ => None,
    }
}

fn table_factor_name(factor: &ast::TableFactor) -> Result<ast::ObjectName> {
    match factor {
        ast::TableFactor::Table { name, .. } => Ok(name.clone()),
        other => error::UnsupportedStatementSnafu {
            kind: format!("DML over {other}"),
        }
        .fail(),
    }
}

fn statement_kind(stmt: &ast::Statement) -> String {
    // The Display form of a statement starts with its verb.
    stmt.to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

static LOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Line:\s*(\d+),\s*Column:?\s*(\d+)").unwrap());

/// Convert a `sqlparser` error into a located [`error::Error::Syntax`]
/// with a snippet and caret.
fn locate_error(err: ParserError, sql: &str) -> error::Error {
    let msg = match &err {
        ParserError::TokenizerError(m) => m.clone(),
        ParserError::ParserError(m) => m.clone(),
        ParserError::RecursionLimitExceeded => "recursion limit exceeded".to_string(),
    };

    let (line, column) = LOCATION_RE
        .captures(&msg)
        .and_then(|caps| {
            let line = caps.get(1)?.as_str().parse().ok()?;
            let column = caps.get(2)?.as_str().parse().ok()?;
            Some((line, column))
        })
        .unwrap_or((1, 1));

    error::SyntaxSnafu {
        line: line as u64,
        column: column as u64,
        msg,
        snippet: snippet_with_caret(sql, line, column),
    }
    .build()
}

fn snippet_with_caret(sql: &str, line: usize, column: usize) -> String {
    let Some(text) = sql.lines().nth(line.saturating_sub(1)) else {
        return String::new();
    };
    let caret_at = column.saturating_sub(1).min(text.len());
    format!("{text}\n{}^", " ".repeat(caret_at))
}

/// Recognize `SHOW TABLES [FROM|IN <schema>] [LIKE '<pattern>']` without
/// involving the dialect grammar.
fn try_parse_show_tables(sql: &str) -> Option<ShowTables> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let mut tokens = trimmed.split_whitespace();
    if !tokens.next()?.eq_ignore_ascii_case("show") {
        return None;
    }
    if !tokens.next()?.eq_ignore_ascii_case("tables") {
        return None;
    }

    let mut show = ShowTables::default();
    let rest: Vec<&str> = tokens.collect();
    let mut i = 0;
    while i < rest.len() {
        let word = rest[i];
        if (word.eq_ignore_ascii_case("from") || word.eq_ignore_ascii_case("in"))
            && i + 1 < rest.len()
        {
            show.schema = Some(rest[i + 1].trim_matches(['`', '"'].as_slice()).to_string());
            i += 2;
        } else if word.eq_ignore_ascii_case("like") && i + 1 < rest.len() {
            show.pattern = Some(rest[i + 1].trim_matches('\'').to_string());
            i += 2;
        } else {
            // Unrecognized tail; let the grammar report the error.
            return None;
        }
    }
    Some(show)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_query() {
        let statements = ParserContext::create_with_dialect(
            "SELECT id, name FROM users WHERE status = 'active' LIMIT 10",
            Dialect::Mysql,
        )
        .unwrap();
        assert_eq!(1, statements.len());
        assert!(statements[0].is_query());
    }

    #[test]
    fn test_parse_error_carries_location() {
        let err =
            ParserContext::create_with_dialect("SELECT FROM WHERE", Dialect::Standard).unwrap_err();
        let error::Error::Syntax { snippet, .. } = &err else {
            panic!("expected syntax error, got {err:?}");
        };
        assert!(snippet.contains('^'), "snippet should carry a caret");
    }

    #[test]
    fn test_show_tables_intercepted_in_every_dialect() {
        for dialect in Dialect::all() {
            let statements =
                ParserContext::create_with_dialect("SHOW TABLES", *dialect).unwrap();
            assert!(matches!(statements[0], Statement::ShowTables(_)));
        }

        let statements = ParserContext::create_with_dialect(
            "SHOW TABLES FROM sales LIKE 'ord%'",
            Dialect::Postgresql,
        )
        .unwrap();
        let Statement::ShowTables(show) = &statements[0] else {
            panic!();
        };
        assert_eq!(Some("sales"), show.schema.as_deref());
        assert_eq!(Some("ord%"), show.pattern.as_deref());
    }

    #[test]
    fn test_dml_routes_to_table() {
        let statements = ParserContext::create_with_dialect(
            "DELETE FROM orders WHERE id = 4",
            Dialect::Mysql,
        )
        .unwrap();
        let Statement::Dml(dml) = &statements[0] else {
            panic!();
        };
        assert_eq!(DmlKind::Delete, dml.kind);
        assert_eq!("orders", dml.table.to_string());
    }

    #[test]
    fn test_single_statement_enforced() {
        let err = ParserContext::parse_single("SELECT 1; SELECT 2", Dialect::Mysql).unwrap_err();
        assert!(matches!(err, error::Error::MultipleStatements { count: 2, .. }));
    }

    #[test]
    fn test_explain_wraps_inner_statement() {
        let statement =
            ParserContext::parse_single("EXPLAIN SELECT * FROM t", Dialect::Mysql).unwrap();
        let Statement::Explain(inner) = statement else {
            panic!();
        };
        assert!(inner.is_query());
    }
}
