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

use sqlparser::ast;

/// The statement surface the engine accepts.
///
/// Queries are planned and federated; SHOW TABLES is answered from the
/// catalog; DML and DDL pass through to the single data source that owns
/// the target table.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Query(Box<ast::Query>),
    ShowTables(ShowTables),
    Explain(Box<Statement>),
    Dml(DmlStatement),
    Ddl(DdlStatement),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShowTables {
    /// Optional `FROM <schema>` qualifier.
    pub schema: Option<String>,
    /// Optional `LIKE '<pattern>'` filter.
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
}

/// A write statement routed wholesale to one source.
#[derive(Debug, Clone, PartialEq)]
pub struct DmlStatement {
    pub kind: DmlKind,
    /// The table the statement targets; routing resolves it to a source.
    pub table: ast::ObjectName,
    /// The statement re-rendered as SQL text for the target.
    pub sql: String,
}

/// A schema-change statement routed wholesale to one source.
#[derive(Debug, Clone, PartialEq)]
pub struct DdlStatement {
    /// Target table/view when the statement names one.
    pub table: Option<ast::ObjectName>,
    pub sql: String,
}

impl Statement {
    pub fn is_query(&self) -> bool {
        matches!(self, Statement::Query(_))
    }

    /// A short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Query(_) => "query",
            Statement::ShowTables(_) => "show_tables",
            Statement::Explain(_) => "explain",
            Statement::Dml(dml) => match dml.kind {
                DmlKind::Insert => "insert",
                DmlKind::Update => "update",
                DmlKind::Delete => "delete",
            },
            Statement::Ddl(_) => "ddl",
        }
    }
}
