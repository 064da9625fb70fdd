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

//! Connection and statement bookkeeping behind the wire surface. All
//! state is process-local: a statement holds the live result stream and
//! its cursor; fetch pulls from it frame by frame.

use std::str::FromStr;
use std::sync::Arc;

use common_error::prelude::ErrorExt;
use common_rows::SendableRowStream;
use common_telemetry::info;
use connectors::ConnectorRegistryRef;
use dashmap::DashMap;
use datatypes::prelude::SchemaRef;
use futures::StreamExt;
use query::executor::ExecutionContext;
use query::QueryEngineRef;
use snafu::{OptionExt, ResultExt};
use sql::dialect::Dialect;
use uuid::Uuid;

use crate::error::{self, Result};
use crate::wire::{Frame, WireColumn, WireRequest, WireResponse};

struct Connection {
    dialect: Dialect,
}

struct Statement {
    connection_id: String,
    sql: Option<String>,
    /// Present once executed.
    result: tokio::sync::Mutex<Option<OpenResult>>,
    query_id: std::sync::Mutex<Option<Uuid>>,
}

struct OpenResult {
    schema: SchemaRef,
    stream: SendableRowStream,
    context: Arc<ExecutionContext>,
    fetched: usize,
    done: bool,
}

pub struct ServerInstance {
    engine: QueryEngineRef,
    registry: ConnectorRegistryRef,
    default_fetch_size: usize,
    connections: DashMap<String, Connection>,
    statements: DashMap<String, Arc<Statement>>,
}

pub type ServerInstanceRef = Arc<ServerInstance>;

impl ServerInstance {
    pub fn new(
        engine: QueryEngineRef,
        registry: ConnectorRegistryRef,
        default_fetch_size: usize,
    ) -> ServerInstanceRef {
        Arc::new(Self {
            engine,
            registry,
            default_fetch_size,
            connections: DashMap::new(),
            statements: DashMap::new(),
        })
    }

    pub fn engine(&self) -> &QueryEngineRef {
        &self.engine
    }

    /// Dispatch one wire request. Errors become structured error
    /// responses at the HTTP layer.
    pub async fn handle(&self, request: WireRequest) -> Result<WireResponse> {
        match request {
            WireRequest::OpenConnection { dialect } => self.open_connection(dialect),
            WireRequest::CloseConnection { connection_id } => {
                self.close_connection(&connection_id)
            }
            WireRequest::CreateStatement { connection_id } => {
                self.create_statement(&connection_id)
            }
            WireRequest::CloseStatement { statement_id } => self.close_statement(&statement_id),
            WireRequest::Prepare { connection_id, sql } => {
                self.prepare(&connection_id, Some(sql))
            }
            WireRequest::Execute {
                statement_id,
                max_rows,
            } => self.execute(&statement_id, max_rows).await,
            WireRequest::PrepareAndExecute {
                connection_id,
                sql,
                max_rows,
            } => {
                let WireResponse::Prepared { statement_id } =
                    self.prepare(&connection_id, Some(sql))?
                else {
                    unreachable!("prepare returns Prepared");
                };
                self.execute(&statement_id, max_rows).await
            }
            WireRequest::Fetch {
                statement_id,
                offset,
                max_rows,
            } => self.fetch(&statement_id, offset, max_rows).await,
            WireRequest::CancelStatement { statement_id } => self.cancel(&statement_id),
            WireRequest::Translate { sql, from, to } => self.translate(&sql, &from, &to),
            WireRequest::GetTables {
                connection_id,
                schema_pattern,
                table_name_pattern,
            } => self.get_tables(&connection_id, schema_pattern, table_name_pattern),
            WireRequest::GetColumns {
                connection_id,
                schema_pattern,
                table_name_pattern,
                column_name_pattern,
            } => self.get_columns(
                &connection_id,
                schema_pattern,
                table_name_pattern,
                column_name_pattern,
            ),
            WireRequest::GetSchemas { connection_id } => self.get_schemas(&connection_id),
            WireRequest::GetCatalogs { connection_id } => self.get_catalogs(&connection_id),
            WireRequest::GetTableTypes { connection_id } => {
                self.get_table_types(&connection_id)
            }
            WireRequest::SourceStatus {} => self.source_status().await,
        }
    }

    fn open_connection(&self, dialect: Option<String>) -> Result<WireResponse> {
        let dialect = match dialect {
            Some(token) => Dialect::from_str(&token).map_err(|e| {
                error::InvalidConfigSnafu {
                    detail: e.to_string(),
                }
                .build()
            })?,
            None => Dialect::default(),
        };
        let connection_id = Uuid::new_v4().to_string();
        self.connections
            .insert(connection_id.clone(), Connection { dialect });
        info!("connection {connection_id} opened with dialect {dialect}");
        Ok(WireResponse::ConnectionOpened { connection_id })
    }

    fn close_connection(&self, connection_id: &str) -> Result<WireResponse> {
        self.connections
            .remove(connection_id)
            .context(error::ConnectionNotFoundSnafu { connection_id })?;
        // Statements of a closed connection go with it; running queries
        // are cancelled.
        let doomed: Vec<String> = self
            .statements
            .iter()
            .filter(|entry| entry.value().connection_id == connection_id)
            .map(|entry| entry.key().clone())
            .collect();
        for statement_id in doomed {
            let _ = self.close_statement(&statement_id);
        }
        Ok(WireResponse::Closed {})
    }

    fn connection_dialect(&self, connection_id: &str) -> Result<Dialect> {
        self.connections
            .get(connection_id)
            .map(|c| c.dialect)
            .context(error::ConnectionNotFoundSnafu { connection_id })
    }

    fn create_statement(&self, connection_id: &str) -> Result<WireResponse> {
        self.connection_dialect(connection_id)?;
        let statement_id = Uuid::new_v4().to_string();
        self.statements.insert(
            statement_id.clone(),
            Arc::new(Statement {
                connection_id: connection_id.to_string(),
                sql: None,
                result: tokio::sync::Mutex::new(None),
                query_id: std::sync::Mutex::new(None),
            }),
        );
        Ok(WireResponse::StatementCreated { statement_id })
    }

    fn prepare(&self, connection_id: &str, sql: Option<String>) -> Result<WireResponse> {
        self.connection_dialect(connection_id)?;
        let statement_id = Uuid::new_v4().to_string();
        self.statements.insert(
            statement_id.clone(),
            Arc::new(Statement {
                connection_id: connection_id.to_string(),
                sql,
                result: tokio::sync::Mutex::new(None),
                query_id: std::sync::Mutex::new(None),
            }),
        );
        Ok(WireResponse::Prepared { statement_id })
    }

    fn close_statement(&self, statement_id: &str) -> Result<WireResponse> {
        let (_, statement) = self
            .statements
            .remove(statement_id)
            .context(error::StatementNotFoundSnafu { statement_id })?;
        // Dropping the stream closes operators and sessions; cancel the
        // query as well if it is still running.
        if let Some(query_id) = *statement.query_id.lock().unwrap() {
            let _ = self.engine.cancel_query(query_id);
        }
        Ok(WireResponse::Closed {})
    }

    fn statement(&self, statement_id: &str) -> Result<Arc<Statement>> {
        self.statements
            .get(statement_id)
            .map(|entry| entry.value().clone())
            .context(error::StatementNotFoundSnafu { statement_id })
    }

    async fn execute(
        &self,
        statement_id: &str,
        max_rows: Option<usize>,
    ) -> Result<WireResponse> {
        let statement = self.statement(statement_id)?;
        let dialect = self.connection_dialect(&statement.connection_id)?;
        let sql = statement
            .sql
            .clone()
            .context(error::EmptyStatementSnafu { statement_id })?;

        let output = self
            .engine
            .execute_sql(&sql, dialect)
            .await
            .context(error::QuerySnafu)?;
        *statement.query_id.lock().unwrap() = Some(output.query_id);

        let schema = output.stream.schema();
        {
            let mut slot = statement.result.lock().await;
            *slot = Some(OpenResult {
                schema: schema.clone(),
                stream: output.stream,
                context: output.context.clone(),
                fetched: 0,
                done: false,
            });
        }

        let frame = self
            .pull_frame(&statement, max_rows.unwrap_or(self.default_fetch_size))
            .await?;
        Ok(WireResponse::Executed {
            statement_id: statement_id.to_string(),
            query_id: output.query_id.to_string(),
            columns: wire_columns(&schema),
            frame,
            warning: output.context.warning(),
            truncated: output.context.is_truncated(),
        })
    }

    async fn fetch(
        &self,
        statement_id: &str,
        _offset: usize,
        max_rows: Option<usize>,
    ) -> Result<WireResponse> {
        let statement = self.statement(statement_id)?;
        let frame = self
            .pull_frame(&statement, max_rows.unwrap_or(self.default_fetch_size))
            .await?;
        let (warning, truncated) = {
            let slot = statement.result.lock().await;
            match slot.as_ref() {
                Some(result) => (result.context.warning(), result.context.is_truncated()),
                None => (None, false),
            }
        };
        Ok(WireResponse::Fetched {
            statement_id: statement_id.to_string(),
            frame,
            warning,
            truncated,
        })
    }

    /// Pull at most `max_rows` from the statement's live stream. The
    /// frame offset is the cursor before this pull.
    async fn pull_frame(&self, statement: &Statement, max_rows: usize) -> Result<Frame> {
        let mut slot = statement.result.lock().await;
        let result = slot.as_mut().ok_or_else(|| {
            error::EmptyStatementSnafu {
                statement_id: "unexecuted statement".to_string(),
            }
            .build()
        })?;

        let offset = result.fetched;
        let mut rows = Vec::new();
        if !result.done {
            while rows.len() < max_rows.max(1) {
                match result.stream.next().await {
                    Some(row) => {
                        let row = row.context(error::RowStreamSnafu)?;
                        rows.push(row.into_values());
                    }
                    None => {
                        result.done = true;
                        break;
                    }
                }
            }
        }
        result.fetched += rows.len();
        Ok(Frame {
            offset,
            done: result.done,
            rows,
        })
    }

    fn cancel(&self, statement_id: &str) -> Result<WireResponse> {
        let statement = self.statement(statement_id)?;
        let registered = *statement.query_id.lock().unwrap();
        let query_id = registered.context(error::EmptyStatementSnafu { statement_id })?;
        self.engine
            .cancel_query(query_id)
            .context(error::QuerySnafu)?;
        Ok(WireResponse::Cancelled {
            statement_id: statement_id.to_string(),
        })
    }

    fn translate(&self, sql: &str, from: &str, to: &str) -> Result<WireResponse> {
        let parse = |token: &str| {
            Dialect::from_str(token).map_err(|e| {
                error::InvalidConfigSnafu {
                    detail: e.to_string(),
                }
                .build()
            })
        };
        let translated = self
            .engine
            .translate(sql, parse(from)?, parse(to)?)
            .context(error::QuerySnafu)?;
        Ok(WireResponse::Translated { sql: translated })
    }

    fn get_tables(
        &self,
        connection_id: &str,
        schema_pattern: Option<String>,
        table_pattern: Option<String>,
    ) -> Result<WireResponse> {
        self.connection_dialect(connection_id)?;
        let snapshot = self.engine.catalog().snapshot();
        let mut rows = Vec::new();
        for (schema, table) in snapshot.all_tables() {
            if !matches_pattern(&schema.name, &schema_pattern)
                || !matches_pattern(&table.name, &table_pattern)
            {
                continue;
            }
            rows.push(vec![
                "fedsql".into(),
                schema.name.clone().into(),
                table.name.clone().into(),
                format!("{:?}", table.table_type).to_ascii_lowercase().into(),
            ]);
        }
        Ok(WireResponse::ResultSet {
            columns: string_columns(&["table_cat", "table_schem", "table_name", "table_type"]),
            rows,
        })
    }

    fn get_columns(
        &self,
        connection_id: &str,
        schema_pattern: Option<String>,
        table_pattern: Option<String>,
        column_pattern: Option<String>,
    ) -> Result<WireResponse> {
        self.connection_dialect(connection_id)?;
        let snapshot = self.engine.catalog().snapshot();
        let mut rows = Vec::new();
        for (schema, table) in snapshot.all_tables() {
            if !matches_pattern(&schema.name, &schema_pattern)
                || !matches_pattern(&table.name, &table_pattern)
            {
                continue;
            }
            for (position, column) in table.columns.iter().enumerate() {
                if !matches_pattern(&column.name, &column_pattern) {
                    continue;
                }
                rows.push(vec![
                    schema.name.clone().into(),
                    table.name.clone().into(),
                    column.name.clone().into(),
                    column.data_type.name().into(),
                    datatypes::prelude::Value::Boolean(column.nullable),
                    datatypes::prelude::Value::Integer(position as i32 + 1),
                ]);
            }
        }
        Ok(WireResponse::ResultSet {
            columns: string_columns(&[
                "table_schem",
                "table_name",
                "column_name",
                "type_name",
                "nullable",
                "ordinal_position",
            ]),
            rows,
        })
    }

    fn get_schemas(&self, connection_id: &str) -> Result<WireResponse> {
        self.connection_dialect(connection_id)?;
        let snapshot = self.engine.catalog().snapshot();
        let rows = snapshot
            .schemas()
            .map(|schema| {
                vec![
                    schema.name.clone().into(),
                    format!("{:?}", schema.schema_type).to_ascii_lowercase().into(),
                ]
            })
            .collect();
        Ok(WireResponse::ResultSet {
            columns: string_columns(&["table_schem", "schema_type"]),
            rows,
        })
    }

    fn get_catalogs(&self, connection_id: &str) -> Result<WireResponse> {
        self.connection_dialect(connection_id)?;
        Ok(WireResponse::ResultSet {
            columns: string_columns(&["table_cat"]),
            rows: vec![vec!["fedsql".into()]],
        })
    }

    fn get_table_types(&self, connection_id: &str) -> Result<WireResponse> {
        self.connection_dialect(connection_id)?;
        Ok(WireResponse::ResultSet {
            columns: string_columns(&["table_type"]),
            rows: vec![
                vec!["table".into()],
                vec!["view".into()],
                vec!["index".into()],
            ],
        })
    }

    async fn source_status(&self) -> Result<WireResponse> {
        let snapshot = self.engine.catalog().snapshot();
        let mut rows = Vec::new();
        for source in snapshot.data_sources() {
            let report = match self.registry.get(source.kind) {
                Some(connector) => connector.health_check(source).await.ok(),
                None => None,
            };
            let (status, latency, detail) = match report {
                Some(report) => (
                    format!("{:?}", report.status).to_ascii_lowercase(),
                    datatypes::prelude::Value::Long(report.latency_ms as i64),
                    report.detail.unwrap_or_default(),
                ),
                None => (
                    "unknown".to_string(),
                    datatypes::prelude::Value::Null,
                    String::new(),
                ),
            };
            rows.push(vec![
                source.name.clone().into(),
                source.kind.to_string().into(),
                status.into(),
                latency,
                detail.into(),
            ]);
        }
        Ok(WireResponse::ResultSet {
            columns: string_columns(&["name", "kind", "status", "latency_ms", "detail"]),
            rows,
        })
    }
}

fn wire_columns(schema: &SchemaRef) -> Vec<WireColumn> {
    schema
        .column_schemas()
        .iter()
        .map(|c| WireColumn {
            name: c.name.clone(),
            data_type: c.data_type.name().to_string(),
            nullable: c.nullable,
        })
        .collect()
}

fn string_columns(names: &[&str]) -> Vec<WireColumn> {
    names
        .iter()
        .map(|name| WireColumn {
            name: name.to_string(),
            data_type: "string".to_string(),
            nullable: true,
        })
        .collect()
}

/// LIKE-style metadata pattern; `None` and `%` match everything.
fn matches_pattern(value: &str, pattern: &Option<String>) -> bool {
    match pattern.as_deref() {
        None | Some("") | Some("%") => true,
        Some(pattern) => sql_like(value, pattern),
    }
}

fn sql_like(target: &str, pattern: &str) -> bool {
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

/// The structured error payload for a failed request.
pub fn error_response(error: &crate::error::Error) -> WireResponse {
    let code = error.status_code();
    WireResponse::Error {
        code: code.as_code_str().to_string(),
        message: error.to_string(),
        query_id: None,
        retryable: code.is_retryable(),
    }
}
