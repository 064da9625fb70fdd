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

use std::sync::Arc;
use std::time::Instant;

use async_stream::try_stream;
use async_trait::async_trait;
use catalog::{ColumnMeta, DataSource, SchemaMeta, SourceKind, TableMeta, TableType};
use common_rows::adapter::RowStreamAdapter;
use common_rows::{Row, SendableRowStream};
use common_telemetry::debug;
use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema, Value};
use futures::{pin_mut, TryStreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sql::dialect::Dialect;
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls};

use crate::error::{self, Result};
use crate::{Capabilities, Connector, HealthReport, Session};

/// Connector for PostgreSQL-protocol sources.
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, source: &DataSource) -> Result<Client> {
        let mut config = source
            .url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| refused(&source.name, e.to_string()))?;
        if !source.username.is_empty() {
            config.user(&source.username);
        }
        if !source.password.is_empty() {
            config.password(source.password.expose());
        }

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| refused(&source.name, e.to_string()))?;

        // The connection task ends when the client is dropped, which is
        // what releases the session.
        let source_name = source.name.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("postgres connection for {} closed: {}", source_name, e);
            }
        });
        Ok(client)
    }
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn refused(source_name: &str, detail: String) -> error::Error {
    error::ConnectionRefusedSnafu {
        source_name: source_name.to_string(),
        detail,
    }
    .build()
}

fn exec_error(source_name: &str, e: tokio_postgres::Error) -> error::Error {
    error::QueryExecutionSnafu {
        source_name: source_name.to_string(),
        detail: e.to_string(),
    }
    .build()
}

#[async_trait]
impl Connector for PostgresConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Postgresql
    }

    fn native_dialect(&self) -> Dialect {
        Dialect::Postgresql
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RELATIONAL
    }

    async fn health_check(&self, source: &DataSource) -> Result<HealthReport> {
        let started = Instant::now();
        match self.connect(source).await {
            Ok(client) => match client.simple_query("SELECT 1").await {
                Ok(_) => Ok(HealthReport::from_probe(started.elapsed(), None)),
                Err(e) => Ok(HealthReport::unhealthy(started.elapsed(), e.to_string())),
            },
            Err(e) => Ok(HealthReport::unhealthy(started.elapsed(), e.to_string())),
        }
    }

    async fn acquire(&self, source: &DataSource) -> Result<Box<dyn Session>> {
        let client = self.connect(source).await?;
        Ok(Box::new(PostgresSession {
            client,
            source_name: source.name.clone(),
        }))
    }

    async fn discover_schema(
        &self,
        source: &DataSource,
        schema: Option<&str>,
    ) -> Result<Vec<SchemaMeta>> {
        let client = self.connect(source).await?;
        let schema_name = schema.unwrap_or("public");

        let rows = client
            .query(
                "SELECT table_name, column_name, data_type, is_nullable \
                 FROM information_schema.columns WHERE table_schema = $1 \
                 ORDER BY table_name, ordinal_position",
                &[&schema_name],
            )
            .await
            .map_err(|e| {
                error::DiscoverySnafu {
                    source_name: source.name.clone(),
                    detail: e.to_string(),
                }
                .build()
            })?;

        let mut schema_meta = SchemaMeta::physical(schema_name, source.id.clone());
        let mut current: Option<(String, Vec<ColumnMeta>)> = None;
        for row in rows {
            let table: String = row.get(0);
            let column: String = row.get(1);
            let native_type: String = row.get(2);
            let is_nullable: String = row.get(3);

            if current.as_ref().map(|(t, _)| t.as_str()) != Some(table.as_str()) {
                if let Some((name, cols)) = current.take() {
                    schema_meta = push_table(schema_meta, schema_name, name, cols, source)?;
                }
                current = Some((table, Vec::new()));
            }
            if let Some((_, cols)) = current.as_mut() {
                cols.push(ColumnMeta::new(
                    column,
                    map_native_type(&native_type),
                    is_nullable.eq_ignore_ascii_case("yes"),
                ));
            }
        }
        if let Some((name, cols)) = current.take() {
            schema_meta = push_table(schema_meta, schema_name, name, cols, source)?;
        }

        Ok(vec![schema_meta])
    }
}

fn push_table(
    schema: SchemaMeta,
    schema_name: &str,
    table: String,
    columns: Vec<ColumnMeta>,
    source: &DataSource,
) -> Result<SchemaMeta> {
    let meta = TableMeta::try_new(table, schema_name, TableType::Table, columns).map_err(|e| {
        error::DiscoverySnafu {
            source_name: source.name.clone(),
            detail: e.to_string(),
        }
        .build()
    })?;
    Ok(schema.with_table(meta))
}

fn map_native_type(native: &str) -> ConcreteDataType {
    match native.to_ascii_lowercase().as_str() {
        "smallint" | "integer" => ConcreteDataType::Integer,
        "bigint" => ConcreteDataType::Long,
        "real" | "double precision" | "numeric" => ConcreteDataType::Double,
        "boolean" => ConcreteDataType::Boolean,
        "date" => ConcreteDataType::Date,
        s if s.starts_with("timestamp") => ConcreteDataType::Timestamp,
        "bytea" => ConcreteDataType::Binary,
        "json" | "jsonb" => ConcreteDataType::Json,
        s if s.starts_with("array") || s.ends_with("[]") => ConcreteDataType::Array,
        _ => ConcreteDataType::String,
    }
}

struct PostgresSession {
    client: Client,
    source_name: String,
}

#[async_trait]
impl Session for PostgresSession {
    async fn execute_query(self: Box<Self>, sql: &str) -> Result<SendableRowStream> {
        let client = self.client;
        let source_name = self.source_name;

        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| exec_error(&source_name, e))?;
        let schema = Arc::new(schema_from_statement(&statement));

        let stream_schema = schema.clone();
        let stream = try_stream! {
            // The client moves into the generator; dropping the stream
            // drops it and with it the connection task.
            let params: Vec<String> = Vec::new();
            let rows = client
                .query_raw(&statement, params.iter())
                .await
                .map_err(|e| common_rows::error::Error::external(exec_error(&source_name, e)))?;
            pin_mut!(rows);
            while let Some(row) = rows
                .try_next()
                .await
                .map_err(|e| common_rows::error::Error::external(exec_error(&source_name, e)))?
            {
                yield convert_row(&stream_schema, &row)
                    .map_err(common_rows::error::Error::external)?;
            }
        };
        Ok(Box::pin(RowStreamAdapter::new(schema, Box::pin(stream))))
    }

    async fn execute_update(&mut self, sql: &str) -> Result<u64> {
        self.client
            .execute(sql, &[])
            .await
            .map_err(|e| exec_error(&self.source_name, e))
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .await
            .map_err(|e| exec_error(&self.source_name, e))
    }
}

fn schema_from_statement(statement: &tokio_postgres::Statement) -> Schema {
    Schema::new(
        statement
            .columns()
            .iter()
            .map(|c| ColumnSchema::new(c.name().to_string(), map_pg_type(c.type_()), true))
            .collect(),
    )
}

fn map_pg_type(ty: &Type) -> ConcreteDataType {
    // `Type` constants are not usable in match patterns.
    if *ty == Type::INT2 || *ty == Type::INT4 {
        ConcreteDataType::Integer
    } else if *ty == Type::INT8 {
        ConcreteDataType::Long
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 || *ty == Type::NUMERIC {
        ConcreteDataType::Double
    } else if *ty == Type::BOOL {
        ConcreteDataType::Boolean
    } else if *ty == Type::DATE {
        ConcreteDataType::Date
    } else if *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ {
        ConcreteDataType::Timestamp
    } else if *ty == Type::BYTEA {
        ConcreteDataType::Binary
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        ConcreteDataType::Json
    } else {
        ConcreteDataType::String
    }
}

fn convert_row(schema: &Schema, row: &tokio_postgres::Row) -> Result<Row> {
    let mut values = Vec::with_capacity(schema.num_columns());
    for (i, column) in schema.column_schemas().iter().enumerate() {
        values.push(convert_value(row, i, column)?);
    }
    Ok(Row::new(values))
}

fn convert_value(
    row: &tokio_postgres::Row,
    index: usize,
    column: &ColumnSchema,
) -> Result<Value> {
    fn decode<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        index: usize,
        column: &ColumnSchema,
    ) -> Result<Option<T>> {
        row.try_get::<_, Option<T>>(index).map_err(|e| {
            error::TypeDecodeSnafu {
                column: column.name.clone(),
                native_type: row.columns()[index].type_().to_string(),
                detail: e.to_string(),
            }
            .build()
        })
    }

    let pg_type = row.columns()[index].type_().clone();
    let value = match column.data_type {
        ConcreteDataType::Integer => {
            if pg_type == Type::INT2 {
                decode::<i16>(row, index, column)?.map(|v| Value::Integer(v as i32))
            } else {
                decode::<i32>(row, index, column)?.map(Value::Integer)
            }
        }
        ConcreteDataType::Long => decode::<i64>(row, index, column)?.map(Value::Long),
        ConcreteDataType::Double => {
            if pg_type == Type::FLOAT4 {
                decode::<f32>(row, index, column)?.map(|v| Value::Double(v as f64))
            } else if pg_type == Type::NUMERIC {
                decode::<Decimal>(row, index, column)?
                    .map(|v| Value::Double(v.to_f64().unwrap_or(f64::NAN)))
            } else {
                decode::<f64>(row, index, column)?.map(Value::Double)
            }
        }
        ConcreteDataType::Boolean => decode::<bool>(row, index, column)?.map(Value::Boolean),
        ConcreteDataType::Date => {
            decode::<chrono::NaiveDate>(row, index, column)?.map(Value::Date)
        }
        ConcreteDataType::Timestamp => {
            if pg_type == Type::TIMESTAMPTZ {
                decode::<chrono::DateTime<chrono::Utc>>(row, index, column)?
                    .map(|v| Value::Timestamp(v.naive_utc()))
            } else {
                decode::<chrono::NaiveDateTime>(row, index, column)?.map(Value::Timestamp)
            }
        }
        ConcreteDataType::Binary => decode::<Vec<u8>>(row, index, column)?.map(Value::Binary),
        ConcreteDataType::Json => decode::<serde_json::Value>(row, index, column)?.map(Value::Json),
        _ => decode::<String>(row, index, column)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_type_mapping() {
        assert_eq!(ConcreteDataType::Double, map_native_type("numeric"));
        assert_eq!(
            ConcreteDataType::Timestamp,
            map_native_type("timestamp with time zone")
        );
        assert_eq!(ConcreteDataType::String, map_native_type("uuid"));
    }

    #[test]
    fn test_pg_type_mapping() {
        assert_eq!(ConcreteDataType::Integer, map_pg_type(&Type::INT4));
        assert_eq!(ConcreteDataType::Double, map_pg_type(&Type::NUMERIC));
        assert_eq!(ConcreteDataType::Json, map_pg_type(&Type::JSONB));
    }
}
