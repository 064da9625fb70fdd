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

use async_trait::async_trait;
use catalog::{ColumnMeta, DataSource, SchemaMeta, SourceKind, TableMeta, TableType};
use chrono::{NaiveDate, NaiveDateTime};
use common_rows::{MemoryRowStream, Row, SendableRowStream};
use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema, Value};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder};
use sql::dialect::Dialect;

use crate::error::{self, Result};
use crate::{Capabilities, Connector, HealthReport, Session};

/// Connector for MySQL-protocol sources.
pub struct MysqlConnector;

impl MysqlConnector {
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, source: &DataSource) -> Result<Conn> {
        let opts = Opts::from_url(&source.url).map_err(|e| {
            error::ConnectionRefusedSnafu {
                source_name: source.name.clone(),
                detail: e.to_string(),
            }
            .build()
        })?;
        let mut builder = OptsBuilder::from_opts(opts);
        if !source.username.is_empty() {
            builder = builder.user(Some(source.username.clone()));
        }
        if !source.password.is_empty() {
            builder = builder.pass(Some(source.password.expose().to_string()));
        }
        Conn::new(builder).await.map_err(|e| {
            error::ConnectionRefusedSnafu {
                source_name: source.name.clone(),
                detail: e.to_string(),
            }
            .build()
        })
    }
}

impl Default for MysqlConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Mysql
    }

    fn native_dialect(&self) -> Dialect {
        Dialect::Mysql
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RELATIONAL
    }

    async fn health_check(&self, source: &DataSource) -> Result<HealthReport> {
        let started = Instant::now();
        match self.connect(source).await {
            Ok(mut conn) => match conn.query_drop("SELECT 1").await {
                Ok(()) => Ok(HealthReport::from_probe(started.elapsed(), None)),
                Err(e) => Ok(HealthReport::unhealthy(started.elapsed(), e.to_string())),
            },
            Err(e) => Ok(HealthReport::unhealthy(started.elapsed(), e.to_string())),
        }
    }

    async fn acquire(&self, source: &DataSource) -> Result<Box<dyn Session>> {
        let conn = self.connect(source).await?;
        Ok(Box::new(MysqlSession {
            conn,
            source_name: source.name.clone(),
        }))
    }

    async fn discover_schema(
        &self,
        source: &DataSource,
        schema: Option<&str>,
    ) -> Result<Vec<SchemaMeta>> {
        let mut conn = self.connect(source).await?;
        let schema_name = match schema {
            Some(s) => s.to_string(),
            None => conn
                .query_first::<Option<String>, _>("SELECT DATABASE()")
                .await
                .map_err(|e| discovery_error(&source.name, e))?
                .flatten()
                .unwrap_or_else(|| "default".to_string()),
        };

        let columns: Vec<(String, String, String, String)> = conn
            .exec(
                "SELECT table_name, column_name, data_type, is_nullable \
                 FROM information_schema.columns WHERE table_schema = ? \
                 ORDER BY table_name, ordinal_position",
                (schema_name.clone(),),
            )
            .await
            .map_err(|e| discovery_error(&source.name, e))?;

        let mut schema_meta = SchemaMeta::physical(schema_name.clone(), source.id.clone());
        let mut current: Option<(String, Vec<ColumnMeta>)> = None;
        for (table, column, native_type, is_nullable) in columns {
            if current.as_ref().map(|(t, _)| t.as_str()) != Some(table.as_str()) {
                if let Some((name, cols)) = current.take() {
                    schema_meta = add_table(schema_meta, &schema_name, name, cols)?;
                }
                current = Some((table.clone(), Vec::new()));
            }
            let data_type = map_native_type(&native_type);
            if let Some((_, cols)) = current.as_mut() {
                cols.push(ColumnMeta::new(
                    column,
                    data_type,
                    is_nullable.eq_ignore_ascii_case("yes"),
                ));
            }
        }
        if let Some((name, cols)) = current.take() {
            schema_meta = add_table(schema_meta, &schema_name, name, cols)?;
        }

        Ok(vec![schema_meta])
    }
}

fn add_table(
    schema: SchemaMeta,
    schema_name: &str,
    table: String,
    columns: Vec<ColumnMeta>,
) -> Result<SchemaMeta> {
    let meta = TableMeta::try_new(table, schema_name, TableType::Table, columns).map_err(|e| {
        error::DiscoverySnafu {
            source_name: schema_name.to_string(),
            detail: e.to_string(),
        }
        .build()
    })?;
    Ok(schema.with_table(meta))
}

fn discovery_error(source_name: &str, e: mysql_async::Error) -> error::Error {
    error::DiscoverySnafu {
        source_name: source_name.to_string(),
        detail: e.to_string(),
    }
    .build()
}

/// Reduce an information_schema type name onto the universal set.
fn map_native_type(native: &str) -> ConcreteDataType {
    match native.to_ascii_lowercase().as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "year" => ConcreteDataType::Integer,
        "bigint" => ConcreteDataType::Long,
        "decimal" | "float" | "double" => ConcreteDataType::Double,
        "bit" => ConcreteDataType::Boolean,
        "date" => ConcreteDataType::Date,
        "datetime" | "timestamp" | "time" => ConcreteDataType::Timestamp,
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            ConcreteDataType::Binary
        }
        "json" => ConcreteDataType::Json,
        _ => ConcreteDataType::String,
    }
}

struct MysqlSession {
    conn: Conn,
    source_name: String,
}

#[async_trait]
impl Session for MysqlSession {
    async fn execute_query(self: Box<Self>, sql: &str) -> Result<SendableRowStream> {
        let mut conn = self.conn;
        let source_name = self.source_name;

        // mysql_async row streaming borrows the connection for the life of
        // the stream; the result set is buffered here so the session can be
        // released as soon as the fetch completes.
        let (schema, rows) = {
            let mut result = conn.query_iter(sql).await.map_err(|e| {
                error::QueryExecutionSnafu {
                    source_name: source_name.clone(),
                    detail: e.to_string(),
                }
                .build()
            })?;

            let schema = result
                .columns()
                .map(|cols| schema_from_columns(&cols))
                .unwrap_or_else(|| Schema::new(vec![]));

            let native_rows: Vec<mysql_async::Row> = result.collect().await.map_err(|e| {
                error::QueryExecutionSnafu {
                    source_name: source_name.clone(),
                    detail: e.to_string(),
                }
                .build()
            })?;
            (schema, native_rows)
        };

        let schema = Arc::new(schema);
        let mut converted = Vec::with_capacity(rows.len());
        for native in rows {
            converted.push(convert_row(&schema, native)?);
        }
        Ok(Box::pin(MemoryRowStream::new(schema, converted)))
    }

    async fn execute_update(&mut self, sql: &str) -> Result<u64> {
        self.conn.query_drop(sql).await.map_err(|e| {
            error::QueryExecutionSnafu {
                source_name: self.source_name.clone(),
                detail: e.to_string(),
            }
            .build()
        })?;
        Ok(self.conn.affected_rows())
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        self.execute_update(sql).await.map(|_| ())
    }
}

fn schema_from_columns(columns: &[mysql_async::Column]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|c| {
                ColumnSchema::new(c.name_str().to_string(), map_column_type(c), true)
            })
            .collect(),
    )
}

fn map_column_type(column: &mysql_async::Column) -> ConcreteDataType {
    use ColumnType::*;
    match column.column_type() {
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_INT24 | MYSQL_TYPE_LONG
        | MYSQL_TYPE_YEAR => ConcreteDataType::Integer,
        MYSQL_TYPE_LONGLONG => ConcreteDataType::Long,
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE | MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => {
            ConcreteDataType::Double
        }
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => ConcreteDataType::Date,
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_TIMESTAMP2
        | MYSQL_TYPE_DATETIME2 | MYSQL_TYPE_TIME => ConcreteDataType::Timestamp,
        MYSQL_TYPE_JSON => ConcreteDataType::Json,
        MYSQL_TYPE_BIT => ConcreteDataType::Boolean,
        MYSQL_TYPE_TINY_BLOB | MYSQL_TYPE_MEDIUM_BLOB | MYSQL_TYPE_LONG_BLOB
        | MYSQL_TYPE_BLOB => {
            if column.flags().contains(ColumnFlags::BINARY_FLAG) {
                ConcreteDataType::Binary
            } else {
                ConcreteDataType::String
            }
        }
        _ => ConcreteDataType::String,
    }
}

fn convert_row(schema: &Schema, native: mysql_async::Row) -> Result<Row> {
    let values = native.unwrap();
    let mut converted = Vec::with_capacity(values.len());
    for (i, value) in values.into_iter().enumerate() {
        let target = schema.column_schema(i);
        converted.push(convert_value(value, target)?);
    }
    Ok(Row::new(converted))
}

fn convert_value(value: mysql_async::Value, target: &ColumnSchema) -> Result<Value> {
    use mysql_async::Value as Native;
    let converted = match value {
        Native::NULL => Value::Null,
        Native::Int(v) => match target.data_type {
            ConcreteDataType::Integer => Value::Integer(v as i32),
            ConcreteDataType::Boolean => Value::Boolean(v != 0),
            ConcreteDataType::Double => Value::Double(v as f64),
            _ => Value::Long(v),
        },
        Native::UInt(v) => match target.data_type {
            ConcreteDataType::Integer => Value::Integer(v as i32),
            ConcreteDataType::Boolean => Value::Boolean(v != 0),
            _ => Value::Long(v as i64),
        },
        Native::Float(v) => Value::Double(v as f64),
        Native::Double(v) => Value::Double(v),
        Native::Bytes(bytes) => convert_bytes(bytes, target)?,
        Native::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .unwrap_or_default();
            if target.data_type == ConcreteDataType::Date {
                Value::Date(date)
            } else {
                let time = date
                    .and_hms_micro_opt(hour as u32, minute as u32, second as u32, micros)
                    .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).unwrap());
                Value::Timestamp(time)
            }
        }
        Native::Time(negative, days, hours, minutes, seconds, micros) => {
            // TIME maps onto a timestamp offset from the epoch date.
            let total_seconds = (days as i64 * 86_400
                + hours as i64 * 3_600
                + minutes as i64 * 60
                + seconds as i64)
                * if negative { -1 } else { 1 };
            let base = NaiveDate::from_ymd_opt(1970, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            Value::Timestamp(
                base + chrono::Duration::seconds(total_seconds)
                    + chrono::Duration::microseconds(micros as i64),
            )
        }
    };
    Ok(converted)
}

fn convert_bytes(bytes: Vec<u8>, target: &ColumnSchema) -> Result<Value> {
    let converted = match target.data_type {
        ConcreteDataType::Binary => Value::Binary(bytes),
        ConcreteDataType::Json => {
            let parsed: serde_json::Value =
                serde_json::from_slice(&bytes).map_err(|e| decode_error(target, e.to_string()))?;
            Value::Json(parsed)
        }
        ConcreteDataType::Double => {
            // DECIMAL arrives over the wire as text.
            let text = String::from_utf8_lossy(&bytes);
            Value::Double(
                text.parse::<f64>()
                    .map_err(|e| decode_error(target, e.to_string()))?,
            )
        }
        ConcreteDataType::Date => {
            let text = String::from_utf8_lossy(&bytes);
            Value::Date(
                NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .map_err(|e| decode_error(target, e.to_string()))?,
            )
        }
        ConcreteDataType::Timestamp => {
            let text = String::from_utf8_lossy(&bytes);
            Value::Timestamp(
                NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                    .map_err(|e| decode_error(target, e.to_string()))?,
            )
        }
        _ => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    };
    Ok(converted)
}

fn decode_error(target: &ColumnSchema, detail: String) -> error::Error {
    error::TypeDecodeSnafu {
        column: target.name.clone(),
        native_type: target.data_type.to_string(),
        detail,
    }
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_type_mapping() {
        assert_eq!(ConcreteDataType::Long, map_native_type("BIGINT"));
        assert_eq!(ConcreteDataType::Double, map_native_type("decimal"));
        assert_eq!(ConcreteDataType::String, map_native_type("enum"));
        assert_eq!(ConcreteDataType::Timestamp, map_native_type("datetime"));
    }

    #[test]
    fn test_decimal_bytes_decode() {
        let target = ColumnSchema::new("amount", ConcreteDataType::Double, true);
        let value = convert_bytes(b"175.50".to_vec(), &target).unwrap();
        assert_eq!(Value::Double(175.5), value);
    }
}
