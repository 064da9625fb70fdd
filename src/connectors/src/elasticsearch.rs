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

//! Connector for Elasticsearch-compatible document stores, speaking the
//! REST SQL API (`POST /_sql`) and the cluster health API.

use std::sync::Arc;
use std::time::Instant;

use async_stream::try_stream;
use async_trait::async_trait;
use catalog::{ColumnMeta, DataSource, SchemaMeta, SourceKind, TableMeta, TableType};
use chrono::NaiveDateTime;
use common_rows::adapter::RowStreamAdapter;
use common_rows::{Row, SendableRowStream};
use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema, Value};
use serde::Deserialize;
use sql::dialect::Dialect;

use crate::error::{self, Result};
use crate::{Capabilities, Connector, HealthReport, HealthStatus, Session};

const DEFAULT_FETCH_SIZE: usize = 1_000;

pub struct ElasticsearchConnector {
    client: reqwest::Client,
}

impl ElasticsearchConnector {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ElasticsearchConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SqlColumn {
    name: String,
    #[serde(rename = "type")]
    es_type: String,
}

#[derive(Debug, Deserialize)]
struct SqlPage {
    #[serde(default)]
    columns: Vec<SqlColumn>,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterHealth {
    status: String,
}

fn request_error(source_name: &str, e: reqwest::Error) -> error::Error {
    if e.is_connect() || e.is_timeout() {
        error::ConnectionRefusedSnafu {
            source_name: source_name.to_string(),
            detail: e.to_string(),
        }
        .build()
    } else {
        error::QueryExecutionSnafu {
            source_name: source_name.to_string(),
            detail: e.to_string(),
        }
        .build()
    }
}

async fn post_sql(
    client: &reqwest::Client,
    source: &SourceAuth,
    body: serde_json::Value,
) -> Result<SqlPage> {
    let mut request = client.post(format!("{}/_sql?format=json", source.base)).json(&body);
    if let Some((user, pass)) = &source.basic_auth {
        request = request.basic_auth(user, Some(pass));
    }
    let response = request
        .send()
        .await
        .map_err(|e| request_error(&source.name, e))?;

    if !response.status().is_success() {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        return error::QueryExecutionSnafu {
            source_name: source.name.clone(),
            detail: format!("HTTP {status}: {detail}"),
        }
        .fail();
    }
    response
        .json::<SqlPage>()
        .await
        .map_err(|e| request_error(&source.name, e))
}

/// Connection coordinates extracted from a [`DataSource`], owned so row
/// streams can outlive the borrowed source record.
#[derive(Clone)]
struct SourceAuth {
    name: String,
    base: String,
    basic_auth: Option<(String, String)>,
}

impl SourceAuth {
    fn from_source(source: &DataSource) -> Self {
        let basic_auth = if source.username.is_empty() {
            None
        } else {
            Some((
                source.username.clone(),
                source.password.expose().to_string(),
            ))
        };
        Self {
            name: source.name.clone(),
            base: source.url.trim_end_matches('/').to_string(),
            basic_auth,
        }
    }
}

#[async_trait]
impl Connector for ElasticsearchConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Elasticsearch
    }

    fn native_dialect(&self) -> Dialect {
        // The store's SQL surface is ANSI-flavored.
        Dialect::Standard
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NO_JOIN
    }

    async fn health_check(&self, source: &DataSource) -> Result<HealthReport> {
        let auth = SourceAuth::from_source(source);
        let started = Instant::now();
        let mut request = self
            .client
            .get(format!("{}/_cluster/health", auth.base));
        if let Some((user, pass)) = &auth.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Ok(HealthReport::unhealthy(started.elapsed(), e.to_string())),
        };
        let latency = started.elapsed();
        match response.json::<ClusterHealth>().await {
            Ok(health) => {
                let mut report =
                    HealthReport::from_probe(latency, Some(format!("cluster {}", health.status)));
                report.status = match health.status.as_str() {
                    "green" => report.status,
                    "yellow" => HealthStatus::Degraded,
                    _ => HealthStatus::Unhealthy,
                };
                Ok(report)
            }
            Err(e) => Ok(HealthReport::unhealthy(latency, e.to_string())),
        }
    }

    async fn acquire(&self, source: &DataSource) -> Result<Box<dyn Session>> {
        Ok(Box::new(ElasticsearchSession {
            client: self.client.clone(),
            auth: SourceAuth::from_source(source),
        }))
    }

    async fn discover_schema(
        &self,
        source: &DataSource,
        schema: Option<&str>,
    ) -> Result<Vec<SchemaMeta>> {
        let auth = SourceAuth::from_source(source);
        let mut request = self.client.get(format!("{}/_mapping", auth.base));
        if let Some((user, pass)) = &auth.basic_auth {
            request = request.basic_auth(user, Some(pass));
        }
        let mappings: serde_json::Value = request
            .send()
            .await
            .map_err(|e| request_error(&auth.name, e))?
            .json()
            .await
            .map_err(|e| request_error(&auth.name, e))?;

        // Indices surface as tables of one schema named after the source.
        let schema_name = schema.unwrap_or(&source.name);
        let mut schema_meta = SchemaMeta::physical(schema_name, source.id.clone());

        let Some(indices) = mappings.as_object() else {
            return Ok(vec![schema_meta]);
        };
        for (index, body) in indices {
            if index.starts_with('.') {
                continue; // system index
            }
            let mut columns = Vec::new();
            if let Some(properties) = body
                .pointer("/mappings/properties")
                .and_then(|p| p.as_object())
            {
                for (field, spec) in properties {
                    let es_type = spec
                        .get("type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("object");
                    columns.push(ColumnMeta::new(field, map_es_type(es_type), true));
                }
            }
            let table =
                TableMeta::try_new(index, schema_name, TableType::Table, columns).map_err(|e| {
                    error::DiscoverySnafu {
                        source_name: auth.name.clone(),
                        detail: e.to_string(),
                    }
                    .build()
                })?;
            schema_meta = schema_meta.with_table(table);
        }
        Ok(vec![schema_meta])
    }
}

fn map_es_type(es_type: &str) -> ConcreteDataType {
    match es_type {
        "integer" | "short" | "byte" => ConcreteDataType::Integer,
        "long" | "unsigned_long" => ConcreteDataType::Long,
        "double" | "float" | "half_float" | "scaled_float" => ConcreteDataType::Double,
        "boolean" => ConcreteDataType::Boolean,
        "date" | "date_nanos" => ConcreteDataType::Timestamp,
        "binary" => ConcreteDataType::Binary,
        "object" | "nested" | "flattened" => ConcreteDataType::Json,
        _ => ConcreteDataType::String,
    }
}

struct ElasticsearchSession {
    client: reqwest::Client,
    auth: SourceAuth,
}

#[async_trait]
impl Session for ElasticsearchSession {
    async fn execute_query(self: Box<Self>, sql: &str) -> Result<SendableRowStream> {
        let client = self.client;
        let auth = self.auth;

        let first = post_sql(
            &client,
            &auth,
            serde_json::json!({ "query": sql, "fetch_size": DEFAULT_FETCH_SIZE }),
        )
        .await?;

        let schema = Arc::new(Schema::new(
            first
                .columns
                .iter()
                .map(|c| ColumnSchema::new(c.name.clone(), map_es_type(&c.es_type), true))
                .collect(),
        ));

        let stream_schema = schema.clone();
        let stream = try_stream! {
            let mut page = first;
            loop {
                for raw in std::mem::take(&mut page.rows) {
                    yield convert_row(&stream_schema, raw)
                        .map_err(common_rows::error::Error::external)?;
                }
                let Some(cursor) = page.cursor.take() else { break };
                page = post_sql(&client, &auth, serde_json::json!({ "cursor": cursor }))
                    .await
                    .map_err(common_rows::error::Error::external)?;
            }
        };
        Ok(Box::pin(RowStreamAdapter::new(schema, Box::pin(stream))))
    }

    async fn execute_update(&mut self, _sql: &str) -> Result<u64> {
        error::UnsupportedOperationSnafu {
            operation: "update",
            kind: SourceKind::Elasticsearch.to_string(),
        }
        .fail()
    }

    async fn execute_ddl(&mut self, _sql: &str) -> Result<()> {
        error::UnsupportedOperationSnafu {
            operation: "ddl",
            kind: SourceKind::Elasticsearch.to_string(),
        }
        .fail()
    }
}

fn convert_row(schema: &Schema, raw: Vec<serde_json::Value>) -> Result<Row> {
    let mut values = Vec::with_capacity(raw.len());
    for (i, cell) in raw.into_iter().enumerate() {
        let column = schema.column_schema(i);
        values.push(convert_cell(cell, column)?);
    }
    Ok(Row::new(values))
}

fn convert_cell(cell: serde_json::Value, column: &ColumnSchema) -> Result<Value> {
    use serde_json::Value as Json;
    let value = match (&column.data_type, cell) {
        (_, Json::Null) => Value::Null,
        (ConcreteDataType::Integer, Json::Number(n)) => {
            Value::Integer(n.as_i64().unwrap_or_default() as i32)
        }
        (ConcreteDataType::Long, Json::Number(n)) => Value::Long(n.as_i64().unwrap_or_default()),
        (ConcreteDataType::Double, Json::Number(n)) => {
            Value::Double(n.as_f64().unwrap_or_default())
        }
        (ConcreteDataType::Boolean, Json::Bool(b)) => Value::Boolean(b),
        (ConcreteDataType::Timestamp, Json::String(s)) => parse_es_timestamp(column, &s)?,
        (ConcreteDataType::Timestamp, Json::Number(n)) => {
            let millis = n.as_i64().unwrap_or_default();
            Value::Timestamp(
                chrono::DateTime::from_timestamp_millis(millis)
                    .map(|t| t.naive_utc())
                    .unwrap_or_default(),
            )
        }
        (ConcreteDataType::Json, other) => Value::Json(other),
        (ConcreteDataType::Array, Json::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| convert_cell(item, column))
                .collect::<Result<Vec<_>>>()?,
        ),
        (_, Json::String(s)) => Value::String(s),
        (_, other) => Value::String(other.to_string()),
    };
    Ok(value)
}

fn parse_es_timestamp(column: &ColumnSchema, raw: &str) -> Result<Value> {
    // The SQL API renders dates in strict ISO-8601 with a trailing Z.
    let trimmed = raw.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(Value::Timestamp)
        .map_err(|e| {
            error::TypeDecodeSnafu {
                column: column.name.clone(),
                native_type: "date".to_string(),
                detail: e.to_string(),
            }
            .build()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_es_type_mapping() {
        assert_eq!(ConcreteDataType::String, map_es_type("keyword"));
        assert_eq!(ConcreteDataType::Long, map_es_type("long"));
        assert_eq!(ConcreteDataType::Timestamp, map_es_type("date"));
        assert_eq!(ConcreteDataType::Json, map_es_type("nested"));
    }

    #[test]
    fn test_cell_conversion() {
        let column = ColumnSchema::new("price", ConcreteDataType::Double, true);
        assert_eq!(
            Value::Double(9.5),
            convert_cell(serde_json::json!(9.5), &column).unwrap()
        );
        assert_eq!(
            Value::Null,
            convert_cell(serde_json::Value::Null, &column).unwrap()
        );
    }

    #[test]
    fn test_timestamp_parse() {
        let column = ColumnSchema::new("ts", ConcreteDataType::Timestamp, true);
        let value = parse_es_timestamp(&column, "2023-06-01T10:30:00.000Z").unwrap();
        let Value::Timestamp(ts) = value else { panic!() };
        assert_eq!("2023-06-01 10:30:00", ts.format("%Y-%m-%d %H:%M:%S").to_string());
    }
}
