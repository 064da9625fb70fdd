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

//! The JSON wire protocol: one request/response pair per round trip,
//! requests tagged by operation. Result rows travel in frames; `fetch`
//! repeats until `done`.

use datatypes::prelude::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(tag = "request", rename_all = "camelCase")]
pub enum WireRequest {
    #[serde(rename_all = "camelCase")]
    OpenConnection {
        #[serde(default)]
        dialect: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CloseConnection { connection_id: String },
    #[serde(rename_all = "camelCase")]
    CreateStatement { connection_id: String },
    #[serde(rename_all = "camelCase")]
    CloseStatement { statement_id: String },
    #[serde(rename_all = "camelCase")]
    Prepare {
        connection_id: String,
        sql: String,
    },
    #[serde(rename_all = "camelCase")]
    Execute {
        statement_id: String,
        #[serde(default)]
        max_rows: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    PrepareAndExecute {
        connection_id: String,
        sql: String,
        #[serde(default)]
        max_rows: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    Fetch {
        statement_id: String,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        max_rows: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    CancelStatement { statement_id: String },
    #[serde(rename_all = "camelCase")]
    Translate {
        sql: String,
        from: String,
        to: String,
    },
    #[serde(rename_all = "camelCase")]
    GetTables {
        connection_id: String,
        #[serde(default)]
        schema_pattern: Option<String>,
        #[serde(default)]
        table_name_pattern: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetColumns {
        connection_id: String,
        #[serde(default)]
        schema_pattern: Option<String>,
        #[serde(default)]
        table_name_pattern: Option<String>,
        #[serde(default)]
        column_name_pattern: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GetSchemas { connection_id: String },
    #[serde(rename_all = "camelCase")]
    GetCatalogs { connection_id: String },
    #[serde(rename_all = "camelCase")]
    GetTableTypes { connection_id: String },
    #[serde(rename_all = "camelCase")]
    SourceStatus {},
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// One batch of rows. `fetch` is called repeatedly until `done`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub offset: usize,
    pub done: bool,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "response", rename_all = "camelCase")]
pub enum WireResponse {
    #[serde(rename_all = "camelCase")]
    ConnectionOpened { connection_id: String },
    #[serde(rename_all = "camelCase")]
    Closed {},
    #[serde(rename_all = "camelCase")]
    StatementCreated { statement_id: String },
    #[serde(rename_all = "camelCase")]
    Prepared { statement_id: String },
    #[serde(rename_all = "camelCase")]
    Executed {
        statement_id: String,
        query_id: String,
        columns: Vec<WireColumn>,
        frame: Frame,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
        truncated: bool,
    },
    #[serde(rename_all = "camelCase")]
    Fetched {
        statement_id: String,
        frame: Frame,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
        truncated: bool,
    },
    #[serde(rename_all = "camelCase")]
    Cancelled { statement_id: String },
    #[serde(rename_all = "camelCase")]
    Translated { sql: String },
    #[serde(rename_all = "camelCase")]
    ResultSet {
        columns: Vec<WireColumn>,
        rows: Vec<Vec<Value>>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_id: Option<String>,
        retryable: bool,
    },
}
