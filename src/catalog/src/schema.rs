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

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::table::TableMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// Backed by one data source.
    Physical,
    /// A virtual schema spanning sources.
    Federated,
}

/// A named collection of tables. Physical schemas carry the id of the data
/// source that owns them; federated schemas do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaMeta {
    pub name: String,
    pub schema_type: SchemaType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data_source_id: Option<String>,
    pub tables: BTreeMap<String, Arc<TableMeta>>,
}

impl SchemaMeta {
    pub fn physical(name: impl Into<String>, data_source_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_type: SchemaType::Physical,
            data_source_id: Some(data_source_id.into()),
            tables: BTreeMap::new(),
        }
    }

    pub fn federated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_type: SchemaType::Federated,
            data_source_id: None,
            tables: BTreeMap::new(),
        }
    }

    pub fn with_table(mut self, table: TableMeta) -> Self {
        self.tables
            .insert(table.name.to_ascii_lowercase(), Arc::new(table));
        self
    }

    pub fn table(&self, name: &str) -> Option<&Arc<TableMeta>> {
        self.tables.get(&name.to_ascii_lowercase())
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.values().map(|t| t.name.as_str())
    }
}
