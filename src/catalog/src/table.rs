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

use std::collections::HashSet;

use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema};
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{self, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Table,
    View,
    Index,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: ConcreteDataType,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub precision: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scale: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub comment: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: ConcreteDataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            size: None,
            precision: None,
            scale: None,
            default_value: None,
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// A table registered in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub schema_name: String,
    pub table_type: TableType,
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexMeta>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub row_count: Option<u64>,
}

impl TableMeta {
    /// Validate the table invariants: unique column names, resolvable
    /// primary key and index references.
    pub fn try_new(
        name: impl Into<String>,
        schema_name: impl Into<String>,
        table_type: TableType,
        columns: Vec<ColumnMeta>,
    ) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            ensure!(
                seen.insert(column.name.to_ascii_lowercase()),
                error::InvalidTableDefSnafu {
                    table: name.clone(),
                    reason: format!("duplicate column {}", column.name),
                }
            );
        }
        Ok(Self {
            name,
            schema_name: schema_name.into(),
            table_type,
            columns,
            primary_key: Vec::new(),
            indexes: Vec::new(),
            row_count: None,
        })
    }

    pub fn with_primary_key(mut self, primary_key: Vec<String>) -> Result<Self> {
        for key in &primary_key {
            ensure!(
                self.column(key).is_some(),
                error::InvalidTableDefSnafu {
                    table: self.name.clone(),
                    reason: format!("primary key column {key} does not exist"),
                }
            );
        }
        self.primary_key = primary_key;
        Ok(self)
    }

    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// The row type of a full scan of this table, columns qualified with
    /// the table name.
    pub fn row_schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| {
                    ColumnSchema::new(c.name.clone(), c.data_type, c.nullable)
                        .with_relation(self.name.clone())
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_column_rejected() {
        let result = TableMeta::try_new(
            "users",
            "public",
            TableType::Table,
            vec![
                ColumnMeta::new("id", ConcreteDataType::Integer, false),
                ColumnMeta::new("ID", ConcreteDataType::Long, false),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_primary_key_must_resolve() {
        let table = TableMeta::try_new(
            "users",
            "public",
            TableType::Table,
            vec![ColumnMeta::new("id", ConcreteDataType::Integer, false)],
        )
        .unwrap();
        assert!(table.clone().with_primary_key(vec!["id".into()]).is_ok());
        assert!(table.with_primary_key(vec!["nope".into()]).is_err());
    }
}
