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

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::data_type::ConcreteDataType;
use crate::error::{self, Result};

pub type SchemaRef = Arc<Schema>;

/// One column of a row type. `relation` is the table alias that produced
/// the column, kept so the planner can resolve qualified references and the
/// translator can re-render them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relation: Option<String>,
    pub data_type: ConcreteDataType,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: ConcreteDataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            relation: None,
            data_type,
            nullable,
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }
}

/// The row type of a plan node or result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    column_schemas: Vec<ColumnSchema>,
    name_to_index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema from columns. Unqualified duplicate names are allowed
    /// (a join of two tables can surface `id` twice); `index_of` then
    /// resolves to the first match, and qualified lookup disambiguates.
    pub fn new(column_schemas: Vec<ColumnSchema>) -> Self {
        let mut name_to_index = HashMap::with_capacity(column_schemas.len());
        for (i, column) in column_schemas.iter().enumerate() {
            name_to_index
                .entry(column.name.to_ascii_lowercase())
                .or_insert(i);
        }
        Self {
            column_schemas,
            name_to_index,
        }
    }

    /// Like [`Schema::new`], but rejects duplicate column names. Used for
    /// result sets and catalog tables, where names must be unique.
    pub fn try_new_unique(column_schemas: Vec<ColumnSchema>) -> Result<Self> {
        let mut seen = HashMap::with_capacity(column_schemas.len());
        for (i, column) in column_schemas.iter().enumerate() {
            let prev = seen.insert(column.name.to_ascii_lowercase(), i);
            ensure!(
                prev.is_none(),
                error::DuplicateColumnSnafu {
                    name: column.name.clone()
                }
            );
        }
        Ok(Self {
            column_schemas,
            name_to_index: seen,
        })
    }

    pub fn column_schemas(&self) -> &[ColumnSchema] {
        &self.column_schemas
    }

    pub fn num_columns(&self) -> usize {
        self.column_schemas.len()
    }

    pub fn column_schema(&self, index: usize) -> &ColumnSchema {
        &self.column_schemas[index]
    }

    /// Resolve an unqualified column name, case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&name.to_ascii_lowercase()).copied()
    }

    /// Resolve a `relation.column` reference.
    pub fn index_of_qualified(&self, relation: &str, name: &str) -> Option<usize> {
        self.column_schemas.iter().position(|c| {
            c.relation
                .as_deref()
                .is_some_and(|r| r.eq_ignore_ascii_case(relation))
                && c.name.eq_ignore_ascii_case(name)
        })
    }

    /// Whether `name` is ambiguous among unqualified columns.
    pub fn is_ambiguous(&self, name: &str) -> bool {
        self.column_schemas
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case(name))
            .count()
            > 1
    }

    /// The schema of a column subset, in `indices` order.
    pub fn project(&self, indices: &[usize]) -> Schema {
        Schema::new(
            indices
                .iter()
                .map(|i| self.column_schemas[*i].clone())
                .collect(),
        )
    }

    /// Estimated row width in bytes, used by the cost model.
    pub fn average_row_width(&self) -> usize {
        self.column_schemas
            .iter()
            .map(|c| c.data_type.average_width())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            ColumnSchema::new("id", ConcreteDataType::Integer, false).with_relation("c"),
            ColumnSchema::new("name", ConcreteDataType::String, true).with_relation("c"),
            ColumnSchema::new("id", ConcreteDataType::Long, false).with_relation("o"),
        ])
    }

    #[test]
    fn test_lookup() {
        let schema = sample();
        assert_eq!(Some(0), schema.index_of("ID"));
        assert_eq!(Some(2), schema.index_of_qualified("o", "id"));
        assert!(schema.is_ambiguous("id"));
        assert!(!schema.is_ambiguous("name"));
    }

    #[test]
    fn test_unique_rejects_duplicates() {
        let result = Schema::try_new_unique(vec![
            ColumnSchema::new("a", ConcreteDataType::Integer, false),
            ColumnSchema::new("A", ConcreteDataType::String, false),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_project_preserves_order() {
        let schema = sample().project(&[2, 1]);
        assert_eq!("id", schema.column_schema(0).name);
        assert_eq!(Some("o"), schema.column_schema(0).relation.as_deref());
        assert_eq!("name", schema.column_schema(1).name);
    }
}
