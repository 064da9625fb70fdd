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

use chrono::{DateTime, Utc};
use datatypes::prelude::Value;
use serde::{Deserialize, Serialize};

/// Planner defaults for tables with no collected statistics.
pub const DEFAULT_ROW_COUNT: u64 = 1_000;
pub const DEFAULT_AVERAGE_ROW_SIZE: u64 = 100;

/// Default selectivities per predicate shape.
pub const DEFAULT_SELECTIVITY: f64 = 0.1;
pub const RANGE_SELECTIVITY: f64 = 0.3;
pub const LIKE_SELECTIVITY: f64 = 0.1;
pub const IN_SELECTIVITY: f64 = 0.2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub distinct_count: Option<u64>,
    pub null_count: Option<u64>,
    #[serde(skip)]
    pub min: Option<Value>,
    #[serde(skip)]
    pub max: Option<Value>,
}

/// Per-table statistics consumed by the cost-based optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatistics {
    pub row_count: u64,
    pub average_row_size: u64,
    pub columns: BTreeMap<String, ColumnStatistics>,
    pub updated_at: DateTime<Utc>,
}

impl TableStatistics {
    pub fn new(row_count: u64, average_row_size: u64) -> Self {
        Self {
            row_count,
            average_row_size,
            columns: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.columns.insert(name.into().to_ascii_lowercase(), stats);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnStatistics> {
        self.columns.get(&name.to_ascii_lowercase())
    }

    /// Selectivity of `column = literal`: 1/distinct when known, else the
    /// generic default.
    pub fn equality_selectivity(&self, column: &str) -> f64 {
        match self.column(column).and_then(|c| c.distinct_count) {
            Some(distinct) if distinct > 0 => 1.0 / distinct as f64,
            _ => DEFAULT_SELECTIVITY,
        }
    }
}

impl Default for TableStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_COUNT, DEFAULT_AVERAGE_ROW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_selectivity_falls_back() {
        let stats = TableStatistics::default();
        assert_eq!(DEFAULT_SELECTIVITY, stats.equality_selectivity("any"));

        let stats = stats.with_column(
            "id",
            ColumnStatistics {
                distinct_count: Some(200),
                ..Default::default()
            },
        );
        assert_eq!(1.0 / 200.0, stats.equality_selectivity("ID"));
    }
}
