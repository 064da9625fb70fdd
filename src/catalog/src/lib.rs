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

//! The metadata catalog: data sources, schemas, tables and statistics.
//!
//! State is an immutable value behind an [`ArcSwap`]; every mutation swaps
//! in a new state, so lookups always observe a consistent snapshot and a
//! query can pin the snapshot it planned against for its whole lifetime.

pub mod datasource;
pub mod error;
pub mod schema;
pub mod statistics;
pub mod table;

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use common_error::prelude::BoxedError;
use common_telemetry::{info, warn};
use snafu::{ensure, OptionExt};

pub use crate::datasource::{DataSource, Secret, SourceKind, SourceStatus};
use crate::error::Result;
pub use crate::schema::{SchemaMeta, SchemaType};
pub use crate::statistics::TableStatistics;
pub use crate::table::{ColumnMeta, TableMeta, TableType};

pub type CatalogManagerRef = Arc<CatalogManager>;

/// One immutable version of the catalog contents.
#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    /// Data sources by id.
    data_sources: BTreeMap<String, Arc<DataSource>>,
    /// Source-name -> source-id index.
    source_names: BTreeMap<String, String>,
    /// Schemas by lower-cased name.
    schemas: BTreeMap<String, Arc<SchemaMeta>>,
    /// Statistics by `schema.table`, lower-cased.
    statistics: BTreeMap<String, Arc<TableStatistics>>,
    /// Unqualified table references resolve here first.
    default_schema: Option<String>,
}

impl CatalogState {
    pub fn data_source_by_id(&self, id: &str) -> Option<&Arc<DataSource>> {
        self.data_sources.get(id)
    }

    pub fn data_source_by_name(&self, name: &str) -> Option<&Arc<DataSource>> {
        self.source_names
            .get(name)
            .and_then(|id| self.data_sources.get(id))
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &Arc<DataSource>> {
        self.data_sources.values()
    }

    pub fn schema(&self, name: &str) -> Option<&Arc<SchemaMeta>> {
        self.schemas.get(&name.to_ascii_lowercase())
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<SchemaMeta>> {
        self.schemas.values()
    }

    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<&Arc<TableMeta>> {
        self.schema(schema).and_then(|s| s.table(table))
    }

    /// Resolve a table reference. A qualified name looks in that schema; an
    /// unqualified name tries the default schema first, then the whole
    /// catalog (first match in schema-name order).
    pub fn resolve_table(
        &self,
        schema: Option<&str>,
        table: &str,
    ) -> Option<(Arc<SchemaMeta>, Arc<TableMeta>)> {
        if let Some(schema_name) = schema {
            let schema = self.schema(schema_name)?;
            let table = schema.table(table)?;
            return Some((schema.clone(), table.clone()));
        }
        if let Some(default) = self.default_schema.as_deref() {
            if let Some(schema) = self.schema(default) {
                if let Some(found) = schema.table(table) {
                    return Some((schema.clone(), found.clone()));
                }
            }
        }
        self.schemas.values().find_map(|schema| {
            schema
                .table(table)
                .map(|found| (schema.clone(), found.clone()))
        })
    }

    /// The data source owning a schema, for physical schemas.
    pub fn source_of_schema(&self, schema: &SchemaMeta) -> Option<&Arc<DataSource>> {
        schema
            .data_source_id
            .as_deref()
            .and_then(|id| self.data_sources.get(id))
    }

    pub fn all_tables(&self) -> Vec<(Arc<SchemaMeta>, Arc<TableMeta>)> {
        self.schemas
            .values()
            .flat_map(|schema| {
                schema
                    .tables
                    .values()
                    .map(move |table| (schema.clone(), table.clone()))
            })
            .collect()
    }

    pub fn statistics(&self, schema: &str, table: &str) -> Option<&Arc<TableStatistics>> {
        self.statistics
            .get(&format!("{}.{}", schema.to_ascii_lowercase(), table.to_ascii_lowercase()))
    }
}

/// The process-wide catalog service. Mutations are race-free; lookups go
/// through [`CatalogManager::snapshot`].
pub struct CatalogManager {
    state: ArcSwap<CatalogState>,
}

impl Default for CatalogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogManager {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(CatalogState::default()),
        }
    }

    /// The current immutable snapshot.
    pub fn snapshot(&self) -> Arc<CatalogState> {
        self.state.load_full()
    }

    /// Apply a validated mutation with a compare-and-swap retry loop.
    fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&CatalogState) -> Result<CatalogState>,
    {
        loop {
            let current = self.state.load_full();
            let next = Arc::new(f(&current)?);
            let previous = self.state.compare_and_swap(&current, next);
            if Arc::ptr_eq(&previous, &current) {
                return Ok(());
            }
        }
    }

    pub fn register_data_source(&self, source: DataSource) -> Result<()> {
        self.mutate(|state| {
            ensure!(
                !state.source_names.contains_key(&source.name),
                error::DataSourceAlreadyExistsSnafu {
                    name: source.name.clone()
                }
            );
            let mut next = state.clone();
            next.source_names
                .insert(source.name.clone(), source.id.clone());
            next.data_sources
                .insert(source.id.clone(), Arc::new(source.clone()));
            Ok(next)
        })
    }

    /// Remove a data source and cascade to its schemas, tables and
    /// statistics.
    pub fn unregister_data_source(&self, name: &str) -> Result<()> {
        self.mutate(|state| {
            let id = state
                .source_names
                .get(name)
                .context(error::DataSourceNotFoundSnafu { name })?
                .clone();
            let mut next = state.clone();
            next.source_names.remove(name);
            next.data_sources.remove(&id);
            let doomed: Vec<String> = next
                .schemas
                .iter()
                .filter(|(_, s)| s.data_source_id.as_deref() == Some(id.as_str()))
                .map(|(key, _)| key.clone())
                .collect();
            for key in doomed {
                if let Some(schema) = next.schemas.remove(&key) {
                    for table in schema.tables.keys() {
                        next.statistics.remove(&format!("{key}.{table}"));
                    }
                }
            }
            Ok(next)
        })
    }

    /// Update the lifecycle status of a data source, enforcing the
    /// transition graph.
    pub fn update_source_status(&self, name: &str, status: SourceStatus) -> Result<()> {
        self.mutate(|state| {
            let source = state
                .data_source_by_name(name)
                .context(error::DataSourceNotFoundSnafu { name })?;
            if !source.status.can_transition_to(status) && source.status != status {
                warn!(
                    "ignoring invalid source status transition {:?} -> {:?} for {}",
                    source.status, status, name
                );
                return Ok(state.clone());
            }
            let mut updated = (**source).clone();
            updated.status = status;
            updated.updated_at = chrono::Utc::now();
            let mut next = state.clone();
            next.data_sources
                .insert(updated.id.clone(), Arc::new(updated));
            Ok(next)
        })
    }

    pub fn register_schema(&self, schema: SchemaMeta) -> Result<()> {
        self.mutate(|state| {
            let key = schema.name.to_ascii_lowercase();
            ensure!(
                !state.schemas.contains_key(&key),
                error::SchemaAlreadyExistsSnafu {
                    name: schema.name.clone()
                }
            );
            if let Some(source_id) = schema.data_source_id.as_deref() {
                ensure!(
                    state.data_sources.contains_key(source_id),
                    error::DanglingDataSourceSnafu {
                        schema: schema.name.clone(),
                        data_source_id: source_id,
                    }
                );
            }
            let mut next = state.clone();
            next.schemas.insert(key, Arc::new(schema.clone()));
            Ok(next)
        })
    }

    pub fn unregister_schema(&self, name: &str) -> Result<()> {
        self.mutate(|state| {
            let key = name.to_ascii_lowercase();
            let mut next = state.clone();
            let schema = next
                .schemas
                .remove(&key)
                .context(error::SchemaNotFoundSnafu { name })?;
            for table in schema.tables.keys() {
                next.statistics.remove(&format!("{key}.{table}"));
            }
            Ok(next)
        })
    }

    pub fn register_table(&self, table: TableMeta) -> Result<()> {
        self.mutate(|state| {
            let key = table.schema_name.to_ascii_lowercase();
            let schema = state.schemas.get(&key).context(error::SchemaNotFoundSnafu {
                name: table.schema_name.clone(),
            })?;
            ensure!(
                schema.table(&table.name).is_none(),
                error::TableAlreadyExistsSnafu {
                    schema: table.schema_name.clone(),
                    table: table.name.clone(),
                }
            );
            let mut next = state.clone();
            let updated = (**schema).clone().with_table(table.clone());
            next.schemas.insert(key, Arc::new(updated));
            Ok(next)
        })
    }

    pub fn unregister_table(&self, schema_name: &str, table_name: &str) -> Result<()> {
        self.mutate(|state| {
            let key = schema_name.to_ascii_lowercase();
            let schema = state
                .schemas
                .get(&key)
                .context(error::SchemaNotFoundSnafu { name: schema_name })?;
            ensure!(
                schema.table(table_name).is_some(),
                error::TableNotFoundSnafu {
                    schema: schema_name,
                    table: table_name,
                }
            );
            let mut updated = (**schema).clone();
            updated.tables.remove(&table_name.to_ascii_lowercase());
            let mut next = state.clone();
            next.statistics
                .remove(&format!("{key}.{}", table_name.to_ascii_lowercase()));
            next.schemas.insert(key, Arc::new(updated));
            Ok(next)
        })
    }

    pub fn update_statistics(
        &self,
        schema: &str,
        table: &str,
        statistics: TableStatistics,
    ) -> Result<()> {
        self.mutate(|state| {
            let mut next = state.clone();
            next.statistics.insert(
                format!(
                    "{}.{}",
                    schema.to_ascii_lowercase(),
                    table.to_ascii_lowercase()
                ),
                Arc::new(statistics.clone()),
            );
            Ok(next)
        })
    }

    pub fn set_default_schema(&self, name: Option<String>) -> Result<()> {
        self.mutate(|state| {
            let mut next = state.clone();
            next.default_schema = name.clone();
            Ok(next)
        })
    }

    /// Drop everything. Used by tests and shutdown.
    pub fn clear(&self) {
        self.state.store(Arc::new(CatalogState::default()));
    }

    /// Bulk discovery at startup. Failure of one source must not block the
    /// others; failed sources are logged and skipped.
    pub async fn initialize(
        &self,
        discoverers: Vec<(Arc<DataSource>, Arc<dyn SchemaDiscovery>)>,
    ) -> Result<()> {
        for (source, discovery) in discoverers {
            self.update_source_status(&source.name, SourceStatus::Connecting)
                .ok();
            match discovery.discover(&source).await {
                Ok(schemas) => {
                    for schema in schemas {
                        let table_count = schema.tables.len();
                        match self.register_schema(schema) {
                            Ok(()) => info!(
                                "discovered schema from source {} with {} tables",
                                source.name, table_count
                            ),
                            Err(e) => warn!(
                                "failed to register discovered schema from {}: {}",
                                source.name, e
                            ),
                        }
                    }
                    self.update_source_status(&source.name, SourceStatus::Connected)
                        .ok();
                    self.update_source_status(&source.name, SourceStatus::Active)
                        .ok();
                }
                Err(e) => {
                    warn!("schema discovery failed for source {}: {}", source.name, e);
                    self.update_source_status(&source.name, SourceStatus::Failed)
                        .ok();
                }
            }
        }
        Ok(())
    }
}

/// Implemented by connectors that can enumerate the schemas and tables of
/// a data source. The error is type-erased so this crate does not depend
/// on connector error enums.
#[async_trait]
pub trait SchemaDiscovery: Send + Sync {
    async fn discover(
        &self,
        source: &DataSource,
    ) -> std::result::Result<Vec<SchemaMeta>, BoxedError>;
}

#[cfg(test)]
mod tests {
    use datatypes::prelude::ConcreteDataType;

    use super::*;

    fn manager_with_source() -> CatalogManager {
        let manager = CatalogManager::new();
        manager
            .register_data_source(DataSource::new(
                "ds-1",
                "orders_db",
                SourceKind::Mysql,
                "mysql://localhost:3306/orders",
            ))
            .unwrap();
        manager
    }

    fn users_table(schema: &str) -> TableMeta {
        TableMeta::try_new(
            "users",
            schema,
            TableType::Table,
            vec![
                ColumnMeta::new("id", ConcreteDataType::Integer, false),
                ColumnMeta::new("name", ConcreteDataType::String, true),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let manager = manager_with_source();
        manager
            .register_schema(SchemaMeta::physical("sales", "ds-1"))
            .unwrap();
        manager.register_table(users_table("sales")).unwrap();

        let snapshot = manager.snapshot();
        let (schema, table) = snapshot.resolve_table(None, "USERS").unwrap();
        assert_eq!("sales", schema.name);
        assert_eq!("users", table.name);
        assert!(snapshot.resolve_table(Some("sales"), "users").is_some());
        assert!(snapshot.resolve_table(Some("hr"), "users").is_none());
    }

    #[test]
    fn test_duplicate_source_name_rejected() {
        let manager = manager_with_source();
        let duplicate = DataSource::new("ds-2", "orders_db", SourceKind::Postgresql, "pg://x");
        assert!(manager.register_data_source(duplicate).is_err());
    }

    #[test]
    fn test_physical_schema_requires_source() {
        let manager = CatalogManager::new();
        let err = manager
            .register_schema(SchemaMeta::physical("sales", "missing"))
            .unwrap_err();
        assert!(matches!(err, error::Error::DanglingDataSource { .. }));
    }

    #[test]
    fn test_unregister_source_cascades() {
        let manager = manager_with_source();
        manager
            .register_schema(SchemaMeta::physical("sales", "ds-1"))
            .unwrap();
        manager.register_table(users_table("sales")).unwrap();
        manager
            .update_statistics("sales", "users", TableStatistics::new(10, 50))
            .unwrap();

        manager.unregister_data_source("orders_db").unwrap();

        let snapshot = manager.snapshot();
        assert!(snapshot.schema("sales").is_none());
        assert!(snapshot.statistics("sales", "users").is_none());
        assert!(snapshot.data_source_by_name("orders_db").is_none());
    }

    #[test]
    fn test_snapshot_is_stable_across_mutations() {
        let manager = manager_with_source();
        manager
            .register_schema(SchemaMeta::physical("sales", "ds-1"))
            .unwrap();
        let before = manager.snapshot();
        manager.register_table(users_table("sales")).unwrap();

        // The pinned snapshot does not see the new table; a fresh one does.
        assert!(before.table("sales", "users").is_none());
        assert!(manager.snapshot().table("sales", "users").is_some());
    }
}
