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

//! Connector capability objects. Each data-source kind is served by one
//! [`Connector`], which can probe health, open sessions, execute sub-SQL
//! and discover schemas. The kernel only ever borrows sessions; a session
//! is released when the row stream it produced is dropped.

pub mod discovery;
pub mod elasticsearch;
pub mod error;
pub mod memory;
pub mod mysql;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catalog::{DataSource, SchemaMeta, SourceKind};
use common_rows::SendableRowStream;
use dashmap::DashMap;
use sql::dialect::Dialect;

use crate::error::Result;

/// Latency above which a successful probe is still reported degraded.
pub const DEGRADED_LATENCY: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

impl HealthReport {
    /// Build a report from a successful probe, downgrading slow probes.
    pub fn from_probe(latency: Duration, detail: Option<String>) -> Self {
        let status = if latency > DEGRADED_LATENCY {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            latency_ms: latency.as_millis() as u64,
            detail,
        }
    }

    pub fn unhealthy(latency: Duration, detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: latency.as_millis() as u64,
            detail: Some(detail.into()),
        }
    }
}

/// Which operators a source can evaluate in pushed-down sub-SQL. The
/// physical planner consults this when drawing stage boundaries.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub filter: bool,
    pub projection: bool,
    pub join: bool,
    pub aggregate: bool,
    pub sort: bool,
    pub limit: bool,
}

impl Capabilities {
    pub const RELATIONAL: Capabilities = Capabilities {
        filter: true,
        projection: true,
        join: true,
        aggregate: true,
        sort: true,
        limit: true,
    };

    /// Document stores evaluate everything except joins.
    pub const NO_JOIN: Capabilities = Capabilities {
        filter: true,
        projection: true,
        join: false,
        aggregate: true,
        sort: true,
        limit: true,
    };
}

/// An open session against one data source.
///
/// `execute_query` consumes the session: the returned stream owns it and
/// releases it when the stream is dropped or fully drained, which is how
/// cancellation propagates into sources.
#[async_trait]
pub trait Session: Send {
    async fn execute_query(self: Box<Self>, sql: &str) -> Result<SendableRowStream>;

    async fn execute_update(&mut self, sql: &str) -> Result<u64>;

    async fn execute_ddl(&mut self, sql: &str) -> Result<()>;
}

impl std::fmt::Debug for dyn Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Session")
    }
}

/// The capability object for one data-source kind.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// The dialect pushed-down sub-SQL is rendered in.
    fn native_dialect(&self) -> Dialect;

    fn capabilities(&self) -> Capabilities;

    async fn health_check(&self, source: &DataSource) -> Result<HealthReport>;

    async fn acquire(&self, source: &DataSource) -> Result<Box<dyn Session>>;

    /// Enumerate schemas (optionally one schema) with their tables, mapped
    /// onto the universal type system.
    async fn discover_schema(
        &self,
        source: &DataSource,
        schema: Option<&str>,
    ) -> Result<Vec<SchemaMeta>>;
}

pub type ConnectorRef = Arc<dyn Connector>;

/// Maps a source kind to the connector serving it.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<SourceKind, ConnectorRef>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in connector registered.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(mysql::MysqlConnector::new()));
        registry.register(Arc::new(postgres::PostgresConnector::new()));
        registry.register(Arc::new(elasticsearch::ElasticsearchConnector::new()));
        registry.register(Arc::new(memory::MemoryConnector::new()));
        registry
    }

    pub fn register(&self, connector: ConnectorRef) {
        self.connectors.insert(connector.kind(), connector);
    }

    pub fn get(&self, kind: SourceKind) -> Option<ConnectorRef> {
        self.connectors.get(&kind).map(|c| c.value().clone())
    }
}

pub type ConnectorRegistryRef = Arc<ConnectorRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_latency_threshold() {
        let report = HealthReport::from_probe(Duration::from_millis(1_200), None);
        assert_eq!(HealthStatus::Degraded, report.status);
        let report = HealthReport::from_probe(Duration::from_millis(20), None);
        assert_eq!(HealthStatus::Healthy, report.status);
    }

    #[test]
    fn test_default_registry_covers_all_kinds() {
        let registry = ConnectorRegistry::with_defaults();
        for kind in [
            SourceKind::Mysql,
            SourceKind::Postgresql,
            SourceKind::Elasticsearch,
            SourceKind::Memory,
        ] {
            assert!(registry.get(kind).is_some(), "missing connector for {kind}");
        }
    }
}
