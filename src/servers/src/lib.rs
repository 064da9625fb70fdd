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

//! The wire surface of the engine: configuration loading, connection and
//! statement state, and the HTTP JSON protocol.

pub mod config;
pub mod error;
pub mod http;
pub mod instance;
pub mod wire;

use std::sync::Arc;

use catalog::CatalogManager;
use common_telemetry::{info, warn};
use connectors::discovery::ConnectorDiscovery;
use connectors::ConnectorRegistry;
use query::QueryEngine;

use crate::config::FedSqlConfig;
use crate::error::Result;
use crate::instance::{ServerInstance, ServerInstanceRef};

/// Build the whole stack from configuration: catalog, connectors, bulk
/// schema discovery, engine, wire instance.
pub async fn bootstrap(config: &FedSqlConfig) -> Result<ServerInstanceRef> {
    let catalog = Arc::new(CatalogManager::new());
    let registry = Arc::new(ConnectorRegistry::with_defaults());

    let mut discoverers = Vec::new();
    for source in config.data_sources()? {
        let name = source.name.clone();
        catalog.register_data_source(source.clone()).map_err(|e| {
            crate::error::InvalidConfigSnafu {
                detail: format!("failed to register source {name}: {e}"),
            }
            .build()
        })?;
        match registry.get(source.kind) {
            Some(connector) => {
                discoverers.push((
                    catalog
                        .snapshot()
                        .data_source_by_name(&name)
                        .expect("just registered")
                        .clone(),
                    Arc::new(ConnectorDiscovery::new(connector)) as Arc<dyn catalog::SchemaDiscovery>,
                ));
            }
            None => warn!("no connector registered for source kind {}", source.kind),
        }
    }

    // Partial availability: a source failing discovery is logged and
    // skipped inside initialize.
    catalog
        .initialize(discoverers)
        .await
        .map_err(|e| {
            crate::error::InvalidConfigSnafu {
                detail: e.to_string(),
            }
            .build()
        })?;
    info!(
        "catalog initialized with {} schemas",
        catalog.snapshot().schemas().count()
    );

    let engine = QueryEngine::new(
        catalog,
        registry.clone(),
        config.properties.engine_config(),
    );
    Ok(ServerInstance::new(
        engine,
        registry,
        config.properties.default_fetch_size,
    ))
}
