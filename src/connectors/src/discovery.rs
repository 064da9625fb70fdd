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

use async_trait::async_trait;
use catalog::{DataSource, SchemaDiscovery, SchemaMeta};
use common_error::prelude::BoxedError;

use crate::ConnectorRef;

/// Adapts a [`crate::Connector`] to the catalog's discovery seam so the
/// catalog crate stays free of connector dependencies.
pub struct ConnectorDiscovery {
    connector: ConnectorRef,
}

impl ConnectorDiscovery {
    pub fn new(connector: ConnectorRef) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl SchemaDiscovery for ConnectorDiscovery {
    async fn discover(&self, source: &DataSource) -> Result<Vec<SchemaMeta>, BoxedError> {
        self.connector
            .discover_schema(source, None)
            .await
            .map_err(BoxedError::new)
    }
}
