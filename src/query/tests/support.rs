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

//! Shared fixture: two in-memory data sources behind one engine. `crm`
//! lives on source `s_rel`, `sales` on source `s_other`, so joins across
//! the two schemas exercise the federation path.

use std::sync::Arc;

use catalog::{
    CatalogManager, ColumnMeta, DataSource, SchemaMeta, SourceKind, TableMeta, TableStatistics,
    TableType,
};
use common_rows::Row;
use connectors::memory::MemoryConnector;
use connectors::ConnectorRegistry;
use datatypes::prelude::{ConcreteDataType, Value};
use query::{EngineConfig, QueryEngine, QueryEngineRef};

pub struct TestCluster {
    pub engine: QueryEngineRef,
    pub memory: Arc<MemoryConnector>,
}

pub fn cluster() -> TestCluster {
    cluster_with_config(EngineConfig::default())
}

pub fn cluster_with_config(config: EngineConfig) -> TestCluster {
    common_telemetry::init_default_ut_logging();

    let memory = Arc::new(MemoryConnector::new());
    let registry = Arc::new(ConnectorRegistry::new());
    registry.register(memory.clone());

    let catalog = Arc::new(CatalogManager::new());
    catalog
        .register_data_source(DataSource::new(
            "ds-rel",
            "s_rel",
            SourceKind::Memory,
            "memory://rel",
        ))
        .unwrap();
    catalog
        .register_data_source(DataSource::new(
            "ds-other",
            "s_other",
            SourceKind::Memory,
            "memory://other",
        ))
        .unwrap();
    catalog
        .register_schema(SchemaMeta::physical("crm", "ds-rel"))
        .unwrap();
    catalog
        .register_schema(SchemaMeta::physical("sales", "ds-other"))
        .unwrap();

    let users = TableMeta::try_new(
        "users",
        "crm",
        TableType::Table,
        vec![
            ColumnMeta::new("id", ConcreteDataType::Integer, false),
            ColumnMeta::new("name", ConcreteDataType::String, true),
            ColumnMeta::new("status", ConcreteDataType::String, true),
        ],
    )
    .unwrap();
    let user_rows: Vec<Row> = (1..=20)
        .map(|i| {
            Row::new(vec![
                Value::Integer(i),
                Value::from(format!("user{i}")),
                Value::from(if i % 2 == 0 { "active" } else { "idle" }),
            ])
        })
        .collect();
    catalog.register_table(users.clone()).unwrap();
    memory.register_table("crm", users, user_rows);

    let customers = TableMeta::try_new(
        "customers",
        "crm",
        TableType::Table,
        vec![
            ColumnMeta::new("id", ConcreteDataType::Integer, false),
            ColumnMeta::new("name", ConcreteDataType::String, true),
            ColumnMeta::new("region", ConcreteDataType::String, true),
        ],
    )
    .unwrap();
    let customer_rows = vec![
        Row::new(vec![
            Value::Integer(1),
            Value::from("John"),
            Value::from("North"),
        ]),
        Row::new(vec![
            Value::Integer(2),
            Value::from("Jane"),
            Value::from("South"),
        ]),
        Row::new(vec![
            Value::Integer(3),
            Value::from("Bob"),
            Value::from("East"),
        ]),
    ];
    catalog.register_table(customers.clone()).unwrap();
    memory.register_table("crm", customers, customer_rows);

    let orders = TableMeta::try_new(
        "orders",
        "sales",
        TableType::Table,
        vec![
            ColumnMeta::new("id", ConcreteDataType::Integer, false),
            ColumnMeta::new("customer_id", ConcreteDataType::Integer, false),
            ColumnMeta::new("amount", ConcreteDataType::Double, true),
        ],
    )
    .unwrap();
    let order_rows = vec![
        Row::new(vec![
            Value::Integer(1),
            Value::Integer(1),
            Value::Double(100.0),
        ]),
        Row::new(vec![
            Value::Integer(2),
            Value::Integer(1),
            Value::Double(250.0),
        ]),
        Row::new(vec![
            Value::Integer(3),
            Value::Integer(2),
            Value::Double(175.5),
        ]),
    ];
    catalog.register_table(orders.clone()).unwrap();
    memory.register_table("sales", orders, order_rows);

    // Statistics steer the join order and build-side choice.
    catalog
        .update_statistics("crm", "customers", TableStatistics::new(3, 24))
        .unwrap();
    catalog
        .update_statistics("sales", "orders", TableStatistics::new(3, 16))
        .unwrap();
    catalog
        .update_statistics("crm", "users", TableStatistics::new(20, 40))
        .unwrap();

    let engine = QueryEngine::new(catalog, registry, config);
    TestCluster { engine, memory }
}
