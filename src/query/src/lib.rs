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

//! The query kernel: planning pipeline (parse, validate, logical plan,
//! rule-based rewrite, cost-based search, staged physical plan) and the
//! federated executor, behind one engine facade.

pub mod cbo;
pub mod cost;
pub mod error;
pub mod executor;
pub mod expr;
pub mod lifecycle;
pub mod optimizer;
pub mod physical;
pub mod plan;
pub mod planner;
pub mod translator;

use std::sync::Arc;

use async_stream::try_stream;
use catalog::{CatalogManagerRef, CatalogState};
use common_error::prelude::{ErrorExt, StatusCode};
use common_rows::adapter::RowStreamAdapter;
use common_rows::{MemoryRowStream, Row, SendableRowStream};
use common_telemetry::{debug, info, warn};
use connectors::ConnectorRegistryRef;
use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema, Value};
use futures::StreamExt;
use snafu::ResultExt;
use sql::dialect::Dialect;
use sql::parser::ParserContext;
use sql::statements::{DdlStatement, DmlStatement, ShowTables, Statement};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cbo::CostBasedOptimizer;
use crate::error::Result;
use crate::executor::{ExecutionContext, ExecutorConfig, FederatedExecutor};
use crate::lifecycle::{QueryLifecycle, QueryLifecycleRef};
use crate::optimizer::{OptimizerContext, RuleBasedOptimizer};
use crate::physical::{ExecutionPlan, PhysicalPlanner, DEFAULT_INTERMEDIATE_RESULT_LIMIT};
use crate::plan::PlanRef;
use crate::planner::Planner;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    pub cbo_step_budget: usize,
    pub intermediate_result_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            cbo_step_budget: cbo::DEFAULT_STEP_BUDGET,
            intermediate_result_limit: DEFAULT_INTERMEDIATE_RESULT_LIMIT,
        }
    }
}

/// The result of a started query: a lazy row stream plus the context the
/// caller reads after draining (row count, truncation, retries).
pub struct QueryOutput {
    pub query_id: Uuid,
    pub stream: SendableRowStream,
    pub context: Arc<ExecutionContext>,
}

pub type QueryEngineRef = Arc<QueryEngine>;

pub struct QueryEngine {
    catalog: CatalogManagerRef,
    registry: ConnectorRegistryRef,
    lifecycle: QueryLifecycleRef,
    executor: FederatedExecutor,
    rbo: RuleBasedOptimizer,
    cbo: CostBasedOptimizer,
    config: EngineConfig,
}

impl QueryEngine {
    pub fn new(
        catalog: CatalogManagerRef,
        registry: ConnectorRegistryRef,
        config: EngineConfig,
    ) -> QueryEngineRef {
        Arc::new(Self {
            catalog,
            registry: registry.clone(),
            lifecycle: QueryLifecycle::new(),
            executor: FederatedExecutor::new(registry, config.executor.clone()),
            rbo: RuleBasedOptimizer::new(),
            cbo: CostBasedOptimizer::new(config.cbo_step_budget),
            config,
        })
    }

    pub fn lifecycle(&self) -> &QueryLifecycleRef {
        &self.lifecycle
    }

    pub fn catalog(&self) -> &CatalogManagerRef {
        &self.catalog
    }

    /// The standalone translate operation; pure, no catalog involved.
    pub fn translate(&self, sql: &str, from: Dialect, to: Dialect) -> Result<String> {
        translator::translate(sql, from, to)
    }

    /// Cancel a running query; fires its token so stages and operators
    /// unwind.
    pub fn cancel_query(&self, query_id: Uuid) -> Result<()> {
        self.lifecycle.cancel(query_id)
    }

    /// Parse, plan, optimize and stage one SELECT without executing it.
    pub fn plan_sql(
        &self,
        sql: &str,
        dialect: Dialect,
    ) -> Result<(ExecutionPlan, Arc<CatalogState>)> {
        let statement =
            ParserContext::parse_single(sql, dialect).context(error::ParseSqlSnafu)?;
        let Statement::Query(query) = statement else {
            return error::UnsupportedFeatureSnafu {
                feature: format!("planning a {} statement", statement.kind()),
                suggestion: None,
            }
            .fail();
        };
        let (plan, snapshot) = self.plan_query_ast(&query, dialect, Uuid::new_v4())?;
        Ok((plan, snapshot))
    }

    fn plan_query_ast(
        &self,
        query: &sql::ast::Query,
        dialect: Dialect,
        query_id: Uuid,
    ) -> Result<(ExecutionPlan, Arc<CatalogState>)> {
        let snapshot = self.catalog.snapshot();
        let logical = Planner::new(&snapshot, dialect).plan_query(query)?;
        debug!("query {} logical plan:\n{}", query_id, logical.display_indent());

        let ctx = OptimizerContext {
            catalog: snapshot.clone(),
            registry: self.registry.clone(),
        };
        let rewritten = self.rbo.optimize(logical, &ctx)?;
        let (optimized, cost) = self.cbo.optimize(rewritten, &ctx)?;
        debug!(
            "query {} optimized plan (cost {:.1}):\n{}",
            query_id,
            cost,
            optimized.display_indent()
        );

        let plan = PhysicalPlanner::new(&ctx, self.config.intermediate_result_limit)
            .create_plan(query_id, &optimized)?;
        Ok((plan, snapshot))
    }

    /// Run one statement end to end. Queries go through the full pipeline;
    /// SHOW TABLES answers from the catalog; EXPLAIN renders the stage
    /// plan; DML/DDL pass through to the one source owning the target.
    pub async fn execute_sql(&self, sql: &str, dialect: Dialect) -> Result<QueryOutput> {
        let (query_id, token) = self.lifecycle.register(sql, dialect);
        let result = self.execute_registered(query_id, token, sql, dialect).await;
        if let Err(e) = &result {
            // Failures before Running still need a terminal state.
            let _ = self.lifecycle.start(query_id);
            let _ = self.lifecycle.fail(query_id, &e.to_string());
        }
        result
    }

    async fn execute_registered(
        &self,
        query_id: Uuid,
        token: CancellationToken,
        sql: &str,
        dialect: Dialect,
    ) -> Result<QueryOutput> {
        let statement =
            ParserContext::parse_single(sql, dialect).context(error::ParseSqlSnafu)?;
        info!("query {} accepted: {}", query_id, statement.kind());

        match statement {
            Statement::Query(query) => {
                self.execute_query(query_id, token, &query, dialect).await
            }
            Statement::ShowTables(show) => self.execute_show_tables(query_id, &show),
            Statement::Explain(inner) => self.execute_explain(query_id, &inner, dialect),
            Statement::Dml(dml) => self.execute_dml(query_id, &dml).await,
            Statement::Ddl(ddl) => self.execute_ddl(query_id, &ddl).await,
        }
    }

    async fn execute_query(
        &self,
        query_id: Uuid,
        token: CancellationToken,
        query: &sql::ast::Query,
        dialect: Dialect,
    ) -> Result<QueryOutput> {
        let (plan, snapshot) = self.plan_query_ast(query, dialect, query_id)?;
        self.lifecycle
            .set_target_sources(query_id, plan.target_sources());
        self.lifecycle.start(query_id)?;

        // Global timeout: fires the same token a client cancel does.
        let timeout = self.config.executor.query_timeout;
        let watchdog_token = token.clone();
        let watchdog_lifecycle = self.lifecycle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watchdog_token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    warn!("query {query_id} exceeded {timeout:?}; cancelling");
                    watchdog_lifecycle.cancel_if_running(query_id);
                    watchdog_token.cancel();
                }
            }
        });

        let context = ExecutionContext::new(query_id);
        let stream = self
            .executor
            .execute(&plan, snapshot, token.clone(), context.clone())
            .await?;

        Ok(QueryOutput {
            query_id,
            stream: self.finalize_stream(stream, query_id, token, context.clone()),
            context,
        })
    }

    /// Wraps the result stream so the lifecycle reaches a terminal state
    /// exactly when the stream ends, errors, or is dropped mid-way.
    fn finalize_stream(
        &self,
        mut stream: SendableRowStream,
        query_id: Uuid,
        token: CancellationToken,
        context: Arc<ExecutionContext>,
    ) -> SendableRowStream {
        let schema = stream.schema();
        let lifecycle = self.lifecycle.clone();
        let out = try_stream! {
            // Cancel producers when the consumer drops us early.
            let _guard = token.clone().drop_guard();
            loop {
                match stream.next().await {
                    Some(Ok(row)) => {
                        context.count_row();
                        yield row;
                    }
                    Some(Err(e)) => {
                        if e.status_code() == StatusCode::Cancelled {
                            lifecycle.cancel_if_running(query_id);
                        } else {
                            let _ = lifecycle.fail(query_id, &e.to_string());
                        }
                        Err(e)?;
                    }
                    None => {
                        let _ = lifecycle.complete(query_id, context.rows_returned());
                        break;
                    }
                }
            }
        };
        Box::pin(RowStreamAdapter::new(schema, Box::pin(out)))
    }

    fn execute_show_tables(&self, query_id: Uuid, show: &ShowTables) -> Result<QueryOutput> {
        self.lifecycle.start(query_id)?;
        let snapshot = self.catalog.snapshot();

        let schema = Arc::new(Schema::new(vec![
            ColumnSchema::new("table_schema", ConcreteDataType::String, false),
            ColumnSchema::new("table_name", ConcreteDataType::String, false),
            ColumnSchema::new("table_type", ConcreteDataType::String, false),
        ]));
        let mut rows = Vec::new();
        for (schema_meta, table) in snapshot.all_tables() {
            if let Some(only) = &show.schema {
                if !schema_meta.name.eq_ignore_ascii_case(only) {
                    continue;
                }
            }
            if let Some(pattern) = &show.pattern {
                if !executor::eval::like_match(&table.name, pattern) {
                    continue;
                }
            }
            rows.push(Row::new(vec![
                Value::from(schema_meta.name.clone()),
                Value::from(table.name.clone()),
                Value::from(format!("{:?}", table.table_type).to_ascii_lowercase()),
            ]));
        }
        let _ = self.lifecycle.complete(query_id, rows.len() as u64);

        let context = ExecutionContext::new(query_id);
        Ok(QueryOutput {
            query_id,
            stream: Box::pin(MemoryRowStream::new(schema, rows)),
            context,
        })
    }

    fn execute_explain(
        &self,
        query_id: Uuid,
        inner: &Statement,
        dialect: Dialect,
    ) -> Result<QueryOutput> {
        let Statement::Query(query) = inner else {
            return error::UnsupportedFeatureSnafu {
                feature: format!("EXPLAIN of a {} statement", inner.kind()),
                suggestion: None,
            }
            .fail();
        };
        let (plan, _snapshot) = self.plan_query_ast(query, dialect, query_id)?;
        self.lifecycle.start(query_id)?;

        let schema = Arc::new(Schema::new(vec![
            ColumnSchema::new("stage", ConcreteDataType::String, false),
            ColumnSchema::new("target", ConcreteDataType::String, false),
            ColumnSchema::new("operation", ConcreteDataType::String, false),
            ColumnSchema::new("estimated_rows", ConcreteDataType::Long, false),
        ]));
        let rows: Vec<Row> = physical::explain_plan(&plan)
            .into_iter()
            .map(|(stage, target, operation, estimated)| {
                Row::new(vec![
                    Value::from(stage),
                    Value::from(target),
                    Value::from(operation),
                    Value::Long(estimated as i64),
                ])
            })
            .collect();
        let _ = self.lifecycle.complete(query_id, rows.len() as u64);

        let context = ExecutionContext::new(query_id);
        Ok(QueryOutput {
            query_id,
            stream: Box::pin(MemoryRowStream::new(schema, rows)),
            context,
        })
    }

    /// A write statement passes through to the single source owning the
    /// target table.
    async fn execute_dml(&self, query_id: Uuid, dml: &DmlStatement) -> Result<QueryOutput> {
        self.lifecycle.start(query_id)?;
        let affected = self.run_on_target(&table_parts(&dml.table), &dml.sql, false).await?;
        let _ = self.lifecycle.complete(query_id, affected);

        let schema = Arc::new(Schema::new(vec![ColumnSchema::new(
            "affected_rows",
            ConcreteDataType::Long,
            false,
        )]));
        let rows = vec![Row::new(vec![Value::Long(affected as i64)])];
        let context = ExecutionContext::new(query_id);
        Ok(QueryOutput {
            query_id,
            stream: Box::pin(MemoryRowStream::new(schema, rows)),
            context,
        })
    }

    async fn execute_ddl(&self, query_id: Uuid, ddl: &DdlStatement) -> Result<QueryOutput> {
        self.lifecycle.start(query_id)?;
        let parts = ddl
            .table
            .as_ref()
            .map(table_parts)
            .ok_or_else(|| {
                error::UnsupportedFeatureSnafu {
                    feature: "DDL without a target table".to_string(),
                    suggestion: None,
                }
                .build()
            })?;
        self.run_on_target(&parts, &ddl.sql, true).await?;
        let _ = self.lifecycle.complete(query_id, 0);

        let schema = Arc::new(Schema::new(vec![ColumnSchema::new(
            "result",
            ConcreteDataType::String,
            false,
        )]));
        let rows = vec![Row::new(vec![Value::from("ok")])];
        let context = ExecutionContext::new(query_id);
        Ok(QueryOutput {
            query_id,
            stream: Box::pin(MemoryRowStream::new(schema, rows)),
            context,
        })
    }

    async fn run_on_target(
        &self,
        parts: &(Option<String>, String),
        sql: &str,
        is_ddl: bool,
    ) -> Result<u64> {
        let snapshot = self.catalog.snapshot();
        let (schema_meta, _table) = snapshot
            .resolve_table(parts.0.as_deref(), &parts.1)
            .ok_or_else(|| {
                error::TableNotFoundSnafu {
                    table: parts.1.clone(),
                }
                .build()
            })?;
        let source = snapshot.source_of_schema(&schema_meta).ok_or_else(|| {
            error::DataSourceNotFoundSnafu {
                name: schema_meta.name.clone(),
            }
            .build()
        })?;
        let connector = self.registry.get(source.kind).ok_or_else(|| {
            error::DataSourceNotFoundSnafu {
                name: source.name.clone(),
            }
            .build()
        })?;
        let mut session = connector
            .acquire(source)
            .await
            .context(error::ConnectorSnafu)?;
        if is_ddl {
            session
                .execute_ddl(sql)
                .await
                .context(error::ConnectorSnafu)?;
            Ok(0)
        } else {
            session
                .execute_update(sql)
                .await
                .context(error::ConnectorSnafu)
        }
    }
}

fn table_parts(name: &sql::ast::ObjectName) -> (Option<String>, String) {
    match name.0.as_slice() {
        [table] => (None, table.value.clone()),
        [schema, table] => (Some(schema.value.clone()), table.value.clone()),
        parts => (
            parts.first().map(|p| p.value.clone()),
            parts.last().map(|p| p.value.clone()).unwrap_or_default(),
        ),
    }
}
