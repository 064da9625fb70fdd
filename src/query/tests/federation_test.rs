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

mod support;

use std::collections::HashSet;
use std::time::Duration;

use common_error::prelude::{ErrorExt, StatusCode};
use common_rows::util;
use datatypes::prelude::Value;
use query::lifecycle::QueryStatus;
use query::physical::PhysicalOperator;
use query::plan::AggregateMode;
use query::EngineConfig;
use sql::dialect::Dialect;
use sql::parser::ParserContext;
use support::cluster;

#[tokio::test]
async fn test_single_source_pushdown() {
    let cluster = cluster();

    let (plan, _) = cluster
        .engine
        .plan_sql(
            "SELECT id, name FROM users WHERE status = 'active' LIMIT 10",
            Dialect::Standard,
        )
        .unwrap();

    assert!(plan.is_single_pushdown(), "expected one pushdown stage");
    let stage = &plan.stages[0];
    assert!(
        stage.sql.contains("WHERE status = 'active'"),
        "stage sql: {}",
        stage.sql
    );
    assert!(stage.sql.contains("LIMIT 10"), "stage sql: {}", stage.sql);

    // The rendered stage SQL must parse in the target dialect's grammar.
    ParserContext::parse_single(&stage.sql, stage.dialect).unwrap();

    let output = cluster
        .engine
        .execute_sql(
            "SELECT id, name FROM users WHERE status = 'active' LIMIT 10",
            Dialect::Standard,
        )
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();
    assert!(rows.len() <= 10);
    assert!(rows.iter().all(|r| r.len() == 2));
}

#[tokio::test]
async fn test_cross_source_inner_join() {
    let cluster = cluster();
    let output = cluster
        .engine
        .execute_sql(
            "SELECT c.name, o.amount FROM customers c JOIN orders o ON c.id = o.customer_id",
            Dialect::Standard,
        )
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();

    let got: HashSet<(String, String)> = rows
        .iter()
        .map(|r| (r.value(0).to_string(), r.value(1).to_string()))
        .collect();
    let expected: HashSet<(String, String)> = [
        ("John", "100"),
        ("John", "250"),
        ("Jane", "175.5"),
    ]
    .into_iter()
    .map(|(n, a)| (n.to_string(), a.to_string()))
    .collect();
    assert_eq!(expected, got);

    let record = cluster.engine.lifecycle().get(output.query_id).unwrap();
    assert_eq!(QueryStatus::Completed, record.status);
    assert_eq!(Some(3), record.row_count);
    assert_eq!(2, record.target_sources.len());
}

#[tokio::test]
async fn test_cross_source_aggregate_splits() {
    let cluster = cluster();

    let sql = "SELECT customer_id, SUM(amount) FROM orders GROUP BY customer_id";
    let (plan, _) = cluster.engine.plan_sql(sql, Dialect::Standard).unwrap();

    // The pushed half carries the GROUP BY; the federation root combines
    // partial states.
    assert_eq!(1, plan.stages.len());
    let stage = &plan.stages[0];
    assert!(
        stage.sql.contains("GROUP BY"),
        "partial aggregate should push: {}",
        stage.sql
    );
    assert!(stage.sql.contains("SUM"), "stage sql: {}", stage.sql);
    ParserContext::parse_single(&stage.sql, stage.dialect).unwrap();
    match &plan.root {
        PhysicalOperator::Aggregate { mode, .. } => {
            assert_eq!(AggregateMode::Final, *mode);
        }
        other => panic!("expected a final aggregate at the root, got {}", other.name()),
    }

    let output = cluster
        .engine
        .execute_sql(sql, Dialect::Standard)
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();
    assert_eq!(2, rows.len());

    let mut totals: Vec<(i64, f64)> = rows
        .iter()
        .map(|r| {
            let id = r.value(0).as_i64().unwrap();
            let total = r.value(1).as_f64().unwrap();
            (id, total)
        })
        .collect();
    totals.sort_by_key(|(id, _)| *id);
    assert_eq!(vec![(1, 350.0), (2, 175.5)], totals);
}

#[tokio::test]
async fn test_intermediate_limit_truncates_with_warning() {
    let config = EngineConfig {
        intermediate_result_limit: 2,
        ..Default::default()
    };
    let cluster = support::cluster_with_config(config);

    let output = cluster
        .engine
        .execute_sql(
            "SELECT c.name, o.amount FROM customers c JOIN orders o ON c.id = o.customer_id",
            Dialect::Standard,
        )
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();

    assert!(rows.len() <= 2, "got {} rows", rows.len());
    assert!(output.context.is_truncated());
    let warning = output.context.warning().expect("warning expected");
    assert!(warning.contains('2'), "warning should name the limit: {warning}");

    // Truncation is not a failure.
    let record = cluster.engine.lifecycle().get(output.query_id).unwrap();
    assert_eq!(QueryStatus::Completed, record.status);
}

#[tokio::test]
async fn test_cancellation_stops_a_blocking_query() {
    let cluster = cluster();
    cluster.memory.set_scan_delay(Some(Duration::from_secs(30)));

    let output = cluster
        .engine
        .execute_sql("SELECT id FROM users", Dialect::Standard)
        .await
        .unwrap();
    let query_id = output.query_id;

    cluster.engine.cancel_query(query_id).unwrap();

    let collected = tokio::time::timeout(
        Duration::from_secs(5),
        util::collect(output.stream),
    )
    .await
    .expect("cancellation must unblock the stream promptly");
    let err = collected.expect_err("cancelled query delivers no complete result");
    assert_eq!(StatusCode::Cancelled, err.status_code());

    let record = cluster.engine.lifecycle().get(query_id).unwrap();
    assert_eq!(QueryStatus::Cancelled, record.status);
}

#[tokio::test]
async fn test_retryable_stage_errors_back_off_and_recover() {
    let cluster = cluster();
    cluster.memory.fail_next_acquires(2);

    let output = cluster
        .engine
        .execute_sql("SELECT id FROM users LIMIT 3", Dialect::Standard)
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();
    assert_eq!(3, rows.len());
    assert_eq!(2, output.context.retry_count());
}

#[tokio::test]
async fn test_stage_fails_after_retry_budget() {
    let cluster = cluster();
    // 1 initial attempt + 3 retries all fail; the 5th never happens.
    cluster.memory.fail_next_acquires(4);

    let output = cluster
        .engine
        .execute_sql("SELECT id FROM users LIMIT 3", Dialect::Standard)
        .await
        .unwrap();
    let result = util::collect(output.stream).await;
    assert!(result.is_err());

    let record = cluster.engine.lifecycle().get(output.query_id).unwrap();
    assert_eq!(QueryStatus::Failed, record.status);

    // The budget consumed exactly four attempts.
    assert!(cluster.memory.acquire_attempts() >= 4);
}

#[tokio::test]
async fn test_translate_round_trip() {
    let cluster = cluster();
    let oracle = cluster
        .engine
        .translate("SELECT * FROM users LIMIT 10", Dialect::Mysql, Dialect::Oracle)
        .unwrap();
    assert!(
        oracle.contains("FETCH FIRST 10 ROWS ONLY"),
        "oracle form: {oracle}"
    );
    ParserContext::parse_single(&oracle, Dialect::Oracle).unwrap();

    let back = cluster
        .engine
        .translate(&oracle, Dialect::Oracle, Dialect::Mysql)
        .unwrap();
    assert!(back.contains("LIMIT 10"), "mysql form: {back}");
}

#[tokio::test]
async fn test_show_tables_answers_from_catalog() {
    let cluster = cluster();
    let output = cluster
        .engine
        .execute_sql("SHOW TABLES", Dialect::Postgresql)
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();
    let names: HashSet<String> = rows.iter().map(|r| r.value(1).to_string()).collect();
    assert!(names.contains("users"));
    assert!(names.contains("customers"));
    assert!(names.contains("orders"));
}

#[tokio::test]
async fn test_union_across_sources() {
    let cluster = cluster();
    let output = cluster
        .engine
        .execute_sql(
            "SELECT id FROM customers UNION ALL SELECT customer_id FROM orders",
            Dialect::Standard,
        )
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();
    assert_eq!(6, rows.len());
}

#[tokio::test]
async fn test_semi_join_from_in_subquery() {
    let cluster = cluster();
    let output = cluster
        .engine
        .execute_sql(
            "SELECT name FROM customers WHERE id IN (SELECT customer_id FROM orders)",
            Dialect::Standard,
        )
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();
    let names: HashSet<String> = rows.iter().map(|r| r.value(0).to_string()).collect();
    assert_eq!(
        HashSet::from(["John".to_string(), "Jane".to_string()]),
        names
    );
}

#[tokio::test]
async fn test_left_join_emits_null_extended_rows() {
    let cluster = cluster();
    let output = cluster
        .engine
        .execute_sql(
            "SELECT c.name, o.amount FROM customers c \
             LEFT JOIN orders o ON c.id = o.customer_id ORDER BY c.name",
            Dialect::Standard,
        )
        .await
        .unwrap();
    let rows = util::collect(output.stream).await.unwrap();
    // Bob has no orders and still surfaces once, null-extended.
    assert_eq!(4, rows.len());
    let bob: Vec<_> = rows
        .iter()
        .filter(|r| r.value(0).to_string() == "Bob")
        .collect();
    assert_eq!(1, bob.len());
    assert_eq!(&Value::Null, bob[0].value(1));
}

mod rbo_laws {
    use std::sync::Arc;

    use query::optimizer::{OptimizerContext, RuleBasedOptimizer};
    use query::planner::Planner;
    use sql::statements::Statement;

    use super::*;

    #[tokio::test]
    async fn test_rule_program_is_idempotent() {
        let cluster = cluster();
        let snapshot = cluster.engine.catalog().snapshot();
        let registry = Arc::new(connectors::ConnectorRegistry::with_defaults());

        let sqls = [
            "SELECT id, name FROM users WHERE status = 'active' LIMIT 10",
            "SELECT c.name, o.amount FROM customers c JOIN orders o ON c.id = o.customer_id \
             WHERE o.amount > 100",
            "SELECT customer_id, SUM(amount) FROM orders GROUP BY customer_id",
        ];
        for sql in sqls {
            let statement = ParserContext::parse_single(sql, Dialect::Standard).unwrap();
            let Statement::Query(query) = statement else {
                panic!()
            };
            let logical = Planner::new(&snapshot, Dialect::Standard)
                .plan_query(&query)
                .unwrap();

            let ctx = OptimizerContext {
                catalog: snapshot.clone(),
                registry: registry.clone(),
            };
            let rbo = RuleBasedOptimizer::new();
            let once = rbo.optimize(logical, &ctx).unwrap();
            let twice = rbo.optimize(once.clone(), &ctx).unwrap();
            assert_eq!(once, twice, "rule program not idempotent for: {sql}");
        }
    }
}
