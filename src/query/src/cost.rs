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

//! Cardinality estimation and the federation-aware cost model. Cost is
//! scan work at the sources, plus a penalty for every row crossing a
//! data-source boundary, plus CPU work for in-memory operators.

use catalog::statistics::{
    DEFAULT_ROW_COUNT, DEFAULT_SELECTIVITY, IN_SELECTIVITY, LIKE_SELECTIVITY, RANGE_SELECTIVITY,
};
use catalog::{CatalogState, SourceKind};
use connectors::ConnectorRegistry;

use crate::expr::{BinaryOp, Expr};
use crate::plan::{AggregateMode, JoinType, LogicalPlan, TableScan};

/// Cost units charged per row shipped across a source boundary.
pub const NETWORK_ROW_COST: f64 = 10.0;
/// Cost units charged per row read at a source, per 100 bytes of width.
pub const SCAN_ROW_COST: f64 = 1.0;
/// Cost units charged per row passing through an in-memory operator.
pub const CPU_ROW_COST: f64 = 0.02;

/// The data source a subtree is pinned to when every operator in it can
/// be evaluated by that source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTag {
    pub source_id: String,
    pub source_name: String,
    pub kind: SourceKind,
}

/// Compute the pushdown tag of a subtree: `Some` when the whole subtree
/// can run as one sub-query on a single source.
pub fn source_tag(plan: &LogicalPlan, registry: &ConnectorRegistry) -> Option<SourceTag> {
    match plan {
        LogicalPlan::TableScan(scan) => Some(SourceTag {
            source_id: scan.source_id.clone(),
            source_name: scan.source_name.clone(),
            kind: scan.source_kind,
        }),
        LogicalPlan::Filter(filter) => {
            if filter.predicate.contains_subquery() {
                return None;
            }
            let tag = source_tag(&filter.input, registry)?;
            capability(&tag, registry, |c| c.filter).then_some(tag)
        }
        LogicalPlan::Project(project) => {
            let tag = source_tag(&project.input, registry)?;
            capability(&tag, registry, |c| c.projection).then_some(tag)
        }
        LogicalPlan::Sort(sort) => {
            let tag = source_tag(&sort.input, registry)?;
            let ok = capability(&tag, registry, |c| c.sort)
                && (sort.fetch.is_none() || capability(&tag, registry, |c| c.limit));
            ok.then_some(tag)
        }
        LogicalPlan::Limit(limit) => {
            let tag = source_tag(&limit.input, registry)?;
            capability(&tag, registry, |c| c.limit).then_some(tag)
        }
        LogicalPlan::Aggregate(agg) => {
            // The final half of a split always runs at the federation
            // layer; complete and partial aggregates push when the source
            // evaluates aggregation.
            if agg.mode == AggregateMode::Final {
                return None;
            }
            let tag = source_tag(&agg.input, registry)?;
            capability(&tag, registry, |c| c.aggregate).then_some(tag)
        }
        LogicalPlan::Join(join) => {
            if !matches!(
                join.join_type,
                JoinType::Inner | JoinType::Left | JoinType::Right | JoinType::Full
            ) {
                return None;
            }
            let left = source_tag(&join.left, registry)?;
            let right = source_tag(&join.right, registry)?;
            (left == right && capability(&left, registry, |c| c.join)).then_some(left)
        }
        LogicalPlan::Union(union) => {
            let mut tags = union.inputs.iter().map(|i| source_tag(i, registry));
            let first = tags.next()??;
            for tag in tags {
                if tag.as_ref() != Some(&first) {
                    return None;
                }
            }
            Some(first)
        }
    }
}

fn capability(
    tag: &SourceTag,
    registry: &ConnectorRegistry,
    f: impl Fn(&connectors::Capabilities) -> bool,
) -> bool {
    registry
        .get(tag.kind)
        .map(|c| f(&c.capabilities()))
        .unwrap_or(false)
}

/// Estimated output rows of a plan node.
pub fn estimate_rows(plan: &LogicalPlan, catalog: &CatalogState) -> f64 {
    match plan {
        LogicalPlan::TableScan(scan) => {
            let mut rows = base_rows(scan, catalog);
            for filter in &scan.filters {
                rows *= selectivity(filter, scan, catalog);
            }
            match scan.fetch {
                Some(fetch) => rows.min(fetch as f64),
                None => rows,
            }
            .max(1.0)
        }
        LogicalPlan::Filter(filter) => {
            let input = estimate_rows(&filter.input, catalog);
            if filter.always_empty {
                return 0.0;
            }
            (input * generic_selectivity(&filter.predicate)).max(1.0)
        }
        LogicalPlan::Project(project) => estimate_rows(&project.input, catalog),
        LogicalPlan::Join(join) => {
            let left = estimate_rows(&join.left, catalog);
            let right = estimate_rows(&join.right, catalog);
            match join.join_type {
                JoinType::LeftSemi | JoinType::LeftAnti => (left * 0.5).max(1.0),
                JoinType::Inner | JoinType::Left | JoinType::Right | JoinType::Full => {
                    let inner = if join.on.is_empty() {
                        left * right
                    } else {
                        // Equi join: assume the key is close to unique on
                        // the larger side.
                        (left * right / left.max(right).max(1.0)).max(1.0)
                    };
                    match join.join_type {
                        JoinType::Left => inner.max(left),
                        JoinType::Right => inner.max(right),
                        JoinType::Full => inner.max(left).max(right),
                        _ => inner,
                    }
                }
            }
        }
        LogicalPlan::Aggregate(agg) => {
            let input = estimate_rows(&agg.input, catalog);
            if agg.group_exprs.is_empty() {
                1.0
            } else {
                // Grouping reduces cardinality by an order of magnitude by
                // default.
                (input / 10.0).max(1.0)
            }
        }
        LogicalPlan::Sort(sort) => {
            let input = estimate_rows(&sort.input, catalog);
            match sort.fetch {
                Some(fetch) => input.min(fetch as f64),
                None => input,
            }
        }
        LogicalPlan::Limit(limit) => {
            let input = estimate_rows(&limit.input, catalog);
            match limit.fetch {
                Some(fetch) => input.min((limit.skip + fetch) as f64),
                None => input,
            }
        }
        LogicalPlan::Union(union) => union
            .inputs
            .iter()
            .map(|i| estimate_rows(i, catalog))
            .sum(),
    }
}

fn base_rows(scan: &TableScan, catalog: &CatalogState) -> f64 {
    if let Some(stats) = catalog.statistics(&scan.schema_name, &scan.table_name) {
        return stats.row_count as f64;
    }
    if let Some(table) = catalog.table(&scan.schema_name, &scan.table_name) {
        if let Some(rows) = table.row_count {
            return rows as f64;
        }
    }
    DEFAULT_ROW_COUNT as f64
}

/// Selectivity of a scan-level filter, using column statistics when the
/// predicate compares a column with a literal.
fn selectivity(expr: &Expr, scan: &TableScan, catalog: &CatalogState) -> f64 {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOp::And => {
                selectivity(left, scan, catalog) * selectivity(right, scan, catalog)
            }
            BinaryOp::Or => (selectivity(left, scan, catalog)
                + selectivity(right, scan, catalog))
            .min(1.0),
            BinaryOp::Eq => {
                if let Expr::Column(column) = left.as_ref() {
                    if let Some(stats) =
                        catalog.statistics(&scan.schema_name, &scan.table_name)
                    {
                        return stats.equality_selectivity(&column.name);
                    }
                }
                DEFAULT_SELECTIVITY
            }
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => RANGE_SELECTIVITY,
            BinaryOp::NotEq => 1.0 - DEFAULT_SELECTIVITY,
            _ => DEFAULT_SELECTIVITY,
        },
        Expr::Like { .. } => LIKE_SELECTIVITY,
        Expr::InList { .. } => IN_SELECTIVITY,
        Expr::Between { .. } => RANGE_SELECTIVITY,
        Expr::Not(inner) => 1.0 - selectivity(inner, scan, catalog),
        Expr::IsNull(_) | Expr::IsNotNull(_) => DEFAULT_SELECTIVITY,
        _ => DEFAULT_SELECTIVITY,
    }
}

/// Selectivity of a predicate with no backing statistics.
fn generic_selectivity(expr: &Expr) -> f64 {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOp::And => generic_selectivity(left) * generic_selectivity(right),
            BinaryOp::Or => (generic_selectivity(left) + generic_selectivity(right)).min(1.0),
            BinaryOp::Eq => DEFAULT_SELECTIVITY,
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => RANGE_SELECTIVITY,
            _ => DEFAULT_SELECTIVITY,
        },
        Expr::Like { .. } => LIKE_SELECTIVITY,
        Expr::InList { .. } => IN_SELECTIVITY,
        Expr::Between { .. } => RANGE_SELECTIVITY,
        _ => DEFAULT_SELECTIVITY,
    }
}

/// Total cost of a plan: per-source scan work, network shipping at every
/// pushdown boundary, and CPU for the federation operators above.
pub fn plan_cost(
    plan: &LogicalPlan,
    catalog: &CatalogState,
    registry: &ConnectorRegistry,
) -> f64 {
    // A fully pushable subtree costs its scan work plus shipping its
    // output across the boundary.
    if source_tag(plan, registry).is_some() {
        return subtree_scan_cost(plan, catalog)
            + estimate_rows(plan, catalog) * NETWORK_ROW_COST;
    }

    let child_cost: f64 = plan
        .children()
        .iter()
        .map(|c| plan_cost(c, catalog, registry))
        .sum();
    let own_rows = estimate_rows(plan, catalog);
    let own_cost = match plan {
        LogicalPlan::TableScan(_) => 0.0, // covered by the pushable case
        LogicalPlan::Filter(_) | LogicalPlan::Project(_) | LogicalPlan::Union(_) => {
            own_rows * CPU_ROW_COST
        }
        LogicalPlan::Join(join) => {
            let left = estimate_rows(&join.left, catalog);
            let right = estimate_rows(&join.right, catalog);
            // Build the smaller side, probe the larger, emit the output.
            (left.min(right) * 2.0 + left.max(right) + own_rows) * CPU_ROW_COST
        }
        LogicalPlan::Aggregate(agg) => {
            estimate_rows(&agg.input, catalog) * 2.0 * CPU_ROW_COST
        }
        LogicalPlan::Sort(sort) => {
            let n = estimate_rows(&sort.input, catalog).max(2.0);
            n * n.log2() * CPU_ROW_COST
        }
        LogicalPlan::Limit(_) => 0.0,
    };
    child_cost + own_cost
}

fn subtree_scan_cost(plan: &LogicalPlan, catalog: &CatalogState) -> f64 {
    match plan {
        LogicalPlan::TableScan(scan) => {
            let width = scan.output_schema().average_row_width().max(1) as f64;
            base_rows(scan, catalog) * SCAN_ROW_COST * (width / 100.0)
        }
        other => other
            .children()
            .iter()
            .map(|c| subtree_scan_cost(c, catalog))
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use catalog::TableStatistics;
    use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema};

    use super::*;
    use crate::plan::Filter;

    fn scan_plan(rows: Option<u64>) -> LogicalPlan {
        LogicalPlan::TableScan(TableScan {
            source_id: "ds-1".into(),
            source_name: "s1".into(),
            source_kind: SourceKind::Memory,
            schema_name: "app".into(),
            table_name: "users".into(),
            alias: "users".into(),
            table_schema: Arc::new(Schema::new(vec![ColumnSchema::new(
                "id",
                ConcreteDataType::Integer,
                false,
            )])),
            projection: None,
            filters: vec![],
            fetch: rows.map(|r| r as usize),
        })
    }

    #[test]
    fn test_default_row_count_without_stats() {
        let catalog = CatalogState::default();
        let rows = estimate_rows(&scan_plan(None), &catalog);
        assert_eq!(DEFAULT_ROW_COUNT as f64, rows);
    }

    #[test]
    fn test_fetch_bounds_estimate() {
        let catalog = CatalogState::default();
        let rows = estimate_rows(&scan_plan(Some(10)), &catalog);
        assert_eq!(10.0, rows);
    }

    #[test]
    fn test_filter_reduces_estimate() {
        let catalog = CatalogState::default();
        let scan = Arc::new(scan_plan(None));
        let filtered = LogicalPlan::Filter(Filter {
            predicate: Expr::column(0, "id", ConcreteDataType::Integer, false)
                .eq(Expr::literal(1)),
            input: scan.clone(),
            always_empty: false,
        });
        assert!(estimate_rows(&filtered, &catalog) < estimate_rows(&scan, &catalog));
    }

    #[test]
    fn test_statistics_drive_equality_selectivity() {
        use catalog::{CatalogManager, ColumnMeta, DataSource, SchemaMeta, TableMeta, TableType};

        let manager = CatalogManager::new();
        manager
            .register_data_source(DataSource::new("ds-1", "s1", SourceKind::Memory, "memory://"))
            .unwrap();
        manager
            .register_schema(SchemaMeta::physical("app", "ds-1"))
            .unwrap();
        manager
            .register_table(
                TableMeta::try_new(
                    "users",
                    "app",
                    TableType::Table,
                    vec![ColumnMeta::new("id", ConcreteDataType::Integer, false)],
                )
                .unwrap(),
            )
            .unwrap();
        manager
            .update_statistics(
                "app",
                "users",
                TableStatistics::new(10_000, 20).with_column(
                    "id",
                    catalog::statistics::ColumnStatistics {
                        distinct_count: Some(10_000),
                        ..Default::default()
                    },
                ),
            )
            .unwrap();
        let snapshot = manager.snapshot();

        let mut scan = scan_plan(None);
        if let LogicalPlan::TableScan(s) = &mut scan {
            s.filters.push(
                Expr::column(0, "id", ConcreteDataType::Integer, false).eq(Expr::literal(7)),
            );
        }
        // 10_000 rows x 1/10_000 selectivity.
        assert_eq!(1.0, estimate_rows(&scan, &snapshot));
    }
}
