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

//! The relational-algebra tree produced by the planner. Nodes are
//! immutable values with `Arc` children; rewrites build new trees and
//! share unchanged subtrees.

use std::fmt;
use std::sync::Arc;

use catalog::SourceKind;
use datatypes::prelude::{ColumnSchema, ConcreteDataType, Schema, SchemaRef};

use crate::error::{self, Result};
use crate::expr::{AggregateExpr, Expr, SortExpr};

pub type PlanRef = Arc<LogicalPlan>;

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    TableScan(TableScan),
    Filter(Filter),
    Project(Project),
    Join(Join),
    Aggregate(Aggregate),
    Sort(Sort),
    Limit(Limit),
    Union(Union),
}

/// A scan of one table of one data source. The rule-based optimizer folds
/// eligible filters, the projection and a fetch bound into the scan, where
/// the dialect translator renders them into the pushed sub-query.
#[derive(Debug, Clone, PartialEq)]
pub struct TableScan {
    pub source_id: String,
    pub source_name: String,
    pub source_kind: SourceKind,
    pub schema_name: String,
    pub table_name: String,
    /// FROM-clause alias; also the relation tag on output columns.
    pub alias: String,
    /// The full row type of the table.
    pub table_schema: SchemaRef,
    /// Kept columns, indices into `table_schema`; `None` scans everything.
    pub projection: Option<Vec<usize>>,
    /// Conjuncts evaluated at the source, in terms of `table_schema`.
    pub filters: Vec<Expr>,
    /// Row bound evaluated at the source.
    pub fetch: Option<usize>,
}

impl TableScan {
    pub fn output_schema(&self) -> Schema {
        match &self.projection {
            Some(indices) => self.table_schema.project(indices),
            None => (*self.table_schema).clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub predicate: Expr,
    pub input: PlanRef,
    /// Set when the predicate is provably false; execution short-circuits
    /// to an empty result.
    pub always_empty: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// Expression and output column name pairs.
    pub exprs: Vec<(Expr, String)>,
    pub input: PlanRef,
    pub schema: SchemaRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Produced by rewriting IN/EXISTS subqueries.
    LeftSemi,
    LeftAnti,
}

impl JoinType {
    pub fn emits_right_columns(&self) -> bool {
        matches!(
            self,
            JoinType::Inner | JoinType::Left | JoinType::Right | JoinType::Full
        )
    }

    pub fn sql_keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL OUTER JOIN",
            JoinType::LeftSemi => "SEMI JOIN",
            JoinType::LeftAnti => "ANTI JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub left: PlanRef,
    pub right: PlanRef,
    pub join_type: JoinType,
    /// Equi-join key pairs; left exprs index the left schema, right exprs
    /// the right schema.
    pub on: Vec<(Expr, Expr)>,
    /// Residual non-equi condition over the combined schema.
    pub filter: Option<Expr>,
    pub schema: SchemaRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
    /// Input rows in, final values out.
    Complete,
    /// The local half of a split aggregate, runs at a source.
    Partial,
    /// The global half; combines partial states.
    Final,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub input: PlanRef,
    pub group_exprs: Vec<(Expr, String)>,
    pub aggregates: Vec<AggregateExpr>,
    pub mode: AggregateMode,
    /// Set by the aggregate-split rule when every function decomposes.
    pub splittable: bool,
    pub schema: SchemaRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub exprs: Vec<SortExpr>,
    /// Top-k bound fused from a parent limit.
    pub fetch: Option<usize>,
    pub input: PlanRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub skip: usize,
    pub fetch: Option<usize>,
    pub input: PlanRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    pub inputs: Vec<PlanRef>,
    pub schema: SchemaRef,
}

impl LogicalPlan {
    pub fn schema(&self) -> SchemaRef {
        match self {
            LogicalPlan::TableScan(scan) => Arc::new(scan.output_schema()),
            LogicalPlan::Filter(f) => f.input.schema(),
            LogicalPlan::Project(p) => p.schema.clone(),
            LogicalPlan::Join(j) => j.schema.clone(),
            LogicalPlan::Aggregate(a) => a.schema.clone(),
            LogicalPlan::Sort(s) => s.input.schema(),
            LogicalPlan::Limit(l) => l.input.schema(),
            LogicalPlan::Union(u) => u.schema.clone(),
        }
    }

    pub fn children(&self) -> Vec<PlanRef> {
        match self {
            LogicalPlan::TableScan(_) => vec![],
            LogicalPlan::Filter(f) => vec![f.input.clone()],
            LogicalPlan::Project(p) => vec![p.input.clone()],
            LogicalPlan::Join(j) => vec![j.left.clone(), j.right.clone()],
            LogicalPlan::Aggregate(a) => vec![a.input.clone()],
            LogicalPlan::Sort(s) => vec![s.input.clone()],
            LogicalPlan::Limit(l) => vec![l.input.clone()],
            LogicalPlan::Union(u) => u.inputs.clone(),
        }
    }

    pub fn with_new_children(&self, children: Vec<PlanRef>) -> Result<LogicalPlan> {
        let expected = self.children().len();
        if children.len() != expected {
            return error::ExecutionSnafu {
                detail: format!(
                    "{} expects {} children, got {}",
                    self.node_name(),
                    expected,
                    children.len()
                ),
            }
            .fail();
        }
        let mut children = children.into_iter();
        let plan = match self {
            LogicalPlan::TableScan(scan) => LogicalPlan::TableScan(scan.clone()),
            LogicalPlan::Filter(f) => LogicalPlan::Filter(Filter {
                predicate: f.predicate.clone(),
                input: children.next().unwrap(),
                always_empty: f.always_empty,
            }),
            LogicalPlan::Project(p) => LogicalPlan::Project(Project {
                exprs: p.exprs.clone(),
                input: children.next().unwrap(),
                schema: p.schema.clone(),
            }),
            LogicalPlan::Join(j) => LogicalPlan::Join(Join {
                left: children.next().unwrap(),
                right: children.next().unwrap(),
                join_type: j.join_type,
                on: j.on.clone(),
                filter: j.filter.clone(),
                schema: j.schema.clone(),
            }),
            LogicalPlan::Aggregate(a) => LogicalPlan::Aggregate(Aggregate {
                input: children.next().unwrap(),
                group_exprs: a.group_exprs.clone(),
                aggregates: a.aggregates.clone(),
                mode: a.mode,
                splittable: a.splittable,
                schema: a.schema.clone(),
            }),
            LogicalPlan::Sort(s) => LogicalPlan::Sort(Sort {
                exprs: s.exprs.clone(),
                fetch: s.fetch,
                input: children.next().unwrap(),
            }),
            LogicalPlan::Limit(l) => LogicalPlan::Limit(Limit {
                skip: l.skip,
                fetch: l.fetch,
                input: children.next().unwrap(),
            }),
            LogicalPlan::Union(u) => {
                let inputs: Vec<PlanRef> = children.collect();
                LogicalPlan::Union(Union {
                    schema: u.schema.clone(),
                    inputs,
                })
            }
        };
        Ok(plan)
    }

    pub fn node_name(&self) -> &'static str {
        match self {
            LogicalPlan::TableScan(_) => "TableScan",
            LogicalPlan::Filter(_) => "Filter",
            LogicalPlan::Project(_) => "Project",
            LogicalPlan::Join(_) => "Join",
            LogicalPlan::Aggregate(_) => "Aggregate",
            LogicalPlan::Sort(_) => "Sort",
            LogicalPlan::Limit(_) => "Limit",
            LogicalPlan::Union(_) => "Union",
        }
    }

    /// Multi-line indented rendering, used by EXPLAIN and tests.
    pub fn display_indent(&self) -> String {
        let mut out = String::new();
        self.format_node(&mut out, 0);
        out
    }

    fn format_node(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        match self {
            LogicalPlan::TableScan(scan) => {
                out.push_str(&format!(
                    "{pad}TableScan: {}.{} source={}",
                    scan.schema_name, scan.table_name, scan.source_name
                ));
                if let Some(projection) = &scan.projection {
                    out.push_str(&format!(" projection={projection:?}"));
                }
                if !scan.filters.is_empty() {
                    let rendered: Vec<String> =
                        scan.filters.iter().map(|f| f.to_string()).collect();
                    out.push_str(&format!(" filters=[{}]", rendered.join(", ")));
                }
                if let Some(fetch) = scan.fetch {
                    out.push_str(&format!(" fetch={fetch}"));
                }
            }
            LogicalPlan::Filter(f) => {
                out.push_str(&format!("{pad}Filter: {}", f.predicate));
                if f.always_empty {
                    out.push_str(" (always empty)");
                }
            }
            LogicalPlan::Project(p) => {
                let rendered: Vec<String> = p
                    .exprs
                    .iter()
                    .map(|(e, name)| {
                        if &e.output_name() == name {
                            e.to_string()
                        } else {
                            format!("{e} AS {name}")
                        }
                    })
                    .collect();
                out.push_str(&format!("{pad}Project: {}", rendered.join(", ")));
            }
            LogicalPlan::Join(j) => {
                let keys: Vec<String> = j
                    .on
                    .iter()
                    .map(|(l, r)| format!("{l} = {r}"))
                    .collect();
                out.push_str(&format!(
                    "{pad}{}: on=[{}]",
                    j.join_type.sql_keyword(),
                    keys.join(", ")
                ));
            }
            LogicalPlan::Aggregate(a) => {
                let groups: Vec<String> =
                    a.group_exprs.iter().map(|(e, _)| e.to_string()).collect();
                let aggs: Vec<String> = a
                    .aggregates
                    .iter()
                    .map(|agg| {
                        let arg = agg
                            .arg
                            .as_ref()
                            .map(|a| a.to_string())
                            .unwrap_or_else(|| "*".to_string());
                        format!("{}({})", agg.func.name(), arg)
                    })
                    .collect();
                out.push_str(&format!(
                    "{pad}Aggregate[{:?}]: group=[{}] agg=[{}]",
                    a.mode,
                    groups.join(", "),
                    aggs.join(", ")
                ));
            }
            LogicalPlan::Sort(s) => {
                let keys: Vec<String> = s
                    .exprs
                    .iter()
                    .map(|k| {
                        format!("{} {}", k.expr, if k.ascending { "ASC" } else { "DESC" })
                    })
                    .collect();
                out.push_str(&format!("{pad}Sort: {}", keys.join(", ")));
                if let Some(fetch) = s.fetch {
                    out.push_str(&format!(" fetch={fetch}"));
                }
            }
            LogicalPlan::Limit(l) => {
                out.push_str(&format!("{pad}Limit: skip={} fetch={:?}", l.skip, l.fetch));
            }
            LogicalPlan::Union(_) => {
                out.push_str(&format!("{pad}Union"));
            }
        }
        out.push('\n');
        for child in self.children() {
            child.format_node(out, depth + 1);
        }
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_indent())
    }
}

/// Compute the output schema of a join.
pub fn join_schema(
    left: &Schema,
    right: &Schema,
    join_type: JoinType,
) -> Schema {
    let mut columns = Vec::new();
    let right_nullable = matches!(join_type, JoinType::Left | JoinType::Full);
    let left_nullable = matches!(join_type, JoinType::Right | JoinType::Full);
    for column in left.column_schemas() {
        let mut column = column.clone();
        column.nullable = column.nullable || left_nullable;
        columns.push(column);
    }
    if join_type.emits_right_columns() {
        for column in right.column_schemas() {
            let mut column = column.clone();
            column.nullable = column.nullable || right_nullable;
            columns.push(column);
        }
    }
    Schema::new(columns)
}

/// Compute the output schema of an aggregate in the given mode.
pub fn aggregate_schema(
    group_exprs: &[(Expr, String)],
    aggregates: &[AggregateExpr],
    mode: AggregateMode,
) -> Schema {
    let mut columns = Vec::new();
    for (expr, name) in group_exprs {
        columns.push(ColumnSchema::new(name.clone(), expr.data_type(), expr.nullable()));
    }
    for agg in aggregates {
        match (mode, agg.func) {
            // A partial AVG carries its running sum and count.
            (AggregateMode::Partial, crate::expr::AggregateFunc::Avg) => {
                columns.push(ColumnSchema::new(
                    format!("{}_sum", agg.alias),
                    ConcreteDataType::Double,
                    true,
                ));
                columns.push(ColumnSchema::new(
                    format!("{}_count", agg.alias),
                    ConcreteDataType::Long,
                    true,
                ));
            }
            _ => {
                columns.push(ColumnSchema::new(agg.alias.clone(), agg.output_type(), true));
            }
        }
    }
    Schema::new(columns)
}

#[cfg(test)]
mod tests {
    use datatypes::prelude::Value;

    use super::*;
    use crate::expr::AggregateFunc;

    fn scan(table: &str) -> PlanRef {
        Arc::new(LogicalPlan::TableScan(TableScan {
            source_id: "ds-1".to_string(),
            source_name: "s1".to_string(),
            source_kind: SourceKind::Memory,
            schema_name: "app".to_string(),
            table_name: table.to_string(),
            alias: table.to_string(),
            table_schema: Arc::new(Schema::new(vec![
                ColumnSchema::new("id", ConcreteDataType::Integer, false),
                ColumnSchema::new("name", ConcreteDataType::String, true),
            ])),
            projection: None,
            filters: vec![],
            fetch: None,
        }))
    }

    #[test]
    fn test_join_schema_nullability() {
        let left = Schema::new(vec![ColumnSchema::new("a", ConcreteDataType::Integer, false)]);
        let right = Schema::new(vec![ColumnSchema::new("b", ConcreteDataType::Integer, false)]);

        let inner = join_schema(&left, &right, JoinType::Inner);
        assert!(!inner.column_schema(0).nullable);
        assert!(!inner.column_schema(1).nullable);

        let left_join = join_schema(&left, &right, JoinType::Left);
        assert!(!left_join.column_schema(0).nullable);
        assert!(left_join.column_schema(1).nullable);

        let semi = join_schema(&left, &right, JoinType::LeftSemi);
        assert_eq!(1, semi.num_columns());
    }

    #[test]
    fn test_partial_avg_splits_into_two_columns() {
        let aggs = vec![AggregateExpr {
            func: AggregateFunc::Avg,
            arg: Some(Expr::column(0, "amount", ConcreteDataType::Double, true)),
            distinct: false,
            alias: "avg_amount".to_string(),
        }];
        let partial = aggregate_schema(&[], &aggs, AggregateMode::Partial);
        assert_eq!(2, partial.num_columns());
        assert_eq!("avg_amount_sum", partial.column_schema(0).name);
        assert_eq!("avg_amount_count", partial.column_schema(1).name);

        let final_schema = aggregate_schema(&[], &aggs, AggregateMode::Final);
        assert_eq!(1, final_schema.num_columns());
    }

    #[test]
    fn test_with_new_children_round_trip() {
        let plan = LogicalPlan::Filter(Filter {
            predicate: Expr::column(0, "id", ConcreteDataType::Integer, false)
                .eq(Expr::Literal(Value::Integer(1))),
            input: scan("users"),
            always_empty: false,
        });
        let rebuilt = plan.with_new_children(plan.children()).unwrap();
        assert_eq!(plan, rebuilt);
        assert!(plan.with_new_children(vec![]).is_err());
    }
}
