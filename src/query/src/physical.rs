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

//! Partitions the optimized logical plan into stages. A maximal subtree
//! whose operators one source can evaluate becomes a pushdown stage
//! rendered to that source's dialect; everything above runs as federation
//! operators. Splittable aggregates split at the boundary into a pushed
//! partial half and a federation final half.

use std::sync::Arc;

use catalog::SourceKind;
use datatypes::prelude::SchemaRef;
use sql::dialect::Dialect;
use uuid::Uuid;

use crate::cost::{estimate_rows, plan_cost, source_tag};
use crate::error::{self, Result};
use crate::expr::{AggregateExpr, ColumnRef, Expr, SortExpr};
use crate::optimizer::OptimizerContext;
use crate::plan::{
    aggregate_schema, Aggregate, AggregateMode, JoinType, LogicalPlan, PlanRef,
};
use crate::translator::render_plan;

pub type StageId = usize;

/// Default bound on rows materialized across federation operators.
pub const DEFAULT_INTERMEDIATE_RESULT_LIMIT: usize = 100_000;

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub id: String,
    pub query_id: Uuid,
    pub stages: Vec<ExecutionStage>,
    /// The federation operator tree producing the final stream.
    pub root: PhysicalOperator,
    pub estimated_cost: f64,
    pub intermediate_result_limit: usize,
    /// Rendered summaries for EXPLAIN and the plan record.
    pub pushdown_predicates: Vec<String>,
    pub pushdown_projections: Vec<String>,
}

impl ExecutionPlan {
    /// Whether the whole query is one pushed sub-query.
    pub fn is_single_pushdown(&self) -> bool {
        self.stages.len() == 1
            && matches!(self.root, PhysicalOperator::StageInput { .. })
    }

    pub fn target_sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stages
            .iter()
            .map(|s| s.source_name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// One pushdown sub-query pinned to a source.
#[derive(Debug, Clone)]
pub struct ExecutionStage {
    pub id: StageId,
    pub source_id: String,
    pub source_name: String,
    pub source_kind: SourceKind,
    pub dialect: Dialect,
    pub sql: String,
    pub plan: PlanRef,
    pub schema: SchemaRef,
    pub estimated_rows: u64,
    /// Stages that must complete before this one starts. Pushdown stages
    /// are leaves, so this stays empty; kept for the plan record.
    pub depends_on: Vec<StageId>,
}

/// Federation-side operators over stage outputs.
#[derive(Debug, Clone)]
pub enum PhysicalOperator {
    StageInput {
        stage: StageId,
        schema: SchemaRef,
    },
    Filter {
        predicate: Expr,
        input: Box<PhysicalOperator>,
    },
    Project {
        exprs: Vec<(Expr, String)>,
        schema: SchemaRef,
        input: Box<PhysicalOperator>,
    },
    HashJoin {
        join_type: JoinType,
        on: Vec<(Expr, Expr)>,
        filter: Option<Expr>,
        schema: SchemaRef,
        /// Build the hash table from the left input instead of the right;
        /// set when the left side is the smaller estimated input.
        build_left: bool,
        left: Box<PhysicalOperator>,
        right: Box<PhysicalOperator>,
    },
    Aggregate {
        mode: AggregateMode,
        group_count: usize,
        group_exprs: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        schema: SchemaRef,
        input: Box<PhysicalOperator>,
    },
    Sort {
        exprs: Vec<SortExpr>,
        fetch: Option<usize>,
        input: Box<PhysicalOperator>,
    },
    Limit {
        skip: usize,
        fetch: Option<usize>,
        input: Box<PhysicalOperator>,
    },
    Union {
        schema: SchemaRef,
        inputs: Vec<PhysicalOperator>,
    },
    Empty {
        schema: SchemaRef,
    },
}

impl PhysicalOperator {
    pub fn schema(&self) -> SchemaRef {
        match self {
            PhysicalOperator::StageInput { schema, .. }
            | PhysicalOperator::Project { schema, .. }
            | PhysicalOperator::HashJoin { schema, .. }
            | PhysicalOperator::Aggregate { schema, .. }
            | PhysicalOperator::Union { schema, .. }
            | PhysicalOperator::Empty { schema } => schema.clone(),
            PhysicalOperator::Filter { input, .. }
            | PhysicalOperator::Sort { input, .. }
            | PhysicalOperator::Limit { input, .. } => input.schema(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOperator::StageInput { .. } => "StageInput",
            PhysicalOperator::Filter { .. } => "Filter",
            PhysicalOperator::Project { .. } => "Project",
            PhysicalOperator::HashJoin { .. } => "HashJoin",
            PhysicalOperator::Aggregate { .. } => "Aggregate",
            PhysicalOperator::Sort { .. } => "Sort",
            PhysicalOperator::Limit { .. } => "Limit",
            PhysicalOperator::Union { .. } => "Union",
            PhysicalOperator::Empty { .. } => "Empty",
        }
    }
}

/// Generates the staged execution plan from an optimized logical plan.
pub struct PhysicalPlanner<'a> {
    ctx: &'a OptimizerContext,
    intermediate_result_limit: usize,
}

impl<'a> PhysicalPlanner<'a> {
    pub fn new(ctx: &'a OptimizerContext, intermediate_result_limit: usize) -> Self {
        Self {
            ctx,
            intermediate_result_limit,
        }
    }

    pub fn create_plan(&self, query_id: Uuid, plan: &PlanRef) -> Result<ExecutionPlan> {
        let mut builder = StageBuilder {
            ctx: self.ctx,
            stages: Vec::new(),
        };
        let root = builder.convert(plan)?;
        let estimated_cost = plan_cost(plan, &self.ctx.catalog, &self.ctx.registry);

        let mut pushdown_predicates = Vec::new();
        let mut pushdown_projections = Vec::new();
        for stage in &builder.stages {
            collect_pushdown_summary(
                &stage.plan,
                &mut pushdown_predicates,
                &mut pushdown_projections,
            );
        }

        Ok(ExecutionPlan {
            id: format!("plan-{}", Uuid::new_v4()),
            query_id,
            stages: builder.stages,
            root,
            estimated_cost,
            intermediate_result_limit: self.intermediate_result_limit,
            pushdown_predicates,
            pushdown_projections,
        })
    }
}

struct StageBuilder<'a> {
    ctx: &'a OptimizerContext,
    stages: Vec<ExecutionStage>,
}

impl StageBuilder<'_> {
    fn convert(&mut self, plan: &PlanRef) -> Result<PhysicalOperator> {
        // Degenerate shapes recorded by the planner execute as empty.
        if let LogicalPlan::Filter(filter) = plan.as_ref() {
            if filter.always_empty {
                return Ok(PhysicalOperator::Empty {
                    schema: plan.schema(),
                });
            }
        }

        // A subtree one source can evaluate becomes a pushdown stage —
        // unless it holds a splittable aggregate, which splits so the
        // source returns partial states instead of finished groups.
        if source_tag(plan.as_ref(), &self.ctx.registry).is_some()
            && !contains_splittable_aggregate(plan)
        {
            let stage = self.make_stage(plan)?;
            return Ok(stage);
        }

        match plan.as_ref() {
            LogicalPlan::Filter(filter) => Ok(PhysicalOperator::Filter {
                predicate: filter.predicate.clone(),
                input: Box::new(self.convert(&filter.input)?),
            }),
            LogicalPlan::Project(project) => Ok(PhysicalOperator::Project {
                exprs: project.exprs.clone(),
                schema: project.schema.clone(),
                input: Box::new(self.convert(&project.input)?),
            }),
            LogicalPlan::Aggregate(agg) => self.convert_aggregate(agg, plan),
            LogicalPlan::Join(join) => {
                let left_rows = estimate_rows(&join.left, &self.ctx.catalog);
                let right_rows = estimate_rows(&join.right, &self.ctx.catalog);
                // Semi/anti joins always build the subquery (right) side.
                let build_left = !matches!(
                    join.join_type,
                    JoinType::LeftSemi | JoinType::LeftAnti
                ) && left_rows < right_rows;
                Ok(PhysicalOperator::HashJoin {
                    join_type: join.join_type,
                    on: join.on.clone(),
                    filter: join.filter.clone(),
                    schema: join.schema.clone(),
                    build_left,
                    left: Box::new(self.convert(&join.left)?),
                    right: Box::new(self.convert(&join.right)?),
                })
            }
            LogicalPlan::Sort(sort) => Ok(PhysicalOperator::Sort {
                exprs: sort.exprs.clone(),
                fetch: sort.fetch,
                input: Box::new(self.convert(&sort.input)?),
            }),
            LogicalPlan::Limit(limit) => Ok(PhysicalOperator::Limit {
                skip: limit.skip,
                fetch: limit.fetch,
                input: Box::new(self.convert(&limit.input)?),
            }),
            LogicalPlan::Union(union) => {
                let mut inputs = Vec::with_capacity(union.inputs.len());
                for input in &union.inputs {
                    inputs.push(self.convert(input)?);
                }
                Ok(PhysicalOperator::Union {
                    schema: union.schema.clone(),
                    inputs,
                })
            }
            LogicalPlan::TableScan(scan) => error::DataSourceNotFoundSnafu {
                name: scan.source_name.clone(),
            }
            .fail(),
        }
    }

    /// A splittable aggregate over a single-source input splits: the
    /// partial half joins the pushdown stage, the final half combines the
    /// partial states at the federation layer.
    fn convert_aggregate(
        &mut self,
        agg: &Aggregate,
        plan: &PlanRef,
    ) -> Result<PhysicalOperator> {
        let input_tag = source_tag(agg.input.as_ref(), &self.ctx.registry);
        let can_split = agg.splittable
            && agg.mode == AggregateMode::Complete
            && input_tag.is_some()
            && self
                .ctx
                .registry
                .get(input_tag.as_ref().unwrap().kind)
                .map(|c| c.capabilities().aggregate)
                .unwrap_or(false);

        if !can_split {
            return Ok(PhysicalOperator::Aggregate {
                mode: agg.mode,
                group_count: agg.group_exprs.len(),
                group_exprs: agg.group_exprs.iter().map(|(e, _)| e.clone()).collect(),
                aggregates: agg.aggregates.clone(),
                schema: agg.schema.clone(),
                input: Box::new(self.convert(&agg.input)?),
            });
        }

        // Pushed partial half.
        let partial_schema = Arc::new(aggregate_schema(
            &agg.group_exprs,
            &agg.aggregates,
            AggregateMode::Partial,
        ));
        let partial: PlanRef = Arc::new(LogicalPlan::Aggregate(Aggregate {
            input: agg.input.clone(),
            group_exprs: agg.group_exprs.clone(),
            aggregates: agg.aggregates.clone(),
            mode: AggregateMode::Partial,
            splittable: true,
            schema: partial_schema.clone(),
        }));
        let stage_input = self.make_stage(&partial)?;

        // Federation final half: group keys are the leading partial
        // columns, aggregate states follow positionally.
        let group_exprs: Vec<Expr> = (0..agg.group_exprs.len())
            .map(|i| {
                let column = partial_schema.column_schema(i);
                Expr::Column(ColumnRef {
                    index: i,
                    name: column.name.clone(),
                    relation: column.relation.clone(),
                    data_type: column.data_type,
                    nullable: column.nullable,
                })
            })
            .collect();
        Ok(PhysicalOperator::Aggregate {
            mode: AggregateMode::Final,
            group_count: agg.group_exprs.len(),
            group_exprs,
            aggregates: agg.aggregates.clone(),
            schema: agg.schema.clone(),
            input: Box::new(stage_input),
        })
    }

    fn make_stage(&mut self, plan: &PlanRef) -> Result<PhysicalOperator> {
        let tag = source_tag(plan.as_ref(), &self.ctx.registry).expect("caller checked the tag");
        let connector =
            self.ctx
                .registry
                .get(tag.kind)
                .ok_or_else(|| {
                    error::DataSourceNotFoundSnafu {
                        name: tag.source_name.clone(),
                    }
                    .build()
                })?;
        let dialect = connector.native_dialect();
        let sql = render_plan(plan.as_ref(), dialect)?;
        let schema = plan.schema();
        let estimated_rows = estimate_rows(plan.as_ref(), &self.ctx.catalog) as u64;

        let id = self.stages.len();
        self.stages.push(ExecutionStage {
            id,
            source_id: tag.source_id,
            source_name: tag.source_name,
            source_kind: tag.kind,
            dialect,
            sql,
            plan: plan.clone(),
            schema: schema.clone(),
            estimated_rows,
            depends_on: Vec::new(),
        });
        Ok(PhysicalOperator::StageInput { stage: id, schema })
    }
}

/// Whether the subtree holds a complete aggregate the split rule marked.
fn contains_splittable_aggregate(plan: &PlanRef) -> bool {
    if let LogicalPlan::Aggregate(agg) = plan.as_ref() {
        if agg.splittable && agg.mode == AggregateMode::Complete {
            return true;
        }
    }
    plan.children()
        .iter()
        .any(contains_splittable_aggregate)
}

fn collect_pushdown_summary(
    plan: &PlanRef,
    predicates: &mut Vec<String>,
    projections: &mut Vec<String>,
) {
    if let LogicalPlan::TableScan(scan) = plan.as_ref() {
        for filter in &scan.filters {
            predicates.push(filter.to_string());
        }
        if let Some(projection) = &scan.projection {
            let names: Vec<String> = projection
                .iter()
                .map(|i| scan.table_schema.column_schema(*i).name.clone())
                .collect();
            projections.push(format!("{}: [{}]", scan.table_name, names.join(", ")));
        }
    }
    for child in plan.children() {
        collect_pushdown_summary(&child, predicates, projections);
    }
}

/// Multi-line rendering of the staged plan, used by EXPLAIN.
pub fn explain_plan(plan: &ExecutionPlan) -> Vec<(String, String, String, u64)> {
    let mut rows = Vec::new();
    for stage in &plan.stages {
        rows.push((
            format!("stage-{}", stage.id),
            stage.source_name.clone(),
            stage.sql.clone(),
            stage.estimated_rows,
        ));
    }
    rows.push((
        "federation".to_string(),
        "federation".to_string(),
        describe_operator(&plan.root),
        0,
    ));
    rows
}

fn describe_operator(op: &PhysicalOperator) -> String {
    match op {
        PhysicalOperator::StageInput { stage, .. } => format!("stage-{stage}"),
        PhysicalOperator::Filter { input, .. } => {
            format!("Filter({})", describe_operator(input))
        }
        PhysicalOperator::Project { input, .. } => {
            format!("Project({})", describe_operator(input))
        }
        PhysicalOperator::HashJoin { left, right, join_type, .. } => format!(
            "HashJoin[{:?}]({}, {})",
            join_type,
            describe_operator(left),
            describe_operator(right)
        ),
        PhysicalOperator::Aggregate { mode, input, .. } => {
            format!("Aggregate[{mode:?}]({})", describe_operator(input))
        }
        PhysicalOperator::Sort { input, .. } => format!("Sort({})", describe_operator(input)),
        PhysicalOperator::Limit { input, .. } => {
            format!("Limit({})", describe_operator(input))
        }
        PhysicalOperator::Union { inputs, .. } => {
            let rendered: Vec<String> = inputs.iter().map(describe_operator).collect();
            format!("Union({})", rendered.join(", "))
        }
        PhysicalOperator::Empty { .. } => "Empty".to_string(),
    }
}
