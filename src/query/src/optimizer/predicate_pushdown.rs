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

//! Moves filter conjuncts toward the scans that produce the columns they
//! reference. The split is at conjunct granularity: a conjunct moves iff
//! every column it references is produced by the target subtree; the
//! remainder stays in a residual filter above.

use std::sync::Arc;

use crate::error::Result;
use crate::expr::{conjoin, split_conjunction, Expr};
use crate::optimizer::{transform_up, OptimizerContext, OptimizerRule};
use crate::plan::{Filter, JoinType, LogicalPlan, PlanRef};

pub struct PredicatePushdown;

impl OptimizerRule for PredicatePushdown {
    fn name(&self) -> &str {
        "predicate_pushdown"
    }

    fn try_optimize(&self, plan: &PlanRef, _ctx: &OptimizerContext) -> Result<Option<PlanRef>> {
        let rewritten = transform_up(plan, &|node| {
            let LogicalPlan::Filter(filter) = node.as_ref() else {
                return Ok(None);
            };
            if filter.always_empty {
                return Ok(None);
            }
            push_filter(filter)
        })?;
        Ok(if rewritten == *plan { None } else { Some(rewritten) })
    }
}

fn push_filter(filter: &Filter) -> Result<Option<PlanRef>> {
    let conjuncts = split_conjunction(&filter.predicate);
    let mut remaining = Vec::new();
    let mut pushed_any = false;
    let mut input = filter.input.clone();

    for conjunct in conjuncts {
        if conjunct.contains_subquery() || !is_pushable(&conjunct) {
            remaining.push(conjunct);
            continue;
        }
        match try_push(&conjunct, &input)? {
            Some(new_input) => {
                input = new_input;
                pushed_any = true;
            }
            None => remaining.push(conjunct),
        }
    }

    if !pushed_any {
        return Ok(None);
    }
    let plan = match conjoin(remaining) {
        Some(predicate) => Arc::new(LogicalPlan::Filter(Filter {
            predicate,
            input,
            always_empty: false,
        })),
        None => input,
    };
    Ok(Some(plan))
}

/// Try to sink one conjunct into `input`; returns the rewritten input.
fn try_push(conjunct: &Expr, input: &PlanRef) -> Result<Option<PlanRef>> {
    match input.as_ref() {
        LogicalPlan::TableScan(scan) => {
            // Remap from scan output coordinates to table coordinates.
            let remapped = conjunct.remap_columns(&|i| match &scan.projection {
                Some(indices) => indices.get(i).copied(),
                None => Some(i),
            });
            let Some(remapped) = remapped else {
                return Ok(None);
            };
            if scan.filters.contains(&remapped) {
                // Already pushed in an earlier pass.
                return Ok(None);
            }
            let mut new_scan = scan.clone();
            new_scan.filters.push(remapped);
            Ok(Some(Arc::new(LogicalPlan::TableScan(new_scan))))
        }
        LogicalPlan::Project(project) => {
            // Push through only when the referenced output columns are
            // plain column references.
            let remapped = conjunct.remap_columns(&|i| match project.exprs.get(i) {
                Some((Expr::Column(c), _)) => Some(c.index),
                _ => None,
            });
            let Some(remapped) = remapped else {
                return Ok(None);
            };
            let mut new_project = project.clone();
            new_project.input = sink_or_wrap(remapped, &project.input)?;
            Ok(Some(Arc::new(LogicalPlan::Project(new_project))))
        }
        LogicalPlan::Join(join) => {
            let left_columns = join.left.schema().num_columns();
            let refs = conjunct.referenced_columns();
            if refs.is_empty() {
                return Ok(None);
            }
            let all_left = refs.iter().all(|i| *i < left_columns);
            let all_right = refs.iter().all(|i| *i >= left_columns);

            let left_ok = matches!(
                join.join_type,
                JoinType::Inner | JoinType::Left | JoinType::LeftSemi | JoinType::LeftAnti
            );
            let right_ok = matches!(join.join_type, JoinType::Inner | JoinType::Right);

            if all_left && left_ok {
                let mut new_join = join.clone();
                new_join.left = sink_or_wrap(conjunct.clone(), &join.left)?;
                return Ok(Some(Arc::new(LogicalPlan::Join(new_join))));
            }
            if all_right && right_ok {
                let remapped = conjunct
                    .remap_columns(&|i| Some(i - left_columns))
                    .expect("all refs on the right side");
                let mut new_join = join.clone();
                new_join.right = sink_or_wrap(remapped, &join.right)?;
                return Ok(Some(Arc::new(LogicalPlan::Join(new_join))));
            }
            Ok(None)
        }
        LogicalPlan::Union(union) => {
            // Column positions are identical in every branch.
            let mut new_inputs = Vec::with_capacity(union.inputs.len());
            for branch in &union.inputs {
                new_inputs.push(sink_or_wrap(conjunct.clone(), branch)?);
            }
            let mut new_union = union.clone();
            new_union.inputs = new_inputs;
            Ok(Some(Arc::new(LogicalPlan::Union(new_union))))
        }
        LogicalPlan::Aggregate(agg) => {
            // Only conjuncts over group keys that are direct columns sink
            // below the aggregate.
            let group_count = agg.group_exprs.len();
            let remapped = conjunct.remap_columns(&|i| {
                if i < group_count {
                    match &agg.group_exprs[i].0 {
                        Expr::Column(c) => Some(c.index),
                        _ => None,
                    }
                } else {
                    None
                }
            });
            let Some(remapped) = remapped else {
                return Ok(None);
            };
            let mut new_agg = agg.clone();
            new_agg.input = sink_or_wrap(remapped, &agg.input)?;
            Ok(Some(Arc::new(LogicalPlan::Aggregate(new_agg))))
        }
        LogicalPlan::Sort(sort) => {
            let mut new_sort = sort.clone();
            new_sort.input = sink_or_wrap(conjunct.clone(), &sort.input)?;
            Ok(Some(Arc::new(LogicalPlan::Sort(new_sort))))
        }
        // Filtering below a limit changes which rows are kept.
        LogicalPlan::Limit(_) | LogicalPlan::Filter(_) => Ok(None),
    }
}

/// Sink a conjunct into `input` if possible, otherwise wrap `input` in a
/// filter holding it.
fn sink_or_wrap(conjunct: Expr, input: &PlanRef) -> Result<PlanRef> {
    match try_push(&conjunct, input)? {
        Some(new_input) => Ok(new_input),
        None => Ok(Arc::new(LogicalPlan::Filter(Filter {
            predicate: conjunct,
            input: input.clone(),
            always_empty: false,
        }))),
    }
}

/// Conservatively decide whether a source could evaluate this conjunct.
fn is_pushable(expr: &Expr) -> bool {
    match expr {
        Expr::Column(_) | Expr::Literal(_) => true,
        Expr::BinaryOp { left, right, .. } => is_pushable(left) && is_pushable(right),
        Expr::Not(inner)
        | Expr::Negative(inner)
        | Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::Cast { expr: inner, .. } => is_pushable(inner),
        Expr::Like { expr, pattern, .. } => is_pushable(expr) && is_pushable(pattern),
        Expr::InList { expr, list, .. } => {
            is_pushable(expr) && list.iter().all(is_pushable)
        }
        Expr::Between {
            expr, low, high, ..
        } => is_pushable(expr) && is_pushable(low) && is_pushable(high),
        Expr::Function { name, args } => {
            matches!(
                name.as_str(),
                "UPPER" | "LOWER" | "ABS" | "COALESCE" | "CONCAT" | "LENGTH" | "TRIM"
            ) && args.iter().all(is_pushable)
        }
        Expr::InSubquery { .. } | Expr::Exists { .. } => false,
    }
}
