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

//! Narrows scans to the columns the rest of the plan references. The
//! rewrite runs top-down carrying the needed-column set and returns, per
//! node, the mapping from old to new column positions so parents can
//! remap their expressions.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::Result;
use crate::expr::Expr;
use crate::optimizer::{OptimizerContext, OptimizerRule};
use crate::plan::{join_schema, Join, LogicalPlan, PlanRef, Project};

pub struct ProjectionPushdown;

impl OptimizerRule for ProjectionPushdown {
    fn name(&self) -> &str {
        "projection_pushdown"
    }

    fn try_optimize(&self, plan: &PlanRef, _ctx: &OptimizerContext) -> Result<Option<PlanRef>> {
        let all: BTreeSet<usize> = (0..plan.schema().num_columns()).collect();
        let (pruned, _mapping) = prune(plan, &all)?;
        Ok(if pruned == *plan { None } else { Some(pruned) })
    }
}

/// Old-position to new-position mapping of a rewritten node's output.
type Mapping = Vec<Option<usize>>;

fn identity(len: usize) -> Mapping {
    (0..len).map(Some).collect()
}

fn rank_mapping(len: usize, kept: &BTreeSet<usize>) -> Mapping {
    let mut mapping = vec![None; len];
    for (rank, old) in kept.iter().enumerate() {
        mapping[*old] = Some(rank);
    }
    mapping
}

fn remap_through(expr: &Expr, mapping: &Mapping) -> Expr {
    expr.remap_columns(&|i| mapping.get(i).copied().flatten())
        .expect("needed sets cover every referenced column")
}

fn prune(plan: &PlanRef, needed: &BTreeSet<usize>) -> Result<(PlanRef, Mapping)> {
    match plan.as_ref() {
        LogicalPlan::TableScan(scan) => {
            let width = plan.schema().num_columns();
            if needed.len() == width {
                return Ok((plan.clone(), identity(width)));
            }
            // Map needed output positions back to table coordinates.
            let table_indices: Vec<usize> = needed
                .iter()
                .map(|i| match &scan.projection {
                    Some(projection) => projection[*i],
                    None => *i,
                })
                .collect();
            let mut new_scan = scan.clone();
            new_scan.projection = Some(table_indices);
            Ok((
                Arc::new(LogicalPlan::TableScan(new_scan)),
                rank_mapping(width, needed),
            ))
        }
        LogicalPlan::Project(project) => {
            let width = project.exprs.len();
            let kept: BTreeSet<usize> = if needed.len() == width {
                (0..width).collect()
            } else {
                needed.clone()
            };
            let mut child_needed = BTreeSet::new();
            for index in &kept {
                child_needed.extend(project.exprs[*index].0.referenced_columns());
            }
            // A projection of no columns still needs one to count rows.
            if child_needed.is_empty() {
                child_needed.insert(0);
            }
            let (new_input, child_mapping) = prune(&project.input, &child_needed)?;

            let mut exprs = Vec::with_capacity(kept.len());
            for index in &kept {
                let (expr, name) = &project.exprs[*index];
                exprs.push((remap_through(expr, &child_mapping), name.clone()));
            }
            let schema = Arc::new(project.schema.project(&kept.iter().copied().collect::<Vec<_>>()));
            Ok((
                Arc::new(LogicalPlan::Project(Project {
                    exprs,
                    input: new_input,
                    schema,
                })),
                rank_mapping(width, &kept),
            ))
        }
        LogicalPlan::Filter(filter) => {
            let mut child_needed = needed.clone();
            child_needed.extend(filter.predicate.referenced_columns());
            let (new_input, mapping) = prune(&filter.input, &child_needed)?;
            let mut new_filter = filter.clone();
            new_filter.predicate = remap_through(&filter.predicate, &mapping);
            new_filter.input = new_input;
            Ok((Arc::new(LogicalPlan::Filter(new_filter)), mapping))
        }
        LogicalPlan::Sort(sort) => {
            let mut child_needed = needed.clone();
            for key in &sort.exprs {
                child_needed.extend(key.expr.referenced_columns());
            }
            let (new_input, mapping) = prune(&sort.input, &child_needed)?;
            let mut new_sort = sort.clone();
            new_sort.exprs = sort
                .exprs
                .iter()
                .map(|key| {
                    let mut key = key.clone();
                    key.expr = remap_through(&key.expr, &mapping);
                    key
                })
                .collect();
            new_sort.input = new_input;
            Ok((Arc::new(LogicalPlan::Sort(new_sort)), mapping))
        }
        LogicalPlan::Limit(limit) => {
            let (new_input, mapping) = prune(&limit.input, needed)?;
            let mut new_limit = limit.clone();
            new_limit.input = new_input;
            Ok((Arc::new(LogicalPlan::Limit(new_limit)), mapping))
        }
        LogicalPlan::Aggregate(agg) => {
            // The aggregate's own output shape is fixed; narrow its input
            // to the columns its expressions read.
            let mut child_needed = BTreeSet::new();
            for (expr, _) in &agg.group_exprs {
                child_needed.extend(expr.referenced_columns());
            }
            for aggregate in &agg.aggregates {
                if let Some(arg) = &aggregate.arg {
                    child_needed.extend(arg.referenced_columns());
                }
            }
            if child_needed.is_empty() {
                child_needed.insert(0);
            }
            let (new_input, child_mapping) = prune(&agg.input, &child_needed)?;
            let mut new_agg = agg.clone();
            new_agg.group_exprs = agg
                .group_exprs
                .iter()
                .map(|(e, n)| (remap_through(e, &child_mapping), n.clone()))
                .collect();
            new_agg.aggregates = agg
                .aggregates
                .iter()
                .map(|a| {
                    let mut a = a.clone();
                    a.arg = a.arg.as_ref().map(|arg| remap_through(arg, &child_mapping));
                    a
                })
                .collect();
            new_agg.input = new_input;
            let width = agg.schema.num_columns();
            Ok((Arc::new(LogicalPlan::Aggregate(new_agg)), identity(width)))
        }
        LogicalPlan::Join(join) => prune_join(join, needed),
        LogicalPlan::Union(union) => {
            // Branches must stay column-aligned; no narrowing through a
            // union.
            let width = union.schema.num_columns();
            let mut new_inputs = Vec::with_capacity(union.inputs.len());
            let mut changed = false;
            for branch in &union.inputs {
                let branch_all: BTreeSet<usize> =
                    (0..branch.schema().num_columns()).collect();
                let (new_branch, _) = prune(branch, &branch_all)?;
                changed = changed || new_branch != *branch;
                new_inputs.push(new_branch);
            }
            if changed {
                let mut new_union = union.clone();
                new_union.inputs = new_inputs;
                Ok((Arc::new(LogicalPlan::Union(new_union)), identity(width)))
            } else {
                Ok((plan.clone(), identity(width)))
            }
        }
    }
}

fn prune_join(join: &Join, needed: &BTreeSet<usize>) -> Result<(PlanRef, Mapping)> {
    let left_width = join.left.schema().num_columns();
    let right_width = join.right.schema().num_columns();
    let combined_width = if join.join_type.emits_right_columns() {
        left_width + right_width
    } else {
        left_width
    };

    let mut left_needed: BTreeSet<usize> = needed
        .iter()
        .filter(|i| **i < left_width)
        .copied()
        .collect();
    let mut right_needed: BTreeSet<usize> = needed
        .iter()
        .filter(|i| **i >= left_width && **i < left_width + right_width)
        .map(|i| i - left_width)
        .collect();
    for (left_key, right_key) in &join.on {
        left_needed.extend(left_key.referenced_columns());
        right_needed.extend(right_key.referenced_columns());
    }
    if let Some(filter) = &join.filter {
        for i in filter.referenced_columns() {
            if i < left_width {
                left_needed.insert(i);
            } else {
                right_needed.insert(i - left_width);
            }
        }
    }
    if left_needed.is_empty() {
        left_needed.insert(0);
    }
    if right_needed.is_empty() {
        right_needed.insert(0);
    }

    let (new_left, left_mapping) = prune(&join.left, &left_needed)?;
    let (new_right, right_mapping) = prune(&join.right, &right_needed)?;
    let new_left_width = new_left.schema().num_columns();

    let combined = |i: usize| -> Option<usize> {
        if i < left_width {
            left_mapping.get(i).copied().flatten()
        } else {
            right_mapping
                .get(i - left_width)
                .copied()
                .flatten()
                .map(|n| n + new_left_width)
        }
    };

    let on = join
        .on
        .iter()
        .map(|(l, r)| {
            (
                remap_through(l, &left_mapping),
                remap_through(r, &right_mapping),
            )
        })
        .collect();
    let filter = join.filter.as_ref().map(|f| {
        f.remap_columns(&combined)
            .expect("filter columns are in the needed sets")
    });

    let schema = Arc::new(join_schema(
        &new_left.schema(),
        &new_right.schema(),
        join.join_type,
    ));
    let mapping: Mapping = (0..combined_width).map(combined).collect();
    let new_join = Join {
        left: new_left,
        right: new_right,
        join_type: join.join_type,
        on,
        filter,
        schema,
    };
    Ok((Arc::new(LogicalPlan::Join(new_join)), mapping))
}
