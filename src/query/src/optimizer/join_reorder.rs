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

//! Reorders chains of inner joins by ascending estimated cardinality:
//! the smallest relation first, then greedily the smallest connected
//! relation. A projection on top restores the original column order so
//! parents are unaffected.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cost::estimate_rows;
use crate::error::Result;
use crate::expr::{conjoin, BinaryOp, ColumnRef, Expr};
use crate::optimizer::{transform_up, OptimizerContext, OptimizerRule};
use crate::plan::{join_schema, Filter, Join, JoinType, LogicalPlan, PlanRef, Project};

/// Chains longer than this are left alone.
const MAX_CHAIN: usize = 8;

pub struct JoinReorder;

impl OptimizerRule for JoinReorder {
    fn name(&self) -> &str {
        "join_reorder"
    }

    fn try_optimize(&self, plan: &PlanRef, ctx: &OptimizerContext) -> Result<Option<PlanRef>> {
        let rewritten = transform_up(plan, &|node| {
            let LogicalPlan::Join(join) = node.as_ref() else {
                return Ok(None);
            };
            if join.join_type != JoinType::Inner {
                return Ok(None);
            }

            if chain_has_subquery(node) {
                return Ok(None);
            }
            let mut relations = Vec::new();
            let mut conditions = Vec::new();
            flatten(node, 0, &mut relations, &mut conditions);
            if relations.len() < 3 || relations.len() > MAX_CHAIN {
                return Ok(None);
            }

            let estimates: Vec<f64> = relations
                .iter()
                .map(|r| estimate_rows(&r.plan, &ctx.catalog))
                .collect();
            let order = greedy_order(&relations, &conditions, &estimates);
            if order == (0..relations.len()).collect::<Vec<_>>() {
                return Ok(None);
            }
            let reordered = build_order(node, &relations, &conditions, &order)?;
            if reordered == *node {
                return Ok(None);
            }
            Ok(Some(reordered))
        })?;
        Ok(if rewritten == *plan { None } else { Some(rewritten) })
    }
}

pub(crate) struct Relation {
    pub(crate) plan: PlanRef,
    /// First column of this relation in the original chain output.
    pub(crate) offset: usize,
    pub(crate) width: usize,
}

/// True when any join condition in the inner-join chain carries a
/// subquery, which the reorder machinery cannot relocate.
fn chain_has_subquery(plan: &PlanRef) -> bool {
    let LogicalPlan::Join(join) = plan.as_ref() else {
        return false;
    };
    if join.join_type != JoinType::Inner {
        return false;
    }
    join.on
        .iter()
        .any(|(l, r)| l.contains_subquery() || r.contains_subquery())
        || join
            .filter
            .as_ref()
            .is_some_and(|f| f.contains_subquery())
        || chain_has_subquery(&join.left)
        || chain_has_subquery(&join.right)
}

/// Flatten nested inner equi-joins into relations plus conditions over
/// the original (global) column numbering.
pub(crate) fn flatten(
    plan: &PlanRef,
    offset: usize,
    relations: &mut Vec<Relation>,
    conditions: &mut Vec<Expr>,
) {
    if let LogicalPlan::Join(join) = plan.as_ref() {
        if join.join_type == JoinType::Inner {
            let left_width = join.left.schema().num_columns();
            flatten(&join.left, offset, relations, conditions);
            flatten(&join.right, offset + left_width, relations, conditions);
            for (left_key, right_key) in &join.on {
                let left_global = shift(left_key, offset);
                let right_global = shift(right_key, offset + left_width);
                conditions.push(Expr::BinaryOp {
                    left: Box::new(left_global),
                    op: BinaryOp::Eq,
                    right: Box::new(right_global),
                });
            }
            if let Some(filter) = &join.filter {
                conditions.push(shift(filter, offset));
            }
            return;
        }
    }
    let width = plan.schema().num_columns();
    relations.push(Relation {
        plan: plan.clone(),
        offset,
        width,
    });
}

fn shift(expr: &Expr, offset: usize) -> Expr {
    expr.remap_columns(&|i| Some(i + offset))
        .expect("pure shift cannot fail")
}

/// Greedy order: smallest first, then the smallest relation connected to
/// what has been joined so far; fall back to the smallest remaining.
pub(crate) fn greedy_order(
    relations: &[Relation],
    conditions: &[Expr],
    estimates: &[f64],
) -> Vec<usize> {
    let mut remaining: BTreeSet<usize> = (0..relations.len()).collect();
    let start = *remaining
        .iter()
        .min_by(|a, b| estimates[**a].total_cmp(&estimates[**b]))
        .expect("chain is non-empty");
    remaining.remove(&start);
    let mut order = vec![start];

    while !remaining.is_empty() {
        let joined: BTreeSet<usize> = order.iter().copied().collect();
        let connected: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|candidate| {
                conditions.iter().any(|c| {
                    let touched = touched_relations(c, relations);
                    touched.contains(candidate)
                        && touched.iter().any(|t| joined.contains(t))
                        && touched
                            .iter()
                            .all(|t| joined.contains(t) || t == candidate)
                })
            })
            .collect();
        let pool = if connected.is_empty() {
            remaining.iter().copied().collect::<Vec<_>>()
        } else {
            connected
        };
        let next = pool
            .into_iter()
            .min_by(|a, b| estimates[*a].total_cmp(&estimates[*b]))
            .expect("pool is non-empty");
        remaining.remove(&next);
        order.push(next);
    }
    order
}

/// Rebuild the chain as a left-deep tree in the given relation order,
/// with a projection on top restoring the original column order.
pub(crate) fn build_order(
    original: &PlanRef,
    relations: &[Relation],
    conditions: &[Expr],
    order: &[usize],
) -> Result<PlanRef> {
    if order.iter().copied().eq(0..relations.len()) {
        return Ok(original.clone());
    }

    // Placement: relation index -> offset in the new output.
    let mut placement = vec![0usize; relations.len()];
    let mut acc = 0;
    for index in order {
        placement[*index] = acc;
        acc += relations[*index].width;
    }
    let global_to_new = |g: usize| -> Option<usize> {
        relations
            .iter()
            .enumerate()
            .find(|(_, r)| g >= r.offset && g < r.offset + r.width)
            .map(|(i, r)| placement[i] + (g - r.offset))
    };

    // Build the left-deep tree, placing each condition at the first join
    // where all the relations it touches are available.
    let mut used = vec![false; conditions.len()];
    let mut tree = relations[order[0]].plan.clone();
    let mut included: BTreeSet<usize> = [order[0]].into_iter().collect();
    for next in &order[1..] {
        let right = &relations[*next];
        let mut now_included = included.clone();
        now_included.insert(*next);

        let mut on = Vec::new();
        let mut residual = Vec::new();
        for (i, condition) in conditions.iter().enumerate() {
            if used[i] {
                continue;
            }
            let touched = touched_relations(condition, relations);
            if !touched.iter().all(|t| now_included.contains(t)) {
                continue;
            }
            used[i] = true;
            let left_width = tree.schema().num_columns();
            // Remap to the local coordinates of this join.
            let local = condition
                .remap_columns(&global_to_new)
                .expect("all touched relations are placed");
            match split_equi(&local, left_width) {
                Some(pair) => on.push(pair),
                None => residual.push(local),
            }
        }

        let schema = Arc::new(join_schema(
            &tree.schema(),
            &right.plan.schema(),
            JoinType::Inner,
        ));
        tree = Arc::new(LogicalPlan::Join(Join {
            left: tree,
            right: right.plan.clone(),
            join_type: JoinType::Inner,
            on,
            filter: conjoin(residual),
            schema,
        }));
        included = now_included;
    }

    // Any condition spanning relations in a way the greedy order never
    // co-located lands in a filter on top.
    let leftover: Vec<Expr> = conditions
        .iter()
        .enumerate()
        .filter(|(i, _)| !used[*i])
        .map(|(_, c)| {
            c.remap_columns(&global_to_new)
                .expect("every relation is placed")
        })
        .collect();
    if let Some(predicate) = conjoin(leftover) {
        tree = Arc::new(LogicalPlan::Filter(Filter {
            predicate,
            input: tree,
            always_empty: false,
        }));
    }

    // Restore the original column order for parents.
    let original_schema = original.schema();
    let exprs: Vec<(Expr, String)> = (0..original_schema.num_columns())
        .map(|g| {
            let column = original_schema.column_schema(g);
            let new_index = global_to_new(g).expect("every column is placed");
            (
                Expr::Column(ColumnRef {
                    index: new_index,
                    name: column.name.clone(),
                    relation: column.relation.clone(),
                    data_type: column.data_type,
                    nullable: column.nullable,
                }),
                column.name.clone(),
            )
        })
        .collect();
    Ok(Arc::new(LogicalPlan::Project(Project {
        exprs,
        input: tree,
        schema: original_schema,
    })))
}

/// Which relations a (global-coordinate) condition touches.
fn touched_relations(condition: &Expr, relations: &[Relation]) -> BTreeSet<usize> {
    condition
        .referenced_columns()
        .into_iter()
        .filter_map(|g| {
            relations
                .iter()
                .position(|r| g >= r.offset && g < r.offset + r.width)
        })
        .collect()
}

/// Split `a = b` into an (left key, right key) pair when the sides fall
/// on opposite sides of `left_width`.
fn split_equi(condition: &Expr, left_width: usize) -> Option<(Expr, Expr)> {
    let Expr::BinaryOp {
        left,
        op: BinaryOp::Eq,
        right,
    } = condition
    else {
        return None;
    };
    let left_refs = left.referenced_columns();
    let right_refs = right.referenced_columns();
    let is_left = |refs: &BTreeSet<usize>| {
        !refs.is_empty() && refs.iter().all(|i| *i < left_width)
    };
    let is_right = |refs: &BTreeSet<usize>| {
        !refs.is_empty() && refs.iter().all(|i| *i >= left_width)
    };
    let localize = |e: &Expr| e.remap_columns(&|i| i.checked_sub(left_width));

    if is_left(&left_refs) && is_right(&right_refs) {
        Some(((**left).clone(), localize(right)?))
    } else if is_left(&right_refs) && is_right(&left_refs) {
        Some(((**right).clone(), localize(left)?))
    } else {
        None
    }
}
