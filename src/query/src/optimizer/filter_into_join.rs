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

//! Folds `Filter(Join)` conjuncts that span both sides into the inner
//! join itself: equality conjuncts become join keys, the rest joins the
//! residual condition.

use std::sync::Arc;

use crate::error::Result;
use crate::expr::{conjoin, split_conjunction, BinaryOp, Expr};
use crate::optimizer::{transform_up, OptimizerContext, OptimizerRule};
use crate::plan::{Filter, JoinType, LogicalPlan, PlanRef};

pub struct FilterIntoJoin;

impl OptimizerRule for FilterIntoJoin {
    fn name(&self) -> &str {
        "filter_into_join"
    }

    fn try_optimize(&self, plan: &PlanRef, _ctx: &OptimizerContext) -> Result<Option<PlanRef>> {
        let rewritten = transform_up(plan, &|node| {
            let LogicalPlan::Filter(filter) = node.as_ref() else {
                return Ok(None);
            };
            let LogicalPlan::Join(join) = filter.input.as_ref() else {
                return Ok(None);
            };
            if join.join_type != JoinType::Inner {
                return Ok(None);
            }

            let left_columns = join.left.schema().num_columns();
            let mut new_join = join.clone();
            let mut remaining = Vec::new();
            let mut changed = false;

            for conjunct in split_conjunction(&filter.predicate) {
                if conjunct.contains_subquery() {
                    remaining.push(conjunct);
                    continue;
                }
                let refs = conjunct.referenced_columns();
                let spans_both = refs.iter().any(|i| *i < left_columns)
                    && refs.iter().any(|i| *i >= left_columns);
                if !spans_both {
                    remaining.push(conjunct);
                    continue;
                }
                if let Some((left_key, right_key)) = as_equi_pair(&conjunct, left_columns) {
                    new_join.on.push((left_key, right_key));
                    changed = true;
                } else {
                    new_join.filter = Some(match new_join.filter.take() {
                        Some(existing) => existing.and(conjunct),
                        None => conjunct,
                    });
                    changed = true;
                }
            }

            if !changed {
                return Ok(None);
            }
            let joined: PlanRef = Arc::new(LogicalPlan::Join(new_join));
            let result = match conjoin(remaining) {
                Some(predicate) => Arc::new(LogicalPlan::Filter(Filter {
                    predicate,
                    input: joined,
                    always_empty: filter.always_empty,
                })),
                None => joined,
            };
            Ok(Some(result))
        })?;
        Ok(if rewritten == *plan { None } else { Some(rewritten) })
    }
}

/// `left_col_expr = right_col_expr` across the boundary, remapped so the
/// right key indexes the right child schema.
fn as_equi_pair(conjunct: &Expr, left_columns: usize) -> Option<(Expr, Expr)> {
    let Expr::BinaryOp {
        left,
        op: BinaryOp::Eq,
        right,
    } = conjunct
    else {
        return None;
    };
    let left_refs = left.referenced_columns();
    let right_refs = right.referenced_columns();
    let all_left =
        |refs: &std::collections::BTreeSet<usize>| refs.iter().all(|i| *i < left_columns);
    let all_right =
        |refs: &std::collections::BTreeSet<usize>| refs.iter().all(|i| *i >= left_columns);
    let shift = |e: &Expr| e.remap_columns(&|i| i.checked_sub(left_columns));

    if !left_refs.is_empty() && !right_refs.is_empty() {
        if all_left(&left_refs) && all_right(&right_refs) {
            return Some(((**left).clone(), shift(right)?));
        }
        if all_right(&left_refs) && all_left(&right_refs) {
            return Some(((**right).clone(), shift(left)?));
        }
    }
    None
}
