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

//! Collapses adjacent nodes of the same kind: filter/filter composes with
//! AND, project/project composes by substitution, sort/sort keeps the
//! outer keys, limit/limit combines bounds.

use std::sync::Arc;

use crate::error::Result;
use crate::expr::Expr;
use crate::optimizer::{transform_up, OptimizerContext, OptimizerRule};
use crate::plan::{Filter, Limit, LogicalPlan, PlanRef, Project, Sort};

pub struct MergeAdjacent;

impl OptimizerRule for MergeAdjacent {
    fn name(&self) -> &str {
        "merge_adjacent"
    }

    fn try_optimize(&self, plan: &PlanRef, _ctx: &OptimizerContext) -> Result<Option<PlanRef>> {
        let rewritten = transform_up(plan, &|node| {
            let merged = match node.as_ref() {
                LogicalPlan::Filter(outer) => match outer.input.as_ref() {
                    LogicalPlan::Filter(inner) => {
                        Some(Arc::new(LogicalPlan::Filter(Filter {
                            predicate: outer.predicate.clone().and(inner.predicate.clone()),
                            input: inner.input.clone(),
                            always_empty: outer.always_empty || inner.always_empty,
                        })))
                    }
                    _ => None,
                },
                LogicalPlan::Project(outer) => match outer.input.as_ref() {
                    LogicalPlan::Project(inner) => merge_projects(outer, inner),
                    _ => None,
                },
                LogicalPlan::Sort(outer) => match outer.input.as_ref() {
                    // The inner ordering is overwritten by the outer one.
                    LogicalPlan::Sort(inner) => Some(Arc::new(LogicalPlan::Sort(Sort {
                        exprs: outer.exprs.clone(),
                        fetch: min_opt(outer.fetch, inner.fetch),
                        input: inner.input.clone(),
                    }))),
                    _ => None,
                },
                LogicalPlan::Limit(outer) => match outer.input.as_ref() {
                    LogicalPlan::Limit(inner) => {
                        // The inner limit applies first; the outer skips and
                        // bounds within the inner window.
                        let skip = inner.skip + outer.skip;
                        let inner_left = inner.fetch.map(|f| f.saturating_sub(outer.skip));
                        let fetch = min_opt(outer.fetch, inner_left);
                        Some(Arc::new(LogicalPlan::Limit(Limit {
                            skip,
                            fetch,
                            input: inner.input.clone(),
                        })))
                    }
                    _ => None,
                },
                _ => None,
            };
            Ok(merged)
        })?;
        Ok(if rewritten == *plan { None } else { Some(rewritten) })
    }
}

fn min_opt(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// Compose `outer(inner(x))` into one projection by substituting inner
/// expressions into outer column references.
fn merge_projects(outer: &Project, inner: &Project) -> Option<PlanRef> {
    let mut exprs = Vec::with_capacity(outer.exprs.len());
    for (expr, name) in &outer.exprs {
        exprs.push((substitute(expr, &inner.exprs)?, name.clone()));
    }
    Some(Arc::new(LogicalPlan::Project(Project {
        exprs,
        input: inner.input.clone(),
        schema: outer.schema.clone(),
    })))
}

fn substitute(expr: &Expr, inner: &[(Expr, String)]) -> Option<Expr> {
    match expr {
        Expr::Column(c) => inner.get(c.index).map(|(e, _)| e.clone()),
        Expr::Literal(_) => Some(expr.clone()),
        Expr::BinaryOp { left, op, right } => Some(Expr::BinaryOp {
            left: Box::new(substitute(left, inner)?),
            op: *op,
            right: Box::new(substitute(right, inner)?),
        }),
        Expr::Not(e) => Some(Expr::Not(Box::new(substitute(e, inner)?))),
        Expr::Negative(e) => Some(Expr::Negative(Box::new(substitute(e, inner)?))),
        Expr::IsNull(e) => Some(Expr::IsNull(Box::new(substitute(e, inner)?))),
        Expr::IsNotNull(e) => Some(Expr::IsNotNull(Box::new(substitute(e, inner)?))),
        Expr::Like {
            negated,
            expr,
            pattern,
        } => Some(Expr::Like {
            negated: *negated,
            expr: Box::new(substitute(expr, inner)?),
            pattern: Box::new(substitute(pattern, inner)?),
        }),
        Expr::InList {
            expr,
            list,
            negated,
        } => Some(Expr::InList {
            expr: Box::new(substitute(expr, inner)?),
            list: list
                .iter()
                .map(|e| substitute(e, inner))
                .collect::<Option<Vec<_>>>()?,
            negated: *negated,
        }),
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Some(Expr::Between {
            expr: Box::new(substitute(expr, inner)?),
            negated: *negated,
            low: Box::new(substitute(low, inner)?),
            high: Box::new(substitute(high, inner)?),
        }),
        Expr::Function { name, args } => Some(Expr::Function {
            name: name.clone(),
            args: args
                .iter()
                .map(|e| substitute(e, inner))
                .collect::<Option<Vec<_>>>()?,
        }),
        Expr::Cast { expr, to } => Some(Expr::Cast {
            expr: Box::new(substitute(expr, inner)?),
            to: *to,
        }),
        // Subqueries do not participate in projection merging.
        Expr::InSubquery { .. } | Expr::Exists { .. } => None,
    }
}
