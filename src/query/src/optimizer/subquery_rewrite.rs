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

//! Flattens IN/EXISTS subquery conjuncts of a filter into semi and anti
//! joins. Conjuncts that cannot be flattened safely are left in place and
//! surface later as unsupported when execution reaches them.

use std::sync::Arc;

use crate::error::Result;
use crate::expr::{conjoin, split_conjunction, Expr};
use crate::optimizer::{transform_up, OptimizerContext, OptimizerRule};
use crate::plan::{Filter, Join, JoinType, LogicalPlan, PlanRef};

pub struct SubqueryRewrite;

impl OptimizerRule for SubqueryRewrite {
    fn name(&self) -> &str {
        "subquery_rewrite"
    }

    fn try_optimize(&self, plan: &PlanRef, _ctx: &OptimizerContext) -> Result<Option<PlanRef>> {
        let rewritten = transform_up(plan, &|node| {
            let LogicalPlan::Filter(filter) = node.as_ref() else {
                return Ok(None);
            };
            if !filter.predicate.contains_subquery() {
                return Ok(None);
            }

            let mut input = filter.input.clone();
            let mut remaining = Vec::new();
            let mut changed = false;

            for conjunct in split_conjunction(&filter.predicate) {
                match conjunct {
                    Expr::InSubquery {
                        expr,
                        subquery,
                        negated,
                    } => {
                        // NOT IN over a nullable key is not an anti join
                        // (a null in the subquery empties the result); it
                        // stays behind as unsupported.
                        let key_nullable =
                            subquery.schema().column_schema(0).nullable || expr.nullable();
                        if negated && key_nullable {
                            remaining.push(Expr::InSubquery {
                                expr,
                                subquery,
                                negated,
                            });
                            continue;
                        }
                        input = semi_join(
                            input,
                            subquery.clone(),
                            vec![((*expr).clone(), first_column(&subquery))],
                            negated,
                        );
                        changed = true;
                    }
                    Expr::Exists {
                        subquery,
                        correlated_on,
                        negated,
                    } => {
                        input = semi_join(input, subquery, correlated_on, negated);
                        changed = true;
                    }
                    other => remaining.push(other),
                }
            }

            if !changed {
                return Ok(None);
            }
            let result = match conjoin(remaining) {
                Some(predicate) => Arc::new(LogicalPlan::Filter(Filter {
                    predicate,
                    input,
                    always_empty: filter.always_empty,
                })),
                None => input,
            };
            Ok(Some(result))
        })?;
        Ok(if rewritten == *plan { None } else { Some(rewritten) })
    }
}

fn semi_join(
    left: PlanRef,
    right: PlanRef,
    on: Vec<(Expr, Expr)>,
    negated: bool,
) -> PlanRef {
    let join_type = if negated {
        JoinType::LeftAnti
    } else {
        JoinType::LeftSemi
    };
    let schema = left.schema();
    Arc::new(LogicalPlan::Join(Join {
        left,
        right,
        join_type,
        on,
        filter: None,
        schema,
    }))
}

/// A reference to the first output column of a subquery plan.
fn first_column(plan: &PlanRef) -> Expr {
    let schema = plan.schema();
    let column = schema.column_schema(0);
    Expr::Column(crate::expr::ColumnRef {
        index: 0,
        name: column.name.clone(),
        relation: column.relation.clone(),
        data_type: column.data_type,
        nullable: column.nullable,
    })
}
