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

//! Pushes limits toward the sources: below projections, into sorts as a
//! top-k bound, into union branches, and into scans as a fetch bound.

use std::sync::Arc;

use crate::error::Result;
use crate::optimizer::{transform_up, OptimizerContext, OptimizerRule};
use crate::plan::{Limit, LogicalPlan, PlanRef, Project, Sort, Union};

pub struct LimitPushdown;

impl OptimizerRule for LimitPushdown {
    fn name(&self) -> &str {
        "limit_pushdown"
    }

    fn try_optimize(&self, plan: &PlanRef, _ctx: &OptimizerContext) -> Result<Option<PlanRef>> {
        let rewritten = transform_up(plan, &|node| {
            let LogicalPlan::Limit(limit) = node.as_ref() else {
                return Ok(None);
            };
            let Some(fetch) = limit.fetch else {
                // A bare OFFSET bounds nothing below it.
                return Ok(None);
            };
            // Rows any child must still produce to satisfy skip + fetch.
            let window = limit.skip + fetch;

            let pushed: Option<PlanRef> = match limit.input.as_ref() {
                LogicalPlan::Project(project) => {
                    Some(Arc::new(LogicalPlan::Project(Project {
                        exprs: project.exprs.clone(),
                        schema: project.schema.clone(),
                        input: Arc::new(LogicalPlan::Limit(Limit {
                            skip: limit.skip,
                            fetch: Some(fetch),
                            input: project.input.clone(),
                        })),
                    })))
                }
                LogicalPlan::Sort(sort) => {
                    if sort.fetch.is_some_and(|f| f <= window) {
                        None
                    } else {
                        // Fuse into a top-k sort; the skip stays above.
                        let topk: PlanRef = Arc::new(LogicalPlan::Sort(Sort {
                            exprs: sort.exprs.clone(),
                            fetch: Some(window),
                            input: sort.input.clone(),
                        }));
                        if limit.skip == 0 {
                            Some(topk)
                        } else {
                            Some(Arc::new(LogicalPlan::Limit(Limit {
                                skip: limit.skip,
                                fetch: Some(fetch),
                                input: topk,
                            })))
                        }
                    }
                }
                LogicalPlan::Union(union) => {
                    let already_bounded = union.inputs.iter().all(|branch| {
                        matches!(
                            branch.as_ref(),
                            LogicalPlan::Limit(l) if l.fetch.is_some_and(|f| f <= window)
                        )
                    });
                    if already_bounded {
                        None
                    } else {
                        let inputs = union
                            .inputs
                            .iter()
                            .map(|branch| -> PlanRef {
                                Arc::new(LogicalPlan::Limit(Limit {
                                    skip: 0,
                                    fetch: Some(window),
                                    input: branch.clone(),
                                }))
                            })
                            .collect();
                        Some(Arc::new(LogicalPlan::Limit(Limit {
                            skip: limit.skip,
                            fetch: Some(fetch),
                            input: Arc::new(LogicalPlan::Union(Union {
                                inputs,
                                schema: union.schema.clone(),
                            })),
                        })))
                    }
                }
                LogicalPlan::TableScan(scan) => {
                    if scan.fetch.is_some_and(|f| f <= window) {
                        None
                    } else {
                        // The scan bound covers skip + fetch; the limit node
                        // stays above to apply the skip.
                        let mut new_scan = scan.clone();
                        new_scan.fetch = Some(window);
                        Some(Arc::new(LogicalPlan::Limit(Limit {
                            skip: limit.skip,
                            fetch: Some(fetch),
                            input: Arc::new(LogicalPlan::TableScan(new_scan)),
                        })))
                    }
                }
                _ => None,
            };
            Ok(pushed)
        })?;
        Ok(if rewritten == *plan { None } else { Some(rewritten) })
    }
}
