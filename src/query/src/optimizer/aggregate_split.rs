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

//! Marks aggregates whose functions all decompose into a local partial
//! and a global final form. The physical planner performs the actual
//! split when the aggregate's input lives on one source.

use std::sync::Arc;

use crate::error::Result;
use crate::optimizer::{transform_up, OptimizerContext, OptimizerRule};
use crate::plan::{AggregateMode, LogicalPlan, PlanRef};

pub struct AggregateSplit;

impl OptimizerRule for AggregateSplit {
    fn name(&self) -> &str {
        "aggregate_split"
    }

    fn try_optimize(&self, plan: &PlanRef, _ctx: &OptimizerContext) -> Result<Option<PlanRef>> {
        let rewritten = transform_up(plan, &|node| {
            let LogicalPlan::Aggregate(agg) = node.as_ref() else {
                return Ok(None);
            };
            if agg.mode != AggregateMode::Complete || agg.splittable {
                return Ok(None);
            }
            // DISTINCT aggregates cannot combine partial states.
            let splittable = agg
                .aggregates
                .iter()
                .all(|a| a.func.is_splittable() && !a.distinct);
            if !splittable {
                return Ok(None);
            }
            let mut marked = agg.clone();
            marked.splittable = true;
            Ok(Some(Arc::new(LogicalPlan::Aggregate(marked))))
        })?;
        Ok(if rewritten == *plan { None } else { Some(rewritten) })
    }
}
