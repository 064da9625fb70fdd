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

//! The rule-based optimizer: an ordered program of local rewrites run to
//! a fixed point with a pass cap. Every rule is a pure function from plan
//! to plan; a rule that changes nothing returns `None`.

mod aggregate_split;
mod filter_into_join;
pub(crate) mod join_reorder;
mod limit_pushdown;
mod merge;
mod predicate_pushdown;
mod projection_pushdown;
mod subquery_rewrite;

use std::sync::Arc;

use catalog::CatalogState;
use common_telemetry::debug;
use connectors::ConnectorRegistryRef;

use crate::error::Result;
use crate::plan::PlanRef;

pub use self::aggregate_split::AggregateSplit;
pub use self::filter_into_join::FilterIntoJoin;
pub use self::join_reorder::JoinReorder;
pub use self::limit_pushdown::LimitPushdown;
pub use self::merge::MergeAdjacent;
pub use self::predicate_pushdown::PredicatePushdown;
pub use self::projection_pushdown::ProjectionPushdown;
pub use self::subquery_rewrite::SubqueryRewrite;

/// Passes before the driver gives up on reaching a fixed point.
const MAX_PASSES: usize = 10;

/// Read-only context rules may consult for estimates.
pub struct OptimizerContext {
    pub catalog: Arc<CatalogState>,
    pub registry: ConnectorRegistryRef,
}

pub trait OptimizerRule {
    fn name(&self) -> &str;

    /// Rewrite the plan rooted at `plan`. `None` means no change.
    fn try_optimize(&self, plan: &PlanRef, ctx: &OptimizerContext) -> Result<Option<PlanRef>>;
}

pub struct RuleBasedOptimizer {
    rules: Vec<Box<dyn OptimizerRule + Send + Sync>>,
}

impl Default for RuleBasedOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBasedOptimizer {
    /// The fixed rule program, in application order. The driver loops the
    /// whole program to a fixed point, so a rule enabled by a later one
    /// fires on the next pass.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(PredicatePushdown),
                Box::new(ProjectionPushdown),
                Box::new(FilterIntoJoin),
                Box::new(MergeAdjacent),
                Box::new(LimitPushdown),
                Box::new(AggregateSplit),
                Box::new(SubqueryRewrite),
                Box::new(JoinReorder),
            ],
        }
    }

    pub fn optimize(&self, plan: PlanRef, ctx: &OptimizerContext) -> Result<PlanRef> {
        let mut current = plan;
        for pass in 0..MAX_PASSES {
            let mut changed = false;
            for rule in &self.rules {
                if let Some(rewritten) = rule.try_optimize(&current, ctx)? {
                    if rewritten != current {
                        debug!("rule {} rewrote the plan in pass {}", rule.name(), pass);
                        current = rewritten;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        Ok(current)
    }
}

/// Apply `f` to every node bottom-up, rebuilding parents of changed
/// children. `f` sees a node whose children are already rewritten.
pub(crate) fn transform_up<F>(plan: &PlanRef, f: &F) -> Result<PlanRef>
where
    F: Fn(&PlanRef) -> Result<Option<PlanRef>>,
{
    let children = plan.children();
    let node = if children.is_empty() {
        plan.clone()
    } else {
        let mut new_children = Vec::with_capacity(children.len());
        let mut changed = false;
        for child in &children {
            let rewritten = transform_up(child, f)?;
            changed = changed || !Arc::ptr_eq(&rewritten, child);
            new_children.push(rewritten);
        }
        if changed {
            Arc::new(plan.with_new_children(new_children)?)
        } else {
            plan.clone()
        }
    };
    match f(&node)? {
        Some(rewritten) => Ok(rewritten),
        None => Ok(node),
    }
}
