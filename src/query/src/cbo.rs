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

//! The cost-based optimizer: a bounded Volcano-style search over join
//! orders. Candidates are enumerated per inner-join chain, combined
//! bottom-up with per-node pruning, costed with the federation-aware
//! model, and the cheapest whole plan wins. A step budget bounds the
//! search; on exhaustion the best plan seen so far is used.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use common_telemetry::debug;
use itertools::Itertools;

use crate::cost::plan_cost;
use crate::error::Result;
use crate::optimizer::join_reorder::{build_order, flatten};
use crate::optimizer::OptimizerContext;
use crate::plan::{JoinType, LogicalPlan, PlanRef};

/// Default candidate-evaluation budget.
pub const DEFAULT_STEP_BUDGET: usize = 2_000;

/// Alternatives kept per node during bottom-up combination.
const PER_NODE_CAP: usize = 6;

/// Permutations enumerated per join chain.
const MAX_CHAIN_PERMUTATIONS: usize = 120;

pub struct CostBasedOptimizer {
    step_budget: usize,
}

impl Default for CostBasedOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_STEP_BUDGET)
    }
}

impl CostBasedOptimizer {
    pub fn new(step_budget: usize) -> Self {
        Self { step_budget }
    }

    /// Pick the cheapest equivalent plan. Returns the plan and its cost.
    pub fn optimize(&self, plan: PlanRef, ctx: &OptimizerContext) -> Result<(PlanRef, f64)> {
        let mut search = Search {
            ctx,
            steps_left: self.step_budget,
            memo: HashMap::new(),
        };
        let candidates = search.alternatives(&plan)?;

        let mut best = plan.clone();
        let mut best_cost = search.cost(&plan);
        for candidate in candidates {
            let cost = search.cost(&candidate);
            if cost < best_cost {
                best_cost = cost;
                best = candidate;
            }
        }
        debug!(
            "cost-based search kept plan with cost {:.1} ({} steps unused)",
            best_cost, search.steps_left
        );
        Ok((best, best_cost))
    }
}

struct Search<'a> {
    ctx: &'a OptimizerContext,
    steps_left: usize,
    /// Plan digest -> cost, so equivalent candidates are costed once.
    memo: HashMap<u64, f64>,
}

impl Search<'_> {
    fn cost(&mut self, plan: &PlanRef) -> f64 {
        let digest = digest(plan);
        if let Some(cost) = self.memo.get(&digest) {
            return *cost;
        }
        let cost = plan_cost(plan, &self.ctx.catalog, &self.ctx.registry);
        self.memo.insert(digest, cost);
        cost
    }

    fn charge(&mut self) -> bool {
        if self.steps_left == 0 {
            return false;
        }
        self.steps_left -= 1;
        true
    }

    /// Enumerate equivalent plans for the subtree, including itself,
    /// pruned to the cheapest few per node.
    fn alternatives(&mut self, plan: &PlanRef) -> Result<Vec<PlanRef>> {
        if !self.charge() {
            return Ok(vec![plan.clone()]);
        }

        // Rebuild the node over every combination of child alternatives.
        let children = plan.children();
        let mut rebuilt: Vec<PlanRef> = Vec::new();
        if children.is_empty() {
            rebuilt.push(plan.clone());
        } else {
            let mut child_options = Vec::with_capacity(children.len());
            for child in &children {
                child_options.push(self.alternatives(child)?);
            }
            for combo in child_options.into_iter().multi_cartesian_product() {
                if !self.charge() {
                    break;
                }
                rebuilt.push(Arc::new(plan.with_new_children(combo)?));
            }
            if rebuilt.is_empty() {
                rebuilt.push(plan.clone());
            }
        }

        // Join chains additionally expand into order permutations.
        let mut expanded = Vec::new();
        for candidate in &rebuilt {
            expanded.extend(self.join_orders(candidate)?);
        }
        rebuilt.extend(expanded);

        // Prune to the cheapest alternatives to keep the search bounded.
        rebuilt.sort_by(|a, b| self.cost_pair(a, b));
        rebuilt.dedup_by_key(|p| digest(p));
        rebuilt.truncate(PER_NODE_CAP);
        Ok(rebuilt)
    }

    fn cost_pair(&mut self, a: &PlanRef, b: &PlanRef) -> std::cmp::Ordering {
        let ca = self.cost(a);
        let cb = self.cost(b);
        ca.total_cmp(&cb)
    }

    /// Permutations of an inner-join chain rooted here.
    fn join_orders(&mut self, plan: &PlanRef) -> Result<Vec<PlanRef>> {
        let LogicalPlan::Join(join) = plan.as_ref() else {
            return Ok(vec![]);
        };
        if join.join_type != JoinType::Inner {
            return Ok(vec![]);
        }

        let mut relations = Vec::new();
        let mut conditions = Vec::new();
        flatten(plan, 0, &mut relations, &mut conditions);
        if relations.len() < 2 || relations.len() > 6 {
            return Ok(vec![]);
        }
        if conditions.iter().any(|c| c.contains_subquery()) {
            return Ok(vec![]);
        }

        let mut out = Vec::new();
        for order in (0..relations.len())
            .permutations(relations.len())
            .take(MAX_CHAIN_PERMUTATIONS)
        {
            if !self.charge() {
                break;
            }
            out.push(build_order(plan, &relations, &conditions, &order)?);
        }
        Ok(out)
    }
}

fn digest(plan: &PlanRef) -> u64 {
    let mut hasher = DefaultHasher::new();
    format!("{plan:?}").hash(&mut hasher);
    hasher.finish()
}
