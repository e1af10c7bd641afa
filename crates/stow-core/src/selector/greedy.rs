// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Greedy heuristic strategy.
use std::collections::BTreeSet;

use super::{SelectError, SelectionProblem, Selector, Side};

/// Starts with every free unit migrated and repeatedly flips the unit whose
/// recomputation saves the most, counting only ancestor edges not already
/// being replayed. Stops when no flip strictly saves. Ties go to the lowest
/// unit index.
///
/// Not optimal: a group of units sharing an expensive edge is only recomputed
/// if one of them pays for the edge on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySelector;

impl Selector for GreedySelector {
    fn name(&self) -> &str {
        "greedy"
    }

    fn select(&self, problem: &SelectionProblem) -> Result<BTreeSet<usize>, SelectError> {
        let mut recompute = problem.forced_units(Side::Recompute);
        let mut paid = problem.replay_set(&recompute);
        let free = problem.free_units();

        loop {
            let mut best: Option<(u128, usize)> = None;
            for &i in free.iter().filter(|i| !recompute.contains(i)) {
                let unit = &problem.units()[i];
                let (Some(migrate), Some(ancestors)) = (unit.migrate_cost, &unit.ancestors) else {
                    continue;
                };
                let marginal: u128 = ancestors
                    .difference(&paid)
                    .map(|&e| u128::from(problem.edge_cost(e)))
                    .sum();
                let migrate = u128::from(migrate);
                if migrate > marginal {
                    let saving = migrate - marginal;
                    if best.is_none_or(|(s, _)| saving > s) {
                        best = Some((saving, i));
                    }
                }
            }
            let Some((_, chosen)) = best else {
                return Ok(recompute);
            };
            recompute.insert(chosen);
            if let Some(ancestors) = &problem.units()[chosen].ancestors {
                paid.extend(ancestors.iter().copied());
            }
        }
    }
}
