// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Brute-force reference strategy.
use std::collections::BTreeSet;

use super::{SelectError, SelectionProblem, Selector, Side};

/// Largest number of free units [`ExhaustiveSelector`] will enumerate.
pub const MAX_EXHAUSTIVE_UNITS: usize = 20;

/// Enumerates every placement of the free units.
///
/// Ties break on fewest recomputed snapshots, then on the lowest subset mask,
/// which yields the same partition as [`super::MinCutSelector`]. Used to
/// cross-check the min-cut strategy on small problems.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExhaustiveSelector;

impl Selector for ExhaustiveSelector {
    fn name(&self) -> &str {
        "exhaustive"
    }

    fn select(&self, problem: &SelectionProblem) -> Result<BTreeSet<usize>, SelectError> {
        let free = problem.free_units();
        if free.len() > MAX_EXHAUSTIVE_UNITS {
            return Err(SelectError::TooLarge {
                free: free.len(),
                limit: MAX_EXHAUSTIVE_UNITS,
            });
        }
        let forced = problem.forced_units(Side::Recompute);

        let mut best: Option<((u128, usize, u32), BTreeSet<usize>)> = None;
        for mask in 0..(1u32 << free.len()) {
            let mut recompute = forced.clone();
            recompute.extend(
                free.iter()
                    .enumerate()
                    .filter(|(bit, _)| mask & (1 << bit) != 0)
                    .map(|(_, &unit)| unit),
            );
            let members: usize = recompute
                .iter()
                .map(|&i| problem.units()[i].members.len())
                .sum();
            let key = (problem.total_cost(&recompute), members, mask);
            if best.as_ref().is_none_or(|(k, _)| key < *k) {
                best = Some((key, recompute));
            }
        }
        Ok(best.map(|(_, r)| r).unwrap_or(forced))
    }
}
