// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Baseline strategies for comparison runs.
use std::collections::BTreeSet;

use super::{SelectError, SelectionProblem, Selector, Side};

/// Migrates everything that can be migrated.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateAllSelector;

impl Selector for MigrateAllSelector {
    fn name(&self) -> &str {
        "migrate_all"
    }

    fn select(&self, problem: &SelectionProblem) -> Result<BTreeSet<usize>, SelectError> {
        Ok(problem.forced_units(Side::Recompute))
    }
}

/// Recomputes everything that can be recomputed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecomputeAllSelector;

impl Selector for RecomputeAllSelector {
    fn name(&self) -> &str {
        "recompute_all"
    }

    fn select(&self, problem: &SelectionProblem) -> Result<BTreeSet<usize>, SelectError> {
        let pinned = problem.forced_units(Side::Migrate);
        Ok((0..problem.units().len())
            .filter(|i| !pinned.contains(i))
            .collect())
    }
}
