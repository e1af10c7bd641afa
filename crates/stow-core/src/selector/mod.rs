// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Migrate/recompute optimizer.
//!
//! # Problem
//!
//! Active snapshots are grouped into [`Unit`]s, one per alias component. A
//! unit is either migrated (cost: serialized size at the configured
//! bandwidth) or recomputed (cost: runtime of its ancestor edges). Edges
//! shared by several recomputed units are paid once, so the total cost of a
//! recompute set `R` is
//!
//! ```text
//! Σ migrate_cost(u) for u ∉ R  +  Σ cost(e) for e ∈ ⋃ ancestors(u ∈ R)
//! ```
//!
//! # Forced placements
//!
//! A unit with an unmigratable member is always recomputed; a unit with an
//! unrecomputable member is always migrated; a unit with both is rejected with
//! [`SelectError::Unrecoverable`].
//!
//! # Tie-break
//!
//! Among equal-cost partitions, strategies prefer migration. The exact
//! strategies return the inclusion-minimal optimal recompute set.
//!
//! # Determinism
//!
//! [`select_vss`] is a pure function of the graph, active set, overlaps, cost
//! model and strategy. Strategies iterate units and edges in id order.
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, instrument};

use crate::aliasing::{AliasGroups, OverlapPair};
use crate::graph::{GraphError, SnapshotGraph};
use crate::ident::{EdgeId, SnapshotId};
use crate::profile::CostModel;

mod baseline;
mod exhaustive;
mod greedy;
mod mincut;
mod registry;

pub use baseline::{MigrateAllSelector, RecomputeAllSelector};
pub use exhaustive::{ExhaustiveSelector, MAX_EXHAUSTIVE_UNITS};
pub use greedy::GreedySelector;
pub use mincut::MinCutSelector;
pub use registry::SelectorRegistry;

/// Errors raised while building or solving a selection problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// Graph query failed (bad id from the caller).
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A unit can be neither migrated nor recomputed.
    #[error("cannot checkpoint {}: unmigratable and unrecomputable", names.join(", "))]
    Unrecoverable {
        /// Variable names in the offending unit.
        names: Vec<String>,
    },
    /// An overlap pair names a snapshot outside the active set.
    #[error("overlap pair ({lo}, {hi}) is not within the active set")]
    InvalidOverlap {
        /// Smaller id of the pair.
        lo: SnapshotId,
        /// Larger id of the pair.
        hi: SnapshotId,
    },
    /// A selection broke the partition contract.
    #[error("partition violation: {reason}")]
    PartitionViolation {
        /// What was violated.
        reason: String,
    },
    /// No strategy is registered under the requested name.
    #[error("unknown optimizer {name:?} (available: {})", available.join(", "))]
    UnknownStrategy {
        /// Requested name.
        name: String,
        /// Registered names.
        available: Vec<String>,
    },
    /// The exhaustive strategy was given too many free units.
    #[error("{free} free units exceed the exhaustive limit of {limit}")]
    TooLarge {
        /// Free unit count.
        free: usize,
        /// Strategy limit.
        limit: usize,
    },
}

/// Side of the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    /// Serialize and restore directly.
    Migrate,
    /// Discard and replay ancestor edges.
    Recompute,
}

/// One alias component of active snapshots, optimized as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Snapshots in the component.
    pub members: BTreeSet<SnapshotId>,
    /// Summed migration cost in nanoseconds; `None` if any member is
    /// unmigratable or unsized.
    pub migrate_cost: Option<u64>,
    /// Union of members' ancestor edges; `None` if any member cannot be
    /// recomputed.
    pub ancestors: Option<BTreeSet<EdgeId>>,
}

impl Unit {
    /// Placement the unit cannot escape, if any.
    pub fn forced(&self) -> Option<Side> {
        match (&self.migrate_cost, &self.ancestors) {
            (None, _) => Some(Side::Recompute),
            (_, None) => Some(Side::Migrate),
            _ => None,
        }
    }
}

/// Input to a [`Selector`]: units, edge costs and the constraints they came
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionProblem {
    units: Vec<Unit>,
    edge_costs: BTreeMap<EdgeId, u64>,
    lineage: BTreeMap<SnapshotId, BTreeSet<EdgeId>>,
    active: BTreeSet<SnapshotId>,
    overlaps: Vec<OverlapPair>,
}

impl SelectionProblem {
    /// Builds units from alias components and folds in forced placements.
    pub fn build(
        graph: &SnapshotGraph,
        active: &BTreeSet<SnapshotId>,
        overlaps: &[OverlapPair],
        cost: &CostModel,
    ) -> Result<Self, SelectError> {
        for pair in overlaps {
            if !active.contains(&pair.lo) || !active.contains(&pair.hi) {
                return Err(SelectError::InvalidOverlap {
                    lo: pair.lo,
                    hi: pair.hi,
                });
            }
        }

        let mut groups = AliasGroups::new(active.iter().copied(), overlaps.iter().copied());
        let mut units = Vec::new();
        let mut edge_costs = BTreeMap::new();
        let mut lineage = BTreeMap::new();
        for members in groups.components() {
            let mut migrate_cost = Some(0u64);
            let mut ancestors = Some(BTreeSet::new());
            for &id in &members {
                let snapshot = graph.snapshot(id)?;
                migrate_cost = migrate_cost
                    .zip(cost.migrate_cost(snapshot.size))
                    .map(|(acc, c)| acc.saturating_add(c));
                let own = graph.ancestors(id)?;
                if let Some(edges) = &own {
                    lineage.insert(id, edges.clone());
                }
                ancestors = match (ancestors, own) {
                    (Some(mut acc), Some(edges)) => {
                        acc.extend(edges);
                        Some(acc)
                    }
                    _ => None,
                };
            }
            if migrate_cost.is_none() && ancestors.is_none() {
                let mut names = members
                    .iter()
                    .map(|&id| graph.snapshot(id).map(|s| s.name.clone()))
                    .collect::<Result<Vec<_>, _>>()?;
                names.sort();
                return Err(SelectError::Unrecoverable { names });
            }
            for &edge in ancestors.iter().flatten() {
                edge_costs.insert(edge, cost.recompute_cost(graph.edge(edge)?.runtime));
            }
            units.push(Unit {
                members,
                migrate_cost,
                ancestors,
            });
        }

        Ok(Self {
            units,
            edge_costs,
            lineage,
            active: active.clone(),
            overlaps: overlaps.to_vec(),
        })
    }

    /// Units in order of their smallest member.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Replay cost of every edge some unit may need.
    pub fn edge_costs(&self) -> &BTreeMap<EdgeId, u64> {
        &self.edge_costs
    }

    /// Ancestor edges of each recomputable active snapshot.
    pub fn lineage(&self) -> &BTreeMap<SnapshotId, BTreeSet<EdgeId>> {
        &self.lineage
    }

    /// Active snapshots the problem covers.
    pub fn active(&self) -> &BTreeSet<SnapshotId> {
        &self.active
    }

    /// Overlap pairs the problem was built from.
    pub fn overlaps(&self) -> &[OverlapPair] {
        &self.overlaps
    }

    /// Indices of units without a forced placement.
    pub fn free_units(&self) -> Vec<usize> {
        self.units_where(|u| u.forced().is_none())
    }

    /// Indices of units forced to `side`.
    pub fn forced_units(&self, side: Side) -> BTreeSet<usize> {
        self.units_where(|u| u.forced() == Some(side))
            .into_iter()
            .collect()
    }

    fn units_where(&self, pred: impl Fn(&Unit) -> bool) -> Vec<usize> {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| pred(u))
            .map(|(i, _)| i)
            .collect()
    }

    /// Cost of replaying `edge`; zero for edges no unit needs.
    pub fn edge_cost(&self, edge: EdgeId) -> u64 {
        self.edge_costs.get(&edge).copied().unwrap_or(0)
    }

    /// Deduplicated union of ancestor edges of the units in `recompute`.
    pub fn replay_set(&self, recompute: &BTreeSet<usize>) -> BTreeSet<EdgeId> {
        recompute
            .iter()
            .filter_map(|&i| self.units.get(i))
            .filter_map(|u| u.ancestors.as_ref())
            .flatten()
            .copied()
            .collect()
    }

    /// Total cost of recomputing exactly the units in `recompute`.
    ///
    /// Infinite (unmigratable units left on the migrate side, or
    /// unrecomputable units on the recompute side) is `u128::MAX`.
    pub fn total_cost(&self, recompute: &BTreeSet<usize>) -> u128 {
        let mut total = 0u128;
        for (i, unit) in self.units.iter().enumerate() {
            let side_cost = if recompute.contains(&i) {
                unit.ancestors.as_ref().map(|_| 0)
            } else {
                unit.migrate_cost.map(u128::from)
            };
            let Some(cost) = side_cost else {
                return u128::MAX;
            };
            total += cost;
        }
        total
            + self
                .replay_set(recompute)
                .iter()
                .map(|&e| u128::from(self.edge_cost(e)))
                .sum::<u128>()
    }

    /// Expands unit indices into a snapshot-level [`Selection`].
    pub fn selection(
        &self,
        optimizer: &str,
        recompute_units: &BTreeSet<usize>,
    ) -> Result<Selection, SelectError> {
        if let Some(&bad) = recompute_units.iter().find(|&&i| i >= self.units.len()) {
            return Err(SelectError::PartitionViolation {
                reason: format!("selector returned unknown unit index {bad}"),
            });
        }
        let mut migrate = BTreeSet::new();
        let mut recompute = BTreeSet::new();
        for (i, unit) in self.units.iter().enumerate() {
            let side = if recompute_units.contains(&i) {
                &mut recompute
            } else {
                &mut migrate
            };
            side.extend(unit.members.iter().copied());
        }
        let recomputation = recompute
            .iter()
            .filter_map(|id| self.lineage.get(id).map(|edges| (*id, edges.clone())))
            .collect();
        Ok(Selection {
            optimizer: optimizer.to_owned(),
            migrate,
            recompute,
            edges: self.replay_set(recompute_units),
            recomputation,
            overlaps: self.overlaps.clone(),
            cost: self.total_cost(recompute_units),
        })
    }
}

/// Snapshot-level partition plus the edges to replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Strategy that produced the partition.
    pub optimizer: String,
    /// Snapshots to serialize.
    pub migrate: BTreeSet<SnapshotId>,
    /// Snapshots to rebuild by replay.
    pub recompute: BTreeSet<SnapshotId>,
    /// Edges to replay, ascending id order is a valid replay order.
    pub edges: BTreeSet<EdgeId>,
    /// Edges each recomputed snapshot needs on its own; their union is
    /// `edges`.
    pub recomputation: BTreeMap<SnapshotId, BTreeSet<EdgeId>>,
    /// Overlap pairs, kept so writers can serialize aliased values together.
    pub overlaps: Vec<OverlapPair>,
    /// Total cost in nanoseconds (`u128::MAX` if infeasible).
    pub cost: u128,
}

impl Selection {
    /// Side of `id`, or `None` if `id` is not in the partition.
    pub fn side(&self, id: SnapshotId) -> Option<Side> {
        if self.migrate.contains(&id) {
            Some(Side::Migrate)
        } else if self.recompute.contains(&id) {
            Some(Side::Recompute)
        } else {
            None
        }
    }

    /// Checks the partition contract against `problem`.
    ///
    /// Rejects partitions that are incomplete or overlapping, split an alias
    /// pair, break a forced placement, or replay a different edge set than
    /// the ancestors of the recompute side. Each recomputed snapshot must map
    /// to exactly its own ancestors in `recomputation`.
    pub fn validate(&self, problem: &SelectionProblem) -> Result<(), SelectError> {
        let violation = |reason: String| Err(SelectError::PartitionViolation { reason });

        if let Some(id) = self.migrate.intersection(&self.recompute).next() {
            return violation(format!("{id} is on both sides"));
        }
        let covered: BTreeSet<SnapshotId> = self.migrate.union(&self.recompute).copied().collect();
        if covered != *problem.active() {
            return violation("partition does not cover exactly the active set".to_owned());
        }
        for pair in problem.overlaps() {
            if self.side(pair.lo) != self.side(pair.hi) {
                return violation(format!("overlapping {} and {} are split", pair.lo, pair.hi));
            }
        }

        let mut needed = BTreeSet::new();
        for unit in problem.units() {
            for &id in &unit.members {
                let side = self.side(id);
                if let Some(forced) = unit.forced().filter(|&f| side != Some(f)) {
                    return violation(format!("{id} must be placed on {forced:?}"));
                }
                if side == Some(Side::Recompute) {
                    if let Some(ancestors) = &unit.ancestors {
                        needed.extend(ancestors.iter().copied());
                    }
                }
            }
        }
        if needed != self.edges {
            return violation("replay set differs from the recompute ancestors".to_owned());
        }
        if self.recomputation.keys().ne(self.recompute.iter()) {
            return violation(
                "recomputation map does not cover exactly the recompute side".to_owned(),
            );
        }
        for (id, edges) in &self.recomputation {
            if problem.lineage().get(id) != Some(edges) {
                return violation(format!("{id} is mapped to edges other than its ancestors"));
            }
        }
        Ok(())
    }
}

/// A migrate/recompute strategy.
///
/// Implementations return the indices of units to recompute. They must honour
/// forced placements; [`select_vss`] validates every result regardless.
pub trait Selector {
    /// Registry name.
    fn name(&self) -> &str;

    /// Chooses the recompute units.
    fn select(&self, problem: &SelectionProblem) -> Result<BTreeSet<usize>, SelectError>;
}

/// Wall-clock split of one [`select_vss_timed`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectTimings {
    /// Building units, costs and forced placements.
    pub build: Duration,
    /// Running the strategy.
    pub solve: Duration,
    /// Expanding and validating the partition.
    pub expand: Duration,
}

/// Partitions `active` into migrate and recompute sets with `selector`.
///
/// The result is validated before it is returned; a strategy bug surfaces as
/// [`SelectError::PartitionViolation`], never as a bad checkpoint.
pub fn select_vss(
    graph: &SnapshotGraph,
    active: &BTreeSet<SnapshotId>,
    overlaps: &[OverlapPair],
    cost: &CostModel,
    selector: &dyn Selector,
) -> Result<Selection, SelectError> {
    select_vss_timed(graph, active, overlaps, cost, selector).map(|(selection, _)| selection)
}

/// [`select_vss`], also reporting how long each sub-step took.
#[instrument(skip_all, fields(optimizer = selector.name(), active = active.len()))]
pub fn select_vss_timed(
    graph: &SnapshotGraph,
    active: &BTreeSet<SnapshotId>,
    overlaps: &[OverlapPair],
    cost: &CostModel,
    selector: &dyn Selector,
) -> Result<(Selection, SelectTimings), SelectError> {
    let started = Instant::now();
    let problem = SelectionProblem::build(graph, active, overlaps, cost)?;
    let build = started.elapsed();

    let started = Instant::now();
    let recompute_units = selector.select(&problem)?;
    let solve = started.elapsed();

    let started = Instant::now();
    let selection = problem.selection(selector.name(), &recompute_units)?;
    selection.validate(&problem)?;
    let expand = started.elapsed();
    info!(
        units = problem.units().len(),
        migrate = selection.migrate.len(),
        recompute = selection.recompute.len(),
        replay = selection.edges.len(),
        cost_ns = %selection.cost,
        "selection complete"
    );
    Ok((
        selection,
        SelectTimings {
            build,
            solve,
            expand,
        },
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::profile::Size;

    /// Bandwidth of 1 byte/ns, so sizes read directly as nanoseconds.
    fn unit_cost() -> CostModel {
        CostModel::new(1_000_000_000)
    }

    fn ns(n: u64) -> Duration {
        Duration::from_nanos(n)
    }

    #[test]
    fn unrecoverable_unit_names_every_member() {
        let mut g = SnapshotGraph::new();
        let handle = g.introduce("handle").unwrap();
        g.set_size(handle, Size::Unmigratable).unwrap();
        let err = SelectionProblem::build(&g, &g.active_snapshots(), &[], &unit_cost()).unwrap_err();
        assert_eq!(
            err,
            SelectError::Unrecoverable {
                names: vec!["handle".to_owned()]
            }
        );
    }

    #[test]
    fn alias_components_merge_forced_placements() {
        let mut g = SnapshotGraph::new();
        // `base` cannot be recomputed; `view` cannot be migrated. Together they
        // form one unit that can do neither.
        let base = g.introduce("base").unwrap();
        g.record_edge("view = base[:]", ns(1), &[base], &["view"], &[]).unwrap();
        let view = g.active_snapshot("view").unwrap();
        g.set_size(base, Size::Bytes(5)).unwrap();
        g.set_size(view, Size::Unmigratable).unwrap();
        let pair = OverlapPair::new(base, view).unwrap();
        let err = SelectionProblem::build(&g, &g.active_snapshots(), &[pair], &unit_cost())
            .unwrap_err();
        assert_eq!(
            err,
            SelectError::Unrecoverable {
                names: vec!["base".to_owned(), "view".to_owned()]
            }
        );
    }

    #[test]
    fn overlap_outside_active_set_is_rejected() {
        let mut g = SnapshotGraph::new();
        let a = g.introduce("a").unwrap();
        let pair = OverlapPair::new(a, SnapshotId(42)).unwrap();
        let err = SelectionProblem::build(&g, &g.active_snapshots(), &[pair], &unit_cost())
            .unwrap_err();
        assert_eq!(
            err,
            SelectError::InvalidOverlap {
                lo: a,
                hi: SnapshotId(42)
            }
        );
    }

    #[test]
    fn total_cost_counts_shared_edges_once() {
        let mut g = SnapshotGraph::new();
        let shared = g.record_edge("a, b = load()", ns(100), &[], &["a", "b"], &[]).unwrap();
        let a = g.active_snapshot("a").unwrap();
        let b = g.active_snapshot("b").unwrap();
        g.set_size(a, Size::Bytes(70)).unwrap();
        g.set_size(b, Size::Bytes(70)).unwrap();
        let problem = SelectionProblem::build(&g, &g.active_snapshots(), &[], &unit_cost()).unwrap();
        assert_eq!(problem.edge_costs(), &BTreeMap::from([(shared, 100)]));
        assert_eq!(problem.total_cost(&BTreeSet::new()), 140);
        assert_eq!(problem.total_cost(&BTreeSet::from([0])), 170);
        assert_eq!(problem.total_cost(&BTreeSet::from([0, 1])), 100);
    }

    #[test]
    fn validate_rejects_split_overlap() {
        let mut g = SnapshotGraph::new();
        g.record_edge("a = x()", ns(3), &[], &["a"], &[]).unwrap();
        g.record_edge("b = y()", ns(3), &[], &["b"], &[]).unwrap();
        let a = g.active_snapshot("a").unwrap();
        let b = g.active_snapshot("b").unwrap();
        g.set_size(a, Size::Bytes(10)).unwrap();
        g.set_size(b, Size::Bytes(20)).unwrap();
        let pair = OverlapPair::new(a, b).unwrap();
        let problem =
            SelectionProblem::build(&g, &g.active_snapshots(), &[pair], &unit_cost()).unwrap();
        assert_eq!(problem.units().len(), 1);

        let split = Selection {
            optimizer: "naive".to_owned(),
            migrate: BTreeSet::from([a]),
            recompute: BTreeSet::from([b]),
            edges: g.ancestors(b).unwrap().unwrap(),
            recomputation: BTreeMap::from([(b, g.ancestors(b).unwrap().unwrap())]),
            overlaps: vec![pair],
            cost: 13,
        };
        assert!(matches!(
            split.validate(&problem),
            Err(SelectError::PartitionViolation { .. })
        ));
    }

    #[test]
    fn validate_rejects_missing_replay_edges_and_forced_breaks() {
        let mut g = SnapshotGraph::new();
        g.record_edge("c = open()", ns(5), &[], &["c"], &[]).unwrap();
        let c = g.active_snapshot("c").unwrap();
        g.set_size(c, Size::Unmigratable).unwrap();
        let problem = SelectionProblem::build(&g, &g.active_snapshots(), &[], &unit_cost()).unwrap();

        let migrated = Selection {
            optimizer: "bad".to_owned(),
            migrate: BTreeSet::from([c]),
            recompute: BTreeSet::new(),
            edges: BTreeSet::new(),
            recomputation: BTreeMap::new(),
            overlaps: Vec::new(),
            cost: 0,
        };
        assert!(migrated.validate(&problem).is_err());

        let no_edges = Selection {
            migrate: BTreeSet::new(),
            recompute: BTreeSet::from([c]),
            ..migrated
        };
        assert!(no_edges.validate(&problem).is_err());

        let good = problem.selection("manual", &BTreeSet::from([0])).unwrap();
        good.validate(&problem).unwrap();
        assert_eq!(good.cost, 5);

        let unmapped = Selection {
            recomputation: BTreeMap::new(),
            ..good
        };
        assert!(unmapped.validate(&problem).is_err());
    }

    #[test]
    fn recomputation_lists_each_variables_own_edges() {
        let mut g = SnapshotGraph::new();
        let load = g.record_edge("a = load()", ns(4), &[], &["a"], &[]).unwrap();
        let a = g.active_snapshot("a").unwrap();
        let derive = g.record_edge("b = f(a)", ns(6), &[a], &["b"], &[]).unwrap();
        let other = g.record_edge("c = g()", ns(2), &[], &["c"], &[]).unwrap();
        let b = g.active_snapshot("b").unwrap();
        let c = g.active_snapshot("c").unwrap();
        for id in [a, b, c] {
            g.set_size(id, Size::Bytes(1_000)).unwrap();
        }
        let problem = SelectionProblem::build(&g, &g.active_snapshots(), &[], &unit_cost()).unwrap();
        let all: BTreeSet<usize> = (0..problem.units().len()).collect();
        let selection = problem.selection("manual", &all).unwrap();
        selection.validate(&problem).unwrap();

        assert_eq!(selection.recomputation[&a], BTreeSet::from([load]));
        assert_eq!(selection.recomputation[&b], BTreeSet::from([derive]));
        assert_eq!(selection.recomputation[&c], BTreeSet::from([other]));
        let union: BTreeSet<EdgeId> = selection.recomputation.values().flatten().copied().collect();
        assert_eq!(union, selection.edges);

        let swapped = Selection {
            recomputation: BTreeMap::from([
                (a, BTreeSet::from([load])),
                (b, BTreeSet::from([other])),
                (c, BTreeSet::from([load, derive])),
            ]),
            ..selection
        };
        assert!(swapped.validate(&problem).is_err());
    }

    #[test]
    fn selection_rejects_unknown_unit_index() {
        let mut g = SnapshotGraph::new();
        let a = g.introduce("a").unwrap();
        g.set_size(a, Size::Bytes(1)).unwrap();
        let problem = SelectionProblem::build(&g, &g.active_snapshots(), &[], &unit_cost()).unwrap();
        assert!(matches!(
            problem.selection("bad", &BTreeSet::from([3])),
            Err(SelectError::PartitionViolation { .. })
        ));
    }
}
