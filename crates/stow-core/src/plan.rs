// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Checkpoint plan: a validated [`Selection`] in graph-independent terms.
//!
//! Writers and restorers only see [`SnapshotKey`]s and edge sources, never
//! arena ids, so a plan stays meaningful after the graph that produced it is
//! gone.
use std::collections::BTreeSet;

use crate::aliasing::AliasGroups;
use crate::graph::{GraphError, SnapshotGraph};
use crate::ident::{EdgeId, SnapshotId, SnapshotKey};
use crate::selector::Selection;

/// Migrated snapshots that share storage and are serialized together.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MigrationGroup {
    /// Members in snapshot id order.
    pub members: Vec<SnapshotKey>,
}

impl MigrationGroup {
    /// Variable names of the members.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|k| k.name.as_str())
    }
}

/// One edge to re-execute.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReplayStep {
    /// Edge id in the recording session.
    pub edge: EdgeId,
    /// Code to execute.
    pub source: String,
    /// Versions the edge read.
    pub inputs: Vec<SnapshotKey>,
    /// Versions the edge produced.
    pub outputs: Vec<SnapshotKey>,
    /// Tombstones the edge recorded.
    pub deletes: Vec<SnapshotKey>,
}

/// Edges one recomputed variable needs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReplayTarget {
    /// Recomputed version.
    pub key: SnapshotKey,
    /// Its ancestor edges, ascending.
    pub edges: Vec<EdgeId>,
}

/// Edges to replay, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReplayPlan {
    /// Steps in ascending edge id.
    pub steps: Vec<ReplayStep>,
    /// Per-variable edge sets in key order; their union is the step set.
    pub targets: Vec<ReplayTarget>,
}

impl ReplayPlan {
    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` when nothing needs replaying.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Edges replayed on behalf of `key`, if it is recomputed.
    pub fn edges_for(&self, key: &SnapshotKey) -> Option<&[EdgeId]> {
        self.targets
            .iter()
            .find(|t| t.key == *key)
            .map(|t| t.edges.as_slice())
    }
}

/// Everything a writer needs to persist a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CheckpointPlan {
    /// Strategy that chose the partition.
    pub optimizer: String,
    /// Alias components of the migrate set, ordered by smallest member.
    pub migrate: Vec<MigrationGroup>,
    /// Recomputed snapshots in id order.
    pub recompute: Vec<SnapshotKey>,
    /// Replay steps rebuilding the recompute set.
    pub replay: ReplayPlan,
    /// Host function definitions, executed before any replay step.
    pub definitions: Vec<String>,
}

impl CheckpointPlan {
    /// Translates `selection` into keys and replay steps.
    ///
    /// The plan starts without definitions; see [`Self::with_definitions`].
    pub fn build(graph: &SnapshotGraph, selection: &Selection) -> Result<Self, GraphError> {
        let migrate_pairs = selection
            .overlaps
            .iter()
            .filter(|p| selection.migrate.contains(&p.lo) && selection.migrate.contains(&p.hi))
            .copied();
        let mut groups = AliasGroups::new(selection.migrate.iter().copied(), migrate_pairs);
        let migrate = groups
            .components()
            .into_iter()
            .map(|members| {
                let members = members
                    .into_iter()
                    .map(|id| graph.key(id))
                    .collect::<Result<_, _>>()?;
                Ok(MigrationGroup { members })
            })
            .collect::<Result<_, GraphError>>()?;

        let recompute = selection
            .recompute
            .iter()
            .map(|&id| graph.key(id))
            .collect::<Result<_, _>>()?;

        let mut steps = Vec::with_capacity(selection.edges.len());
        for &edge_id in &selection.edges {
            let edge = graph.edge(edge_id)?;
            steps.push(ReplayStep {
                edge: edge_id,
                source: edge.source.clone(),
                inputs: keys(graph, &edge.inputs)?,
                outputs: keys(graph, &edge.outputs)?,
                deletes: keys(graph, &edge.deletes)?,
            });
        }

        let mut targets = selection
            .recomputation
            .iter()
            .map(|(&id, edges)| {
                Ok(ReplayTarget {
                    key: graph.key(id)?,
                    edges: edges.iter().copied().collect(),
                })
            })
            .collect::<Result<Vec<_>, GraphError>>()?;
        targets.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(Self {
            optimizer: selection.optimizer.clone(),
            migrate,
            recompute,
            replay: ReplayPlan { steps, targets },
            definitions: Vec::new(),
        })
    }

    /// Attaches the host's function definitions.
    pub fn with_definitions(mut self, definitions: Vec<String>) -> Self {
        self.definitions = definitions;
        self
    }

    /// Every migrated key across all groups.
    pub fn migrated_keys(&self) -> impl Iterator<Item = &SnapshotKey> {
        self.migrate.iter().flat_map(|g| g.members.iter())
    }
}

fn keys(
    graph: &SnapshotGraph,
    ids: &BTreeSet<SnapshotId>,
) -> Result<Vec<SnapshotKey>, GraphError> {
    ids.iter().map(|&id| graph.key(id)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::profile::{CostModel, Size};
    use crate::selector::{select_vss, MigrateAllSelector, RecomputeAllSelector};
    use crate::OverlapPair;

    fn graph() -> SnapshotGraph {
        let mut g = SnapshotGraph::new();
        let raw = g.introduce("raw").unwrap();
        g.record_edge("df = parse(raw)", Duration::from_millis(4), &[raw], &["df"], &[])
            .unwrap();
        let df = g.active_snapshot("df").unwrap();
        g.record_edge("head = df[:5]", Duration::from_millis(1), &[df], &["head"], &[])
            .unwrap();
        for id in g.active_snapshots() {
            g.set_size(id, Size::Bytes(64)).unwrap();
        }
        g
    }

    #[test]
    fn migrate_groups_follow_overlaps() {
        let g = graph();
        let df = g.active_snapshot("df").unwrap();
        let head = g.active_snapshot("head").unwrap();
        let pairs = [OverlapPair::new(df, head).unwrap()];
        let sel = select_vss(
            &g,
            &g.active_snapshots(),
            &pairs,
            &CostModel::default(),
            &MigrateAllSelector,
        )
        .unwrap();
        let plan = CheckpointPlan::build(&g, &sel).unwrap();
        assert_eq!(plan.optimizer, "migrate_all");
        assert_eq!(plan.migrate.len(), 2);
        assert_eq!(
            plan.migrate[0].names().collect::<Vec<_>>(),
            vec!["raw"]
        );
        assert_eq!(
            plan.migrate[1].names().collect::<Vec<_>>(),
            vec!["df", "head"]
        );
        assert!(plan.recompute.is_empty());
        assert!(plan.replay.is_empty());
        assert_eq!(plan.migrated_keys().count(), 3);
    }

    #[test]
    fn replay_steps_carry_sources_and_keys() {
        let g = graph();
        let sel = select_vss(
            &g,
            &g.active_snapshots(),
            &[],
            &CostModel::default(),
            &RecomputeAllSelector,
        )
        .unwrap();
        let plan = CheckpointPlan::build(&g, &sel).unwrap();
        assert_eq!(
            plan.recompute,
            vec![SnapshotKey::new("df", 0), SnapshotKey::new("head", 0)]
        );
        assert_eq!(plan.migrate.len(), 1);
        let sources: Vec<_> = plan.replay.steps.iter().map(|s| s.source.as_str()).collect();
        assert_eq!(sources, vec!["df = parse(raw)", "head = df[:5]"]);
        assert_eq!(plan.replay.steps[0].inputs, vec![SnapshotKey::new("raw", 0)]);
        assert_eq!(plan.replay.steps[1].outputs, vec![SnapshotKey::new("head", 0)]);
    }

    #[test]
    fn targets_name_each_variables_edges() {
        let g = graph();
        let sel = select_vss(
            &g,
            &g.active_snapshots(),
            &[],
            &CostModel::default(),
            &RecomputeAllSelector,
        )
        .unwrap();
        let plan = CheckpointPlan::build(&g, &sel).unwrap();
        let parse = plan.replay.steps[0].edge;
        let slice = plan.replay.steps[1].edge;
        assert_eq!(
            plan.replay.edges_for(&SnapshotKey::new("df", 0)),
            Some(&[parse][..])
        );
        assert_eq!(
            plan.replay.edges_for(&SnapshotKey::new("head", 0)),
            Some(&[slice][..])
        );
        assert_eq!(plan.replay.edges_for(&SnapshotKey::new("raw", 0)), None);
        assert!(plan.definitions.is_empty());

        let plan = plan.with_definitions(vec!["def parse(x): ...".to_owned()]);
        assert_eq!(plan.definitions.len(), 1);
    }
}
