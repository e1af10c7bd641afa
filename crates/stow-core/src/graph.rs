// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot graph: variable versions, compute edges and their history.
//!
//! The graph is append-only. Executing a unit of code appends one
//! [`ComputeEdge`] and one [`VariableSnapshot`] per written name; removing a
//! variable appends a tombstone version. The only field that changes after
//! creation is a snapshot's `size`, filled in by the cost profiler at
//! checkpoint time.
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use thiserror::Error;

use crate::ident::{EdgeId, SnapshotId, SnapshotKey};
use crate::profile::Size;

/// Errors raised by graph construction and queries.
///
/// Query errors signal a caller precondition violation (an id that was not
/// issued by this graph); the graph itself is internally consistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The snapshot id was not issued by this graph.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),
    /// The edge id was not issued by this graph.
    #[error("edge not found: {0}")]
    EdgeNotFound(EdgeId),
    /// No active snapshot exists for the named variable.
    #[error("variable not found: {0}")]
    VariableNotFound(String),
    /// An edge tried to read a deletion tombstone.
    #[error("cannot read deleted snapshot {0}")]
    ReadsTombstone(SnapshotKey),
    /// An edge listed the same name as both written and deleted.
    #[error("variable {0} is both written and deleted by one edge")]
    WriteDeleteConflict(String),
    /// More than `u32::MAX` snapshots or edges.
    #[error("graph capacity exceeded")]
    CapacityExceeded,
}

/// One version of one named variable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VariableSnapshot {
    /// Variable name.
    pub name: String,
    /// Version number, monotonic per name from 0.
    pub version: u32,
    /// `true` for a tombstone recording that the name left scope.
    pub deleted: bool,
    /// Edge that produced this version; `None` for injected variables.
    ///
    /// For tombstones this is the edge that removed the name.
    pub producing_edge: Option<EdgeId>,
    /// Profiled size; `None` until the cost profiler has run.
    pub size: Option<Size>,
}

impl VariableSnapshot {
    /// Graph-independent `(name, version)` identity.
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.name.clone(), self.version)
    }
}

/// One executed unit of code (e.g. one notebook cell).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComputeEdge {
    /// Sequence position.
    pub id: EdgeId,
    /// Measured wall-clock cost of running the code.
    pub runtime: Duration,
    /// Snapshots read by the code.
    pub inputs: BTreeSet<SnapshotId>,
    /// Value snapshots produced by the code (tombstones excluded).
    pub outputs: BTreeSet<SnapshotId>,
    /// Tombstones recorded by the code.
    pub deletes: BTreeSet<SnapshotId>,
    /// Source text needed to replay the edge.
    pub source: String,
}

/// Append-only dependency graph over variable snapshots and compute edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotGraph {
    snapshots: Vec<VariableSnapshot>,
    edges: Vec<ComputeEdge>,
    /// Version history per name, oldest first.
    by_name: BTreeMap<String, Vec<SnapshotId>>,
}

impl SnapshotGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots (all versions, tombstones included).
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Number of recorded edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Records a variable injected from outside any compute edge.
    ///
    /// The new version has no producing edge, so it can only be checkpointed
    /// by migration.
    pub fn introduce(&mut self, name: &str) -> Result<SnapshotId, GraphError> {
        self.push_snapshot(name, None, false)
    }

    /// Records one executed unit of code.
    ///
    /// `reads` must be ids already issued by this graph. Every name in
    /// `writes` gets a new version produced by the edge; every name in
    /// `deletes` gets a tombstone.
    pub fn record_edge(
        &mut self,
        source: impl Into<String>,
        runtime: Duration,
        reads: &[SnapshotId],
        writes: &[&str],
        deletes: &[&str],
    ) -> Result<EdgeId, GraphError> {
        let writes: BTreeSet<&str> = writes.iter().copied().collect();
        let deletes: BTreeSet<&str> = deletes.iter().copied().collect();
        if let Some(name) = writes.intersection(&deletes).next() {
            return Err(GraphError::WriteDeleteConflict((*name).to_owned()));
        }
        let mut inputs = BTreeSet::new();
        for &id in reads {
            let snapshot = self.snapshot(id)?;
            if snapshot.deleted {
                return Err(GraphError::ReadsTombstone(snapshot.key()));
            }
            inputs.insert(id);
        }
        for name in &deletes {
            if self.active_snapshot(name).is_none() {
                return Err(GraphError::VariableNotFound((*name).to_owned()));
            }
        }

        let id = EdgeId(u32::try_from(self.edges.len()).map_err(|_| GraphError::CapacityExceeded)?);
        let mut outputs = BTreeSet::new();
        for name in writes {
            outputs.insert(self.push_snapshot(name, Some(id), false)?);
        }
        let mut tombstones = BTreeSet::new();
        for name in deletes {
            tombstones.insert(self.push_snapshot(name, Some(id), true)?);
        }
        self.edges.push(ComputeEdge {
            id,
            runtime,
            inputs,
            outputs,
            deletes: tombstones,
            source: source.into(),
        });
        Ok(id)
    }

    fn push_snapshot(
        &mut self,
        name: &str,
        producing_edge: Option<EdgeId>,
        deleted: bool,
    ) -> Result<SnapshotId, GraphError> {
        let id = SnapshotId(
            u32::try_from(self.snapshots.len()).map_err(|_| GraphError::CapacityExceeded)?,
        );
        let history = self.by_name.entry(name.to_owned()).or_default();
        let version = u32::try_from(history.len()).map_err(|_| GraphError::CapacityExceeded)?;
        history.push(id);
        self.snapshots.push(VariableSnapshot {
            name: name.to_owned(),
            version,
            deleted,
            producing_edge,
            size: None,
        });
        Ok(id)
    }

    /// Returns the snapshot for `id`.
    pub fn snapshot(&self, id: SnapshotId) -> Result<&VariableSnapshot, GraphError> {
        self.snapshots
            .get(id.index())
            .ok_or(GraphError::SnapshotNotFound(id))
    }

    /// Returns the edge for `id`.
    pub fn edge(&self, id: EdgeId) -> Result<&ComputeEdge, GraphError> {
        self.edges.get(id.index()).ok_or(GraphError::EdgeNotFound(id))
    }

    /// Iterates over all edges in execution order.
    pub fn iter_edges(&self) -> impl Iterator<Item = &ComputeEdge> {
        self.edges.iter()
    }

    /// `(name, version)` identity of `id`.
    pub fn key(&self, id: SnapshotId) -> Result<SnapshotKey, GraphError> {
        self.snapshot(id).map(VariableSnapshot::key)
    }

    /// Version history of `name`, oldest first. Empty for unknown names.
    pub fn versions(&self, name: &str) -> &[SnapshotId] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// The active snapshot of `name`: its newest version unless that version
    /// is a tombstone.
    pub fn active_snapshot(&self, name: &str) -> Option<SnapshotId> {
        let latest = *self.versions(name).last()?;
        let deleted = self.snapshots.get(latest.index()).is_none_or(|s| s.deleted);
        (!deleted).then_some(latest)
    }

    /// Returns `true` if `id` is the active snapshot of its name.
    pub fn is_active(&self, id: SnapshotId) -> Result<bool, GraphError> {
        let snapshot = self.snapshot(id)?;
        Ok(self.active_snapshot(&snapshot.name) == Some(id))
    }

    /// Active snapshots of every tracked name, in id order.
    pub fn active_snapshots(&self) -> BTreeSet<SnapshotId> {
        self.by_name
            .keys()
            .filter_map(|name| self.active_snapshot(name))
            .collect()
    }

    /// Edge that produced `id`, if any.
    pub fn producing_edge(&self, id: SnapshotId) -> Result<Option<EdgeId>, GraphError> {
        Ok(self.snapshot(id)?.producing_edge)
    }

    /// Minimal set of edges to replay to reproduce `id`.
    ///
    /// The walk starts at the producing edge and follows every input that is
    /// not an active snapshot; active inputs are available at restore time
    /// (migrated, or recomputed through their own ancestors). Replaying the
    /// result in ascending [`EdgeId`] order is valid.
    ///
    /// Returns `Ok(None)` when `id` cannot be recomputed: it has no producing
    /// edge, or the walk reaches an overwritten version that was injected
    /// from outside.
    pub fn ancestors(&self, id: SnapshotId) -> Result<Option<BTreeSet<EdgeId>>, GraphError> {
        let Some(start) = self.producing_edge(id)? else {
            return Ok(None);
        };
        let mut visited = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(edge_id) = stack.pop() {
            if !visited.insert(edge_id) {
                continue;
            }
            for &input in &self.edge(edge_id)?.inputs {
                if self.is_active(input)? {
                    continue;
                }
                match self.producing_edge(input)? {
                    Some(parent) => stack.push(parent),
                    None => return Ok(None),
                }
            }
        }
        Ok(Some(visited))
    }

    /// Records the profiled size of `id`.
    pub fn set_size(&mut self, id: SnapshotId, size: Size) -> Result<(), GraphError> {
        let snapshot = self
            .snapshots
            .get_mut(id.index())
            .ok_or(GraphError::SnapshotNotFound(id))?;
        snapshot.size = Some(size);
        Ok(())
    }

    /// Forgets the profiled size of `id`, leaving it unsized.
    pub fn clear_size(&mut self, id: SnapshotId) -> Result<(), GraphError> {
        self.snapshots
            .get_mut(id.index())
            .ok_or(GraphError::SnapshotNotFound(id))?
            .size = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn active_is_latest_non_deleted_version() {
        let mut g = SnapshotGraph::new();
        g.record_edge("x = 1", ms(1), &[], &["x"], &[]).unwrap();
        let x0 = g.active_snapshot("x").unwrap();
        g.record_edge("x += 1", ms(1), &[x0], &["x"], &[]).unwrap();
        let x1 = g.active_snapshot("x").unwrap();
        assert_ne!(x0, x1);
        assert_eq!(g.snapshot(x1).unwrap().version, 1);
        assert!(!g.is_active(x0).unwrap());

        let del = g.record_edge("del x", ms(1), &[], &[], &["x"]).unwrap();
        assert_eq!(g.active_snapshot("x"), None);
        assert_eq!(g.edge(del).unwrap().deletes.len(), 1);
        assert!(g.active_snapshots().is_empty());
        assert_eq!(g.versions("x").len(), 3);
    }

    #[test]
    fn active_snapshots_cover_every_live_name() {
        let mut g = SnapshotGraph::new();
        let a = g.introduce("a").unwrap();
        let e = g.record_edge("b = a * 2", ms(5), &[a], &["b", "c"], &[]).unwrap();
        let active = g.active_snapshots();
        assert_eq!(active.len(), 3);
        assert_eq!(g.edge(e).unwrap().outputs.len(), 2);
        assert_eq!(g.producing_edge(a).unwrap(), None);
    }

    #[test]
    fn ancestors_stop_at_active_inputs() {
        let mut g = SnapshotGraph::new();
        let e0 = g.record_edge("a = load()", ms(10), &[], &["a"], &[]).unwrap();
        let a = g.active_snapshot("a").unwrap();
        let e1 = g.record_edge("b = f(a)", ms(3), &[a], &["b"], &[]).unwrap();
        let b = g.active_snapshot("b").unwrap();
        assert_eq!(g.ancestors(b).unwrap(), Some(BTreeSet::from([e1])));
        assert_eq!(g.ancestors(a).unwrap(), Some(BTreeSet::from([e0])));
    }

    #[test]
    fn ancestors_follow_overwritten_versions() {
        let mut g = SnapshotGraph::new();
        let e0 = g.record_edge("a = 1", ms(1), &[], &["a"], &[]).unwrap();
        let a0 = g.active_snapshot("a").unwrap();
        let e1 = g.record_edge("b = a + 1", ms(1), &[a0], &["b"], &[]).unwrap();
        g.record_edge("a = 5", ms(1), &[], &["a"], &[]).unwrap();
        let b = g.active_snapshot("b").unwrap();
        // a@v0 is no longer active, so replaying b needs the edge that made it.
        assert_eq!(g.ancestors(b).unwrap(), Some(BTreeSet::from([e0, e1])));
    }

    #[test]
    fn ancestors_through_overwritten_injected_variable_are_unavailable() {
        let mut g = SnapshotGraph::new();
        let x0 = g.introduce("x").unwrap();
        g.record_edge("y = x", ms(1), &[x0], &["y"], &[]).unwrap();
        g.introduce("x").unwrap();
        let y = g.active_snapshot("y").unwrap();
        assert_eq!(g.ancestors(y).unwrap(), None);
        assert_eq!(g.ancestors(g.active_snapshot("x").unwrap()).unwrap(), None);
    }

    #[test]
    fn construction_errors() {
        let mut g = SnapshotGraph::new();
        assert_eq!(
            g.record_edge("x", ms(1), &[SnapshotId(9)], &[], &[]),
            Err(GraphError::SnapshotNotFound(SnapshotId(9)))
        );
        assert_eq!(
            g.record_edge("x", ms(1), &[], &["x"], &["x"]),
            Err(GraphError::WriteDeleteConflict("x".into()))
        );
        assert_eq!(
            g.record_edge("del y", ms(1), &[], &[], &["y"]),
            Err(GraphError::VariableNotFound("y".into()))
        );
        g.introduce("z").unwrap();
        g.record_edge("del z", ms(1), &[], &[], &["z"]).unwrap();
        let tomb = *g.versions("z").last().unwrap();
        assert_eq!(
            g.record_edge("z", ms(1), &[tomb], &[], &[]),
            Err(GraphError::ReadsTombstone(SnapshotKey::new("z", 1)))
        );
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn set_size_touches_only_size() {
        let mut g = SnapshotGraph::new();
        let a = g.introduce("a").unwrap();
        let before = g.snapshot(a).unwrap().clone();
        g.set_size(a, Size::Bytes(64)).unwrap();
        let after = g.snapshot(a).unwrap();
        assert_eq!(after.size, Some(Size::Bytes(64)));
        assert_eq!(after.name, before.name);
        assert_eq!(after.version, before.version);
        assert_eq!(
            g.set_size(SnapshotId(7), Size::Unmigratable),
            Err(GraphError::SnapshotNotFound(SnapshotId(7)))
        );
        g.clear_size(a).unwrap();
        assert_eq!(g.snapshot(a).unwrap().size, None);
        assert_eq!(
            g.clear_size(SnapshotId(7)),
            Err(GraphError::SnapshotNotFound(SnapshotId(7)))
        );
    }
}
