// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Session builder: runs scripted cells and records them in a graph.

use std::time::Duration;

use stow_checkpoint::ReplayEnv;
use stow_core::{EdgeId, Fingerprint, FingerprintTable, SnapshotGraph, SnapshotId, SizeProfiler};

use crate::script::{ScriptError, ScriptedEnv};
use crate::value::SharedValue;

/// Type tag reported for buffers.
pub const BUFFER_TAG: &str = "stow.buffer";
/// Type tag reported for handles.
pub const HANDLE_TAG: &str = "stow.handle";

/// Sizes a [`SharedValue`] as eight bytes per element.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenProfiler;

impl SizeProfiler<SharedValue> for LenProfiler {
    fn measure_size(&self, value: &SharedValue) -> u64 {
        u64::try_from(value.len()).map_or(u64::MAX, |n| n.saturating_mul(8))
    }
}

/// Drives a [`ScriptedEnv`] and keeps a [`SnapshotGraph`] in step with it,
/// the way a notebook kernel hook would.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stow_dry_tests::SessionBuilder;
///
/// let mut s = SessionBuilder::new();
/// s.inject("a", vec![1, 2]).unwrap();
/// s.run("b = scale a 3", Duration::from_millis(5)).unwrap();
/// assert_eq!(s.graph().edge_count(), 1);
/// assert_eq!(s.fingerprints().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder {
    graph: SnapshotGraph,
    env: ScriptedEnv,
}

impl SessionBuilder {
    /// Empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a fresh buffer from outside any cell.
    pub fn inject(&mut self, name: &str, data: Vec<i64>) -> Result<SnapshotId, ScriptError> {
        self.env.insert_buffer(name, data);
        Ok(self.graph.introduce(name)?)
    }

    /// Binds an arbitrary value from outside any cell.
    pub fn inject_value(
        &mut self,
        name: &str,
        value: SharedValue,
    ) -> Result<SnapshotId, ScriptError> {
        self.env.bind(name, value);
        Ok(self.graph.introduce(name)?)
    }

    /// Runs one cell and records it as a compute edge.
    pub fn run(&mut self, source: &str, runtime: Duration) -> Result<EdgeId, ScriptError> {
        let fx = self.env.run(source)?;
        let reads = fx
            .reads
            .iter()
            .map(|name| {
                self.graph
                    .active_snapshot(name)
                    .ok_or_else(|| stow_core::GraphError::VariableNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let writes: Vec<&str> = fx.writes.iter().map(String::as_str).collect();
        let deletes: Vec<&str> = fx.deletes.iter().map(String::as_str).collect();
        Ok(self
            .graph
            .record_edge(source, runtime, &reads, &writes, &deletes)?)
    }

    /// Recorded graph.
    pub fn graph(&self) -> &SnapshotGraph {
        &self.graph
    }

    /// Mutable graph, for profiling.
    pub fn graph_mut(&mut self) -> &mut SnapshotGraph {
        &mut self.graph
    }

    /// Live namespace.
    pub fn env(&self) -> &ScriptedEnv {
        &self.env
    }

    /// Graph and namespace borrowed together.
    pub fn split_mut(&mut self) -> (&mut SnapshotGraph, &ScriptedEnv) {
        (&mut self.graph, &self.env)
    }

    /// Fingerprints for every live name: buffers and handles occupy their
    /// region, handles are unserializable.
    pub fn fingerprints(&self) -> FingerprintTable {
        self.env
            .iter()
            .map(|(name, value)| {
                let fp = Fingerprint::new(value.region()).with_regions([value.region()]);
                let fp = if value.is_handle() {
                    fp.with_type_tag(HANDLE_TAG).unserializable()
                } else {
                    fp.with_type_tag(BUFFER_TAG)
                };
                (name.to_string(), fp)
            })
            .collect()
    }

    /// Consumes the builder.
    pub fn into_parts(self) -> (SnapshotGraph, ScriptedEnv) {
        (self.graph, self.env)
    }
}
