// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cost profiler: sizes active snapshots and prices migration vs replay.
//!
//! Sizes are recorded on the graph ([`SnapshotGraph::set_size`]). The
//! [`CostModel`] converts both sides of the trade-off to nanoseconds: bytes at
//! the configured migration bandwidth, and measured edge runtimes as-is.
use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::fingerprint::FingerprintTable;
use crate::graph::{GraphError, SnapshotGraph};
use crate::ident::SnapshotId;
use crate::session::SessionState;

/// Default migration bandwidth: 100 MiB/s.
pub const DEFAULT_BANDWIDTH_BYTES_PER_SEC: u64 = 100 * 1024 * 1024;

/// Profiled size of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Size {
    /// In-memory footprint in bytes.
    Bytes(u64),
    /// Cannot be serialized; never selected for migration.
    Unmigratable,
}

impl Size {
    /// Byte count, or `None` for [`Size::Unmigratable`].
    pub fn bytes(self) -> Option<u64> {
        match self {
            Self::Bytes(n) => Some(n),
            Self::Unmigratable => None,
        }
    }
}

/// The host's size-profiling routine.
///
/// Must terminate and must not mutate `value`.
pub trait SizeProfiler<V: ?Sized> {
    /// Measured in-memory footprint of `value` in bytes.
    fn measure_size(&self, value: &V) -> u64;
}

impl<V: ?Sized, F> SizeProfiler<V> for F
where
    F: Fn(&V) -> u64,
{
    fn measure_size(&self, value: &V) -> u64 {
        self(value)
    }
}

/// Type tags whose values are never migrated (native handles, live plots,
/// and similar objects that do not survive serialization).
///
/// A tag is denied when it contains any pattern as a substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDenylist {
    patterns: Vec<String>,
}

impl TypeDenylist {
    /// Patterns used when no configuration overrides them.
    pub const DEFAULT_PATTERNS: [&'static str; 2] = ["dataprep.eda", "bokeh"];

    /// Builds a denylist from substring patterns.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// A denylist that denies nothing.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Returns `true` if `tag` matches any pattern.
    pub fn is_denied(&self, tag: &str) -> bool {
        self.patterns.iter().any(|p| tag.contains(p.as_str()))
    }
}

impl Default for TypeDenylist {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATTERNS)
    }
}

/// Outcome of one profiling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileReport {
    /// Snapshots assigned a byte size.
    pub sized: Vec<SnapshotId>,
    /// Snapshots marked [`Size::Unmigratable`].
    pub unmigratable: Vec<SnapshotId>,
    /// Snapshots skipped for missing metadata (no fingerprint or no live
    /// value). Their size stays unset, which the optimizer treats as
    /// unmigratable.
    pub missing: Vec<SnapshotId>,
    /// Sum of all measured byte sizes.
    pub total_bytes: u64,
}

/// Assigns a [`Size`] to every snapshot in `active`.
///
/// Missing metadata is recovered locally: the snapshot is logged, listed in
/// [`ProfileReport::missing`] and unsized, discarding any size an earlier
/// pass recorded for it.
#[instrument(skip_all, fields(active = active.len()))]
pub fn profile_active<S, P>(
    graph: &mut SnapshotGraph,
    active: &BTreeSet<SnapshotId>,
    session: &S,
    fingerprints: &FingerprintTable,
    denylist: &TypeDenylist,
    profiler: &P,
) -> Result<ProfileReport, GraphError>
where
    S: SessionState,
    P: SizeProfiler<S::Value> + ?Sized,
{
    let mut report = ProfileReport::default();
    for &id in active {
        let name = graph.snapshot(id)?.name.clone();
        let Some(fingerprint) = fingerprints.get(&name) else {
            warn!(variable = %name, "variable missing from fingerprint table; skipping");
            graph.clear_size(id)?;
            report.missing.push(id);
            continue;
        };

        let denied_tag = fingerprint
            .type_tag
            .as_deref()
            .filter(|tag| denylist.is_denied(tag));
        if fingerprint.unserializable || denied_tag.is_some() {
            debug!(variable = %name, tag = ?denied_tag, "unmigratable");
            graph.set_size(id, Size::Unmigratable)?;
            report.unmigratable.push(id);
            continue;
        }

        let Some(value) = session.get_variable_value(&name) else {
            warn!(variable = %name, "variable has no live value in the session; skipping");
            graph.clear_size(id)?;
            report.missing.push(id);
            continue;
        };
        let bytes = profiler.measure_size(value);
        debug!(variable = %name, bytes, "sized");
        graph.set_size(id, Size::Bytes(bytes))?;
        report.total_bytes = report.total_bytes.saturating_add(bytes);
        report.sized.push(id);
    }
    Ok(report)
}

/// Converts sizes and runtimes into comparable nanosecond costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostModel {
    bandwidth_bytes_per_sec: u64,
}

impl CostModel {
    /// Cost model migrating at `bandwidth_bytes_per_sec` (clamped to at least 1).
    pub fn new(bandwidth_bytes_per_sec: u64) -> Self {
        Self {
            bandwidth_bytes_per_sec: bandwidth_bytes_per_sec.max(1),
        }
    }

    /// Configured migration bandwidth.
    pub fn bandwidth_bytes_per_sec(&self) -> u64 {
        self.bandwidth_bytes_per_sec
    }

    /// Nanoseconds to migrate a snapshot of `size`, rounded up.
    ///
    /// `None` for unsized or unmigratable snapshots.
    pub fn migrate_cost(&self, size: Option<Size>) -> Option<u64> {
        let bytes = u128::from(size?.bytes()?);
        let bw = u128::from(self.bandwidth_bytes_per_sec);
        let nanos = (bytes * 1_000_000_000).div_ceil(bw);
        Some(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Nanoseconds to replay an edge that ran for `runtime`.
    pub fn recompute_cost(&self, runtime: Duration) -> u64 {
        u64::try_from(runtime.as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new(DEFAULT_BANDWIDTH_BYTES_PER_SEC)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::fingerprint::Fingerprint;

    struct Values(BTreeMap<String, Vec<u8>>);

    impl SessionState for Values {
        type Value = Vec<u8>;

        fn get_variable_value(&self, name: &str) -> Option<&Vec<u8>> {
            self.0.get(name)
        }
    }

    fn len_profiler(v: &Vec<u8>) -> u64 {
        v.len() as u64
    }

    #[test]
    fn sizes_unmigratable_and_missing() {
        let mut graph = SnapshotGraph::new();
        let ok = graph.introduce("ok").unwrap();
        let native = graph.introduce("native").unwrap();
        let plot = graph.introduce("plot").unwrap();
        let ghost = graph.introduce("ghost").unwrap();
        let unbound = graph.introduce("unbound").unwrap();

        let session = Values(BTreeMap::from([
            ("ok".to_owned(), vec![0u8; 40]),
            ("native".to_owned(), vec![0u8; 8]),
            ("plot".to_owned(), vec![0u8; 8]),
        ]));
        let fingerprints = FingerprintTable::from([
            ("ok".to_owned(), Fingerprint::new(1)),
            ("native".to_owned(), Fingerprint::new(2).unserializable()),
            (
                "plot".to_owned(),
                Fingerprint::new(3).with_type_tag("bokeh.plotting.figure"),
            ),
            ("unbound".to_owned(), Fingerprint::new(4)),
        ]);

        let active = graph.active_snapshots();
        let report = profile_active(
            &mut graph,
            &active,
            &session,
            &fingerprints,
            &TypeDenylist::default(),
            &len_profiler,
        )
        .unwrap();

        assert_eq!(report.sized, vec![ok]);
        assert_eq!(report.unmigratable, vec![native, plot]);
        assert_eq!(report.missing, vec![ghost, unbound]);
        assert_eq!(report.total_bytes, 40);
        assert_eq!(graph.snapshot(ok).unwrap().size, Some(Size::Bytes(40)));
        assert_eq!(graph.snapshot(native).unwrap().size, Some(Size::Unmigratable));
        assert_eq!(graph.snapshot(ghost).unwrap().size, None);
    }

    #[test]
    fn denylist_matches_substrings() {
        let list = TypeDenylist::default();
        assert!(list.is_denied("dataprep.eda.report"));
        assert!(list.is_denied("bokeh"));
        assert!(!list.is_denied("numpy"));
        assert!(!TypeDenylist::empty().is_denied("bokeh"));
    }

    #[test]
    fn cost_model_rounds_up_and_rejects_unmigratable() {
        let model = CostModel::new(1_000);
        assert_eq!(model.migrate_cost(Some(Size::Bytes(1))), Some(1_000_000));
        assert_eq!(model.migrate_cost(Some(Size::Bytes(0))), Some(0));
        assert_eq!(model.migrate_cost(Some(Size::Unmigratable)), None);
        assert_eq!(model.migrate_cost(None), None);
        assert_eq!(model.recompute_cost(Duration::from_millis(3)), 3_000_000);
        assert_eq!(CostModel::new(0).bandwidth_bytes_per_sec(), 1);
        assert_eq!(
            CostModel::new(1).migrate_cost(Some(Size::Bytes(u64::MAX))),
            Some(u64::MAX)
        );
    }
}
