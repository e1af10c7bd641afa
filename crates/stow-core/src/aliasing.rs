// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Aliasing resolver: which active snapshots share mutable storage.
//!
//! Overlap is detected pairwise from fingerprint regions and then closed into
//! connected components with a union-find. The optimizer treats each
//! component as a single unit, so no partition can split an aliased pair.
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use crate::fingerprint::FingerprintTable;
use crate::graph::{GraphError, SnapshotGraph};
use crate::ident::SnapshotId;

/// Unordered pair of overlapping snapshots, stored with `lo < hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OverlapPair {
    /// Smaller id.
    pub lo: SnapshotId,
    /// Larger id.
    pub hi: SnapshotId,
}

impl OverlapPair {
    /// Normalises `(a, b)` into `lo < hi`. Returns `None` when `a == b`.
    pub fn new(a: SnapshotId, b: SnapshotId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { lo: a, hi: b }),
            std::cmp::Ordering::Greater => Some(Self { lo: b, hi: a }),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Finds every pair of distinct active snapshots whose fingerprints overlap.
///
/// Quadratic in the active-set size. Names absent from `fingerprints` cannot
/// be proven to overlap or not and are left out. Pairs come back sorted.
#[instrument(skip_all, fields(active = active.len()))]
pub fn resolve_overlaps(
    graph: &SnapshotGraph,
    active: &BTreeSet<SnapshotId>,
    fingerprints: &FingerprintTable,
) -> Result<Vec<OverlapPair>, GraphError> {
    let mut tracked = Vec::with_capacity(active.len());
    for &id in active {
        let name = &graph.snapshot(id)?.name;
        if let Some(fp) = fingerprints.get(name) {
            tracked.push((id, name, fp));
        }
    }

    let mut pairs = Vec::new();
    for (i, (a, a_name, a_fp)) in tracked.iter().enumerate() {
        for (b, b_name, b_fp) in &tracked[i + 1..] {
            if a_fp.overlaps(b_fp) {
                debug!(a = %a_name, b = %b_name, "overlapping storage");
                if let Some(pair) = OverlapPair::new(*a, *b) {
                    pairs.push(pair);
                }
            }
        }
    }
    pairs.sort_unstable();
    Ok(pairs)
}

/// Union-find over snapshot ids.
///
/// Roots are always the smallest id of their component, so component order and
/// representatives are deterministic.
#[derive(Debug, Clone, Default)]
pub struct AliasGroups {
    parent: BTreeMap<SnapshotId, SnapshotId>,
}

impl AliasGroups {
    /// Builds components over `members` joined by `pairs`.
    ///
    /// Pair members outside `members` are added as well.
    pub fn new(
        members: impl IntoIterator<Item = SnapshotId>,
        pairs: impl IntoIterator<Item = OverlapPair>,
    ) -> Self {
        let mut groups = Self {
            parent: members.into_iter().map(|id| (id, id)).collect(),
        };
        for pair in pairs {
            groups.union(pair.lo, pair.hi);
        }
        groups
    }

    /// Representative (smallest member) of `id`'s component.
    pub fn find(&mut self, id: SnapshotId) -> SnapshotId {
        let mut root = id;
        loop {
            let parent = *self.parent.entry(root).or_insert(root);
            if parent == root {
                break;
            }
            root = parent;
        }
        // Path compression.
        let mut cursor = id;
        while cursor != root {
            let next = self.parent.insert(cursor, root).unwrap_or(root);
            cursor = next;
        }
        root
    }

    /// Merges the components of `a` and `b`.
    pub fn union(&mut self, a: SnapshotId, b: SnapshotId) {
        let ra = self.find(a);
        let rb = self.find(b);
        match ra.cmp(&rb) {
            std::cmp::Ordering::Less => {
                self.parent.insert(rb, ra);
            }
            std::cmp::Ordering::Greater => {
                self.parent.insert(ra, rb);
            }
            std::cmp::Ordering::Equal => {}
        }
    }

    /// Returns `true` if `a` and `b` are in the same component.
    pub fn same(&mut self, a: SnapshotId, b: SnapshotId) -> bool {
        self.find(a) == self.find(b)
    }

    /// All components, ordered by their smallest member.
    pub fn components(&mut self) -> Vec<BTreeSet<SnapshotId>> {
        let ids: Vec<SnapshotId> = self.parent.keys().copied().collect();
        let mut by_root: BTreeMap<SnapshotId, BTreeSet<SnapshotId>> = BTreeMap::new();
        for id in ids {
            let root = self.find(id);
            by_root.entry(root).or_default().insert(id);
        }
        by_root.into_values().collect()
    }
}
