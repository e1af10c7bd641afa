// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types for snapshots, edges and storage regions.
use std::fmt;

/// Arena index of a [`VariableSnapshot`](crate::VariableSnapshot) inside its
/// [`SnapshotGraph`](crate::SnapshotGraph).
///
/// Ids are dense and assigned in creation order, so ordering by id is also
/// ordering by creation time. They are only meaningful within the graph that
/// issued them; artifacts use [`SnapshotKey`] instead.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotId(pub u32);

impl SnapshotId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vs#{}", self.0)
    }
}

/// Sequence position of a [`ComputeEdge`](crate::ComputeEdge).
///
/// Edge ids are dense from zero in execution order; replaying a set of edges in
/// ascending id order is always a valid topological order.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ce#{}", self.0)
    }
}

/// Identifier of a storage region reported by the fingerprint tracker.
///
/// Regions are opaque: two variables share storage iff their region sets
/// intersect.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionId(pub u64);

/// Graph-independent identity of one variable version: `(name, version)`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotKey {
    /// Variable name.
    pub name: String,
    /// Version number (monotonic per name, starting at 0).
    pub version: u32,
}

impl SnapshotKey {
    /// Builds a key from a name and version.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(SnapshotId(3).to_string(), "vs#3");
        assert_eq!(EdgeId(0).to_string(), "ce#0");
        assert_eq!(SnapshotKey::new("df", 2).to_string(), "df@v2");
    }

    #[test]
    fn keys_order_by_name_then_version() {
        let mut keys = vec![
            SnapshotKey::new("b", 0),
            SnapshotKey::new("a", 1),
            SnapshotKey::new("a", 0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                SnapshotKey::new("a", 0),
                SnapshotKey::new("a", 1),
                SnapshotKey::new("b", 0),
            ]
        );
    }
}
