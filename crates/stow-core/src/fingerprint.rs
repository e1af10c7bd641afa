// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-variable fingerprints supplied by the host's identity tracker.
use std::collections::{BTreeMap, BTreeSet};

use crate::ident::RegionId;

/// Identity and storage signature of one live variable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fingerprint {
    /// Opaque identity token (e.g. an object address or content hash).
    pub identity: u64,
    /// Storage regions the value's memory overlaps.
    pub regions: BTreeSet<RegionId>,
    /// `true` when the tracker found the value cannot be serialized.
    pub unserializable: bool,
    /// Module or type tag of the value's runtime type, if known.
    pub type_tag: Option<String>,
}

impl Fingerprint {
    /// A serializable fingerprint with no storage regions.
    pub fn new(identity: u64) -> Self {
        Self {
            identity,
            ..Self::default()
        }
    }

    /// Adds storage regions.
    pub fn with_regions(mut self, regions: impl IntoIterator<Item = u64>) -> Self {
        self.regions.extend(regions.into_iter().map(RegionId));
        self
    }

    /// Sets the module/type tag.
    pub fn with_type_tag(mut self, tag: impl Into<String>) -> Self {
        self.type_tag = Some(tag.into());
        self
    }

    /// Marks the value as unserializable.
    pub fn unserializable(mut self) -> Self {
        self.unserializable = true;
        self
    }

    /// Two fingerprints overlap iff their region sets intersect.
    pub fn overlaps(&self, other: &Self) -> bool {
        !self.regions.is_disjoint(&other.regions)
    }
}

/// Fingerprints keyed by variable name.
pub type FingerprintTable = BTreeMap<String, Fingerprint>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_region_intersection() {
        let a = Fingerprint::new(1).with_regions([10, 11]);
        let b = Fingerprint::new(2).with_regions([11, 12]);
        let c = Fingerprint::new(3).with_regions([12]);
        let empty = Fingerprint::new(4);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(b.overlaps(&c));
        // Raw overlap is not transitive.
        assert!(!a.overlaps(&c));
        assert!(!empty.overlaps(&a));
        assert!(!empty.overlaps(&empty));
    }
}
