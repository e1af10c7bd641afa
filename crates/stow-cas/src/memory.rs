// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory blob tier.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{blob_hash, BlobError, BlobHash};

/// Blobs of one artifact, keyed and ordered by hash.
///
/// The writer fills one tier per checkpoint; the reader fills one per
/// artifact it decodes. Lookups of absent hashes return `None`; errors are
/// reserved for integrity failures.
#[derive(Debug, Default)]
pub struct MemoryTier {
    blobs: BTreeMap<BlobHash, Arc<[u8]>>,
    byte_count: usize,
    dedup_hits: usize,
}

impl MemoryTier {
    /// Empty tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct blobs held.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// `true` when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Bytes across distinct blobs.
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Inserts whose bytes were already present.
    pub fn dedup_hits(&self) -> usize {
        self.dedup_hits
    }

    /// Held hashes, ascending.
    pub fn sorted_hashes(&self) -> Vec<BlobHash> {
        self.blobs.keys().copied().collect()
    }

    /// Hashes and stores `bytes`, returning the hash.
    pub fn insert(&mut self, bytes: &[u8]) -> BlobHash {
        let hash = blob_hash(bytes);
        self.store(hash, bytes);
        hash
    }

    /// Stores `bytes` under `declared` after checking the hash.
    ///
    /// # Errors
    ///
    /// [`BlobError::Corrupt`] when `BLAKE3(bytes) != declared`; the tier is
    /// left unchanged.
    pub fn insert_verified(&mut self, declared: BlobHash, bytes: &[u8]) -> Result<(), BlobError> {
        let actual = blob_hash(bytes);
        if actual != declared {
            return Err(BlobError::Corrupt { declared, actual });
        }
        self.store(actual, bytes);
        Ok(())
    }

    /// Bytes stored under `hash`.
    pub fn get(&self, hash: &BlobHash) -> Option<Arc<[u8]>> {
        self.blobs.get(hash).cloned()
    }

    /// Whether `hash` is held.
    pub fn contains(&self, hash: &BlobHash) -> bool {
        self.blobs.contains_key(hash)
    }

    fn store(&mut self, hash: BlobHash, bytes: &[u8]) {
        if self.blobs.contains_key(&hash) {
            self.dedup_hits += 1;
            return;
        }
        self.byte_count += bytes.len();
        self.blobs.insert(hash, Arc::from(bytes));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        let mut tier = MemoryTier::new();
        let hash = tier.insert(b"group:df,view");
        assert_eq!(&*tier.get(&hash).unwrap(), b"group:df,view");
        assert!(tier.get(&BlobHash([0xBB; 32])).is_none());
        assert!(!tier.contains(&BlobHash([0xBB; 32])));
    }

    #[test]
    fn corrupt_blob_is_rejected_without_side_effects() {
        let mut tier = MemoryTier::new();
        let declared = BlobHash([0xFF; 32]);
        let err = tier.insert_verified(declared, b"tampered").unwrap_err();
        assert_eq!(
            err,
            BlobError::Corrupt {
                declared,
                actual: blob_hash(b"tampered"),
            }
        );
        assert!(tier.is_empty());
        assert_eq!(tier.byte_count(), 0);

        let good = blob_hash(b"ok");
        tier.insert_verified(good, b"ok").unwrap();
        assert!(tier.contains(&good));
    }

    #[test]
    fn identical_groups_share_one_blob() {
        let mut tier = MemoryTier::new();
        let a = tier.insert(b"same encoding");
        let b = tier.insert(b"same encoding");
        assert_eq!(a, b);
        assert_eq!(tier.len(), 1);
        assert_eq!(tier.byte_count(), 13);
        assert_eq!(tier.dedup_hits(), 1);
    }

    #[test]
    fn hash_order_ignores_insertion_order() {
        let mut fwd = MemoryTier::new();
        let mut rev = MemoryTier::new();
        for blob in [&b"x"[..], b"y", b"z"] {
            fwd.insert(blob);
        }
        for blob in [&b"z"[..], b"y", b"x"] {
            rev.insert(blob);
        }
        let sorted = fwd.sorted_hashes();
        assert_eq!(sorted, rev.sorted_hashes());
        assert!(sorted.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn hashes_render_as_hex() {
        let hash = BlobHash([0xAB; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
        assert_eq!(hash.short(), "abababab");
    }
}
