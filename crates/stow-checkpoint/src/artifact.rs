// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Checkpoint artifact format.
//!
//! # Layout
//!
//! ```text
//! +----------------+----------------------------+------------------+
//! | magic (8)      | CBOR body (ciborium)       | BLAKE3 (32)      |
//! | "STOWCKP1"     | Artifact                   | of magic + body  |
//! +----------------+----------------------------+------------------+
//! ```
//!
//! Migrated values are stored once per alias group as a content-addressed
//! blob. Identical group payloads share a blob. Encoding is deterministic:
//! groups, blobs and replay steps are ordered by snapshot id, hash and edge id.
use std::io;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use stow_cas::{BlobError, BlobHash, MemoryTier};
use stow_core::{CheckpointPlan, ReplayPlan, SnapshotKey};
use thiserror::Error;

use crate::codec::CodecError;

/// File magic.
pub const MAGIC: [u8; 8] = *b"STOWCKP1";
/// Current body format version.
pub const FORMAT_VERSION: u32 = 1;
/// Length of the trailing digest.
pub const DIGEST_LEN: usize = 32;

/// Errors raised while writing, reading or verifying an artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// CBOR serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// CBOR body is malformed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// File is too small to hold the magic and digest.
    #[error("artifact too small: {size} bytes, minimum {minimum}")]
    Truncated {
        /// Actual size.
        size: usize,
        /// Minimum size.
        minimum: usize,
    },

    /// Magic bytes don't match.
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    BadMagic {
        /// Expected magic bytes.
        expected: [u8; 8],
        /// Magic bytes found.
        actual: [u8; 8],
    },

    /// Trailing digest does not cover the content.
    #[error("digest mismatch: stored {stored}, computed {computed}")]
    DigestMismatch {
        /// Digest stored in the file (hex).
        stored: String,
        /// Digest of the content (hex).
        computed: String,
    },

    /// Body written by a newer format.
    #[error("unsupported format version {0} (expected {FORMAT_VERSION})")]
    UnsupportedVersion(u32),

    /// A blob's content does not match its hash.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// The value codec failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A migrated variable has no live value in the session.
    #[error("no live value for migrated variable {name}")]
    MissingValue {
        /// Variable name.
        name: String,
    },

    /// A group references a blob that is not in the artifact.
    #[error("group references missing blob {0}")]
    MissingBlob(BlobHash),
}

/// One alias group of migrated variables and the blob holding them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Members in snapshot id order.
    pub members: Vec<SnapshotKey>,
    /// Content hash of the encoded group.
    pub blob: BlobHash,
}

/// One stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    /// BLAKE3 of `bytes`.
    pub hash: BlobHash,
    /// Encoded group payload.
    pub bytes: Bytes,
}

/// Decoded artifact body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Body format version.
    pub format_version: u32,
    /// Strategy that chose the partition.
    pub optimizer: String,
    /// Migrated alias groups.
    pub groups: Vec<GroupEntry>,
    /// Deduplicated blobs, ascending hash.
    pub blobs: Vec<BlobRecord>,
    /// Recomputed variables.
    pub recompute: Vec<SnapshotKey>,
    /// Steps rebuilding the recomputed variables.
    pub replay: ReplayPlan,
    /// Host function definitions, executed before the first step.
    pub definitions: Vec<String>,
}

impl Artifact {
    /// Assembles an artifact from `plan`'s groups and the tier holding their
    /// blobs.
    pub fn assemble(
        plan: &CheckpointPlan,
        groups: Vec<GroupEntry>,
        tier: &MemoryTier,
    ) -> Result<Self, ArtifactError> {
        let blobs = tier
            .sorted_hashes()
            .into_iter()
            .map(|hash| {
                tier.get(&hash)
                    .map(|b| BlobRecord {
                        hash,
                        bytes: Bytes::copy_from_slice(&b),
                    })
                    .ok_or(ArtifactError::MissingBlob(hash))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            optimizer: plan.optimizer.clone(),
            groups,
            blobs,
            recompute: plan.recompute.clone(),
            replay: plan.replay.clone(),
            definitions: plan.definitions.clone(),
        })
    }

    /// Blob bytes for `hash`.
    pub fn blob(&self, hash: &BlobHash) -> Option<&Bytes> {
        self.blobs
            .binary_search_by(|r| r.hash.cmp(hash))
            .ok()
            .map(|i| &self.blobs[i].bytes)
    }

    /// Number of migrated variables across all groups.
    pub fn migrated_count(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }

    /// Serializes to the on-disk layout.
    pub fn encode(&self) -> Result<Vec<u8>, ArtifactError> {
        let mut out = Vec::with_capacity(1024);
        out.extend_from_slice(&MAGIC);
        ciborium::into_writer(self, &mut out).map_err(|e| ArtifactError::Encode(e.to_string()))?;
        let digest = blake3::hash(&out);
        out.extend_from_slice(digest.as_bytes());
        Ok(out)
    }

    /// Parses and fully verifies the on-disk layout.
    ///
    /// Checks size, magic, digest and format version, then re-hashes every
    /// blob and confirms every group's blob is present.
    pub fn decode(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let minimum = MAGIC.len() + DIGEST_LEN;
        if bytes.len() < minimum {
            return Err(ArtifactError::Truncated {
                size: bytes.len(),
                minimum,
            });
        }
        let (content, stored) = bytes.split_at(bytes.len() - DIGEST_LEN);
        let (magic, body) = content.split_at(MAGIC.len());
        if magic != MAGIC {
            let mut actual = [0u8; 8];
            actual.copy_from_slice(magic);
            return Err(ArtifactError::BadMagic {
                expected: MAGIC,
                actual,
            });
        }
        let computed = blake3::hash(content);
        if computed.as_bytes().as_slice() != stored {
            return Err(ArtifactError::DigestMismatch {
                stored: hex::encode(stored),
                computed: computed.to_hex().to_string(),
            });
        }

        let artifact: Self =
            ciborium::from_reader(body).map_err(|e| ArtifactError::Decode(e.to_string()))?;
        if artifact.format_version != FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion(artifact.format_version));
        }

        let mut tier = MemoryTier::new();
        for record in &artifact.blobs {
            tier.insert_verified(record.hash, &record.bytes)?;
        }
        if let Some(missing) = artifact.groups.iter().find(|g| !tier.contains(&g.blob)) {
            return Err(ArtifactError::MissingBlob(missing.blob));
        }
        Ok(artifact)
    }
}

/// Summary of a verified artifact file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    /// Total file size.
    pub size: u64,
    /// Trailing digest (hex).
    pub digest: String,
    /// Body format version.
    pub format_version: u32,
    /// Group count.
    pub groups: usize,
    /// Blob count.
    pub blobs: usize,
    /// Migrated variable count.
    pub migrated: usize,
    /// Recomputed variable count.
    pub recomputed: usize,
    /// Replay step count.
    pub replay_steps: usize,
}

/// Reads and verifies the artifact at `path`.
pub fn read_artifact(path: impl AsRef<Path>) -> Result<Artifact, ArtifactError> {
    let bytes = std::fs::read(path)?;
    Artifact::decode(&bytes)
}

/// Verifies the artifact at `path` and summarizes it.
pub fn verify_artifact(path: impl AsRef<Path>) -> Result<ArtifactSummary, ArtifactError> {
    let bytes = std::fs::read(path)?;
    let artifact = Artifact::decode(&bytes)?;
    Ok(ArtifactSummary {
        size: bytes.len() as u64,
        digest: hex::encode(&bytes[bytes.len() - DIGEST_LEN..]),
        format_version: artifact.format_version,
        groups: artifact.groups.len(),
        blobs: artifact.blobs.len(),
        migrated: artifact.migrated_count(),
        recomputed: artifact.recompute.len(),
        replay_steps: artifact.replay.len(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Artifact {
        let mut tier = MemoryTier::new();
        let blob = tier.insert(b"group-0");
        tier.insert(b"group-0");
        let plan = CheckpointPlan {
            optimizer: "mincut".to_owned(),
            recompute: vec![SnapshotKey::new("model", 0)],
            definitions: vec!["def fit(df): ...".to_owned()],
            ..CheckpointPlan::default()
        };
        Artifact::assemble(
            &plan,
            vec![GroupEntry {
                members: vec![SnapshotKey::new("df", 2)],
                blob,
            }],
            &tier,
        )
        .unwrap()
    }

    #[test]
    fn encode_is_deterministic_and_decodes() {
        let artifact = sample();
        let a = artifact.encode().unwrap();
        let b = artifact.encode().unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..8], b"STOWCKP1");
        assert_eq!(Artifact::decode(&a).unwrap(), artifact);
        assert_eq!(artifact.blobs.len(), 1);
        assert_eq!(artifact.definitions, vec!["def fit(df): ...".to_owned()]);
        assert_eq!(
            artifact.blob(&artifact.groups[0].blob).unwrap().as_ref(),
            b"group-0"
        );
    }

    #[test]
    fn flipped_bytes_are_detected() {
        let bytes = sample().encode().unwrap();
        for i in 0..bytes.len() {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= 0x01;
            let err = Artifact::decode(&corrupt).unwrap_err();
            assert!(
                matches!(
                    err,
                    ArtifactError::BadMagic { .. } | ArtifactError::DigestMismatch { .. }
                ),
                "byte {i}: {err}"
            );
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(matches!(
            Artifact::decode(b"STOWCKP1"),
            Err(ArtifactError::Truncated { size: 8, .. })
        ));
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut artifact = sample();
        artifact.format_version = FORMAT_VERSION + 1;
        let bytes = artifact.encode().unwrap();
        assert!(matches!(
            Artifact::decode(&bytes),
            Err(ArtifactError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn tampered_blob_fails_hash_check() {
        let mut artifact = sample();
        artifact.blobs[0].bytes = Bytes::from_static(b"evil");
        let bytes = artifact.encode().unwrap();
        assert!(matches!(
            Artifact::decode(&bytes),
            Err(ArtifactError::Blob(BlobError::Corrupt { .. }))
        ));
    }

    #[test]
    fn dangling_group_blob_is_rejected() {
        let mut artifact = sample();
        artifact.blobs.clear();
        let bytes = artifact.encode().unwrap();
        assert!(matches!(
            Artifact::decode(&bytes),
            Err(ArtifactError::MissingBlob(_))
        ));
    }
}
