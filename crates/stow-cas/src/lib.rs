// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content addressing for Stow checkpoint blobs.
//!
//! A checkpoint encodes each migrated alias group into one blob. Blobs are
//! keyed by `BLAKE3(bytes)` with no domain prefix: which `(name, version)`
//! pairs a blob restores is recorded in the artifact manifest, never in the
//! hash. Byte-identical encodings therefore collapse into one stored blob.
//!
//! [`MemoryTier`] collects blobs while an artifact is assembled and re-checks
//! them while one is read. It only hands out hashes in ascending order, so
//! artifacts built from the same groups are byte-identical.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod memory;
pub use memory::MemoryTier;

use std::fmt;

/// BLAKE3 digest of one encoded group.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlobHash(pub [u8; 32]);

impl BlobHash {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex characters, for compact tables and log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for BlobHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Hashes `bytes`.
pub fn blob_hash(bytes: &[u8]) -> BlobHash {
    BlobHash(*blake3::hash(bytes).as_bytes())
}

/// Integrity failure while loading recorded blobs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    /// Stored bytes hash to something other than their recorded hash.
    #[error("blob recorded as {declared} hashes to {actual}")]
    Corrupt {
        /// Hash written in the artifact.
        declared: BlobHash,
        /// Hash of the bytes actually present.
        actual: BlobHash,
    },
}
