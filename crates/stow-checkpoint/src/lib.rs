// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! stow-checkpoint: writes, verifies and restores Stow checkpoint artifacts.
//!
//! [`Checkpointer::checkpoint`] drives the whole pipeline over a live session:
//! it profiles the active snapshots, resolves aliasing, runs the configured
//! strategy and persists an [`Artifact`] atomically. [`restore`] reverses it
//! against a [`ReplayEnv`].
//!
//! Host values never cross this crate untyped: a [`ValueCodec`] turns alias
//! groups into bytes and back, and [`stow_core::SessionState`] supplies live
//! values by name.
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

mod artifact;
mod codec;
mod pipeline;
mod restore;
mod sink;
mod writer;

pub use artifact::{
    read_artifact, verify_artifact, Artifact, ArtifactError, ArtifactSummary, BlobRecord,
    GroupEntry, DIGEST_LEN, FORMAT_VERSION, MAGIC,
};
pub use codec::{CodecError, ValueCodec};
pub use pipeline::{
    CheckpointError, CheckpointOptions, CheckpointReport, Checkpointer, PlannedCheckpoint,
    StageTimings,
};
pub use restore::{restore, EnvError, ReplayEnv, RestoreError, RestoreReport};
pub use sink::AppendFileSink;
pub use writer::{build_artifact, write_atomic, write_checkpoint, WriteReport};
