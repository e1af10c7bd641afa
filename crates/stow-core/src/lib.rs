// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! stow-core: the selective-checkpointing decision engine.
//!
//! A session is modelled as a [`SnapshotGraph`] of variable snapshots (one per
//! version of a named variable) and compute edges (one per executed unit of
//! code). At checkpoint time the engine:
//!
//! 1. collects the active snapshots ([`SnapshotGraph::active_snapshots`]);
//! 2. sizes them ([`profile_active`]) and finds shared storage
//!    ([`resolve_overlaps`]);
//! 3. partitions them into migrate/recompute sets ([`select_vss`]);
//! 4. turns the partition into a [`CheckpointPlan`] that a writer persists.
//!
//! Every step is deterministic: collections are `BTreeMap`/`BTreeSet` keyed by
//! dense ids, and the optimizer is a pure function of its inputs.
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

mod aliasing;
mod diagnostics;
mod fingerprint;
mod graph;
mod ident;
mod plan;
mod profile;
/// Migrate/recompute optimizer: problem model, strategies and registry.
pub mod selector;
mod session;

/// Overlap detection and alias components.
pub use aliasing::{resolve_overlaps, AliasGroups, OverlapPair};
/// Injectable diagnostics side channel.
pub use diagnostics::{DiagnosticEvent, DiagnosticsSink, NullSink, RecordingSink, Stage};
/// Per-variable identity/storage signatures from the fingerprint tracker.
pub use fingerprint::{Fingerprint, FingerprintTable};
/// Snapshot graph model.
pub use graph::{ComputeEdge, GraphError, SnapshotGraph, VariableSnapshot};
/// Identifier types.
pub use ident::{EdgeId, RegionId, SnapshotId, SnapshotKey};
/// Checkpoint plan handed to artifact writers.
pub use plan::{CheckpointPlan, MigrationGroup, ReplayPlan, ReplayStep, ReplayTarget};
/// Sizing and cost model.
pub use profile::{profile_active, CostModel, ProfileReport, Size, SizeProfiler, TypeDenylist};
/// Optimizer entry points.
pub use selector::{
    select_vss, select_vss_timed, SelectError, SelectTimings, Selection, SelectionProblem,
    Selector, SelectorRegistry, Side, Unit,
};
/// Host session boundary.
pub use session::SessionState;
