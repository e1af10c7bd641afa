// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Checkpoint pipeline: profile → resolve overlaps → select → plan → write.
use std::path::Path;
use std::time::{Duration, Instant};

use stow_core::{
    profile_active, resolve_overlaps, select_vss_timed, CheckpointPlan, CostModel, DiagnosticEvent,
    DiagnosticsSink, EdgeId, FingerprintTable, GraphError, NullSink, ProfileReport, SelectError,
    Selection, SelectorRegistry, SessionState, SizeProfiler, SnapshotGraph, SnapshotKey, Stage,
    TypeDenylist,
};
use thiserror::Error;
use tracing::{info, instrument};

use crate::artifact::ArtifactError;
use crate::codec::ValueCodec;
use crate::writer::{write_checkpoint, WriteReport};

/// Errors that abort a checkpoint. Nothing is written when one is returned.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Graph query failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Selection failed or was rejected.
    #[error(transparent)]
    Select(#[from] SelectError),
    /// Encoding or persisting the artifact failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Tunables for one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOptions {
    /// Registered strategy name.
    pub optimizer: String,
    /// Size/runtime pricing.
    pub cost: CostModel,
    /// Type tags never migrated.
    pub denylist: TypeDenylist,
    /// Function definitions the host declared, replayed before any step.
    pub definitions: Vec<String>,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self {
            optimizer: SelectorRegistry::DEFAULT.to_owned(),
            cost: CostModel::default(),
            denylist: TypeDenylist::default(),
            definitions: Vec::new(),
        }
    }
}

/// Wall-clock time per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    /// Sizing plus overlap resolution.
    pub profile: Duration,
    /// Selection and planning.
    pub optimize: Duration,
    /// Encoding and persisting.
    pub write: Duration,
}

/// A validated plan that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCheckpoint {
    /// Profiling outcome.
    pub profile: ProfileReport,
    /// Validated partition.
    pub selection: Selection,
    /// Graph-independent plan.
    pub plan: CheckpointPlan,
    /// Profile and optimize timings (write is zero).
    pub timings: StageTimings,
}

/// Outcome of a successful checkpoint.
///
/// Hosts use `migrated`/`recomputed` to update their own migration lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointReport {
    /// Migrated variables.
    pub migrated: Vec<SnapshotKey>,
    /// Recomputed variables.
    pub recomputed: Vec<SnapshotKey>,
    /// Edges the restorer will replay.
    pub replayed: Vec<EdgeId>,
    /// Total cost of the chosen partition in nanoseconds.
    pub cost_ns: u128,
    /// Profiling outcome.
    pub profile: ProfileReport,
    /// Artifact write outcome.
    pub write: WriteReport,
    /// Stage timings.
    pub timings: StageTimings,
}

/// Runs checkpoints with a fixed strategy registry, options and sink.
#[derive(Debug)]
pub struct Checkpointer<D = NullSink> {
    registry: SelectorRegistry,
    options: CheckpointOptions,
    sink: D,
    /// Host-timed stages awaiting the next `plan`.
    host_stages: Vec<(String, Duration)>,
}

impl Checkpointer<NullSink> {
    /// Checkpointer with the built-in strategies and no diagnostics.
    pub fn new(options: CheckpointOptions) -> Self {
        Self {
            registry: SelectorRegistry::with_defaults(),
            options,
            sink: NullSink,
            host_stages: Vec::new(),
        }
    }
}

impl<D: DiagnosticsSink> Checkpointer<D> {
    /// Replaces the diagnostics sink.
    pub fn with_sink<T: DiagnosticsSink>(self, sink: T) -> Checkpointer<T> {
        Checkpointer {
            registry: self.registry,
            options: self.options,
            sink,
            host_stages: self.host_stages,
        }
    }

    /// Replaces the strategy registry.
    pub fn with_registry(mut self, registry: SelectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Active options.
    pub fn options(&self) -> &CheckpointOptions {
        &self.options
    }

    /// Queues a stage the host timed itself (e.g. building the snapshot
    /// graph). The next [`Self::plan`] forwards queued stages to the sink, in
    /// the order they were queued, before its own.
    pub fn record_host_stage(&mut self, name: impl Into<String>, elapsed: Duration) {
        self.host_stages.push((name.into(), elapsed));
    }

    /// Diagnostics sink.
    pub fn sink(&self) -> &D {
        &self.sink
    }

    /// Consumes the checkpointer, returning its sink.
    pub fn into_sink(self) -> D {
        self.sink
    }

    /// Profiles, resolves overlaps and selects, without writing anything.
    ///
    /// Records sizes on `graph`.
    #[instrument(skip_all, fields(optimizer = %self.options.optimizer))]
    pub fn plan<S, P>(
        &mut self,
        graph: &mut SnapshotGraph,
        session: &S,
        fingerprints: &FingerprintTable,
        profiler: &P,
    ) -> Result<PlannedCheckpoint, CheckpointError>
    where
        S: SessionState,
        P: SizeProfiler<S::Value> + ?Sized,
    {
        let selector = self.registry.get(&self.options.optimizer)?;
        for (name, elapsed) in self.host_stages.drain(..) {
            self.sink.record(DiagnosticEvent::ExternalStage { name, elapsed });
        }

        let started = Instant::now();
        let active = graph.active_snapshots();
        let profile = profile_active(
            graph,
            &active,
            session,
            fingerprints,
            &self.options.denylist,
            profiler,
        )?;
        let overlaps = resolve_overlaps(graph, &active, fingerprints)?;
        let profile_elapsed = started.elapsed();
        self.sink.record(DiagnosticEvent::StageTiming {
            stage: Stage::Profile,
            elapsed: profile_elapsed,
        });
        self.sink.record(DiagnosticEvent::Overlaps {
            count: overlaps.len(),
        });
        info!(
            active = active.len(),
            overlaps = overlaps.len(),
            missing = profile.missing.len(),
            bytes = profile.total_bytes,
            "profile complete"
        );

        let started = Instant::now();
        let (selection, sub) =
            select_vss_timed(graph, &active, &overlaps, &self.options.cost, selector)?;
        let plan_started = Instant::now();
        let plan = CheckpointPlan::build(graph, &selection)?
            .with_definitions(self.options.definitions.clone());
        let optimize_elapsed = started.elapsed();
        for (step, elapsed) in [
            ("build", sub.build),
            ("solve", sub.solve),
            ("expand", sub.expand),
            ("plan", plan_started.elapsed()),
        ] {
            self.sink.record(DiagnosticEvent::SubStage {
                stage: Stage::Optimize,
                step,
                elapsed,
            });
        }
        self.sink.record(DiagnosticEvent::StageTiming {
            stage: Stage::Optimize,
            elapsed: optimize_elapsed,
        });
        self.sink.record(DiagnosticEvent::Selection {
            optimizer: selection.optimizer.clone(),
            migrated: selection.migrate.len(),
            recomputed: selection.recompute.len(),
            replayed: selection.edges.len(),
        });
        info!(
            migrate = ?plan.migrated_keys().map(ToString::to_string).collect::<Vec<_>>(),
            recompute = ?plan.recompute.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "selection"
        );

        Ok(PlannedCheckpoint {
            profile,
            selection,
            plan,
            timings: StageTimings {
                profile: profile_elapsed,
                optimize: optimize_elapsed,
                write: Duration::ZERO,
            },
        })
    }

    /// Runs the full pipeline and writes the artifact to `path`.
    ///
    /// All-or-nothing: on error no artifact exists at `path` that was not
    /// there before.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn checkpoint<S, P, C>(
        &mut self,
        graph: &mut SnapshotGraph,
        session: &S,
        fingerprints: &FingerprintTable,
        profiler: &P,
        codec: &C,
        path: &Path,
    ) -> Result<CheckpointReport, CheckpointError>
    where
        S: SessionState,
        P: SizeProfiler<S::Value> + ?Sized,
        C: ValueCodec<Value = S::Value> + ?Sized,
    {
        let planned = self.plan(graph, session, fingerprints, profiler)?;

        let started = Instant::now();
        let write = write_checkpoint(&planned.plan, session, codec, path)?;
        let write_elapsed = started.elapsed();
        self.sink.record(DiagnosticEvent::StageTiming {
            stage: Stage::Write,
            elapsed: write_elapsed,
        });

        Ok(CheckpointReport {
            migrated: planned.plan.migrated_keys().cloned().collect(),
            recomputed: planned.plan.recompute.clone(),
            replayed: planned.selection.edges.iter().copied().collect(),
            cost_ns: planned.selection.cost,
            profile: planned.profile,
            write,
            timings: StageTimings {
                write: write_elapsed,
                ..planned.timings
            },
        })
    }
}
