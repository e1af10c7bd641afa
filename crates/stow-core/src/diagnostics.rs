// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Diagnostics side channel for checkpoint experiments.
//!
//! Stage timings and selection counts are not part of the checkpoint contract;
//! they are emitted to a [`DiagnosticsSink`] the caller injects. [`NullSink`]
//! discards everything.
//!
//! Hosts may time their own stages (building the snapshot graph, computing
//! fingerprints) and hand them to the checkpointer, which forwards them as
//! [`DiagnosticEvent::ExternalStage`] ahead of its own stages.
use std::fmt;
use std::time::Duration;

/// Checkpoint pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Sizing plus overlap resolution.
    Profile,
    /// Building the problem and running the selector.
    Optimize,
    /// Encoding and persisting the artifact.
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Profile => "Profile",
            Self::Optimize => "Optimize",
            Self::Write => "Migrate",
        })
    }
}

/// One diagnostics record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// Wall-clock time spent in a stage.
    StageTiming {
        /// Stage measured.
        stage: Stage,
        /// Elapsed time.
        elapsed: Duration,
    },
    /// Wall-clock time of one step inside a stage.
    SubStage {
        /// Enclosing stage.
        stage: Stage,
        /// Step name.
        step: &'static str,
        /// Elapsed time.
        elapsed: Duration,
    },
    /// A stage timed by the host before the checkpoint ran.
    ExternalStage {
        /// Host's name for the stage.
        name: String,
        /// Elapsed time.
        elapsed: Duration,
    },
    /// Number of overlapping snapshot pairs found.
    Overlaps {
        /// Pair count.
        count: usize,
    },
    /// Size of the chosen partition.
    Selection {
        /// Strategy that produced it.
        optimizer: String,
        /// Migrated snapshot count.
        migrated: usize,
        /// Recomputed snapshot count.
        recomputed: usize,
        /// Edges to replay.
        replayed: usize,
    },
}

/// Receiver for [`DiagnosticEvent`]s.
pub trait DiagnosticsSink {
    /// Records one event.
    fn record(&mut self, event: DiagnosticEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&mut self, _event: DiagnosticEvent) {}
}

/// Sink that keeps every event in memory (tests, in-process tooling).
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    /// Events in arrival order.
    pub events: Vec<DiagnosticEvent>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages that reported a timing, in arrival order.
    pub fn stages(&self) -> Vec<Stage> {
        self.events
            .iter()
            .filter_map(|e| match e {
                DiagnosticEvent::StageTiming { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    /// Host stage names, in arrival order.
    pub fn external_stages(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                DiagnosticEvent::ExternalStage { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn record(&mut self, event: DiagnosticEvent) {
        self.events.push(event);
    }
}

impl<T: DiagnosticsSink + ?Sized> DiagnosticsSink for &mut T {
    fn record(&mut self, event: DiagnosticEvent) {
        (**self).record(event);
    }
}
