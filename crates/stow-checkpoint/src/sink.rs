// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Plain-text diagnostics log for checkpoint experiments.
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use stow_core::{DiagnosticEvent, DiagnosticsSink};
use tracing::warn;

/// Appends one `key - value` line per event to
/// `<dir>/output_<label>_<optimizer>.txt`.
///
/// Lines accumulate across checkpoints so repeated runs can be compared.
/// Write failures are logged and otherwise ignored; diagnostics never fail a
/// checkpoint.
#[derive(Debug, Clone)]
pub struct AppendFileSink {
    path: PathBuf,
}

impl AppendFileSink {
    /// Sink writing under `dir` for the given session label and optimizer.
    pub fn new(dir: impl AsRef<Path>, label: &str, optimizer: &str) -> Self {
        Self {
            path: dir
                .as_ref()
                .join(format!("output_{label}_{optimizer}.txt")),
        }
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renders one event as a log line (without newline).
    pub fn format_event(event: &DiagnosticEvent) -> String {
        match event {
            DiagnosticEvent::StageTiming { stage, elapsed } => {
                format!("{stage} stage took - {:.6} seconds", elapsed.as_secs_f64())
            }
            DiagnosticEvent::SubStage {
                stage,
                step,
                elapsed,
            } => format!("{stage} {step} took - {:.6} seconds", elapsed.as_secs_f64()),
            DiagnosticEvent::ExternalStage { name, elapsed } => {
                format!("{name} stage took - {:.6} seconds", elapsed.as_secs_f64())
            }
            DiagnosticEvent::Overlaps { count } => format!("overlappings - {count}"),
            DiagnosticEvent::Selection {
                optimizer,
                migrated,
                recomputed,
                replayed,
            } => format!(
                "selection - optimizer={optimizer} migrated={migrated} recomputed={recomputed} replayed={replayed}"
            ),
        }
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl DiagnosticsSink for AppendFileSink {
    fn record(&mut self, event: DiagnosticEvent) {
        let line = Self::format_event(&event);
        if let Err(err) = self.append(&line) {
            warn!(path = %self.path.display(), %err, "failed to append diagnostics");
        }
    }
}
