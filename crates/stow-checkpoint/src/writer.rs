// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Checkpoint writer: encodes migrate groups and persists the artifact.
//!
//! The write is all-or-nothing. Bytes go to a temporary file in the target
//! directory, are fsynced, and the file is atomically renamed over the target.
//! On any failure the temporary file is dropped and the target is untouched.
//! On unix the directory is fsynced after the rename so the new entry survives
//! a crash; a failure there is logged, since the artifact is already in place.
use std::io::Write;
use std::path::{Path, PathBuf};

use stow_cas::MemoryTier;
use stow_core::{CheckpointPlan, SessionState};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::artifact::{Artifact, ArtifactError, GroupEntry};
use crate::codec::ValueCodec;

/// Outcome of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Final artifact path.
    pub path: PathBuf,
    /// Artifact size in bytes.
    pub bytes_written: u64,
    /// Migrate groups written.
    pub groups: usize,
    /// Distinct blobs stored.
    pub blobs: usize,
    /// Groups whose payload matched an earlier one.
    pub dedup_hits: usize,
}

/// Encodes `plan`'s migrate groups from `session` into an [`Artifact`].
#[instrument(skip_all, fields(groups = plan.migrate.len()))]
pub fn build_artifact<S, C>(
    plan: &CheckpointPlan,
    session: &S,
    codec: &C,
) -> Result<(Artifact, MemoryTier), ArtifactError>
where
    S: SessionState,
    C: ValueCodec<Value = S::Value> + ?Sized,
{
    let mut tier = MemoryTier::new();
    let mut groups = Vec::with_capacity(plan.migrate.len());
    for group in &plan.migrate {
        let members = group
            .members
            .iter()
            .map(|key| {
                session
                    .get_variable_value(&key.name)
                    .map(|value| (key.name.as_str(), value))
                    .ok_or_else(|| ArtifactError::MissingValue {
                        name: key.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let payload = codec.encode_group(&members)?;
        let blob = tier.insert(&payload);
        debug!(members = members.len(), bytes = payload.len(), blob = %blob.short(), "encoded group");
        groups.push(GroupEntry {
            members: group.members.clone(),
            blob,
        });
    }
    let artifact = Artifact::assemble(plan, groups, &tier)?;
    Ok((artifact, tier))
}

/// Writes `bytes` to `path` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ArtifactError::Io(e.error))?;
    if let Err(err) = sync_dir(dir) {
        warn!(dir = %dir.display(), %err, "failed to fsync artifact directory");
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Encodes and persists a checkpoint for `plan`.
///
/// Every migrated variable must have a live value in `session`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_checkpoint<S, C>(
    plan: &CheckpointPlan,
    session: &S,
    codec: &C,
    path: &Path,
) -> Result<WriteReport, ArtifactError>
where
    S: SessionState,
    C: ValueCodec<Value = S::Value> + ?Sized,
{
    let (artifact, tier) = build_artifact(plan, session, codec)?;
    let bytes = artifact.encode()?;
    write_atomic(path, &bytes)?;
    let report = WriteReport {
        path: path.to_path_buf(),
        bytes_written: bytes.len() as u64,
        groups: artifact.groups.len(),
        blobs: tier.len(),
        dedup_hits: tier.dedup_hits(),
    };
    info!(
        bytes = report.bytes_written,
        groups = report.groups,
        blobs = report.blobs,
        recompute = plan.recompute.len(),
        "checkpoint written"
    );
    Ok(report)
}
