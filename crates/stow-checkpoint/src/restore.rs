// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Restorer: rebuilds a session from an artifact.
//!
//! Host function definitions run first, so replayed steps can call them.
//! Migrated groups are bound next, then replay steps run in edge order.
//! A replayed step may overwrite a migrated name with an older version, so
//! the restorer tracks which version of each name is currently bound:
//!
//! - before a step, any migrated input whose bound version differs from the
//!   one the step read is re-bound from its group blob;
//! - after the last step, every group with a clobbered or partially re-bound
//!   member is re-bound whole, which restores storage sharing inside it.
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error as StdError;

use stow_core::{EdgeId, SnapshotKey};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::artifact::{Artifact, ArtifactError};
use crate::codec::{CodecError, ValueCodec};

/// Boxed error returned by a [`ReplayEnv`].
pub type EnvError = Box<dyn StdError + Send + Sync>;

/// Restore-side execution environment.
pub trait ReplayEnv {
    /// Host value type.
    type Value;

    /// Binds `name` to `value`, replacing any previous binding.
    fn bind(&mut self, name: &str, value: Self::Value);

    /// Executes one recorded unit of code.
    fn execute(&mut self, source: &str) -> Result<(), EnvError>;
}

/// Errors raised while restoring.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// The artifact is inconsistent.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// A group blob failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A decoded group does not contain a member the artifact lists.
    #[error("group blob is missing member {name}")]
    MissingMember {
        /// Variable name.
        name: String,
    },

    /// A function definition failed to execute.
    #[error("definition {index} failed: {message}")]
    Definition {
        /// Position in the artifact's definition list.
        index: usize,
        /// Environment error message.
        message: String,
    },

    /// A replay step failed.
    #[error("replay of {edge} failed: {message}")]
    Replay {
        /// Edge that failed.
        edge: EdgeId,
        /// Environment error message.
        message: String,
    },
}

/// Outcome of a successful restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Function definitions executed.
    pub definitions: usize,
    /// Migrated variables bound from blobs.
    pub migrated: Vec<SnapshotKey>,
    /// Variables rebuilt by replay.
    pub recomputed: Vec<SnapshotKey>,
    /// Steps executed.
    pub steps_replayed: usize,
    /// Members re-bound after a replay step clobbered them.
    pub rebinds: usize,
}

struct Restorer<'a, C: ?Sized, E> {
    artifact: &'a Artifact,
    codec: &'a C,
    env: &'a mut E,
    /// name -> (group index, migrated version)
    migrated: BTreeMap<&'a str, (usize, u32)>,
    /// name -> version currently bound in `env`; absent if unbound.
    bound: BTreeMap<String, u32>,
    rebinds: usize,
}

impl<'a, C, E> Restorer<'a, C, E>
where
    C: ValueCodec<Value = E::Value> + ?Sized,
    E: ReplayEnv,
{
    /// Binds the members of group `index` selected by `only` (all if `None`).
    fn bind_group(
        &mut self,
        index: usize,
        only: Option<&BTreeSet<&str>>,
    ) -> Result<usize, RestoreError> {
        let artifact = self.artifact;
        let group = &artifact.groups[index];
        let blob = artifact
            .blob(&group.blob)
            .ok_or(ArtifactError::MissingBlob(group.blob))?;
        let mut decoded: BTreeMap<String, E::Value> =
            self.codec.decode_group(blob)?.into_iter().collect();
        let mut bound = 0;
        for key in &group.members {
            if only.is_some_and(|names| !names.contains(key.name.as_str())) {
                continue;
            }
            let value = decoded
                .remove(&key.name)
                .ok_or_else(|| RestoreError::MissingMember {
                    name: key.name.clone(),
                })?;
            self.env.bind(&key.name, value);
            self.bound.insert(key.name.clone(), key.version);
            bound += 1;
        }
        Ok(bound)
    }

    fn is_stale(&self, name: &str, version: u32) -> bool {
        self.bound.get(name) != Some(&version)
    }

    fn run(mut self) -> Result<RestoreReport, RestoreError> {
        let artifact = self.artifact;
        for (index, source) in artifact.definitions.iter().enumerate() {
            self.env
                .execute(source)
                .map_err(|e| RestoreError::Definition {
                    index,
                    message: e.to_string(),
                })?;
        }
        for index in 0..artifact.groups.len() {
            self.bind_group(index, None)?;
        }

        let mut split = BTreeSet::new();
        for step in &artifact.replay.steps {
            let mut stale: BTreeMap<usize, BTreeSet<&str>> = BTreeMap::new();
            for input in &step.inputs {
                if let Some(&(group, version)) = self.migrated.get(input.name.as_str()) {
                    if version == input.version && self.is_stale(&input.name, version) {
                        stale.entry(group).or_default().insert(input.name.as_str());
                    }
                }
            }
            for (group, names) in stale {
                self.rebinds += self.bind_group(group, Some(&names))?;
                split.insert(group);
            }

            debug!(edge = %step.edge, "replaying");
            self.env
                .execute(&step.source)
                .map_err(|e| RestoreError::Replay {
                    edge: step.edge,
                    message: e.to_string(),
                })?;
            for output in &step.outputs {
                self.bound.insert(output.name.clone(), output.version);
            }
            for tombstone in &step.deletes {
                self.bound.remove(&tombstone.name);
            }
        }

        let clobbered: BTreeSet<usize> = self
            .migrated
            .iter()
            .filter(|(name, (_, version))| self.is_stale(name, *version))
            .map(|(_, &(group, _))| group)
            .collect();
        for &group in clobbered.union(&split) {
            self.rebinds += self.bind_group(group, None)?;
        }

        Ok(RestoreReport {
            definitions: artifact.definitions.len(),
            migrated: artifact
                .groups
                .iter()
                .flat_map(|g| g.members.iter().cloned())
                .collect(),
            recomputed: artifact.recompute.clone(),
            steps_replayed: artifact.replay.len(),
            rebinds: self.rebinds,
        })
    }
}

/// Restores `artifact` into `env`.
///
/// On success every migrated and recomputed variable is bound in `env` at the
/// version it had when the checkpoint was taken.
#[instrument(skip_all, fields(groups = artifact.groups.len(), steps = artifact.replay.len()))]
pub fn restore<C, E>(
    artifact: &Artifact,
    codec: &C,
    env: &mut E,
) -> Result<RestoreReport, RestoreError>
where
    C: ValueCodec<Value = E::Value> + ?Sized,
    E: ReplayEnv,
{
    let migrated = artifact
        .groups
        .iter()
        .enumerate()
        .flat_map(|(i, g)| g.members.iter().map(move |k| (k.name.as_str(), (i, k.version))))
        .collect();
    let report = Restorer {
        artifact,
        codec,
        env,
        migrated,
        bound: BTreeMap::new(),
        rebinds: 0,
    }
    .run()?;
    info!(
        migrated = report.migrated.len(),
        recomputed = report.recomputed.len(),
        rebinds = report.rebinds,
        "checkpoint restored"
    );
    Ok(report)
}
