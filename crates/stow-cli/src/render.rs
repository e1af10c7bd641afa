// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Table and JSON views of plans and artifacts.
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use comfy_table::Table;
use serde::Serialize;
use stow_checkpoint::{Artifact, ArtifactSummary, PlannedCheckpoint};
use stow_core::{Size, SnapshotGraph};

/// Serializable view of a planned checkpoint.
#[derive(Debug, Serialize)]
pub struct PlanView {
    /// Strategy used.
    pub optimizer: String,
    /// Total cost in nanoseconds.
    pub cost_ns: u128,
    /// Overlapping pairs found.
    pub overlaps: usize,
    /// Migrated groups, members as `name@vN`.
    pub migrate: Vec<Vec<String>>,
    /// Recomputed variables.
    pub recompute: Vec<String>,
    /// Edge ids each recomputed variable needs.
    pub recomputation: BTreeMap<String, Vec<u32>>,
    /// Function definitions replayed first.
    pub definitions: Vec<String>,
    /// Replay order.
    pub replay: Vec<StepView>,
    /// Variables skipped for missing metadata.
    pub missing: Vec<String>,
}

/// One replay step.
#[derive(Debug, Serialize)]
pub struct StepView {
    /// Edge id.
    pub edge: u32,
    /// Recorded runtime in seconds.
    pub runtime_secs: f64,
    /// Cell source.
    pub source: String,
}

impl PlanView {
    /// Builds the view, looking runtimes and names up in `graph`.
    pub fn new(graph: &SnapshotGraph, planned: &PlannedCheckpoint) -> Result<Self> {
        let replay = planned
            .plan
            .replay
            .steps
            .iter()
            .map(|step| -> Result<StepView> {
                Ok(StepView {
                    edge: step.edge.0,
                    runtime_secs: graph.edge(step.edge)?.runtime.as_secs_f64(),
                    source: step.source.clone(),
                })
            })
            .collect::<Result<_>>()?;
        let missing = planned
            .profile
            .missing
            .iter()
            .map(|&id| graph.key(id).map(|k| k.to_string()))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            optimizer: planned.plan.optimizer.clone(),
            cost_ns: planned.selection.cost,
            overlaps: planned.selection.overlaps.len(),
            migrate: planned
                .plan
                .migrate
                .iter()
                .map(|g| g.members.iter().map(ToString::to_string).collect())
                .collect(),
            recompute: planned.plan.recompute.iter().map(ToString::to_string).collect(),
            recomputation: planned
                .plan
                .replay
                .targets
                .iter()
                .map(|t| (t.key.to_string(), t.edges.iter().map(|e| e.0).collect()))
                .collect(),
            definitions: planned.plan.definitions.clone(),
            replay,
            missing,
        })
    }
}

fn fmt_size(size: Option<Size>) -> String {
    match size {
        Some(Size::Bytes(n)) => format!("{n} B"),
        Some(Size::Unmigratable) => "unmigratable".to_owned(),
        None => "unknown".to_owned(),
    }
}

fn fmt_secs(d: Duration) -> String {
    format!("{:.6}s", d.as_secs_f64())
}

/// Partition and replay tables for a plan.
pub fn plan_tables(graph: &SnapshotGraph, planned: &PlannedCheckpoint) -> Result<String> {
    let mut vars = Table::new();
    vars.set_header(vec!["variable", "decision", "group", "size", "replays"]);
    for (i, group) in planned.plan.migrate.iter().enumerate() {
        for key in &group.members {
            let size = usize::try_from(key.version)
                .ok()
                .and_then(|v| graph.versions(&key.name).get(v))
                .map(|&id| graph.snapshot(id).map(|s| s.size))
                .transpose()?
                .flatten();
            vars.add_row(vec![
                key.to_string(),
                "migrate".to_owned(),
                i.to_string(),
                fmt_size(size),
                "-".to_owned(),
            ]);
        }
    }
    for key in &planned.plan.recompute {
        let replays = planned
            .plan
            .replay
            .edges_for(key)
            .unwrap_or_default()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        vars.add_row(vec![
            key.to_string(),
            "recompute".to_owned(),
            "-".to_owned(),
            "-".to_owned(),
            replays,
        ]);
    }

    let mut steps = Table::new();
    steps.set_header(vec!["edge", "runtime", "source"]);
    for step in &planned.plan.replay.steps {
        steps.add_row(vec![
            step.edge.to_string(),
            fmt_secs(graph.edge(step.edge)?.runtime),
            step.source.clone(),
        ]);
    }

    Ok(format!(
        "optimizer: {}\ncost: {} ns\noverlaps: {}\ndefinitions: {}\n{vars}\nreplay order:\n{steps}",
        planned.plan.optimizer,
        planned.selection.cost,
        planned.selection.overlaps.len(),
        planned.plan.definitions.len()
    ))
}

/// Group, recompute and replay tables for an artifact.
pub fn artifact_tables(artifact: &Artifact) -> String {
    let mut groups = Table::new();
    groups.set_header(vec!["group", "blob", "bytes", "members"]);
    for (i, group) in artifact.groups.iter().enumerate() {
        let bytes = artifact.blob(&group.blob).map_or(0, |b| b.len());
        let members: Vec<String> = group.members.iter().map(ToString::to_string).collect();
        groups.add_row(vec![
            i.to_string(),
            group.blob.short(),
            bytes.to_string(),
            members.join(", "),
        ]);
    }

    let mut steps = Table::new();
    steps.set_header(vec!["edge", "source", "outputs"]);
    for step in &artifact.replay.steps {
        let outputs: Vec<String> = step.outputs.iter().map(ToString::to_string).collect();
        steps.add_row(vec![
            step.edge.to_string(),
            step.source.clone(),
            outputs.join(", "),
        ]);
    }

    let recompute: Vec<String> = artifact.recompute.iter().map(ToString::to_string).collect();
    format!(
        "format: v{}\noptimizer: {}\ndefinitions: {}\n{groups}\nrecompute: {}\nreplay order:\n{steps}",
        artifact.format_version,
        artifact.optimizer,
        artifact.definitions.len(),
        if recompute.is_empty() {
            "-".to_owned()
        } else {
            recompute.join(", ")
        }
    )
}

/// One-line verification summary.
pub fn summary_line(summary: &ArtifactSummary) -> String {
    format!(
        "ok: {} bytes, digest {}, {} groups, {} blobs, {} migrated, {} recomputed, {} replay steps",
        summary.size,
        summary.digest,
        summary.groups,
        summary.blobs,
        summary.migrated,
        summary.recomputed,
        summary.replay_steps
    )
}
