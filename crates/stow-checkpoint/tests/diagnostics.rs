// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Stage timings and selection counts reach the injected sink.
use std::time::Duration;

use stow_checkpoint::{AppendFileSink, CheckpointOptions, Checkpointer};
use stow_core::{DiagnosticEvent, RecordingSink, Stage};
use stow_dry_tests::{LenProfiler, SessionBuilder, SharedValueCodec};

fn session() -> SessionBuilder {
    let mut s = SessionBuilder::new();
    s.inject("df", vec![1, 2, 3]).unwrap();
    s.run("view = alias df; total = sum df view", Duration::from_millis(2))
        .unwrap();
    s
}

#[test]
fn recording_sink_sees_every_stage_in_order() {
    let mut s = session();
    let fingerprints = s.fingerprints();
    let dir = tempfile::tempdir().unwrap();
    let mut checkpointer = Checkpointer::new(CheckpointOptions::default()).with_sink(RecordingSink::new());
    let (graph, env) = s.split_mut();
    let report = checkpointer
        .checkpoint(
            graph,
            env,
            &fingerprints,
            &LenProfiler,
            &SharedValueCodec,
            &dir.path().join("a.stow"),
        )
        .unwrap();

    let sink = checkpointer.into_sink();
    assert_eq!(sink.stages(), vec![Stage::Profile, Stage::Optimize, Stage::Write]);
    assert!(sink
        .events
        .contains(&DiagnosticEvent::Overlaps { count: 1 }));
    let selection = sink
        .events
        .iter()
        .find_map(|e| match e {
            DiagnosticEvent::Selection {
                optimizer,
                migrated,
                recomputed,
                ..
            } => Some((optimizer.clone(), *migrated, *recomputed)),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        selection,
        (
            "mincut".to_owned(),
            report.migrated.len(),
            report.recomputed.len()
        )
    );
}

#[test]
fn plan_only_skips_the_write_stage() {
    let mut s = session();
    let fingerprints = s.fingerprints();
    let mut checkpointer = Checkpointer::new(CheckpointOptions::default()).with_sink(RecordingSink::new());
    let (graph, env) = s.split_mut();
    let planned = checkpointer
        .plan(graph, env, &fingerprints, &LenProfiler)
        .unwrap();
    assert_eq!(planned.timings.write, Duration::ZERO);
    assert_eq!(
        checkpointer.sink().stages(),
        vec![Stage::Profile, Stage::Optimize]
    );
    assert_eq!(planned.selection.overlaps.len(), 1);
    assert_eq!(planned.plan.migrate.len(), 2);
    assert!(planned.plan.recompute.is_empty());
}

#[test]
fn append_file_sink_accumulates_across_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let sink = AppendFileSink::new(dir.path(), "nb", "mincut");
    let log = sink.path().to_path_buf();
    assert!(log.ends_with("output_nb_mincut.txt"));

    let mut checkpointer = Checkpointer::new(CheckpointOptions::default()).with_sink(sink);
    for i in 0..2 {
        checkpointer.record_host_stage("Idgraph", Duration::from_millis(5));
        let mut s = session();
        let fingerprints = s.fingerprints();
        let (graph, env) = s.split_mut();
        checkpointer
            .checkpoint(
                graph,
                env,
                &fingerprints,
                &LenProfiler,
                &SharedValueCodec,
                &dir.path().join(format!("ckpt{i}.stow")),
            )
            .unwrap();
    }

    let text = std::fs::read_to_string(&log).unwrap();
    assert_eq!(text.matches("Profile stage took - ").count(), 2);
    assert_eq!(text.matches("Optimize stage took - ").count(), 2);
    assert_eq!(text.matches("Migrate stage took - ").count(), 2);
    assert_eq!(text.matches("Idgraph stage took - 0.005000 seconds").count(), 2);
    assert_eq!(text.matches("Optimize solve took - ").count(), 2);
    assert_eq!(text.matches("overlappings - 1").count(), 2);
    assert!(text.contains("selection - optimizer=mincut"));
    // Per run: one host stage, three stage timings, four optimize steps,
    // overlaps and selection.
    assert_eq!(text.lines().count(), 20);
    assert!(text.lines().next().unwrap().starts_with("Idgraph stage took"));
}

#[test]
fn host_stages_precede_the_pipeline_and_are_sent_once() {
    let mut s = session();
    let fingerprints = s.fingerprints();
    let mut checkpointer =
        Checkpointer::new(CheckpointOptions::default()).with_sink(RecordingSink::new());
    checkpointer.record_host_stage("Idgraph", Duration::from_millis(40));
    checkpointer.record_host_stage("Representation", Duration::from_millis(7));
    let (graph, env) = s.split_mut();
    checkpointer
        .plan(graph, env, &fingerprints, &LenProfiler)
        .unwrap();
    checkpointer
        .plan(graph, env, &fingerprints, &LenProfiler)
        .unwrap();

    let sink = checkpointer.into_sink();
    assert_eq!(sink.external_stages(), vec!["Idgraph", "Representation"]);
    assert_eq!(
        sink.events[0],
        DiagnosticEvent::ExternalStage {
            name: "Idgraph".to_owned(),
            elapsed: Duration::from_millis(40),
        }
    );
    let steps: Vec<_> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            DiagnosticEvent::SubStage { stage, step, .. } => Some((*stage, *step)),
            _ => None,
        })
        .take(4)
        .collect();
    assert_eq!(
        steps,
        vec![
            (Stage::Optimize, "build"),
            (Stage::Optimize, "solve"),
            (Stage::Optimize, "expand"),
            (Stage::Optimize, "plan"),
        ]
    );
}
