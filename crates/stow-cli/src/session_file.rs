// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Offline session description consumed by `stow plan`.
//!
//! ```json
//! {
//!   "events": [
//!     { "inject": "raw" },
//!     { "cell": { "source": "df = clean(raw)", "runtime_secs": 2.5,
//!                 "reads": ["raw"], "writes": ["df"] } }
//!   ],
//!   "variables": {
//!     "raw": { "bytes": 4096, "regions": [1] },
//!     "df":  { "bytes": 2048, "regions": [2], "type_tag": "pandas.DataFrame" }
//!   },
//!   "definitions": ["def clean(frame): ..."],
//!   "stages": [{ "name": "Idgraph", "secs": 0.12 }]
//! }
//! ```
//!
//! Events rebuild the snapshot graph in order. `variables` stands in for the
//! live session: it supplies each name's fingerprint and measured size.
//! Names without an entry are treated as missing from the fingerprint table.
//! `definitions` and `stages` are optional: function definitions to carry in
//! the plan, and stages the host timed before checkpointing.
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use stow_core::{Fingerprint, FingerprintTable, SessionState, SnapshotGraph};

/// One recorded session event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// A variable bound from outside any cell.
    Inject(String),
    /// An executed cell.
    Cell(CellRecord),
}

/// An executed cell and its namespace effects.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellRecord {
    /// Cell source.
    pub source: String,
    /// Measured wall-clock runtime.
    pub runtime_secs: f64,
    /// Names read before being written.
    #[serde(default)]
    pub reads: Vec<String>,
    /// Names written.
    #[serde(default)]
    pub writes: Vec<String>,
    /// Names removed.
    #[serde(default)]
    pub deletes: Vec<String>,
}

/// Tracker output for one live variable.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableRecord {
    /// Measured size.
    pub bytes: u64,
    /// Storage regions.
    #[serde(default)]
    pub regions: Vec<u64>,
    /// Runtime type tag.
    #[serde(default)]
    pub type_tag: Option<String>,
    /// Tracker found the value unserializable.
    #[serde(default)]
    pub unserializable: bool,
}

/// A stage the host timed.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Elapsed seconds.
    pub secs: f64,
}

/// Parsed session description.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionFile {
    /// Events in execution order.
    pub events: Vec<Event>,
    /// Live variables at checkpoint time.
    #[serde(default)]
    pub variables: BTreeMap<String, VariableRecord>,
    /// Function definitions in declaration order.
    #[serde(default)]
    pub definitions: Vec<String>,
    /// Host stage timings in the order they ran.
    #[serde(default)]
    pub stages: Vec<StageRecord>,
}

/// Measured sizes standing in for live values.
#[derive(Debug, Clone, Default)]
pub struct SizeTable(BTreeMap<String, u64>);

impl SessionState for SizeTable {
    type Value = u64;

    fn get_variable_value(&self, name: &str) -> Option<&u64> {
        self.0.get(name)
    }
}

/// Graph, fingerprints and sizes rebuilt from a [`SessionFile`].
#[derive(Debug, Clone)]
pub struct LoadedSession {
    /// Rebuilt snapshot graph.
    pub graph: SnapshotGraph,
    /// Fingerprints by name.
    pub fingerprints: FingerprintTable,
    /// Sizes by name.
    pub sizes: SizeTable,
    /// Function definitions in declaration order.
    pub definitions: Vec<String>,
    /// Host stage timings.
    pub stages: Vec<(String, Duration)>,
}

impl SessionFile {
    /// Parses JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("malformed session file")
    }

    /// Replays the events into a graph.
    pub fn load(self) -> Result<LoadedSession> {
        let mut graph = SnapshotGraph::new();
        for (i, event) in self.events.into_iter().enumerate() {
            match event {
                Event::Inject(name) => {
                    graph
                        .introduce(&name)
                        .with_context(|| format!("event {i}: cannot inject `{name}`"))?;
                }
                Event::Cell(cell) => {
                    let runtime = Duration::try_from_secs_f64(cell.runtime_secs)
                        .with_context(|| format!("event {i}: invalid runtime"))?;
                    let reads = cell
                        .reads
                        .iter()
                        .map(|name| {
                            graph
                                .active_snapshot(name)
                                .with_context(|| format!("event {i}: `{name}` is not live"))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    let writes: Vec<&str> = cell.writes.iter().map(String::as_str).collect();
                    let deletes: Vec<&str> = cell.deletes.iter().map(String::as_str).collect();
                    graph
                        .record_edge(cell.source.as_str(), runtime, &reads, &writes, &deletes)
                        .with_context(|| format!("event {i}: cannot record cell"))?;
                }
            }
        }

        let stages: Vec<(String, Duration)> = self
            .stages
            .into_iter()
            .map(|stage| {
                Duration::try_from_secs_f64(stage.secs)
                    .map(|elapsed| (stage.name, elapsed))
                    .context("invalid stage timing")
            })
            .collect::<Result<_>>()?;

        let mut fingerprints = FingerprintTable::new();
        let mut sizes = BTreeMap::new();
        for (identity, (name, var)) in (0_u64..).zip(self.variables) {
            let mut fp = Fingerprint::new(identity).with_regions(var.regions);
            if let Some(tag) = var.type_tag {
                fp = fp.with_type_tag(tag);
            }
            if var.unserializable {
                fp = fp.unserializable();
            }
            sizes.insert(name.clone(), var.bytes);
            fingerprints.insert(name, fp);
        }
        Ok(LoadedSession {
            graph,
            fingerprints,
            sizes: SizeTable(sizes),
            definitions: self.definitions,
            stages,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "events": [
            { "inject": "raw" },
            { "cell": { "source": "df = clean(raw)", "runtime_secs": 2.5,
                        "reads": ["raw"], "writes": ["df"] } },
            { "cell": { "source": "del raw", "runtime_secs": 0.0, "deletes": ["raw"] } }
        ],
        "variables": {
            "df": { "bytes": 2048, "regions": [2], "type_tag": "pandas.DataFrame" }
        },
        "definitions": ["def clean(frame): ..."],
        "stages": [{ "name": "Idgraph", "secs": 0.5 }]
    }"#;

    #[test]
    fn events_rebuild_the_graph() {
        let loaded = SessionFile::parse(SAMPLE).unwrap().load().unwrap();
        assert_eq!(loaded.graph.edge_count(), 2);
        assert_eq!(loaded.graph.active_snapshot("raw"), None);
        let df = loaded.graph.active_snapshot("df").unwrap();
        let edge = loaded.graph.producing_edge(df).unwrap().unwrap();
        assert_eq!(
            loaded.graph.edge(edge).unwrap().runtime,
            Duration::from_millis(2500)
        );
        assert_eq!(loaded.sizes.get_variable_value("df"), Some(&2048));
        assert_eq!(
            loaded.fingerprints["df"].type_tag.as_deref(),
            Some("pandas.DataFrame")
        );
        assert_eq!(loaded.definitions, vec!["def clean(frame): ...".to_owned()]);
        assert_eq!(
            loaded.stages,
            vec![("Idgraph".to_owned(), Duration::from_millis(500))]
        );
    }

    #[test]
    fn reading_a_dead_name_is_an_error() {
        let text = r#"{ "events": [ { "cell": { "source": "x", "runtime_secs": 1.0, "reads": ["ghost"] } } ] }"#;
        let err = SessionFile::parse(text).unwrap().load().unwrap_err();
        assert!(format!("{err:#}").contains("`ghost` is not live"));
    }

    #[test]
    fn negative_runtime_and_unknown_fields_are_rejected() {
        let negative = r#"{ "events": [ { "cell": { "source": "x", "runtime_secs": -1.0 } } ] }"#;
        assert!(SessionFile::parse(negative).unwrap().load().is_err());
        assert!(SessionFile::parse(r#"{ "events": [], "extra": 1 }"#).is_err());
    }
}
