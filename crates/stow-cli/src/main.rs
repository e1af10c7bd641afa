// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `stow`: offline tooling for Stow checkpoints.
//!
//! - `plan` runs profiling and selection over a recorded session file and
//!   prints the partition without writing an artifact.
//! - `inspect` prints the groups and replay order of an artifact.
//! - `verify` checks an artifact's framing and digest.
//! - `config` shows or initializes the persisted checkpoint settings.
#![allow(clippy::print_stdout)]

mod render;
mod session_file;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use stow_app_core::config::ConfigService;
use stow_app_core::settings::SETTINGS_KEY;
use stow_app_core::CheckpointSettings;
use stow_checkpoint::{
    read_artifact, verify_artifact, AppendFileSink, CheckpointOptions, Checkpointer,
};
use stow_config_fs::FsConfigStore;
use stow_core::{CostModel, DiagnosticsSink, NullSink, TypeDenylist};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::render::PlanView;
use crate::session_file::SessionFile;

#[derive(Parser)]
#[command(name = "stow")]
#[command(about = "Plan, inspect and verify Stow checkpoints")]
struct Cli {
    /// Directory holding `checkpoint.json` (defaults to the user config dir)
    #[arg(long, global = true)]
    config_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Choose what to migrate for a recorded session, without writing
    Plan {
        /// Path to a session JSON file
        session: PathBuf,
        /// Strategy name (overrides settings)
        #[arg(long)]
        optimizer: Option<String>,
        /// Migration bandwidth in bytes per second (overrides settings)
        #[arg(long)]
        bandwidth: Option<u64>,
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },
    /// Print the contents of an artifact
    Inspect {
        /// Path to the artifact
        artifact: PathBuf,
    },
    /// Check an artifact's framing and digest
    Verify {
        /// Path to the artifact
        artifact: PathBuf,
    },
    /// Show or initialize checkpoint settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings as JSON
    Show,
    /// Write default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
}

fn open_store(root: Option<&Path>) -> Result<FsConfigStore> {
    let store = match root {
        Some(root) => FsConfigStore::with_root(root),
        None => FsConfigStore::new(),
    };
    store.context("failed to open config store")
}

fn load_settings(store: &FsConfigStore) -> Result<CheckpointSettings> {
    let service = ConfigService::new(store.clone());
    CheckpointSettings::load(&service).context("failed to load checkpoint settings")
}

fn cmd_plan(
    store: &FsConfigStore,
    session: &Path,
    optimizer: Option<String>,
    bandwidth: Option<u64>,
    format: Format,
) -> Result<()> {
    let settings = load_settings(store)?;
    let text = std::fs::read_to_string(session)
        .with_context(|| format!("failed to read {}", session.display()))?;
    let mut loaded = SessionFile::parse(&text)?.load()?;

    let options = CheckpointOptions {
        optimizer: optimizer.unwrap_or_else(|| settings.optimizer.clone()),
        cost: CostModel::new(bandwidth.unwrap_or(settings.bandwidth_bytes_per_sec)),
        denylist: TypeDenylist::new(settings.type_denylist.iter().cloned()),
        definitions: std::mem::take(&mut loaded.definitions),
    };
    let mut null = NullSink;
    let mut file_sink;
    let sink: &mut dyn DiagnosticsSink = match &settings.diagnostics_dir {
        Some(dir) => {
            file_sink = AppendFileSink::new(dir, &settings.session_label, &options.optimizer);
            info!(path = %file_sink.path().display(), "appending stage diagnostics");
            &mut file_sink
        }
        None => &mut null,
    };

    let mut checkpointer = Checkpointer::new(options).with_sink(sink);
    for (name, elapsed) in loaded.stages.drain(..) {
        checkpointer.record_host_stage(name, elapsed);
    }
    let planned = checkpointer
        .plan(
            &mut loaded.graph,
            &loaded.sizes,
            &loaded.fingerprints,
            &|bytes: &u64| *bytes,
        )
        .context("planning failed")?;

    match format {
        Format::Table => println!("{}", render::plan_tables(&loaded.graph, &planned)?),
        Format::Json => {
            let view = PlanView::new(&loaded.graph, &planned)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }
    Ok(())
}

fn cmd_config(store: &FsConfigStore, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = load_settings(store)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Init { force } => {
            let path = store.path_for(SETTINGS_KEY)?;
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            let service = ConfigService::new(store.clone());
            CheckpointSettings::default()
                .save(&service)
                .context("failed to save checkpoint settings")?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Plan {
            session,
            optimizer,
            bandwidth,
            format,
        } => {
            let store = open_store(cli.config_root.as_deref())?;
            cmd_plan(&store, &session, optimizer, bandwidth, format)?;
        }
        Commands::Inspect { artifact } => {
            let loaded = read_artifact(&artifact)
                .with_context(|| format!("failed to read {}", artifact.display()))?;
            println!("{}", render::artifact_tables(&loaded));
        }
        Commands::Verify { artifact } => {
            let summary = verify_artifact(&artifact)
                .with_context(|| format!("{} failed verification", artifact.display()))?;
            println!("{}", render::summary_line(&summary));
        }
        Commands::Config { action } => {
            let store = open_store(cli.config_root.as_deref())?;
            cmd_config(&store, &action)?;
        }
    }
    Ok(())
}
