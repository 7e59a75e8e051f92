//! Setforge - assembles generated card sets
//!
//! Command line entry point.
//!
//! # Overview
//!
//! The binary wires the library together:
//! - Logging infrastructure (file rotation + optional console output)
//! - Configuration loading ([`ConfigManager`]: `setforge.yaml` + `SETFORGE__*` env)
//! - State management ([`StateManager`]) fed by a single [`Multiplexer`]
//! - The generator HTTP client and, with `--push`, the push channel
//!
//! # Execution Flow
//!
//! 1. Load configuration, initialize logging
//! 2. Spawn the multiplexer and a progress reporter
//! 3. Load the skeleton for the requested variant
//! 4. Run the subcommand (`skeleton`, `generate` or `slot`)
//! 5. Optionally export the collection, then shut channels down and log metrics

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use setforge::models::{ConnectionHealth, SetVariant};
use setforge::services::export::{self, ExportFormat};
use setforge::services::{
    ConnectionHandle, ConnectionManager, GeneratorClient, Multiplexer, ReconnectPolicy, Session,
    WebSocketTransport,
};
use setforge::{APP_NAME, ConfigManager, Metrics, StateChange, StateManager, VERSION};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

#[derive(Parser, Debug)]
#[command(name = "setforge")]
#[command(about = "Assemble a generated card set from the generator's delivery channels")]
#[command(version)]
struct Cli {
    /// Directory containing setforge.yaml
    #[arg(long, default_value = "setforge", env = "SETFORGE_CONFIG_DIR")]
    config_dir: Utf8PathBuf,

    /// Log at debug level regardless of the config file
    #[arg(long)]
    debug: bool,

    /// Export the collection when the command finishes (json, csv or cockatrice)
    #[arg(long, value_name = "FORMAT")]
    export: Option<ExportFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the slot counts of a skeleton
    Skeleton {
        #[arg(long, value_enum, default_value_t = VariantArg::Full)]
        variant: VariantArg,
    },

    /// Generate a whole set
    Generate {
        #[arg(long)]
        theme: String,

        #[arg(long, value_enum, default_value_t = VariantArg::Full)]
        variant: VariantArg,

        #[arg(long, value_enum, default_value_t = ModeArg::Stream)]
        mode: ModeArg,

        /// Also listen on the push channel
        #[arg(long)]
        push: bool,
    },

    /// Generate the item for one slot
    Slot {
        #[arg(long)]
        theme: String,

        #[arg(long, value_enum, default_value_t = VariantArg::Full)]
        variant: VariantArg,

        slot_id: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VariantArg {
    Full,
    Commons,
}

impl From<VariantArg> for SetVariant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Full => SetVariant::Full,
            VariantArg::Commons => SetVariant::Commons,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    /// Incremental streaming response
    Stream,
    /// Batched bulk request
    Bulk,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let config = config_manager.load()?;

    let mut log_settings = config.logging.clone();
    log_settings.debug |= cli.debug;
    let _log_guard = setforge::logging::setup_logging(&log_settings)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let metrics = Arc::new(Metrics::new());
    let state = StateManager::with_metrics(metrics.clone());
    state.set_diagnostics_capacity(config.diagnostics_capacity);

    let (sink, mux_task) = Multiplexer::new(state.clone(), config.highlight.duration()).spawn();
    let reporter = tokio::spawn(report_progress(state.subscribe(), metrics.clone()));

    let client = GeneratorClient::new(&config.server.base_url, config.server.request_timeout())
        .context("Failed to create generator client")?;
    let session = Session::new(Arc::new(client), state.clone(), sink.clone());

    let mut connection: Option<ConnectionHandle> = None;

    let outcome = async {
        match &cli.command {
            Command::Skeleton { variant } => {
                session.load_skeleton((*variant).into()).await?;
                let skeleton = state.read(|s| s.skeleton.clone());
                for (category, slots) in skeleton.summary() {
                    println!("{:<16} {:>4}", category, slots);
                }
                println!("{:<16} {:>4}", "total", skeleton.total_slots());
            }

            Command::Generate {
                theme,
                variant,
                mode,
                push,
            } => {
                session.load_skeleton((*variant).into()).await?;

                if *push {
                    let transport = WebSocketTransport::new(&config.server.push_url)?;
                    let handle = ConnectionManager::spawn(
                        transport,
                        ReconnectPolicy::from(&config.reconnect),
                        sink.clone(),
                        metrics.clone(),
                    );
                    tokio::spawn(report_health(handle.subscribe_health()));
                    connection = Some(handle);
                }

                let run = match mode {
                    ModeArg::Stream => session.start_stream(theme),
                    ModeArg::Bulk => session.start_batched(theme),
                };

                tokio::select! {
                    progress = session.wait_for_run(run) => {
                        println!(
                            "{}: {}/{} slots ({}%)",
                            theme,
                            progress.completed,
                            progress.total,
                            progress.percentage()
                        );
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::warn!("Interrupted, keeping {} completed slots", state.progress().completed);
                    }
                }
            }

            Command::Slot {
                theme,
                variant,
                slot_id,
            } => {
                session.load_skeleton((*variant).into()).await?;
                state.set_theme(theme);
                let item = session.generate_slot(theme, slot_id).await?;
                println!("{}: {} {} ({})", slot_id, item.name, item.cost, item.item_type);
            }
        }
        anyhow::Ok(())
    }
    .await;

    let outcome = export_after(outcome, cli.export, &state, Utf8Path::new(&config.export.dir));

    // Shutdown: push channel first, then drain the multiplexer
    if let Some(connection) = connection {
        connection.shutdown().await;
    }
    drop(session);
    drop(sink);
    if tokio::time::timeout(Duration::from_secs(5), mux_task).await.is_err() {
        tracing::warn!("Multiplexer did not drain within 5s");
    }
    reporter.abort();

    metrics.log_summary();
    tracing::info!("Shutdown complete");

    outcome
}

/// Export once a command succeeded. A failed export becomes the outcome
/// rather than returning early, so shutdown still runs.
fn export_after(
    outcome: Result<()>,
    format: Option<ExportFormat>,
    state: &StateManager,
    dir: &Utf8Path,
) -> Result<()> {
    match (outcome, format) {
        (Ok(()), Some(format)) => {
            let path = write_export(state, format, dir)?;
            println!("Exported {}", path);
            Ok(())
        }
        (outcome, _) => outcome,
    }
}

fn write_export(state: &StateManager, format: ExportFormat, dir: &Utf8Path) -> Result<Utf8PathBuf> {
    let (collection, theme) = state.read(|s| (s.collection.clone(), s.theme.clone()));
    let artifact = export::export(&collection, &theme, format)?;

    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create export directory: {}", dir))?;
    let path = dir.join(&artifact.filename);
    std::fs::write(&path, &artifact.bytes).with_context(|| format!("Failed to write export: {}", path))?;

    tracing::info!("Wrote {} export to {}", format, path);
    Ok(path)
}

async fn report_progress(mut changes: broadcast::Receiver<StateChange>, metrics: Arc<Metrics>) {
    loop {
        match changes.recv().await {
            Ok(StateChange::ProgressUpdated { completed, total }) => {
                tracing::info!(completed, total, "Progress {}/{}", completed, total);
            }
            Ok(StateChange::BatchCompleted(batch)) => {
                tracing::info!(
                    "Batch {}/{} finished in {:.1}s ({}/{} cards)",
                    batch.batch_index,
                    batch.batch_count,
                    batch.batch_duration.as_secs_f64(),
                    batch.cards_completed,
                    batch.cards_total
                );
                metrics.log_periodic();
            }
            Ok(StateChange::RunFinished { run, progress }) => {
                tracing::info!(%run, "Run finished at {}%", progress.percentage());
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::debug!(missed, "Progress reporter lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn report_health(mut health: watch::Receiver<ConnectionHealth>) {
    while health.changed().await.is_ok() {
        let current = health.borrow_and_update().clone();
        match &current.last_error {
            Some(error) => tracing::warn!(
                state = ?current.state,
                attempts = current.reconnect_attempts,
                "Push channel: {}",
                error
            ),
            None => tracing::info!(state = ?current.state, "Push channel health changed"),
        }
    }
}
