//! Local History - timestamped revisions of workspace files.
//!
//! This binary records, lists, compares and restores revisions of the files
//! in a workspace.
//!
//! # Commands
//!
//! - `local-history watch`: Record a revision whenever a file is saved
//! - `local-history record <file>`: Record a file's current contents
//! - `local-history list <file>`: List the revisions of a file
//! - `local-history show <revision>`: Print a revision
//! - `local-history current <path>`: Print the workspace file a revision belongs to
//! - `local-history diff <revision>`: Compare a revision with another state
//! - `local-history restore <revision>`: Put a revision back into the workspace
//! - `local-history purge`: Delete revisions older than the retention window
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use local_history::config::Config;
use local_history::service::HistoryService;
use local_history::store::RecordOutcome;
use local_history::watcher::{WatchEvent, WorkspaceWatcher};

/// Capacity of the channel between the watcher and the main loop.
const WATCH_CHANNEL_CAPACITY: usize = 1000;

/// Label format for revision timestamps.
const LABEL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local History - timestamped revisions of workspace files.
///
/// Keeps a copy of every saved file under a `.history` tree so earlier
/// states can be listed, compared and restored.
#[derive(Parser, Debug)]
#[command(name = "local-history")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    LOCAL_HISTORY_PATH                      Directory for .history/<workspace> (default: inside workspace)
    LOCAL_HISTORY_DAYS_LIMIT                Days to keep revisions, 0 keeps forever (default: 30)
    LOCAL_HISTORY_MAX_DISPLAY               Revisions listed, 0 lists all (default: 10)
    LOCAL_HISTORY_EXCLUDE                   Glob of files never recorded
    LOCAL_HISTORY_ENABLED                   Turn recording on or off (default: true)
    LOCAL_HISTORY_SNAPSHOT_MAX_BYTES        Largest file snapshotted by 'watch' (default: 1048576)
    LOCAL_HISTORY_SNAPSHOT_MAX_TOTAL_BYTES  Memory budget of the 'watch' snapshot (default: 67108864)
    LOCAL_HISTORY_DEBOUNCE_MS               Quiet period before a write counts as a save (default: 250)

EXAMPLES:
    # Record revisions while you work
    local-history watch

    # Show the last revisions of a file
    local-history list src/main.rs

    # Compare a revision with the file as it is now
    local-history diff .history/src/main_20230601101530.rs
")]
struct Cli {
    /// Workspace root.
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Watch the workspace and record a revision on every save.
    Watch,

    /// Record the current contents of a file as a revision.
    Record {
        /// File to record.
        file: PathBuf,
    },

    /// List the revisions of a file, newest first.
    List {
        /// Workspace file, or any of its revisions.
        file: PathBuf,

        /// List every revision instead of the newest `maxDisplay`.
        #[arg(short, long)]
        all: bool,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the contents of a revision.
    Show {
        /// Revision file.
        revision: PathBuf,
    },

    /// Print the workspace file a revision belongs to.
    Current {
        /// Revision file.
        path: PathBuf,
    },

    /// Compare a revision with the current file, another file, or the
    /// previous revision.
    Diff {
        /// Revision file.
        revision: PathBuf,

        /// Compare with this file instead of the current workspace file.
        #[arg(long, conflicts_with = "previous")]
        with: Option<PathBuf>,

        /// Compare with the revision captured just before this one.
        #[arg(long)]
        previous: bool,
    },

    /// Write a revision back over its workspace file.
    Restore {
        /// Revision file.
        revision: PathBuf,
    },

    /// Delete revisions older than the retention window.
    Purge,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Command::Watch));

    let config = Config::load(&cli.workspace).context("Failed to load configuration")?;
    let mut service = HistoryService::new(config).context("Failed to initialize history")?;

    match cli.command {
        Command::Watch => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_watch(service))
        }
        Command::Record { file } => run_record(&mut service, &resolve(&file)),
        Command::List { file, all, json } => run_list(&service, &resolve(&file), all, json),
        Command::Show { revision } => run_show(&resolve(&revision)),
        Command::Current { path } => {
            println!("{}", service.find_current(&resolve(&path)).display());
            Ok(())
        }
        Command::Diff {
            revision,
            with,
            previous,
        } => run_diff(&service, &resolve(&revision), with.as_deref(), previous),
        Command::Restore { revision } => run_restore(&mut service, &resolve(&revision)),
        Command::Purge => {
            let deleted = service.purge_all().context("Failed to purge history")?;
            for path in &deleted {
                println!("{}", service.label(path));
            }
            eprintln!("Deleted {} revision(s)", deleted.len());
            Ok(())
        }
    }
}

async fn run_watch(mut service: HistoryService) -> Result<()> {
    let root = service.config().workspace_root.clone();
    let history_root = service.layout().history_root().to_path_buf();

    info!(
        root = %root.display(),
        history_root = %history_root.display(),
        days_limit = service.config().days_limit,
        "Starting Local History"
    );

    if !service.config().enabled {
        warn!("Recording is disabled, saves will be ignored");
    }

    tokio::task::block_in_place(|| service.snapshot_unrecorded());

    let (watch_tx, mut watch_rx) = mpsc::channel::<WatchEvent>(WATCH_CHANNEL_CAPACITY);
    let _watcher = WorkspaceWatcher::new(
        &root,
        &history_root,
        service.exclude().clone(),
        service.config().debounce,
        watch_tx,
    )
    .with_context(|| format!("Failed to initialize file watcher for {}", root.display()))?;

    info!("Watching for saves. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                break;
            }

            Some(watch_event) = watch_rx.recv() => {
                record_blocking(&mut service, watch_event);
            }
        }
    }

    info!(tracked_files = service.tracked_files(), "Local History stopped");
    Ok(())
}

/// Handles a watch event without stalling the runtime; recording reads and
/// writes files synchronously.
fn record_blocking(service: &mut HistoryService, watch_event: WatchEvent) {
    tokio::task::block_in_place(|| process_watch_event(service, watch_event));
}

fn process_watch_event(service: &mut HistoryService, watch_event: WatchEvent) {
    match watch_event {
        WatchEvent::Saved(path) => {
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "File vanished before it could be read");
                    return;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read saved file");
                    return;
                }
            };

            match service.did_save(&path, &bytes) {
                Ok(RecordOutcome::Recorded(report)) => {
                    if let Some(original) = &report.original {
                        info!(path = %service.label(original), "Saved original");
                    }
                    if let Some(revision) = &report.revision {
                        info!(path = %service.label(revision), "Saved revision");
                    }
                    if !report.purged.is_empty() {
                        info!(count = report.purged.len(), "Purged old revisions");
                    }
                }
                Ok(outcome) => {
                    debug!(path = %path.display(), outcome = ?outcome, "Save not recorded");
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to record revision");
                }
            }
        }

        WatchEvent::Removed(path) => {
            debug!(path = %path.display(), "File removed");
        }
    }
}

fn run_record(service: &mut HistoryService, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let outcome = service
        .did_save(file, &bytes)
        .with_context(|| format!("Failed to record {}", file.display()))?;
    report_outcome(service, file, outcome)
}

fn run_list(service: &HistoryService, file: &Path, all: bool, json: bool) -> Result<()> {
    let mut revisions = service
        .find_all_history(file, all)
        .with_context(|| format!("Failed to list history of {}", file.display()))?;
    revisions.reverse();

    if json {
        let out = serde_json::to_string_pretty(&revisions)?;
        println!("{out}");
        return Ok(());
    }

    if revisions.is_empty() {
        eprintln!("No history for {}", service.label(file));
        return Ok(());
    }

    for revision in &revisions {
        println!(
            "{}  {}",
            revision.stamp.naive().format(LABEL_FORMAT),
            service.label(&revision.path)
        );
    }
    Ok(())
}

fn run_show(revision: &Path) -> Result<()> {
    let bytes =
        std::fs::read(revision).with_context(|| format!("Failed to read {}", revision.display()))?;
    io::stdout().write_all(&bytes)?;
    Ok(())
}

fn run_diff(
    service: &HistoryService,
    revision: &Path,
    with: Option<&Path>,
    previous: bool,
) -> Result<()> {
    let (old, new) = if previous {
        let Some(prev) = service
            .previous_revision(revision)
            .with_context(|| format!("Failed to read history of {}", revision.display()))?
        else {
            bail!("{} is the oldest revision", service.label(revision));
        };
        (prev.path, revision.to_path_buf())
    } else {
        let other = match with {
            Some(path) => resolve(path),
            None => service.find_current(revision),
        };
        (revision.to_path_buf(), other)
    };

    let diff = service.compare(&old, &new)?;
    print!("{diff}");
    Ok(())
}

fn run_restore(service: &mut HistoryService, revision: &Path) -> Result<()> {
    let outcome = service
        .restore(revision)
        .with_context(|| format!("Failed to restore {}", revision.display()))?;
    let target = service.find_current(revision);
    println!("Restored {}", service.label(&target));
    report_outcome(service, &target, outcome)
}

fn report_outcome(service: &HistoryService, file: &Path, outcome: RecordOutcome) -> Result<()> {
    match outcome {
        RecordOutcome::Recorded(report) => {
            if let Some(original) = &report.original {
                println!("{}", service.label(original));
            }
            if let Some(revision) = &report.revision {
                println!("{}", service.label(revision));
            }
            if let Some(first) = report.failures.into_iter().next() {
                return Err(first).context("Some revisions could not be written");
            }
            Ok(())
        }
        RecordOutcome::Disabled => {
            eprintln!("Recording is disabled");
            Ok(())
        }
        RecordOutcome::Excluded => {
            eprintln!("{} is excluded from history", service.label(file));
            Ok(())
        }
        RecordOutcome::Untrackable => bail!("{} is not inside the workspace", file.display()),
    }
}

/// Makes a command-line path absolute and resolves symlinks when it exists.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Initializes logging to stderr; the daemon defaults to `info`, one-shot
/// commands to `warn`.
fn init_logging(daemon: bool) {
    let default = if daemon { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
