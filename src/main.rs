//! arborist - safe file operations from the command line.
//!
//! Usage:
//!   arborist copy SRC DST            Copy a file or directory
//!   arborist move SRC DST            Move a file or directory
//!   arborist delete PATH             Delete a file or directory
//!   arborist rename PATH NEW_NAME    Rename in place
//!   arborist --help                  Show help

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use arborist_core::{FileEntry, Operation, OperationError, OperationState, Outcome, PipelineConfig};
use arborist_ops::OperationController;

#[derive(Parser)]
#[command(
    name = "arborist",
    version,
    about = "Safe file operations with backup and rollback",
    long_about = "arborist runs one file operation at a time. Destructive operations are \
                  backed up first, failed attempts are retried with backoff, and a failed \
                  operation is rolled back from its backup.\n\n\
                  Press Ctrl-C to cancel; any backup taken is restored."
)]
struct Cli {
    /// Print the final operation state as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Maximum number of execution attempts
    #[arg(long, global = true, value_name = "N")]
    retries: Option<u32>,

    /// Linear backoff step between attempts, in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    backoff_ms: Option<u64>,

    /// Pipeline config file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy a file or directory to a new path
    Copy {
        source: PathBuf,
        destination: PathBuf,
    },

    /// Move a file or directory to a new path
    Move {
        source: PathBuf,
        destination: PathBuf,
    },

    /// Delete a file or directory
    Delete { path: PathBuf },

    /// Rename a file or directory within its parent directory
    Rename { path: PathBuf, new_name: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let operation = build_operation(&cli.command)?;
    let source_size = file_size(operation.source());

    let mut controller = OperationController::new(operation, config);
    let cancel = CancellationToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling...");
                cancel.cancel();
            }
        })
    };
    let progress = tokio::spawn(render_progress(controller.subscribe()));

    let result = controller.execute(&cancel).await;
    let state = controller.snapshot();
    let operation = controller.operation().clone();
    drop(controller);

    interrupt.abort();
    let _ = progress.await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    }
    report(&operation, &state, result.as_ref().err(), source_size);

    Ok(exit_code(state.outcome()))
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Load the pipeline config and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_from(path)
            .wrap_err_with(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::load(),
    };

    if let Some(retries) = cli.retries {
        config.max_retries = retries;
    }
    if let Some(backoff_ms) = cli.backoff_ms {
        config.backoff_step_ms = backoff_ms;
    }
    config.validate().wrap_err("Invalid pipeline configuration")?;

    debug!(?config, "Loaded pipeline config");
    Ok(config)
}

fn build_operation(command: &Command) -> Result<Operation> {
    let operation = match command {
        Command::Copy {
            source,
            destination,
        } => Operation::copy(source, destination, entry_for(source)),
        Command::Move {
            source,
            destination,
        } => Operation::move_to(source, destination, entry_for(source)),
        Command::Delete { path } => Operation::delete(path, entry_for(path)),
        Command::Rename { path, new_name } => Operation::rename(path, new_name, entry_for(path))
            .wrap_err_with(|| format!("Cannot rename {}", path.display()))?,
    };
    Ok(operation)
}

/// Describe the selected path. A missing path is left for validation to report.
fn entry_for(path: &Path) -> FileEntry {
    FileEntry::from_path(path).unwrap_or_else(|_| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        FileEntry::new(name, false)
    })
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::symlink_metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// Redraw a one-line status on stderr until the operation finishes.
async fn render_progress(mut rx: watch::Receiver<OperationState>) {
    let mut stderr = std::io::stderr();

    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if state.finished {
            break;
        }
        write!(
            stderr,
            "\r\x1b[2K[{:>5.1}%] {}",
            state.progress,
            state.status_message()
        )
        .ok();
        stderr.flush().ok();
    }

    write!(stderr, "\r\x1b[2K").ok();
    stderr.flush().ok();
}

/// Print the terminal outcome in words.
fn report(
    operation: &Operation,
    state: &OperationState,
    error: Option<&OperationError>,
    source_size: Option<u64>,
) {
    let seconds = state.elapsed().num_milliseconds() as f64 / 1000.0;

    match state.outcome() {
        Outcome::Completed => {
            let target = operation
                .destination()
                .map(|d| format!(" -> {}", d.display()))
                .unwrap_or_default();
            let size = source_size
                .map(|bytes| format!(" ({})", format_size(bytes)))
                .unwrap_or_default();
            eprintln!(
                "{}: {}{}{} in {:.2}s",
                state.status_message(),
                operation.source().display(),
                target,
                size,
                seconds
            );
        }
        Outcome::FailedUnchanged => {
            print_error(error, state);
            eprintln!("Nothing was changed.");
        }
        Outcome::Restored => {
            print_error(error, state);
            eprintln!(
                "{} was restored from its backup after {} attempt(s).",
                operation.source().display(),
                state.retry_count
            );
        }
        Outcome::FailedUnrecovered => {
            print_error(error, state);
            if let Some(backup) = &state.backup_path {
                eprintln!(
                    "{} may be incomplete. The backup was kept at {}; restore it by hand.",
                    operation.source().display(),
                    backup.display()
                );
            }
        }
        Outcome::InProgress => {
            eprintln!("{}", state.status_message());
        }
    }
}

fn print_error(error: Option<&OperationError>, state: &OperationState) {
    match (error, &state.last_error) {
        (Some(err), _) => eprintln!("Error: {err}"),
        (None, Some(message)) => eprintln!("Error: {message}"),
        (None, None) => eprintln!("Error: {}", state.status_message()),
    }
}

fn exit_code(outcome: Outcome) -> ExitCode {
    match outcome {
        Outcome::Completed => ExitCode::SUCCESS,
        Outcome::FailedUnchanged | Outcome::InProgress => ExitCode::from(1),
        Outcome::Restored => ExitCode::from(2),
        Outcome::FailedUnrecovered => ExitCode::from(3),
    }
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
