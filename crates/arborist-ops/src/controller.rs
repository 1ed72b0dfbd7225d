//! The staged operation pipeline.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arborist_core::{
    Operation, OperationError, OperationKind, OperationState, PipelineConfig, Stage,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backup::BackupManager;
use crate::copy::Copier;
use crate::fs::{FileSystem, StdFs, remove_path};
use crate::progress::{
    BACKED_UP_PROGRESS, COMPLETED_PROGRESS, EXECUTING_CEILING, EXECUTING_PROGRESS, ProgressBand,
    StatePublisher, VALIDATED_PROGRESS,
};
use crate::retry::{RetryError, RetryPolicy};
use crate::validate::validate;

/// Runs one [`Operation`] through validation, backup, execution with
/// retries, and rollback.
///
/// The controller owns the operation's [`OperationState`]; observers get
/// read-only snapshots through [`subscribe`](Self::subscribe) or
/// [`snapshot`](Self::snapshot).
#[derive(Debug)]
pub struct OperationController {
    operation: Operation,
    config: PipelineConfig,
    fs: Arc<dyn FileSystem>,
    state: StatePublisher,
}

impl OperationController {
    /// Create a controller operating on the real filesystem.
    pub fn new(operation: Operation, config: PipelineConfig) -> Self {
        Self::with_filesystem(operation, config, Arc::new(StdFs))
    }

    /// Create a controller that performs its mutations through `fs`.
    pub fn with_filesystem(
        operation: Operation,
        config: PipelineConfig,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        let state = StatePublisher::new(OperationState::new(operation.kind(), config.max_retries));
        Self {
            operation,
            config,
            fs,
            state,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Receive a snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.state.subscribe()
    }

    /// The current state.
    pub fn snapshot(&self) -> OperationState {
        self.state.snapshot()
    }

    /// Run the pipeline to a terminal stage.
    ///
    /// Cancelling `cancel` interrupts the backoff between attempts and stops
    /// further attempts; a backup, if one was taken, is then restored.
    pub async fn execute(&mut self, cancel: &CancellationToken) -> Result<(), OperationError> {
        if self.state.snapshot().stage != Stage::Init {
            return Err(OperationError::AlreadyStarted);
        }

        let result = self.run(cancel).await;

        self.state.update(|state| {
            state.finished = true;
            if let Err(err) = &result {
                state.last_error = Some(err.to_string());
            }
        });
        result
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<(), OperationError> {
        let kind = self.operation.kind();
        let source = self.operation.source().to_path_buf();
        info!(%kind, source = %source.display(), "Starting operation");

        if cancel.is_cancelled() {
            return Err(self.fail(OperationError::Cancelled {
                kind,
                attempts: 0,
                last: None,
            }));
        }

        if let Err(err) = validate(&self.operation) {
            return Err(self.fail(err.into()));
        }
        self.state.enter_at(Stage::Validated, VALIDATED_PROGRESS);

        let backup = if kind.is_destructive() {
            let manager = self.backup_manager();
            let band = self.state.band(VALIDATED_PROGRESS, BACKED_UP_PROGRESS);
            let path = source.clone();
            let created =
                run_blocking(move || manager.create_backup(&path, &mut |p: f64| band.report(p))).await;

            match created {
                Ok(backup) => {
                    self.state.update(|state| state.backup_path = Some(backup.clone()));
                    self.state.enter_at(Stage::BackedUp, BACKED_UP_PROGRESS);
                    Some(backup)
                }
                Err(err) => {
                    return Err(self.fail(OperationError::Backup { path: source, source: err }));
                }
            }
        } else {
            None
        };

        self.state.enter_at(Stage::Executing, EXECUTING_PROGRESS);

        let policy = RetryPolicy::from_config(&self.config);
        let result = policy
            .run(cancel, |attempt| {
                self.state.update(|state| state.retry_count = attempt);
                let mutation = self.mutation();
                run_blocking(move || mutation.apply())
            })
            .await;

        let failure = match result {
            Ok(()) => {
                if let Some(backup) = &backup {
                    if let Err(err) = self.discard(backup).await {
                        // The user's data is intact either way.
                        warn!(backup = %backup.display(), error = %err, "Failed to remove backup");
                    }
                }
                self.state.update(|state| state.backup_path = None);
                self.state.enter_at(Stage::Completed, COMPLETED_PROGRESS);
                info!(%kind, source = %source.display(), "Operation completed");
                return Ok(());
            }
            Err(RetryError::Exhausted { attempts, last }) => OperationError::Execution {
                kind,
                attempts,
                source: last,
            },
            Err(RetryError::Cancelled { attempts, last }) => OperationError::Cancelled {
                kind,
                attempts,
                last,
            },
        };
        let failure = self.fail(failure);

        let Some(backup) = backup else {
            return Err(failure);
        };

        self.rollback(backup, source, failure).await
    }

    /// Reinstate the backup after a failed execution.
    async fn rollback(
        &self,
        backup: PathBuf,
        original: PathBuf,
        failure: OperationError,
    ) -> Result<(), OperationError> {
        let manager = self.backup_manager();
        let (from, to) = (backup.clone(), original.clone());
        match run_blocking(move || manager.restore_backup(&from, &to)).await {
            Ok(()) => {
                self.state.update(|state| state.backup_path = None);
                self.state.enter(Stage::Restored);
                info!(original = %original.display(), "Original state restored from backup");
                Err(OperationError::RolledBack {
                    source: Box::new(failure),
                })
            }
            Err(restore) => {
                error!(
                    original = %original.display(),
                    backup = %backup.display(),
                    error = %restore,
                    "Restore failed, data may be in a partial state"
                );
                Err(OperationError::Restore {
                    backup_path: backup,
                    original_path: original,
                    restore,
                    original: Box::new(failure),
                })
            }
        }
    }

    /// Record `err` and move to `Failed`.
    fn fail(&self, err: OperationError) -> OperationError {
        warn!(kind = %self.operation.kind(), error = %err, "Operation failed");
        self.state.update(|state| state.last_error = Some(err.to_string()));
        self.state.enter(Stage::Failed);
        err
    }

    async fn discard(&self, backup: &Path) -> io::Result<()> {
        let manager = self.backup_manager();
        let backup = backup.to_path_buf();
        run_blocking(move || manager.discard_backup(&backup)).await
    }

    fn backup_manager(&self) -> BackupManager {
        BackupManager::new(Arc::clone(&self.fs), self.config.chunk_size)
    }

    fn mutation(&self) -> Mutation {
        Mutation {
            kind: self.operation.kind(),
            source: self.operation.source().to_path_buf(),
            destination: self.operation.destination().map(Path::to_path_buf),
            is_dir: self.operation.entry().is_dir,
            fs: Arc::clone(&self.fs),
            chunk_size: self.config.chunk_size,
            band: self.state.band(EXECUTING_PROGRESS, EXECUTING_CEILING),
        }
    }
}

/// One attempt's worth of owned inputs for the kind-specific mutation.
struct Mutation {
    kind: OperationKind,
    source: PathBuf,
    destination: Option<PathBuf>,
    is_dir: bool,
    fs: Arc<dyn FileSystem>,
    chunk_size: usize,
    band: ProgressBand,
}

impl Mutation {
    fn apply(&self) -> io::Result<()> {
        match self.kind {
            OperationKind::Move | OperationKind::Rename => {
                self.fs.rename(&self.source, self.destination()?)
            }
            OperationKind::Copy => {
                let destination = self.destination()?;
                let mut on_progress = |p: f64| self.band.report(p);
                let result = Copier::new(self.fs.as_ref(), self.chunk_size, &mut on_progress)
                    .copy(&self.source, destination);

                if let Err(err) = result {
                    // Validation saw no destination, so anything there is ours.
                    if let Err(cleanup) = remove_path(self.fs.as_ref(), destination) {
                        warn!(
                            destination = %destination.display(),
                            error = %cleanup,
                            "Failed to remove partial copy"
                        );
                    }
                    return Err(err);
                }
                Ok(())
            }
            OperationKind::Delete if self.is_dir => self.fs.remove_dir_all(&self.source),
            OperationKind::Delete => self.fs.remove_file(&self.source),
        }
    }

    fn destination(&self) -> io::Result<&Path> {
        self.destination.as_deref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} operation has no destination", self.kind),
            )
        })
    }
}

/// Run blocking filesystem work off the async runtime.
async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::other(format!("Task failed: {e}")))?
}
