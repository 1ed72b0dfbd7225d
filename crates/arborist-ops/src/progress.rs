//! Publishing operation state to observers.

use std::sync::Arc;

use arborist_core::{OperationState, Stage};
use tokio::sync::watch;
use tracing::debug;

/// Progress once permissions are validated.
pub const VALIDATED_PROGRESS: f64 = 25.0;
/// Progress once the backup exists.
pub const BACKED_UP_PROGRESS: f64 = 50.0;
/// Progress when execution starts.
pub const EXECUTING_PROGRESS: f64 = 75.0;
/// Highest progress reachable before completion.
pub const EXECUTING_CEILING: f64 = 99.0;
/// Progress on completion.
pub const COMPLETED_PROGRESS: f64 = 100.0;

/// Owner of the live [`OperationState`].
///
/// Every change is published as a fresh snapshot to subscribers.
#[derive(Debug, Clone)]
pub(crate) struct StatePublisher {
    tx: Arc<watch::Sender<OperationState>>,
}

impl StatePublisher {
    pub fn new(initial: OperationState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> OperationState {
        self.tx.borrow().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut OperationState)) {
        self.tx.send_modify(f);
    }

    /// Move to `stage`, keeping the current progress.
    pub fn enter(&self, stage: Stage) {
        self.transition(stage, None);
    }

    /// Move to `stage` and raise progress to at least `progress`.
    pub fn enter_at(&self, stage: Stage, progress: f64) {
        self.transition(stage, Some(progress));
    }

    fn transition(&self, stage: Stage, progress: Option<f64>) {
        self.tx.send_modify(|state| {
            debug_assert!(
                state.stage.can_advance_to(stage),
                "illegal stage transition {} -> {}",
                state.stage,
                stage
            );
            debug!(kind = %state.kind, from = %state.stage, to = %stage, "Stage transition");
            state.stage = stage;
            if let Some(progress) = progress {
                state.progress = state.progress.max(progress);
            }
        });
    }

    /// A reporter mapping 0..=100 into `start..=end` of overall progress.
    pub fn band(&self, start: f64, end: f64) -> ProgressBand {
        ProgressBand {
            tx: Arc::clone(&self.tx),
            start,
            end,
        }
    }
}

/// Maps a sub-task's percentage into one slice of overall progress.
///
/// Only increases are published, so progress never moves backwards even
/// when a retried copy starts over.
#[derive(Debug, Clone)]
pub(crate) struct ProgressBand {
    tx: Arc<watch::Sender<OperationState>>,
    start: f64,
    end: f64,
}

impl ProgressBand {
    pub fn report(&self, percent: f64) {
        let value = self.start + (self.end - self.start) * percent.clamp(0.0, 100.0) / 100.0;
        self.tx.send_if_modified(|state| {
            if value > state.progress {
                state.progress = value;
                true
            } else {
                false
            }
        });
    }
}
