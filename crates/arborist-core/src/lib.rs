//! Core types for arborist.
//!
//! This crate provides the data model shared by the file-operation pipeline
//! and its callers: operation requests, the observable per-operation state,
//! the error taxonomy, and pipeline configuration.

mod config;
mod error;
mod operation;
mod state;

pub use config::{
    DEFAULT_BACKOFF_STEP_MS, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES, PipelineConfig,
    PipelineConfigBuilder,
};
pub use error::{ConfigError, FailureKind, OperationError, PermissionError};
pub use operation::{FileEntry, Operation, OperationKind, validate_filename};
pub use state::{OperationState, Outcome, Stage};
