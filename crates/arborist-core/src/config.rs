//! Pipeline configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Default number of execution attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff step: attempt `n` is followed by an `n * step` pause.
pub const DEFAULT_BACKOFF_STEP_MS: u64 = 1000;

/// Default chunk size for streamed file copies.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Configuration for the file-operation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct PipelineConfig {
    /// Maximum number of execution attempts.
    #[builder(default = "DEFAULT_MAX_RETRIES")]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff step in milliseconds.
    #[builder(default = "DEFAULT_BACKOFF_STEP_MS")]
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,

    /// Chunk size for streamed copies, in bytes.
    #[builder(default = "DEFAULT_CHUNK_SIZE")]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_step_ms() -> u64 {
    DEFAULT_BACKOFF_STEP_MS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn check(max_retries: u32, chunk_size: usize) -> Result<(), String> {
    if max_retries == 0 {
        return Err("max_retries must be at least 1".to_string());
    }
    if chunk_size == 0 {
        return Err("chunk_size must be greater than 0".to_string());
    }
    Ok(())
}

impl PipelineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        check(
            self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
        )
    }
}

impl PipelineConfig {
    /// Create a new pipeline config builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// The linear backoff step.
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    /// Check the invariants the builder enforces, for deserialized values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check(self.max_retries, self.chunk_size).map_err(|message| ConfigError::Invalid { message })
    }

    /// Get the default config file path.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("arborist").join("pipeline.toml"))
    }

    /// Load the config from the default location, or return defaults.
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    /// Load and validate the config at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save the config to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save the config to `path`, creating parent directories if needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;

        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_step_ms: DEFAULT_BACKOFF_STEP_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
