//! Bounded retries with linear backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use arborist_core::PipelineConfig;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a retried action gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed. Carries the last failure.
    #[error("failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },

    /// The token was cancelled before an attempt succeeded.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    /// Number of attempts that were made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
        }
    }
}

/// How many times to try, and how long to wait in between.
///
/// After the n-th failed attempt the executor sleeps `n * step` before the
/// next one; there is no sleep after the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    step: Duration,
}

impl RetryPolicy {
    /// Create a policy. At least one attempt is always made.
    pub fn new(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            step,
        }
    }

    /// Build the policy described by a pipeline config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_retries, config.backoff_step())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step * attempt
    }

    /// Run `action` until it succeeds, attempts run out, or `cancel` fires.
    ///
    /// `action` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut action: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last = None;

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts: attempt - 1,
                    last,
                });
            }

            debug!(attempt, max = self.max_attempts, "Starting attempt");
            let err = match action(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            warn!(attempt, max = self.max_attempts, error = %err, "Attempt failed");

            if attempt == self.max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            last = Some(err);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt, last });
                }
                _ = tokio::time::sleep(self.delay_after(attempt)) => {}
            }
        }

        // max_attempts >= 1, so the loop always returns.
        Err(RetryError::Cancelled {
            attempts: self.max_attempts,
            last,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
