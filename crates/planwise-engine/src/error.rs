//! Pipeline error model and retry backoff policy helpers.

use std::time::Duration;

use planwise_types::error::{BackoffClass, StageError};
use planwise_types::stage::WorkflowStage;

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

/// Run-fatal pipeline error.
///
/// Failures local to one simulation year never surface here: they travel as
/// a [`StageError`] on that year's stage results and are handled according
/// to `fail_fast`.
///
/// `Infrastructure` wraps host-side failures (state backend I/O, task
/// panics) and is never retried.
///
/// `RunOrder` is raised when a stage that reads the prior year's state
/// would start before that year completed.
#[derive(Debug)]
pub enum PipelineError {
    /// Infrastructure error (checkpoint store, snapshot store, runtime).
    Infrastructure(anyhow::Error),
    /// Year sequencing was violated.
    RunOrder {
        year: i32,
        stage: WorkflowStage,
        prior_year: i32,
    },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Infrastructure(e) => write!(f, "{e:#}"),
            Self::RunOrder {
                year,
                stage,
                prior_year,
            } => write!(
                f,
                "stage '{stage}' of year {year} requires prior year {prior_year} to be completed"
            ),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<planwise_state::StateError> for PipelineError {
    fn from(e: planwise_state::StateError) -> Self {
        Self::Infrastructure(anyhow::Error::new(e))
    }
}

/// Compute retry delay based on error hints and attempt number.
pub(crate) fn compute_backoff(err: &StageError, attempt: u32) -> Duration {
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms);
    }

    let base_ms: u64 = match err.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let exponent = attempt.saturating_sub(1).min(16);
    let delay_ms = base_ms.saturating_mul(2u64.pow(exponent));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}
