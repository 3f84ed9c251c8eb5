//! Interfaces to the external compute collaborators.
//!
//! [`TransformationEngine`] runs every stage, including event generation on
//! the Primary path. [`ColumnarEngine`] is the Secondary event-generation
//! backend; it writes into a [`ScratchArea`] that only becomes visible when
//! published.

use std::time::Duration;

use planwise_types::checkpoint::SnapshotRef;
use planwise_types::error::StageError;
use planwise_types::run::RunId;
use planwise_types::stage::WorkflowStage;

/// Reference to the previous year's final accumulated state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorYearState {
    pub year: i32,
    pub snapshot_ref: SnapshotRef,
}

/// Input handed to a collaborator for one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRequest {
    pub run_id: RunId,
    pub year: i32,
    pub stage: WorkflowStage,
    pub random_seed: u64,
    /// Upper bound on the collaborator's own worker pool.
    pub concurrency: usize,
    /// Output of the preceding stage in the same year, if any.
    pub upstream: Option<SnapshotRef>,
    /// Set only for stages that declare a prior-year dependency.
    pub prior_year: Option<PriorYearState>,
    /// Where this stage's output must be written.
    pub output_ref: SnapshotRef,
}

/// What a successful stage produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub row_count: u64,
    /// Signed so that gates can detect negative headcount defects.
    pub headcount: i64,
    pub total_compensation: f64,
    pub snapshot_ref: SnapshotRef,
}

/// Declarative, transformation-driven compute engine.
pub trait TransformationEngine: Send + Sync {
    /// Execute one stage to completion.
    ///
    /// # Errors
    ///
    /// Returns a structured [`StageError`]; `retryable` marks transient failures.
    fn execute_stage(&self, request: &StageRequest) -> Result<StageOutput, StageError>;
}

/// Input for one Secondary event-generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnarRequest {
    pub run_id: RunId,
    pub year: i32,
    pub random_seed: u64,
    pub concurrency: usize,
    pub upstream: Option<SnapshotRef>,
    pub memory_limit_bytes: Option<u64>,
}

impl ColumnarRequest {
    #[must_use]
    pub fn from_stage_request(request: &StageRequest, memory_limit_bytes: Option<u64>) -> Self {
        Self {
            run_id: request.run_id.clone(),
            year: request.year,
            random_seed: request.random_seed,
            concurrency: request.concurrency,
            upstream: request.upstream.clone(),
            memory_limit_bytes,
        }
    }
}

/// Private output location for one Secondary attempt.
///
/// Every attempt gets its own scratch key, so a detached attempt that
/// outlives its time budget can never write into a later attempt's area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchArea {
    pub scratch_ref: SnapshotRef,
    /// Final location the scratch output is published to.
    pub target_ref: SnapshotRef,
}

impl ScratchArea {
    #[must_use]
    pub fn for_attempt(target_ref: &SnapshotRef, attempt: u64) -> Self {
        Self {
            scratch_ref: SnapshotRef::new(format!("{target_ref}.scratch.{attempt}")),
            target_ref: target_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarOutput {
    pub event_count: u64,
    pub headcount: i64,
    pub total_compensation: f64,
    pub duration: Duration,
    pub peak_memory_bytes: u64,
}

/// Failure of an event-generation backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("resource budget exceeded: {0}")]
    ResourceExhausted(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("backend runtime error: {0}")]
    Runtime(String),
    #[error("generated events failed validation: {0}")]
    ValidationFailure(String),
    #[error("{0}")]
    Stage(StageError),
}

impl BackendError {
    /// Whether a Secondary failure of this kind may fall back to Primary.
    ///
    /// Validation failures indicate a logic defect shared by both backends.
    #[must_use]
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, Self::ValidationFailure(_))
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "BACKEND_UNAVAILABLE",
            Self::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Self::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            Self::Runtime(_) => "BACKEND_RUNTIME",
            Self::ValidationFailure(_) => "EVENT_VALIDATION_FAILED",
            Self::Stage(_) => "STAGE_FAILED",
        }
    }

    /// Convert into the stage error recorded on the year's results.
    #[must_use]
    pub fn into_stage_error(self) -> StageError {
        match self {
            Self::Stage(err) => err,
            Self::ValidationFailure(_) => StageError::validation(self.code(), self.to_string()),
            Self::ResourceExhausted(_)
            | Self::Unavailable(_)
            | Self::SchemaMismatch(_)
            | Self::Runtime(_) => StageError::backend(self.code(), self.to_string()),
        }
    }
}

/// High-throughput in-memory columnar engine.
///
/// Implementations must be safely re-invocable: generating into a scratch
/// area overwrites whatever was left there before.
pub trait ColumnarEngine: Send + Sync {
    /// Generate one year's events into `scratch`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] describing why generation failed.
    fn generate_events(
        &self,
        request: &ColumnarRequest,
        scratch: &ScratchArea,
    ) -> Result<ColumnarOutput, BackendError>;

    /// Atomically make the scratch output visible at its target.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the output cannot be published.
    fn publish(&self, scratch: &ScratchArea) -> Result<(), BackendError>;

    /// Remove everything written to the scratch area.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if cleanup fails.
    fn discard(&self, scratch: &ScratchArea) -> Result<(), BackendError>;
}
