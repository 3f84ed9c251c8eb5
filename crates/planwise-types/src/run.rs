//! Run request envelope and per-year execution records.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::checkpoint::ConfigFingerprint;
use crate::error::StageError;
use crate::stage::WorkflowStage;

/// Opaque simulation run identifier.
///
/// Stable across resume attempts: checkpoints are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as a single storage key segment.
    ///
    /// `%` and `/` are percent-encoded so no run's key prefix can match
    /// another run's keys.
    #[must_use]
    pub fn key_segment(&self) -> String {
        self.0.replace('%', "%25").replace('/', "%2F")
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Returned by [`SimulationRun::new`] when `end_year < start_year`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid year range: end year {end_year} precedes start year {start_year}")]
pub struct InvalidYearRange {
    pub start_year: i32,
    pub end_year: i32,
}

/// A request to simulate `start_year..=end_year`. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationRun {
    run_id: RunId,
    start_year: i32,
    end_year: i32,
    fail_fast: bool,
    config_fingerprint: ConfigFingerprint,
}

impl SimulationRun {
    /// # Errors
    ///
    /// Returns [`InvalidYearRange`] if `end_year < start_year`.
    pub fn new(
        run_id: RunId,
        start_year: i32,
        end_year: i32,
        fail_fast: bool,
        config_fingerprint: ConfigFingerprint,
    ) -> Result<Self, InvalidYearRange> {
        if end_year < start_year {
            return Err(InvalidYearRange {
                start_year,
                end_year,
            });
        }
        Ok(Self {
            run_id,
            start_year,
            end_year,
            fail_fast,
            config_fingerprint,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    #[must_use]
    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    #[must_use]
    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    #[must_use]
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    #[must_use]
    pub fn config_fingerprint(&self) -> &ConfigFingerprint {
        &self.config_fingerprint
    }

    /// Requested years in ascending order.
    #[must_use]
    pub fn years(&self) -> RangeInclusive<i32> {
        self.start_year..=self.end_year
    }

    #[must_use]
    pub fn year_count(&self) -> usize {
        usize::try_from(self.end_year - self.start_year).map_or(0, |span| span + 1)
    }
}

/// Lifecycle of one simulation year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl YearStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for YearStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for YearStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown year status '{other}'")),
        }
    }
}

/// Why a year was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// An earlier year failed and the run continued with `fail_fast = false`.
    PriorYearFailed,
    /// A cancellation signal was observed.
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PriorYearFailed => "prior year failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Execution record for one year of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearState {
    pub year: i32,
    pub status: YearStatus,
    /// Stages completed so far, in execution order.
    pub completed_stages: Vec<WorkflowStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<WorkflowStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
}

impl YearState {
    #[must_use]
    pub fn pending(year: i32) -> Self {
        Self {
            year,
            status: YearStatus::Pending,
            completed_stages: Vec::new(),
            last_checkpoint_id: None,
            skip_reason: None,
            failed_stage: None,
            error: None,
        }
    }

    #[must_use]
    pub fn skipped(year: i32, reason: SkipReason) -> Self {
        Self {
            status: YearStatus::Skipped,
            skip_reason: Some(reason),
            ..Self::pending(year)
        }
    }

    /// Record a completed stage. Stages are appended in order and never repeated.
    pub fn record_stage(&mut self, stage: WorkflowStage, checkpoint_id: Option<String>) {
        if !self.completed_stages.contains(&stage) {
            self.completed_stages.push(stage);
        }
        if checkpoint_id.is_some() {
            self.last_checkpoint_id = checkpoint_id;
        }
    }

    pub fn fail(&mut self, stage: WorkflowStage, error: StageError) {
        self.status = YearStatus::Failed;
        self.failed_stage = Some(stage);
        self.error = Some(error);
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            YearStatus::Completed | YearStatus::Failed | YearStatus::Skipped
        )
    }
}
