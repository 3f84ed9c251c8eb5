//! Run and year summaries returned by the orchestrator.

use planwise_types::checkpoint::ConfigFingerprint;
use planwise_types::metrics::{EventGenerationMetrics, EventGenerationMode};
use planwise_types::run::{RunId, SimulationRun, SkipReason, YearState, YearStatus};
use planwise_types::stage::{StageResult, WorkflowStage};
use serde::Serialize;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every requested year completed.
    Success,
    /// A year failed and later years were skipped (`fail_fast = false`).
    PartialSuccess,
    /// A year failed and the run halted (`fail_fast = true`).
    Failure,
    /// The run was cancelled before every year finished.
    Cancelled,
}

impl RunOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final record of one year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearSummary {
    pub year: i32,
    pub status: YearStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<WorkflowStage>,
    /// Human-readable error for failed years.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last checkpointed stage this invocation resumed after.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<WorkflowStage>,
    /// Backend that actually produced the year's events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_mode: Option<EventGenerationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_metrics: Option<EventGenerationMetrics>,
    pub total_events: u64,
    pub duration_secs: f64,
    pub stage_results: Vec<StageResult>,
}

impl YearSummary {
    /// Entry for a year that was never started.
    #[must_use]
    pub fn skipped(year: i32, reason: SkipReason) -> Self {
        Self {
            year,
            status: YearStatus::Skipped,
            skip_reason: Some(reason),
            failed_stage: None,
            error: None,
            resumed_from: None,
            event_mode: None,
            event_metrics: None,
            total_events: 0,
            duration_secs: 0.0,
            stage_results: Vec::new(),
        }
    }

    pub(crate) fn from_year_state(state: &YearState) -> Self {
        Self {
            year: state.year,
            status: state.status,
            skip_reason: state.skip_reason,
            failed_stage: state.failed_stage,
            error: state.error.as_ref().map(ToString::to_string),
            resumed_from: None,
            event_mode: None,
            event_metrics: None,
            total_events: 0,
            duration_secs: 0.0,
            stage_results: Vec::new(),
        }
    }

    #[must_use]
    pub fn fallback_used(&self) -> bool {
        self.event_metrics.as_ref().is_some_and(|m| m.fallback_used)
    }
}

/// Structured result of `execute`, one entry per year reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub start_year: i32,
    pub end_year: i32,
    pub fail_fast: bool,
    pub config_fingerprint: ConfigFingerprint,
    pub outcome: RunOutcome,
    /// Stale checkpoints forced a restart from `start_year`.
    pub restarted_stale: bool,
    pub years: Vec<YearSummary>,
    pub total_events: u64,
    pub fallback_count: u32,
    pub duration_secs: f64,
}

impl RunSummary {
    pub(crate) fn assemble(
        run: &SimulationRun,
        years: Vec<YearSummary>,
        restarted_stale: bool,
        duration_secs: f64,
    ) -> Self {
        let total_events = years.iter().map(|y| y.total_events).sum();
        let fallback_count = u32::try_from(years.iter().filter(|y| y.fallback_used()).count())
            .unwrap_or(u32::MAX);
        let outcome = Self::classify(run, &years);
        Self {
            run_id: run.run_id().clone(),
            start_year: run.start_year(),
            end_year: run.end_year(),
            fail_fast: run.fail_fast(),
            config_fingerprint: run.config_fingerprint().clone(),
            outcome,
            restarted_stale,
            years,
            total_events,
            fallback_count,
            duration_secs,
        }
    }

    fn classify(run: &SimulationRun, years: &[YearSummary]) -> RunOutcome {
        let cancelled = years
            .iter()
            .any(|y| y.skip_reason == Some(SkipReason::Cancelled));
        let failed = years.iter().any(|y| y.status == YearStatus::Failed);

        if failed {
            if run.fail_fast() {
                RunOutcome::Failure
            } else {
                RunOutcome::PartialSuccess
            }
        } else if cancelled {
            RunOutcome::Cancelled
        } else if years.len() == run.year_count()
            && years.iter().all(|y| y.status == YearStatus::Completed)
        {
            RunOutcome::Success
        } else {
            RunOutcome::Failure
        }
    }

    #[must_use]
    pub fn year(&self, year: i32) -> Option<&YearSummary> {
        self.years.iter().find(|y| y.year == year)
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<(i32, YearStatus)> {
        self.years.iter().map(|y| (y.year, y.status)).collect()
    }
}
