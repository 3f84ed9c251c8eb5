//! Workflow stage identifiers and per-stage execution results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// A named unit of sequential work within one simulation year.
///
/// Declaration order is execution order: the derived `Ord` follows the
/// canonical chain `Initialization -> ... -> Reporting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Initialization,
    Foundation,
    EventGeneration,
    StateAccumulation,
    Validation,
    Reporting,
}

impl WorkflowStage {
    /// Every stage, in execution order.
    pub const ALL: [WorkflowStage; 6] = [
        Self::Initialization,
        Self::Foundation,
        Self::EventGeneration,
        Self::StateAccumulation,
        Self::Validation,
        Self::Reporting,
    ];

    /// Storage / log representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Foundation => "foundation",
            Self::EventGeneration => "event_generation",
            Self::StateAccumulation => "state_accumulation",
            Self::Validation => "validation",
            Self::Reporting => "reporting",
        }
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored stage name does not match any known stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown workflow stage '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for WorkflowStage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Outcome of a single stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    /// Not executed in this invocation (already checkpointed).
    Skipped,
}

impl StageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage execution, consumed by the year executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: WorkflowStage,
    pub status: StageStatus,
    pub duration_secs: f64,
    /// Number of attempts made (0 for skipped stages).
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
}

impl StageResult {
    #[must_use]
    pub fn success(stage: WorkflowStage, duration_secs: f64, attempts: u32) -> Self {
        Self {
            stage,
            status: StageStatus::Success,
            duration_secs,
            attempts,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(
        stage: WorkflowStage,
        duration_secs: f64,
        attempts: u32,
        error: StageError,
    ) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            duration_secs,
            attempts,
            error: Some(error),
        }
    }

    /// A stage that was not run because a checkpoint already covers it.
    #[must_use]
    pub fn skipped(stage: WorkflowStage) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            duration_secs: 0.0,
            attempts: 0,
            error: None,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_matches_declaration() {
        let mut sorted = WorkflowStage::ALL;
        sorted.sort();
        assert_eq!(sorted, WorkflowStage::ALL);
        assert!(WorkflowStage::Foundation < WorkflowStage::EventGeneration);
    }

    #[test]
    fn stage_parses_from_storage_name() {
        for stage in WorkflowStage::ALL {
            assert_eq!(stage.as_str().parse::<WorkflowStage>().unwrap(), stage);
        }
        let err = "warmup".parse::<WorkflowStage>().unwrap_err();
        assert_eq!(err.to_string(), "unknown workflow stage 'warmup'");
    }

    #[test]
    fn stage_serde_uses_snake_case() {
        let json = serde_json::to_string(&WorkflowStage::StateAccumulation).unwrap();
        assert_eq!(json, "\"state_accumulation\"");
    }

    #[test]
    fn failed_result_carries_error() {
        let result = StageResult::failed(
            WorkflowStage::Validation,
            0.5,
            1,
            StageError::validation("NEGATIVE_HEADCOUNT", "headcount -3"),
        );
        assert!(result.is_failed());
        assert_eq!(result.error.unwrap().code, "NEGATIVE_HEADCOUNT");
    }
}
