//! Durable stage-completion records.
//!
//! A [`Checkpoint`] states that one stage of one simulation year finished
//! successfully, and where its output lives. It never holds business data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::RunId;
use crate::stage::WorkflowStage;

/// Opaque pointer into the external storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotRef(String);

impl SnapshotRef {
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Default reference used when a stage reports no explicit location.
    #[must_use]
    pub fn for_stage(run_id: &RunId, year: i32, stage: WorkflowStage) -> Self {
        Self(format!("{}{year}/{stage}", Self::run_prefix(run_id)))
    }

    /// Key prefix shared by every default reference of `run_id`, and by no
    /// other run's.
    #[must_use]
    pub fn run_prefix(run_id: &RunId) -> String {
        format!("{}/", run_id.key_segment())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex digest identifying the full configuration a run was started with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigFingerprint(String);

impl ConfigFingerprint {
    #[must_use]
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ConfigFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Record that `stage` of `year` completed for `run_id`.
///
/// For a given `(run_id, year)` the stored checkpoints always form a prefix of
/// the stage order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub year: i32,
    pub stage: WorkflowStage,
    pub completed_at: DateTime<Utc>,
    pub snapshot_ref: SnapshotRef,
    pub config_fingerprint: ConfigFingerprint,
}

impl Checkpoint {
    /// Stable identifier: `<run_id>/<year>/<stage>`.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.run_id, self.year, self.stage)
    }
}
