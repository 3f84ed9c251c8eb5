//! Per-year run history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::EventGenerationMode;
use crate::run::YearStatus;

/// Final statistics written when a year attempt finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearRunStats {
    /// Mode that actually produced the year's events, if event generation ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_mode: Option<EventGenerationMode>,
    pub total_events: u64,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One row of year run history as read back from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearRunRecord {
    pub id: i64,
    pub status: YearStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: YearRunStats,
}
