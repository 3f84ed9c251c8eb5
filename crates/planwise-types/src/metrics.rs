//! Event-generation backend selection and telemetry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Event-generation backend.
///
/// `Primary` is the declarative transformation-engine path; `Secondary` is the
/// in-memory columnar path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventGenerationMode {
    #[default]
    Primary,
    Secondary,
}

impl EventGenerationMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for EventGenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventGenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!(
                "unknown event generation mode '{other}', expected 'primary' or 'secondary'"
            )),
        }
    }
}

/// Telemetry for one event-generation stage invocation.
///
/// `mode` is the backend that produced the final outcome, which differs from
/// `requested_mode` whenever `fallback_used` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGenerationMetrics {
    pub requested_mode: EventGenerationMode,
    pub mode: EventGenerationMode,
    pub execution_time_secs: f64,
    pub total_events: u64,
    pub events_per_second: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_memory_bytes: Option<u64>,
    /// Aggregate compensation across generated events, used for backend parity checks.
    #[serde(default)]
    pub total_compensation: f64,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub success: bool,
}

impl EventGenerationMetrics {
    /// Metrics for a backend attempt that produced no events.
    #[must_use]
    pub fn failed(
        requested_mode: EventGenerationMode,
        mode: EventGenerationMode,
        execution_time_secs: f64,
    ) -> Self {
        Self {
            requested_mode,
            mode,
            execution_time_secs,
            total_events: 0,
            events_per_second: 0.0,
            peak_memory_bytes: None,
            total_compensation: 0.0,
            fallback_used: false,
            fallback_reason: None,
            success: false,
        }
    }

    /// `total_events / execution_time`, or zero for instantaneous runs.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(total_events: u64, execution_time_secs: f64) -> f64 {
        if execution_time_secs > 0.0 {
            total_events as f64 / execution_time_secs
        } else {
            0.0
        }
    }
}
