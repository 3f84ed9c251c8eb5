//! Structured error model for stage executions.
//!
//! [`StageError`] carries classification and retry metadata. It is local to
//! one simulation year: the year executor records it in the year's
//! [`StageResult`](crate::stage::StageResult) and the orchestrator decides
//! whether the run continues.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum StageErrorCategory {
    /// Stage output failed a validation gate.
    Validation,
    /// Stage exceeded its configured timeout.
    Timeout,
    /// Event-generation backend failure (after any fallback).
    Backend,
    /// Transformation engine reported a failure.
    Engine,
    /// Transient engine failure (retryable).
    Transient,
    /// Stage cannot run with the supplied configuration.
    Configuration,
}

impl fmt::Display for StageErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Backend => "backend",
            Self::Engine => "engine",
            Self::Transient => "transient",
            Self::Configuration => "configuration",
        };
        f.write_str(s)
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Multi-second retry.
    Slow,
}

/// Structured error from a stage execution.
///
/// Construct via category-specific factory methods (e.g. [`StageError::validation`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct StageError {
    pub category: StageErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl StageError {
    fn new(
        category: StageErrorCategory,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class,
            details: None,
        }
    }

    /// Validation gate failure (not retryable).
    #[must_use]
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StageErrorCategory::Validation, false, BackoffClass::Normal, code, message)
    }

    /// Stage timeout (not retryable).
    #[must_use]
    pub fn timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StageErrorCategory::Timeout, false, BackoffClass::Normal, code, message)
    }

    /// Event-generation backend failure (not retryable).
    #[must_use]
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StageErrorCategory::Backend, false, BackoffClass::Normal, code, message)
    }

    /// Transformation engine failure (not retryable).
    #[must_use]
    pub fn engine(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StageErrorCategory::Engine, false, BackoffClass::Normal, code, message)
    }

    /// Transient engine failure (retryable, normal backoff).
    #[must_use]
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StageErrorCategory::Transient, true, BackoffClass::Normal, code, message)
    }

    /// Configuration problem detected while running a stage (not retryable).
    #[must_use]
    pub fn configuration(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StageErrorCategory::Configuration, false, BackoffClass::Normal, code, message)
    }

    /// Suggest a fixed retry delay.
    #[must_use]
    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    /// Override the default backoff class.
    #[must_use]
    pub fn with_backoff(mut self, backoff_class: BackoffClass) -> Self {
        self.backoff_class = backoff_class;
        self
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_defaults() {
        let err = StageError::validation("NEGATIVE_HEADCOUNT", "headcount below zero");
        assert_eq!(err.category, StageErrorCategory::Validation);
        assert!(!err.retryable);
        assert_eq!(err.backoff_class, BackoffClass::Normal);
    }

    #[test]
    fn transient_errors_are_retryable() {
        let err = StageError::transient("LOCK_TIMEOUT", "database is locked")
            .with_backoff(BackoffClass::Fast);
        assert!(err.retryable);
        assert_eq!(err.backoff_class, BackoffClass::Fast);
    }

    #[test]
    fn serde_roundtrip() {
        let err = StageError::engine("MODEL_FAILED", "int_hiring_events failed")
            .with_details(serde_json::json!({"model": "int_hiring_events"}));
        let json = serde_json::to_string(&err).unwrap();
        let back: StageError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn display_format() {
        let err = StageError::timeout("STAGE_TIMEOUT", "foundation exceeded 30s");
        assert_eq!(err.to_string(), "[timeout] STAGE_TIMEOUT: foundation exceeded 30s");
    }
}
