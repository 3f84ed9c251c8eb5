//! Runtime execution options (not part of the simulation YAML).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use planwise_types::metrics::EventGenerationMode;
use planwise_types::run::RunId;

/// Cooperative run-level cancellation signal.
///
/// Observed before each year and between stages; an in-flight stage always
/// runs to completion.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Reuse valid checkpoints. `false` purges the run and starts over.
    pub resume: bool,
    /// Replaces `event_generation.mode` for this invocation.
    pub mode_override: Option<EventGenerationMode>,
    pub cancellation: CancellationToken,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            resume: true,
            mode_override: None,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Caller overrides applied when building a run from configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub run_id: Option<RunId>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub fail_fast: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_options_default_resumes() {
        let opts = ExecutionOptions::default();
        assert!(opts.resume);
        assert!(opts.mode_override.is_none());
        assert!(!opts.cancellation.is_cancelled());
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
