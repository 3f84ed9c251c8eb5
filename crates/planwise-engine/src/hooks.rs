//! Read-only extension hooks fired around years and stages.
//!
//! Observer failures are fault-isolated: errors and panics are logged and
//! swallowed so that no hook can alter pipeline control flow.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use planwise_types::metrics::EventGenerationMetrics;
use planwise_types::run::{RunId, YearStatus};
use planwise_types::stage::{StageResult, WorkflowStage};

/// Point in the pipeline a hook fires at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeYear,
    AfterYear,
    BeforeStage,
    AfterStage,
}

impl HookPoint {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeYear => "before_year",
            Self::AfterYear => "after_year",
            Self::BeforeStage => "before_stage",
            Self::AfterStage => "after_stage",
        }
    }
}

/// Snapshot of pipeline state handed to observers.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub run_id: &'a RunId,
    pub year: i32,
    /// Set for stage hooks.
    pub stage: Option<WorkflowStage>,
    /// Set for `after_stage`.
    pub stage_result: Option<&'a StageResult>,
    /// Set for `after_year`.
    pub year_status: Option<YearStatus>,
    /// Set for `after_stage` of event generation.
    pub event_metrics: Option<&'a EventGenerationMetrics>,
}

impl<'a> HookContext<'a> {
    #[must_use]
    pub fn year(run_id: &'a RunId, year: i32) -> Self {
        Self {
            run_id,
            year,
            stage: None,
            stage_result: None,
            year_status: None,
            event_metrics: None,
        }
    }

    #[must_use]
    pub fn stage(run_id: &'a RunId, year: i32, stage: WorkflowStage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::year(run_id, year)
        }
    }
}

/// Typed observer of pipeline progress. All methods default to no-ops.
pub trait StageObserver: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Errors are logged and ignored.
    fn before_year(&self, _ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// Errors are logged and ignored.
    fn after_year(&self, _ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// Errors are logged and ignored.
    fn before_stage(&self, _ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// Errors are logged and ignored.
    fn after_stage(&self, _ctx: &HookContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observers in registration order.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn StageObserver>>,
}

impl ObserverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn StageObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Invoke every observer for `point`. Never fails.
    pub fn notify(&self, point: HookPoint, ctx: &HookContext<'_>) {
        for observer in &self.observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| match point {
                HookPoint::BeforeYear => observer.before_year(ctx),
                HookPoint::AfterYear => observer.after_year(ctx),
                HookPoint::BeforeStage => observer.before_stage(ctx),
                HookPoint::AfterStage => observer.after_stage(ctx),
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(
                    observer = observer.name(),
                    hook = point.as_str(),
                    year = ctx.year,
                    stage = ctx.stage.map(WorkflowStage::as_str),
                    error = %err,
                    "Extension hook failed; continuing"
                ),
                Err(_) => tracing::warn!(
                    observer = observer.name(),
                    hook = point.as_str(),
                    year = ctx.year,
                    stage = ctx.stage.map(WorkflowStage::as_str),
                    "Extension hook panicked; continuing"
                ),
            }
        }
    }
}
