//! Drives one simulation year through the stage chain.

use std::sync::Arc;
use std::time::Instant;

use planwise_types::checkpoint::SnapshotRef;
use planwise_types::error::StageError;
use planwise_types::history::YearRunStats;
use planwise_types::metrics::{EventGenerationMetrics, EventGenerationMode};
use planwise_types::run::{SkipReason, YearState, YearStatus};
use planwise_types::stage::{StageResult, WorkflowStage};

use crate::blocking::{run_bounded, Bounded};
use crate::checkpoint::CheckpointStore;
use crate::context::RunContext;
use crate::engines::{PriorYearState, StageOutput, StageRequest, TransformationEngine};
use crate::error::{compute_backoff, PipelineError};
use crate::event_generation::EventGenerationExecutor;
use crate::gates::{GateInput, GateRegistry};
use crate::hooks::{HookContext, HookPoint, ObserverRegistry};
use crate::registry::StageRegistry;
use crate::result::YearSummary;

/// Stage whose checkpoint holds a year's final accumulated state.
const ACCUMULATED_STATE_STAGE: WorkflowStage = WorkflowStage::StateAccumulation;

/// Everything one year produced in this invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct YearExecution {
    pub state: YearState,
    pub stage_results: Vec<StageResult>,
    pub resumed_from: Option<WorkflowStage>,
    pub event_mode: Option<EventGenerationMode>,
    pub event_metrics: Option<EventGenerationMetrics>,
    pub total_events: u64,
    pub duration_secs: f64,
}

impl YearExecution {
    #[must_use]
    pub fn into_summary(self) -> YearSummary {
        YearSummary {
            resumed_from: self.resumed_from,
            event_mode: self.event_mode,
            event_metrics: self.event_metrics,
            total_events: self.total_events,
            duration_secs: self.duration_secs,
            stage_results: self.stage_results,
            ..YearSummary::from_year_state(&self.state)
        }
    }
}

struct StageOutcome {
    result: StageResult,
    output: Option<StageOutput>,
    metrics: Option<EventGenerationMetrics>,
}

/// Accumulates per-year progress while stages run.
struct YearProgress {
    state: YearState,
    stage_results: Vec<StageResult>,
    event_mode: Option<EventGenerationMode>,
    event_metrics: Option<EventGenerationMetrics>,
    total_events: u64,
}

/// Executes the stage chain for a single year.
pub struct YearExecutor {
    store: CheckpointStore,
    registry: StageRegistry,
    engine: Arc<dyn TransformationEngine>,
    events: Arc<EventGenerationExecutor>,
    observers: ObserverRegistry,
    gates: GateRegistry,
}

impl YearExecutor {
    #[must_use]
    pub fn new(
        store: CheckpointStore,
        registry: StageRegistry,
        engine: Arc<dyn TransformationEngine>,
        events: Arc<EventGenerationExecutor>,
        observers: ObserverRegistry,
        gates: GateRegistry,
    ) -> Self {
        Self {
            store,
            registry,
            engine,
            events,
            observers,
            gates,
        }
    }

    /// Run `year`, resuming after its last checkpointed stage.
    ///
    /// `prior` is the final state of `year - 1` in this run, if any.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Infrastructure`] on checkpoint store failures
    /// and [`PipelineError::RunOrder`] if a stage needs an incomplete prior year.
    /// Stage failures are reported on the returned [`YearState`].
    pub async fn execute(
        &self,
        ctx: &RunContext,
        year: i32,
        prior: Option<&YearState>,
    ) -> Result<YearExecution, PipelineError> {
        let run_id = ctx.run.run_id();
        let backend = self.store.backend();
        let previous_attempt = backend.latest_year_run(run_id, year)?;
        let history_id = backend.start_year_run(run_id, year)?;
        let started = Instant::now();

        tracing::info!(run_id = run_id.as_str(), year, "Year started");
        self.observers
            .notify(HookPoint::BeforeYear, &HookContext::year(run_id, year));

        let mut progress = YearProgress {
            state: YearState {
                status: YearStatus::Running,
                ..YearState::pending(year)
            },
            stage_results: Vec::new(),
            event_mode: None,
            event_metrics: None,
            total_events: 0,
        };

        let outcome = self
            .run_stages(ctx, year, prior, previous_attempt.map(|r| r.stats), &mut progress)
            .await;

        let duration_secs = started.elapsed().as_secs_f64();
        let resumed_from = match outcome {
            Ok(resumed_from) => resumed_from,
            Err(err) => {
                let stats = YearRunStats {
                    event_mode: progress.event_mode,
                    total_events: progress.total_events,
                    duration_secs,
                    error_message: Some(err.to_string()),
                };
                if let Err(history_err) =
                    backend.complete_year_run(history_id, YearStatus::Failed, &stats)
                {
                    tracing::warn!(year, error = %history_err, "Failed to finalize year run history");
                }
                return Err(err);
            }
        };

        let state = &progress.state;
        let stats = YearRunStats {
            event_mode: progress.event_mode,
            total_events: progress.total_events,
            duration_secs,
            error_message: state.error.as_ref().map(ToString::to_string),
        };
        backend.complete_year_run(history_id, state.status, &stats)?;

        match state.status {
            YearStatus::Completed => tracing::info!(
                run_id = run_id.as_str(),
                year,
                duration_secs,
                events = progress.total_events,
                mode = progress.event_mode.map(EventGenerationMode::as_str),
                "Year completed"
            ),
            YearStatus::Failed => tracing::error!(
                run_id = run_id.as_str(),
                year,
                stage = state.failed_stage.map(WorkflowStage::as_str),
                error = stats.error_message.as_deref(),
                "Year failed"
            ),
            _ => tracing::warn!(
                run_id = run_id.as_str(),
                year,
                status = state.status.as_str(),
                "Year stopped early"
            ),
        }

        let after = HookContext {
            year_status: Some(state.status),
            ..HookContext::year(run_id, year)
        };
        self.observers.notify(HookPoint::AfterYear, &after);

        Ok(YearExecution {
            state: progress.state,
            stage_results: progress.stage_results,
            resumed_from,
            event_mode: progress.event_mode,
            event_metrics: progress.event_metrics,
            total_events: progress.total_events,
            duration_secs,
        })
    }

    /// Runs the remaining stages. Returns the checkpointed stage resumed after.
    async fn run_stages(
        &self,
        ctx: &RunContext,
        year: i32,
        prior: Option<&YearState>,
        previous_stats: Option<YearRunStats>,
        progress: &mut YearProgress,
    ) -> Result<Option<WorkflowStage>, PipelineError> {
        let run_id = ctx.run.run_id();
        let latest = self.store.latest_checkpoint(run_id, year)?;
        let resumed_from = latest.as_ref().map(|cp| cp.stage);

        for descriptor in self.registry.completed_through(resumed_from) {
            tracing::debug!(
                run_id = run_id.as_str(),
                year,
                stage = descriptor.stage.as_str(),
                "Stage already checkpointed, skipping"
            );
            progress.state.record_stage(descriptor.stage, None);
            progress
                .stage_results
                .push(StageResult::skipped(descriptor.stage));
        }

        if progress
            .state
            .completed_stages
            .contains(&WorkflowStage::EventGeneration)
        {
            if let Some(stats) = previous_stats {
                progress.event_mode = stats.event_mode;
                progress.total_events = stats.total_events;
            }
        }

        let mut upstream: Option<SnapshotRef> = None;
        if let Some(checkpoint) = latest {
            tracing::info!(
                run_id = run_id.as_str(),
                year,
                after_stage = checkpoint.stage.as_str(),
                "Resuming year from checkpoint"
            );
            progress.state.last_checkpoint_id = Some(checkpoint.id());
            upstream = Some(checkpoint.snapshot_ref);
        }

        let mut baseline_headcount = None;
        for descriptor in self.registry.remaining_after(resumed_from) {
            let stage = descriptor.stage;
            if ctx.cancellation.is_cancelled() {
                tracing::warn!(
                    run_id = run_id.as_str(),
                    year,
                    next_stage = stage.as_str(),
                    "Cancellation observed between stages"
                );
                progress.state.status = YearStatus::Skipped;
                progress.state.skip_reason = Some(SkipReason::Cancelled);
                return Ok(resumed_from);
            }

            let prior_year = if descriptor.requires_prior_year_state {
                self.prior_year_state(ctx, year, stage, prior)?
            } else {
                None
            };
            let request = StageRequest {
                run_id: run_id.clone(),
                year,
                stage,
                random_seed: ctx.year_seed(year),
                concurrency: ctx.concurrency,
                upstream: upstream.clone(),
                prior_year,
                output_ref: SnapshotRef::for_stage(run_id, year, stage),
            };

            self.observers.notify(
                HookPoint::BeforeStage,
                &HookContext::stage(run_id, year, stage),
            );
            let outcome = self.run_stage(ctx, &request, baseline_headcount).await?;
            let after = HookContext {
                stage_result: Some(&outcome.result),
                event_metrics: outcome.metrics.as_ref(),
                ..HookContext::stage(run_id, year, stage)
            };
            self.observers.notify(HookPoint::AfterStage, &after);

            if let Some(metrics) = outcome.metrics {
                progress.event_mode = Some(metrics.mode);
                progress.total_events = metrics.total_events;
                progress.event_metrics = Some(metrics);
            }

            let StageOutcome { result, output, .. } = outcome;
            let Some(output) = output else {
                let error = result.error.clone().unwrap_or_else(|| {
                    StageError::engine("STAGE_FAILED", format!("stage '{stage}' failed"))
                });
                progress.state.fail(stage, error);
                progress.stage_results.push(result);
                return Ok(resumed_from);
            };

            let checkpoint = self
                .store
                .record(
                    run_id,
                    year,
                    stage,
                    output.snapshot_ref.clone(),
                    ctx.run.config_fingerprint(),
                )
                .map_err(PipelineError::Infrastructure)?;
            progress.state.record_stage(stage, Some(checkpoint.id()));
            progress.stage_results.push(result);

            if stage == WorkflowStage::Foundation {
                baseline_headcount = Some(output.headcount);
            }
            upstream = Some(output.snapshot_ref);
        }

        progress.state.status = YearStatus::Completed;
        Ok(resumed_from)
    }

    fn prior_year_state(
        &self,
        ctx: &RunContext,
        year: i32,
        stage: WorkflowStage,
        prior: Option<&YearState>,
    ) -> Result<Option<PriorYearState>, PipelineError> {
        if year == ctx.run.start_year() {
            return Ok(None);
        }

        let prior_year = year - 1;
        let prior_completed =
            prior.is_some_and(|p| p.year == prior_year && p.status == YearStatus::Completed);
        if !prior_completed {
            return Err(PipelineError::RunOrder {
                year,
                stage,
                prior_year,
            });
        }

        let checkpoint = self
            .store
            .checkpoint(ctx.run.run_id(), prior_year, ACCUMULATED_STATE_STAGE)?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Year {prior_year} is completed but has no '{ACCUMULATED_STATE_STAGE}' checkpoint"
                )
            })?;
        Ok(Some(PriorYearState {
            year: prior_year,
            snapshot_ref: checkpoint.snapshot_ref,
        }))
    }

    /// One stage with retries for retryable errors and the validation gate.
    async fn run_stage(
        &self,
        ctx: &RunContext,
        request: &StageRequest,
        baseline_headcount: Option<i64>,
    ) -> Result<StageOutcome, PipelineError> {
        let stage = request.stage;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tracing::info!(
                run_id = request.run_id.as_str(),
                year = request.year,
                stage = stage.as_str(),
                attempt,
                "Stage started"
            );

            let (result, metrics) = self.invoke(ctx, request).await?;
            let result = result.and_then(|output| {
                let input = GateInput {
                    year: request.year,
                    stage,
                    output: &output,
                    baseline_headcount,
                };
                match self.gates.check(&input) {
                    Ok(()) => Ok(output),
                    Err(reason) => Err(StageError::validation("VALIDATION_GATE", reason)),
                }
            });
            let duration_secs = started.elapsed().as_secs_f64();

            match result {
                Ok(output) => {
                    tracing::info!(
                        run_id = request.run_id.as_str(),
                        year = request.year,
                        stage = stage.as_str(),
                        duration_secs,
                        rows = output.row_count,
                        "Stage completed"
                    );
                    return Ok(StageOutcome {
                        result: StageResult::success(stage, duration_secs, attempt),
                        output: Some(output),
                        metrics,
                    });
                }
                Err(err) if err.retryable && attempt <= ctx.max_retries => {
                    let delay = compute_backoff(&err, attempt);
                    tracing::warn!(
                        run_id = request.run_id.as_str(),
                        year = request.year,
                        stage = stage.as_str(),
                        attempt,
                        max_retries = ctx.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retryable stage error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        run_id = request.run_id.as_str(),
                        year = request.year,
                        stage = stage.as_str(),
                        attempt,
                        category = %err.category,
                        code = %err.code,
                        error = %err,
                        "Stage failed"
                    );
                    return Ok(StageOutcome {
                        result: StageResult::failed(stage, duration_secs, attempt, err),
                        output: None,
                        metrics,
                    });
                }
            }
        }
    }

    async fn invoke(
        &self,
        ctx: &RunContext,
        request: &StageRequest,
    ) -> Result<(Result<StageOutput, StageError>, Option<EventGenerationMetrics>), PipelineError>
    {
        if request.stage == WorkflowStage::EventGeneration {
            let report = self.events.execute(request, ctx.event_mode).await?;
            return Ok((report.result, Some(report.metrics)));
        }

        let stage = request.stage;
        let limit = ctx.stage_timeout;
        let engine = Arc::clone(&self.engine);
        let task_request = request.clone();
        let outcome = run_bounded(stage.as_str(), limit, move || {
            engine.execute_stage(&task_request)
        })
        .await?;

        let result = match outcome {
            Bounded::Finished(result) => result,
            Bounded::TimedOut => Err(StageError::timeout(
                "STAGE_TIMEOUT",
                format!(
                    "stage '{stage}' exceeded its {}s timeout",
                    limit.as_secs_f64()
                ),
            )),
        };
        Ok((result, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineSettings;
    use crate::event_generation::{EventGenerationSettings, PrimaryGenerator};
    use crate::execution::ExecutionOptions;
    use planwise_state::SqliteStateBackend;
    use planwise_types::checkpoint::ConfigFingerprint;
    use planwise_types::error::{BackoffClass, StageErrorCategory};
    use planwise_types::run::{RunId, SimulationRun};
    use planwise_types::stage::StageStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Succeeds for every stage unless a failure is scripted for it.
    #[derive(Default)]
    struct ScriptedEngine {
        failures: Mutex<HashMap<WorkflowStage, Vec<StageError>>>,
        calls: Mutex<Vec<(i32, WorkflowStage, Option<i32>)>>,
        headcount: i64,
    }

    impl ScriptedEngine {
        fn fail_with(&self, stage: WorkflowStage, errors: Vec<StageError>) {
            self.failures.lock().unwrap().insert(stage, errors);
        }

        fn calls(&self) -> Vec<(i32, WorkflowStage, Option<i32>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TransformationEngine for ScriptedEngine {
        fn execute_stage(&self, request: &StageRequest) -> Result<StageOutput, StageError> {
            self.calls.lock().unwrap().push((
                request.year,
                request.stage,
                request.prior_year.as_ref().map(|p| p.year),
            ));
            if let Some(queue) = self.failures.lock().unwrap().get_mut(&request.stage) {
                if !queue.is_empty() {
                    return Err(queue.remove(0));
                }
            }
            Ok(StageOutput {
                row_count: 10,
                headcount: self.headcount,
                total_compensation: 1_000.0,
                snapshot_ref: request.output_ref.clone(),
            })
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            random_seed: 42,
            event_mode: EventGenerationMode::Primary,
            fallback_on_error: true,
            concurrency: 2,
            stage_timeout: Duration::from_secs(5),
            secondary_timeout: Duration::from_secs(5),
            secondary_memory_limit: None,
            max_retries: 2,
            retain_checkpoints: true,
            max_events_per_employee: 10.0,
        }
    }

    fn ctx(start: i32, end: i32) -> RunContext {
        let run = SimulationRun::new(
            RunId::new("unit"),
            start,
            end,
            true,
            ConfigFingerprint::new("fp"),
        )
        .unwrap();
        RunContext::new(run, &settings(), &ExecutionOptions::default())
    }

    fn executor(engine: Arc<ScriptedEngine>) -> (YearExecutor, CheckpointStore) {
        let store = CheckpointStore::new(
            Arc::new(SqliteStateBackend::in_memory().unwrap()),
            StageRegistry::standard(),
        );
        let events = Arc::new(EventGenerationExecutor::new(
            Arc::new(PrimaryGenerator::new(engine.clone())),
            None,
            EventGenerationSettings {
                fallback_on_error: true,
                primary_timeout: Duration::from_secs(5),
                secondary_timeout: Duration::from_secs(5),
            },
        ));
        let year = YearExecutor::new(
            store.clone(),
            StageRegistry::standard(),
            engine,
            events,
            ObserverRegistry::new(),
            GateRegistry::with_builtin(10.0),
        );
        (year, store)
    }

    fn engine() -> Arc<ScriptedEngine> {
        Arc::new(ScriptedEngine {
            headcount: 100,
            ..ScriptedEngine::default()
        })
    }

    #[tokio::test]
    async fn fresh_year_runs_every_stage_and_checkpoints() {
        let engine = engine();
        let (year, store) = executor(engine.clone());
        let ctx = ctx(2025, 2025);

        let exec = year.execute(&ctx, 2025, None).await.unwrap();
        assert_eq!(exec.state.status, YearStatus::Completed);
        assert_eq!(exec.state.completed_stages, WorkflowStage::ALL.to_vec());
        assert!(exec
            .stage_results
            .iter()
            .all(|r| r.status == StageStatus::Success));
        assert_eq!(exec.event_mode, Some(EventGenerationMode::Primary));
        assert_eq!(
            store.latest_completed_stage(ctx.run.run_id(), 2025).unwrap(),
            Some(WorkflowStage::Reporting)
        );
        assert_eq!(engine.calls().len(), 6);
    }

    #[tokio::test]
    async fn completed_year_is_skipped_on_rerun_with_mode_carried_forward() {
        let engine = engine();
        let (year, _store) = executor(engine.clone());
        let ctx = ctx(2025, 2025);
        year.execute(&ctx, 2025, None).await.unwrap();

        let rerun = year.execute(&ctx, 2025, None).await.unwrap();
        assert_eq!(rerun.state.status, YearStatus::Completed);
        assert_eq!(rerun.resumed_from, Some(WorkflowStage::Reporting));
        assert!(rerun
            .stage_results
            .iter()
            .all(|r| r.status == StageStatus::Skipped));
        assert_eq!(rerun.event_mode, Some(EventGenerationMode::Primary));
        assert_eq!(rerun.total_events, 10);
        assert_eq!(engine.calls().len(), 6);
    }

    #[tokio::test]
    async fn failed_stage_stops_year_without_checkpoint() {
        let engine = engine();
        engine.fail_with(
            WorkflowStage::StateAccumulation,
            vec![StageError::engine("BAD_JOIN", "join exploded")],
        );
        let (year, store) = executor(engine.clone());
        let ctx = ctx(2025, 2025);

        let exec = year.execute(&ctx, 2025, None).await.unwrap();
        assert_eq!(exec.state.status, YearStatus::Failed);
        assert_eq!(
            exec.state.failed_stage,
            Some(WorkflowStage::StateAccumulation)
        );
        assert_eq!(exec.stage_results.last().unwrap().status, StageStatus::Failed);
        assert_eq!(
            store.latest_completed_stage(ctx.run.run_id(), 2025).unwrap(),
            Some(WorkflowStage::EventGeneration)
        );

        let history = store
            .backend()
            .latest_year_run(ctx.run.run_id(), 2025)
            .unwrap()
            .unwrap();
        assert_eq!(history.status, YearStatus::Failed);
        assert!(history.stats.error_message.unwrap().contains("join exploded"));
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_up_to_limit() {
        let engine = engine();
        let transient = StageError::transient("BUSY", "warehouse busy")
            .with_backoff(BackoffClass::Fast)
            .with_retry_after_ms(1);
        engine.fail_with(
            WorkflowStage::Foundation,
            vec![transient.clone(), transient],
        );
        let (year, _store) = executor(engine.clone());

        let exec = year.execute(&ctx(2025, 2025), 2025, None).await.unwrap();
        assert_eq!(exec.state.status, YearStatus::Completed);
        let foundation = &exec.stage_results[1];
        assert_eq!(foundation.stage, WorkflowStage::Foundation);
        assert_eq!(foundation.attempts, 3);
    }

    #[tokio::test]
    async fn negative_headcount_fails_validation_gate() {
        let engine = Arc::new(ScriptedEngine {
            headcount: -1,
            ..ScriptedEngine::default()
        });
        let (year, _store) = executor(engine);

        let exec = year.execute(&ctx(2025, 2025), 2025, None).await.unwrap();
        assert_eq!(exec.state.status, YearStatus::Failed);
        assert_eq!(exec.state.failed_stage, Some(WorkflowStage::Initialization));
        assert_eq!(
            exec.state.error.unwrap().category,
            StageErrorCategory::Validation
        );
    }

    #[tokio::test]
    async fn prior_year_state_is_passed_to_dependent_stages() {
        let engine = engine();
        let (year, _store) = executor(engine.clone());
        let ctx = ctx(2025, 2026);

        let first = year.execute(&ctx, 2025, None).await.unwrap();
        year.execute(&ctx, 2026, Some(&first.state)).await.unwrap();

        let dependent: Vec<_> = engine
            .calls()
            .into_iter()
            .filter(|(y, stage, _)| {
                *y == 2026
                    && matches!(
                        stage,
                        WorkflowStage::Foundation | WorkflowStage::StateAccumulation
                    )
            })
            .collect();
        assert_eq!(dependent.len(), 2);
        assert!(dependent.iter().all(|(_, _, prior)| *prior == Some(2025)));
    }

    #[tokio::test]
    async fn dependent_stage_refused_when_prior_year_incomplete() {
        let engine = engine();
        let (year, _store) = executor(engine.clone());
        let ctx = ctx(2025, 2026);

        let mut failed_prior = YearState::pending(2025);
        failed_prior.status = YearStatus::Failed;
        let err = year
            .execute(&ctx, 2026, Some(&failed_prior))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RunOrder {
                year: 2026,
                stage: WorkflowStage::Foundation,
                prior_year: 2025
            }
        ));
        assert!(!engine
            .calls()
            .iter()
            .any(|(_, stage, _)| *stage == WorkflowStage::Foundation));
    }

    #[tokio::test]
    async fn cancellation_stops_between_stages() {
        let engine = engine();
        let (year, store) = executor(engine.clone());
        let ctx = ctx(2025, 2025);
        ctx.cancellation.cancel();

        let exec = year.execute(&ctx, 2025, None).await.unwrap();
        assert_eq!(exec.state.status, YearStatus::Skipped);
        assert_eq!(exec.state.skip_reason, Some(SkipReason::Cancelled));
        assert!(engine.calls().is_empty());
        assert_eq!(
            store.latest_completed_stage(ctx.run.run_id(), 2025).unwrap(),
            None
        );
    }
}
