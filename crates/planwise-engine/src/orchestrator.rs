//! Pipeline orchestrator: runs the requested years in order and assembles
//! the [`RunSummary`].

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use planwise_state::StateBackend;
use planwise_types::run::{RunId, SimulationRun, SkipReason, YearState, YearStatus};

use crate::checkpoint::CheckpointStore;
use crate::config::fingerprint::compute_fingerprint;
use crate::config::types::SimulationConfig;
use crate::context::{PipelineSettings, RunContext};
use crate::engines::{ColumnarEngine, TransformationEngine};
use crate::error::PipelineError;
use crate::event_generation::{
    EventGenerationExecutor, EventGenerationSettings, EventGenerator, PrimaryGenerator,
    SecondaryGenerator,
};
use crate::execution::{ExecutionOptions, RunOverrides};
use crate::gates::{GateRegistry, ValidationGate};
use crate::hooks::{ObserverRegistry, StageObserver};
use crate::registry::StageRegistry;
use crate::resolve::create_state_backend;
use crate::result::{RunOutcome, RunSummary, YearSummary};
use crate::synthetic::{SyntheticColumnarEngine, SyntheticTransformationEngine};
use crate::year::YearExecutor;

/// Build the [`SimulationRun`] described by `config`, applying caller overrides.
///
/// # Errors
///
/// Returns an error if the resulting year range is empty or the
/// configuration cannot be fingerprinted.
pub fn build_run(config: &SimulationConfig, overrides: &RunOverrides) -> anyhow::Result<SimulationRun> {
    let run_id = overrides
        .run_id
        .clone()
        .unwrap_or_else(|| RunId::new(config.scenario.clone()));
    let start_year = overrides.start_year.unwrap_or(config.simulation.start_year);
    let end_year = overrides.end_year.unwrap_or(config.simulation.end_year);
    let fail_fast = overrides.fail_fast.unwrap_or(config.simulation.fail_fast);
    let fingerprint = compute_fingerprint(config)?;

    SimulationRun::new(run_id, start_year, end_year, fail_fast, fingerprint)
        .context("Invalid run")
}

/// Entry point for multi-year simulation runs.
pub struct PipelineOrchestrator {
    settings: PipelineSettings,
    store: CheckpointStore,
    registry: StageRegistry,
    engine: Arc<dyn TransformationEngine>,
    events: Arc<EventGenerationExecutor>,
    observers: ObserverRegistry,
    gates: GateRegistry,
}

impl PipelineOrchestrator {
    /// Wire the pipeline over the given collaborators.
    ///
    /// Without a `columnar` engine, Secondary requests report the backend as
    /// unavailable and fall back to Primary when allowed.
    #[must_use]
    pub fn new(
        settings: PipelineSettings,
        backend: Arc<dyn StateBackend>,
        engine: Arc<dyn TransformationEngine>,
        columnar: Option<Arc<dyn ColumnarEngine>>,
    ) -> Self {
        let registry = StageRegistry::standard();
        let primary: Arc<dyn EventGenerator> = Arc::new(PrimaryGenerator::new(engine.clone()));
        let secondary = columnar.map(|columnar| {
            Arc::new(SecondaryGenerator::new(
                columnar,
                settings.secondary_memory_limit,
            )) as Arc<dyn EventGenerator>
        });
        let events = EventGenerationExecutor::new(
            primary,
            secondary,
            EventGenerationSettings {
                fallback_on_error: settings.fallback_on_error,
                primary_timeout: settings.stage_timeout,
                secondary_timeout: settings.secondary_timeout,
            },
        );
        let gates = GateRegistry::with_builtin(settings.max_events_per_employee);

        Self {
            settings,
            store: CheckpointStore::new(backend, registry.clone()),
            registry,
            engine,
            events: Arc::new(events),
            observers: ObserverRegistry::new(),
            gates,
        }
    }

    /// Pipeline over the built-in synthetic engines, both sharing `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration's runtime settings are invalid.
    pub fn synthetic(config: &SimulationConfig, backend: Arc<dyn StateBackend>) -> anyhow::Result<Self> {
        let settings = PipelineSettings::from_config(config)?;
        let engine = Arc::new(SyntheticTransformationEngine::new(
            backend.clone(),
            config.workforce.clone(),
        ));
        let columnar: Arc<dyn ColumnarEngine> = Arc::new(SyntheticColumnarEngine::new(
            backend.clone(),
            config.workforce.clone(),
        ));
        Ok(Self::new(settings, backend, engine, Some(columnar)))
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn StageObserver>) -> Self {
        self.observers.register(observer);
        self
    }

    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn ValidationGate>) -> Self {
        self.gates.register(gate);
        self
    }

    #[must_use]
    pub fn checkpoint_store(&self) -> &CheckpointStore {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run every year of `run` in ascending order.
    ///
    /// Year failures are reported in the returned summary; only
    /// infrastructure and run-order errors abort the run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Infrastructure`] if the checkpoint store or a
    /// collaborator task fails, or [`PipelineError::RunOrder`] if a stage
    /// would start without its prior year.
    pub async fn execute(
        &self,
        run: &SimulationRun,
        options: &ExecutionOptions,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let run_id = run.run_id();
        let restarted_stale = self.prepare(run, options)?;

        tracing::info!(
            run_id = run_id.as_str(),
            start_year = run.start_year(),
            end_year = run.end_year(),
            fail_fast = run.fail_fast(),
            fingerprint = run.config_fingerprint().short(),
            "Run started"
        );

        let ctx = RunContext::new(run.clone(), &self.settings, options);
        let executor = YearExecutor::new(
            self.store.clone(),
            self.registry.clone(),
            self.engine.clone(),
            self.events.clone(),
            self.observers.clone(),
            self.gates.clone(),
        );

        let mut years = Vec::with_capacity(run.year_count());
        let mut prior: Option<YearState> = None;
        let mut failed_year: Option<i32> = None;

        for year in run.years() {
            if let Some(failed) = failed_year {
                if run.fail_fast() {
                    tracing::warn!(
                        run_id = run_id.as_str(),
                        failed_year = failed,
                        "Halting run after failed year"
                    );
                    break;
                }
                years.push(YearSummary::skipped(year, SkipReason::PriorYearFailed));
                continue;
            }
            if ctx.cancellation.is_cancelled() {
                years.push(YearSummary::skipped(year, SkipReason::Cancelled));
                continue;
            }

            let execution = executor.execute(&ctx, year, prior.as_ref()).await?;
            if execution.state.status == YearStatus::Failed {
                failed_year = Some(year);
            }
            prior = Some(execution.state.clone());
            years.push(execution.into_summary());
        }

        let summary = RunSummary::assemble(run, years, restarted_stale, started.elapsed().as_secs_f64());

        if summary.outcome == RunOutcome::Success && !self.settings.retain_checkpoints {
            self.store.purge(run_id)?;
        }

        tracing::info!(
            run_id = run_id.as_str(),
            outcome = summary.outcome.as_str(),
            total_events = summary.total_events,
            fallbacks = summary.fallback_count,
            duration_secs = summary.duration_secs,
            "Run finished"
        );
        Ok(summary)
    }

    /// Purge checkpoints that must not be reused. Returns true when the
    /// purge was caused by a fingerprint change.
    fn prepare(&self, run: &SimulationRun, options: &ExecutionOptions) -> anyhow::Result<bool> {
        let run_id = run.run_id();
        if !options.resume {
            tracing::info!(run_id = run_id.as_str(), "Resume disabled, starting from scratch");
            self.store.purge(run_id)?;
            return Ok(false);
        }
        if self.store.is_stale(run_id, run.config_fingerprint())? {
            tracing::warn!(
                run_id = run_id.as_str(),
                fingerprint = run.config_fingerprint().short(),
                "Configuration changed since checkpoints were written, restarting run"
            );
            self.store
                .purge(run_id)
                .context("Failed to discard stale checkpoints")?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Load state, build the run and execute it with the synthetic engines.
///
/// # Errors
///
/// Returns [`PipelineError::Infrastructure`] if the state backend cannot be
/// opened or the run cannot be built, plus anything
/// [`PipelineOrchestrator::execute`] returns.
pub async fn run_simulation(
    config: &SimulationConfig,
    overrides: &RunOverrides,
    options: &ExecutionOptions,
) -> Result<RunSummary, PipelineError> {
    let backend = create_state_backend(config)?;
    let run = build_run(config, overrides)?;
    let orchestrator = PipelineOrchestrator::synthetic(config, backend)?;
    orchestrator.execute(&run, options).await
}
