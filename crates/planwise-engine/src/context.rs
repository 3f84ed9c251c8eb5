//! Explicit per-run context passed from the orchestrator to every year.

use std::time::Duration;

use anyhow::Result;
use planwise_types::metrics::EventGenerationMode;
use planwise_types::run::SimulationRun;

use crate::config::types::{parse_byte_size, SimulationConfig};
use crate::execution::{CancellationToken, ExecutionOptions};
use crate::resolve::resolve_concurrency;

/// Pipeline tuning resolved from configuration once, before any run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub random_seed: u64,
    pub event_mode: EventGenerationMode,
    pub fallback_on_error: bool,
    pub concurrency: usize,
    pub stage_timeout: Duration,
    pub secondary_timeout: Duration,
    pub secondary_memory_limit: Option<u64>,
    pub max_retries: u32,
    pub retain_checkpoints: bool,
    pub max_events_per_employee: f64,
}

impl PipelineSettings {
    /// # Errors
    ///
    /// Returns an error if `event_generation.secondary.max_memory` is not a byte size.
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        let stage_timeout = Duration::from_secs(config.resources.stage_timeout_seconds);
        let secondary = &config.event_generation.secondary;
        let secondary_memory_limit = secondary
            .max_memory
            .as_deref()
            .map(parse_byte_size)
            .transpose()?;

        Ok(Self {
            random_seed: config.simulation.random_seed,
            event_mode: config.event_generation.mode,
            fallback_on_error: config.event_generation.fallback_on_error,
            concurrency: resolve_concurrency(config.resources.threads),
            stage_timeout,
            secondary_timeout: secondary
                .timeout_seconds
                .map_or(stage_timeout, Duration::from_secs),
            secondary_memory_limit,
            max_retries: config.resources.max_retries,
            retain_checkpoints: config.checkpoints.retain,
            max_events_per_employee: config.validation.max_events_per_employee,
        })
    }
}

/// Everything a year needs to know about the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run: SimulationRun,
    pub random_seed: u64,
    pub event_mode: EventGenerationMode,
    pub concurrency: usize,
    pub stage_timeout: Duration,
    pub max_retries: u32,
    pub cancellation: CancellationToken,
}

impl RunContext {
    #[must_use]
    pub fn new(run: SimulationRun, settings: &PipelineSettings, options: &ExecutionOptions) -> Self {
        Self {
            run,
            random_seed: settings.random_seed,
            event_mode: options.mode_override.unwrap_or(settings.event_mode),
            concurrency: settings.concurrency,
            stage_timeout: settings.stage_timeout,
            max_retries: settings.max_retries,
            cancellation: options.cancellation.clone(),
        }
    }

    /// Per-year seed so that each year draws an independent stream.
    #[must_use]
    pub fn year_seed(&self, year: i32) -> u64 {
        let offset = u64::from(year.unsigned_abs());
        self.random_seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(offset)
    }
}
