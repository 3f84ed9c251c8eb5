//! Event-generation stage with Primary/Secondary backends and fallback.
//!
//! The backend is chosen once per invocation. A failed Secondary attempt has
//! its scratch output discarded before the Primary backend re-runs the year
//! from scratch, so no partial Secondary output is ever published. Publishing
//! happens only after an attempt finished inside its time budget; an attempt
//! abandoned on timeout cleans up its own scratch area when it eventually
//! returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use planwise_types::error::StageError;
use planwise_types::metrics::{EventGenerationMetrics, EventGenerationMode};

use crate::blocking::{run_bounded, Bounded};
use crate::engines::{
    BackendError, ColumnarEngine, ColumnarRequest, ScratchArea, StageOutput, StageRequest,
    TransformationEngine,
};
use crate::error::PipelineError;

/// Events produced by one successful backend attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedEvents {
    pub total_events: u64,
    pub headcount: i64,
    pub total_compensation: f64,
    pub snapshot_ref: planwise_types::checkpoint::SnapshotRef,
    pub peak_memory_bytes: Option<u64>,
}

impl From<GeneratedEvents> for StageOutput {
    fn from(events: GeneratedEvents) -> Self {
        Self {
            row_count: events.total_events,
            headcount: events.headcount,
            total_compensation: events.total_compensation,
            snapshot_ref: events.snapshot_ref,
        }
    }
}

/// One event-generation backend strategy.
pub trait EventGenerator: Send + Sync {
    fn mode(&self) -> EventGenerationMode;

    /// Run one attempt into `scratch`. Output is not visible until
    /// [`EventGenerator::publish`].
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] classifying the failure.
    fn generate(
        &self,
        request: &StageRequest,
        scratch: &ScratchArea,
    ) -> Result<GeneratedEvents, BackendError>;

    /// # Errors
    ///
    /// Returns a [`BackendError`] if the output cannot be made visible.
    fn publish(&self, _scratch: &ScratchArea) -> Result<(), BackendError> {
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a [`BackendError`] if partial output cannot be removed.
    fn discard(&self, _scratch: &ScratchArea) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Primary path: the transformation engine runs the event-generation stage.
pub struct PrimaryGenerator {
    engine: Arc<dyn TransformationEngine>,
}

impl PrimaryGenerator {
    #[must_use]
    pub fn new(engine: Arc<dyn TransformationEngine>) -> Self {
        Self { engine }
    }
}

impl EventGenerator for PrimaryGenerator {
    fn mode(&self) -> EventGenerationMode {
        EventGenerationMode::Primary
    }

    fn generate(
        &self,
        request: &StageRequest,
        _scratch: &ScratchArea,
    ) -> Result<GeneratedEvents, BackendError> {
        let output = self
            .engine
            .execute_stage(request)
            .map_err(BackendError::Stage)?;
        Ok(GeneratedEvents {
            total_events: output.row_count,
            headcount: output.headcount,
            total_compensation: output.total_compensation,
            snapshot_ref: output.snapshot_ref,
            peak_memory_bytes: None,
        })
    }
}

/// Secondary path: the columnar engine writes into a scratch area.
pub struct SecondaryGenerator {
    engine: Arc<dyn ColumnarEngine>,
    memory_limit_bytes: Option<u64>,
}

impl SecondaryGenerator {
    #[must_use]
    pub fn new(engine: Arc<dyn ColumnarEngine>, memory_limit_bytes: Option<u64>) -> Self {
        Self {
            engine,
            memory_limit_bytes,
        }
    }
}

impl EventGenerator for SecondaryGenerator {
    fn mode(&self) -> EventGenerationMode {
        EventGenerationMode::Secondary
    }

    fn generate(
        &self,
        request: &StageRequest,
        scratch: &ScratchArea,
    ) -> Result<GeneratedEvents, BackendError> {
        let columnar = ColumnarRequest::from_stage_request(request, self.memory_limit_bytes);
        let output = self.engine.generate_events(&columnar, scratch)?;

        if let Some(limit) = self.memory_limit_bytes {
            if output.peak_memory_bytes > limit {
                return Err(BackendError::ResourceExhausted(format!(
                    "peak memory {} bytes exceeds budget of {limit} bytes",
                    output.peak_memory_bytes
                )));
            }
        }

        Ok(GeneratedEvents {
            total_events: output.event_count,
            headcount: output.headcount,
            total_compensation: output.total_compensation,
            snapshot_ref: scratch.target_ref.clone(),
            peak_memory_bytes: Some(output.peak_memory_bytes),
        })
    }

    fn publish(&self, scratch: &ScratchArea) -> Result<(), BackendError> {
        self.engine.publish(scratch)
    }

    fn discard(&self, scratch: &ScratchArea) -> Result<(), BackendError> {
        self.engine.discard(scratch)
    }
}

/// Fallback and time-budget policy for event generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventGenerationSettings {
    pub fallback_on_error: bool,
    pub primary_timeout: Duration,
    pub secondary_timeout: Duration,
}

/// Outcome of one event-generation stage invocation.
///
/// Metrics are present whether or not the stage succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGenerationReport {
    pub result: Result<StageOutput, StageError>,
    pub metrics: EventGenerationMetrics,
}

struct Attempt {
    result: Result<GeneratedEvents, BackendError>,
    elapsed: Duration,
}

/// Runs the event-generation stage against the selected backend.
pub struct EventGenerationExecutor {
    primary: Arc<dyn EventGenerator>,
    secondary: Option<Arc<dyn EventGenerator>>,
    settings: EventGenerationSettings,
    attempts: AtomicU64,
}

impl EventGenerationExecutor {
    #[must_use]
    pub fn new(
        primary: Arc<dyn EventGenerator>,
        secondary: Option<Arc<dyn EventGenerator>>,
        settings: EventGenerationSettings,
    ) -> Self {
        Self {
            primary,
            secondary,
            settings,
            attempts: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &EventGenerationSettings {
        &self.settings
    }

    /// Generate events for one year using `requested` as the preferred backend.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Infrastructure`] only if a backend task panics.
    /// Backend failures are reported through [`EventGenerationReport::result`].
    pub async fn execute(
        &self,
        request: &StageRequest,
        requested: EventGenerationMode,
    ) -> Result<EventGenerationReport, PipelineError> {
        if requested == EventGenerationMode::Primary {
            let attempt = self.attempt(Arc::clone(&self.primary), request).await?;
            return Ok(Self::report(requested, EventGenerationMode::Primary, attempt, None));
        }

        let attempt = match &self.secondary {
            Some(generator) => self.attempt(Arc::clone(generator), request).await?,
            None => Attempt {
                result: Err(BackendError::Unavailable(
                    "no columnar engine is configured".to_string(),
                )),
                elapsed: Duration::ZERO,
            },
        };

        match attempt.result {
            Err(err) if self.settings.fallback_on_error && err.allows_fallback() => {
                tracing::warn!(
                    run_id = request.run_id.as_str(),
                    year = request.year,
                    error = %err,
                    elapsed_secs = attempt.elapsed.as_secs_f64(),
                    "Secondary event generation failed, falling back to primary"
                );
                let retry = self.attempt(Arc::clone(&self.primary), request).await?;
                Ok(Self::report(
                    requested,
                    EventGenerationMode::Primary,
                    retry,
                    Some(err.to_string()),
                ))
            }
            result => {
                if let Err(ref err) = result {
                    tracing::error!(
                        run_id = request.run_id.as_str(),
                        year = request.year,
                        error = %err,
                        fallback_on_error = self.settings.fallback_on_error,
                        "Secondary event generation failed"
                    );
                }
                let attempt = Attempt {
                    result,
                    elapsed: attempt.elapsed,
                };
                Ok(Self::report(
                    requested,
                    EventGenerationMode::Secondary,
                    attempt,
                    None,
                ))
            }
        }
    }

    /// One bounded attempt, publishing on success and discarding on failure.
    async fn attempt(
        &self,
        generator: Arc<dyn EventGenerator>,
        request: &StageRequest,
    ) -> Result<Attempt, PipelineError> {
        let mode = generator.mode();
        let limit = match mode {
            EventGenerationMode::Primary => self.settings.primary_timeout,
            EventGenerationMode::Secondary => self.settings.secondary_timeout,
        };
        let started = Instant::now();

        let attempt_id = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let scratch = ScratchArea::for_attempt(&request.output_ref, attempt_id);
        let abandoned = Arc::new(AtomicBool::new(false));

        let task_generator = Arc::clone(&generator);
        let task_request = request.clone();
        let task_scratch = scratch.clone();
        let task_abandoned = Arc::clone(&abandoned);
        let outcome = run_bounded("event generation", limit, move || {
            let result = task_generator.generate(&task_request, &task_scratch);
            if task_abandoned.load(Ordering::SeqCst) {
                if let Err(err) = task_generator.discard(&task_scratch) {
                    tracing::warn!(
                        scratch = task_scratch.scratch_ref.as_str(),
                        error = %err,
                        "Failed to discard output of abandoned attempt"
                    );
                }
            }
            result
        })
        .await?;

        let mut result = match outcome {
            Bounded::Finished(result) => result,
            Bounded::TimedOut => {
                abandoned.store(true, Ordering::SeqCst);
                Err(match mode {
                    EventGenerationMode::Secondary => BackendError::ResourceExhausted(format!(
                        "time budget of {}s exceeded",
                        limit.as_secs_f64()
                    )),
                    EventGenerationMode::Primary => BackendError::Stage(StageError::timeout(
                        "STAGE_TIMEOUT",
                        format!(
                            "event generation exceeded its {}s timeout",
                            limit.as_secs_f64()
                        ),
                    )),
                })
            }
        };

        if result.is_ok() {
            let publisher = Arc::clone(&generator);
            let publish_scratch = scratch.clone();
            let published =
                run_unbounded("publish", move || publisher.publish(&publish_scratch)).await?;
            if let Err(err) = published {
                result = Err(err);
            }
        }

        if result.is_err() {
            let discarder = Arc::clone(&generator);
            let discard_scratch = scratch.clone();
            let discarded =
                run_unbounded("discard", move || discarder.discard(&discard_scratch)).await?;
            if let Err(err) = discarded {
                tracing::warn!(
                    year = request.year,
                    mode = mode.as_str(),
                    scratch = scratch.scratch_ref.as_str(),
                    error = %err,
                    "Failed to discard partial event-generation output"
                );
            }
        }

        Ok(Attempt {
            result,
            elapsed: started.elapsed(),
        })
    }

    fn report(
        requested: EventGenerationMode,
        mode: EventGenerationMode,
        attempt: Attempt,
        fallback_reason: Option<String>,
    ) -> EventGenerationReport {
        let secs = attempt.elapsed.as_secs_f64();
        let fallback_used = fallback_reason.is_some();
        match attempt.result {
            Ok(events) => {
                let metrics = EventGenerationMetrics {
                    requested_mode: requested,
                    mode,
                    execution_time_secs: secs,
                    total_events: events.total_events,
                    events_per_second: EventGenerationMetrics::throughput(
                        events.total_events,
                        secs,
                    ),
                    peak_memory_bytes: events.peak_memory_bytes,
                    total_compensation: events.total_compensation,
                    fallback_used,
                    fallback_reason,
                    success: true,
                };
                tracing::info!(
                    mode = mode.as_str(),
                    events = metrics.total_events,
                    events_per_second = metrics.events_per_second,
                    fallback_used,
                    "Event generation complete"
                );
                EventGenerationReport {
                    result: Ok(events.into()),
                    metrics,
                }
            }
            Err(err) => {
                let mut metrics = EventGenerationMetrics::failed(requested, mode, secs);
                metrics.fallback_used = fallback_used;
                metrics.fallback_reason = fallback_reason;
                EventGenerationReport {
                    result: Err(err.into_stage_error()),
                    metrics,
                }
            }
        }
    }
}

/// Unbounded blocking call for publish and discard, which must not be abandoned.
async fn run_unbounded<T, F>(label: &str, work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("{label} task panicked: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwise_types::checkpoint::SnapshotRef;
    use planwise_types::error::StageErrorCategory;
    use planwise_types::run::RunId;
    use planwise_types::stage::WorkflowStage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal {
        calls: Mutex<Vec<String>>,
        scratches: Mutex<Vec<String>>,
    }

    impl Journal {
        fn push(&self, entry: impl Into<String>) {
            self.calls.lock().unwrap().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn scratches(&self) -> Vec<String> {
            self.scratches.lock().unwrap().clone()
        }
    }

    struct FakeGenerator {
        mode: EventGenerationMode,
        outcome: Result<u64, BackendError>,
        delay: Duration,
        journal: Arc<Journal>,
    }

    impl FakeGenerator {
        fn ok(mode: EventGenerationMode, events: u64, journal: &Arc<Journal>) -> Arc<Self> {
            Arc::new(Self {
                mode,
                outcome: Ok(events),
                delay: Duration::ZERO,
                journal: Arc::clone(journal),
            })
        }

        fn failing(
            mode: EventGenerationMode,
            err: BackendError,
            journal: &Arc<Journal>,
        ) -> Arc<Self> {
            Arc::new(Self {
                mode,
                outcome: Err(err),
                delay: Duration::ZERO,
                journal: Arc::clone(journal),
            })
        }
    }

    impl EventGenerator for FakeGenerator {
        fn mode(&self) -> EventGenerationMode {
            self.mode
        }

        fn generate(
            &self,
            request: &StageRequest,
            scratch: &ScratchArea,
        ) -> Result<GeneratedEvents, BackendError> {
            self.journal.push(format!("{}:generate", self.mode));
            self.journal
                .scratches
                .lock()
                .unwrap()
                .push(scratch.scratch_ref.to_string());
            std::thread::sleep(self.delay);
            self.outcome.clone().map(|events| GeneratedEvents {
                total_events: events,
                headcount: 100,
                total_compensation: 1_000.0,
                snapshot_ref: request.output_ref.clone(),
                peak_memory_bytes: None,
            })
        }

        fn publish(&self, _scratch: &ScratchArea) -> Result<(), BackendError> {
            self.journal.push(format!("{}:publish", self.mode));
            Ok(())
        }

        fn discard(&self, _scratch: &ScratchArea) -> Result<(), BackendError> {
            self.journal.push(format!("{}:discard", self.mode));
            Ok(())
        }
    }

    fn request() -> StageRequest {
        let run_id = RunId::new("test");
        StageRequest {
            output_ref: SnapshotRef::for_stage(&run_id, 2025, WorkflowStage::EventGeneration),
            run_id,
            year: 2025,
            stage: WorkflowStage::EventGeneration,
            random_seed: 42,
            concurrency: 2,
            upstream: None,
            prior_year: None,
        }
    }

    fn settings(fallback_on_error: bool) -> EventGenerationSettings {
        EventGenerationSettings {
            fallback_on_error,
            primary_timeout: Duration::from_secs(5),
            secondary_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn primary_mode_runs_primary_only() {
        let journal = Arc::new(Journal::default());
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            Some(FakeGenerator::ok(EventGenerationMode::Secondary, 50, &journal)),
            settings(true),
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Primary)
            .await
            .unwrap();

        assert_eq!(report.result.unwrap().row_count, 50);
        assert_eq!(report.metrics.mode, EventGenerationMode::Primary);
        assert!(!report.metrics.fallback_used);
        assert!(report.metrics.success);
        assert_eq!(journal.entries(), vec!["primary:generate", "primary:publish"]);
    }

    #[tokio::test]
    async fn secondary_success_publishes_scratch() {
        let journal = Arc::new(Journal::default());
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            Some(FakeGenerator::ok(EventGenerationMode::Secondary, 70, &journal)),
            settings(true),
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();

        assert_eq!(report.result.unwrap().row_count, 70);
        assert_eq!(report.metrics.mode, EventGenerationMode::Secondary);
        assert_eq!(report.metrics.requested_mode, EventGenerationMode::Secondary);
        assert_eq!(
            journal.entries(),
            vec!["secondary:generate", "secondary:publish"]
        );
    }

    #[tokio::test]
    async fn secondary_failure_discards_then_falls_back() {
        let journal = Arc::new(Journal::default());
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            Some(FakeGenerator::failing(
                EventGenerationMode::Secondary,
                BackendError::SchemaMismatch("missing column".into()),
                &journal,
            )),
            settings(true),
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();

        assert_eq!(report.result.unwrap().row_count, 50);
        assert_eq!(report.metrics.mode, EventGenerationMode::Primary);
        assert_eq!(report.metrics.requested_mode, EventGenerationMode::Secondary);
        assert!(report.metrics.fallback_used);
        assert!(report
            .metrics
            .fallback_reason
            .as_deref()
            .unwrap()
            .contains("missing column"));
        assert_eq!(
            journal.entries(),
            vec![
                "secondary:generate",
                "secondary:discard",
                "primary:generate",
                "primary:publish"
            ]
        );
    }

    #[tokio::test]
    async fn fallback_disabled_propagates_stage_failure() {
        let journal = Arc::new(Journal::default());
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            Some(FakeGenerator::failing(
                EventGenerationMode::Secondary,
                BackendError::Runtime("oom".into()),
                &journal,
            )),
            settings(false),
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();

        let err = report.result.unwrap_err();
        assert_eq!(err.category, StageErrorCategory::Backend);
        assert!(!report.metrics.success);
        assert!(!report.metrics.fallback_used);
        assert_eq!(report.metrics.mode, EventGenerationMode::Secondary);
        assert!(!journal.entries().iter().any(|e| e.starts_with("primary")));
    }

    #[tokio::test]
    async fn validation_failure_never_falls_back() {
        let journal = Arc::new(Journal::default());
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            Some(FakeGenerator::failing(
                EventGenerationMode::Secondary,
                BackendError::ValidationFailure("negative headcount".into()),
                &journal,
            )),
            settings(true),
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();

        assert_eq!(
            report.result.unwrap_err().category,
            StageErrorCategory::Validation
        );
        assert!(!report.metrics.fallback_used);
        assert_eq!(
            journal.entries(),
            vec!["secondary:generate", "secondary:discard"]
        );
    }

    #[tokio::test]
    async fn missing_secondary_is_unavailable_and_falls_back() {
        let journal = Arc::new(Journal::default());
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            None,
            settings(true),
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();
        assert!(report.metrics.fallback_used);
        assert!(report
            .metrics
            .fallback_reason
            .unwrap()
            .contains("unavailable"));
    }

    #[tokio::test]
    async fn secondary_timeout_triggers_fallback() {
        let journal = Arc::new(Journal::default());
        let slow = Arc::new(FakeGenerator {
            mode: EventGenerationMode::Secondary,
            outcome: Ok(70),
            delay: Duration::from_millis(300),
            journal: Arc::clone(&journal),
        });
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            Some(slow),
            EventGenerationSettings {
                fallback_on_error: true,
                primary_timeout: Duration::from_secs(5),
                secondary_timeout: Duration::from_millis(30),
            },
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();
        assert_eq!(report.result.unwrap().row_count, 50);
        assert!(report.metrics.fallback_used);
        assert!(report
            .metrics
            .fallback_reason
            .unwrap()
            .contains("time budget"));
    }

    #[tokio::test]
    async fn abandoned_secondary_never_publishes_after_fallback() {
        let journal = Arc::new(Journal::default());
        let slow = Arc::new(FakeGenerator {
            mode: EventGenerationMode::Secondary,
            outcome: Ok(70),
            delay: Duration::from_millis(200),
            journal: Arc::clone(&journal),
        });
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            Some(slow),
            EventGenerationSettings {
                fallback_on_error: true,
                primary_timeout: Duration::from_secs(5),
                secondary_timeout: Duration::from_millis(20),
            },
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();
        assert_eq!(report.result.unwrap().row_count, 50);

        // Let the detached Secondary task run to completion.
        tokio::time::sleep(Duration::from_millis(600)).await;

        let entries = journal.entries();
        assert!(!entries.contains(&"secondary:publish".to_string()));
        assert_eq!(
            entries.iter().filter(|e| *e == "secondary:discard").count(),
            2,
            "executor and the late task both discard: {entries:?}"
        );
        assert!(entries.contains(&"primary:publish".to_string()));
    }

    #[tokio::test]
    async fn each_attempt_gets_its_own_scratch_area() {
        let journal = Arc::new(Journal::default());
        let executor = EventGenerationExecutor::new(
            FakeGenerator::ok(EventGenerationMode::Primary, 50, &journal),
            Some(FakeGenerator::failing(
                EventGenerationMode::Secondary,
                BackendError::Runtime("boom".into()),
                &journal,
            )),
            settings(true),
        );
        executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();
        executor
            .execute(&request(), EventGenerationMode::Secondary)
            .await
            .unwrap();

        let scratches = journal.scratches();
        assert_eq!(scratches.len(), 4);
        let mut unique = scratches.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), scratches.len());
        assert!(scratches[0].ends_with(".scratch.1"));
    }

    #[tokio::test]
    async fn primary_timeout_is_timeout_error() {
        let journal = Arc::new(Journal::default());
        let slow = Arc::new(FakeGenerator {
            mode: EventGenerationMode::Primary,
            outcome: Ok(70),
            delay: Duration::from_millis(300),
            journal: Arc::clone(&journal),
        });
        let executor = EventGenerationExecutor::new(
            slow,
            None,
            EventGenerationSettings {
                fallback_on_error: true,
                primary_timeout: Duration::from_millis(30),
                secondary_timeout: Duration::from_secs(5),
            },
        );
        let report = executor
            .execute(&request(), EventGenerationMode::Primary)
            .await
            .unwrap();
        assert_eq!(
            report.result.unwrap_err().category,
            StageErrorCategory::Timeout
        );
        assert!(!report.metrics.success);
    }

    struct MemoryHungryColumnar;

    impl ColumnarEngine for MemoryHungryColumnar {
        fn generate_events(
            &self,
            _request: &ColumnarRequest,
            _scratch: &ScratchArea,
        ) -> Result<crate::engines::ColumnarOutput, BackendError> {
            Ok(crate::engines::ColumnarOutput {
                event_count: 10,
                headcount: 5,
                total_compensation: 0.0,
                duration: Duration::from_millis(1),
                peak_memory_bytes: 8 * 1024,
            })
        }

        fn publish(&self, _scratch: &ScratchArea) -> Result<(), BackendError> {
            Ok(())
        }

        fn discard(&self, _scratch: &ScratchArea) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[test]
    fn secondary_generator_enforces_memory_budget() {
        let generator = SecondaryGenerator::new(Arc::new(MemoryHungryColumnar), Some(4 * 1024));
        let scratch = ScratchArea::for_attempt(&request().output_ref, 1);
        let err = generator.generate(&request(), &scratch).unwrap_err();
        assert!(matches!(err, BackendError::ResourceExhausted(_)));

        let roomy = SecondaryGenerator::new(Arc::new(MemoryHungryColumnar), Some(64 * 1024));
        let events = roomy.generate(&request(), &scratch).unwrap();
        assert_eq!(events.peak_memory_bytes, Some(8 * 1024));
        assert_eq!(events.snapshot_ref, request().output_ref);
    }
}
