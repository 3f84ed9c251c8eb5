//! Built-in synthetic collaborators.
//!
//! [`SyntheticTransformationEngine`] runs all six stages against a
//! [`StateBackend`]'s snapshot store. [`SyntheticColumnarEngine`] is its
//! Secondary counterpart for event generation. Both derive event totals
//! from [`model::generate_year_events`], so a run produces the same
//! results whichever backend generated a year.

pub mod model;
pub mod rng;

use std::sync::Arc;
use std::time::Instant;

use planwise_state::StateBackend;
use planwise_types::checkpoint::SnapshotRef;
use planwise_types::error::StageError;
use planwise_types::stage::WorkflowStage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::types::WorkforceAssumptions;
use crate::engines::{
    BackendError, ColumnarEngine, ColumnarOutput, ColumnarRequest, ScratchArea, StageOutput,
    StageRequest, TransformationEngine,
};
use model::{WorkforceSnapshot, YearEvents};

/// Estimated columnar footprint per employee row.
const BYTES_PER_EMPLOYEE: u64 = 512;
/// Fixed columnar working set regardless of workforce size.
const BASE_MEMORY_BYTES: u64 = 1024 * 1024;

/// End-of-year report written by the reporting stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearReport {
    pub year: i32,
    pub headcount: i64,
    pub total_compensation: f64,
    pub average_compensation: f64,
    pub participation_rate: f64,
}

#[derive(Debug)]
enum SnapshotError {
    Missing(String),
    Corrupt(String),
    Storage(String),
}

impl SnapshotError {
    fn into_stage_error(self) -> StageError {
        match self {
            Self::Missing(msg) => StageError::engine("SNAPSHOT_MISSING", msg),
            Self::Corrupt(msg) => StageError::engine("SNAPSHOT_CORRUPT", msg),
            Self::Storage(msg) => StageError::transient("STATE_IO", msg),
        }
    }

    fn into_backend_error(self) -> BackendError {
        match self {
            Self::Missing(msg) | Self::Corrupt(msg) => BackendError::SchemaMismatch(msg),
            Self::Storage(msg) => BackendError::Runtime(msg),
        }
    }
}

fn load<T: DeserializeOwned>(
    backend: &dyn StateBackend,
    key: &SnapshotRef,
) -> Result<T, SnapshotError> {
    let bytes = backend
        .get_snapshot(key.as_str())
        .map_err(|e| SnapshotError::Storage(format!("read {key}: {e}")))?
        .ok_or_else(|| SnapshotError::Missing(format!("no snapshot at {key}")))?;
    serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Corrupt(format!("{key}: {e}")))
}

fn store<T: Serialize>(
    backend: &dyn StateBackend,
    key: &SnapshotRef,
    value: &T,
) -> Result<(), SnapshotError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| SnapshotError::Corrupt(format!("encode {key}: {e}")))?;
    backend
        .put_snapshot(key.as_str(), &bytes)
        .map_err(|e| SnapshotError::Storage(format!("write {key}: {e}")))
}

fn require_upstream(request: &StageRequest) -> Result<&SnapshotRef, StageError> {
    request.upstream.as_ref().ok_or_else(|| {
        StageError::configuration(
            "MISSING_UPSTREAM",
            format!("{} requires the preceding stage's output", request.stage),
        )
    })
}

fn workforce_output(snapshot: &WorkforceSnapshot, rows: u64, at: &SnapshotRef) -> StageOutput {
    StageOutput {
        row_count: rows,
        headcount: snapshot.headcount,
        total_compensation: snapshot.total_compensation,
        snapshot_ref: at.clone(),
    }
}

#[allow(clippy::cast_sign_loss)]
fn row_count(snapshot: &WorkforceSnapshot) -> u64 {
    snapshot.headcount.max(0) as u64
}

/// Transformation engine backed by a snapshot store.
pub struct SyntheticTransformationEngine {
    backend: Arc<dyn StateBackend>,
    assumptions: WorkforceAssumptions,
}

impl SyntheticTransformationEngine {
    #[must_use]
    pub fn new(backend: Arc<dyn StateBackend>, assumptions: WorkforceAssumptions) -> Self {
        Self {
            backend,
            assumptions,
        }
    }

    fn run(&self, request: &StageRequest) -> Result<StageOutput, StageError> {
        let backend = self.backend.as_ref();
        let out = &request.output_ref;
        match request.stage {
            WorkflowStage::Initialization => {
                let census = model::census(request.year, &self.assumptions);
                store(backend, out, &census).map_err(SnapshotError::into_stage_error)?;
                Ok(workforce_output(&census, row_count(&census), out))
            }
            WorkflowStage::Foundation => {
                let baseline = match &request.prior_year {
                    Some(prior) => {
                        let accumulated: WorkforceSnapshot = load(backend, &prior.snapshot_ref)
                            .map_err(SnapshotError::into_stage_error)?;
                        model::roll_forward(&accumulated, request.year)
                    }
                    None => load(backend, require_upstream(request)?)
                        .map_err(SnapshotError::into_stage_error)?,
                };
                store(backend, out, &baseline).map_err(SnapshotError::into_stage_error)?;
                Ok(workforce_output(&baseline, row_count(&baseline), out))
            }
            WorkflowStage::EventGeneration => {
                let baseline: WorkforceSnapshot = load(backend, require_upstream(request)?)
                    .map_err(SnapshotError::into_stage_error)?;
                let year = model::generate_year_events(
                    &baseline,
                    &self.assumptions,
                    request.random_seed,
                );
                store(backend, out, &year).map_err(SnapshotError::into_stage_error)?;
                Ok(workforce_output(&year.projected, year.events.total(), out))
            }
            WorkflowStage::StateAccumulation => {
                let year: YearEvents = load(backend, require_upstream(request)?)
                    .map_err(SnapshotError::into_stage_error)?;
                store(backend, out, &year.projected).map_err(SnapshotError::into_stage_error)?;
                Ok(workforce_output(
                    &year.projected,
                    row_count(&year.projected),
                    out,
                ))
            }
            WorkflowStage::Validation => {
                let snapshot: WorkforceSnapshot = load(backend, require_upstream(request)?)
                    .map_err(SnapshotError::into_stage_error)?;
                if snapshot.participants > snapshot.headcount {
                    return Err(StageError::validation(
                        "PARTICIPATION_EXCEEDS_HEADCOUNT",
                        format!(
                            "{} participants with headcount {}",
                            snapshot.participants, snapshot.headcount
                        ),
                    ));
                }
                store(backend, out, &snapshot).map_err(SnapshotError::into_stage_error)?;
                Ok(workforce_output(&snapshot, row_count(&snapshot), out))
            }
            WorkflowStage::Reporting => {
                let snapshot: WorkforceSnapshot = load(backend, require_upstream(request)?)
                    .map_err(SnapshotError::into_stage_error)?;
                let report = report_for(&snapshot);
                store(backend, out, &report).map_err(SnapshotError::into_stage_error)?;
                Ok(workforce_output(&snapshot, 1, out))
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn report_for(snapshot: &WorkforceSnapshot) -> YearReport {
    let (average_compensation, participation_rate) = if snapshot.headcount > 0 {
        let headcount = snapshot.headcount as f64;
        (
            snapshot.total_compensation / headcount,
            snapshot.participants as f64 / headcount,
        )
    } else {
        (0.0, 0.0)
    };
    YearReport {
        year: snapshot.year,
        headcount: snapshot.headcount,
        total_compensation: snapshot.total_compensation,
        average_compensation,
        participation_rate,
    }
}

impl TransformationEngine for SyntheticTransformationEngine {
    fn execute_stage(&self, request: &StageRequest) -> Result<StageOutput, StageError> {
        tracing::debug!(
            year = request.year,
            stage = %request.stage,
            output = %request.output_ref,
            "Synthetic stage"
        );
        self.run(request)
    }
}

/// Columnar event generator writing through scratch areas.
pub struct SyntheticColumnarEngine {
    backend: Arc<dyn StateBackend>,
    assumptions: WorkforceAssumptions,
}

impl SyntheticColumnarEngine {
    #[must_use]
    pub fn new(backend: Arc<dyn StateBackend>, assumptions: WorkforceAssumptions) -> Self {
        Self {
            backend,
            assumptions,
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn estimated_peak_memory(baseline: &WorkforceSnapshot, events: u64) -> u64 {
    let rows = baseline.headcount.max(0) as u64 + events;
    BASE_MEMORY_BYTES.saturating_add(rows.saturating_mul(BYTES_PER_EMPLOYEE))
}

impl ColumnarEngine for SyntheticColumnarEngine {
    fn generate_events(
        &self,
        request: &ColumnarRequest,
        scratch: &ScratchArea,
    ) -> Result<ColumnarOutput, BackendError> {
        let started = Instant::now();
        let backend = self.backend.as_ref();
        let upstream = request.upstream.as_ref().ok_or_else(|| {
            BackendError::SchemaMismatch("event generation requires a workforce baseline".into())
        })?;
        let baseline: WorkforceSnapshot =
            load(backend, upstream).map_err(SnapshotError::into_backend_error)?;

        let year = model::generate_year_events(&baseline, &self.assumptions, request.random_seed);
        let peak_memory_bytes = estimated_peak_memory(&baseline, year.events.total());
        if let Some(limit) = request.memory_limit_bytes {
            if peak_memory_bytes > limit {
                return Err(BackendError::ResourceExhausted(format!(
                    "needs {peak_memory_bytes} bytes, limit is {limit}"
                )));
            }
        }

        store(backend, &scratch.scratch_ref, &year).map_err(SnapshotError::into_backend_error)?;
        Ok(ColumnarOutput {
            event_count: year.events.total(),
            headcount: year.projected.headcount,
            total_compensation: year.projected.total_compensation,
            duration: started.elapsed(),
            peak_memory_bytes,
        })
    }

    fn publish(&self, scratch: &ScratchArea) -> Result<(), BackendError> {
        let bytes = self
            .backend
            .get_snapshot(scratch.scratch_ref.as_str())
            .map_err(|e| BackendError::Runtime(format!("read {}: {e}", scratch.scratch_ref)))?
            .ok_or_else(|| {
                BackendError::Runtime(format!("nothing to publish at {}", scratch.scratch_ref))
            })?;
        self.backend
            .put_snapshot(scratch.target_ref.as_str(), &bytes)
            .map_err(|e| BackendError::Runtime(format!("write {}: {e}", scratch.target_ref)))?;
        self.discard(scratch)
    }

    fn discard(&self, scratch: &ScratchArea) -> Result<(), BackendError> {
        self.backend
            .delete_snapshot(scratch.scratch_ref.as_str())
            .map(|_| ())
            .map_err(|e| BackendError::Runtime(format!("delete {}: {e}", scratch.scratch_ref)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::PriorYearState;
    use planwise_state::SqliteStateBackend;
    use planwise_types::error::StageErrorCategory;
    use planwise_types::run::RunId;

    fn backend() -> Arc<dyn StateBackend> {
        Arc::new(SqliteStateBackend::in_memory().unwrap())
    }

    fn request(year: i32, stage: WorkflowStage) -> StageRequest {
        let run_id = RunId::new("synthetic");
        let upstream = WorkflowStage::ALL
            .iter()
            .position(|s| *s == stage)
            .and_then(|i| i.checked_sub(1))
            .map(|i| SnapshotRef::for_stage(&run_id, year, WorkflowStage::ALL[i]));
        StageRequest {
            output_ref: SnapshotRef::for_stage(&run_id, year, stage),
            run_id,
            year,
            stage,
            random_seed: 42,
            concurrency: 1,
            upstream,
            prior_year: None,
        }
    }

    fn run_year(engine: &SyntheticTransformationEngine, year: i32) -> Vec<StageOutput> {
        WorkflowStage::ALL
            .iter()
            .map(|stage| engine.execute_stage(&request(year, *stage)).unwrap())
            .collect()
    }

    #[test]
    fn full_year_produces_report() {
        let backend = backend();
        let engine =
            SyntheticTransformationEngine::new(backend.clone(), WorkforceAssumptions::default());
        let outputs = run_year(&engine, 2025);
        assert_eq!(outputs.len(), 6);
        assert_eq!(outputs[0].headcount, 1_000);
        assert!(outputs[2].row_count > 0);

        let report: YearReport = load(
            backend.as_ref(),
            &SnapshotRef::for_stage(&RunId::new("synthetic"), 2025, WorkflowStage::Reporting),
        )
        .unwrap();
        assert_eq!(report.headcount, outputs[3].headcount);
    }

    #[test]
    fn foundation_reads_prior_year_state() {
        let backend = backend();
        let engine =
            SyntheticTransformationEngine::new(backend.clone(), WorkforceAssumptions::default());
        let first = run_year(&engine, 2025);

        let mut foundation = request(2026, WorkflowStage::Foundation);
        foundation.prior_year = Some(PriorYearState {
            year: 2025,
            snapshot_ref: first[3].snapshot_ref.clone(),
        });
        engine
            .execute_stage(&request(2026, WorkflowStage::Initialization))
            .unwrap();
        let out = engine.execute_stage(&foundation).unwrap();
        assert_eq!(out.headcount, first[3].headcount);
    }

    #[test]
    fn missing_upstream_snapshot_is_engine_error() {
        let engine = SyntheticTransformationEngine::new(backend(), WorkforceAssumptions::default());
        let err = engine
            .execute_stage(&request(2025, WorkflowStage::EventGeneration))
            .unwrap_err();
        assert_eq!(err.category, StageErrorCategory::Engine);
        assert_eq!(err.code, "SNAPSHOT_MISSING");
    }

    #[test]
    fn backends_agree_on_event_totals() {
        let backend = backend();
        let assumptions = WorkforceAssumptions::default();
        let primary = SyntheticTransformationEngine::new(backend.clone(), assumptions.clone());
        primary
            .execute_stage(&request(2025, WorkflowStage::Initialization))
            .unwrap();
        primary
            .execute_stage(&request(2025, WorkflowStage::Foundation))
            .unwrap();
        let stage_request = request(2025, WorkflowStage::EventGeneration);
        let from_primary = primary.execute_stage(&stage_request).unwrap();

        let columnar = SyntheticColumnarEngine::new(backend.clone(), assumptions);
        let scratch = ScratchArea::for_attempt(&SnapshotRef::new("elsewhere"), 1);
        let from_columnar = columnar
            .generate_events(
                &ColumnarRequest::from_stage_request(&stage_request, None),
                &scratch,
            )
            .unwrap();
        assert_eq!(from_columnar.event_count, from_primary.row_count);
        assert_eq!(from_columnar.headcount, from_primary.headcount);
    }

    #[test]
    fn scratch_is_invisible_until_published() {
        let backend = backend();
        let assumptions = WorkforceAssumptions::default();
        let primary = SyntheticTransformationEngine::new(backend.clone(), assumptions.clone());
        primary
            .execute_stage(&request(2025, WorkflowStage::Initialization))
            .unwrap();
        primary
            .execute_stage(&request(2025, WorkflowStage::Foundation))
            .unwrap();

        let stage_request = request(2025, WorkflowStage::EventGeneration);
        let scratch = ScratchArea::for_attempt(&stage_request.output_ref, 1);
        let columnar = SyntheticColumnarEngine::new(backend.clone(), assumptions);
        columnar
            .generate_events(
                &ColumnarRequest::from_stage_request(&stage_request, None),
                &scratch,
            )
            .unwrap();
        assert!(backend
            .get_snapshot(scratch.target_ref.as_str())
            .unwrap()
            .is_none());

        columnar.publish(&scratch).unwrap();
        assert!(backend
            .get_snapshot(scratch.target_ref.as_str())
            .unwrap()
            .is_some());
        assert!(backend
            .get_snapshot(scratch.scratch_ref.as_str())
            .unwrap()
            .is_none());
    }

    #[test]
    fn memory_limit_is_enforced() {
        let backend = backend();
        let assumptions = WorkforceAssumptions::default();
        let primary = SyntheticTransformationEngine::new(backend.clone(), assumptions.clone());
        primary
            .execute_stage(&request(2025, WorkflowStage::Initialization))
            .unwrap();
        primary
            .execute_stage(&request(2025, WorkflowStage::Foundation))
            .unwrap();

        let stage_request = request(2025, WorkflowStage::EventGeneration);
        let columnar = SyntheticColumnarEngine::new(backend, assumptions);
        let err = columnar
            .generate_events(
                &ColumnarRequest::from_stage_request(&stage_request, Some(1024)),
                &ScratchArea::for_attempt(&stage_request.output_ref, 1),
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::ResourceExhausted(_)));
    }
}
