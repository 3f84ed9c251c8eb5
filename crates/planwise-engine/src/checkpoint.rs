//! Typed checkpoint store over the state backend.
//!
//! Checkpoints for one `(run_id, year)` always form a contiguous prefix of
//! the stage order: [`CheckpointStore::record`] refuses to write a stage
//! whose predecessors are missing.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use planwise_state::StateBackend;
use planwise_types::checkpoint::{Checkpoint, ConfigFingerprint, SnapshotRef};
use planwise_types::run::RunId;
use planwise_types::stage::WorkflowStage;

use crate::registry::StageRegistry;

/// Rows removed by [`CheckpointStore::purge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub checkpoints: u64,
    pub snapshots: u64,
}

/// Stage-completion facts for simulation runs.
#[derive(Clone)]
pub struct CheckpointStore {
    backend: Arc<dyn StateBackend>,
    registry: StageRegistry,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StateBackend>, registry: StageRegistry) -> Self {
        Self { backend, registry }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    /// Record that `stage` of `year` completed. Re-recording the same key
    /// replaces the timestamp, snapshot reference and fingerprint.
    ///
    /// # Errors
    ///
    /// Fails on storage I/O errors, or if an earlier stage of the same year
    /// has no checkpoint.
    pub fn record(
        &self,
        run_id: &RunId,
        year: i32,
        stage: WorkflowStage,
        snapshot_ref: SnapshotRef,
        fingerprint: &ConfigFingerprint,
    ) -> Result<Checkpoint> {
        let existing: HashSet<WorkflowStage> = self
            .backend
            .list_checkpoints(run_id, year)
            .with_context(|| format!("Failed to read checkpoints for {run_id}/{year}"))?
            .into_iter()
            .map(|cp| cp.stage)
            .collect();

        if let Some(missing) = self
            .registry
            .predecessors(stage)
            .iter()
            .find(|d| !existing.contains(&d.stage))
        {
            bail!(
                "Refusing to checkpoint stage '{stage}' for {run_id}/{year}: \
                 earlier stage '{}' has no checkpoint",
                missing.stage
            );
        }

        let checkpoint = Checkpoint {
            run_id: run_id.clone(),
            year,
            stage,
            completed_at: Utc::now(),
            snapshot_ref,
            config_fingerprint: fingerprint.clone(),
        };
        self.backend
            .upsert_checkpoint(&checkpoint)
            .with_context(|| format!("Failed to record checkpoint {}", checkpoint.id()))?;

        tracing::debug!(
            run_id = run_id.as_str(),
            year,
            stage = stage.as_str(),
            snapshot = checkpoint.snapshot_ref.as_str(),
            "Checkpoint recorded"
        );
        Ok(checkpoint)
    }

    /// The furthest stage of the contiguous completed prefix for `year`.
    ///
    /// # Errors
    ///
    /// Fails on storage I/O errors.
    pub fn latest_completed_stage(
        &self,
        run_id: &RunId,
        year: i32,
    ) -> Result<Option<WorkflowStage>> {
        Ok(self.latest_checkpoint(run_id, year)?.map(|cp| cp.stage))
    }

    /// Checkpoint of the furthest contiguously completed stage for `year`.
    ///
    /// # Errors
    ///
    /// Fails on storage I/O errors.
    pub fn latest_checkpoint(&self, run_id: &RunId, year: i32) -> Result<Option<Checkpoint>> {
        let mut checkpoints = self
            .backend
            .list_checkpoints(run_id, year)
            .with_context(|| format!("Failed to read checkpoints for {run_id}/{year}"))?;

        let mut latest = None;
        for descriptor in self.registry.stages() {
            match checkpoints.iter().position(|cp| cp.stage == descriptor.stage) {
                Some(idx) => latest = Some(checkpoints.swap_remove(idx)),
                None => break,
            }
        }
        Ok(latest)
    }

    /// # Errors
    ///
    /// Fails on storage I/O errors.
    pub fn checkpoint(
        &self,
        run_id: &RunId,
        year: i32,
        stage: WorkflowStage,
    ) -> Result<Option<Checkpoint>> {
        self.backend
            .get_checkpoint(run_id, year, stage)
            .with_context(|| format!("Failed to read checkpoint {run_id}/{year}/{stage}"))
    }

    /// True when any checkpoint of the run was written under a different fingerprint.
    ///
    /// # Errors
    ///
    /// Fails on storage I/O errors.
    pub fn is_stale(&self, run_id: &RunId, fingerprint: &ConfigFingerprint) -> Result<bool> {
        let recorded = self
            .backend
            .checkpoint_fingerprints(run_id)
            .with_context(|| format!("Failed to read checkpoint fingerprints for {run_id}"))?;
        Ok(recorded.iter().any(|fp| fp != fingerprint))
    }

    /// Delete every checkpoint and snapshot of a run.
    ///
    /// # Errors
    ///
    /// Fails on storage I/O errors.
    pub fn purge(&self, run_id: &RunId) -> Result<PurgeStats> {
        let checkpoints = self
            .backend
            .delete_checkpoints(run_id)
            .with_context(|| format!("Failed to purge checkpoints for {run_id}"))?;
        let snapshots = self
            .backend
            .delete_snapshots_with_prefix(&SnapshotRef::run_prefix(run_id))
            .with_context(|| format!("Failed to purge snapshots for {run_id}"))?;

        tracing::info!(
            run_id = run_id.as_str(),
            checkpoints,
            snapshots,
            "Purged run checkpoints"
        );
        Ok(PurgeStats {
            checkpoints,
            snapshots,
        })
    }
}
