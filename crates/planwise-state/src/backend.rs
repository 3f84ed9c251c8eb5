//! State backend trait definition.
//!
//! [`StateBackend`] is the storage contract for stage checkpoints, opaque
//! state snapshots, and year run history. Model types live in
//! [`planwise_types`].

use planwise_types::checkpoint::{Checkpoint, ConfigFingerprint};
use planwise_types::history::{YearRunRecord, YearRunStats};
use planwise_types::run::{RunId, YearStatus};
use planwise_types::stage::WorkflowStage;

use crate::error;

/// Storage contract for pipeline state.
///
/// Every method is a single atomic operation; callers never hold a lock
/// across calls. Implementations must be `Send + Sync` for use behind
/// `Arc<dyn StateBackend>`.
pub trait StateBackend: Send + Sync {
    /// Insert or replace the checkpoint for `(run_id, year, stage)`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn upsert_checkpoint(&self, checkpoint: &Checkpoint) -> error::Result<()>;

    /// Read one checkpoint, or `Ok(None)` if the stage has not completed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_checkpoint(
        &self,
        run_id: &RunId,
        year: i32,
        stage: WorkflowStage,
    ) -> error::Result<Option<Checkpoint>>;

    /// All checkpoints for one year, in stage order.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_checkpoints(&self, run_id: &RunId, year: i32) -> error::Result<Vec<Checkpoint>>;

    /// All checkpoints for a run, ordered by year then stage.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_run_checkpoints(&self, run_id: &RunId) -> error::Result<Vec<Checkpoint>>;

    /// Distinct configuration fingerprints recorded for a run.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn checkpoint_fingerprints(&self, run_id: &RunId) -> error::Result<Vec<ConfigFingerprint>>;

    /// Delete every checkpoint for a run. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete_checkpoints(&self, run_id: &RunId) -> error::Result<u64>;

    /// Store an opaque snapshot value under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn put_snapshot(&self, key: &str, value: &[u8]) -> error::Result<()>;

    /// Read a snapshot value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get_snapshot(&self, key: &str) -> error::Result<Option<Vec<u8>>>;

    /// Delete a snapshot. Returns `true` if a value was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete_snapshot(&self, key: &str) -> error::Result<bool>;

    /// Delete every snapshot whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn delete_snapshots_with_prefix(&self, prefix: &str) -> error::Result<u64>;

    /// Begin a year attempt, returning its history row ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn start_year_run(&self, run_id: &RunId, year: i32) -> error::Result<i64>;

    /// Finalize a year attempt with its terminal status and statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn complete_year_run(
        &self,
        id: i64,
        status: YearStatus,
        stats: &YearRunStats,
    ) -> error::Result<()>;

    /// Most recent history row for `(run_id, year)`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn latest_year_run(&self, run_id: &RunId, year: i32) -> error::Result<Option<YearRunRecord>>;
}
