//! Durable state for the planwise simulation pipeline.
//!
//! Provides the [`StateBackend`] trait and a [`SqliteStateBackend`]
//! implementation for stage checkpoints, accumulated-state snapshots, and
//! per-year run history.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::StateBackend;
pub use error::StateError;
pub use sqlite::SqliteStateBackend;

/// Common imports for backend consumers.
pub mod prelude {
    pub use crate::backend::StateBackend;
    pub use crate::error::StateError;
    pub use crate::sqlite::SqliteStateBackend;
    pub use planwise_types::checkpoint::{Checkpoint, ConfigFingerprint, SnapshotRef};
    pub use planwise_types::history::{YearRunRecord, YearRunStats};
    pub use planwise_types::run::{RunId, YearStatus};
    pub use planwise_types::stage::WorkflowStage;
}
