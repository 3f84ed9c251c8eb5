//! Shared data model for the planwise simulation pipeline.
//!
//! Pure data types consumed by the state backend, the engine and the CLI.
//! Nothing in this crate performs I/O.

pub mod checkpoint;
pub mod error;
pub mod history;
pub mod metrics;
pub mod run;
pub mod stage;
