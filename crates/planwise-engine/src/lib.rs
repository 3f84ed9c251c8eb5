//! Multi-year simulation pipeline for planwise.
//!
//! Sequences simulation years, drives each year through the fixed stage
//! chain, checkpoints completed stages for resumption, and runs event
//! generation on a Primary or Secondary backend with fallback.

pub(crate) mod blocking;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod engines;
pub mod error;
pub mod event_generation;
pub mod execution;
pub mod gates;
pub mod hooks;
pub mod orchestrator;
pub mod registry;
pub mod resolve;
pub mod result;
pub mod synthetic;
pub mod year;

// Re-export public API for convenience
pub use error::PipelineError;
pub use execution::{CancellationToken, ExecutionOptions, RunOverrides};
pub use orchestrator::{build_run, run_simulation, PipelineOrchestrator};
pub use result::{RunOutcome, RunSummary, YearSummary};
