//! State backend creation and resource resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use planwise_state::{SqliteStateBackend, StateBackend};

use crate::config::types::{SimulationConfig, StateBackendKind, Threads};

const MAX_AUTO_CONCURRENCY: usize = 16;

/// Default state database location: `$HOME/.planwise/state.db`.
#[must_use]
pub fn default_state_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".planwise").join("state.db")
}

/// Open the configured state backend.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or initialized.
pub fn create_state_backend(config: &SimulationConfig) -> Result<Arc<dyn StateBackend>> {
    match config.state.backend {
        StateBackendKind::Sqlite => {
            let backend = if let Some(path) = &config.state.connection {
                SqliteStateBackend::open(Path::new(path)).context("Failed to open state DB")?
            } else {
                SqliteStateBackend::open(&default_state_path())
                    .context("Failed to open default state DB")?
            };
            Ok(Arc::new(backend) as Arc<dyn StateBackend>)
        }
    }
}

/// Probe the state backend, logging the outcome.
#[must_use]
pub fn check_state_backend(config: &SimulationConfig) -> bool {
    match create_state_backend(config) {
        Ok(_) => {
            tracing::info!("State backend: OK");
            true
        }
        Err(e) => {
            tracing::error!("State backend: FAILED: {e:#}");
            false
        }
    }
}

/// Worker-pool size handed to collaborators.
#[must_use]
pub fn resolve_concurrency(threads: Threads) -> usize {
    match threads {
        Threads::Manual(n) => usize::try_from(n).unwrap_or(usize::MAX).max(1),
        Threads::Auto => std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
            .min(MAX_AUTO_CONCURRENCY),
    }
}
