use std::path::Path;

use anyhow::{Context, Result};
use planwise_engine::checkpoint::CheckpointStore;
use planwise_engine::config::fingerprint::compute_fingerprint;
use planwise_engine::config::types::SimulationConfig;
use planwise_engine::registry::StageRegistry;
use planwise_engine::resolve::create_state_backend;
use planwise_types::run::RunId;

fn open_store(config: &SimulationConfig) -> Result<CheckpointStore> {
    let backend = create_state_backend(config)?;
    Ok(CheckpointStore::new(backend, StageRegistry::standard()))
}

fn resolve_run_id(config: &SimulationConfig, run_id: Option<&str>) -> RunId {
    RunId::new(run_id.unwrap_or(&config.scenario))
}

/// Execute `checkpoints list`: print every checkpoint recorded for a run.
pub fn list(config_path: &Path, run_id: Option<&str>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let run_id = resolve_run_id(&config, run_id);
    let store = open_store(&config)?;
    let current = compute_fingerprint(&config)?;

    let checkpoints = store
        .backend()
        .list_run_checkpoints(&run_id)
        .with_context(|| format!("Failed to list checkpoints for {run_id}"))?;
    if checkpoints.is_empty() {
        println!("No checkpoints for run '{run_id}'.");
        return Ok(());
    }

    println!("Checkpoints for run '{run_id}':");
    for checkpoint in &checkpoints {
        let marker = if checkpoint.config_fingerprint == current {
            ""
        } else {
            "  (stale)"
        };
        println!(
            "  {}  {:18}  {}  {}{marker}",
            checkpoint.year,
            checkpoint.stage.as_str(),
            checkpoint.completed_at.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.config_fingerprint.short(),
        );
    }
    Ok(())
}

/// Execute `checkpoints purge`: delete a run's checkpoints and snapshots.
pub fn purge(config_path: &Path, run_id: Option<&str>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let run_id = resolve_run_id(&config, run_id);
    let stats = open_store(&config)?.purge(&run_id)?;
    println!(
        "Purged run '{run_id}': {} checkpoint(s), {} snapshot(s).",
        stats.checkpoints, stats.snapshots
    );
    Ok(())
}
