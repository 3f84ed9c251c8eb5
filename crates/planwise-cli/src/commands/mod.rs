pub mod check;
pub mod checkpoints;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use planwise_engine::config::types::SimulationConfig;
use planwise_engine::config::{parser, validator};

/// Parse and validate a simulation config file.
pub(crate) fn load_config(config_path: &Path) -> Result<SimulationConfig> {
    let config = parser::parse_config(config_path)
        .with_context(|| format!("Failed to parse simulation config: {}", config_path.display()))?;
    validator::validate_config(&config)?;
    Ok(config)
}
