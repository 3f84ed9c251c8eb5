use std::path::Path;

use anyhow::Result;
use planwise_engine::config::fingerprint::compute_fingerprint;
use planwise_engine::context::PipelineSettings;
use planwise_engine::resolve::check_state_backend;

/// Execute the `check` command: validate simulation config and state backend.
pub fn execute(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;
    println!("Simulation config: OK");

    let settings = PipelineSettings::from_config(&config)?;
    let fingerprint = compute_fingerprint(&config)?;
    println!(
        "  Scenario:        {} ({}..={})",
        config.scenario, config.simulation.start_year, config.simulation.end_year
    );
    println!("  Event mode:      {}", settings.event_mode);
    println!("  Fallback:        {}", settings.fallback_on_error);
    println!("  Concurrency:     {}", settings.concurrency);
    println!("  Fingerprint:     {}", fingerprint.short());

    if check_state_backend(&config) {
        println!("State backend:     OK");
        println!("\nAll checks passed.");
        Ok(())
    } else {
        println!("State backend:     FAILED");
        anyhow::bail!("One or more checks failed")
    }
}
