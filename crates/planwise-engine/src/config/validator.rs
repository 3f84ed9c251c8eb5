//! Semantic validation for parsed simulation configuration values.

use anyhow::{bail, Result};

use crate::config::types::{parse_byte_size, SimulationConfig, Threads, WorkforceAssumptions};

fn validate_rate(name: &str, value: f64, errors: &mut Vec<String>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(format!("workforce.{name} must be between 0 and 1, got {value}"));
    }
}

fn validate_workforce(workforce: &WorkforceAssumptions, errors: &mut Vec<String>) {
    if workforce.starting_headcount == 0 {
        errors.push("workforce.starting_headcount must be at least 1".to_string());
    }
    if !workforce.average_compensation.is_finite() || workforce.average_compensation < 0.0 {
        errors.push("workforce.average_compensation must be a non-negative number".to_string());
    }
    if !workforce.growth_rate.is_finite() || workforce.growth_rate <= -1.0 {
        errors.push(format!(
            "workforce.growth_rate must be greater than -1, got {}",
            workforce.growth_rate
        ));
    }
    validate_rate("termination_rate", workforce.termination_rate, errors);
    validate_rate(
        "new_hire_termination_rate",
        workforce.new_hire_termination_rate,
        errors,
    );
    validate_rate("promotion_rate", workforce.promotion_rate, errors);
    validate_rate("merit_raise", workforce.merit_raise, errors);
    validate_rate("participation_rate", workforce.participation_rate, errors);
}

/// Validate a parsed simulation configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &SimulationConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported config version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.scenario.trim().is_empty() {
        errors.push("Scenario name must not be empty".to_string());
    }

    if config.simulation.start_year > config.simulation.end_year {
        errors.push(format!(
            "simulation.start_year ({}) must not be after end_year ({})",
            config.simulation.start_year, config.simulation.end_year
        ));
    }

    validate_workforce(&config.workforce, &mut errors);

    if !config.validation.max_events_per_employee.is_finite()
        || config.validation.max_events_per_employee <= 0.0
    {
        errors.push("validation.max_events_per_employee must be positive".to_string());
    }

    if let Some(ref mem) = config.event_generation.secondary.max_memory {
        if parse_byte_size(mem).is_err() {
            errors.push(format!("event_generation.secondary: invalid max_memory '{mem}'"));
        }
    }
    if config.event_generation.secondary.timeout_seconds == Some(0) {
        errors.push("event_generation.secondary: timeout_seconds must be > 0".to_string());
    }

    if matches!(config.resources.threads, Threads::Manual(0)) {
        errors.push("resources.threads must be at least 1".to_string());
    }
    if config.resources.stage_timeout_seconds == 0 {
        errors.push("resources.stage_timeout_seconds must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Simulation config validation failed:\n  - {}", errors.join("\n  - "));
    }
}
