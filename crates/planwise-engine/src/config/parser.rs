//! Simulation YAML parsing with environment variable substitution.
//!
//! `${VAR}` references are resolved inside the parsed document's string
//! values, never in the raw text, so comments are ignored and a substituted
//! value cannot change the document's structure. A value that consists of a
//! single reference takes the scalar type of what it expands to, which lets
//! `timeout_seconds: ${SECONDARY_TIMEOUT}` deserialize as a number and
//! `mode: ${EVENT_MODE}` be checked against the closed set of modes.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_yaml::Value;

use crate::config::types::SimulationConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// A `${VAR}` reference with no value in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MissingVar {
    name: String,
    /// Dotted key path of the value that referenced it.
    key: String,
}

/// Resolve every `${VAR}` reference in the string values of `doc`.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set,
/// together with the key that referenced it.
pub fn substitute_env_vars(doc: &mut Value) -> Result<()> {
    let mut missing = Vec::new();
    substitute_in(doc, &mut String::new(), &mut missing);

    if !missing.is_empty() {
        let listed: Vec<String> = missing
            .iter()
            .map(|m| format!("{} (at {})", m.name, m.key))
            .collect();
        anyhow::bail!("Missing environment variable(s): {}", listed.join(", "));
    }
    Ok(())
}

fn substitute_in(value: &mut Value, key: &mut String, missing: &mut Vec<MissingVar>) {
    match value {
        Value::Mapping(map) => {
            for (name, child) in map.iter_mut() {
                let segment = match name {
                    Value::String(s) => s.clone(),
                    other => serde_yaml::to_string(other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };
                let len = key.len();
                if !key.is_empty() {
                    key.push('.');
                }
                key.push_str(&segment);
                substitute_in(child, key, missing);
                key.truncate(len);
            }
        }
        Value::Sequence(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                let len = key.len();
                key.push_str(&format!("[{i}]"));
                substitute_in(item, key, missing);
                key.truncate(len);
            }
        }
        Value::String(text) => {
            if let Some(resolved) = resolve_string(text, key, missing) {
                *value = resolved;
            }
        }
        Value::Tagged(tagged) => substitute_in(&mut tagged.value, key, missing),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Expand the references in one string value, or `None` if it has none or
/// any of them is unset.
fn resolve_string(text: &str, key: &str, missing: &mut Vec<MissingVar>) -> Option<Value> {
    let mut expanded = String::with_capacity(text.len());
    let mut last = 0;
    let mut references = 0;
    let mut complete = true;

    for cap in ENV_VAR_RE.captures_iter(text) {
        let whole = cap.get(0)?;
        let name = &cap[1];
        references += 1;
        expanded.push_str(&text[last..whole.start()]);
        last = whole.end();
        match std::env::var(name) {
            Ok(val) => expanded.push_str(&val),
            Err(_) => {
                complete = false;
                if !missing.iter().any(|m| m.name == name) {
                    missing.push(MissingVar {
                        name: name.to_string(),
                        key: key.to_string(),
                    });
                }
            }
        }
    }
    if references == 0 || !complete {
        return None;
    }
    expanded.push_str(&text[last..]);

    let single_reference = references == 1 && ENV_VAR_RE.find(text)?.as_str() == text;
    if single_reference {
        if let Ok(scalar @ (Value::Null | Value::Bool(_) | Value::Number(_))) =
            serde_yaml::from_str::<Value>(&expanded)
        {
            return Some(scalar);
        }
    }
    Some(Value::String(expanded))
}

/// Parse a simulation YAML string, resolving environment references.
///
/// # Errors
///
/// Returns an error if the YAML is malformed, a referenced variable is
/// unset, or the document does not match the simulation config shape.
pub fn parse_config_str(yaml_str: &str) -> Result<SimulationConfig> {
    let mut doc: Value =
        serde_yaml::from_str(yaml_str).context("Failed to parse simulation YAML")?;
    substitute_env_vars(&mut doc)?;
    let config: SimulationConfig =
        serde_yaml::from_value(doc).context("Invalid simulation config")?;
    Ok(config)
}

/// Parse a simulation YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<SimulationConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read simulation config: {}", path.display()))?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwise_types::metrics::EventGenerationMode;

    fn doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("PW_TEST_SCENARIO", "growth_high");
        let mut value = doc("scenario: ${PW_TEST_SCENARIO}\nlabel: run-${PW_TEST_SCENARIO}-a\n");
        substitute_env_vars(&mut value).unwrap();
        assert_eq!(value, doc("scenario: growth_high\nlabel: run-growth_high-a\n"));
        std::env::remove_var("PW_TEST_SCENARIO");
    }

    #[test]
    fn test_no_env_vars_passthrough() {
        let input = doc("scenario: baseline\nversion: \"1.0\"");
        let mut value = input.clone();
        substitute_env_vars(&mut value).unwrap();
        assert_eq!(value, input);
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let mut value = doc(
            "state:\n  connection: ${PW_MISSING_X}\nscenario: ${PW_MISSING_Y}-${PW_MISSING_X}\n",
        );
        let err = substitute_env_vars(&mut value).unwrap_err().to_string();
        assert!(err.contains("PW_MISSING_X (at state.connection)"), "{err}");
        assert!(err.contains("PW_MISSING_Y (at scenario)"), "{err}");
        assert_eq!(err.matches("PW_MISSING_X").count(), 1);
    }

    #[test]
    fn test_references_in_comments_are_ignored() {
        let mut value = doc("# set ${PW_NEVER_SET} to override\nscenario: baseline\n");
        substitute_env_vars(&mut value).unwrap();
        assert_eq!(value, doc("scenario: baseline\n"));
    }

    #[test]
    fn test_substituted_value_cannot_add_keys() {
        std::env::set_var("PW_TEST_INJECTED", "x\nfail_fast: false");
        let mut value = doc("scenario: ${PW_TEST_INJECTED}\n");
        substitute_env_vars(&mut value).unwrap();
        let map = value.as_mapping().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get("scenario").and_then(Value::as_str),
            Some("x\nfail_fast: false")
        );
        std::env::remove_var("PW_TEST_INJECTED");
    }

    #[test]
    fn test_env_mode_is_checked_against_known_modes() {
        let yaml = r#"
version: "1.0"
scenario: baseline
simulation:
  start_year: 2025
  end_year: 2026
event_generation:
  mode: ${PW_TEST_EVENT_MODE}
"#;
        std::env::set_var("PW_TEST_EVENT_MODE", "secondary");
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.event_generation.mode, EventGenerationMode::Secondary);

        std::env::set_var("PW_TEST_EVENT_MODE", "turbo");
        assert!(parse_config_str(yaml).is_err());
        std::env::remove_var("PW_TEST_EVENT_MODE");
    }

    #[test]
    fn test_parse_config_from_string() {
        std::env::set_var("PW_TEST_STATE_PATH", "/tmp/planwise-test.db");
        let yaml = r#"
version: "1.0"
scenario: baseline
simulation:
  start_year: 2025
  end_year: 2029
  random_seed: 7
  fail_fast: false
event_generation:
  mode: secondary
  fallback_on_error: false
  secondary:
    max_memory: 2gb
    timeout_seconds: 120
workforce:
  starting_headcount: 5000
  growth_rate: 0.05
state:
  backend: sqlite
  connection: ${PW_TEST_STATE_PATH}
resources:
  threads: 4
  max_retries: 2
checkpoints:
  retain: false
"#;
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.scenario, "baseline");
        assert_eq!(config.simulation.start_year, 2025);
        assert_eq!(config.simulation.end_year, 2029);
        assert_eq!(config.simulation.random_seed, 7);
        assert!(!config.simulation.fail_fast);
        assert_eq!(config.event_generation.mode, EventGenerationMode::Secondary);
        assert!(!config.event_generation.fallback_on_error);
        assert_eq!(
            config.event_generation.secondary.max_memory.as_deref(),
            Some("2gb")
        );
        assert_eq!(config.event_generation.secondary.timeout_seconds, Some(120));
        assert_eq!(config.workforce.starting_headcount, 5000);
        // Unspecified workforce fields keep their defaults.
        assert!((config.workforce.termination_rate - 0.12).abs() < f64::EPSILON);
        assert_eq!(
            config.state.connection.as_deref(),
            Some("/tmp/planwise-test.db")
        );
        assert_eq!(config.resources.max_retries, 2);
        assert!(!config.checkpoints.retain);
        std::env::remove_var("PW_TEST_STATE_PATH");
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let yaml = r#"
version: "1.0"
scenario: baseline
simulation:
  start_year: 2025
  end_year: 2026
event_generation:
  mode: gpu
"#;
        assert!(parse_config_str(yaml).is_err());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = parse_config(Path::new("/definitely/not/here.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("/definitely/not/here.yaml"));
    }
}
