//! Configuration fingerprinting for checkpoint staleness detection.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::{Context, Result};
use planwise_types::checkpoint::ConfigFingerprint;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::types::{SimulationConfig, ValidationConfig, WorkforceAssumptions};

/// The subset of configuration that determines stage outputs.
///
/// The year window, backend selection, resources, and state location are
/// excluded so that extending a run or switching backends keeps checkpoints.
#[derive(Serialize)]
struct FingerprintView<'a> {
    version: &'a str,
    scenario: &'a str,
    random_seed: u64,
    workforce: &'a WorkforceAssumptions,
    validation: &'a ValidationConfig,
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// SHA-256 over the sorted-key JSON form of any serializable value.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized to JSON.
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value).context("Failed to serialize value for hashing")?;
    let canonical = serde_json::to_string(&canonicalize(value))
        .context("Failed to serialize canonical JSON")?;

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

/// Compute the fingerprint recorded on every checkpoint of a run.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn compute_fingerprint(config: &SimulationConfig) -> Result<ConfigFingerprint> {
    let view = FingerprintView {
        version: &config.version,
        scenario: &config.scenario,
        random_seed: config.simulation.random_seed,
        workforce: &config.workforce,
        validation: &config.validation,
    };
    Ok(ConfigFingerprint::new(hash_canonical(&view)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;
    use planwise_types::metrics::EventGenerationMode;

    fn base() -> SimulationConfig {
        parse_config_str(
            r#"
version: "1.0"
scenario: baseline
simulation:
  start_year: 2025
  end_year: 2027
  random_seed: 11
"#,
        )
        .unwrap()
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = compute_fingerprint(&base()).unwrap();
        let b = compute_fingerprint(&base()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn assumption_changes_alter_fingerprint() {
        let original = compute_fingerprint(&base()).unwrap();

        let mut seed = base();
        seed.simulation.random_seed = 12;
        assert_ne!(compute_fingerprint(&seed).unwrap(), original);

        let mut growth = base();
        growth.workforce.growth_rate = 0.04;
        assert_ne!(compute_fingerprint(&growth).unwrap(), original);

        let mut scenario = base();
        scenario.scenario = "high_growth".to_string();
        assert_ne!(compute_fingerprint(&scenario).unwrap(), original);
    }

    #[test]
    fn operational_changes_keep_fingerprint() {
        let original = compute_fingerprint(&base()).unwrap();

        let mut changed = base();
        changed.simulation.end_year = 2035;
        changed.simulation.fail_fast = false;
        changed.event_generation.mode = EventGenerationMode::Secondary;
        changed.resources.max_retries = 3;
        changed.state.connection = Some("/tmp/elsewhere.db".to_string());
        changed.checkpoints.retain = false;
        assert_eq!(compute_fingerprint(&changed).unwrap(), original);
    }

    #[test]
    fn canonical_hash_ignores_key_order() {
        let a = serde_json::json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = serde_json::json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(hash_canonical(&a).unwrap(), hash_canonical(&b).unwrap());
    }
}
