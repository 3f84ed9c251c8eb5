//! Simulation configuration model.

use anyhow::{bail, Context, Result};
use planwise_types::metrics::EventGenerationMode;
use serde::{Deserialize, Serialize};

/// Top-level simulation configuration, as loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub version: String,
    /// Scenario identifier; also the default run ID.
    pub scenario: String,
    pub simulation: SimulationWindow,
    #[serde(default)]
    pub event_generation: EventGenerationConfig,
    #[serde(default)]
    pub workforce: WorkforceAssumptions,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationWindow {
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

fn default_random_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Event-generation backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGenerationConfig {
    #[serde(default)]
    pub mode: EventGenerationMode,
    #[serde(default = "default_true")]
    pub fallback_on_error: bool,
    #[serde(default)]
    pub secondary: SecondaryBackendConfig,
}

impl Default for EventGenerationConfig {
    fn default() -> Self {
        Self {
            mode: EventGenerationMode::Primary,
            fallback_on_error: true,
            secondary: SecondaryBackendConfig::default(),
        }
    }
}

/// Resource budget for the Secondary (columnar) backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryBackendConfig {
    /// Peak memory budget, e.g. `"4gb"`. Exceeding it is a resource-exhaustion failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<String>,
    /// Overrides `resources.stage_timeout_seconds` for Secondary attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Workforce assumptions consumed by the synthetic engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkforceAssumptions {
    pub starting_headcount: u64,
    pub average_compensation: f64,
    pub growth_rate: f64,
    pub termination_rate: f64,
    pub new_hire_termination_rate: f64,
    pub promotion_rate: f64,
    pub merit_raise: f64,
    pub participation_rate: f64,
}

impl Default for WorkforceAssumptions {
    fn default() -> Self {
        Self {
            starting_headcount: 1_000,
            average_compensation: 75_000.0,
            growth_rate: 0.03,
            termination_rate: 0.12,
            new_hire_termination_rate: 0.25,
            promotion_rate: 0.08,
            merit_raise: 0.035,
            participation_rate: 0.75,
        }
    }
}

/// Thresholds for the built-in validation gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Upper bound on generated events per prior-year employee.
    pub max_events_per_employee: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_events_per_employee: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackendKind {
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackendKind,
    /// Database path; defaults to `$HOME/.planwise/state.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

/// Worker-pool size handed to stage collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "ThreadsRepr", into = "ThreadsRepr")]
pub enum Threads {
    /// Available CPU cores, capped.
    #[default]
    Auto,
    Manual(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ThreadsRepr {
    Count(u32),
    Keyword(String),
}

impl TryFrom<ThreadsRepr> for Threads {
    type Error = String;

    fn try_from(value: ThreadsRepr) -> std::result::Result<Self, Self::Error> {
        match value {
            ThreadsRepr::Count(n) => Ok(Self::Manual(n)),
            ThreadsRepr::Keyword(k) if k.eq_ignore_ascii_case("auto") => Ok(Self::Auto),
            ThreadsRepr::Keyword(k) => Err(format!(
                "invalid threads value '{k}', expected 'auto' or a positive integer"
            )),
        }
    }
}

impl From<Threads> for ThreadsRepr {
    fn from(value: Threads) -> Self {
        match value {
            Threads::Auto => Self::Keyword("auto".to_string()),
            Threads::Manual(n) => Self::Count(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub threads: Threads,
    #[serde(default = "default_stage_timeout_seconds")]
    pub stage_timeout_seconds: u64,
    /// Retries for stage errors marked retryable.
    #[serde(default)]
    pub max_retries: u32,
}

fn default_stage_timeout_seconds() -> u64 {
    3_600
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            threads: Threads::Auto,
            stage_timeout_seconds: default_stage_timeout_seconds(),
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Keep checkpoints after a fully successful run.
    #[serde(default = "default_true")]
    pub retain: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { retain: true }
    }
}

/// Parse a human byte size (`"512"`, `"64kb"`, `"4gb"`) into bytes.
///
/// # Errors
///
/// Returns an error for empty strings, unknown suffixes, or overflow.
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let normalized = input.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        bail!("byte size must not be empty");
    }

    let split = normalized
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(normalized.len());
    let (digits, suffix) = normalized.split_at(split);
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid byte size '{input}'"))?;

    let multiplier: u64 = match suffix.trim() {
        "" | "b" => 1,
        "kb" | "k" => 1024,
        "mb" | "m" => 1024 * 1024,
        "gb" | "g" => 1024 * 1024 * 1024,
        other => bail!("unknown byte size suffix '{other}' in '{input}'"),
    };

    value
        .checked_mul(multiplier)
        .with_context(|| format!("byte size '{input}' overflows"))
}
