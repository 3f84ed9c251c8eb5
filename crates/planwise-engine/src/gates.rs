//! Pass/fail validation gates applied after each stage.

use std::sync::Arc;

use planwise_types::stage::WorkflowStage;

use crate::engines::StageOutput;

/// What a gate sees after a stage finishes.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub year: i32,
    pub stage: WorkflowStage,
    pub output: &'a StageOutput,
    /// Workforce size at the start of the year, when known in this invocation.
    pub baseline_headcount: Option<i64>,
}

pub trait ValidationGate: Send + Sync {
    fn name(&self) -> &str;

    /// Stages this gate runs after; `None` means every stage.
    fn applies_to(&self) -> Option<&[WorkflowStage]> {
        None
    }

    /// # Errors
    ///
    /// Returns a human-readable reason when the output is rejected.
    fn check(&self, input: &GateInput<'_>) -> Result<(), String>;
}

pub struct NonNegativeHeadcount;

impl ValidationGate for NonNegativeHeadcount {
    fn name(&self) -> &str {
        "non_negative_headcount"
    }

    fn check(&self, input: &GateInput<'_>) -> Result<(), String> {
        if input.output.headcount < 0 {
            return Err(format!("headcount is negative ({})", input.output.headcount));
        }
        Ok(())
    }
}

pub struct NonNegativeCompensation;

impl ValidationGate for NonNegativeCompensation {
    fn name(&self) -> &str {
        "non_negative_compensation"
    }

    fn check(&self, input: &GateInput<'_>) -> Result<(), String> {
        let total = input.output.total_compensation;
        if !total.is_finite() || total < 0.0 {
            return Err(format!("total compensation is invalid ({total})"));
        }
        Ok(())
    }
}

/// Rejects event volumes implausibly large for the starting workforce.
pub struct EventCountSanity {
    max_events_per_employee: f64,
}

impl EventCountSanity {
    #[must_use]
    pub fn new(max_events_per_employee: f64) -> Self {
        Self {
            max_events_per_employee,
        }
    }
}

impl ValidationGate for EventCountSanity {
    fn name(&self) -> &str {
        "event_count_sanity"
    }

    fn applies_to(&self) -> Option<&[WorkflowStage]> {
        Some(&[WorkflowStage::EventGeneration])
    }

    #[allow(clippy::cast_precision_loss)]
    fn check(&self, input: &GateInput<'_>) -> Result<(), String> {
        let Some(baseline) = input.baseline_headcount else {
            return Ok(());
        };
        let limit = baseline.max(1) as f64 * self.max_events_per_employee;
        let events = input.output.row_count as f64;
        if events > limit {
            return Err(format!(
                "{} events exceed {limit} allowed for a workforce of {baseline}",
                input.output.row_count
            ));
        }
        Ok(())
    }
}

/// Ordered set of gates.
#[derive(Clone, Default)]
pub struct GateRegistry {
    gates: Vec<Arc<dyn ValidationGate>>,
}

impl GateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in gates.
    #[must_use]
    pub fn with_builtin(max_events_per_employee: f64) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NonNegativeHeadcount));
        registry.register(Arc::new(NonNegativeCompensation));
        registry.register(Arc::new(EventCountSanity::new(max_events_per_employee)));
        registry
    }

    pub fn register(&mut self, gate: Arc<dyn ValidationGate>) {
        self.gates.push(gate);
    }

    /// Run every applicable gate, stopping at the first rejection.
    ///
    /// # Errors
    ///
    /// Returns `"<gate>: <reason>"` for the first failing gate.
    pub fn check(&self, input: &GateInput<'_>) -> Result<(), String> {
        for gate in &self.gates {
            let applies = gate
                .applies_to()
                .map_or(true, |stages| stages.contains(&input.stage));
            if !applies {
                continue;
            }
            gate.check(input)
                .map_err(|reason| format!("{}: {reason}", gate.name()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwise_types::checkpoint::SnapshotRef;

    fn output(row_count: u64, headcount: i64, total_compensation: f64) -> StageOutput {
        StageOutput {
            row_count,
            headcount,
            total_compensation,
            snapshot_ref: SnapshotRef::new("s"),
        }
    }

    fn input(stage: WorkflowStage, output: &StageOutput, baseline: Option<i64>) -> GateInput<'_> {
        GateInput {
            year: 2025,
            stage,
            output,
            baseline_headcount: baseline,
        }
    }

    #[test]
    fn builtin_gates_accept_sane_output() {
        let registry = GateRegistry::with_builtin(10.0);
        let out = output(500, 1_000, 75_000_000.0);
        assert!(registry
            .check(&input(WorkflowStage::EventGeneration, &out, Some(1_000)))
            .is_ok());
    }

    #[test]
    fn negative_headcount_rejected() {
        let registry = GateRegistry::with_builtin(10.0);
        let out = output(0, -3, 0.0);
        let err = registry
            .check(&input(WorkflowStage::StateAccumulation, &out, None))
            .unwrap_err();
        assert!(err.starts_with("non_negative_headcount"));
    }

    #[test]
    fn negative_or_nan_compensation_rejected() {
        let registry = GateRegistry::with_builtin(10.0);
        let out = output(0, 10, -1.0);
        assert!(registry
            .check(&input(WorkflowStage::Foundation, &out, None))
            .unwrap_err()
            .contains("compensation"));
        let out = output(0, 10, f64::NAN);
        assert!(registry
            .check(&input(WorkflowStage::Foundation, &out, None))
            .is_err());
    }

    #[test]
    fn event_count_sanity_only_for_event_generation() {
        let registry = GateRegistry::with_builtin(10.0);
        let out = output(50_000, 1_000, 0.0);
        assert!(registry
            .check(&input(WorkflowStage::EventGeneration, &out, Some(1_000)))
            .unwrap_err()
            .starts_with("event_count_sanity"));
        assert!(registry
            .check(&input(WorkflowStage::Reporting, &out, Some(1_000)))
            .is_ok());
    }

    #[test]
    fn event_count_sanity_skipped_without_baseline() {
        let gate = EventCountSanity::new(10.0);
        let out = output(50_000, 1_000, 0.0);
        assert!(gate
            .check(&input(WorkflowStage::EventGeneration, &out, None))
            .is_ok());
    }
}
