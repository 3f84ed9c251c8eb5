//! Canonical stage order for a simulation year.

use planwise_types::stage::WorkflowStage;

/// Static description of one workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub stage: WorkflowStage,
    /// The stage reads the previous year's accumulated state (tenure, vesting, balances).
    pub requires_prior_year_state: bool,
    pub description: &'static str,
}

const STANDARD_STAGES: [StageDescriptor; 6] = [
    StageDescriptor {
        stage: WorkflowStage::Initialization,
        requires_prior_year_state: false,
        description: "load seeds and staging inputs",
    },
    StageDescriptor {
        stage: WorkflowStage::Foundation,
        requires_prior_year_state: true,
        description: "build the active workforce baseline from the prior year",
    },
    StageDescriptor {
        stage: WorkflowStage::EventGeneration,
        requires_prior_year_state: false,
        description: "generate hire, termination, promotion, merit and enrollment events",
    },
    StageDescriptor {
        stage: WorkflowStage::StateAccumulation,
        requires_prior_year_state: true,
        description: "apply events and carry tenure, vesting and balances forward",
    },
    StageDescriptor {
        stage: WorkflowStage::Validation,
        requires_prior_year_state: false,
        description: "run data quality checks over the year",
    },
    StageDescriptor {
        stage: WorkflowStage::Reporting,
        requires_prior_year_state: false,
        description: "produce year-end snapshots and summaries",
    },
];

/// The linear chain of stages executed within each year.
///
/// Built once at configuration time and shared read-only across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRegistry {
    stages: Vec<StageDescriptor>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl StageRegistry {
    /// Registry with the six standard stages.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: STANDARD_STAGES.to_vec(),
        }
    }

    /// Stage descriptors in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    #[must_use]
    pub fn descriptor(&self, stage: WorkflowStage) -> Option<&StageDescriptor> {
        self.stages.iter().find(|d| d.stage == stage)
    }

    /// Zero-based position of `stage` in the execution order.
    #[must_use]
    pub fn position(&self, stage: WorkflowStage) -> Option<usize> {
        self.stages.iter().position(|d| d.stage == stage)
    }

    /// Stages still to run after `completed` (all stages when `None`).
    #[must_use]
    pub fn remaining_after(&self, completed: Option<WorkflowStage>) -> &[StageDescriptor] {
        match completed.and_then(|s| self.position(s)) {
            Some(idx) => &self.stages[idx + 1..],
            None => &self.stages,
        }
    }

    /// Stages up to and including `completed`.
    #[must_use]
    pub fn completed_through(&self, completed: Option<WorkflowStage>) -> &[StageDescriptor] {
        match completed.and_then(|s| self.position(s)) {
            Some(idx) => &self.stages[..=idx],
            None => &[],
        }
    }

    /// Stages that must already be checkpointed before `stage` may be.
    #[must_use]
    pub fn predecessors(&self, stage: WorkflowStage) -> &[StageDescriptor] {
        match self.position(stage) {
            Some(idx) => &self.stages[..idx],
            None => &[],
        }
    }

    /// Whether `stages` (in any order) is exactly a contiguous prefix of the chain.
    #[must_use]
    pub fn is_prefix(&self, stages: &[WorkflowStage]) -> bool {
        let mut sorted: Vec<usize> = match stages.iter().map(|s| self.position(*s)).collect() {
            Some(positions) => positions,
            None => return false,
        };
        sorted.sort_unstable();
        sorted.dedup();
        sorted.len() == stages.len() && sorted.iter().enumerate().all(|(i, p)| i == *p)
    }

    #[must_use]
    pub fn last(&self) -> Option<WorkflowStage> {
        self.stages.last().map(|d| d.stage)
    }
}
