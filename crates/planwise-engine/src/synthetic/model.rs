//! Year-over-year workforce arithmetic shared by both synthetic backends.

use serde::{Deserialize, Serialize};

use super::rng::Xorshift64Star;
use crate::config::types::WorkforceAssumptions;

/// Promotion raise applied on top of merit.
const PROMOTION_RAISE: f64 = 0.10;
/// Sampling noise around each expected event count.
const JITTER: f64 = 0.10;

/// Aggregate workforce state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkforceSnapshot {
    pub year: i32,
    pub headcount: i64,
    pub total_compensation: f64,
    pub participants: i64,
    pub average_tenure_years: f64,
}

/// Lifecycle event counts for one year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTotals {
    pub hires: u64,
    pub terminations: u64,
    pub new_hire_terminations: u64,
    pub promotions: u64,
    pub merit_raises: u64,
    pub enrollments: u64,
}

impl EventTotals {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.hires
            + self.terminations
            + self.new_hire_terminations
            + self.promotions
            + self.merit_raises
            + self.enrollments
    }
}

/// Output of the event-generation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearEvents {
    pub year: i32,
    pub baseline: WorkforceSnapshot,
    pub events: EventTotals,
    pub projected: WorkforceSnapshot,
}

/// Starting census for the first simulated year.
#[must_use]
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
pub fn census(year: i32, assumptions: &WorkforceAssumptions) -> WorkforceSnapshot {
    let headcount = assumptions.starting_headcount as i64;
    WorkforceSnapshot {
        year,
        headcount,
        total_compensation: assumptions.starting_headcount as f64
            * assumptions.average_compensation,
        participants: (headcount as f64 * assumptions.participation_rate).round() as i64,
        average_tenure_years: 0.0,
    }
}

/// Carry the prior year's accumulated state into `year`.
#[must_use]
pub fn roll_forward(prior: &WorkforceSnapshot, year: i32) -> WorkforceSnapshot {
    WorkforceSnapshot {
        year,
        average_tenure_years: prior.average_tenure_years + 1.0,
        ..prior.clone()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sample(rng: &mut Xorshift64Star, population: u64, rate: f64) -> u64 {
    let expected = population as f64 * rate.max(0.0);
    let noise = 1.0 - JITTER + 2.0 * JITTER * rng.next_f64();
    (expected * noise).round().max(0.0) as u64
}

/// Generate one year's events from `baseline`. Deterministic in `seed`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn generate_year_events(
    baseline: &WorkforceSnapshot,
    assumptions: &WorkforceAssumptions,
    seed: u64,
) -> YearEvents {
    let mut rng = Xorshift64Star::new(seed);
    let population = baseline.headcount.max(0) as u64;

    let terminations = sample(&mut rng, population, assumptions.termination_rate).min(population);
    let hires = sample(
        &mut rng,
        population,
        assumptions.growth_rate + assumptions.termination_rate,
    );
    let new_hire_terminations =
        sample(&mut rng, hires, assumptions.new_hire_termination_rate).min(hires);
    let retained = population - terminations;
    let promotions = sample(&mut rng, retained, assumptions.promotion_rate).min(retained);
    let net_hires = hires - new_hire_terminations;
    let enrollments = sample(&mut rng, net_hires, assumptions.participation_rate).min(net_hires);

    let events = EventTotals {
        hires,
        terminations,
        new_hire_terminations,
        promotions,
        merit_raises: retained,
        enrollments,
    };

    let average = if population > 0 {
        baseline.total_compensation / population as f64
    } else {
        assumptions.average_compensation
    };
    let total_compensation = retained as f64 * average * (1.0 + assumptions.merit_raise)
        + promotions as f64 * average * PROMOTION_RAISE
        + net_hires as f64 * assumptions.average_compensation;

    let headcount = (retained + net_hires) as i64;
    let retained_participants = if population > 0 {
        (baseline.participants.max(0) as f64 * retained as f64 / population as f64).round() as i64
    } else {
        0
    };
    let participants = (retained_participants + enrollments as i64).min(headcount);
    let average_tenure_years = if headcount > 0 {
        baseline.average_tenure_years * retained as f64 / headcount as f64
    } else {
        0.0
    };

    YearEvents {
        year: baseline.year,
        baseline: baseline.clone(),
        events,
        projected: WorkforceSnapshot {
            year: baseline.year,
            headcount,
            total_compensation,
            participants,
            average_tenure_years,
        },
    }
}
