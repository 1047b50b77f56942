//! Per-server failure models: trace generation and lookup.
//!
//! A failure model plans failures in *groups* (ordered lists of records).
//! The trace holds both consumed and still-planned groups; the history
//! holds only completed failures, in order. Traces are extended lazily by
//! the server step once the last planned group has been fully consumed.

use serde::{Deserialize, Serialize};
use trustedge_types::{FailureModelId, ServerId, Step};

use crate::rng::SimRng;

/// Repairs sampled from the log-normal distribution are clipped here.
pub const TTR_CAP: f64 = 150.0;

// ============================================================================
// Failure records
// ============================================================================

/// One planned or completed failure. All instants are simulated steps;
/// infinite instants mark failures that never end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failure_starts_at: Step,
    pub failure_duration: Step,
    pub failure_ends_at: Step,
    pub starts_booting_at: Step,
    pub finishes_booting_at: Step,
    pub becomes_available_at: Step,
}

impl FailureRecord {
    /// Is `step` inside this failure's unavailability interval
    /// `[failure_starts_at, becomes_available_at)`?
    pub fn covers(&self, step: i64) -> bool {
        self.failure_starts_at <= Step::new(step) && Step::new(step) < self.becomes_available_at
    }

    /// Builds the boot timeline from a start instant and a duration.
    fn from_start_and_duration(starts_at: Step, duration: Step, time_to_boot: i64) -> Self {
        if duration.is_infinite() {
            return Self {
                failure_starts_at: starts_at,
                failure_duration: Step::INFINITY,
                failure_ends_at: Step::INFINITY,
                starts_booting_at: Step::INFINITY,
                finishes_booting_at: Step::INFINITY,
                becomes_available_at: Step::INFINITY,
            };
        }
        let failure_ends_at = starts_at.offset(duration.get() - 1);
        let starts_booting_at = failure_ends_at.offset(1);
        let finishes_booting_at = starts_booting_at.offset(time_to_boot - 1);
        Self {
            failure_starts_at: starts_at,
            failure_duration: duration,
            failure_ends_at,
            starts_booting_at,
            finishes_booting_at,
            becomes_available_at: finishes_booting_at.offset(1),
        }
    }
}

// ============================================================================
// Failure characteristics
// ============================================================================

/// Inclusive integer bounds for uniform sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower_bound: i64,
    pub upper_bound: i64,
}

impl Bounds {
    pub fn sample(self, rng: &mut SimRng) -> i64 {
        rng.uniform_inclusive(self.lower_bound, self.upper_bound)
    }
}

/// A sampled interval that may be declared infinite ("never again").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Bounded(Bounds),
    Infinite,
}

impl Interval {
    pub fn is_infinite(self) -> bool {
        matches!(self, Interval::Infinite)
    }

    pub fn sample(self, rng: &mut SimRng) -> Step {
        match self {
            Interval::Bounded(bounds) => Step::new(bounds.sample(rng)),
            Interval::Infinite => Step::INFINITY,
        }
    }
}

/// How a server's failures are drawn. Closed sum: bounded-uniform
/// category sampling, or Weibull time-to-failure with log-normal
/// time-to-repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureCharacteristics {
    BoundedUniform {
        number_of_failures: Bounds,
        failure_duration: Interval,
        interval_between_failures: Interval,
        interval_between_sets: Interval,
    },
    WeibullLognormal {
        weibull_shape: f64,
        weibull_scale: f64,
        lognormal_shape: f64,
        lognormal_scale: f64,
        interval_between_sets: Interval,
    },
}

impl FailureCharacteristics {
    pub fn interval_between_sets(&self) -> Interval {
        match self {
            FailureCharacteristics::BoundedUniform {
                interval_between_sets,
                ..
            }
            | FailureCharacteristics::WeibullLognormal {
                interval_between_sets,
                ..
            } => *interval_between_sets,
        }
    }
}

// ============================================================================
// Failure model
// ============================================================================

/// Per-server failure trace generator and store.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureModel {
    pub id: FailureModelId,
    pub device: Option<ServerId>,
    pub initial_failure_time_step: Step,
    pub characteristics: FailureCharacteristics,
    /// Completed failures, in order of occurrence.
    pub failure_history: Vec<FailureRecord>,
    /// Planned failure groups (consumed and upcoming).
    pub failure_trace: Vec<Vec<FailureRecord>>,
}

impl FailureModel {
    pub fn new(
        id: FailureModelId,
        device: Option<ServerId>,
        initial_failure_time_step: Step,
        characteristics: FailureCharacteristics,
    ) -> Self {
        Self {
            id,
            device,
            initial_failure_time_step,
            characteristics,
            failure_history: Vec::new(),
            failure_trace: Vec::new(),
        }
    }

    /// The last planned record across all groups.
    pub fn last_planned(&self) -> Option<&FailureRecord> {
        self.failure_trace.last().and_then(|group| group.last())
    }

    /// Has every planned failure already been consumed into the history?
    pub fn trace_exhausted(&self) -> bool {
        match (self.failure_history.last(), self.last_planned()) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(occurred), Some(planned)) => occurred == planned,
        }
    }

    /// The unique record whose unavailability interval contains `step`.
    pub fn ongoing_failure(&self, step: i64) -> Option<&FailureRecord> {
        self.failure_trace
            .iter()
            .flatten()
            .find(|record| record.covers(step))
    }

    /// Plans a new failure group starting around `next_start`.
    ///
    /// No-ops when `next_start` is infinite, when the model's interval
    /// between sets is declared infinite (and a group already exists), or
    /// when the last planned failure lasts forever. A sampled start at or
    /// before `current_step` is snapped forward to `current_step + 2` so
    /// planned failures are always strictly future.
    pub fn generate_set(
        &mut self,
        rng: &mut SimRng,
        next_start: Step,
        current_step: i64,
        time_to_boot: i64,
    ) {
        if next_start.is_infinite() {
            return;
        }
        let last_lasts_forever = self
            .last_planned()
            .is_some_and(|record| record.failure_duration.is_infinite());
        if !self.failure_trace.is_empty()
            && (self.characteristics.interval_between_sets().is_infinite() || last_lasts_forever)
        {
            return;
        }

        let group = match &self.characteristics {
            FailureCharacteristics::BoundedUniform {
                number_of_failures,
                failure_duration,
                interval_between_failures,
                ..
            } => {
                let planned = number_of_failures.sample(rng).max(0);
                let (duration, interval) = (*failure_duration, *interval_between_failures);
                let mut group: Vec<FailureRecord> = Vec::new();
                for count in 0..planned {
                    let starts_at = if count == 0 {
                        next_start
                    } else {
                        let previous = group[group.len() - 1];
                        if previous.becomes_available_at.is_infinite() || interval.is_infinite() {
                            break;
                        }
                        previous
                            .becomes_available_at
                            .offset(interval.sample(rng).get() + 1)
                    };
                    let starts_at = snap_to_future(starts_at, current_step);
                    group.push(FailureRecord::from_start_and_duration(
                        starts_at,
                        duration.sample(rng),
                        time_to_boot,
                    ));
                }
                group
            }
            FailureCharacteristics::WeibullLognormal {
                weibull_shape,
                weibull_scale,
                lognormal_shape,
                lognormal_scale,
                ..
            } => {
                let ttf = rng.weibull_ttf(*weibull_shape, *weibull_scale) as i64;
                let starts_at = snap_to_future(next_start.offset(ttf), current_step);
                let ttr = rng.lognormal_ttr(*lognormal_shape, *lognormal_scale, TTR_CAP) as i64;
                vec![FailureRecord::from_start_and_duration(
                    starts_at,
                    Step::new(ttr),
                    time_to_boot,
                )]
            }
        };

        if !group.is_empty() {
            self.failure_trace.push(group);
        }
    }
}

/// Planned failures must be strictly future.
fn snap_to_future(starts_at: Step, current_step: i64) -> Step {
    if starts_at.is_finite() && starts_at.get() <= current_step {
        Step::new(current_step + 2)
    } else {
        starts_at
    }
}
