//! Property tests for trace generation and normalisation.

use proptest::prelude::*;
use trustedge_sim::failure::{Bounds, FailureCharacteristics, FailureModel, Interval};
use trustedge_sim::policy::score::min_max_norm;
use trustedge_sim::SimRng;
use trustedge_types::{FailureModelId, ServerId, Step};

fn bounded(lower: i64, upper: i64) -> Interval {
    Interval::Bounded(Bounds {
        lower_bound: lower,
        upper_bound: upper,
    })
}

proptest! {
    /// Within a group, records are strictly ordered and non-overlapping;
    /// across groups, groups do not overlap.
    #[test]
    fn traces_are_ordered_and_non_overlapping(
        seed in 0u64..1_000,
        failures in 1i64..5,
        duration in 1i64..30,
        gap in 1i64..20,
        sets in 1usize..4,
        time_to_boot in 1i64..5,
    ) {
        let mut model = FailureModel::new(
            FailureModelId::new(1),
            Some(ServerId::new(1)),
            Step::new(1),
            FailureCharacteristics::BoundedUniform {
                number_of_failures: Bounds { lower_bound: 1, upper_bound: failures },
                failure_duration: bounded(1, duration),
                interval_between_failures: bounded(1, gap),
                interval_between_sets: bounded(1, gap),
            },
        );
        let mut rng = SimRng::new(seed);
        let mut next_start = Step::new(1);
        for _ in 0..sets {
            model.generate_set(&mut rng, next_start, 0, time_to_boot);
            let last = model.last_planned().unwrap();
            next_start = last.becomes_available_at.offset(1 + gap);
        }

        let flattened: Vec<_> = model.failure_trace.iter().flatten().collect();
        for pair in flattened.windows(2) {
            prop_assert!(pair[0].failure_starts_at < pair[1].failure_starts_at);
            prop_assert!(pair[0].becomes_available_at < pair[1].failure_starts_at);
        }
        for record in &flattened {
            prop_assert!(record.failure_starts_at <= record.failure_ends_at);
            prop_assert!(record.failure_ends_at < record.starts_booting_at);
            prop_assert!(record.starts_booting_at <= record.finishes_booting_at);
            prop_assert!(record.finishes_booting_at < record.becomes_available_at);
        }
    }

    /// Planned failures are always strictly future.
    #[test]
    fn generated_failures_are_strictly_future(
        seed in 0u64..1_000,
        current_step in 0i64..500,
        next_start in -100i64..400,
    ) {
        let mut model = FailureModel::new(
            FailureModelId::new(1),
            Some(ServerId::new(1)),
            Step::new(1),
            FailureCharacteristics::BoundedUniform {
                number_of_failures: Bounds { lower_bound: 1, upper_bound: 2 },
                failure_duration: bounded(1, 10),
                interval_between_failures: bounded(1, 10),
                interval_between_sets: bounded(1, 10),
            },
        );
        let mut rng = SimRng::new(seed);
        model.generate_set(&mut rng, Step::new(next_start), current_step, 2);
        for record in model.failure_trace.iter().flatten() {
            prop_assert!(record.failure_starts_at.get() > current_step);
        }
    }

    /// Min-max normalisation stays inside the unit interval for any
    /// value within the observed range.
    #[test]
    fn normalisation_stays_in_unit_interval(
        a in -1e6f64..1e6,
        b in -1e6f64..1e6,
        t in 0f64..1f64,
    ) {
        let (minimum, maximum) = if a <= b { (a, b) } else { (b, a) };
        let x = minimum + (maximum - minimum) * t;
        let normalised = min_max_norm(x, minimum, maximum);
        prop_assert!((0.0..=1.0).contains(&normalised));
    }
}
