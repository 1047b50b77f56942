//! Reliability math over a server's failure history.
//!
//! All functions operate on the completed failure history of a
//! [`FailureModel`], optionally windowed to the `window` most recent
//! records (`window == 0` means unlimited). Steps count from the model's
//! `initial_failure_time_step`, which may be negative for pre-simulation
//! seeded histories.

use crate::failure::{FailureModel, FailureRecord};

fn windowed(model: &FailureModel, window: usize) -> &[FailureRecord] {
    let history = model.failure_history.as_slice();
    if window == 0 || history.len() <= window {
        history
    } else {
        &history[history.len() - window..]
    }
}

fn record_downtime(record: &FailureRecord) -> f64 {
    if record.becomes_available_at.is_infinite() {
        return f64::INFINITY;
    }
    (record.becomes_available_at.get() - record.failure_starts_at.get()) as f64
}

/// Mean time to repair: average unavailability span across completed
/// failures. Zero when the server never failed.
pub fn mttr(model: &FailureModel, window: usize) -> f64 {
    let history = windowed(model, window);
    if history.is_empty() {
        return 0.0;
    }
    history.iter().map(record_downtime).sum::<f64>() / history.len() as f64
}

/// Total downtime across the completed history.
pub fn downtime_history(model: &FailureModel, window: usize) -> f64 {
    windowed(model, window).iter().map(record_downtime).sum()
}

/// Total uptime across the observed span, from the initial failure
/// tracking instant up to (and including) the next step.
pub fn uptime_history(model: &FailureModel, window: usize, current_step: i64) -> f64 {
    if model.initial_failure_time_step.is_infinite() {
        return f64::INFINITY;
    }
    let span =
        (model.initial_failure_time_step.get() - (current_step + 1)).abs() as f64 + 1.0;
    span - downtime_history(model, window)
}

/// Mean time between failures; infinite when the history is empty.
pub fn mtbf(model: &FailureModel, window: usize, current_step: i64) -> f64 {
    let failures = windowed(model, window).len();
    if failures == 0 {
        return f64::INFINITY;
    }
    uptime_history(model, window, current_step) / failures as f64
}

/// Failures per step; zero when MTBF is infinite or degenerate.
pub fn failure_rate(model: &FailureModel, window: usize, current_step: i64) -> f64 {
    let mtbf = mtbf(model, window, current_step);
    if mtbf == 0.0 || mtbf.is_infinite() {
        0.0
    } else {
        1.0 / mtbf
    }
}

/// Exponential survival estimate over the next `upcoming_steps`, as a
/// percentage in `[0, 100]`.
pub fn conditional_reliability(
    model: &FailureModel,
    window: usize,
    current_step: i64,
    upcoming_steps: i64,
) -> f64 {
    let rate = failure_rate(model, window, current_step);
    if rate == 0.0 {
        return 100.0;
    }
    (-rate * upcoming_steps as f64).exp() * 100.0
}

/// Steps elapsed since the most recent completed repair.
///
/// Zero while a failure is ongoing, infinite when the server never
/// failed.
pub fn time_since_last_repair(model: &FailureModel, current_step: i64) -> f64 {
    if model.failure_history.is_empty() {
        return f64::INFINITY;
    }
    if model.ongoing_failure(current_step).is_some() {
        return 0.0;
    }
    let last_repair = model
        .failure_history
        .iter()
        .filter(|record| record.becomes_available_at.is_finite())
        .filter(|record| record.becomes_available_at.get() <= current_step)
        .map(|record| record.becomes_available_at.get())
        .max();
    match last_repair {
        Some(at) => (current_step + 1 - at) as f64,
        None => f64::INFINITY,
    }
}

/// Instantaneous risk of the server: its failure rate scaled by how close
/// it has drifted to its MTBF since the last repair.
///
/// Zero for a never-failed server; infinite while the server is down
/// (`time_since_last_repair == 0`), which callers use as an exclusion
/// criterion.
pub fn risk_score(model: &FailureModel, window: usize, current_step: i64) -> f64 {
    let rate = failure_rate(model, window, current_step);
    let mtbf = mtbf(model, window, current_step);
    if rate == 0.0 || mtbf.is_infinite() {
        return 0.0;
    }
    let since_repair = time_since_last_repair(model, current_step);
    if since_repair == 0.0 {
        return f64::INFINITY;
    }
    rate * (since_repair / mtbf)
}

#[cfg(test)]
mod tests {
    use trustedge_types::{FailureModelId, ServerId, Step};

    use super::*;
    use crate::failure::{Bounds, FailureCharacteristics, Interval};

    fn record(starts: i64, available: i64) -> FailureRecord {
        FailureRecord {
            failure_starts_at: Step::new(starts),
            failure_duration: Step::new(available - starts - 3),
            failure_ends_at: Step::new(available - 3),
            starts_booting_at: Step::new(available - 2),
            finishes_booting_at: Step::new(available - 1),
            becomes_available_at: Step::new(available),
        }
    }

    fn model_with_history(initial: i64, history: Vec<FailureRecord>) -> FailureModel {
        let mut model = FailureModel::new(
            FailureModelId::new(1),
            Some(ServerId::new(1)),
            Step::new(initial),
            FailureCharacteristics::BoundedUniform {
                number_of_failures: Bounds {
                    lower_bound: 1,
                    upper_bound: 1,
                },
                failure_duration: Interval::Bounded(Bounds {
                    lower_bound: 5,
                    upper_bound: 5,
                }),
                interval_between_failures: Interval::Bounded(Bounds {
                    lower_bound: 4,
                    upper_bound: 4,
                }),
                interval_between_sets: Interval::Bounded(Bounds {
                    lower_bound: 8,
                    upper_bound: 8,
                }),
            },
        );
        model.failure_trace = vec![history.clone()];
        model.failure_history = history;
        model
    }

    #[test]
    fn never_failed_server_is_maximally_trusted() {
        let model = model_with_history(1, Vec::new());
        assert_eq!(mttr(&model, 0), 0.0);
        assert!(mtbf(&model, 0, 100).is_infinite());
        assert_eq!(failure_rate(&model, 0, 100), 0.0);
        assert_eq!(conditional_reliability(&model, 0, 100, 50), 100.0);
        assert!(time_since_last_repair(&model, 100).is_infinite());
        assert_eq!(risk_score(&model, 0, 100), 0.0);
    }

    #[test]
    fn single_failure_statistics() {
        // Fails 10..=21, available again at 22: downtime 12.
        let model = model_with_history(1, vec![record(10, 22)]);
        let step = 30;
        assert_eq!(mttr(&model, 0), 12.0);
        assert_eq!(downtime_history(&model, 0), 12.0);
        // span |1 - 31| + 1 = 31, minus 12 downtime
        assert_eq!(uptime_history(&model, 0, step), 19.0);
        assert_eq!(mtbf(&model, 0, step), 19.0);
        assert!((failure_rate(&model, 0, step) - 1.0 / 19.0).abs() < 1e-12);
        assert_eq!(time_since_last_repair(&model, step), 9.0);
        let expected_risk = (1.0 / 19.0) * (9.0 / 19.0);
        assert!((risk_score(&model, 0, step) - expected_risk).abs() < 1e-12);
    }

    #[test]
    fn ongoing_failure_means_infinite_risk() {
        let model = model_with_history(1, vec![record(10, 22)]);
        // Step 15 is inside the unavailability interval.
        assert_eq!(time_since_last_repair(&model, 15), 0.0);
        assert!(risk_score(&model, 0, 15).is_infinite());
    }

    #[test]
    fn window_caps_the_history() {
        let history = vec![record(10, 22), record(40, 50), record(70, 90)];
        let model = model_with_history(1, history);
        // Unwindowed MTTR: (12 + 10 + 20) / 3 = 14.
        assert_eq!(mttr(&model, 0), 14.0);
        // Last two only: (10 + 20) / 2 = 15.
        assert_eq!(mttr(&model, 2), 15.0);
    }

    #[test]
    fn reliability_decays_with_horizon() {
        let model = model_with_history(1, vec![record(10, 22)]);
        let short = conditional_reliability(&model, 0, 30, 1);
        let long = conditional_reliability(&model, 0, 30, 100);
        assert!(short > long);
        assert!(long > 0.0);
    }
}
