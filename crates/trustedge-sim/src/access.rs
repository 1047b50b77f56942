//! User access patterns.
//!
//! The original model describes accesses as an infinite generator; here it
//! is a stateful struct cycling through duration and interval value lists,
//! producing `[start, end]` windows and the instant of the next access.

use serde::{Deserialize, Serialize};

/// One access window: the user requests its application during
/// `[start, end]` and will come back at `next_access`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessWindow {
    pub start: i64,
    pub end: i64,
    pub next_access: i64,
    /// Steps the user spent successfully accessing the application.
    pub access_time: i64,
    /// Steps the user spent waiting for the application to come up.
    pub waiting_time: i64,
}

/// Cyclic duration-and-interval access pattern.
///
/// Durations and intervals are consumed round-robin from their value
/// lists, so a pattern with `duration_values = [10, 20]` alternates short
/// and long sessions forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircularAccessPattern {
    pub duration_values: Vec<i64>,
    pub interval_values: Vec<i64>,
    duration_cursor: usize,
    interval_cursor: usize,
    pub history: Vec<AccessWindow>,
}

impl CircularAccessPattern {
    /// Creates the pattern and opens its first window at `start`.
    pub fn new(duration_values: Vec<i64>, interval_values: Vec<i64>, start: i64) -> Self {
        let mut pattern = Self {
            duration_values,
            interval_values,
            duration_cursor: 0,
            interval_cursor: 0,
            history: Vec::new(),
        };
        pattern.next_access(start);
        pattern
    }

    /// Restores a pattern mid-cycle (scenario reload).
    pub fn with_state(
        duration_values: Vec<i64>,
        interval_values: Vec<i64>,
        duration_cursor: usize,
        interval_cursor: usize,
        history: Vec<AccessWindow>,
    ) -> Self {
        Self {
            duration_values,
            interval_values,
            duration_cursor,
            interval_cursor,
            history,
        }
    }

    pub fn cursors(&self) -> (usize, usize) {
        (self.duration_cursor, self.interval_cursor)
    }

    /// The most recent window.
    pub fn last_window(&self) -> &AccessWindow {
        self.history
            .last()
            .unwrap_or_else(|| panic!("access pattern has no history"))
    }

    pub fn last_window_mut(&mut self) -> &mut AccessWindow {
        self.history
            .last_mut()
            .unwrap_or_else(|| panic!("access pattern has no history"))
    }

    /// Is `step` inside the most recent window?
    pub fn is_within_window(&self, step: i64) -> bool {
        self.history
            .last()
            .is_some_and(|w| w.start <= step && step <= w.end)
    }

    /// Opens the next window at `from_step` and returns it.
    pub fn next_access(&mut self, from_step: i64) -> AccessWindow {
        let duration = self.cycle_duration();
        let interval = self.cycle_interval();
        let window = AccessWindow {
            start: from_step,
            end: from_step + duration - 1,
            next_access: from_step + duration - 1 + interval,
            access_time: 0,
            waiting_time: 0,
        };
        self.history.push(window);
        window
    }

    fn cycle_duration(&mut self) -> i64 {
        if self.duration_values.is_empty() {
            return 1;
        }
        let value = self.duration_values[self.duration_cursor % self.duration_values.len()];
        self.duration_cursor += 1;
        value.max(1)
    }

    fn cycle_interval(&mut self) -> i64 {
        if self.interval_values.is_empty() {
            return 1;
        }
        let value = self.interval_values[self.interval_cursor % self.interval_values.len()];
        self.interval_cursor += 1;
        value.max(1)
    }

    /// Mean session duration; used by the placement policy's intensity
    /// score.
    pub fn mean_duration(&self) -> f64 {
        mean(&self.duration_values)
    }

    pub fn mean_interval(&self) -> f64 {
        mean(&self.interval_values)
    }
}

fn mean(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_window_opens_at_start() {
        let pattern = CircularAccessPattern::new(vec![10], vec![120], 1);
        let window = pattern.last_window();
        assert_eq!(window.start, 1);
        assert_eq!(window.end, 10);
        assert_eq!(window.next_access, 130);
    }

    #[test]
    fn values_cycle_round_robin() {
        let mut pattern = CircularAccessPattern::new(vec![10, 20], vec![120], 1);
        let second = pattern.next_access(131);
        assert_eq!(second.end - second.start + 1, 20);
        let third = pattern.next_access(300);
        assert_eq!(third.end - third.start + 1, 10);
    }

    #[test]
    fn window_membership_is_inclusive() {
        let pattern = CircularAccessPattern::new(vec![5], vec![10], 3);
        assert!(!pattern.is_within_window(2));
        assert!(pattern.is_within_window(3));
        assert!(pattern.is_within_window(7));
        assert!(!pattern.is_within_window(8));
    }

    #[test]
    fn intensity_inputs() {
        let pattern = CircularAccessPattern::new(vec![60, 100], vec![40, 40], 1);
        assert!((pattern.mean_duration() - 80.0).abs() < f64::EPSILON);
        assert!((pattern.mean_interval() - 40.0).abs() < f64::EPSILON);
    }
}
