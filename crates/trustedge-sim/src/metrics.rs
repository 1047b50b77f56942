//! Metrics collection.
//!
//! The collector subscribes to events emitted at defined points of the
//! tick (`on_migration_finished`, `on_server_status_change`,
//! `on_sla_violation_detected`) and sweeps per-step state after the
//! application step. Nothing global: one collector per run, owned by the
//! simulation.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;
use trustedge_types::{AppId, MigrationReason, ServerId, ServerStatus, ServiceId, UserId};

use crate::entities::Migration;
use crate::reliability;
use crate::world::World;

// ============================================================================
// Collector
// ============================================================================

/// A failure predicted by a proactive migration: the policy expects
/// `server` to fail within `(made_at, made_at + horizon]`.
#[derive(Debug, Clone)]
struct Prediction {
    server: ServerId,
    made_at: i64,
    horizon: i64,
    confirmed: bool,
}

/// Per-run metrics accumulator.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    // SLA
    total_delay_sla_violations: u64,
    delay_violations_per_delay_sla: BTreeMap<String, u64>,
    delay_violations_per_access_pattern: BTreeMap<String, u64>,
    delay_sum: f64,
    delay_samples: u64,
    total_perceived_downtime: u64,
    downtime_reasons: BTreeMap<String, u64>,

    // Migrations
    total_migrations: u64,
    migrations_per_reason: BTreeMap<String, u64>,
    waiting_time_sum: i64,
    pulling_layers_time_sum: i64,
    migrating_state_time_sum: i64,

    // Prediction quality
    predictions: Vec<Prediction>,
    unpredicted_failures: u64,

    // Infrastructure
    occupation_sum: f64,
    occupation_samples: u64,
    total_power_consumption_watts: f64,

    steps_collected: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// A migration reached `finished` this step.
    pub fn on_migration_finished(
        &mut self,
        service: ServiceId,
        migration: &Migration,
        step: i64,
    ) {
        debug!(service = %service, reason = %migration.reason, step, "migration finished");
        self.total_migrations += 1;
        *self
            .migrations_per_reason
            .entry(migration.reason.to_string())
            .or_insert(0) += 1;
        self.waiting_time_sum += migration.waiting_time;
        self.pulling_layers_time_sum += migration.pulling_layers_time;
        self.migrating_state_time_sum += migration.migrating_service_state_time;
    }

    /// A server crossed a failure boundary this step.
    pub fn on_server_status_change(
        &mut self,
        server: ServerId,
        from: ServerStatus,
        to: ServerStatus,
        step: i64,
    ) {
        let _ = from;
        if to != ServerStatus::Failing {
            return;
        }
        // Match the failure against an outstanding prediction.
        let matched = self.predictions.iter_mut().find(|prediction| {
            !prediction.confirmed
                && prediction.server == server
                && prediction.made_at < step
                && step <= prediction.made_at + prediction.horizon
        });
        match matched {
            Some(prediction) => prediction.confirmed = true,
            None => self.unpredicted_failures += 1,
        }
    }

    /// A delay SLA was violated by an actively-requesting user.
    pub fn on_sla_violation_detected(
        &mut self,
        user: UserId,
        app: AppId,
        delay: f64,
        delay_sla: f64,
        access_pattern_key: &str,
        step: i64,
    ) {
        debug!(user = %user, app = %app, delay, delay_sla, step, "delay SLA violation");
        self.total_delay_sla_violations += 1;
        *self
            .delay_violations_per_delay_sla
            .entry(format_number(delay_sla))
            .or_insert(0) += 1;
        *self
            .delay_violations_per_access_pattern
            .entry(access_pattern_key.to_string())
            .or_insert(0) += 1;
    }

    /// A proactive migration away from `server` predicts a failure within
    /// the next `horizon` steps.
    pub fn on_failure_predicted(&mut self, server: ServerId, step: i64, horizon: i64) {
        self.predictions.push(Prediction {
            server,
            made_at: step,
            horizon,
            confirmed: false,
        });
    }

    // ------------------------------------------------------------------
    // Per-step sweep
    // ------------------------------------------------------------------

    /// Collects SLA, downtime, and infrastructure samples for the current
    /// step. Runs after the application step, so it observes the tick's
    /// settled state.
    pub fn collect_step(&mut self, world: &World, current_step: i64) {
        self.steps_collected += 1;

        let mut sla_events: Vec<(UserId, AppId, f64, f64, String)> = Vec::new();
        for user in world.users.values() {
            for app_id in &user.applications {
                if !user.is_making_request(*app_id, current_step) {
                    continue;
                }
                let pattern_key = user
                    .access_patterns
                    .get(app_id)
                    .map(|pattern| format_number(pattern.mean_duration()))
                    .unwrap_or_default();

                if world.application_available(*app_id) {
                    let delay = user.delays.get(app_id).copied().flatten();
                    if let Some(delay) = delay {
                        self.delay_sum += delay;
                        self.delay_samples += 1;
                        let sla = user.delay_slas.get(app_id).copied().unwrap_or(f64::INFINITY);
                        if delay > sla {
                            sla_events.push((user.id, *app_id, delay, sla, pattern_key));
                        }
                    }
                } else if !initial_provisioning_wait(world, *app_id) {
                    // Waiting for the very first provision is waiting
                    // time, not downtime.
                    self.total_perceived_downtime += 1;
                    let reason = downtime_reason(world, *app_id);
                    *self.downtime_reasons.entry(reason).or_insert(0) += 1;
                }
            }
        }
        for (user, app, delay, sla, pattern_key) in sla_events {
            self.on_sla_violation_detected(user, app, delay, sla, &pattern_key, current_step);
        }

        // Infrastructure usage over available servers.
        let mut occupation = 0.0;
        let mut sampled = 0u64;
        let mut power = 0.0;
        for server in world.servers.values() {
            if !server.available {
                continue;
            }
            let capacity = f64::from(server.capacity.cpu_cores).max(1.0);
            let used = f64::from(server.demand.cpu_cores);
            occupation += used / capacity;
            sampled += 1;
            let static_watts = server.power.static_fraction * server.power.max_watts;
            power += static_watts + (server.power.max_watts - static_watts) * (used / capacity);
        }
        if sampled > 0 {
            self.occupation_sum += occupation / sampled as f64;
            self.occupation_samples += 1;
        }
        self.total_power_consumption_watts += power;
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Consolidates the run into the output record.
    pub fn finalize(
        &self,
        world: &World,
        parameters: serde_json::Value,
        last_step: i64,
        total_time_minutes: f64,
    ) -> MetricsRecord {
        let downtime_sla = downtime_sla_violations(world, last_step);

        let true_positives = self.predictions.iter().filter(|p| p.confirmed).count() as u64;
        let false_positives = self.predictions.len() as u64 - true_positives;
        let false_negatives = self.unpredicted_failures;

        let mut servers = BTreeMap::new();
        for server in world.servers.values() {
            let model = world.failure_model(server.failure_model);
            let simulation_uptime =
                server.available_history.iter().filter(|up| **up).count() as u64;
            let simulation_downtime =
                server.available_history.len() as u64 - simulation_uptime;
            servers.insert(
                format!("server_{}", server.id),
                ServerReliabilitySummary {
                    model_name: server.model_name.clone(),
                    total_failures: model.failure_history.len() as u64,
                    mtbf: finite(reliability::mtbf(model, 0, last_step)),
                    mttr: finite(reliability::mttr(model, 0)),
                    history_uptime: finite(reliability::uptime_history(model, 0, last_step)),
                    history_downtime: finite(reliability::downtime_history(model, 0)),
                    simulation_uptime,
                    simulation_downtime,
                },
            );
        }

        MetricsRecord {
            execution: ExecutionMetrics {
                total_time_minutes,
                total_simulation_steps: self.steps_collected,
            },
            parameters,
            sla: SlaMetrics {
                total_delay_sla_violations: self.total_delay_sla_violations,
                total_perceived_downtime: self.total_perceived_downtime,
                total_downtime_sla_violations: downtime_sla.total,
                avg_delay: if self.delay_samples > 0 {
                    Some(self.delay_sum / self.delay_samples as f64)
                } else {
                    None
                },
                delay_violations_per_delay_sla: self.delay_violations_per_delay_sla.clone(),
                delay_violations_per_access_pattern: self
                    .delay_violations_per_access_pattern
                    .clone(),
                downtime_violations_per_delay_sla: downtime_sla.per_delay_sla,
                downtime_violations_per_access_pattern: downtime_sla.per_access_pattern,
                downtime_reasons: self.downtime_reasons.clone(),
            },
            provisioning_and_migration: MigrationMetrics {
                total_migrations: self.total_migrations,
                migrations_per_reason: self.migrations_per_reason.clone(),
                interrupted_migrations: count_interrupted(world),
                avg_waiting_time: mean(self.waiting_time_sum, self.total_migrations),
                avg_pulling_layers_time: mean(self.pulling_layers_time_sum, self.total_migrations),
                avg_migrating_service_state_time: mean(
                    self.migrating_state_time_sum,
                    self.total_migrations,
                ),
            },
            prediction_quality: PredictionQuality {
                precision: ratio(true_positives, true_positives + false_positives),
                recall: ratio(true_positives, true_positives + false_negatives),
                true_positives,
                false_positives,
                false_negatives,
            },
            infrastructure: InfrastructureMetrics {
                average_overall_occupation: if self.occupation_samples > 0 {
                    self.occupation_sum / self.occupation_samples as f64
                } else {
                    0.0
                },
                total_power_consumption_watts: self.total_power_consumption_watts,
            },
            servers,
        }
    }
}

/// True while every unavailable service of the application has yet to be
/// provisioned for the first time.
fn initial_provisioning_wait(world: &World, app_id: AppId) -> bool {
    world
        .application(app_id)
        .services
        .iter()
        .filter(|service_id| !world.service_effectively_available(**service_id))
        .all(|service_id| {
            let service = world.service(*service_id);
            let never_completed = !service
                .migrations
                .iter()
                .any(|m| m.status == trustedge_types::MigrationStatus::Finished);
            never_completed
        })
}

/// Why an application was down for a requesting user this step.
fn downtime_reason(world: &World, app_id: AppId) -> String {
    let app = world.application(app_id);
    for service_id in &app.services {
        if world.service_effectively_available(*service_id) {
            continue;
        }
        let service = world.service(*service_id);
        if let Some(migration) = service.open_migration() {
            return match migration.reason {
                MigrationReason::Provision => "provisioning".to_string(),
                MigrationReason::Proactive => "proactive_migration".to_string(),
                MigrationReason::ServerFailed => "failure_recovery".to_string(),
                MigrationReason::UserStoppedAccessing => "cancelled".to_string(),
            };
        }
        match service.server {
            None => return "unprovisioned".to_string(),
            Some(server) if !world.server(server).available => {
                return "server_failed".to_string();
            }
            Some(_) => return "service_unavailable".to_string(),
        }
    }
    "unknown".to_string()
}

struct DowntimeSlaViolations {
    total: u64,
    per_delay_sla: BTreeMap<String, u64>,
    per_access_pattern: BTreeMap<String, u64>,
}

/// Per access session: perceived downtime beyond the application's
/// allowance counts one violation.
fn downtime_sla_violations(world: &World, last_step: i64) -> DowntimeSlaViolations {
    let mut result = DowntimeSlaViolations {
        total: 0,
        per_delay_sla: BTreeMap::new(),
        per_access_pattern: BTreeMap::new(),
    };
    for user in world.users.values() {
        for app_id in &user.applications {
            let Some(pattern) = user.access_patterns.get(app_id) else {
                continue;
            };
            let allowance = user
                .maximum_downtime_allowed
                .get(app_id)
                .copied()
                .unwrap_or(i64::MAX);
            let Some(downtime) = user.perceived_downtime.get(app_id) else {
                continue;
            };
            for window in &pattern.history {
                let end = window.end.min(last_step);
                let session_downtime = (window.start..=end)
                    .filter(|step| downtime.get(step).copied().unwrap_or(false))
                    .count() as i64;
                if session_downtime > allowance {
                    result.total += 1;
                    let sla_key = user
                        .delay_slas
                        .get(app_id)
                        .map(|sla| format_number(*sla))
                        .unwrap_or_default();
                    *result.per_delay_sla.entry(sla_key).or_insert(0) += 1;
                    *result
                        .per_access_pattern
                        .entry(format_number(pattern.mean_duration()))
                        .or_insert(0) += 1;
                }
            }
        }
    }
    result
}

fn count_interrupted(world: &World) -> u64 {
    world
        .services
        .values()
        .flat_map(|service| &service.migrations)
        .filter(|m| m.status == trustedge_types::MigrationStatus::Interrupted)
        .count() as u64
}

fn mean(sum: i64, count: u64) -> Option<f64> {
    if count == 0 {
        None
    } else {
        Some(sum as f64 / count as f64)
    }
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

/// Infinite statistics serialize as `null`.
fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// JSON map keys for numeric buckets ("20" rather than "20.0").
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ============================================================================
// Output record
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsRecord {
    pub execution: ExecutionMetrics,
    pub parameters: serde_json::Value,
    pub sla: SlaMetrics,
    pub provisioning_and_migration: MigrationMetrics,
    pub prediction_quality: PredictionQuality,
    pub infrastructure: InfrastructureMetrics,
    pub servers: BTreeMap<String, ServerReliabilitySummary>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionMetrics {
    pub total_time_minutes: f64,
    pub total_simulation_steps: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlaMetrics {
    pub total_delay_sla_violations: u64,
    pub total_perceived_downtime: u64,
    pub total_downtime_sla_violations: u64,
    pub avg_delay: Option<f64>,
    pub delay_violations_per_delay_sla: BTreeMap<String, u64>,
    pub delay_violations_per_access_pattern: BTreeMap<String, u64>,
    pub downtime_violations_per_delay_sla: BTreeMap<String, u64>,
    pub downtime_violations_per_access_pattern: BTreeMap<String, u64>,
    pub downtime_reasons: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MigrationMetrics {
    pub total_migrations: u64,
    pub migrations_per_reason: BTreeMap<String, u64>,
    pub interrupted_migrations: u64,
    pub avg_waiting_time: Option<f64>,
    pub avg_pulling_layers_time: Option<f64>,
    pub avg_migrating_service_state_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PredictionQuality {
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub true_positives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InfrastructureMetrics {
    pub average_overall_occupation: f64,
    pub total_power_consumption_watts: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServerReliabilitySummary {
    pub model_name: String,
    pub total_failures: u64,
    pub mtbf: Option<f64>,
    pub mttr: Option<f64>,
    pub history_uptime: Option<f64>,
    pub history_downtime: Option<f64>,
    pub simulation_uptime: u64,
    pub simulation_downtime: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_matching_confirms_within_horizon() {
        let mut collector = MetricsCollector::new();
        collector.on_failure_predicted(ServerId::new(1), 10, 100);
        collector.on_server_status_change(
            ServerId::new(1),
            ServerStatus::Available,
            ServerStatus::Failing,
            50,
        );
        assert_eq!(collector.predictions.len(), 1);
        assert!(collector.predictions[0].confirmed);
        assert_eq!(collector.unpredicted_failures, 0);
    }

    #[test]
    fn unpredicted_failure_counts_as_false_negative() {
        let mut collector = MetricsCollector::new();
        collector.on_server_status_change(
            ServerId::new(2),
            ServerStatus::Available,
            ServerStatus::Failing,
            50,
        );
        assert_eq!(collector.unpredicted_failures, 1);
    }

    #[test]
    fn failure_outside_horizon_does_not_confirm() {
        let mut collector = MetricsCollector::new();
        collector.on_failure_predicted(ServerId::new(1), 10, 5);
        collector.on_server_status_change(
            ServerId::new(1),
            ServerStatus::Available,
            ServerStatus::Failing,
            50,
        );
        assert!(!collector.predictions[0].confirmed);
        assert_eq!(collector.unpredicted_failures, 1);
    }

    #[test]
    fn number_keys_drop_trailing_zero() {
        assert_eq!(format_number(20.0), "20");
        assert_eq!(format_number(12.5), "12.5");
    }
}
