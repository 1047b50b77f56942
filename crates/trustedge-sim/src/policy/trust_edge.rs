//! The TrustEdge placement policy.
//!
//! Applications with active users are ranked by a weighted
//! min-max-normalised sum of delay pressure, access intensity, and
//! (inverted) resource demand. Candidate hosts are ranked
//! lexicographically by `(sla_violations, norm(trust_cost) +
//! norm(uncached_layers) + norm(overall_delay))`; the first candidate
//! with capacity wins. Hosts whose conditional reliability over the
//! lookahead horizon drops below the threshold lose their services
//! proactively.

use serde::{Deserialize, Serialize};
use tracing::debug;
use trustedge_types::{AppId, MigrationReason, ServerId, ServiceId, UserId};

use crate::metrics::MetricsCollector;
use crate::migration::open_migration;
use crate::policy::score::FieldRange;
use crate::policy::{
    apply_migration_visibility, note_prediction, requesting_user, server_risk, FeatureFlags,
};
use crate::reliability;
use crate::world::World;

/// Tuning knobs for TrustEdge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrustEdgeKnobs {
    /// Completed failures considered by the reliability math
    /// (0 = unlimited).
    pub window_size: usize,
    /// Proactive migration fires below this conditional reliability
    /// percentage.
    pub reliability_threshold: f64,
    /// Steps ahead the reliability projection looks.
    pub lookahead: i64,
    /// Multiplier on the delay SLA for proactive SLA migration.
    pub delay_threshold: f64,
}

impl Default for TrustEdgeKnobs {
    fn default() -> Self {
        Self {
            window_size: 0,
            reliability_threshold: 50.0,
            lookahead: 100,
            delay_threshold: 1.0,
        }
    }
}

pub fn step(
    world: &mut World,
    metrics: &mut MetricsCollector,
    flags: &FeatureFlags,
    knobs: &TrustEdgeKnobs,
    current_step: i64,
) {
    let apps = ranked_applications(world, current_step);
    for scored in apps {
        place_or_improve(world, flags, knobs, current_step, &scored);
    }

    if flags.failure_prediction {
        proactive_reliability_migration(world, metrics, flags, knobs, current_step);
    }
    if flags.proactive_sla_migration {
        proactive_sla_migration(world, flags, knobs, current_step);
    }
}

// ============================================================================
// Application ranking
// ============================================================================

struct ScoredApp {
    app: AppId,
    service: ServiceId,
    user: UserId,
    delay_sla: f64,
}

/// Applications whose user is inside an access window, most urgent first.
fn ranked_applications(world: &mut World, current_step: i64) -> Vec<ScoredApp> {
    struct Raw {
        app: AppId,
        service: ServiceId,
        user: UserId,
        delay_sla: f64,
        delay_score: f64,
        intensity_score: f64,
        demand: f64,
    }

    let service_ids: Vec<ServiceId> = world.services.keys().copied().collect();
    let mut raw: Vec<Raw> = Vec::new();
    for service_id in service_ids {
        let Some(user_id) = requesting_user(world, service_id, current_step) else {
            continue;
        };
        let app_id = world.service(service_id).application;
        // Placement is (re)considered when a session opens; mid-session
        // the only reason to act is an unplaced (deferred) service.
        // Everything else is the proactive passes' business.
        let session_opening = world
            .user(user_id)
            .access_patterns
            .get(&app_id)
            .is_some_and(|pattern| pattern.last_window().start == current_step);
        if !session_opening && world.service(service_id).server.is_some() {
            continue;
        }
        let delay_sla = world
            .user(user_id)
            .delay_slas
            .get(&app_id)
            .copied()
            .unwrap_or(f64::INFINITY);
        let delay_score = application_delay_score(world, user_id, delay_sla);
        let (mean_duration, mean_interval) = world
            .user(user_id)
            .access_patterns
            .get(&app_id)
            .map(|pattern| (pattern.mean_duration(), pattern.mean_interval()))
            .unwrap_or((0.0, 1.0));
        let intensity_score = mean_duration / mean_interval.max(1.0);
        raw.push(Raw {
            app: app_id,
            service: service_id,
            user: user_id,
            delay_sla,
            delay_score,
            intensity_score,
            demand: world.service(service_id).normalized_demand(),
        });
    }

    let mut delay_range = FieldRange::default();
    let mut intensity_range = FieldRange::default();
    let mut demand_range = FieldRange::default();
    for item in &raw {
        delay_range.observe(item.delay_score);
        intensity_range.observe(item.intensity_score);
        demand_range.observe(item.demand);
    }

    let mut keyed: Vec<(f64, Raw)> = raw
        .into_iter()
        .map(|item| {
            let key = delay_range.norm(item.delay_score)
                + intensity_range.norm(item.intensity_score)
                + (1.0 - demand_range.norm(item.demand));
            (key, item)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.app.cmp(&b.1.app)));
    keyed
        .into_iter()
        .map(|(_, item)| ScoredApp {
            app: item.app,
            service: item.service,
            user: item.user,
            delay_sla: item.delay_sla,
        })
        .collect()
}

/// Inverse of the SLA-weighted count of servers close enough to honour
/// the SLA: the fewer viable hosts, the more urgent the application.
fn application_delay_score(world: &mut World, user_id: UserId, delay_sla: f64) -> f64 {
    let user_switch = world
        .base_station(world.user(user_id).base_station)
        .network_switch;
    let server_ids: Vec<ServerId> = world
        .servers
        .values()
        .filter(|server| server.available)
        .map(|server| server.id)
        .collect();
    let mut viable = 0u32;
    for server_id in server_ids {
        let server_switch = world.server_switch(server_id);
        let Ok(path) = world.topology.shortest_path(user_switch, server_switch) else {
            continue;
        };
        if world.topology.path_delay(&path) <= delay_sla {
            viable += 1;
        }
    }
    if viable == 0 {
        0.0
    } else {
        1.0 / (f64::from(viable) * delay_sla).sqrt()
    }
}

// ============================================================================
// Candidate ranking
// ============================================================================

struct Candidate {
    server: ServerId,
    sla_violations: u32,
    trust_cost: f64,
    uncached_layers: f64,
    overall_delay: f64,
    power_cost: f64,
    free_capacity: f64,
}

fn build_candidates(
    world: &mut World,
    user_id: UserId,
    service_id: ServiceId,
    window: usize,
    current_step: i64,
) -> Vec<Candidate> {
    let app_id = world.service(service_id).application;
    let app_delay = world
        .user(user_id)
        .delays
        .get(&app_id)
        .copied()
        .flatten()
        .unwrap_or(0.0);
    let delay_sla = world
        .user(user_id)
        .delay_slas
        .get(&app_id)
        .copied()
        .unwrap_or(f64::INFINITY);
    let user_switch = world
        .base_station(world.user(user_id).base_station)
        .network_switch;
    let image_digest = world.service(service_id).image_digest.clone();

    let server_ids: Vec<ServerId> = world
        .servers
        .values()
        .filter(|server| server.available)
        .map(|server| server.id)
        .collect();

    let mut candidates = Vec::new();
    for server_id in server_ids {
        let server_switch = world.server_switch(server_id);
        let Ok(path) = world.topology.shortest_path(user_switch, server_switch) else {
            continue;
        };
        let overall_delay = app_delay + world.topology.path_delay(&path);
        let server = world.server(server_id);
        // Marginal cost of one more core, plus the activation cost of
        // waking an idle machine.
        let per_core = server.power.max_watts / f64::from(server.capacity.cpu_cores.max(1));
        let activation = if server.demand.cpu_cores == 0 {
            server.power.static_fraction * server.power.max_watts
        } else {
            0.0
        };
        candidates.push(Candidate {
            server: server_id,
            sla_violations: u32::from(overall_delay > delay_sla),
            trust_cost: server_risk(world, server_id, window, current_step).min(f64::MAX),
            uncached_layers: world.uncached_layer_count(server_id, &image_digest) as f64,
            overall_delay,
            power_cost: per_core + activation,
            free_capacity: server.normalized_free_capacity(),
        });
    }
    candidates
}

/// Lexicographic rank: SLA feasibility first, then the normalised sum of
/// trust cost, layer locality, and delay.
fn rank(candidates: &mut [Candidate]) {
    let mut trust_range = FieldRange::default();
    let mut layers_range = FieldRange::default();
    let mut delay_range = FieldRange::default();
    for candidate in candidates.iter() {
        trust_range.observe(candidate.trust_cost);
        layers_range.observe(candidate.uncached_layers);
        delay_range.observe(candidate.overall_delay);
    }
    candidates.sort_by(|a, b| {
        let a_key = trust_range.norm(a.trust_cost)
            + layers_range.norm(a.uncached_layers)
            + delay_range.norm(a.overall_delay);
        let b_key = trust_range.norm(b.trust_cost)
            + layers_range.norm(b.uncached_layers)
            + delay_range.norm(b.overall_delay);
        a.sla_violations
            .cmp(&b.sla_violations)
            .then(a_key.total_cmp(&b_key))
            .then(a.server.cmp(&b.server))
    });
}

// ============================================================================
// Placement
// ============================================================================

fn place_or_improve(
    world: &mut World,
    flags: &FeatureFlags,
    knobs: &TrustEdgeKnobs,
    current_step: i64,
    scored: &ScoredApp,
) {
    let service = world.service(scored.service);
    if service.open_migration().is_some() || service.being_provisioned {
        return;
    }
    let current_host = service.server;

    let mut candidates = build_candidates(
        world,
        scored.user,
        scored.service,
        knobs.window_size,
        current_step,
    );
    rank(&mut candidates);

    for candidate in &candidates {
        if Some(candidate.server) == current_host {
            // The incumbent is already the best admissible choice.
            break;
        }
        if world.has_capacity_to_host(candidate.server, scored.service) {
            debug!(
                app = %scored.app,
                service = %scored.service,
                target = %candidate.server,
                sla = scored.delay_sla,
                trust_cost = candidate.trust_cost,
                uncached_layers = candidate.uncached_layers,
                overall_delay = candidate.overall_delay,
                power_cost = candidate.power_cost,
                free_capacity = candidate.free_capacity,
                step = current_step,
                "provisioning service"
            );
            open_migration(
                world,
                scored.service,
                candidate.server,
                MigrationReason::Provision,
                current_step,
            );
            apply_migration_visibility(world, scored.service, flags);
            return;
        }
    }
    if current_host.is_none() {
        // Deferred: every admissible host is full; retried next step.
        debug!(app = %scored.app, step = current_step, "no capacity anywhere; placement deferred");
    }
}

/// Recovery target: the best-ranked available candidate with capacity.
pub(crate) fn best_recovery_target(
    world: &mut World,
    service_id: ServiceId,
    knobs: &TrustEdgeKnobs,
    current_step: i64,
) -> Option<ServerId> {
    let user_id = world
        .application(world.service(service_id).application)
        .users
        .first()
        .copied()?;
    let mut candidates =
        build_candidates(world, user_id, service_id, knobs.window_size, current_step);
    rank(&mut candidates);
    candidates
        .iter()
        .map(|candidate| candidate.server)
        .find(|server| world.has_capacity_to_host(*server, service_id))
}

// ============================================================================
// Proactive migration
// ============================================================================

/// Moves services off hosts whose projected reliability over the
/// lookahead horizon falls below the threshold, to the candidate that
/// strictly improves trust cost.
fn proactive_reliability_migration(
    world: &mut World,
    metrics: &mut MetricsCollector,
    flags: &FeatureFlags,
    knobs: &TrustEdgeKnobs,
    current_step: i64,
) {
    let provisioned: Vec<(ServiceId, ServerId)> = world
        .services
        .values()
        .filter(|service| service.open_migration().is_none() && !service.being_provisioned)
        .filter_map(|service| service.server.map(|host| (service.id, host)))
        .filter(|(_, host)| world.server(*host).available)
        .collect();

    for (service_id, host) in provisioned {
        let model = world.failure_model(world.server(host).failure_model);
        let projected = reliability::conditional_reliability(
            model,
            knobs.window_size,
            current_step,
            knobs.lookahead,
        );
        if projected >= knobs.reliability_threshold {
            continue;
        }

        let host_trust = server_risk(world, host, knobs.window_size, current_step);
        let Some(user_id) = world
            .application(world.service(service_id).application)
            .users
            .first()
            .copied()
        else {
            continue;
        };
        let mut candidates =
            build_candidates(world, user_id, service_id, knobs.window_size, current_step);
        rank(&mut candidates);

        let target = candidates
            .iter()
            .filter(|candidate| candidate.server != host)
            .filter(|candidate| candidate.trust_cost < host_trust)
            .map(|candidate| candidate.server)
            .find(|server| world.has_capacity_to_host(*server, service_id));
        if let Some(target) = target {
            debug!(
                service = %service_id,
                from = %host,
                to = %target,
                reliability = projected,
                step = current_step,
                "proactive reliability migration"
            );
            note_prediction(metrics, host, current_step, knobs.lookahead);
            open_migration(
                world,
                service_id,
                target,
                MigrationReason::Proactive,
                current_step,
            );
            apply_migration_visibility(world, service_id, flags);
        }
    }
}

/// Moves services whose measured delay breached the SLA margin to a
/// candidate that honours it.
fn proactive_sla_migration(
    world: &mut World,
    flags: &FeatureFlags,
    knobs: &TrustEdgeKnobs,
    current_step: i64,
) {
    let service_ids: Vec<ServiceId> = world.services.keys().copied().collect();
    for service_id in service_ids {
        let service = world.service(service_id);
        if service.open_migration().is_some() || service.being_provisioned {
            continue;
        }
        let Some(host) = service.server else {
            continue;
        };
        if !world.server(host).available {
            continue;
        }
        let Some(user_id) = requesting_user(world, service_id, current_step) else {
            continue;
        };
        let app_id = world.service(service_id).application;
        let Some(delay) = world.user(user_id).delays.get(&app_id).copied().flatten() else {
            continue;
        };
        let sla = world
            .user(user_id)
            .delay_slas
            .get(&app_id)
            .copied()
            .unwrap_or(f64::INFINITY);
        if delay <= knobs.delay_threshold * sla {
            continue;
        }

        let mut candidates =
            build_candidates(world, user_id, service_id, knobs.window_size, current_step);
        rank(&mut candidates);
        let target = candidates
            .iter()
            .filter(|candidate| candidate.server != host)
            .filter(|candidate| candidate.sla_violations == 0)
            .map(|candidate| candidate.server)
            .find(|server| world.has_capacity_to_host(*server, service_id));
        if let Some(target) = target {
            debug!(
                service = %service_id,
                from = %host,
                to = %target,
                delay,
                sla,
                step = current_step,
                "proactive SLA migration"
            );
            open_migration(
                world,
                service_id,
                target,
                MigrationReason::Proactive,
                current_step,
            );
            apply_migration_visibility(world, service_id, flags);
        }
    }
}
