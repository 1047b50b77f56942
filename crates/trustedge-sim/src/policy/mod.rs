//! Placement policies.
//!
//! A closed sum over the three resource-management algorithms. The
//! scheduler invokes [`Policy::step`] once per tick before any entity
//! step, so policies always observe the previous tick's settled state.

mod first_fit;
mod kubernetes;
pub mod score;
mod trust_edge;

use serde::{Deserialize, Serialize};
use tracing::debug;
use trustedge_types::{MigrationReason, ServerId, ServiceId, UserId};

use crate::error::SimError;
use crate::metrics::MetricsCollector;
use crate::migration::open_migration;
use crate::reliability;
use crate::world::World;

pub use trust_edge::TrustEdgeKnobs;

// ============================================================================
// Feature flags and knobs
// ============================================================================

/// Optional behaviours recognised by the policies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Proactive migration off hosts whose projected reliability drops
    /// below the threshold.
    pub failure_prediction: bool,
    /// Let edge servers (not just registries) serve layer downloads.
    pub p2p_layer_fetch: bool,
    /// Keep a service serving from its origin while layers pull.
    pub live_migration: bool,
    /// Migrate services whose measured delay breaches the SLA margin.
    pub proactive_sla_migration: bool,
}

// ============================================================================
// Policy sum type
// ============================================================================

/// The selected resource-management algorithm.
#[derive(Debug, Clone)]
pub enum Policy {
    TrustEdge(TrustEdgeKnobs),
    KubernetesInspired,
    FirstFit,
}

impl Policy {
    /// Resolves a run-invocation algorithm tag.
    pub fn from_tag(tag: &str, knobs: TrustEdgeKnobs) -> Result<Self, SimError> {
        match tag {
            "trustedge_v3" => Ok(Policy::TrustEdge(knobs)),
            "kubernetes_inspired" => Ok(Policy::KubernetesInspired),
            "first_fit_baseline" => Ok(Policy::FirstFit),
            other => Err(SimError::UnknownAlgorithm(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Policy::TrustEdge(_) => "trustedge_v3",
            Policy::KubernetesInspired => "kubernetes_inspired",
            Policy::FirstFit => "first_fit_baseline",
        }
    }

    /// One placement round. Runs the shared failure-recovery pre-pass,
    /// then the algorithm-specific provisioning logic.
    pub fn step(
        &mut self,
        world: &mut World,
        metrics: &mut MetricsCollector,
        flags: &FeatureFlags,
        current_step: i64,
    ) {
        recovery_pre_pass(self, world, flags, current_step);
        match self {
            Policy::TrustEdge(knobs) => {
                let knobs = *knobs;
                trust_edge::step(world, metrics, flags, &knobs, current_step);
            }
            Policy::KubernetesInspired => kubernetes::step(world, flags, current_step),
            Policy::FirstFit => first_fit::step(world, flags, current_step),
        }
    }
}

// ============================================================================
// Shared machinery
// ============================================================================

/// Re-provisions services stranded on failed hosts, using the policy's
/// own target selection. A stranded service with no admissible target
/// stays put and is retried next step.
fn recovery_pre_pass(
    policy: &Policy,
    world: &mut World,
    flags: &FeatureFlags,
    current_step: i64,
) {
    let stranded: Vec<ServiceId> = world
        .services
        .values()
        .filter(|service| service.open_migration().is_none())
        .filter(|service| {
            service
                .server
                .is_some_and(|server| !world.server(server).available)
        })
        .filter(|service| {
            requesting_user(world, service.id, current_step).is_some()
        })
        .map(|service| service.id)
        .collect();

    for service_id in stranded {
        let target = match policy {
            Policy::TrustEdge(knobs) => {
                trust_edge::best_recovery_target(world, service_id, knobs, current_step)
            }
            Policy::KubernetesInspired => kubernetes::best_target(world, service_id),
            Policy::FirstFit => first_fit::best_target(world, service_id),
        };
        if let Some(target) = target {
            debug!(service = %service_id, target = %target, step = current_step, "recovering service off failed host");
            open_migration(
                world,
                service_id,
                target,
                MigrationReason::ServerFailed,
                current_step,
            );
            apply_migration_visibility(world, service_id, flags);
        }
    }
}

/// The application's user, if it is inside an access window right now.
pub(crate) fn requesting_user(
    world: &World,
    service_id: ServiceId,
    current_step: i64,
) -> Option<UserId> {
    let app_id = world.service(service_id).application;
    let user_id = world.application(app_id).users.first().copied()?;
    world
        .user(user_id)
        .access_patterns
        .get(&app_id)
        .is_some_and(|pattern| pattern.is_within_window(current_step))
        .then_some(user_id)
}

/// Cold migrations take the service down for the duration; live
/// migration keeps an available origin serving while layers pull.
pub(crate) fn apply_migration_visibility(
    world: &mut World,
    service_id: ServiceId,
    flags: &FeatureFlags,
) {
    if flags.live_migration {
        return;
    }
    let on_live_origin = {
        let service = world.service(service_id);
        match (service.server, service.open_migration()) {
            (Some(host), Some(migration)) => {
                Some(host) == migration.origin && world.server(host).available
            }
            _ => false,
        }
    };
    if on_live_origin {
        world.service_mut(service_id).available = false;
    }
}

/// Risk score of a server, windowed per the TrustEdge knobs.
pub(crate) fn server_risk(
    world: &World,
    server: ServerId,
    window: usize,
    current_step: i64,
) -> f64 {
    let model = world.server(server).failure_model;
    reliability::risk_score(world.failure_model(model), window, current_step)
}

/// Records a failure prediction when proactive migration fires.
pub(crate) fn note_prediction(
    metrics: &mut MetricsCollector,
    server: ServerId,
    current_step: i64,
    lookahead: i64,
) {
    metrics.on_failure_predicted(server, current_step, lookahead);
}
