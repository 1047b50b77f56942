//! Kubernetes-inspired baseline.
//!
//! Resource-ratio scheduling only: candidates are ranked by allocatable
//! free capacity, most first. No latency, locality, or reliability
//! terms, no rebalancing of placed services; failed hosts trigger
//! reactive recreation through the shared recovery pre-pass.

use tracing::debug;
use trustedge_types::{MigrationReason, ServerId, ServiceId};

use crate::migration::open_migration;
use crate::policy::{apply_migration_visibility, requesting_user, FeatureFlags};
use crate::world::World;

pub fn step(world: &mut World, flags: &FeatureFlags, current_step: i64) {
    let unplaced: Vec<ServiceId> = world
        .services
        .values()
        .filter(|service| service.server.is_none())
        .filter(|service| service.open_migration().is_none() && !service.being_provisioned)
        .map(|service| service.id)
        .collect();

    for service_id in unplaced {
        if requesting_user(world, service_id, current_step).is_none() {
            continue;
        }
        if let Some(target) = best_target(world, service_id) {
            debug!(service = %service_id, target = %target, step = current_step, "scheduling pod");
            open_migration(
                world,
                service_id,
                target,
                MigrationReason::Provision,
                current_step,
            );
            apply_migration_visibility(world, service_id, flags);
        }
    }
}

/// Most allocatable node with capacity, ties broken by ascending id.
pub(crate) fn best_target(world: &World, service_id: ServiceId) -> Option<ServerId> {
    let mut candidates: Vec<(f64, ServerId)> = world
        .servers
        .values()
        .filter(|server| server.available)
        .map(|server| (server.normalized_free_capacity(), server.id))
        .collect();
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    candidates
        .into_iter()
        .map(|(_, id)| id)
        .find(|server| world.has_capacity_to_host(*server, service_id))
}
