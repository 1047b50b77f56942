//! First-fit baseline.
//!
//! The first available server (ascending id) with capacity wins. No
//! latency, reliability, or locality consideration whatsoever.

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
            debug!(service = %service_id, target = %target, step = current_step, "first-fit placement");
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

pub(crate) fn best_target(world: &World, service_id: ServiceId) -> Option<ServerId> {
    world
        .servers
        .values()
        .filter(|server| server.available)
        .map(|server| server.id)
        .find(|server| world.has_capacity_to_host(*server, service_id))
}
