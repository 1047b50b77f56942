//! Opening, cancelling, and reclassifying migrations.
//!
//! The per-step state machine itself lives in [`crate::service_step`];
//! this module owns the bookkeeping shared between the policy (which
//! opens migrations) and the service step (which advances and cancels
//! them). Admission is atomic within a tick: a target is either fully
//! reserved here or not touched at all.

use tracing::debug;
use trustedge_types::{MigrationReason, MigrationStatus, ServerId, ServiceId};

use crate::entities::Migration;
use crate::flow::destroy_flow;
use crate::world::World;

/// Opens a migration of `service` towards `target` and reserves the
/// target's resources.
///
/// The service keeps its origin binding while the origin is up (live
/// migration placement); a fresh provision or a dead origin binds the
/// service to the target immediately. Queues the image's uncached layers
/// on the target.
///
/// Panics when the service already has an open migration or when the
/// target already hosts it (impossible state transitions).
pub fn open_migration(
    world: &mut World,
    service_id: ServiceId,
    target: ServerId,
    reason: MigrationReason,
    current_step: i64,
) {
    let service = world.service(service_id);
    let origin = service.server;
    assert!(
        service.open_migration().is_none(),
        "service {service_id} already has an open migration"
    );
    assert!(
        origin != Some(target),
        "migration of service {service_id} targets its own host {target}"
    );

    let (cpu, memory) = (service.cpu_demand, service.memory_demand);
    let image_digest = service.image_digest.clone();

    // Atomic reservation on the target.
    {
        let host = world.server_mut(target);
        host.demand.cpu_cores += cpu;
        host.demand.memory_gb += memory;
    }

    // Queue whatever the target still needs to pull.
    let missing = world.uncached_layer_digests(target, &image_digest);
    world
        .server_mut(target)
        .waiting_queue
        .extend(missing.iter().cloned());

    let origin_available = origin.is_some_and(|id| world.server(id).available);
    let service = world.service_mut(service_id);
    service.migrations.push(Migration::open(
        origin,
        target,
        reason,
        current_step,
    ));
    service.being_provisioned = true;

    match origin {
        None => {
            // Fresh provision: bind to the target straight away.
            world.service_mut(service_id).server = Some(target);
            world.service_mut(service_id).available = false;
            world.server_mut(target).services.insert(service_id);
        }
        Some(origin_id) if !origin_available => {
            // Recovery from a dead host: move the binding now and scrub
            // the origin's stale accounting so nothing leaks while it is
            // down.
            detach_from(world, service_id, origin_id);
            world.service_mut(service_id).server = Some(target);
            world.service_mut(service_id).available = false;
            world.server_mut(target).services.insert(service_id);
        }
        // Live origin: the service stays bound there while layers pull.
        Some(_) => {}
    }

    debug!(
        service = %service_id,
        target = %target,
        %reason,
        layers_queued = missing.len(),
        step = current_step,
        "migration opened"
    );
}

/// Cancels an open migration because the user left its access window.
///
/// Releases the target reservation and any origin-held demand, drops the
/// image's pending layer downloads so nothing further arrives, and leaves
/// the service unplaced and unavailable.
pub fn cancel_user_stopped(world: &mut World, service_id: ServiceId, current_step: i64) {
    let service = world.service(service_id);
    let Some(migration) = service.open_migration() else {
        return;
    };
    let (origin, target) = (migration.origin, migration.target);
    let image_digest = service.image_digest.clone();

    {
        let migration = world
            .service_mut(service_id)
            .open_migration_mut()
            .unwrap_or_else(|| unreachable!());
        migration.status = MigrationStatus::Interrupted;
        migration.end = Some(current_step);
        migration.interruption_reason = Some(MigrationReason::UserStoppedAccessing);
        migration.interrupted_time += 1;
    }

    abort_pending_layer_downloads(world, service_id, target, &image_digest);

    // Release the target reservation.
    release_demand(world, service_id, target);
    world.server_mut(target).services.remove(&service_id);

    // Release the origin, if the service was still bound there.
    if let Some(origin) = origin {
        if origin != target && world.server(origin).services.contains(&service_id) {
            detach_from(world, service_id, origin);
        }
    }

    let service = world.service_mut(service_id);
    service.server = None;
    service.available = false;
    service.being_provisioned = false;

    debug!(service = %service_id, step = current_step, "migration cancelled: user stopped accessing");
}

/// Reclassifies an open migration as failure recovery after its origin
/// went down: the binding moves to the target immediately and the dead
/// origin's accounting is scrubbed.
pub fn reclassify_as_recovery(world: &mut World, service_id: ServiceId) {
    let Some(migration) = world.service(service_id).open_migration() else {
        return;
    };
    let (origin, target, state_flow) =
        (migration.origin, migration.target, migration.state_flow);

    if let Some(flow) = state_flow {
        destroy_flow(world, flow);
    }
    {
        let migration = world
            .service_mut(service_id)
            .open_migration_mut()
            .unwrap_or_else(|| unreachable!());
        migration.reason = MigrationReason::ServerFailed;
        migration.state_flow = None;
        // A state copy already under way can never finish from a dead
        // origin; the recovery path finalizes without it.
        if migration.status == MigrationStatus::MigratingServiceState {
            migration.status = MigrationStatus::Finished;
        }
    }

    if let Some(origin) = origin {
        if world.server(origin).services.contains(&service_id) {
            detach_from(world, service_id, origin);
        }
    }
    world.service_mut(service_id).server = Some(target);
    world.service_mut(service_id).available = false;
    world.server_mut(target).services.insert(service_id);

    debug!(service = %service_id, "migration reclassified as failure recovery");
}

/// Removes the service from a host's set and subtracts its cpu/memory
/// demand.
pub fn detach_from(world: &mut World, service_id: ServiceId, host: ServerId) {
    world.server_mut(host).services.remove(&service_id);
    release_demand(world, service_id, host);
}

fn release_demand(world: &mut World, service_id: ServiceId, host: ServerId) {
    let (cpu, memory) = {
        let service = world.service(service_id);
        (service.cpu_demand, service.memory_demand)
    };
    let server = world.server_mut(host);
    server.demand.cpu_cores = server.demand.cpu_cores.saturating_sub(cpu);
    server.demand.memory_gb = server.demand.memory_gb.saturating_sub(memory);
}

/// Drops the service image's queued and in-flight layer pulls on the
/// target, unless another service on that target still needs the digest.
fn abort_pending_layer_downloads(
    world: &mut World,
    cancelled: ServiceId,
    target: ServerId,
    image_digest: &str,
) {
    let Some(image) = world.image_by_digest(image_digest) else {
        return;
    };
    let digests: Vec<String> = image.layers_digests.clone();

    let needed_by_others: Vec<String> = world
        .services
        .values()
        .filter(|other| other.id != cancelled)
        .filter(|other| {
            other.server == Some(target)
                || other.open_migration().is_some_and(|m| m.target == target)
        })
        .filter_map(|other| world.image_by_digest(&other.image_digest))
        .flat_map(|image| image.layers_digests.clone())
        .collect();

    let droppable: Vec<String> = digests
        .into_iter()
        .filter(|digest| !needed_by_others.contains(digest))
        .collect();

    world
        .server_mut(target)
        .waiting_queue
        .retain(|digest| !droppable.contains(digest));

    let doomed_flows: Vec<_> = world
        .server(target)
        .download_queue
        .iter()
        .copied()
        .filter(|flow_id| {
            world
                .flow(*flow_id)
                .layer_digest()
                .is_some_and(|digest| droppable.iter().any(|d| d == digest))
        })
        .collect();
    for flow_id in doomed_flows {
        destroy_flow(world, flow_id);
    }
}
