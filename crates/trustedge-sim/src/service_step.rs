//! Per-step service logic: advancing the migration state machine.
//!
//! Transitions: `waiting → pulling_layers` once the target holds or is
//! downloading at least one needed layer; `pulling_layers →
//! migrating_service_state` (or straight to `finished`) once every layer
//! is local; `migrating_service_state → finished` when the state flow
//! completes. Origin failures reclassify the migration as recovery;
//! leaving the access window cancels it while layers are still pending.

use tracing::{debug, warn};
use trustedge_types::{MigrationStatus, ServiceId};

use crate::entities::ContainerImage;
use crate::flow::{create_flow, FlowKind};
use crate::metrics::MetricsCollector;
use crate::migration::{cancel_user_stopped, detach_from, reclassify_as_recovery};
use crate::user_step::set_communication_path;
use crate::world::World;

pub fn run(
    world: &mut World,
    metrics: &mut MetricsCollector,
    current_step: i64,
    service_id: ServiceId,
) {
    if world.service(service_id).open_migration().is_none() {
        return;
    }

    // A dead origin turns the move into failure recovery.
    let (origin, is_recovery) = {
        let migration = world
            .service(service_id)
            .open_migration()
            .unwrap_or_else(|| unreachable!());
        (migration.origin, migration.is_recovery())
    };
    if let Some(origin_id) = origin {
        if !is_recovery && !world.server(origin_id).available {
            reclassify_as_recovery(world, service_id);
        }
    }

    // The user walking away cancels a migration that is still pulling.
    {
        let migration = world
            .service(service_id)
            .open_migration()
            .unwrap_or_else(|| unreachable!());
        let cancellable = !migration.is_recovery()
            && matches!(
                migration.status,
                MigrationStatus::Waiting | MigrationStatus::PullingLayers
            );
        if cancellable && !user_still_accessing(world, service_id, current_step) {
            cancel_user_stopped(world, service_id, current_step);
            return;
        }
    }

    advance_phases(world, current_step, service_id);

    // Per-step phase counters, after this step's transitions settled.
    // An interruption inside the advance closes the migration, in which
    // case there is nothing left to count.
    if let Some(migration) = world.service_mut(service_id).open_migration_mut() {
        match migration.status {
            MigrationStatus::Waiting => migration.waiting_time += 1,
            MigrationStatus::PullingLayers => migration.pulling_layers_time += 1,
            MigrationStatus::MigratingServiceState => {
                migration.migrating_service_state_time += 1;
            }
            MigrationStatus::Finished | MigrationStatus::Interrupted => {}
        }
    }

    finalize_if_finished(world, metrics, current_step, service_id);
}

fn user_still_accessing(world: &World, service_id: ServiceId, current_step: i64) -> bool {
    let app_id = world.service(service_id).application;
    let Some(user_id) = world.application(app_id).users.first().copied() else {
        return true;
    };
    world
        .user(user_id)
        .access_patterns
        .get(&app_id)
        .is_some_and(|pattern| pattern.is_within_window(current_step))
}

fn advance_phases(world: &mut World, current_step: i64, service_id: ServiceId) {
    let image_digest = world.service(service_id).image_digest.clone();
    let (target, status) = {
        let migration = world
            .service(service_id)
            .open_migration()
            .unwrap_or_else(|| unreachable!());
        (migration.target, migration.status)
    };

    let digests: Vec<String> = world
        .image_by_digest(&image_digest)
        .unwrap_or_else(|| panic!("service {service_id} references unknown image digest {image_digest}"))
        .layers_digests
        .clone();
    let downloaded = digests
        .iter()
        .filter(|digest| world.server(target).has_layer(&world.layers, digest))
        .count();
    let downloading = world
        .server(target)
        .download_queue
        .iter()
        .filter(|flow_id| {
            world
                .flow(**flow_id)
                .layer_digest()
                .is_some_and(|digest| digests.iter().any(|d| d == digest))
        })
        .count();

    if status == MigrationStatus::Waiting && downloaded + downloading > 0 {
        let migration = world
            .service_mut(service_id)
            .open_migration_mut()
            .unwrap_or_else(|| unreachable!());
        migration.status = MigrationStatus::PullingLayers;
        debug!(service = %service_id, step = current_step, "migration pulling layers");
    }

    let status = world
        .service(service_id)
        .open_migration()
        .map(|m| m.status)
        .unwrap_or_else(|| unreachable!());
    if status == MigrationStatus::PullingLayers && !digests.is_empty() && downloaded == digests.len()
    {
        complete_layer_pull(world, current_step, service_id, target, &image_digest);
    }

    // A routing failure in the pull completion may have closed the
    // migration already.
    let pending = world
        .service(service_id)
        .open_migration()
        .map(|m| (m.status, m.state_transfer_complete));
    if let Some((MigrationStatus::MigratingServiceState, true)) = pending {
        world
            .service_mut(service_id)
            .open_migration_mut()
            .unwrap_or_else(|| unreachable!())
            .status = MigrationStatus::Finished;
    }
}

/// Every layer is local on the target: instantiate the image, release the
/// origin, rebind the service, and either start the state copy or finish
/// outright.
fn complete_layer_pull(
    world: &mut World,
    current_step: i64,
    service_id: ServiceId,
    target: trustedge_types::ServerId,
    image_digest: &str,
) {
    ensure_image_instance(world, target, image_digest);

    let (origin, is_recovery) = {
        let migration = world
            .service(service_id)
            .open_migration()
            .unwrap_or_else(|| unreachable!());
        (migration.origin, migration.is_recovery())
    };

    // Release the origin and move the binding: past pulling_layers the
    // service lives on the target.
    let origin_available = origin.is_some_and(|id| world.server(id).available);
    if let Some(origin_id) = origin {
        if origin_available && world.server(origin_id).services.contains(&service_id) {
            detach_from(world, service_id, origin_id);
        }
    }
    if world.service(service_id).server != Some(target) {
        world.service_mut(service_id).server = Some(target);
    }
    world.server_mut(target).services.insert(service_id);

    let state_bytes = world.service(service_id).state_bytes;
    let skip_state_copy =
        is_recovery || state_bytes == 0 || origin.is_none() || !origin_available;
    if skip_state_copy {
        world
            .service_mut(service_id)
            .open_migration_mut()
            .unwrap_or_else(|| unreachable!())
            .status = MigrationStatus::Finished;
        return;
    }

    let origin_id = origin.unwrap_or_else(|| unreachable!());
    world.service_mut(service_id).available = false;
    match create_flow(
        world,
        origin_id,
        target,
        current_step,
        state_bytes as f64,
        FlowKind::ServiceState {
            service: service_id,
        },
    ) {
        Ok(flow_id) => {
            let migration = world
                .service_mut(service_id)
                .open_migration_mut()
                .unwrap_or_else(|| unreachable!());
            migration.status = MigrationStatus::MigratingServiceState;
            migration.state_flow = Some(flow_id);
            debug!(service = %service_id, bytes = state_bytes, step = current_step, "state transfer started");
        }
        Err(error) => {
            // No route for the state copy: the migration dies, the
            // service stays down this step, the simulation carries on.
            warn!(service = %service_id, %error, "state transfer unroutable; migration cancelled");
            let migration = world
                .service_mut(service_id)
                .open_migration_mut()
                .unwrap_or_else(|| unreachable!());
            migration.status = MigrationStatus::Interrupted;
            migration.end = Some(current_step);
            world.service_mut(service_id).available = false;
            world.service_mut(service_id).being_provisioned = false;
        }
    }
}

fn ensure_image_instance(world: &mut World, target: trustedge_types::ServerId, digest: &str) {
    let already_there = world
        .server(target)
        .container_images
        .iter()
        .any(|id| world.image(*id).digest == digest);
    if already_there {
        return;
    }
    let Some(template) = world.image_by_digest(digest) else {
        return;
    };
    let clone = template.clone();
    let image_id = world.allocate_image_id();
    world.images.insert(
        image_id,
        ContainerImage {
            id: image_id,
            server: Some(target),
            ..clone
        },
    );
    world.server_mut(target).container_images.push(image_id);
}

fn finalize_if_finished(
    world: &mut World,
    metrics: &mut MetricsCollector,
    current_step: i64,
    service_id: ServiceId,
) {
    let finished = world
        .service(service_id)
        .open_migration()
        .is_some_and(|m| m.status == MigrationStatus::Finished);
    if !finished {
        return;
    }

    let target = {
        let migration = world
            .service_mut(service_id)
            .open_migration_mut()
            .unwrap_or_else(|| unreachable!());
        migration.end = Some(current_step);
        migration.target
    };
    // A target that died while layers were pulling hosts the service but
    // cannot serve it until it boots again.
    let target_available = world.server(target).available;
    let service = world.service_mut(service_id);
    service.available = target_available;
    service.being_provisioned = false;
    let snapshot = service
        .migrations
        .last()
        .cloned()
        .unwrap_or_else(|| unreachable!());
    metrics.on_migration_finished(service_id, &snapshot, current_step);

    // The service moved: every user of its application reroutes.
    let app_id = world.service(service_id).application;
    let users = world.application(app_id).users.clone();
    for user_id in users {
        set_communication_path(world, user_id, app_id);
    }
    debug!(service = %service_id, step = current_step, "migration finalized");
}
