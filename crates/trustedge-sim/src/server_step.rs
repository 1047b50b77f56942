//! Per-step server logic: failure life-cycle and layer downloads.
//!
//! Order within the step (§ scheduler contract): extend the failure trace
//! if consumed, advance the failure state machine at exact boundary
//! instants, then drain the waiting queue into the download queue while
//! the concurrency cap permits.

use tracing::{debug, warn};
use trustedge_types::{ServerId, ServerStatus, Step};

use crate::flow::{create_flow, FlowKind};
use crate::metrics::MetricsCollector;
use crate::policy::FeatureFlags;
use crate::rng::SimRng;
use crate::world::World;

pub fn run(
    world: &mut World,
    rng: &mut SimRng,
    metrics: &mut MetricsCollector,
    flags: &FeatureFlags,
    current_step: i64,
    server_id: ServerId,
) {
    extend_trace_if_consumed(world, rng, server_id, current_step);
    advance_failure_state(world, metrics, server_id, current_step);
    drain_waiting_queue(world, flags, server_id, current_step);

    let available = world.server(server_id).available;
    world.server_mut(server_id).available_history.push(available);
}

// ============================================================================
// Failure management
// ============================================================================

/// Plans the next failure group once the last planned one has been fully
/// consumed into the history.
fn extend_trace_if_consumed(
    world: &mut World,
    rng: &mut SimRng,
    server_id: ServerId,
    current_step: i64,
) {
    let (model_id, time_to_boot) = {
        let server = world.server(server_id);
        (server.failure_model, server.time_to_boot)
    };
    let model = world.failure_model_mut(model_id);
    if !model.trace_exhausted() {
        return;
    }

    let next_start = match model.last_planned() {
        None => model.initial_failure_time_step,
        Some(last) => {
            let interval = model.characteristics.interval_between_sets().sample(rng);
            if last.becomes_available_at.is_infinite() || interval.is_infinite() {
                Step::INFINITY
            } else {
                last.becomes_available_at.offset(interval.get())
            }
        }
    };
    model.generate_set(rng, next_start, current_step, time_to_boot);
}

/// Walks the server through `available → failing → booting → available`
/// at the exact boundary steps of the failure covering the current step.
fn advance_failure_state(
    world: &mut World,
    metrics: &mut MetricsCollector,
    server_id: ServerId,
    current_step: i64,
) {
    let model_id = world.server(server_id).failure_model;
    // The boot-completion boundary sits one past the unavailability
    // interval, so this lookup is inclusive on both ends.
    let ongoing = world
        .failure_model(model_id)
        .failure_trace
        .iter()
        .flatten()
        .find(|record| {
            record.failure_starts_at <= Step::new(current_step)
                && Step::new(current_step) <= record.becomes_available_at
        })
        .copied();
    let Some(record) = ongoing else {
        return;
    };

    let status = world.server(server_id).status;
    match status {
        ServerStatus::Available if Step::new(current_step) == record.failure_starts_at => {
            set_status(world, metrics, server_id, ServerStatus::Failing, current_step);
            // Anything hosted here is down with the host.
            let hosted: Vec<_> = world.server(server_id).services.iter().copied().collect();
            for service_id in hosted {
                world.service_mut(service_id).available = false;
            }
        }
        ServerStatus::Failing if Step::new(current_step) == record.starts_booting_at => {
            set_status(world, metrics, server_id, ServerStatus::Booting, current_step);
        }
        ServerStatus::Booting if Step::new(current_step) == record.becomes_available_at => {
            set_status(world, metrics, server_id, ServerStatus::Available, current_step);
            let model = world.failure_model_mut(model_id);
            if model.failure_history.last() != Some(&record) {
                model.failure_history.push(record);
            }
            // Services that rode out the failure in place come back up.
            let hosted: Vec<_> = world.server(server_id).services.iter().copied().collect();
            for service_id in hosted {
                let service = world.service_mut(service_id);
                if service.open_migration().is_none() && !service.being_provisioned {
                    service.available = true;
                }
            }
        }
        _ => {}
    }
}

fn set_status(
    world: &mut World,
    metrics: &mut MetricsCollector,
    server_id: ServerId,
    status: ServerStatus,
    current_step: i64,
) {
    let server = world.server_mut(server_id);
    let previous = server.status;
    server.status = status;
    server.available = status == ServerStatus::Available;
    debug!(server = %server_id, from = %previous, to = %status, step = current_step, "server status change");
    metrics.on_server_status_change(server_id, previous, status, current_step);
}

// ============================================================================
// Layer download management
// ============================================================================

/// Pops queued layer digests into active download flows while the
/// concurrency cap permits, pulling each from the closest available
/// source.
fn drain_waiting_queue(
    world: &mut World,
    flags: &FeatureFlags,
    server_id: ServerId,
    current_step: i64,
) {
    loop {
        {
            let server = world.server(server_id);
            if server.waiting_queue.is_empty()
                || server.download_queue.len() >= server.max_concurrent_layer_downloads
            {
                return;
            }
        }
        let digest = world
            .server_mut(server_id)
            .waiting_queue
            .pop_front()
            .unwrap_or_else(|| unreachable!());

        match closest_source_with_layer(world, flags, server_id, &digest) {
            Some(source) => {
                let size_mb = world.template_layer_size(&digest).unwrap_or(0);
                let bytes = (size_mb * 1_000_000) as f64;
                match create_flow(
                    world,
                    source,
                    server_id,
                    current_step,
                    bytes,
                    FlowKind::Layer {
                        digest: digest.clone(),
                        size_mb,
                    },
                ) {
                    Ok(flow_id) => {
                        world.server_mut(server_id).download_queue.push(flow_id);
                        debug!(
                            server = %server_id,
                            layer = %digest,
                            source = %source,
                            step = current_step,
                            "layer download started"
                        );
                    }
                    Err(error) => {
                        warn!(server = %server_id, layer = %digest, %error, "layer pull failed; requeued");
                        world.server_mut(server_id).waiting_queue.push_back(digest);
                        return;
                    }
                }
            }
            None => {
                warn!(server = %server_id, layer = %digest, "no available source holds the layer; requeued");
                world.server_mut(server_id).waiting_queue.push_back(digest);
                return;
            }
        }
    }
}

/// Ranks candidate sources by delay-weighted shortest switch path and
/// returns the closest. Registries always serve; with peer-to-peer fetch
/// enabled, any available edge server holding the layer does too.
fn closest_source_with_layer(
    world: &mut World,
    flags: &FeatureFlags,
    puller: ServerId,
    digest: &str,
) -> Option<ServerId> {
    let mut candidates: Vec<ServerId> = Vec::new();
    for registry in world.registries.values() {
        if let Some(host) = registry.server {
            if host != puller
                && world.server(host).available
                && world.server(host).has_layer(&world.layers, digest)
            {
                candidates.push(host);
            }
        }
    }
    if flags.p2p_layer_fetch {
        for server in world.servers.values() {
            if server.id != puller
                && server.available
                && server.container_registry.is_none()
                && server.has_layer(&world.layers, digest)
            {
                candidates.push(server.id);
            }
        }
    }
    candidates.sort();
    candidates.dedup();

    let puller_switch = world.server_switch(puller);
    let mut best: Option<(f64, ServerId)> = None;
    for source in candidates {
        let source_switch = world.server_switch(source);
        let Ok(path) = world.topology.shortest_path(source_switch, puller_switch) else {
            continue;
        };
        let delay = world.topology.path_delay(&path);
        let better = match best {
            None => true,
            Some((best_delay, _)) => delay < best_delay,
        };
        if better {
            best = Some((delay, source));
        }
    }
    best.map(|(_, source)| source)
}
