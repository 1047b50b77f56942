//! The network-flow engine.
//!
//! Flows model byte transfers (layer downloads, service-state copies)
//! across shared links. Each tick, a link's nominal bandwidth is split
//! equally among its active flows; a flow's throughput is the minimum
//! share across its path, further reduced by the bottleneck link's
//! transmission-delay factor. A flow created during tick `t` starts
//! transferring at tick `t + 1`.

use tracing::{debug, warn};
use trustedge_types::{FlowId, FlowStatus, LinkId, ServerId, ServiceId, SwitchId};

use crate::error::SimError;
use crate::entities::ContainerLayer;
use crate::world::World;

/// Megabits-per-second to bytes-per-one-second-tick.
const BYTES_PER_MBPS_TICK: f64 = 125_000.0;

/// What a flow carries.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowKind {
    /// A container layer being pulled to the target server.
    Layer { digest: String, size_mb: u64 },
    /// A service's in-memory state moving from origin to target.
    ServiceState { service: ServiceId },
}

/// One byte transfer in progress between two servers.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub id: FlowId,
    pub source: ServerId,
    pub target: ServerId,
    pub path: Vec<SwitchId>,
    pub links: Vec<LinkId>,
    pub created_at: i64,
    pub data_to_transfer_bytes: f64,
    /// Share obtained in the most recent tick, for observability.
    pub bandwidth_share_mbps: f64,
    pub status: FlowStatus,
    pub kind: FlowKind,
}

impl Flow {
    pub fn layer_digest(&self) -> Option<&str> {
        match &self.kind {
            FlowKind::Layer { digest, .. } => Some(digest),
            FlowKind::ServiceState { .. } => None,
        }
    }

    pub fn service_state_of(&self) -> Option<ServiceId> {
        match &self.kind {
            FlowKind::ServiceState { service } => Some(*service),
            FlowKind::Layer { .. } => None,
        }
    }
}

// ============================================================================
// Creation / teardown
// ============================================================================

/// Routes and registers a new flow between two servers. Fails with
/// [`SimError::RoutingUnavailable`] when the switch graph offers no path.
pub fn create_flow(
    world: &mut World,
    source: ServerId,
    target: ServerId,
    created_at: i64,
    data_to_transfer_bytes: f64,
    kind: FlowKind,
) -> Result<FlowId, SimError> {
    let source_switch = world.server_switch(source);
    let target_switch = world.server_switch(target);
    let path = world.topology.shortest_path(source_switch, target_switch)?;
    let links = world.topology.path_links(&path);

    let id = world.allocate_flow_id();
    for link in &links {
        world.link_mut(*link).active_flows.insert(id);
    }
    world.flows.insert(
        id,
        Flow {
            id,
            source,
            target,
            path,
            links,
            created_at,
            data_to_transfer_bytes,
            bandwidth_share_mbps: 0.0,
            status: FlowStatus::Active,
            kind,
        },
    );
    Ok(id)
}

/// Removes a flow from every link it occupies and drops it. Used both for
/// completion and for mid-transfer cancellation.
pub fn destroy_flow(world: &mut World, flow_id: FlowId) {
    if let Some(flow) = world.flows.remove(&flow_id) {
        for link in &flow.links {
            world.link_mut(*link).active_flows.remove(&flow_id);
        }
        if let Some(pos) = world
            .server(flow.target)
            .download_queue
            .iter()
            .position(|id| *id == flow_id)
        {
            world.server_mut(flow.target).download_queue.remove(pos);
        }
    }
}

// ============================================================================
// Per-tick advance
// ============================================================================

/// Advances every active flow by one tick and finalizes completions.
pub fn advance_flows(world: &mut World, current_step: i64) {
    let flow_ids: Vec<FlowId> = world.flows.keys().copied().collect();
    for flow_id in flow_ids {
        // Flows created this tick start moving next tick.
        let created_at = world.flow(flow_id).created_at;
        if created_at >= current_step {
            continue;
        }

        let (share, factor) = bottleneck_share(world, flow_id);
        if share <= 0.0 && !world.flow(flow_id).links.is_empty() {
            warn!(flow = %flow_id, "flow starved: zero residual bandwidth on its path");
            continue;
        }

        let flow = world.flow_mut(flow_id);
        flow.bandwidth_share_mbps = share;
        if flow.links.is_empty() {
            // Endpoints behind the same switch: the transfer is bounded
            // only by the tick granularity.
            flow.data_to_transfer_bytes = 0.0;
        } else {
            flow.data_to_transfer_bytes -= share * BYTES_PER_MBPS_TICK / (1.0 + factor);
        }

        if flow.data_to_transfer_bytes <= 0.0 {
            complete_flow(world, flow_id, current_step);
        }
    }
}

/// The minimum equal-split share along the path, and the transmission
/// delay of the link that set it.
fn bottleneck_share(world: &World, flow_id: FlowId) -> (f64, f64) {
    let flow = world.flow(flow_id);
    let mut share = f64::INFINITY;
    let mut factor = 0.0;
    for link_id in &flow.links {
        let link = world.link(*link_id);
        let sharers = link.active_flows.len().max(1);
        let link_share = link.bandwidth_mbps / sharers as f64;
        if link_share < share {
            share = link_share;
            factor = link.transmission_delay_s;
        }
    }
    if share.is_infinite() {
        (0.0, 0.0)
    } else {
        (share, factor)
    }
}

/// Runs a completed flow's side effect and destroys it.
fn complete_flow(world: &mut World, flow_id: FlowId, current_step: i64) {
    let flow = world.flow(flow_id);
    let kind = flow.kind.clone();
    let target = flow.target;
    world.flow_mut(flow_id).status = FlowStatus::Completed;

    match kind {
        FlowKind::Layer { digest, size_mb } => {
            materialize_layer(world, target, &digest, size_mb);
            debug!(server = %target, layer = %digest, step = current_step, "layer download finished");
        }
        FlowKind::ServiceState { service } => {
            if let Some(migration) = world.service_mut(service).open_migration_mut() {
                migration.state_transfer_complete = true;
            }
            debug!(service = %service, step = current_step, "service state transfer finished");
        }
    }

    destroy_flow(world, flow_id);
}

/// Instantiates a downloaded layer on its new host and accounts its disk
/// footprint.
fn materialize_layer(world: &mut World, target: ServerId, digest: &str, size_mb: u64) {
    let instruction = world
        .layers
        .values()
        .find(|layer| layer.digest == digest)
        .map(|layer| layer.instruction.clone())
        .unwrap_or_default();

    let layer_id = world.allocate_layer_id();
    world.layers.insert(
        layer_id,
        ContainerLayer {
            id: layer_id,
            digest: digest.to_string(),
            size_mb,
            instruction,
            server: Some(target),
        },
    );
    let server = world.server_mut(target);
    server.container_layers.push(layer_id);
    server.demand.disk_mb += size_mb;
}
