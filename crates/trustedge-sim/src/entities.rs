//! Entity definitions.
//!
//! Every relationship is an id into the owning [`crate::World`] stores
//! (arena-with-integer-ids); entities never hold pointers to each other.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use trustedge_types::{
    AppId, BaseStationId, Capacity, Demand, FailureModelId, FlowId, ImageId, LayerId,
    MigrationReason, MigrationStatus, RegistryId, ServerId, ServerStatus, ServiceId, SwitchId,
    UserId,
};

use crate::access::CircularAccessPattern;

// ============================================================================
// Network infrastructure
// ============================================================================

/// A wireless access point users attach to. Wired into exactly one switch.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseStation {
    pub id: BaseStationId,
    pub coordinates: (f64, f64),
    pub network_switch: SwitchId,
    /// Extra delay of the wireless hop, added to every path delay.
    pub wireless_delay_ms: f64,
    pub edge_servers: Vec<ServerId>,
}

/// A node of the wired topology.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSwitch {
    pub id: SwitchId,
    pub coordinates: (f64, f64),
}

/// An undirected link between two switches. Active flows share its
/// nominal bandwidth equally each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkLink {
    pub id: trustedge_types::LinkId,
    pub endpoints: (SwitchId, SwitchId),
    pub bandwidth_mbps: f64,
    pub delay_ms: f64,
    pub transmission_delay_s: f64,
    pub active_flows: BTreeSet<FlowId>,
}

// ============================================================================
// Container supply chain
// ============================================================================

/// One instantiated container layer. Template layers live on registry
/// hosts; downloads create new instances bound to the pulling server.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerLayer {
    pub id: LayerId,
    pub digest: String,
    pub size_mb: u64,
    pub instruction: String,
    pub server: Option<ServerId>,
}

/// A container image: an ordered list of layer digests.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerImage {
    pub id: ImageId,
    pub name: String,
    pub tag: String,
    pub digest: String,
    pub architecture: String,
    pub layers_digests: Vec<String>,
    pub server: Option<ServerId>,
}

/// A registry role attached to a server; layer downloads are sourced from
/// available registries (and, with peer-to-peer fetch, from edge servers).
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRegistry {
    pub id: RegistryId,
    pub server: Option<ServerId>,
}

// ============================================================================
// Edge servers
// ============================================================================

/// Power model parameters: a linear model with a static baseline fraction
/// and a per-utilisation marginal up to `max_watts`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerParameters {
    pub static_fraction: f64,
    pub max_watts: f64,
}

/// An edge server with a stochastic failure life-cycle and a bounded
/// layer-download pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub id: ServerId,
    pub model_name: String,
    pub capacity: Capacity,
    pub demand: Demand,
    pub status: ServerStatus,
    /// `status == Available`, cached for cheap checks.
    pub available: bool,
    pub time_to_boot: i64,
    pub max_concurrent_layer_downloads: usize,
    pub power: PowerParameters,
    pub base_station: BaseStationId,
    pub failure_model: FailureModelId,
    pub services: BTreeSet<ServiceId>,
    pub container_layers: Vec<LayerId>,
    pub container_images: Vec<ImageId>,
    pub container_registry: Option<RegistryId>,
    /// Layer digests queued for download, oldest first.
    pub waiting_queue: VecDeque<String>,
    /// Flows currently downloading layers to this server; bounded by
    /// `max_concurrent_layer_downloads`.
    pub download_queue: Vec<FlowId>,
    /// Per-step availability, one entry per simulated step.
    pub available_history: Vec<bool>,
}

impl Server {
    pub fn free_cpu(&self) -> i64 {
        i64::from(self.capacity.cpu_cores) - i64::from(self.demand.cpu_cores)
    }

    pub fn free_memory(&self) -> i64 {
        i64::from(self.capacity.memory_gb) - i64::from(self.demand.memory_gb)
    }

    pub fn free_disk(&self) -> i64 {
        self.capacity.disk_mb as i64 - self.demand.disk_mb as i64
    }

    /// Geometric mean of free capacity across the three resources; zero
    /// when any dimension is exhausted.
    pub fn normalized_free_capacity(&self) -> f64 {
        let (cpu, memory, disk) = (self.free_cpu(), self.free_memory(), self.free_disk());
        if cpu <= 0 || memory <= 0 || disk <= 0 {
            return 0.0;
        }
        ((cpu as f64) * (memory as f64) * (disk as f64)).cbrt()
    }

    /// Holds a local layer instance with this digest?
    pub fn has_layer(&self, layers: &BTreeMap<LayerId, ContainerLayer>, digest: &str) -> bool {
        self.container_layers
            .iter()
            .any(|id| layers.get(id).is_some_and(|layer| layer.digest == digest))
    }
}

// ============================================================================
// Services, migrations, applications
// ============================================================================

/// One tracked relocation attempt of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub origin: Option<ServerId>,
    pub target: ServerId,
    pub status: MigrationStatus,
    pub reason: MigrationReason,
    pub start: i64,
    pub end: Option<i64>,
    pub waiting_time: i64,
    pub pulling_layers_time: i64,
    pub migrating_service_state_time: i64,
    pub interrupted_time: i64,
    pub interruption_reason: Option<MigrationReason>,
    /// Flow carrying the service state, once the transfer phase starts.
    pub state_flow: Option<FlowId>,
    pub state_transfer_complete: bool,
}

impl Migration {
    pub fn open(
        origin: Option<ServerId>,
        target: ServerId,
        reason: MigrationReason,
        start: i64,
    ) -> Self {
        Self {
            origin,
            target,
            status: MigrationStatus::Waiting,
            reason,
            start,
            end: None,
            waiting_time: 0,
            pulling_layers_time: 0,
            migrating_service_state_time: 0,
            interrupted_time: 0,
            interruption_reason: None,
            state_flow: None,
            state_transfer_complete: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Recovery migrations skip the state-transfer phase.
    pub fn is_recovery(&self) -> bool {
        self.reason == MigrationReason::ServerFailed
    }
}

/// A containerised service, hosted by at most one server at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub image_digest: String,
    pub cpu_demand: u32,
    pub memory_demand: u32,
    pub state_bytes: u64,
    pub available: bool,
    pub being_provisioned: bool,
    pub server: Option<ServerId>,
    pub application: AppId,
    pub migrations: Vec<Migration>,
}

impl Service {
    /// The single open migration, if any.
    pub fn open_migration(&self) -> Option<&Migration> {
        self.migrations.last().filter(|m| m.is_open())
    }

    pub fn open_migration_mut(&mut self) -> Option<&mut Migration> {
        self.migrations.last_mut().filter(|m| m.is_open())
    }

    /// Geometric mean of cpu and memory demand.
    pub fn normalized_demand(&self) -> f64 {
        (f64::from(self.cpu_demand) * f64::from(self.memory_demand)).sqrt()
    }
}

/// An application: an ordered set of services accessed by users. Available
/// only when every service is available.
#[derive(Debug, Clone, PartialEq)]
pub struct Application {
    pub id: AppId,
    pub services: Vec<ServiceId>,
    pub users: Vec<UserId>,
    pub availability_history: Vec<bool>,
    /// Per-step "user wanted the app and it was down" flags.
    pub downtime_history: Vec<bool>,
}

// ============================================================================
// Users
// ============================================================================

/// How a user moves when its coordinate trace runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobilityModel {
    /// Stays wherever the trace left it.
    Static,
}

/// A mobile user with latency-bounded applications.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub coordinates: (f64, f64),
    pub coordinates_trace: Vec<(f64, f64)>,
    pub mobility_model: MobilityModel,
    pub base_station: BaseStationId,
    pub applications: Vec<AppId>,
    /// Measured delay per application; `None` until a path exists.
    pub delays: BTreeMap<AppId, Option<f64>>,
    pub delay_slas: BTreeMap<AppId, f64>,
    pub maximum_downtime_allowed: BTreeMap<AppId, i64>,
    /// Ordered switch paths from the user's base station along the
    /// application's service chain.
    pub communication_paths: BTreeMap<AppId, Vec<Vec<SwitchId>>>,
    /// Per-step request flags, keyed by step.
    pub making_requests: BTreeMap<AppId, BTreeMap<i64, bool>>,
    pub access_patterns: BTreeMap<AppId, CircularAccessPattern>,
    /// Per-step perceived downtime (only steps where a request was made).
    pub perceived_downtime: BTreeMap<AppId, BTreeMap<i64, bool>>,
}

impl User {
    pub fn is_making_request(&self, app: AppId, step: i64) -> bool {
        self.making_requests
            .get(&app)
            .and_then(|by_step| by_step.get(&step))
            .copied()
            .unwrap_or(false)
    }
}
