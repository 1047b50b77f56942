//! Programmatic world construction.
//!
//! Used by integration tests and tools that assemble scenarios without a
//! JSON document. Ids are handed out sequentially per entity kind.

use trustedge_types::{
    AppId, BaseStationId, Capacity, Demand, FailureModelId, ImageId, LayerId, LinkId, RegistryId,
    ServerId, ServerStatus, ServiceId, SwitchId, Step, UserId,
};

use crate::access::CircularAccessPattern;
use crate::entities::{
    Application, BaseStation, ContainerImage, ContainerLayer, ContainerRegistry, MobilityModel,
    NetworkLink, NetworkSwitch, PowerParameters, Server, Service, User,
};
use crate::failure::{Bounds, FailureCharacteristics, FailureModel, Interval};
use crate::world::World;

/// Shape of an edge server being added.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub model_name: String,
    pub cpu: u32,
    pub memory: u32,
    pub disk: u64,
    pub time_to_boot: i64,
    pub max_concurrent_layer_downloads: usize,
    pub power: PowerParameters,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            model_name: "generic".to_string(),
            cpu: 8,
            memory: 8,
            disk: 131_072,
            time_to_boot: 2,
            max_concurrent_layer_downloads: 3,
            power: PowerParameters {
                static_fraction: 0.2,
                max_watts: 250.0,
            },
        }
    }
}

/// Incrementally assembles a [`World`].
#[derive(Debug, Default)]
pub struct WorldBuilder {
    world: World,
    next: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    switch: u32,
    link: u32,
    station: u32,
    server: u32,
    registry: u32,
    image: u32,
    layer: u32,
    service: u32,
    app: u32,
    user: u32,
    failure_model: u32,
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn switch(&mut self, coordinates: (f64, f64)) -> SwitchId {
        self.next.switch += 1;
        let id = SwitchId::new(self.next.switch);
        self.world
            .switches
            .insert(id, NetworkSwitch { id, coordinates });
        self.world.topology.add_switch(id);
        id
    }

    pub fn link(&mut self, a: SwitchId, b: SwitchId, bandwidth_mbps: f64, delay_ms: f64) -> LinkId {
        self.link_with_transmission_delay(a, b, bandwidth_mbps, delay_ms, 0.0)
    }

    pub fn link_with_transmission_delay(
        &mut self,
        a: SwitchId,
        b: SwitchId,
        bandwidth_mbps: f64,
        delay_ms: f64,
        transmission_delay_s: f64,
    ) -> LinkId {
        self.next.link += 1;
        let id = LinkId::new(self.next.link);
        self.world.links.insert(
            id,
            NetworkLink {
                id,
                endpoints: (a, b),
                bandwidth_mbps,
                delay_ms,
                transmission_delay_s,
                active_flows: Default::default(),
            },
        );
        self.world.topology.add_link(id, a, b, delay_ms);
        id
    }

    pub fn base_station(
        &mut self,
        coordinates: (f64, f64),
        network_switch: SwitchId,
        wireless_delay_ms: f64,
    ) -> BaseStationId {
        self.next.station += 1;
        let id = BaseStationId::new(self.next.station);
        self.world.base_stations.insert(
            id,
            BaseStation {
                id,
                coordinates,
                network_switch,
                wireless_delay_ms,
                edge_servers: Vec::new(),
            },
        );
        id
    }

    /// Adds a server with a never-failing default failure model; override
    /// with [`WorldBuilder::failure_model`].
    pub fn server(&mut self, base_station: BaseStationId, spec: ServerSpec) -> ServerId {
        self.next.server += 1;
        let id = ServerId::new(self.next.server);

        self.next.failure_model += 1;
        let model_id = FailureModelId::new(self.next.failure_model);
        self.world.failure_models.insert(
            model_id,
            FailureModel::new(
                model_id,
                Some(id),
                Step::INFINITY,
                FailureCharacteristics::BoundedUniform {
                    number_of_failures: Bounds {
                        lower_bound: 0,
                        upper_bound: 0,
                    },
                    failure_duration: Interval::Infinite,
                    interval_between_failures: Interval::Infinite,
                    interval_between_sets: Interval::Infinite,
                },
            ),
        );

        self.world.servers.insert(
            id,
            Server {
                id,
                model_name: spec.model_name,
                capacity: Capacity {
                    cpu_cores: spec.cpu,
                    memory_gb: spec.memory,
                    disk_mb: spec.disk,
                },
                demand: Demand::default(),
                status: ServerStatus::Available,
                available: true,
                time_to_boot: spec.time_to_boot,
                max_concurrent_layer_downloads: spec.max_concurrent_layer_downloads,
                power: spec.power,
                base_station,
                failure_model: model_id,
                services: Default::default(),
                container_layers: Vec::new(),
                container_images: Vec::new(),
                container_registry: None,
                waiting_queue: Default::default(),
                download_queue: Vec::new(),
                available_history: Vec::new(),
            },
        );
        self.world
            .base_station_mut(base_station)
            .edge_servers
            .push(id);
        id
    }

    /// Replaces a server's failure model characteristics.
    pub fn failure_model(
        &mut self,
        server: ServerId,
        initial_failure_time_step: Step,
        characteristics: FailureCharacteristics,
    ) {
        let model_id = self.world.server(server).failure_model;
        let model = self.world.failure_model_mut(model_id);
        model.initial_failure_time_step = initial_failure_time_step;
        model.characteristics = characteristics;
    }

    pub fn registry(&mut self, server: ServerId) -> RegistryId {
        self.next.registry += 1;
        let id = RegistryId::new(self.next.registry);
        self.world.registries.insert(
            id,
            ContainerRegistry {
                id,
                server: Some(server),
            },
        );
        self.world.server_mut(server).container_registry = Some(id);
        id
    }

    /// Places a template image and its layer instances on a server (the
    /// usual home is a registry host), accounting the disk footprint.
    pub fn image_on(
        &mut self,
        server: ServerId,
        name: &str,
        digest: &str,
        layers: &[(&str, u64)],
    ) -> ImageId {
        let mut layer_digests = Vec::new();
        for (layer_digest, size_mb) in layers {
            self.next.layer += 1;
            let layer_id = LayerId::new(self.next.layer);
            self.world.layers.insert(
                layer_id,
                ContainerLayer {
                    id: layer_id,
                    digest: (*layer_digest).to_string(),
                    size_mb: *size_mb,
                    instruction: format!("ADD {layer_digest}"),
                    server: Some(server),
                },
            );
            let host = self.world.server_mut(server);
            host.container_layers.push(layer_id);
            host.demand.disk_mb += size_mb;
            layer_digests.push((*layer_digest).to_string());
        }

        self.next.image += 1;
        let image_id = ImageId::new(self.next.image);
        self.world.images.insert(
            image_id,
            ContainerImage {
                id: image_id,
                name: name.to_string(),
                tag: "latest".to_string(),
                digest: digest.to_string(),
                architecture: "amd64".to_string(),
                layers_digests: layer_digests,
                server: Some(server),
            },
        );
        self.world
            .server_mut(server)
            .container_images
            .push(image_id);
        image_id
    }

    pub fn user(&mut self, coordinates: (f64, f64), base_station: BaseStationId) -> UserId {
        self.next.user += 1;
        let id = UserId::new(self.next.user);
        self.world.users.insert(
            id,
            User {
                id,
                coordinates,
                coordinates_trace: vec![coordinates],
                mobility_model: MobilityModel::Static,
                base_station,
                applications: Vec::new(),
                delays: Default::default(),
                delay_slas: Default::default(),
                maximum_downtime_allowed: Default::default(),
                communication_paths: Default::default(),
                making_requests: Default::default(),
                access_patterns: Default::default(),
                perceived_downtime: Default::default(),
            },
        );
        id
    }

    pub fn application(&mut self, user: UserId) -> AppId {
        self.next.app += 1;
        let id = AppId::new(self.next.app);
        self.world.applications.insert(
            id,
            Application {
                id,
                services: Vec::new(),
                users: vec![user],
                availability_history: Vec::new(),
                downtime_history: Vec::new(),
            },
        );
        self.world.user_mut(user).applications.push(id);
        id
    }

    pub fn service(
        &mut self,
        app: AppId,
        image_digest: &str,
        cpu_demand: u32,
        memory_demand: u32,
        state_bytes: u64,
    ) -> ServiceId {
        self.next.service += 1;
        let id = ServiceId::new(self.next.service);
        self.world.services.insert(
            id,
            Service {
                id,
                image_digest: image_digest.to_string(),
                cpu_demand,
                memory_demand,
                state_bytes,
                available: false,
                being_provisioned: false,
                server: None,
                application: app,
                migrations: Vec::new(),
            },
        );
        self.world.application_mut(app).services.push(id);
        id
    }

    /// Wires a user's access pattern, SLAs, and step-1 request flag for
    /// an application.
    pub fn access(
        &mut self,
        user: UserId,
        app: AppId,
        duration_values: Vec<i64>,
        interval_values: Vec<i64>,
        first_access_at: i64,
        delay_sla: f64,
        maximum_downtime_allowed: i64,
    ) {
        let pattern = CircularAccessPattern::new(duration_values, interval_values, first_access_at);
        let within_step_one = pattern.is_within_window(1);
        let user = self.world.user_mut(user);
        user.access_patterns.insert(app, pattern);
        user.delay_slas.insert(app, delay_sla);
        user.maximum_downtime_allowed
            .insert(app, maximum_downtime_allowed);
        user.making_requests
            .entry(app)
            .or_default()
            .insert(1, within_step_one);
    }

    /// Pre-places a service on a host outside any migration (initial
    /// scenario state).
    pub fn place_service(&mut self, service: ServiceId, server: ServerId) {
        let (cpu, memory) = {
            let service = self.world.service(service);
            (service.cpu_demand, service.memory_demand)
        };
        let host = self.world.server_mut(server);
        host.demand.cpu_cores += cpu;
        host.demand.memory_gb += memory;
        host.services.insert(service);
        let service = self.world.service_mut(service);
        service.server = Some(server);
        service.available = true;
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn build(mut self) -> World {
        self.world.seed_id_allocators();
        self.world
    }
}
