//! The owning entity store.
//!
//! One [`World`] holds every entity registry, the topology, and the id
//! allocators. Stores are `BTreeMap`s so all per-component iteration is in
//! ascending id order, as the scheduler contract requires. Accessors panic
//! with a descriptive message on unknown ids: a dangling id inside the
//! simulator is a programmer-detected invariant breach, and the run aborts.

use std::collections::BTreeMap;

use trustedge_types::{
    AppId, BaseStationId, FailureModelId, FlowId, ImageId, LayerId, LinkId, RegistryId, ServerId,
    ServiceId, SwitchId, UserId,
};

use crate::entities::{
    Application, BaseStation, ContainerImage, ContainerLayer, ContainerRegistry, NetworkLink,
    NetworkSwitch, Server, Service, User,
};
use crate::failure::FailureModel;
use crate::flow::Flow;
use crate::topology::Topology;

/// The complete simulated world.
#[derive(Debug, Clone, Default)]
pub struct World {
    pub base_stations: BTreeMap<BaseStationId, BaseStation>,
    pub switches: BTreeMap<SwitchId, NetworkSwitch>,
    pub links: BTreeMap<LinkId, NetworkLink>,
    pub servers: BTreeMap<ServerId, Server>,
    pub services: BTreeMap<ServiceId, Service>,
    pub applications: BTreeMap<AppId, Application>,
    pub users: BTreeMap<UserId, User>,
    pub registries: BTreeMap<RegistryId, ContainerRegistry>,
    pub images: BTreeMap<ImageId, ContainerImage>,
    pub layers: BTreeMap<LayerId, ContainerLayer>,
    pub failure_models: BTreeMap<FailureModelId, FailureModel>,
    pub flows: BTreeMap<FlowId, Flow>,
    pub topology: Topology,
    next_flow_id: u32,
    next_layer_id: u32,
    next_image_id: u32,
}

macro_rules! accessors {
    ($get:ident, $get_mut:ident, $store:ident, $id:ty, $entity:ty, $label:literal) => {
        pub fn $get(&self, id: $id) -> &$entity {
            self.$store
                .get(&id)
                .unwrap_or_else(|| panic!(concat!("unknown ", $label, " id: {}"), id))
        }

        pub fn $get_mut(&mut self, id: $id) -> &mut $entity {
            self.$store
                .get_mut(&id)
                .unwrap_or_else(|| panic!(concat!("unknown ", $label, " id: {}"), id))
        }
    };
}

impl World {
    accessors!(server, server_mut, servers, ServerId, Server, "server");
    accessors!(service, service_mut, services, ServiceId, Service, "service");
    accessors!(
        application,
        application_mut,
        applications,
        AppId,
        Application,
        "application"
    );
    accessors!(user, user_mut, users, UserId, User, "user");
    accessors!(
        base_station,
        base_station_mut,
        base_stations,
        BaseStationId,
        BaseStation,
        "base station"
    );
    accessors!(link, link_mut, links, LinkId, NetworkLink, "network link");
    accessors!(
        registry,
        registry_mut,
        registries,
        RegistryId,
        ContainerRegistry,
        "container registry"
    );
    accessors!(image, image_mut, images, ImageId, ContainerImage, "container image");
    accessors!(layer, layer_mut, layers, LayerId, ContainerLayer, "container layer");
    accessors!(
        failure_model,
        failure_model_mut,
        failure_models,
        FailureModelId,
        FailureModel,
        "failure model"
    );
    accessors!(flow, flow_mut, flows, FlowId, Flow, "network flow");

    // ------------------------------------------------------------------
    // Id allocation
    // ------------------------------------------------------------------

    /// Seeds the id allocators past every id currently in use. Called
    /// once after scenario load.
    pub fn seed_id_allocators(&mut self) {
        self.next_flow_id = next_after(self.flows.keys().map(|id| id.get()));
        self.next_layer_id = next_after(self.layers.keys().map(|id| id.get()));
        self.next_image_id = next_after(self.images.keys().map(|id| id.get()));
    }

    pub fn allocate_flow_id(&mut self) -> FlowId {
        self.next_flow_id += 1;
        FlowId::new(self.next_flow_id)
    }

    pub fn allocate_layer_id(&mut self) -> LayerId {
        self.next_layer_id += 1;
        LayerId::new(self.next_layer_id)
    }

    pub fn allocate_image_id(&mut self) -> ImageId {
        self.next_image_id += 1;
        ImageId::new(self.next_image_id)
    }

    // ------------------------------------------------------------------
    // Relationship helpers
    // ------------------------------------------------------------------

    /// The switch a server is wired into, through its base station.
    pub fn server_switch(&self, server: ServerId) -> SwitchId {
        self.base_station(self.server(server).base_station)
            .network_switch
    }

    /// Any image record carrying this digest (template lookup).
    pub fn image_by_digest(&self, digest: &str) -> Option<&ContainerImage> {
        self.images.values().find(|image| image.digest == digest)
    }

    /// A registry is available when its host server is.
    pub fn registry_available(&self, registry: RegistryId) -> bool {
        self.registry(registry)
            .server
            .is_some_and(|server| self.server(server).available)
    }

    /// Layer digests of `image_digest` absent from `server` (neither
    /// present locally nor already being downloaded or queued).
    pub fn uncached_layer_digests(&self, server: ServerId, image_digest: &str) -> Vec<String> {
        let Some(image) = self.image_by_digest(image_digest) else {
            return Vec::new();
        };
        let host = self.server(server);
        image
            .layers_digests
            .iter()
            .filter(|digest| !host.has_layer(&self.layers, digest))
            .filter(|digest| !host.waiting_queue.contains(*digest))
            .filter(|digest| {
                !host.download_queue.iter().any(|flow_id| {
                    self.flow(*flow_id)
                        .layer_digest()
                        .is_some_and(|d| d == digest.as_str())
                })
            })
            .cloned()
            .collect()
    }

    /// Total size in megabytes of the layers of `image_digest` that
    /// `server` does not yet hold locally.
    pub fn uncached_layers_size_mb(&self, server: ServerId, image_digest: &str) -> u64 {
        let Some(image) = self.image_by_digest(image_digest) else {
            return 0;
        };
        let digests: Vec<String> = {
            let host = self.server(server);
            image
                .layers_digests
                .iter()
                .filter(|digest| !host.has_layer(&self.layers, digest))
                .cloned()
                .collect()
        };
        digests
            .iter()
            .filter_map(|digest| self.template_layer_size(digest))
            .sum()
    }

    /// Count of `image_digest` layers absent from `server`.
    pub fn uncached_layer_count(&self, server: ServerId, image_digest: &str) -> usize {
        let Some(image) = self.image_by_digest(image_digest) else {
            return 0;
        };
        let host = self.server(server);
        image
            .layers_digests
            .iter()
            .filter(|digest| !host.has_layer(&self.layers, digest))
            .count()
    }

    /// Size of any layer instance carrying this digest.
    pub fn template_layer_size(&self, digest: &str) -> Option<u64> {
        self.layers
            .values()
            .find(|layer| layer.digest == digest)
            .map(|layer| layer.size_mb)
    }

    /// A service is effectively available only when its flag is set and
    /// its host is up.
    pub fn service_effectively_available(&self, service: ServiceId) -> bool {
        let service = self.service(service);
        service.available
            && service
                .server
                .is_some_and(|server| self.server(server).available)
    }

    /// An application is available when every one of its services is.
    pub fn application_available(&self, app: AppId) -> bool {
        self.application(app)
            .services
            .iter()
            .all(|service| self.service_effectively_available(*service))
    }

    /// Admission check: can `server` host `service` plus the layers it
    /// would still need to pull?
    pub fn has_capacity_to_host(&self, server: ServerId, service: ServiceId) -> bool {
        let host = self.server(server);
        let service = self.service(service);
        let extra_disk = self.uncached_layers_size_mb(host.id, &service.image_digest);
        host.free_cpu() >= i64::from(service.cpu_demand)
            && host.free_memory() >= i64::from(service.memory_demand)
            && host.free_disk() >= extra_disk as i64
    }
}

fn next_after(ids: impl Iterator<Item = u32>) -> u32 {
    ids.max().unwrap_or(0)
}
