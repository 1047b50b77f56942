//! World ↔ scenario-document conversion.
//!
//! The document side (parsing, validation, unknown-field preservation)
//! lives in `trustedge-scenario`; this module binds records to the typed
//! stores. Serialising the world at any tick and reloading yields an
//! identical world, including in-flight flows, queues, and migration
//! logs.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use trustedge_scenario::{EntityRecord, EntityRef, ScenarioDocument, ScenarioError};
use trustedge_types::{
    AppId, BaseStationId, Capacity, Demand, FailureModelId, FlowId, ImageId, LayerId, LinkId,
    RegistryId, ServerId, ServiceId, SwitchId, Step, UserId,
};

use crate::access::CircularAccessPattern;
use crate::entities::{
    Application, BaseStation, ContainerImage, ContainerLayer, ContainerRegistry, Migration,
    MobilityModel, NetworkLink, NetworkSwitch, PowerParameters, Server, Service, User,
};
use crate::failure::FailureModel;
use crate::flow::Flow;
use crate::world::World;

// ============================================================================
// Loading
// ============================================================================

/// Builds a world from a validated scenario document.
pub fn world_from_document(doc: &ScenarioDocument) -> Result<World, ScenarioError> {
    doc.validate()?;
    let mut world = World::default();

    for record in doc.records("NetworkSwitch") {
        let kind = "NetworkSwitch";
        let id = SwitchId::new(record.id(kind)? as u32);
        world.switches.insert(
            id,
            NetworkSwitch {
                id,
                coordinates: coordinates(record, kind)?,
            },
        );
        world.topology.add_switch(id);
    }

    for record in doc.records("NetworkLink") {
        let kind = "NetworkLink";
        let id = LinkId::new(record.id(kind)? as u32);
        let nodes = record.rel_list(kind, "nodes")?;
        if nodes.len() != 2 {
            return Err(ScenarioError::InvalidField {
                kind: kind.to_string(),
                id: record.id(kind)?,
                field: "nodes".to_string(),
                expected: "exactly two NetworkSwitch references",
            });
        }
        let endpoints = (
            SwitchId::new(nodes[0].id as u32),
            SwitchId::new(nodes[1].id as u32),
        );
        let delay_ms = record.attr_f64(kind, "delay")?;
        world.links.insert(
            id,
            NetworkLink {
                id,
                endpoints,
                bandwidth_mbps: record.attr_f64(kind, "bandwidth")?,
                delay_ms,
                transmission_delay_s: record
                    .attr("transmission_delay")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                active_flows: Default::default(),
            },
        );
        world
            .topology
            .add_link(id, endpoints.0, endpoints.1, delay_ms);
    }

    for record in doc.records("BaseStation") {
        let kind = "BaseStation";
        let id = BaseStationId::new(record.id(kind)? as u32);
        world.base_stations.insert(
            id,
            BaseStation {
                id,
                coordinates: coordinates(record, kind)?,
                network_switch: SwitchId::new(
                    record.rel_required(kind, "network_switch")?.id as u32,
                ),
                wireless_delay_ms: record
                    .attr("wireless_delay")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                edge_servers: ids(record.rel_list(kind, "edge_servers")?, ServerId::new),
            },
        );
    }

    for record in doc.records("ContainerLayer") {
        let kind = "ContainerLayer";
        let id = LayerId::new(record.id(kind)? as u32);
        world.layers.insert(
            id,
            ContainerLayer {
                id,
                digest: record.attr_str(kind, "digest")?.to_string(),
                size_mb: record.attr_u64(kind, "size")?,
                instruction: record
                    .attr("instruction")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                server: opt_id(record.rel(kind, "server")?, ServerId::new),
            },
        );
    }

    for record in doc.records("ContainerImage") {
        let kind = "ContainerImage";
        let id = ImageId::new(record.id(kind)? as u32);
        world.images.insert(
            id,
            ContainerImage {
                id,
                name: record.attr_str(kind, "name")?.to_string(),
                tag: record
                    .attr("tag")
                    .and_then(Value::as_str)
                    .unwrap_or("latest")
                    .to_string(),
                digest: record.attr_str(kind, "digest")?.to_string(),
                architecture: record
                    .attr("architecture")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                layers_digests: attr_typed(record, kind, "layers_digests")?,
                server: opt_id(record.rel(kind, "server")?, ServerId::new),
            },
        );
    }

    for record in doc.records("ContainerRegistry") {
        let kind = "ContainerRegistry";
        let id = RegistryId::new(record.id(kind)? as u32);
        world.registries.insert(
            id,
            ContainerRegistry {
                id,
                server: opt_id(record.rel(kind, "server")?, ServerId::new),
            },
        );
    }

    for record in doc.records("FailureModel") {
        let kind = "FailureModel";
        let id = FailureModelId::new(record.id(kind)? as u32);
        let mut model = FailureModel::new(
            id,
            opt_id(record.rel(kind, "device")?, ServerId::new),
            Step::new(record.attr_i64(kind, "initial_failure_time_step")?),
            attr_typed(record, kind, "failure_characteristics")?,
        );
        model.failure_history = attr_typed_or_default(record, kind, "failure_history")?;
        model.failure_trace = attr_typed_or_default(record, kind, "failure_trace")?;
        world.failure_models.insert(id, model);
    }

    for record in doc.records("EdgeServer") {
        let kind = "EdgeServer";
        let id = ServerId::new(record.id(kind)? as u32);
        world.servers.insert(
            id,
            Server {
                id,
                model_name: record
                    .attr("model_name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                capacity: Capacity {
                    cpu_cores: record.attr_u64(kind, "cpu")? as u32,
                    memory_gb: record.attr_u64(kind, "memory")? as u32,
                    disk_mb: record.attr_u64(kind, "disk")?,
                },
                demand: Demand {
                    cpu_cores: record.attr("cpu_demand").and_then(Value::as_u64).unwrap_or(0)
                        as u32,
                    memory_gb: record
                        .attr("memory_demand")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                    disk_mb: record
                        .attr("disk_demand")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                },
                status: attr_typed_or(record, kind, "status", || {
                    trustedge_types::ServerStatus::Available
                })?,
                available: record.attr("available").and_then(Value::as_bool).unwrap_or(true),
                time_to_boot: record
                    .attr("time_to_boot")
                    .and_then(Value::as_i64)
                    .unwrap_or(1),
                max_concurrent_layer_downloads: record
                    .attr("max_concurrent_layer_downloads")
                    .and_then(Value::as_u64)
                    .unwrap_or(3) as usize,
                power: attr_typed_or(record, kind, "power_model_parameters", || {
                    PowerParameters {
                        static_fraction: 0.0,
                        max_watts: 0.0,
                    }
                })?,
                base_station: BaseStationId::new(
                    record.rel_required(kind, "base_station")?.id as u32,
                ),
                failure_model: FailureModelId::new(
                    record.rel_required(kind, "failure_model")?.id as u32,
                ),
                services: ids(record.rel_list(kind, "services")?, ServiceId::new)
                    .into_iter()
                    .collect(),
                container_layers: ids(record.rel_list(kind, "container_layers")?, LayerId::new),
                container_images: ids(record.rel_list(kind, "container_images")?, ImageId::new),
                container_registry: opt_id(
                    record.rel(kind, "container_registry")?,
                    RegistryId::new,
                ),
                waiting_queue: attr_typed_or_default::<Vec<String>>(
                    record,
                    kind,
                    "waiting_queue",
                )?
                .into(),
                download_queue: ids(record.rel_list(kind, "download_queue")?, FlowId::new),
                available_history: attr_typed_or_default(record, kind, "available_history")?,
            },
        );
    }

    for record in doc.records("Service") {
        let kind = "Service";
        let id = ServiceId::new(record.id(kind)? as u32);
        world.services.insert(
            id,
            Service {
                id,
                image_digest: record.attr_str(kind, "image_digest")?.to_string(),
                cpu_demand: record.attr_u64(kind, "cpu_demand")? as u32,
                memory_demand: record.attr_u64(kind, "memory_demand")? as u32,
                state_bytes: record.attr("state").and_then(Value::as_u64).unwrap_or(0),
                available: record
                    .attr("available")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                being_provisioned: record
                    .attr("being_provisioned")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                server: opt_id(record.rel(kind, "server")?, ServerId::new),
                application: AppId::new(record.rel_required(kind, "application")?.id as u32),
                migrations: attr_typed_or_default::<Vec<Migration>>(record, kind, "migrations")?,
            },
        );
    }

    for record in doc.records("Application") {
        let kind = "Application";
        let id = AppId::new(record.id(kind)? as u32);
        world.applications.insert(
            id,
            Application {
                id,
                services: ids(record.rel_list(kind, "services")?, ServiceId::new),
                users: ids(record.rel_list(kind, "users")?, UserId::new),
                availability_history: attr_typed_or_default(record, kind, "availability_history")?,
                downtime_history: attr_typed_or_default(record, kind, "downtime_history")?,
            },
        );
    }

    for record in doc.records("User") {
        let kind = "User";
        let id = UserId::new(record.id(kind)? as u32);
        let mut user = User {
            id,
            coordinates: coordinates(record, kind)?,
            coordinates_trace: attr_typed_or_default(record, kind, "coordinates_trace")?,
            mobility_model: attr_typed_or(record, kind, "mobility_model", || {
                MobilityModel::Static
            })?,
            base_station: BaseStationId::new(record.rel_required(kind, "base_station")?.id as u32),
            applications: ids(record.rel_list(kind, "applications")?, AppId::new),
            delays: app_map(record, kind, "delays")?,
            delay_slas: app_map(record, kind, "delay_slas")?,
            maximum_downtime_allowed: app_map(record, kind, "maximum_downtime_allowed")?,
            communication_paths: app_map(record, kind, "communication_paths")?,
            making_requests: app_map(record, kind, "making_requests")?,
            access_patterns: app_map(record, kind, "access_patterns")?,
            perceived_downtime: app_map(record, kind, "perceived_downtime")?,
        };
        if user.coordinates_trace.is_empty() {
            user.coordinates_trace.push(user.coordinates);
        }
        // Fresh scenarios carry no request bookkeeping yet: derive step 1
        // from the first access window.
        for app_id in user.applications.clone() {
            let within = user
                .access_patterns
                .get(&app_id)
                .is_some_and(|pattern| pattern.is_within_window(1));
            user.making_requests
                .entry(app_id)
                .or_default()
                .entry(1)
                .or_insert(within);
        }
        world.users.insert(id, user);
    }

    for record in doc.records("NetworkFlow") {
        let kind = "NetworkFlow";
        let id = FlowId::new(record.id(kind)? as u32);
        let path: Vec<SwitchId> = attr_typed_or_default::<Vec<u32>>(record, kind, "path")?
            .into_iter()
            .map(SwitchId::new)
            .collect();
        let links = world.topology.path_links(&path);
        for link in &links {
            world.link_mut(*link).active_flows.insert(id);
        }
        world.flows.insert(
            id,
            Flow {
                id,
                source: ServerId::new(record.rel_required(kind, "source")?.id as u32),
                target: ServerId::new(record.rel_required(kind, "target")?.id as u32),
                path,
                links,
                created_at: record.attr_i64(kind, "created_at")?,
                data_to_transfer_bytes: record.attr_f64(kind, "data_to_transfer")?,
                bandwidth_share_mbps: record
                    .attr("bandwidth_share")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                status: attr_typed_or(record, kind, "status", || {
                    trustedge_types::FlowStatus::Active
                })?,
                kind: attr_typed(record, kind, "metadata")?,
            },
        );
    }

    world.seed_id_allocators();
    Ok(world)
}

// ============================================================================
// Saving
// ============================================================================

/// Serialises the world back into the scenario document shape.
pub fn world_to_document(world: &World) -> ScenarioDocument {
    let mut doc = ScenarioDocument::default();

    doc.entities.insert(
        "NetworkSwitch".to_string(),
        world
            .switches
            .values()
            .map(|switch| {
                record(
                    json!({"id": switch.id, "coordinates": [switch.coordinates.0, switch.coordinates.1]}),
                    Map::new(),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "NetworkLink".to_string(),
        world
            .links
            .values()
            .map(|link| {
                record(
                    json!({
                        "id": link.id,
                        "bandwidth": link.bandwidth_mbps,
                        "delay": link.delay_ms,
                        "transmission_delay": link.transmission_delay_s,
                    }),
                    rels([(
                        "nodes",
                        json!([
                            reference("NetworkSwitch", link.endpoints.0.get()),
                            reference("NetworkSwitch", link.endpoints.1.get()),
                        ]),
                    )]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "BaseStation".to_string(),
        world
            .base_stations
            .values()
            .map(|station| {
                record(
                    json!({
                        "id": station.id,
                        "coordinates": [station.coordinates.0, station.coordinates.1],
                        "wireless_delay": station.wireless_delay_ms,
                    }),
                    rels([
                        (
                            "network_switch",
                            reference("NetworkSwitch", station.network_switch.get()),
                        ),
                        (
                            "edge_servers",
                            references("EdgeServer", station.edge_servers.iter().map(|id| id.get())),
                        ),
                    ]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "ContainerLayer".to_string(),
        world
            .layers
            .values()
            .map(|layer| {
                record(
                    json!({
                        "id": layer.id,
                        "digest": layer.digest,
                        "size": layer.size_mb,
                        "instruction": layer.instruction,
                    }),
                    rels([(
                        "server",
                        opt_reference("EdgeServer", layer.server.map(|id| id.get())),
                    )]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "ContainerImage".to_string(),
        world
            .images
            .values()
            .map(|image| {
                record(
                    json!({
                        "id": image.id,
                        "name": image.name,
                        "tag": image.tag,
                        "digest": image.digest,
                        "architecture": image.architecture,
                        "layers_digests": image.layers_digests,
                    }),
                    rels([(
                        "server",
                        opt_reference("EdgeServer", image.server.map(|id| id.get())),
                    )]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "ContainerRegistry".to_string(),
        world
            .registries
            .values()
            .map(|registry| {
                record(
                    json!({"id": registry.id}),
                    rels([(
                        "server",
                        opt_reference("EdgeServer", registry.server.map(|id| id.get())),
                    )]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "FailureModel".to_string(),
        world
            .failure_models
            .values()
            .map(|model| {
                record(
                    json!({
                        "id": model.id,
                        "initial_failure_time_step": model.initial_failure_time_step,
                        "failure_characteristics": model.characteristics,
                        "failure_history": model.failure_history,
                        "failure_trace": model.failure_trace,
                    }),
                    rels([(
                        "device",
                        opt_reference("EdgeServer", model.device.map(|id| id.get())),
                    )]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "EdgeServer".to_string(),
        world
            .servers
            .values()
            .map(|server| {
                record(
                    json!({
                        "id": server.id,
                        "model_name": server.model_name,
                        "cpu": server.capacity.cpu_cores,
                        "memory": server.capacity.memory_gb,
                        "disk": server.capacity.disk_mb,
                        "cpu_demand": server.demand.cpu_cores,
                        "memory_demand": server.demand.memory_gb,
                        "disk_demand": server.demand.disk_mb,
                        "status": server.status,
                        "available": server.available,
                        "time_to_boot": server.time_to_boot,
                        "max_concurrent_layer_downloads": server.max_concurrent_layer_downloads,
                        "power_model_parameters": server.power,
                        "waiting_queue": server.waiting_queue,
                        "available_history": server.available_history,
                    }),
                    rels([
                        (
                            "base_station",
                            reference("BaseStation", server.base_station.get()),
                        ),
                        (
                            "failure_model",
                            reference("FailureModel", server.failure_model.get()),
                        ),
                        (
                            "services",
                            references("Service", server.services.iter().map(|id| id.get())),
                        ),
                        (
                            "container_layers",
                            references(
                                "ContainerLayer",
                                server.container_layers.iter().map(|id| id.get()),
                            ),
                        ),
                        (
                            "container_images",
                            references(
                                "ContainerImage",
                                server.container_images.iter().map(|id| id.get()),
                            ),
                        ),
                        (
                            "container_registry",
                            opt_reference(
                                "ContainerRegistry",
                                server.container_registry.map(|id| id.get()),
                            ),
                        ),
                        (
                            "download_queue",
                            references(
                                "NetworkFlow",
                                server.download_queue.iter().map(|id| id.get()),
                            ),
                        ),
                    ]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "Service".to_string(),
        world
            .services
            .values()
            .map(|service| {
                record(
                    json!({
                        "id": service.id,
                        "image_digest": service.image_digest,
                        "cpu_demand": service.cpu_demand,
                        "memory_demand": service.memory_demand,
                        "state": service.state_bytes,
                        "available": service.available,
                        "being_provisioned": service.being_provisioned,
                        "migrations": service.migrations,
                    }),
                    rels([
                        (
                            "server",
                            opt_reference("EdgeServer", service.server.map(|id| id.get())),
                        ),
                        (
                            "application",
                            reference("Application", service.application.get()),
                        ),
                    ]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "Application".to_string(),
        world
            .applications
            .values()
            .map(|app| {
                record(
                    json!({
                        "id": app.id,
                        "availability_history": app.availability_history,
                        "downtime_history": app.downtime_history,
                    }),
                    rels([
                        (
                            "services",
                            references("Service", app.services.iter().map(|id| id.get())),
                        ),
                        (
                            "users",
                            references("User", app.users.iter().map(|id| id.get())),
                        ),
                    ]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "User".to_string(),
        world
            .users
            .values()
            .map(|user| {
                record(
                    json!({
                        "id": user.id,
                        "coordinates": [user.coordinates.0, user.coordinates.1],
                        "coordinates_trace": user.coordinates_trace,
                        "mobility_model": user.mobility_model,
                        "delays": string_keyed(&user.delays),
                        "delay_slas": string_keyed(&user.delay_slas),
                        "maximum_downtime_allowed": string_keyed(&user.maximum_downtime_allowed),
                        "communication_paths": string_keyed(&user.communication_paths),
                        "making_requests": string_keyed(&user.making_requests),
                        "access_patterns": string_keyed(&user.access_patterns),
                        "perceived_downtime": string_keyed(&user.perceived_downtime),
                    }),
                    rels([
                        (
                            "base_station",
                            reference("BaseStation", user.base_station.get()),
                        ),
                        (
                            "applications",
                            references("Application", user.applications.iter().map(|id| id.get())),
                        ),
                    ]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "NetworkFlow".to_string(),
        world
            .flows
            .values()
            .map(|flow| {
                record(
                    json!({
                        "id": flow.id,
                        "created_at": flow.created_at,
                        "data_to_transfer": flow.data_to_transfer_bytes,
                        "bandwidth_share": flow.bandwidth_share_mbps,
                        "status": flow.status,
                        "path": flow.path.iter().map(|id| id.get()).collect::<Vec<_>>(),
                        "metadata": flow.kind,
                    }),
                    rels([
                        ("source", reference("EdgeServer", flow.source.get())),
                        ("target", reference("EdgeServer", flow.target.get())),
                    ]),
                )
            })
            .collect(),
    );

    doc.entities.insert(
        "Topology".to_string(),
        vec![record(json!({"id": 1}), Map::new())],
    );

    doc
}

// ============================================================================
// Record helpers
// ============================================================================

fn record(attributes: Value, relationships: Map<String, Value>) -> EntityRecord {
    let Value::Object(attributes) = attributes else {
        panic!("entity attributes must serialize to a JSON object")
    };
    EntityRecord {
        attributes,
        relationships,
    }
}

fn rels<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn reference(class: &str, id: u32) -> Value {
    json!({"class": class, "id": id})
}

fn opt_reference(class: &str, id: Option<u32>) -> Value {
    id.map_or(Value::Null, |id| reference(class, id))
}

fn references(class: &str, ids: impl Iterator<Item = u32>) -> Value {
    Value::Array(ids.map(|id| reference(class, id)).collect())
}

fn ids<T>(refs: Vec<EntityRef>, make: fn(u32) -> T) -> Vec<T> {
    refs.into_iter().map(|r| make(r.id as u32)).collect()
}

fn opt_id<T>(entity_ref: Option<EntityRef>, make: fn(u32) -> T) -> Option<T> {
    entity_ref.map(|r| make(r.id as u32))
}

fn coordinates(record: &EntityRecord, kind: &str) -> Result<(f64, f64), ScenarioError> {
    let value = record
        .attr("coordinates")
        .ok_or_else(|| ScenarioError::MissingField {
            kind: kind.to_string(),
            id: record.id(kind).unwrap_or(0),
            field: "coordinates".to_string(),
        })?;
    serde_json::from_value(value.clone()).map_err(|_| ScenarioError::InvalidField {
        kind: kind.to_string(),
        id: record.id(kind).unwrap_or(0),
        field: "coordinates".to_string(),
        expected: "[x, y] number pair",
    })
}

fn attr_typed<T: DeserializeOwned>(
    record: &EntityRecord,
    kind: &str,
    field: &str,
) -> Result<T, ScenarioError> {
    let value = record.attr(field).ok_or_else(|| ScenarioError::MissingField {
        kind: kind.to_string(),
        id: record.id(kind).unwrap_or(0),
        field: field.to_string(),
    })?;
    serde_json::from_value(value.clone()).map_err(|_| ScenarioError::InvalidField {
        kind: kind.to_string(),
        id: record.id(kind).unwrap_or(0),
        field: field.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

fn attr_typed_or<T: DeserializeOwned>(
    record: &EntityRecord,
    kind: &str,
    field: &str,
    default: fn() -> T,
) -> Result<T, ScenarioError> {
    match record.attr(field) {
        None | Some(Value::Null) => Ok(default()),
        Some(_) => attr_typed(record, kind, field),
    }
}

fn attr_typed_or_default<T: DeserializeOwned + Default>(
    record: &EntityRecord,
    kind: &str,
    field: &str,
) -> Result<T, ScenarioError> {
    attr_typed_or(record, kind, field, T::default)
}

/// Per-application maps are serialized with stringified app ids as keys.
fn app_map<T: DeserializeOwned>(
    record: &EntityRecord,
    kind: &str,
    field: &str,
) -> Result<BTreeMap<AppId, T>, ScenarioError> {
    let raw: BTreeMap<String, T> = attr_typed_or_default(record, kind, field)?;
    let mut map = BTreeMap::new();
    for (key, value) in raw {
        let id: u32 = key.parse().map_err(|_| ScenarioError::InvalidField {
            kind: kind.to_string(),
            id: record.id(kind).unwrap_or(0),
            field: field.to_string(),
            expected: "map keyed by numeric application id",
        })?;
        map.insert(AppId::new(id), value);
    }
    Ok(map)
}

fn string_keyed<T: Serialize>(map: &BTreeMap<AppId, T>) -> Value {
    let mut out = Map::new();
    for (key, value) in map {
        out.insert(
            key.get().to_string(),
            serde_json::to_value(value).unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}
