//! Serialising the world at any tick and reloading yields an identical
//! world.

mod common;

use common::{compute_spec, registry_host_spec};
use trustedge_sim::{
    world_from_document, world_to_document, FeatureFlags, Policy, Simulation, TrustEdgeKnobs,
    World, WorldBuilder,
};

fn fixture_world() -> World {
    let mut builder = WorldBuilder::new();
    let sw_a = builder.switch((0.0, 0.0));
    let sw_b = builder.switch((10.0, 0.0));
    builder.link_with_transmission_delay(sw_a, sw_b, 80.0, 10.0, 0.05);

    let station_a = builder.base_station((0.0, 0.0), sw_a, 2.0);
    let station_b = builder.base_station((10.0, 0.0), sw_b, 2.0);

    builder.server(station_a, compute_spec(4, 4, 50_000));
    let registry_host = builder.server(station_b, registry_host_spec());
    builder.registry(registry_host);
    builder.image_on(
        registry_host,
        "inference",
        "sha-img-1",
        &[("sha-l1", 100), ("sha-l2", 20)],
    );

    let user = builder.user((0.0, 0.0), station_a);
    let app = builder.application(user);
    builder.service(app, "sha-img-1", 1, 1, 2_000);
    builder.access(user, app, vec![40], vec![20], 1, 100.0, 50);

    builder.build()
}

#[test]
fn pristine_world_round_trips() {
    let world = fixture_world();
    let doc = world_to_document(&world);
    let reloaded = world_from_document(&doc).unwrap();

    assert_eq!(world.servers, reloaded.servers);
    assert_eq!(world.services, reloaded.services);
    assert_eq!(world.applications, reloaded.applications);
    assert_eq!(world.users, reloaded.users);
    assert_eq!(world.base_stations, reloaded.base_stations);
    assert_eq!(world.switches, reloaded.switches);
    assert_eq!(world.links, reloaded.links);
    assert_eq!(world.registries, reloaded.registries);
    assert_eq!(world.images, reloaded.images);
    assert_eq!(world.layers, reloaded.layers);
    assert_eq!(world.failure_models, reloaded.failure_models);
    assert_eq!(world.flows, reloaded.flows);
}

/// Mid-run state (queues, flows, migration logs, histories) survives the
/// round trip byte for byte at the document level.
#[test]
fn mid_run_world_round_trips() {
    let mut sim = Simulation::new(
        fixture_world(),
        Policy::TrustEdge(TrustEdgeKnobs::default()),
        FeatureFlags::default(),
        3,
    );
    // Stop mid-download so flows and queues are non-trivial.
    for _ in 0..3 {
        sim.tick().unwrap();
    }
    assert!(
        !sim.world.flows.is_empty(),
        "fixture should have an in-flight layer download"
    );

    let doc = world_to_document(&sim.world);
    let reloaded = world_from_document(&doc).unwrap();
    let doc_again = world_to_document(&reloaded);
    assert_eq!(doc, doc_again);

    assert_eq!(sim.world.servers, reloaded.servers);
    assert_eq!(sim.world.services, reloaded.services);
    assert_eq!(sim.world.flows, reloaded.flows);
    assert_eq!(sim.world.users, reloaded.users);
    assert_eq!(sim.world.links, reloaded.links);
}

/// A reloaded world continues the run exactly like the original.
#[test]
fn reloaded_world_continues_identically() {
    let policy = || Policy::TrustEdge(TrustEdgeKnobs::default());

    let mut original = Simulation::new(fixture_world(), policy(), FeatureFlags::default(), 9);
    for _ in 0..5 {
        original.tick().unwrap();
    }

    let reloaded_world = world_from_document(&world_to_document(&original.world)).unwrap();
    let mut resumed = Simulation::new(reloaded_world, policy(), FeatureFlags::default(), 9);
    resumed.current_step = original.current_step;
    // Keep both RNG streams aligned: the fixture consumes no randomness,
    // so fresh seeds match.

    for _ in 0..10 {
        original.tick().unwrap();
        resumed.tick().unwrap();
    }
    assert_eq!(original.world.servers, resumed.world.servers);
    assert_eq!(original.world.services, resumed.world.services);
    assert_eq!(original.world.flows, resumed.world.flows);
}
