//! Same seed, same scenario, same metrics record.

mod common;

use common::{compute_spec, registry_host_spec};
use trustedge_sim::failure::{Bounds, FailureCharacteristics, Interval};
use trustedge_sim::{
    FeatureFlags, MetricsRecord, Policy, RunParameters, Simulation, TrustEdgeKnobs, World,
    WorldBuilder,
};
use trustedge_types::Step;

/// A two-cell world with one stochastically failing server.
fn stochastic_world() -> World {
    let mut builder = WorldBuilder::new();
    let sw_a = builder.switch((0.0, 0.0));
    let sw_b = builder.switch((10.0, 0.0));
    builder.link(sw_a, sw_b, 1_000.0, 10.0);

    let station_a = builder.base_station((0.0, 0.0), sw_a, 0.0);
    let station_b = builder.base_station((10.0, 0.0), sw_b, 0.0);

    let flaky = builder.server(station_a, compute_spec(8, 8, 100_000));
    builder.failure_model(
        flaky,
        Step::new(5),
        FailureCharacteristics::BoundedUniform {
            number_of_failures: Bounds {
                lower_bound: 1,
                upper_bound: 3,
            },
            failure_duration: Interval::Bounded(Bounds {
                lower_bound: 3,
                upper_bound: 8,
            }),
            interval_between_failures: Interval::Bounded(Bounds {
                lower_bound: 5,
                upper_bound: 15,
            }),
            interval_between_sets: Interval::Bounded(Bounds {
                lower_bound: 10,
                upper_bound: 30,
            }),
        },
    );
    let steady = builder.server(station_b, compute_spec(8, 8, 100_000));
    builder.failure_model(
        steady,
        Step::new(40),
        FailureCharacteristics::WeibullLognormal {
            weibull_shape: 1.5,
            weibull_scale: 60.0,
            lognormal_shape: 0.8,
            lognormal_scale: 10.0,
            interval_between_sets: Interval::Bounded(Bounds {
                lower_bound: 20,
                upper_bound: 40,
            }),
        },
    );

    let registry_host = builder.server(station_a, registry_host_spec());
    builder.registry(registry_host);
    builder.image_on(
        registry_host,
        "inference",
        "sha-img-1",
        &[("sha-l1", 60), ("sha-l2", 40)],
    );

    let user = builder.user((0.0, 0.0), station_a);
    let app = builder.application(user);
    builder.service(app, "sha-img-1", 2, 2, 500);
    builder.access(user, app, vec![20, 40], vec![15, 25], 1, 25.0, 50);

    builder.build()
}

fn run_once(seed: u64) -> MetricsRecord {
    let flags = FeatureFlags {
        failure_prediction: true,
        live_migration: true,
        ..FeatureFlags::default()
    };
    let mut sim = Simulation::new(
        stochastic_world(),
        Policy::TrustEdge(TrustEdgeKnobs::default()),
        flags,
        seed,
    );
    sim.run(120).unwrap();
    let parameters = RunParameters {
        seed,
        algorithm: "trustedge_v3".to_string(),
        time_steps: 120,
        dataset: "fixture".to_string(),
        flags,
        knobs: TrustEdgeKnobs::default(),
    };
    sim.finalize_metrics(&parameters, 0.0)
}

#[test]
fn identical_seeds_produce_identical_records() {
    let first = run_once(42);
    let second = run_once(42);
    assert_eq!(first, second);
}

#[test]
fn identical_seeds_produce_identical_worlds() {
    let mut a = Simulation::new(
        stochastic_world(),
        Policy::TrustEdge(TrustEdgeKnobs::default()),
        FeatureFlags::default(),
        7,
    );
    let mut b = Simulation::new(
        stochastic_world(),
        Policy::TrustEdge(TrustEdgeKnobs::default()),
        FeatureFlags::default(),
        7,
    );
    a.run(80).unwrap();
    b.run(80).unwrap();

    assert_eq!(a.world.servers, b.world.servers);
    assert_eq!(a.world.services, b.world.services);
    assert_eq!(a.world.failure_models, b.world.failure_models);
    assert_eq!(a.world.flows, b.world.flows);
    assert_eq!(a.world.users, b.world.users);
    assert_eq!(a.world.applications, b.world.applications);
}
