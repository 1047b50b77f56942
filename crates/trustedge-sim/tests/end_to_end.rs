//! End-to-end scenarios exercising the full tick loop.

mod common;

use common::{
    compute_spec, failure_record, quiet_characteristics, registry_host_spec, seed_failure_trace,
};
use trustedge_sim::failure::{Bounds, FailureCharacteristics, Interval};
use trustedge_sim::{FeatureFlags, Policy, Simulation, TrustEdgeKnobs, WorldBuilder};
use trustedge_types::{MigrationReason, MigrationStatus};

fn trust_edge() -> Policy {
    Policy::TrustEdge(TrustEdgeKnobs::default())
}

/// Single server, co-located registry, no failures: the service
/// provisions at tick 1 and stays clean for the whole run.
#[test]
fn single_server_no_failure_provision() {
    let mut builder = WorldBuilder::new();
    let sw = builder.switch((0.0, 0.0));
    let station = builder.base_station((0.0, 0.0), sw, 0.0);
    let server = builder.server(station, compute_spec(4, 4, 10_000));
    let registry_host = builder.server(station, registry_host_spec());
    builder.registry(registry_host);
    builder.image_on(registry_host, "inference", "sha-img-1", &[("sha-layer-1", 100)]);

    let user = builder.user((0.0, 0.0), station);
    let app = builder.application(user);
    let service = builder.service(app, "sha-img-1", 1, 1, 0);
    builder.access(user, app, vec![100], vec![200], 1, 1_000.0, 1_000);

    let world = builder.build();
    let mut sim = Simulation::new(world, trust_edge(), FeatureFlags::default(), 1);
    sim.run(50).unwrap();

    let svc = sim.world.service(service);
    assert_eq!(svc.server, Some(server));
    assert!(svc.available);
    assert_eq!(svc.migrations.len(), 1);
    let migration = &svc.migrations[0];
    assert_eq!(migration.start, 1);
    assert_eq!(migration.status, MigrationStatus::Finished);
    assert!(migration.pulling_layers_time > 0);
    assert_eq!(migration.migrating_service_state_time, 0);

    assert_eq!(sim.world.server(server).demand.disk_mb, 100);

    let params = run_parameters(&sim, 50);
    let record = sim.finalize_metrics(&params, 0.0);
    assert_eq!(record.sla.total_delay_sla_violations, 0);
    assert_eq!(record.sla.total_perceived_downtime, 0);
    assert_eq!(record.provisioning_and_migration.total_migrations, 1);
}

/// A forced failure mid-access takes the service down for exactly the
/// unavailability interval and lands in the failure history.
#[test]
fn forced_failure_during_access() {
    let mut builder = WorldBuilder::new();
    let sw = builder.switch((0.0, 0.0));
    let station = builder.base_station((0.0, 0.0), sw, 0.0);
    let server = builder.server(station, compute_spec(4, 4, 10_000));
    let registry_host = builder.server(station, registry_host_spec());
    builder.registry(registry_host);
    builder.image_on(registry_host, "inference", "sha-img-1", &[("sha-layer-1", 100)]);

    let user = builder.user((0.0, 0.0), station);
    let app = builder.application(user);
    let service = builder.service(app, "sha-img-1", 1, 1, 0);
    builder.access(user, app, vec![26], vec![1_000], 5, 1_000.0, 1_000);

    // Fails 10..=19, boots 20..=21, available again at 22.
    seed_failure_trace(
        &mut builder,
        server,
        1,
        vec![vec![failure_record(10, 10, 2)]],
        Vec::new(),
        quiet_characteristics(),
    );

    let world = builder.build();
    let mut sim = Simulation::new(world, trust_edge(), FeatureFlags::default(), 1);

    let mut unavailable_steps = Vec::new();
    for step in 1..=30 {
        sim.tick().unwrap();
        if !sim.world.service(service).available {
            unavailable_steps.push(step);
        }
    }

    // Down for the whole failure interval.
    for step in 10..=21 {
        assert!(unavailable_steps.contains(&step), "step {step} should be down");
    }
    assert!(!unavailable_steps.contains(&9));
    assert!(!unavailable_steps.contains(&22));

    let app_history = &sim.world.application(app).availability_history;
    for step in 10..=21i64 {
        assert!(!app_history[(step - 1) as usize], "app should be down at {step}");
    }
    assert!(app_history[21]); // step 22

    let model = sim.world.failure_model(sim.world.server(server).failure_model);
    assert_eq!(model.failure_history.len(), 1);

    let params = run_parameters(&sim, 30);
    let record = sim.finalize_metrics(&params, 0.0);
    assert_eq!(record.sla.total_perceived_downtime, 12);
    assert!(record.sla.downtime_reasons.contains_key("server_failed"));
    let summary = &record.servers[&format!("server_{server}")];
    assert_eq!(summary.mttr, Some(12.0));
    assert_eq!(summary.total_failures, 1);
}

/// A risky host loses its service proactively to a pristine one, even
/// though the pristine one violates the delay SLA.
#[test]
fn proactive_migration_to_reliable_host() {
    let mut builder = WorldBuilder::new();
    let sw_near = builder.switch((0.0, 0.0));
    let sw_far = builder.switch((10.0, 0.0));
    builder.link(sw_near, sw_far, 1_000.0, 50.0);

    let station_near = builder.base_station((0.0, 0.0), sw_near, 0.0);
    let station_far = builder.base_station((10.0, 0.0), sw_far, 0.0);

    let risky = builder.server(station_near, compute_spec(8, 8, 100_000));
    let pristine = builder.server(station_far, compute_spec(8, 8, 100_000));
    let registry_host = builder.server(station_near, registry_host_spec());
    builder.registry(registry_host);
    builder.image_on(registry_host, "inference", "sha-img-1", &[("sha-layer-1", 100)]);

    let user = builder.user((0.0, 0.0), station_near);
    let app = builder.application(user);
    let service = builder.service(app, "sha-img-1", 1, 1, 0);
    builder.access(user, app, vec![100], vec![200], 1, 30.0, 1_000);

    // Five pre-simulation failures: high failure rate, low projected
    // reliability over the lookahead horizon.
    let history: Vec<_> = (0..5)
        .map(|k| failure_record(-500 + k * 100, 18, 2))
        .collect();
    seed_failure_trace(
        &mut builder,
        risky,
        -500,
        vec![history.clone()],
        history,
        FailureCharacteristics::BoundedUniform {
            number_of_failures: Bounds {
                lower_bound: 1,
                upper_bound: 1,
            },
            failure_duration: Interval::Bounded(Bounds {
                lower_bound: 10,
                upper_bound: 10,
            }),
            interval_between_failures: Interval::Bounded(Bounds {
                lower_bound: 10,
                upper_bound: 10,
            }),
            interval_between_sets: Interval::Bounded(Bounds {
                lower_bound: 10_000,
                upper_bound: 10_000,
            }),
        },
    );
    builder.place_service(service, risky);

    let world = builder.build();
    let flags = FeatureFlags {
        failure_prediction: true,
        live_migration: true,
        ..FeatureFlags::default()
    };
    let knobs = TrustEdgeKnobs {
        reliability_threshold: 50.0,
        lookahead: 100,
        ..TrustEdgeKnobs::default()
    };
    let mut sim = Simulation::new(world, Policy::TrustEdge(knobs), flags, 1);

    let mut proactive_seen_by = None;
    for step in 1..=10 {
        sim.tick().unwrap();
        let has_proactive = sim
            .world
            .service(service)
            .migrations
            .iter()
            .any(|m| m.reason == MigrationReason::Proactive);
        if has_proactive && proactive_seen_by.is_none() {
            proactive_seen_by = Some(step);
        }
    }

    assert!(proactive_seen_by.is_some_and(|step| step <= 10));
    let svc = sim.world.service(service);
    let migration = svc.migrations.last().unwrap();
    assert_eq!(migration.reason, MigrationReason::Proactive);
    assert_eq!(migration.status, MigrationStatus::Finished);
    assert_eq!(svc.server, Some(pristine));
    assert!(svc.available);
}

/// The download queue never exceeds the concurrency cap, and the state
/// transfer waits for every layer.
#[test]
fn concurrent_download_cap() {
    let mut builder = WorldBuilder::new();
    let sw_near = builder.switch((0.0, 0.0));
    let sw_far = builder.switch((10.0, 0.0));
    builder.link(sw_near, sw_far, 100.0, 100.0);

    let station_near = builder.base_station((0.0, 0.0), sw_near, 0.0);
    let station_far = builder.base_station((10.0, 0.0), sw_far, 0.0);

    let target = builder.server(
        station_near,
        trustedge_sim::ServerSpec {
            max_concurrent_layer_downloads: 2,
            ..compute_spec(8, 8, 100_000)
        },
    );
    let origin = builder.server(station_far, compute_spec(8, 8, 100_000));
    let registry_host = builder.server(station_near, registry_host_spec());
    builder.registry(registry_host);
    let layers: Vec<(&str, u64)> = vec![
        ("sha-l1", 40),
        ("sha-l2", 40),
        ("sha-l3", 40),
        ("sha-l4", 40),
        ("sha-l5", 40),
    ];
    builder.image_on(registry_host, "inference", "sha-img-5", &layers);

    let user = builder.user((0.0, 0.0), station_near);
    let app = builder.application(user);
    let service = builder.service(app, "sha-img-5", 1, 1, 1_000);
    builder.access(user, app, vec![100], vec![200], 1, 30.0, 1_000);
    builder.place_service(service, origin);

    let world = builder.build();
    let mut sim = Simulation::new(world, trust_edge(), FeatureFlags::default(), 1);

    for _ in 1..=20 {
        sim.tick().unwrap();
        assert!(sim.world.server(target).download_queue.len() <= 2);

        // The state copy never starts before all five layers are local.
        let migrating = sim
            .world
            .service(service)
            .open_migration()
            .is_some_and(|m| m.status == MigrationStatus::MigratingServiceState);
        if migrating {
            let local = layers
                .iter()
                .filter(|(digest, _)| {
                    sim.world
                        .server(target)
                        .has_layer(&sim.world.layers, digest)
                })
                .count();
            assert_eq!(local, 5);
        }
    }

    let svc = sim.world.service(service);
    let migration = svc.migrations.last().unwrap();
    assert_eq!(migration.status, MigrationStatus::Finished);
    assert!(migration.migrating_service_state_time > 0);
    assert_eq!(svc.server, Some(target));
    assert_eq!(sim.world.server(target).demand.disk_mb, 200);
}

/// Leaving the access window cancels an in-flight migration, releases
/// the target, and stops further layer arrivals.
#[test]
fn user_stop_cancels_migration() {
    let mut builder = WorldBuilder::new();
    let sw_near = builder.switch((0.0, 0.0));
    let sw_far = builder.switch((10.0, 0.0));
    // 8 Mbps: a 100 MB layer takes ~100 ticks, far beyond the window.
    builder.link(sw_near, sw_far, 8.0, 5.0);

    let station_near = builder.base_station((0.0, 0.0), sw_near, 0.0);
    let station_far = builder.base_station((10.0, 0.0), sw_far, 0.0);

    let server = builder.server(station_near, compute_spec(4, 4, 10_000));
    let registry_host = builder.server(station_far, registry_host_spec());
    builder.registry(registry_host);
    builder.image_on(registry_host, "inference", "sha-img-1", &[("sha-layer-1", 100)]);

    let user = builder.user((0.0, 0.0), station_near);
    let app = builder.application(user);
    let service = builder.service(app, "sha-img-1", 1, 1, 0);
    // Window [18, 20], then gone for a long time.
    builder.access(user, app, vec![3], vec![500], 18, 1_000.0, 1_000);

    let world = builder.build();
    let mut sim = Simulation::new(world, trust_edge(), FeatureFlags::default(), 1);

    for _ in 1..=17 {
        sim.tick().unwrap();
    }
    assert!(sim.world.service(service).migrations.is_empty());

    sim.tick().unwrap(); // 18: provision opens
    {
        let svc = sim.world.service(service);
        let migration = svc.migrations.last().unwrap();
        assert_eq!(migration.start, 18);
        assert!(migration.is_open());
    }

    for _ in 19..=25 {
        sim.tick().unwrap();
    }

    let svc = sim.world.service(service);
    let migration = svc.migrations.last().unwrap();
    assert_eq!(migration.status, MigrationStatus::Interrupted);
    assert_eq!(
        migration.interruption_reason,
        Some(MigrationReason::UserStoppedAccessing)
    );
    assert_eq!(migration.end, Some(21));
    assert_eq!(svc.server, None);
    assert!(!svc.available);

    // Target fully unreserved, nothing further arrives.
    let target = sim.world.server(server);
    assert_eq!(target.demand.cpu_cores, 0);
    assert_eq!(target.demand.memory_gb, 0);
    assert!(target.container_layers.is_empty());
    assert!(target.waiting_queue.is_empty());
    assert!(target.download_queue.is_empty());
    assert!(sim.world.flows.is_empty());
}

/// Killing the origin mid-pull reclassifies the migration as recovery:
/// it finalises without a state copy and leaks nothing on the origin.
#[test]
fn origin_failure_during_pull_recovers_on_target() {
    let mut builder = WorldBuilder::new();
    let sw_user = builder.switch((0.0, 0.0));
    let sw_origin = builder.switch((10.0, 0.0));
    let sw_registry = builder.switch((0.0, 10.0));
    builder.link(sw_user, sw_origin, 1_000.0, 50.0);
    // 80 Mbps: the 100 MB layer needs ten ticks.
    builder.link(sw_user, sw_registry, 80.0, 5.0);

    let station_user = builder.base_station((0.0, 0.0), sw_user, 0.0);
    let station_origin = builder.base_station((10.0, 0.0), sw_origin, 0.0);
    let station_registry = builder.base_station((0.0, 10.0), sw_registry, 0.0);

    let target = builder.server(station_user, compute_spec(8, 8, 100_000));
    let origin = builder.server(station_origin, compute_spec(8, 8, 100_000));
    let registry_host = builder.server(station_registry, registry_host_spec());
    builder.registry(registry_host);
    builder.image_on(registry_host, "inference", "sha-img-1", &[("sha-layer-1", 100)]);

    let user = builder.user((0.0, 0.0), station_user);
    let app = builder.application(user);
    let service = builder.service(app, "sha-img-1", 1, 1, 5_000);
    builder.access(user, app, vec![30], vec![200], 1, 30.0, 1_000);
    builder.place_service(service, origin);

    // Origin dies at step 6, long before the pull can finish.
    seed_failure_trace(
        &mut builder,
        origin,
        1,
        vec![vec![failure_record(6, 30, 2)]],
        Vec::new(),
        quiet_characteristics(),
    );

    let world = builder.build();
    let flags = FeatureFlags {
        live_migration: true,
        ..FeatureFlags::default()
    };
    let mut sim = Simulation::new(world, trust_edge(), flags, 1);

    for step in 1..=5 {
        sim.tick().unwrap();
        // Live migration: still bound to (and serving from) the origin.
        assert_eq!(sim.world.service(service).server, Some(origin), "step {step}");
    }

    sim.tick().unwrap(); // 6: origin fails, migration reclassifies
    {
        let svc = sim.world.service(service);
        let migration = svc.migrations.last().unwrap();
        assert_eq!(migration.reason, MigrationReason::ServerFailed);
        assert_eq!(svc.server, Some(target));
        assert_eq!(sim.world.server(origin).demand.cpu_cores, 0);
    }

    for _ in 7..=15 {
        sim.tick().unwrap();
    }

    let svc = sim.world.service(service);
    let migration = svc.migrations.last().unwrap();
    assert_eq!(migration.status, MigrationStatus::Finished);
    assert_eq!(migration.reason, MigrationReason::ServerFailed);
    assert_eq!(migration.migrating_service_state_time, 0);
    assert_eq!(svc.server, Some(target));
    assert!(svc.available);
    assert_eq!(sim.world.server(origin).demand.cpu_cores, 0);
    assert_eq!(sim.world.server(origin).demand.memory_gb, 0);
}

fn run_parameters(sim: &Simulation, steps: u64) -> trustedge_sim::RunParameters {
    trustedge_sim::RunParameters {
        seed: 1,
        algorithm: sim.policy.tag().to_string(),
        time_steps: steps,
        dataset: "fixture".to_string(),
        flags: sim.flags,
        knobs: TrustEdgeKnobs::default(),
    }
}
