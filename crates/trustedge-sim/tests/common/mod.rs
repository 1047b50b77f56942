//! Shared fixtures for the end-to-end scenarios.
#![allow(dead_code)] // each test binary uses its own slice of the fixtures

use trustedge_sim::entities::PowerParameters;
use trustedge_sim::failure::{Bounds, FailureCharacteristics, FailureRecord, Interval};
use trustedge_sim::{ServerSpec, WorldBuilder};
use trustedge_types::Step;

/// A server spec for hosts that only exist to carry a registry: no
/// compute capacity, so they never win placement.
pub fn registry_host_spec() -> ServerSpec {
    ServerSpec {
        model_name: "registry-host".to_string(),
        cpu: 0,
        memory: 0,
        disk: 131_072,
        ..ServerSpec::default()
    }
}

pub fn compute_spec(cpu: u32, memory: u32, disk: u64) -> ServerSpec {
    ServerSpec {
        model_name: "edge-node".to_string(),
        cpu,
        memory,
        disk,
        time_to_boot: 2,
        max_concurrent_layer_downloads: 3,
        power: PowerParameters {
            static_fraction: 0.2,
            max_watts: 250.0,
        },
    }
}

/// Characteristics that never fire again on their own.
pub fn quiet_characteristics() -> FailureCharacteristics {
    FailureCharacteristics::BoundedUniform {
        number_of_failures: Bounds {
            lower_bound: 0,
            upper_bound: 0,
        },
        failure_duration: Interval::Infinite,
        interval_between_failures: Interval::Infinite,
        interval_between_sets: Interval::Infinite,
    }
}

/// A completed failure record: down at `starts`, up again at
/// `starts + duration + time_to_boot`.
pub fn failure_record(starts: i64, duration: i64, time_to_boot: i64) -> FailureRecord {
    let failure_ends_at = starts + duration - 1;
    let starts_booting_at = failure_ends_at + 1;
    let finishes_booting_at = starts_booting_at + time_to_boot - 1;
    FailureRecord {
        failure_starts_at: Step::new(starts),
        failure_duration: Step::new(duration),
        failure_ends_at: Step::new(failure_ends_at),
        starts_booting_at: Step::new(starts_booting_at),
        finishes_booting_at: Step::new(finishes_booting_at),
        becomes_available_at: Step::new(finishes_booting_at + 1),
    }
}

/// Injects a fixed failure trace into a server's model.
pub fn seed_failure_trace(
    builder: &mut WorldBuilder,
    server: trustedge_types::ServerId,
    initial: i64,
    trace: Vec<Vec<FailureRecord>>,
    history: Vec<FailureRecord>,
    characteristics: FailureCharacteristics,
) {
    builder.failure_model(server, Step::new(initial), characteristics);
    let model_id = builder.world_mut().server(server).failure_model;
    let model = builder.world_mut().failure_model_mut(model_id);
    model.failure_trace = trace;
    model.failure_history = history;
}
