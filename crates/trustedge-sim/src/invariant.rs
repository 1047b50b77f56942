//! Invariant checkers.
//!
//! Evaluated after every tick; a violation aborts the run with a
//! descriptive report and the partial metrics are discarded.

use trustedge_types::MigrationStatus;

use crate::error::SimError;
use crate::world::World;

/// Result of one invariant check.
#[derive(Debug, Clone)]
pub enum InvariantResult {
    /// The invariant holds.
    Ok,
    /// The invariant is violated.
    Violated {
        /// Name of the violated invariant.
        invariant: &'static str,
        /// Description of the violation.
        message: String,
    },
}

impl InvariantResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, InvariantResult::Ok)
    }

    pub fn into_error(self, step: i64) -> Option<SimError> {
        match self {
            InvariantResult::Ok => None,
            InvariantResult::Violated { invariant, message } => {
                Some(SimError::InvariantViolation {
                    invariant,
                    message,
                    step,
                })
            }
        }
    }
}

/// Runs every checker; the first violation wins.
pub fn check_all(world: &World, step: i64) -> Result<(), SimError> {
    let checks = [
        at_most_one_open_migration(world),
        resource_conservation(world),
        live_migration_placement(world),
        availability_definition(world),
        failure_history_is_trace_prefix(world),
    ];
    for check in checks {
        if let Some(error) = check.into_error(step) {
            return Err(error);
        }
    }
    Ok(())
}

/// Every service has at most one migration with `end == None`.
pub fn at_most_one_open_migration(world: &World) -> InvariantResult {
    for service in world.services.values() {
        let open = service
            .migrations
            .iter()
            .filter(|migration| migration.is_open())
            .count();
        if open > 1 {
            return InvariantResult::Violated {
                invariant: "at_most_one_open_migration",
                message: format!("service {} has {open} open migrations", service.id),
            };
        }
    }
    InvariantResult::Ok
}

/// Server demand equals hosted services plus open incoming reservations;
/// disk demand equals the local layers.
pub fn resource_conservation(world: &World) -> InvariantResult {
    for server in world.servers.values() {
        let mut cpu: u32 = 0;
        let mut memory: u32 = 0;
        for service_id in &server.services {
            let service = world.service(*service_id);
            cpu += service.cpu_demand;
            memory += service.memory_demand;
        }
        // Open migrations reserving this target while the service still
        // lives elsewhere.
        for service in world.services.values() {
            if let Some(migration) = service.open_migration() {
                if migration.target == server.id && !server.services.contains(&service.id) {
                    cpu += service.cpu_demand;
                    memory += service.memory_demand;
                }
            }
        }
        if server.demand.cpu_cores != cpu || server.demand.memory_gb != memory {
            return InvariantResult::Violated {
                invariant: "resource_conservation",
                message: format!(
                    "server {}: demand {}/{} vs accounted {cpu}/{memory}",
                    server.id, server.demand.cpu_cores, server.demand.memory_gb
                ),
            };
        }

        let disk: u64 = server
            .container_layers
            .iter()
            .map(|layer| world.layer(*layer).size_mb)
            .sum();
        if server.demand.disk_mb != disk {
            return InvariantResult::Violated {
                invariant: "resource_conservation",
                message: format!(
                    "server {}: disk demand {} vs local layers {disk}",
                    server.id, server.demand.disk_mb
                ),
            };
        }
    }
    InvariantResult::Ok
}

/// While an open migration is still pulling and its origin lives, the
/// service stays on the origin; afterwards (or on origin failure) it is
/// on the target.
pub fn live_migration_placement(world: &World) -> InvariantResult {
    for service in world.services.values() {
        let Some(migration) = service.open_migration() else {
            continue;
        };
        let downloading = matches!(
            migration.status,
            MigrationStatus::Waiting | MigrationStatus::PullingLayers
        );
        let origin_available = migration
            .origin
            .is_some_and(|origin| world.server(origin).available);
        let expected = if downloading && origin_available {
            migration.origin
        } else {
            Some(migration.target)
        };
        if service.server != expected {
            return InvariantResult::Violated {
                invariant: "live_migration_placement",
                message: format!(
                    "service {}: bound to {:?}, expected {:?} ({} / origin available: {origin_available})",
                    service.id, service.server, expected, migration.status
                ),
            };
        }
    }
    InvariantResult::Ok
}

/// The recorded application availability equals the conjunction of its
/// services, and an available service implies an available host.
pub fn availability_definition(world: &World) -> InvariantResult {
    for service in world.services.values() {
        if service.available {
            let host_up = service
                .server
                .is_some_and(|server| world.server(server).available);
            if !host_up {
                return InvariantResult::Violated {
                    invariant: "availability_definition",
                    message: format!(
                        "service {} is available on an unavailable host {:?}",
                        service.id, service.server
                    ),
                };
            }
        }
    }
    for app in world.applications.values() {
        let Some(recorded) = app.availability_history.last().copied() else {
            continue;
        };
        let actual = world.application_available(app.id);
        if recorded != actual {
            return InvariantResult::Violated {
                invariant: "availability_definition",
                message: format!(
                    "application {}: recorded availability {recorded} vs actual {actual}",
                    app.id
                ),
            };
        }
    }
    InvariantResult::Ok
}

/// The failure history of each server is a prefix of its flattened
/// trace.
pub fn failure_history_is_trace_prefix(world: &World) -> InvariantResult {
    for model in world.failure_models.values() {
        let flattened: Vec<_> = model.failure_trace.iter().flatten().collect();
        let prefix_matches = model.failure_history.len() <= flattened.len()
            && model
                .failure_history
                .iter()
                .zip(flattened.iter())
                .all(|(occurred, planned)| occurred == *planned);
        if !prefix_matches {
            return InvariantResult::Violated {
                invariant: "failure_history_prefix",
                message: format!(
                    "failure model {}: history ({} records) is not a prefix of the planned trace",
                    model.id,
                    model.failure_history.len()
                ),
            };
        }
    }
    InvariantResult::Ok
}
