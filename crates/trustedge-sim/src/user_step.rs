//! Per-step user logic: access windows, mobility, routing, delay.

use tracing::debug;
use trustedge_types::{AppId, BaseStationId, SwitchId, UserId};

use crate::entities::MobilityModel;
use crate::world::World;

pub fn run(world: &mut World, current_step: i64, user_id: UserId) {
    update_access(world, current_step, user_id);
    update_mobility(world, current_step, user_id);
}

// ============================================================================
// Access windows
// ============================================================================

fn update_access(world: &mut World, current_step: i64, user_id: UserId) {
    let apps = world.user(user_id).applications.clone();
    for app_id in apps {
        // Waiting time counts steps the user wanted an app that was not
        // there; access time counts successful ones.
        let requesting = world.user(user_id).is_making_request(app_id, current_step);
        if requesting {
            let app_available = world.application_available(app_id);
            if let Some(pattern) = world.user_mut(user_id).access_patterns.get_mut(&app_id) {
                let window = pattern.last_window_mut();
                if app_available {
                    window.access_time += 1;
                } else {
                    window.waiting_time += 1;
                }
            }
        }

        let (within_next, next_access) = {
            let user = world.user(user_id);
            let Some(pattern) = user.access_patterns.get(&app_id) else {
                continue;
            };
            let window = pattern.last_window();
            (
                window.start <= current_step + 1 && current_step + 1 <= window.end,
                window.next_access,
            )
        };

        let user = world.user_mut(user_id);
        user.making_requests
            .entry(app_id)
            .or_default()
            .insert(current_step + 1, within_next);

        if current_step + 1 == next_access {
            user.making_requests
                .entry(app_id)
                .or_default()
                .insert(current_step + 1, true);
            if let Some(pattern) = user.access_patterns.get_mut(&app_id) {
                pattern.next_access(current_step + 1);
            }
        }
    }
}

// ============================================================================
// Mobility and routing
// ============================================================================

fn update_mobility(world: &mut World, current_step: i64, user_id: UserId) {
    let index = usize::try_from(current_step.max(0)).unwrap_or(0);

    // Extend the trace when the known track runs out.
    {
        let user = world.user_mut(user_id);
        while user.coordinates_trace.len() <= index {
            let next = match user.mobility_model {
                MobilityModel::Static => user
                    .coordinates_trace
                    .last()
                    .copied()
                    .unwrap_or(user.coordinates),
            };
            user.coordinates_trace.push(next);
        }
    }

    let new_coordinates = world.user(user_id).coordinates_trace[index];
    if new_coordinates == world.user(user_id).coordinates {
        return;
    }
    world.user_mut(user_id).coordinates = new_coordinates;

    let nearest = nearest_base_station(world, new_coordinates);
    world.user_mut(user_id).base_station = nearest;
    debug!(user = %user_id, station = %nearest, step = current_step, "user moved");

    // Only apps whose services are all up get a fresh route; the rest
    // lose their path until they recover.
    let apps = world.user(user_id).applications.clone();
    for app_id in apps {
        if world.application_available(app_id) {
            set_communication_path(world, user_id, app_id);
        } else {
            let user = world.user_mut(user_id);
            user.communication_paths.insert(app_id, Vec::new());
            user.delays.insert(app_id, None);
        }
    }
}

fn nearest_base_station(world: &World, coordinates: (f64, f64)) -> BaseStationId {
    world
        .base_stations
        .values()
        .map(|station| {
            let dx = station.coordinates.0 - coordinates.0;
            let dy = station.coordinates.1 - coordinates.1;
            (dx * dx + dy * dy, station.id)
        })
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, id)| id)
        .unwrap_or_else(|| panic!("world has no base stations"))
}

/// Recomputes the switch paths chaining the user's base station through
/// every placed service of the application, and refreshes the measured
/// delay (wireless hop plus wired legs).
pub fn set_communication_path(world: &mut World, user_id: UserId, app_id: AppId) {
    let user_station = world.user(user_id).base_station;
    let service_stations: Vec<BaseStationId> = world
        .application(app_id)
        .services
        .iter()
        .filter_map(|service_id| world.service(*service_id).server)
        .map(|server_id| world.server(server_id).base_station)
        .collect();

    let chain: Vec<BaseStationId> = std::iter::once(user_station)
        .chain(service_stations)
        .collect();

    let mut legs: Vec<Vec<SwitchId>> = Vec::new();
    let mut total_delay = Some(world.base_station(user_station).wireless_delay_ms);
    for pair in chain.windows(2) {
        if pair[0] == pair[1] {
            legs.push(Vec::new());
            continue;
        }
        let from = world.base_station(pair[0]).network_switch;
        let to = world.base_station(pair[1]).network_switch;
        match world.topology.shortest_path(from, to) {
            Ok(path) => {
                if let Some(total) = total_delay.as_mut() {
                    *total += world.topology.path_delay(&path);
                }
                legs.push(path);
            }
            Err(_) => {
                // Disconnected graph: no usable route, no measured delay.
                legs.push(Vec::new());
                total_delay = None;
            }
        }
    }

    let user = world.user_mut(user_id);
    user.communication_paths.insert(app_id, legs);
    user.delays.insert(app_id, total_delay);
}
