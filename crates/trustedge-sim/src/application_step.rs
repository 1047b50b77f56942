//! Per-step application logic: availability and perceived downtime.

use trustedge_types::AppId;

use crate::world::World;

/// Appends the step's availability verdict and records perceived
/// downtime for every user that actually wanted the application.
pub fn run(world: &mut World, current_step: i64, app_id: AppId) {
    let available = world.application_available(app_id);

    let users = world.application(app_id).users.clone();
    let mut requested = false;
    for user_id in users {
        if !world.user(user_id).is_making_request(app_id, current_step) {
            continue;
        }
        requested = true;
        world
            .user_mut(user_id)
            .perceived_downtime
            .entry(app_id)
            .or_default()
            .insert(current_step, !available);
    }

    let app = world.application_mut(app_id);
    app.availability_history.push(available);
    app.downtime_history.push(requested && !available);
}
