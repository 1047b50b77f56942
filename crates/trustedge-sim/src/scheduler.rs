//! The tick scheduler.
//!
//! One [`Simulation`] owns the world and every per-run counter; nothing
//! global persists between runs. Each tick fans out across the components
//! in the mandated order: placement policy, servers, flows, services,
//! users, applications, metrics. Within a component, entities advance in
//! ascending id order.

use serde::Serialize;
use tracing::info;

use crate::error::SimError;
use crate::invariant;
use crate::metrics::{MetricsCollector, MetricsRecord};
use crate::policy::{FeatureFlags, Policy, TrustEdgeKnobs};
use crate::rng::SimRng;
use crate::world::World;
use crate::{application_step, flow, server_step, service_step, user_step};

/// Echo of the run invocation, embedded in the metrics record.
#[derive(Debug, Clone, Serialize)]
pub struct RunParameters {
    pub seed: u64,
    pub algorithm: String,
    pub time_steps: u64,
    pub dataset: String,
    pub flags: FeatureFlags,
    pub knobs: TrustEdgeKnobs,
}

/// The simulator: world, policy, metrics, and the tick loop.
#[derive(Debug)]
pub struct Simulation {
    pub world: World,
    pub rng: SimRng,
    pub policy: Policy,
    pub flags: FeatureFlags,
    pub metrics: MetricsCollector,
    pub current_step: i64,
    /// Check invariants after every tick (on by default; integration
    /// tests rely on it).
    pub check_invariants: bool,
}

impl Simulation {
    pub fn new(world: World, policy: Policy, flags: FeatureFlags, seed: u64) -> Self {
        Self {
            world,
            rng: SimRng::new(seed),
            policy,
            flags,
            metrics: MetricsCollector::new(),
            current_step: 0,
            check_invariants: true,
        }
    }

    /// Advances the simulation by `num_steps` ticks.
    pub fn run(&mut self, num_steps: u64) -> Result<(), SimError> {
        info!(
            steps = num_steps,
            algorithm = self.policy.tag(),
            seed = self.rng.seed(),
            "simulation starting"
        );
        for _ in 0..num_steps {
            self.tick()?;
        }
        info!(final_step = self.current_step, "simulation finished");
        Ok(())
    }

    /// One discrete time step.
    pub fn tick(&mut self) -> Result<(), SimError> {
        self.current_step += 1;
        let step = self.current_step;

        // 1. Placement decisions, on the previous tick's settled state.
        self.policy
            .step(&mut self.world, &mut self.metrics, &self.flags, step);

        // 2. Servers: failures, then layer downloads.
        let server_ids: Vec<_> = self.world.servers.keys().copied().collect();
        for server_id in server_ids {
            server_step::run(
                &mut self.world,
                &mut self.rng,
                &mut self.metrics,
                &self.flags,
                step,
                server_id,
            );
        }

        // 3. Byte transfers.
        flow::advance_flows(&mut self.world, step);

        // 4. Migration state machines.
        let service_ids: Vec<_> = self.world.services.keys().copied().collect();
        for service_id in service_ids {
            service_step::run(&mut self.world, &mut self.metrics, step, service_id);
        }

        // 5. Users: access windows, mobility, routing.
        let user_ids: Vec<_> = self.world.users.keys().copied().collect();
        for user_id in user_ids {
            user_step::run(&mut self.world, step, user_id);
        }

        // 6. Applications: availability bookkeeping.
        let app_ids: Vec<_> = self.world.applications.keys().copied().collect();
        for app_id in app_ids {
            application_step::run(&mut self.world, step, app_id);
        }

        // 7. Per-step metrics.
        self.metrics.collect_step(&self.world, step);

        if self.check_invariants {
            invariant::check_all(&self.world, step)?;
        }
        Ok(())
    }

    /// Consolidates the run into its output record.
    pub fn finalize_metrics(
        &self,
        parameters: &RunParameters,
        total_time_minutes: f64,
    ) -> MetricsRecord {
        let echo = serde_json::to_value(parameters).unwrap_or(serde_json::Value::Null);
        self.metrics
            .finalize(&self.world, echo, self.current_step, total_time_minutes)
    }
}
