//! # trustedge-sim: discrete-event core of the TrustEdge simulator
//!
//! A failure-aware edge-computing orchestrator, simulated one integer
//! tick at a time. Edge servers follow stochastic failure/repair
//! life-cycles, container images stream layer-by-layer over shared
//! links, mobile users access latency-bounded applications, and a
//! per-step placement policy decides where services live.
//!
//! ## Architecture
//!
//! - [`World`]: arena-with-integer-ids entity store (servers, services,
//!   applications, users, links, switches, registries, images, layers,
//!   flows, failure models)
//! - [`topology::Topology`]: delay-weighted switch graph with memoised
//!   shortest paths
//! - [`failure`]: per-server failure trace generation and replay
//!   (bounded-uniform or Weibull/log-normal)
//! - [`flow`]: shared-bandwidth byte transfers with completion side
//!   effects
//! - [`migration`] + [`service_step`]: the
//!   `waiting → pulling_layers → migrating_service_state → finished`
//!   state machine
//! - [`policy`]: TrustEdge, Kubernetes-inspired, and first-fit placement
//! - [`metrics`]: event-subscribing per-run collector
//! - [`Simulation`]: the tick scheduler fanning each step across the
//!   components in a fixed order
//!
//! ## Determinism
//!
//! All randomness flows through a seeded [`SimRng`]; same seed, same
//! scenario, same metrics record.

pub mod access;
pub mod application_step;
pub mod builder;
pub mod entities;
mod error;
pub mod failure;
pub mod flow;
pub mod invariant;
pub mod metrics;
pub mod migration;
pub mod policy;
pub mod reliability;
mod rng;
pub mod scenario_io;
mod scheduler;
pub mod server_step;
pub mod service_step;
pub mod topology;
pub mod user_step;
mod world;

pub use builder::{ServerSpec, WorldBuilder};
pub use error::SimError;
pub use metrics::{MetricsCollector, MetricsRecord};
pub use policy::{FeatureFlags, Policy, TrustEdgeKnobs};
pub use rng::SimRng;
pub use scenario_io::{world_from_document, world_to_document};
pub use scheduler::{RunParameters, Simulation};
pub use world::World;
