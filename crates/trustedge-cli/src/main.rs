//! TrustEdge simulator runner.
//!
//! Loads a scenario, runs the selected placement algorithm for the
//! requested number of steps, and writes one metrics JSON per run under
//! the results directory. A run that fails at initialization emits no
//! metrics file; a run whose per-step logic errors discards its partial
//! metrics.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trustedge_scenario::ScenarioDocument;
use trustedge_sim::{
    world_from_document, FeatureFlags, Policy, RunParameters, Simulation, TrustEdgeKnobs,
};

#[derive(Debug, Parser)]
#[command(
    name = "trustedge",
    about = "Discrete-event simulator of a failure-aware edge orchestrator",
    version
)]
struct Args {
    /// Seed for the deterministic RNG.
    seed: u64,

    /// Placement algorithm: trustedge_v3 | kubernetes_inspired |
    /// first_fit_baseline.
    algorithm: String,

    /// Number of time steps to simulate.
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    time_steps: u64,

    /// Scenario JSON to load.
    dataset: PathBuf,

    /// Proactive migration off unreliable hosts.
    #[arg(long)]
    enable_failure_prediction: bool,

    /// Let edge servers serve layer downloads peer-to-peer.
    #[arg(long)]
    enable_p2p_layer_fetch: bool,

    /// Keep services serving from the origin while layers pull.
    #[arg(long)]
    enable_live_migration: bool,

    /// Migrate services whose measured delay breaches the SLA margin.
    #[arg(long)]
    enable_proactive_sla_migration: bool,

    /// Completed failures considered by the reliability math
    /// (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    window_size: usize,

    /// Conditional-reliability percentage below which proactive
    /// migration fires.
    #[arg(long, default_value_t = 50.0)]
    reliability_threshold: f64,

    /// Steps ahead the reliability projection looks.
    #[arg(long, default_value_t = 100)]
    lookahead: i64,

    /// Multiplier on the delay SLA for proactive SLA migration.
    #[arg(long, default_value_t = 1.0)]
    delay_threshold: f64,

    /// Directory receiving the metrics record.
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Output file prefix; defaults to "<algorithm>_".
    #[arg(long)]
    prefix: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let knobs = TrustEdgeKnobs {
        window_size: args.window_size,
        reliability_threshold: args.reliability_threshold,
        lookahead: args.lookahead,
        delay_threshold: args.delay_threshold,
    };
    let flags = FeatureFlags {
        failure_prediction: args.enable_failure_prediction,
        p2p_layer_fetch: args.enable_p2p_layer_fetch,
        live_migration: args.enable_live_migration,
        proactive_sla_migration: args.enable_proactive_sla_migration,
    };

    let policy = Policy::from_tag(&args.algorithm, knobs)?;
    let document = ScenarioDocument::from_path(&args.dataset)
        .with_context(|| format!("loading dataset {}", args.dataset.display()))?;
    let world = world_from_document(&document)
        .with_context(|| format!("building world from {}", args.dataset.display()))?;

    info!(
        dataset = %args.dataset.display(),
        algorithm = %args.algorithm,
        seed = args.seed,
        steps = args.time_steps,
        "run starting"
    );

    let parameters = RunParameters {
        seed: args.seed,
        algorithm: args.algorithm.clone(),
        time_steps: args.time_steps,
        dataset: args.dataset.display().to_string(),
        flags,
        knobs,
    };

    let started = Instant::now();
    let mut simulation = Simulation::new(world, policy, flags, args.seed);
    simulation
        .run(args.time_steps)
        .context("simulation aborted")?;
    let total_time_minutes = started.elapsed().as_secs_f64() / 60.0;

    let record = simulation.finalize_metrics(&parameters, total_time_minutes);

    let prefix = args
        .prefix
        .unwrap_or_else(|| format!("{}_", parameters.algorithm));
    fs::create_dir_all(&args.results_dir)
        .with_context(|| format!("creating {}", args.results_dir.display()))?;
    let output = args
        .results_dir
        .join(format!("metrics_run_{prefix}{}.json", parameters.seed));
    let body = serde_json::to_string_pretty(&record).context("serialising metrics")?;
    fs::write(&output, body).with_context(|| format!("writing {}", output.display()))?;

    info!(output = %output.display(), "metrics written");
    println!("{}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_positional_and_flags() {
        let args = Args::parse_from([
            "trustedge",
            "7",
            "trustedge_v3",
            "500",
            "datasets/scenario.json",
            "--enable-failure-prediction",
            "--lookahead",
            "60",
        ]);
        assert_eq!(args.seed, 7);
        assert_eq!(args.algorithm, "trustedge_v3");
        assert_eq!(args.time_steps, 500);
        assert!(args.enable_failure_prediction);
        assert!(!args.enable_live_migration);
        assert_eq!(args.lookahead, 60);
    }

    #[test]
    fn zero_steps_is_rejected() {
        let result = Args::try_parse_from(["trustedge", "7", "trustedge_v3", "0", "d.json"]);
        assert!(result.is_err());
    }
}
