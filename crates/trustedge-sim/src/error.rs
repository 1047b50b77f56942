//! Simulator error types.

use thiserror::Error;
use trustedge_types::SwitchId;

/// Errors that abort a simulation run.
///
/// Admission failures and flow starvation are deliberately absent: those
/// are expected conditions handled by deferral and logging, not errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// A correctness property was violated mid-run. Partial metrics are
    /// discarded.
    #[error("invariant \"{invariant}\" violated at step {step}: {message}")]
    InvariantViolation {
        invariant: &'static str,
        message: String,
        step: i64,
    },

    /// The switch graph offers no path between two endpoints. Fatal for
    /// the migration that needed the route; callers cancel it and carry
    /// on, so this only escapes when no recovery is possible.
    #[error("no route between switch {source_switch} and switch {target}")]
    RoutingUnavailable {
        source_switch: SwitchId,
        target: SwitchId,
    },

    /// The selected placement policy does not recognise a knob or
    /// algorithm tag.
    #[error("unknown placement algorithm \"{0}\"")]
    UnknownAlgorithm(String),
}
