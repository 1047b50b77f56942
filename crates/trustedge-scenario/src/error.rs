//! Scenario-load error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a scenario document.
///
/// All of these are fatal at initialization: a run that fails here emits
/// no metrics file.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse scenario JSON at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write scenario JSON to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("scenario declares no \"{0}\" entities")]
    MissingEntityKind(&'static str),

    #[error("{kind} record {id}: missing required attribute \"{field}\"")]
    MissingField {
        kind: String,
        id: u64,
        field: String,
    },

    #[error("{kind} record {id}: attribute \"{field}\" has the wrong type (expected {expected})")]
    InvalidField {
        kind: String,
        id: u64,
        field: String,
        expected: &'static str,
    },

    #[error("{kind} record {id}: relationship \"{field}\" references unknown {target_class} {target_id}")]
    DanglingReference {
        kind: String,
        id: u64,
        field: String,
        target_class: String,
        target_id: u64,
    },

    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: String, id: u64 },
}
