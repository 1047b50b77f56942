//! # trustedge-scenario: Scenario documents for the TrustEdge simulator
//!
//! A scenario is a single JSON document describing the initial world
//! state: one list of records per entity kind, each record of the form
//! `{"attributes": {...}, "relationships": {...}}`. Relationships point at
//! other records by `{"class": "...", "id": n}`.
//!
//! The document model here is deliberately schema-light: attributes are
//! kept as raw JSON maps so unknown fields survive a load/save round-trip
//! verbatim. Typed accessors ([`EntityRecord::attr_u64`] and friends)
//! surface the mandatory fields with precise errors, and
//! [`ScenarioDocument::validate`] rejects dangling references and
//! duplicate ids before the simulator ever sees the data.

mod document;
mod error;

pub use document::{EntityRecord, EntityRef, ScenarioDocument, REQUIRED_KINDS};
pub use error::ScenarioError;
