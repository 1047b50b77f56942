//! # trustedge-types: Core types for the TrustEdge simulator
//!
//! This crate contains shared types used across the simulator:
//! - Entity IDs ([`ServerId`], [`ServiceId`], [`AppId`], …)
//! - The simulated-time scalar ([`Step`], integer steps with an infinity
//!   sentinel)
//! - Resource triples ([`Capacity`], [`Demand`])
//! - Shared status enums ([`ServerStatus`], [`MigrationStatus`],
//!   [`MigrationReason`], [`FlowStatus`])
//!
//! All entity relationships in the simulator are expressed through these
//! ids; the owning stores live in `trustedge-sim`.

use std::fmt::{self, Display};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// Entity IDs - All Copy (cheap 4-byte values)
// ============================================================================

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const fn new(id: u32) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u32 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Unique identifier for an edge server.
    ServerId
);
entity_id!(
    /// Unique identifier for a service.
    ServiceId
);
entity_id!(
    /// Unique identifier for an application.
    AppId
);
entity_id!(
    /// Unique identifier for a user.
    UserId
);
entity_id!(
    /// Unique identifier for a base station.
    BaseStationId
);
entity_id!(
    /// Unique identifier for a network switch.
    SwitchId
);
entity_id!(
    /// Unique identifier for a network link.
    LinkId
);
entity_id!(
    /// Unique identifier for a network flow.
    FlowId
);
entity_id!(
    /// Unique identifier for a container registry.
    RegistryId
);
entity_id!(
    /// Unique identifier for a container image.
    ImageId
);
entity_id!(
    /// Unique identifier for a container layer instance.
    LayerId
);
entity_id!(
    /// Unique identifier for a failure model.
    FailureModelId
);

// ============================================================================
// Simulated time
// ============================================================================

/// One integer-valued unit of simulated time.
///
/// Failure records permit an infinite instant ("this failure never ends"),
/// and pre-simulation seeded histories use negative instants, so `Step`
/// wraps an `i64` with an explicit infinity sentinel. Arithmetic saturates
/// at infinity.
///
/// Serialized as a JSON number when finite and as `null` when infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Step(i64);

impl Step {
    /// The "never happens" instant.
    pub const INFINITY: Step = Step(i64::MAX);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the underlying instant. Infinity maps to `i64::MAX`.
    pub const fn get(self) -> i64 {
        self.0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == i64::MAX
    }

    pub const fn is_finite(self) -> bool {
        self.0 != i64::MAX
    }

    /// Adds a finite offset, staying at infinity once there.
    pub fn offset(self, delta: i64) -> Self {
        if self.is_infinite() {
            Self::INFINITY
        } else {
            Self(self.0.saturating_add(delta))
        }
    }
}

impl Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i64> for Step {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_infinite() {
            serializer.serialize_none()
        } else {
            serializer.serialize_i64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<i64>::deserialize(deserializer)?;
        Ok(value.map_or(Step::INFINITY, Step::new))
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Computational capacity of a server: CPU in cores, RAM in gigabytes,
/// disk in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub disk_mb: u64,
}

/// Resource demand currently placed on a server. Mirrors [`Capacity`];
/// mutated by admission, finalization, and layer downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub disk_mb: u64,
}

// ============================================================================
// Status enums
// ============================================================================

/// Life-cycle state of an edge server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Available,
    Failing,
    Booting,
}

impl Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::Available => "available",
            ServerStatus::Failing => "failing",
            ServerStatus::Booting => "booting",
        };
        write!(f, "{name}")
    }
}

/// Phase of a tracked service migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Waiting,
    PullingLayers,
    MigratingServiceState,
    Finished,
    Interrupted,
}

impl Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationStatus::Waiting => "waiting",
            MigrationStatus::PullingLayers => "pulling_layers",
            MigrationStatus::MigratingServiceState => "migrating_service_state",
            MigrationStatus::Finished => "finished",
            MigrationStatus::Interrupted => "interrupted",
        };
        write!(f, "{name}")
    }
}

/// Why a migration was opened (or interrupted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationReason {
    /// Initial placement or placement improvement.
    Provision,
    /// Reliability- or SLA-driven move ahead of a predicted problem.
    Proactive,
    /// Recovery after the hosting server failed.
    ServerFailed,
    /// The user left its access window mid-migration.
    UserStoppedAccessing,
}

impl Display for MigrationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationReason::Provision => "provision",
            MigrationReason::Proactive => "proactive",
            MigrationReason::ServerFailed => "server_failed",
            MigrationReason::UserStoppedAccessing => "user_stopped_accessing",
        };
        write!(f, "{name}")
    }
}

/// State of a network flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Active,
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_offset_saturates_at_infinity() {
        assert_eq!(Step::INFINITY.offset(5), Step::INFINITY);
        assert_eq!(Step::new(10).offset(5), Step::new(15));
        assert_eq!(Step::new(-3).offset(1), Step::new(-2));
    }

    #[test]
    fn step_ordering_places_infinity_last() {
        assert!(Step::new(1_000_000) < Step::INFINITY);
        assert!(Step::new(-2550) < Step::new(0));
    }

    #[test]
    fn step_serializes_infinity_as_null() {
        assert_eq!(serde_json::to_string(&Step::INFINITY).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Step::new(42)).unwrap(), "42");

        let round: Step = serde_json::from_str("null").unwrap();
        assert!(round.is_infinite());
        let round: Step = serde_json::from_str("-7").unwrap();
        assert_eq!(round, Step::new(-7));
    }

    #[test]
    fn ids_display_and_convert() {
        let id = ServerId::new(3);
        assert_eq!(id.to_string(), "3");
        assert_eq!(u32::from(id), 3);
        assert_eq!(ServerId::from(3), id);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&MigrationStatus::PullingLayers).unwrap(),
            "\"pulling_layers\""
        );
        assert_eq!(
            serde_json::to_string(&MigrationReason::ServerFailed).unwrap(),
            "\"server_failed\""
        );
        assert_eq!(
            serde_json::to_string(&ServerStatus::Booting).unwrap(),
            "\"booting\""
        );
    }
}
