// crates/fleetgraph-core/src/ids.rs
// ============================================================================
// Module: Fleetgraph Identifiers
// Description: Canonical opaque identifiers for every persisted entity.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every entity in the data model is addressed by an opaque string
//! identifier. Wrapping each one in its own type prevents a `TaskId` from
//! being passed where a `LeaseId` is expected. Validation (format, existence)
//! happens at the store boundary, not in these wrappers.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new ", stringify!($name), ".")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(ProjectId, "Identifies a project, the root of all tenancy.");
opaque_id!(PhaseId, "Identifies a phase within a project.");
opaque_id!(MilestoneId, "Identifies a milestone within a phase.");
opaque_id!(TaskId, "Identifies a task within a project.");
opaque_id!(DependencyEdgeId, "Identifies a dependency edge between two tasks.");
opaque_id!(LeaseId, "Identifies a lease granting exclusive execution rights on a task.");
opaque_id!(ReservationId, "Identifies a soft-hold reservation on a task.");
opaque_id!(PlanVersionId, "Identifies a persisted plan version.");
opaque_id!(PlanChangeSetId, "Identifies a plan changeset awaiting or having been applied.");
opaque_id!(
    TaskExecutionSnapshotId,
    "Identifies the work-spec snapshot captured at claim time."
);
opaque_id!(GateRuleId, "Identifies a gate rule governing a scope.");
opaque_id!(GateDecisionId, "Identifies a recorded gate decision.");
opaque_id!(ApiKeyId, "Identifies an API key credential.");
opaque_id!(ArtifactId, "Identifies an artifact attached to a task.");
opaque_id!(IntegrationAttemptId, "Identifies an integration attempt for a task.");
opaque_id!(MetricsJobRunId, "Identifies a single metrics materializer job run.");
opaque_id!(MetricsSnapshotId, "Identifies a computed metrics snapshot.");
opaque_id!(AlertId, "Identifies a raised threshold or anomaly alert.");

/// Identifies the calling agent (a worker, a human operator, or "system").
/// Agents are not a persisted entity of their own; the id is a free-form
/// opaque label attached to leases, reservations, and events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates a new agent identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Identifies a row in the append-only event log.
///
/// Unlike the opaque string identifiers above, an event log id is a dense
/// monotonic integer assigned by the store (`spec` §3, §4.8): the
/// materializer compares and takes the max of these values, so it is
/// represented numerically rather than as an opaque string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLogId(i64);

impl EventLogId {
    /// Wraps a raw event log id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for EventLogId {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::TaskId;

    #[test]
    fn round_trips_through_display_and_as_str() {
        let id = TaskId::new("tsk_abc123");
        assert_eq!(id.as_str(), "tsk_abc123");
        assert_eq!(id.to_string(), "tsk_abc123");
    }

    #[test]
    fn serializes_as_a_bare_string() {
        let id = TaskId::new("tsk_abc123");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"tsk_abc123\"");
    }
}
