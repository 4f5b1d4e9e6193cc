// crates/fleetgraph-core/src/model/event.rs
// ============================================================================
// Module: EventLog
// Description: The append-only domain event stream every mutation writes to.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::EventLogId;
use crate::ids::ProjectId;

/// The persisted event-type tag. New variants are additive; once assigned, a
/// tag's meaning never changes (replay depends on it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A task moved from one state to another.
    TaskStateTransitioned,
    /// A lease was reaped by the expiration sweeper.
    LeaseExpired,
    /// A lease was released (explicitly or as a transition side effect).
    LeaseReleased,
    /// A reservation was reaped by the expiration sweeper.
    ReservationExpired,
    /// A reservation was released (explicitly or as a transition side effect).
    ReservationReleased,
    /// A plan changeset was successfully applied.
    ChangesetApplied,
    /// A gate decision was recorded.
    GateDecisionRecorded,
    /// An authorization check denied the caller.
    AuthDenied,
    /// An artifact was attached to a task.
    ArtifactCreated,
    /// An integration attempt was enqueued.
    IntegrationAttemptEnqueued,
    /// An integration attempt reached a terminal result.
    IntegrationAttemptCompleted,
}

/// A single, immutable row in the append-only event log. `id` is a dense
/// monotonic integer assigned by the store; it is the sole replay cursor the
/// metrics materializer uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    /// Dense monotonic identifier assigned by the store at insert time.
    pub id: EventLogId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The kind of entity this event concerns (e.g. `"task"`, `"lease"`).
    pub entity_type: String,
    /// The specific entity instance, if applicable.
    pub entity_id: Option<String>,
    /// The event's type tag.
    pub event_type: EventType,
    /// Structured event payload.
    pub payload: serde_json::Value,
    /// The identity (agent, operator, or `"system"`) that caused this event.
    pub caused_by: Option<String>,
    /// Creation instant.
    pub created_at: Timestamp,
}
