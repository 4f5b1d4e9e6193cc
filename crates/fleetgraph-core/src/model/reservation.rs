// crates/fleetgraph-core/src/model/reservation.rs
// ============================================================================
// Module: Reservation
// Description: A soft, named hold on a task pending claim.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::AgentId;
use crate::ids::ProjectId;
use crate::ids::ReservationId;
use crate::ids::TaskId;

/// Lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Currently holding the task for its assignee.
    Active,
    /// Expired by the sweeper without being claimed.
    Expired,
    /// Explicitly released, e.g. by a state transition or plan changeset.
    Released,
    /// Fulfilled: the assignee claimed the task.
    Consumed,
}

/// A hard, named hold on a task: only `assignee_agent_id` may claim it while
/// the reservation is active.
///
/// Invariant: at most one `active` reservation per task; `expires_at >
/// created_at`; `ttl_seconds` is bounded to `60..=86400`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique identifier.
    pub id: ReservationId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The task this reservation holds.
    pub task_id: TaskId,
    /// The only agent permitted to claim the task while this is active.
    pub assignee_agent_id: AgentId,
    /// Current status.
    pub status: ReservationStatus,
    /// Time-to-live in seconds, as supplied at creation.
    pub ttl_seconds: i64,
    /// Instant after which the reservation is eligible for sweeping.
    pub expires_at: Timestamp,
    /// Identity of the caller who created the reservation.
    pub created_by: AgentId,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Release instant, if released, expired, or consumed.
    pub released_at: Option<Timestamp>,
}
