// crates/fleetgraph-core/src/model/lease.rs
// ============================================================================
// Module: Lease
// Description: Single-owner execution rights on a task, with fencing.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::AgentId;
use crate::ids::LeaseId;
use crate::ids::ProjectId;
use crate::ids::TaskId;

/// Lifecycle status of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    /// Currently granting exclusive rights.
    Active,
    /// Expired by the sweeper without an explicit release.
    Expired,
    /// Explicitly released, e.g. by a state transition.
    Released,
    /// Fulfilled its purpose by being superseded (not used for leases today;
    /// present for symmetry with [`crate::model::reservation::ReservationStatus`]).
    Consumed,
}

/// A grant of exclusive execution rights on one task to one agent.
///
/// Invariant: at most one `active` lease exists per task at any time. The
/// `fencing_counter` strictly increases across every lease ever created for
/// the task, so a stale writer holding an old lease can always be detected
/// by a downstream system comparing counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    /// Unique identifier.
    pub id: LeaseId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The task this lease grants rights on.
    pub task_id: TaskId,
    /// The agent holding the lease.
    pub agent_id: AgentId,
    /// High-entropy opaque secret; presented on every heartbeat.
    pub token: String,
    /// Current status.
    pub status: LeaseStatus,
    /// Instant after which the lease is eligible for sweeping.
    pub expires_at: Timestamp,
    /// Instant of the most recent heartbeat (or creation).
    pub heartbeat_at: Timestamp,
    /// Strictly increasing per-task counter.
    pub fencing_counter: i64,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Release instant, if released or expired.
    pub released_at: Option<Timestamp>,
}
