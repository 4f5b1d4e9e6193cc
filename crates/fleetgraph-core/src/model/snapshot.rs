// crates/fleetgraph-core/src/model/snapshot.rs
// ============================================================================
// Module: TaskExecutionSnapshot
// Description: The work-spec frozen at claim time, so later plan changes
//              cannot silently alter what an in-flight agent is executing.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::LeaseId;
use crate::ids::ProjectId;
use crate::ids::TaskExecutionSnapshotId;
use crate::ids::TaskId;
use crate::model::task::WorkSpec;

/// An immutable copy of a task's work spec, captured atomically with a
/// lease at claim time.
///
/// Invariant: exactly one snapshot per lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionSnapshot {
    /// Unique identifier.
    pub id: TaskExecutionSnapshotId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The task this snapshot was captured from.
    pub task_id: TaskId,
    /// The lease this snapshot belongs to. Unique per snapshot.
    pub lease_id: LeaseId,
    /// The plan version current at capture time.
    pub captured_plan_version: i64,
    /// SHA-256 of the canonical JSON of `work_spec_payload`.
    pub work_spec_hash: String,
    /// The frozen work spec itself.
    pub work_spec_payload: WorkSpec,
    /// Identity of the agent the snapshot was captured for.
    pub captured_by: String,
    /// Capture instant.
    pub captured_at: Timestamp,
}
