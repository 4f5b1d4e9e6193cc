// crates/fleetgraph-core/src/model/integration_attempt.rs
// ============================================================================
// Module: IntegrationAttempt
// Description: One attempt to merge a task's completed work into the
//              mainline, and its eventual outcome.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::IntegrationAttemptId;
use crate::ids::ProjectId;
use crate::ids::TaskId;

/// Current status of an integration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationAttemptStatus {
    /// Queued, not yet started.
    Enqueued,
    /// In progress.
    Running,
    /// Merged cleanly.
    Succeeded,
    /// Did not merge.
    Failed,
}

/// Finer-grained terminal result than [`IntegrationAttemptStatus`], used for
/// metrics (see `fleetgraph-metrics`'s integration-reliability calculators).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationResult {
    /// Merged cleanly.
    Success,
    /// Blocked by a merge conflict.
    Conflict,
    /// Blocked by a failing required check.
    FailedChecks,
    /// Withdrawn before completion.
    Aborted,
}

/// One attempt to merge a task's completed work into the mainline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationAttempt {
    /// Unique identifier.
    pub id: IntegrationAttemptId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The task this attempt concerns.
    pub task_id: TaskId,
    /// Current status.
    pub status: IntegrationAttemptStatus,
    /// The terminal result, once `status` reaches `succeeded`/`failed`.
    pub result: Option<IntegrationResult>,
    /// Free-form detail (e.g. a failure message or merge commit reference).
    pub detail: Option<String>,
    /// Enqueue instant.
    pub enqueued_at: Timestamp,
    /// Start instant, once the attempt began running.
    pub started_at: Option<Timestamp>,
    /// Completion instant, once the attempt reached a terminal status.
    pub completed_at: Option<Timestamp>,
}
