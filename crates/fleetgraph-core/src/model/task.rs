// crates/fleetgraph-core/src/model/task.rs
// ============================================================================
// Module: Task
// Description: The unit of work moving through the dependency graph and the
//              reviewed state machine.
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::MilestoneId;
use crate::ids::PhaseId;
use crate::ids::ProjectId;
use crate::ids::TaskId;

/// Lifecycle state of a task. See `runtime::state_machine` for the allowed
/// adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not yet eligible for claiming; predecessors unresolved or not staged.
    Backlog,
    /// Eligible for claiming; all predecessor edges are satisfied.
    Ready,
    /// A reservation holds the task for one named agent.
    Reserved,
    /// An active lease grants one agent exclusive execution rights.
    Claimed,
    /// The claiming agent has begun work.
    InProgress,
    /// Work is complete and awaiting review/integration.
    Implemented,
    /// Terminal: merged into the mainline.
    Integrated,
    /// The last integration attempt failed with a conflict.
    Conflict,
    /// Execution is stalled on an external dependency.
    Blocked,
    /// Terminal: withdrawn without being integrated.
    Abandoned,
    /// Terminal: withdrawn administratively.
    Cancelled,
}

impl TaskState {
    /// Returns true for the three terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Integrated | Self::Abandoned | Self::Cancelled)
    }
}

/// Classification of a task's nature. Gate-class tasks require a
/// `GateDecision` before they may integrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Structural or cross-cutting architecture work.
    Architecture,
    /// Database schema changes.
    DbSchema,
    /// Security-sensitive work.
    Security,
    /// Work that touches many other tasks' surfaces.
    CrossCutting,
    /// A synthetic task representing a required human review gate.
    ReviewGate,
    /// A synthetic task representing a required merge gate.
    MergeGate,
    /// User-facing frontend work.
    Frontend,
    /// Backend/service work.
    Backend,
    /// Routine create/read/update/delete work.
    Crud,
    /// Anything not covered above.
    Other,
}

impl TaskClass {
    /// Returns true if this class requires a `GateDecision` before
    /// integration (see `runtime::state_machine`).
    #[must_use]
    pub const fn requires_gate_decision(self) -> bool {
        matches!(self, Self::ReviewGate | Self::MergeGate)
    }
}

/// The structured description of what a task asks an agent to do. Opaque to
/// the engine beyond its hash; stored as JSON.
pub type WorkSpec = serde_json::Value;

/// A unit of work within a project's dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Owning phase.
    pub phase_id: PhaseId,
    /// Owning milestone. Must belong to a phase matching `phase_id`.
    pub milestone_id: MilestoneId,
    /// Short display title.
    pub title: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Scheduling priority; lower values are more urgent.
    pub priority: i32,
    /// The structured work description.
    pub work_spec: WorkSpec,
    /// Domain classification.
    pub task_class: TaskClass,
    /// Tags an agent must intersect with to claim this task (empty = no filter).
    pub capability_tags: BTreeSet<String>,
    /// Filesystem-ish paths this task is expected to touch; informational,
    /// unlike `exclusive_paths`/`shared_paths` it is not enforced at claim time.
    pub expected_touches: BTreeSet<String>,
    /// Filesystem-ish paths this task must hold exclusively while claimed.
    pub exclusive_paths: BTreeSet<String>,
    /// Paths this task may share concurrently with other claimed tasks.
    pub shared_paths: BTreeSet<String>,
    /// The plan version this task was introduced in, if created by a changeset.
    pub introduced_in_plan_version: Option<i64>,
    /// The plan version this task was deprecated in, if since removed.
    pub deprecated_in_plan_version: Option<i64>,
    /// Monotonic per-task version, incremented on every material mutation.
    pub version: i64,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last-mutation instant.
    pub updated_at: Timestamp,
    /// Agent or operator that recorded the most recent `→ integrated` review.
    pub reviewed_by: Option<String>,
    /// Evidence references backing the most recent review.
    pub review_evidence_refs: Vec<String>,
}

impl Task {
    /// Returns true iff `capability_set` satisfies this task's capability
    /// filter per the readiness predicate (`spec` §4.1 rule 3): an empty
    /// `capability_tags` bypasses the filter entirely.
    #[must_use]
    pub fn capability_filter_satisfied(&self, capability_set: &BTreeSet<String>) -> bool {
        self.capability_tags.is_empty()
            || self.capability_tags.intersection(capability_set).next().is_some()
    }
}
