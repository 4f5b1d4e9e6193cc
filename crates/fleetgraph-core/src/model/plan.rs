// crates/fleetgraph-core/src/model/plan.rs
// ============================================================================
// Module: PlanVersion / PlanChangeSet
// Description: Versioned, transactional mutation of a project's plan.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::PlanChangeSetId;
use crate::ids::PlanVersionId;
use crate::ids::ProjectId;
use crate::ids::TaskId;
use crate::model::task::TaskClass;
use crate::model::task::WorkSpec;

/// A point-in-time plan version. `version_number` is strictly increasing per
/// project and starts at 1 at project creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanVersion {
    /// Unique identifier.
    pub id: PlanVersionId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Strictly increasing per-project sequence number.
    pub version_number: i64,
    /// The changeset that produced this version, if any (absent for v1).
    pub change_set_id: Option<PlanChangeSetId>,
    /// Free-form human summary of what changed.
    pub summary: String,
    /// Identity of the caller who created this version.
    pub created_by: String,
    /// Creation instant.
    pub created_at: Timestamp,
}

/// Lifecycle status of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    /// Created but not yet validated or applied.
    Draft,
    /// Validated against the current plan but not yet applied.
    Validated,
    /// Applied; produced a new `PlanVersion`.
    Applied,
    /// Rejected; will never be applied.
    Rejected,
}

/// Whether an operation mutates work definition (material) or only labels
/// (cosmetic). Material changes invalidate in-flight claims/reservations on
/// the affected task; cosmetic changes never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Mutates `work_spec`, `task_class`, capability tags, or paths.
    Material,
    /// Mutates only labels or priority.
    Cosmetic,
}

/// Patchable fields of a task, as carried by an `update_task` operation.
/// Every field is optional: absent means "leave unchanged".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title, if changing (cosmetic).
    pub title: Option<String>,
    /// New description, if changing (cosmetic; carried in `work_spec.description`
    /// by convention, but tracked separately here for classification purposes).
    pub description: Option<String>,
    /// New priority, if changing (cosmetic).
    pub priority: Option<i32>,
    /// New work spec, if changing (material).
    pub work_spec: Option<WorkSpec>,
    /// New task class, if changing (material).
    pub task_class: Option<TaskClass>,
    /// New capability tags, if changing (material).
    pub capability_tags: Option<Vec<String>>,
    /// New expected-touches paths, if changing (material).
    pub expected_touches: Option<Vec<String>>,
    /// New exclusive paths, if changing (material).
    pub exclusive_paths: Option<Vec<String>>,
    /// New shared paths, if changing (material).
    pub shared_paths: Option<Vec<String>>,
}

impl TaskPatch {
    /// Returns true iff this patch touches at least one material field.
    #[must_use]
    pub const fn is_material(&self) -> bool {
        self.work_spec.is_some()
            || self.task_class.is_some()
            || self.capability_tags.is_some()
            || self.expected_touches.is_some()
            || self.exclusive_paths.is_some()
            || self.shared_paths.is_some()
    }
}

/// A single mutation within a changeset.
///
/// Classification is not defaultable: every variant must declare its own
/// [`ChangeKind`] via [`PlanOperation::classify`], so a new variant that
/// forgets to update the match arm fails to compile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanOperation {
    /// Patch a task's scheduling priority. Always cosmetic.
    ReprioritizeTask {
        /// The task to reprioritize.
        task_id: TaskId,
        /// The new priority value.
        priority: i32,
    },
    /// Patch one or more fields of a task. Material iff any material field
    /// is present in `patch`.
    UpdateTask {
        /// The task to update.
        task_id: TaskId,
        /// The fields to patch.
        patch: TaskPatch,
    },
}

impl PlanOperation {
    /// The task this operation targets.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::ReprioritizeTask { task_id, .. } | Self::UpdateTask { task_id, .. } => task_id,
        }
    }

    /// Classifies this operation as material or cosmetic.
    #[must_use]
    pub fn classify(&self) -> ChangeKind {
        match self {
            Self::ReprioritizeTask { .. } => ChangeKind::Cosmetic,
            Self::UpdateTask { patch, .. } => {
                if patch.is_material() {
                    ChangeKind::Material
                } else {
                    ChangeKind::Cosmetic
                }
            }
        }
    }
}

/// A versioned, transactional set of plan mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanChangeSet {
    /// Unique identifier.
    pub id: PlanChangeSetId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The plan version this changeset was authored against.
    pub base_plan_version: i64,
    /// The plan version the author intended to produce.
    pub target_plan_version: i64,
    /// Lifecycle status.
    pub status: ChangeSetStatus,
    /// Ordered list of mutations to apply.
    pub operations: Vec<PlanOperation>,
    /// A human-readable preview of expected impact.
    pub impact_preview: Option<String>,
    /// Identity of the caller who created this changeset.
    pub created_by: String,
    /// Instant the changeset was applied, if it has been.
    pub applied_at: Option<Timestamp>,
}
