// crates/fleetgraph-core/src/model/project.rs
// ============================================================================
// Module: Project / Phase / Milestone
// Description: The tenancy root and its hierarchical labels.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::MilestoneId;
use crate::ids::PhaseId;
use crate::ids::ProjectId;

/// Lifecycle status of a project. Projects are never deleted, only archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Accepting new tasks and mutations.
    Active,
    /// Frozen: reads succeed, mutations are rejected by the transport shell.
    Paused,
    /// Permanently closed; retained for history.
    Archived,
}

/// The root of all tenancy. Every other entity is owned, directly or
/// transitively, by exactly one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: ProjectStatus,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last-mutation instant.
    pub updated_at: Timestamp,
}

/// A top-level grouping within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// Unique identifier.
    pub id: PhaseId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Display name.
    pub name: String,
    /// Ordering position, unique among sibling phases in the project.
    pub sequence: i64,
}

/// A milestone nested under a phase. Tasks are nested under milestones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    /// Unique identifier.
    pub id: MilestoneId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Parent phase. Milestones always require a phase parent.
    pub phase_id: PhaseId,
    /// Display name.
    pub name: String,
    /// Ordering position, unique among sibling milestones in the phase.
    pub sequence: i64,
}
