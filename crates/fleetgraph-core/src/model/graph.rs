// crates/fleetgraph-core/src/model/graph.rs
// ============================================================================
// Module: DependencyEdge
// Description: A directed predecessor/successor edge between two tasks.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::DependencyEdgeId;
use crate::ids::ProjectId;
use crate::ids::TaskId;

/// The predecessor state that releases a successor for readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockOn {
    /// The successor may become ready once the predecessor is `implemented`.
    Implemented,
    /// The successor requires the predecessor to be `integrated`.
    Integrated,
}

/// A directed dependency edge: `from` must satisfy `unlock_on` before `to`
/// can become ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Unique identifier.
    pub id: DependencyEdgeId,
    /// Owning project. Both endpoints must belong to it.
    pub project_id: ProjectId,
    /// Predecessor task.
    pub from_task_id: TaskId,
    /// Successor task.
    pub to_task_id: TaskId,
    /// The predecessor state required to unlock the successor.
    pub unlock_on: UnlockOn,
}
