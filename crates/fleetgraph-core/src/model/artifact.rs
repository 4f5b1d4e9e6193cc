// crates/fleetgraph-core/src/model/artifact.rs
// ============================================================================
// Module: Artifact
// Description: A content reference attached to a task as produced evidence.
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::ArtifactId;
use crate::ids::ProjectId;
use crate::ids::TaskId;

/// A reference to something an agent produced while working a task: a diff,
/// a log, a rendered report. The engine stores only the reference and its
/// hash, never the content itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique identifier.
    pub id: ArtifactId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The task this artifact was produced for.
    pub task_id: TaskId,
    /// Free-form label for the artifact's nature (e.g. `"diff"`, `"log"`).
    pub kind: String,
    /// Where the content can be retrieved (opaque to the engine).
    pub uri: String,
    /// SHA-256 hex digest of the referenced content, for integrity checking.
    pub content_hash: String,
    /// Identity of the agent or operator that created this artifact.
    pub created_by: String,
    /// Creation instant.
    pub created_at: Timestamp,
}
