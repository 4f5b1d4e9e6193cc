// crates/fleetgraph-core/src/model/api_key.rs
// ============================================================================
// Module: ApiKey
// Description: Project-scoped bearer credentials for the auth kernel.
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::clock::Timestamp;
use crate::ids::ApiKeyId;

/// A role a key may be scoped to. The auth kernel's role check is
/// "caller has any role in the endpoint's required set, or `admin`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May author plan changesets and create tasks/dependencies.
    Planner,
    /// May claim, heartbeat, and advance tasks (a worker agent).
    Agent,
    /// May record gate decisions.
    Reviewer,
    /// May perform forced/administrative transitions and manage keys.
    Operator,
    /// Satisfies every role check unconditionally.
    Admin,
}

/// Lifecycle status of an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    /// Usable for authentication.
    Active,
    /// Permanently disabled; lookups never succeed again.
    Revoked,
}

/// A project-scoped (or global, via [`ApiKeyScope::Global`]) bearer
/// credential. The raw secret is never persisted, only its SHA-256 hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique identifier.
    pub id: ApiKeyId,
    /// The project this key is scoped to, or `Global` for `"*"`.
    pub scope: ApiKeyScope,
    /// Human-readable label.
    pub name: String,
    /// SHA-256 hex digest of the raw token. The raw token itself is never stored.
    pub hash: String,
    /// Current status.
    pub status: ApiKeyStatus,
    /// Roles granted to this key.
    pub role_scopes: BTreeSet<Role>,
    /// Identity of the caller who created this key.
    pub created_by: String,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Instant this key last successfully authenticated a request.
    pub last_used_at: Option<Timestamp>,
    /// Instant this key was revoked, if it has been.
    pub revoked_at: Option<Timestamp>,
}

/// The project scope of an API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyScope {
    /// Scoped to exactly one project.
    Project(crate::ids::ProjectId),
    /// Valid across every project (`"*"` in the wire format).
    Global,
}
