// crates/fleetgraph-core/src/errors.rs
// ============================================================================
// Module: Fleetgraph Error Taxonomy
// Description: The stable error-code envelope every operation fails with.
// Purpose: Give transport shells one shape to map onto HTTP/RPC statuses.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every operation in [`crate::runtime::service`] returns
//! `Result<_, OperationError>`. `OperationError` wraps one [`ErrorCode`] from
//! the canonical taxonomy; it never leaks a backend driver error verbatim
//! (those collapse to [`ErrorCode::DbError`]).

use std::fmt;

use serde::Serialize;

/// The stable, programmatically-matchable error code for an operation
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Not found.
    /// Referenced project does not exist.
    ProjectNotFound,
    /// Referenced task does not exist (or not in this project).
    TaskNotFound,
    /// Referenced changeset does not exist.
    ChangesetNotFound,
    /// Referenced gate rule does not exist.
    GateRuleNotFound,
    /// Referenced integration attempt does not exist.
    IntegrationAttemptNotFound,
    /// Referenced metrics job run does not exist.
    RunNotFound,
    /// Referenced alert does not exist.
    AlertNotFound,

    // Validation / invariant.
    /// The requested edge would create (or is) a cycle.
    CycleDetected,
    /// Referenced entities do not all belong to the same project.
    ProjectMismatch,
    /// A required parent identifier was not supplied.
    IdentifierParentRequired,
    /// A milestone's phase does not match its task's phase.
    PhaseMilestoneMismatch,
    /// An entity's state field holds a value outside its allowed set.
    InvalidState,
    /// The requested transition is not adjacency-allowed from the current state.
    InvalidStateTransition,
    /// The requested state is not reachable at all from here.
    StateNotAllowed,
    /// An integration attempt status value is not recognized.
    InvalidCheckStatus,
    /// An integration attempt result value is not recognized.
    InvalidIntegrationResult,
    /// An event payload could not be interpreted by the materializer.
    InvalidEventPayload,
    /// A gate rule's declared type is not recognized.
    InvalidGateType,
    /// A gate decision outcome is not recognized.
    InvalidGateOutcome,
    /// A gate decision did not reference exactly one of task/phase.
    GateScopeRequired,
    /// A monotonic sequence/version check failed.
    SequenceConflict,
    /// A supplied reservation TTL fell outside the accepted `60..=86400` range.
    ReservationTtlOutOfRange,

    // Concurrency / lifecycle.
    /// An active lease already exists on the task.
    LeaseExists,
    /// The supplied lease token does not match an active lease.
    LeaseInvalid,
    /// An active reservation is held by a different agent.
    ReservationConflict,
    /// An active reservation already exists on the task.
    ReservationExists,
    /// The task's current state does not permit claiming.
    TaskNotClaimable,
    /// The task's current state does not permit reservation.
    TaskNotAssignable,

    // Review / gate.
    /// Integration requires `reviewed_by` to be set.
    ReviewRequiredForIntegration,
    /// Integration requires non-empty `review_evidence_refs`.
    ReviewEvidenceRequired,
    /// The reviewer may not be the same actor performing the transition.
    SelfReviewNotAllowed,
    /// A gate-class task requires an approving `GateDecision`.
    GateDecisionRequired,

    // Plan freshness.
    /// The caller's `seen_plan_version` is behind the project's current version.
    PlanStale,

    // Auth.
    /// No credential was supplied.
    AuthMissing,
    /// The supplied credential does not resolve to an active key.
    AuthInvalid,
    /// The caller's roles do not satisfy the endpoint's required role set.
    InsufficientRole,
    /// The caller's key is scoped to a different project.
    ProjectScopeViolation,
    /// A role name in a request is not a recognized role.
    InvalidRoles,

    // System.
    /// An underlying storage failure; message is generic, cause logged internally.
    DbError,
}

impl ErrorCode {
    /// Returns whether a caller may usefully retry the operation unchanged.
    ///
    /// Only `PLAN_STALE` is retryable; every other code reflects either a
    /// permanent mismatch or a caller error.
    #[must_use]
    pub const fn retryable(self) -> bool {
        matches!(self, Self::PlanStale)
    }

    /// Returns the HTTP status a transport shell should map this code onto.
    ///
    /// `fleetgraph` never serves HTTP itself (`spec` §1 treats the
    /// transport shell as an external collaborator); this mapping is
    /// carried as plain data for the benefit of whatever shell is layered
    /// on top, per `spec` §7's status table.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ProjectNotFound
            | Self::TaskNotFound
            | Self::ChangesetNotFound
            | Self::GateRuleNotFound
            | Self::IntegrationAttemptNotFound
            | Self::RunNotFound
            | Self::AlertNotFound => 404,

            Self::CycleDetected
            | Self::ProjectMismatch
            | Self::IdentifierParentRequired
            | Self::PhaseMilestoneMismatch
            | Self::InvalidState
            | Self::InvalidStateTransition
            | Self::StateNotAllowed
            | Self::InvalidCheckStatus
            | Self::InvalidIntegrationResult
            | Self::InvalidEventPayload
            | Self::InvalidGateType
            | Self::InvalidGateOutcome
            | Self::GateScopeRequired
            | Self::SequenceConflict
            | Self::ReservationTtlOutOfRange
            | Self::LeaseExists
            | Self::LeaseInvalid
            | Self::ReservationConflict
            | Self::ReservationExists
            | Self::TaskNotClaimable
            | Self::TaskNotAssignable
            | Self::ReviewRequiredForIntegration
            | Self::ReviewEvidenceRequired
            | Self::SelfReviewNotAllowed
            | Self::GateDecisionRequired
            | Self::PlanStale => 409,

            Self::AuthMissing | Self::AuthInvalid => 401,

            Self::InsufficientRole | Self::ProjectScopeViolation | Self::InvalidRoles => 403,

            Self::DbError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_value(self).unwrap_or_default();
        match json.as_str() {
            Some(s) => f.write_str(s),
            None => f.write_str("UNKNOWN_ERROR"),
        }
    }
}

/// The envelope every operation fails with: one code, a human-readable
/// message, a retryability flag, and optional structured details (e.g.
/// `PLAN_STALE`'s `current_plan_version`).
#[derive(Debug, Clone, Serialize)]
pub struct OperationError {
    /// The stable error code.
    pub code: ErrorCode,
    /// A human-readable message; never a raw backend driver message.
    pub message: String,
    /// Whether the caller may usefully retry unchanged.
    pub retryable: bool,
    /// Optional structured details, e.g. `{"current_plan_version": 2}`.
    pub details: Option<serde_json::Value>,
}

impl OperationError {
    /// Builds an error with no structured details.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable(),
            details: None,
        }
    }

    /// Builds an error carrying structured details.
    #[must_use]
    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            details: Some(details),
            ..Self::new(code, message)
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for OperationError {}
