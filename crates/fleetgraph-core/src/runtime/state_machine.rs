// crates/fleetgraph-core/src/runtime/state_machine.rs
// ============================================================================
// Module: Task State Machine
// Description: Allowed transitions, review/gate preconditions, forced
//              overrides, and the lease/reservation invalidation side
//              effects that accompany certain transitions.
// ============================================================================

//! ## Overview
//! [`transition_task`] is the only path that may change [`crate::model::TaskState`].
//! It enforces the adjacency table, the review/gate preconditions guarding
//! `-> integrated`, and releases any lease/reservation the transition leaves
//! behind. A single `task_state_transitioned` event is appended per call.

use serde_json::json;

use crate::clock::Clock;
use crate::errors::ErrorCode;
use crate::errors::OperationError;
use crate::ids::ProjectId;
use crate::ids::TaskId;
use crate::interfaces::NewEvent;
use crate::interfaces::StoreTransaction;
use crate::model::EventType;
use crate::model::GateScope;
use crate::model::LeaseStatus;
use crate::model::ReservationStatus;
use crate::model::Task;
use crate::model::TaskClass;
use crate::model::TaskState;

/// Returns the set of states reachable from `from` by a non-forced
/// transition.
#[must_use]
pub fn allowed_next_states(from: TaskState) -> &'static [TaskState] {
    use TaskState::{
        Abandoned, Backlog, Blocked, Cancelled, Claimed, Conflict, Implemented, InProgress,
        Integrated, Ready, Reserved,
    };
    match from {
        Backlog => &[Ready],
        Ready => &[Reserved, Claimed, Blocked, Cancelled, Abandoned],
        Reserved => &[Claimed, Ready, Cancelled],
        Claimed => &[InProgress, Ready, Blocked, Conflict],
        InProgress => &[Implemented, Blocked, Conflict, Ready],
        Implemented => &[Integrated, Conflict, Ready],
        Conflict => &[InProgress, Blocked, Abandoned],
        Blocked => &[Ready, Abandoned, Cancelled],
        Integrated | Abandoned | Cancelled => &[],
    }
}

/// Request to transition a task's state.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    /// Owning project.
    pub project_id: ProjectId,
    /// The task to transition.
    pub task_id: TaskId,
    /// The requested destination state.
    pub to: TaskState,
    /// Free-form reason recorded on the event.
    pub reason: Option<String>,
    /// Identity performing the transition.
    pub actor: String,
    /// Reviewer identity, required when transitioning to `integrated`.
    pub reviewed_by: Option<String>,
    /// Evidence references backing the review, required for `integrated`.
    pub review_evidence_refs: Vec<String>,
    /// Bypasses the adjacency check and review/gate preconditions. Reserved
    /// for operator-driven historical backfill.
    pub force: bool,
}

/// The outcome of a successful transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The task in its new state.
    pub task: Task,
    /// Whether an active lease was released as a side effect.
    pub lease_released: bool,
    /// Whether an active reservation was released as a side effect.
    pub reservation_released: bool,
}

/// Transitions a task, enforcing adjacency and review/gate preconditions
/// unless `request.force` is set, and releasing any lease/reservation the
/// destination state leaves behind.
///
/// # Errors
///
/// - [`ErrorCode::TaskNotFound`] if the task does not exist in the project.
/// - [`ErrorCode::InvalidStateTransition`] if `to` is not adjacency-reachable
///   from the task's current state and `force` is false.
/// - [`ErrorCode::ReviewRequiredForIntegration`], [`ErrorCode::SelfReviewNotAllowed`],
///   [`ErrorCode::ReviewEvidenceRequired`], [`ErrorCode::GateDecisionRequired`]
///   for an unmet `-> integrated` precondition.
/// - [`ErrorCode::DbError`] on store failure.
pub fn transition_task(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    request: TransitionRequest,
) -> Result<TransitionOutcome, OperationError> {
    let mut task = txn
        .lock_task(&request.task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "task does not exist"))?;
    if task.project_id != request.project_id {
        return Err(OperationError::new(ErrorCode::TaskNotFound, "task does not exist"));
    }

    let from = task.state;

    if !request.force && !allowed_next_states(from).contains(&request.to) {
        return Err(OperationError::new(
            ErrorCode::InvalidStateTransition,
            format!("{from:?} -> {:?} is not an allowed transition", request.to),
        ));
    }

    if request.to == TaskState::Integrated && !request.force {
        enforce_integration_preconditions(txn, &task, &request)?;
    }

    if request.to == TaskState::Integrated {
        task.reviewed_by = request.reviewed_by.clone();
        task.review_evidence_refs = request.review_evidence_refs.clone();
    }

    let now = clock.now();
    let lease_released = release_lease_if_leaving(txn, &task, from, request.to, now)?;
    let reservation_released =
        release_reservation_if_leaving(txn, &task, from, request.to, now)?;

    task.state = request.to;
    task.updated_at = now;
    task.version += 1;
    txn.update_task(&task)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    txn.append_event(NewEvent {
        project_id: request.project_id.clone(),
        entity_type: "task".to_string(),
        entity_id: Some(task.id.to_string()),
        event_type: EventType::TaskStateTransitioned,
        payload: json!({
            "from_state": from,
            "to_state": request.to,
            "reason": request.reason,
            "actor": request.actor,
            "reviewed_by": task.reviewed_by,
            "evidence_refs": task.review_evidence_refs,
            "forced": request.force,
        }),
        caused_by: Some(request.actor.clone()),
    })
    .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    Ok(TransitionOutcome { task, lease_released, reservation_released })
}

/// Checks the four `-> integrated` preconditions (`spec` §4.2).
fn enforce_integration_preconditions(
    txn: &mut dyn StoreTransaction,
    task: &Task,
    request: &TransitionRequest,
) -> Result<(), OperationError> {
    let reviewed_by = request.reviewed_by.as_deref().ok_or_else(|| {
        OperationError::new(
            ErrorCode::ReviewRequiredForIntegration,
            "integration requires a reviewed_by identity",
        )
    })?;

    if reviewed_by == request.actor {
        return Err(OperationError::new(
            ErrorCode::SelfReviewNotAllowed,
            "the acting agent may not review its own task",
        ));
    }

    if request.review_evidence_refs.is_empty() {
        return Err(OperationError::new(
            ErrorCode::ReviewEvidenceRequired,
            "integration requires at least one evidence reference",
        ));
    }

    if task.task_class.requires_gate_decision() {
        let decisions = txn
            .list_gate_decisions(&task.project_id, Some(&GateScope::Task(task.id.clone())))
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
        let cleared = decisions.iter().any(|decision| decision.outcome.clears_integration());
        if !cleared {
            return Err(OperationError::new(
                ErrorCode::GateDecisionRequired,
                "gate-class tasks require an approving gate decision before integration",
            ));
        }
    }

    Ok(())
}

/// Releases the active lease on `task` if the transition leaves `claimed`/
/// `in_progress` for a state other than those two.
fn release_lease_if_leaving(
    txn: &mut dyn StoreTransaction,
    task: &Task,
    from: TaskState,
    to: TaskState,
    now: crate::clock::Timestamp,
) -> Result<bool, OperationError> {
    let leaving_active_execution = matches!(from, TaskState::Claimed | TaskState::InProgress)
        && !matches!(to, TaskState::Claimed | TaskState::InProgress);
    if !leaving_active_execution {
        return Ok(false);
    }
    if let Some(mut lease) = txn
        .get_active_lease_for_task(&task.id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
    {
        lease.status = LeaseStatus::Released;
        lease.released_at = Some(now);
        txn.update_lease(&lease)
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
        return Ok(true);
    }
    Ok(false)
}

/// Releases the active reservation on `task` if the transition leaves
/// `reserved` for any state (a matching claim already consumed it and will
/// not find an `active` row here).
fn release_reservation_if_leaving(
    txn: &mut dyn StoreTransaction,
    task: &Task,
    from: TaskState,
    to: TaskState,
    now: crate::clock::Timestamp,
) -> Result<bool, OperationError> {
    if from != TaskState::Reserved || to == TaskState::Reserved {
        return Ok(false);
    }
    if let Some(mut reservation) = txn
        .get_active_reservation_for_task(&task.id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
    {
        reservation.status = ReservationStatus::Released;
        reservation.released_at = Some(now);
        txn.update_reservation(&reservation)
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
        return Ok(true);
    }
    Ok(false)
}

/// Returns true if `class` ever requires a decision before integration.
/// Thin re-export for callers that only need the classification, not a
/// full transition (e.g. UI hinting in a transport shell).
#[must_use]
pub const fn is_gate_class(class: TaskClass) -> bool {
    class.requires_gate_decision()
}

#[cfg(test)]
mod tests {
    use super::allowed_next_states;
    use crate::model::TaskState;

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        assert!(allowed_next_states(TaskState::Integrated).is_empty());
        assert!(allowed_next_states(TaskState::Abandoned).is_empty());
        assert!(allowed_next_states(TaskState::Cancelled).is_empty());
    }

    #[test]
    fn ready_may_move_to_reserved_or_claimed() {
        let next = allowed_next_states(TaskState::Ready);
        assert!(next.contains(&TaskState::Reserved));
        assert!(next.contains(&TaskState::Claimed));
        assert!(!next.contains(&TaskState::Integrated));
    }

    #[test]
    fn implemented_may_move_to_integrated() {
        assert!(allowed_next_states(TaskState::Implemented).contains(&TaskState::Integrated));
    }
}
