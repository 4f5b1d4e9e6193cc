// crates/fleetgraph-core/src/runtime/gate.rs
// ============================================================================
// Module: Gate Policy Engine
// Description: Gate-decision recording and policy-derived gate task
//              emission, with an idempotent candidate readiness rollup.
// ============================================================================

//! ## Overview
//! Enforcement of gate-class `-> integrated` preconditions lives in
//! `runtime::state_machine`; this module covers the other half of C7: a
//! reviewer recording a [`crate::model::GateDecision`], and the optional
//! policy engine that synthesizes gate tasks from a project's
//! [`crate::model::GatePolicy`].

use serde_json::json;

use crate::clock::Clock;
use crate::errors::ErrorCode;
use crate::errors::OperationError;
use crate::ids::GateDecisionId;
use crate::ids::ProjectId;
use crate::ids::TaskId;
use crate::interfaces::NewEvent;
use crate::interfaces::StoreTransaction;
use crate::model::CandidateRollup;
use crate::model::CandidateRollupStatus;
use crate::model::EventType;
use crate::model::GateDecision;
use crate::model::GateOutcome;
use crate::model::GateScope;
use crate::model::PolicyTrigger;
use crate::model::Task;
use crate::model::TaskState;

/// Records a gate decision.
///
/// # Errors
///
/// - [`ErrorCode::GateScopeRequired`] if neither `task_id` nor `phase_id`
///   resolves to an existing entity in the project.
/// - [`ErrorCode::DbError`] on store failure.
pub fn create_gate_decision(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    decision_id: GateDecisionId,
    project_id: ProjectId,
    gate_rule_id: Option<crate::ids::GateRuleId>,
    scope: GateScope,
    outcome: GateOutcome,
    evidence_refs: Vec<String>,
    decided_by: String,
) -> Result<GateDecision, OperationError> {
    match &scope {
        GateScope::Task(task_id) => {
            txn.get_task(task_id)
                .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
                .ok_or_else(|| {
                    OperationError::new(ErrorCode::GateScopeRequired, "scoped task does not exist")
                })?;
        }
        GateScope::Phase(phase_id) => {
            txn.get_phase(phase_id)
                .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
                .ok_or_else(|| {
                    OperationError::new(
                        ErrorCode::GateScopeRequired,
                        "scoped phase does not exist",
                    )
                })?;
        }
    }

    let decision = GateDecision {
        id: decision_id,
        project_id: project_id.clone(),
        gate_rule_id,
        scope,
        outcome,
        evidence_refs,
        decided_by: decided_by.clone(),
        decided_at: clock.now(),
    };

    txn.insert_gate_decision(&decision)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    txn.append_event(NewEvent {
        project_id,
        entity_type: "gate_decision".to_string(),
        entity_id: Some(decision.id.to_string()),
        event_type: EventType::GateDecisionRecorded,
        payload: json!({ "outcome": decision.outcome, "decided_by": decided_by }),
        caused_by: Some(decision.decided_by.clone()),
    })
    .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    Ok(decision)
}

/// Derives a candidate set's readiness rollup: `ready` iff every candidate
/// has reached a state that satisfies the trigger (`implemented` or later).
#[must_use]
pub fn candidate_rollup(candidates: &[Task]) -> CandidateRollup {
    let total_candidates = candidates.len() as i64;
    let ready_candidates = candidates
        .iter()
        .filter(|task| matches!(task.state, TaskState::Implemented | TaskState::Integrated))
        .count() as i64;
    let status = if ready_candidates == total_candidates && total_candidates > 0 {
        CandidateRollupStatus::Ready
    } else {
        CandidateRollupStatus::Blocked
    };
    CandidateRollup { status, ready_candidates, total_candidates }
}

/// Evaluates a project's gate policy, synthesizing a gate task for any
/// trigger that has tripped and is not already covered by an open,
/// identically-scoped gate task.
///
/// The synthesized task is anchored to the first candidate's phase and
/// milestone; a policy whose candidates span multiple milestones still
/// produces exactly one gate task per trigger.
///
/// # Errors
///
/// Returns [`ErrorCode::DbError`] on store failure.
pub fn evaluate_gate_policies(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    project_id: &ProjectId,
    new_gate_task_id: impl Fn() -> TaskId,
) -> Result<Vec<Task>, OperationError> {
    let Some(policy) = txn
        .get_gate_policy(project_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
    else {
        return Ok(Vec::new());
    };

    let all_tasks = txn
        .list_tasks(project_id, &crate::interfaces::TaskListFilter::default())
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    let implemented_backlog: Vec<Task> = all_tasks
        .iter()
        .filter(|task| task.state == TaskState::Implemented)
        .cloned()
        .collect();

    let mut emitted = Vec::new();

    if implemented_backlog.len() as i64 >= policy.implemented_backlog_threshold
        && !implemented_backlog.is_empty()
    {
        if let Some(task) = emit_if_not_open(
            txn,
            clock,
            project_id,
            PolicyTrigger::ImplementedBacklog,
            &implemented_backlog,
            &new_gate_task_id,
        )? {
            emitted.push(task);
        }
    }

    let risk_candidates: Vec<Task> = all_tasks
        .iter()
        .filter(|task| {
            policy.risk_task_classes.contains(&task.task_class)
                && !task.state.is_terminal()
        })
        .cloned()
        .collect();
    if !risk_candidates.is_empty() {
        #[allow(clippy::cast_precision_loss, reason = "candidate counts are small, bounded by project size")]
        let overlap_fraction = risk_candidates.len() as f64 / all_tasks.len().max(1) as f64;
        if overlap_fraction >= policy.risk_threshold {
            if let Some(task) = emit_if_not_open(
                txn,
                clock,
                project_id,
                PolicyTrigger::RiskOverlap,
                &risk_candidates,
                &new_gate_task_id,
            )? {
                emitted.push(task);
            }
        }
    }

    let now = clock.now();
    let aged: Vec<Task> = implemented_backlog
        .iter()
        .filter(|task| now.seconds_since(task.updated_at) >= policy.implemented_age_hours * 3600)
        .cloned()
        .collect();
    if !aged.is_empty() {
        if let Some(task) =
            emit_if_not_open(txn, clock, project_id, PolicyTrigger::ImplementedAgeSla, &aged, &new_gate_task_id)?
        {
            emitted.push(task);
        }
    }

    Ok(emitted)
}

/// Emits a gate task for `trigger` over `candidates` unless an identical
/// open gate task already exists, per the idempotent-evaluation contract.
fn emit_if_not_open(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    project_id: &ProjectId,
    trigger: PolicyTrigger,
    candidates: &[Task],
    new_gate_task_id: &impl Fn() -> TaskId,
) -> Result<Option<Task>, OperationError> {
    let candidate_ids: Vec<TaskId> = candidates.iter().map(|task| task.id.clone()).collect();

    if txn
        .find_open_policy_gate_task(project_id, trigger, &candidate_ids)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .is_some()
    {
        return Ok(None);
    }

    let anchor = candidates
        .first()
        .ok_or_else(|| OperationError::new(ErrorCode::DbError, "candidate set unexpectedly empty"))?;
    let now = clock.now();
    let rollup = candidate_rollup(candidates);

    let task = Task {
        id: new_gate_task_id(),
        project_id: project_id.clone(),
        phase_id: anchor.phase_id.clone(),
        milestone_id: anchor.milestone_id.clone(),
        title: format!("policy gate: {trigger:?}"),
        state: TaskState::Ready,
        priority: 0,
        work_spec: json!({
            "policy_trigger": trigger,
            "candidate_task_ids": candidate_ids,
            "rollup": rollup,
        }),
        task_class: crate::model::TaskClass::ReviewGate,
        capability_tags: std::collections::BTreeSet::new(),
        expected_touches: std::collections::BTreeSet::new(),
        exclusive_paths: std::collections::BTreeSet::new(),
        shared_paths: std::collections::BTreeSet::new(),
        introduced_in_plan_version: None,
        deprecated_in_plan_version: None,
        version: 1,
        created_at: now,
        updated_at: now,
        reviewed_by: None,
        review_evidence_refs: Vec::new(),
    };

    txn.insert_task(&task)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    Ok(Some(task))
}

#[cfg(test)]
mod tests {
    use super::candidate_rollup;
    use crate::model::CandidateRollupStatus;

    #[test]
    fn empty_candidate_set_is_blocked_not_ready() {
        let rollup = candidate_rollup(&[]);
        assert_eq!(rollup.status, CandidateRollupStatus::Blocked);
        assert_eq!(rollup.total_candidates, 0);
    }
}
