// crates/fleetgraph-core/src/runtime/plan.rs
// ============================================================================
// Module: Plan Versioning & Changeset Applier
// Description: Applies a validated changeset's operations, classifying each
//              as material or cosmetic and invalidating in-flight claims/
//              reservations on materially-touched tasks.
// ============================================================================

use serde_json::json;

use crate::clock::Clock;
use crate::errors::ErrorCode;
use crate::errors::OperationError;
use crate::ids::PlanChangeSetId;
use crate::ids::PlanVersionId;
use crate::ids::TaskId;
use crate::interfaces::NewEvent;
use crate::interfaces::StoreTransaction;
use crate::model::ChangeKind;
use crate::model::ChangeSetStatus;
use crate::model::EventType;
use crate::model::LeaseStatus;
use crate::model::PlanOperation;
use crate::model::PlanVersion;
use crate::model::ReservationStatus;
use crate::model::TaskState;

/// The result of applying a changeset.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// The changeset, now `applied`.
    pub change_set_id: PlanChangeSetId,
    /// The plan version the application produced.
    pub plan_version: PlanVersion,
    /// Tasks whose active lease was released because a material change touched them.
    pub invalidated_claim_task_ids: Vec<TaskId>,
    /// Tasks whose active reservation was released because a material change touched them.
    pub invalidated_reservation_task_ids: Vec<TaskId>,
}

/// Applies `change_set_id`'s operations within the caller's transaction.
///
/// A re-application of an already-`applied` changeset is a no-op success:
/// the stored [`PlanVersion`] is re-derived as `version_number =
/// current_plan_version(project)`, with no new invalidations, matching the
/// idempotence law in `spec` §8.
///
/// # Errors
///
/// - [`ErrorCode::ChangesetNotFound`] if the changeset does not exist.
/// - [`ErrorCode::PlanStale`] if `base_plan_version` no longer matches the
///   current version and `allow_rebase` is false.
/// - [`ErrorCode::TaskNotFound`] if an operation targets a missing task.
/// - [`ErrorCode::DbError`] on store failure.
pub fn apply_plan_changeset(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    change_set_id: &PlanChangeSetId,
    allow_rebase: bool,
    new_version_id: PlanVersionId,
    applied_by: &str,
) -> Result<ApplyOutcome, OperationError> {
    let mut change_set = txn
        .get_changeset(change_set_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .ok_or_else(|| {
            OperationError::new(ErrorCode::ChangesetNotFound, "changeset does not exist")
        })?;

    let now = clock.now();
    let current = txn
        .current_plan_version(&change_set.project_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    if change_set.status == ChangeSetStatus::Applied {
        let plan_version = PlanVersion {
            id: new_version_id,
            project_id: change_set.project_id.clone(),
            version_number: current,
            change_set_id: Some(change_set.id.clone()),
            summary: "no-op re-application of an already-applied changeset".to_string(),
            created_by: applied_by.to_string(),
            created_at: change_set.applied_at.unwrap_or(now),
        };
        return Ok(ApplyOutcome {
            change_set_id: change_set.id.clone(),
            plan_version,
            invalidated_claim_task_ids: Vec::new(),
            invalidated_reservation_task_ids: Vec::new(),
        });
    }

    if change_set.base_plan_version != current && !allow_rebase {
        return Err(OperationError::with_details(
            ErrorCode::PlanStale,
            "changeset's base plan version is behind the current version",
            json!({ "current_plan_version": current }),
        ));
    }

    let mut invalidated_claim_task_ids = Vec::new();
    let mut invalidated_reservation_task_ids = Vec::new();

    for operation in &change_set.operations {
        let task_id = operation.task_id().clone();
        let mut task = txn
            .lock_task(&task_id)
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
            .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "task does not exist"))?;

        apply_operation(operation, &mut task);
        task.updated_at = now;
        task.version += 1;

        let materially_touched = operation.classify() == ChangeKind::Material;
        if materially_touched {
            match task.state {
                TaskState::Claimed => {
                    if let Some(mut lease) = txn
                        .get_active_lease_for_task(&task_id)
                        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
                    {
                        lease.status = LeaseStatus::Released;
                        lease.released_at = Some(now);
                        txn.update_lease(&lease).map_err(|err| {
                            OperationError::new(ErrorCode::DbError, err.to_string())
                        })?;
                    }
                    task.state = TaskState::Ready;
                    invalidated_claim_task_ids.push(task_id.clone());
                }
                TaskState::Reserved => {
                    if let Some(mut reservation) =
                        txn.get_active_reservation_for_task(&task_id).map_err(|err| {
                            OperationError::new(ErrorCode::DbError, err.to_string())
                        })?
                    {
                        reservation.status = ReservationStatus::Released;
                        reservation.released_at = Some(now);
                        txn.update_reservation(&reservation).map_err(|err| {
                            OperationError::new(ErrorCode::DbError, err.to_string())
                        })?;
                    }
                    task.state = TaskState::Ready;
                    invalidated_reservation_task_ids.push(task_id.clone());
                }
                _ => {}
            }
        }

        txn.update_task(&task)
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
    }

    let version_number = change_set.target_plan_version.max(current + 1);
    let plan_version = PlanVersion {
        id: new_version_id,
        project_id: change_set.project_id.clone(),
        version_number,
        change_set_id: Some(change_set.id.clone()),
        summary: change_set.impact_preview.clone().unwrap_or_default(),
        created_by: applied_by.to_string(),
        created_at: now,
    };
    txn.insert_plan_version(&plan_version)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    change_set.status = ChangeSetStatus::Applied;
    change_set.applied_at = Some(now);
    txn.update_changeset(&change_set)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    txn.append_event(NewEvent {
        project_id: change_set.project_id.clone(),
        entity_type: "changeset".to_string(),
        entity_id: Some(change_set.id.to_string()),
        event_type: EventType::ChangesetApplied,
        payload: json!({
            "plan_version": plan_version.version_number,
            "invalidated_claim_task_ids": invalidated_claim_task_ids,
            "invalidated_reservation_task_ids": invalidated_reservation_task_ids,
        }),
        caused_by: Some(applied_by.to_string()),
    })
    .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    Ok(ApplyOutcome {
        change_set_id: change_set.id,
        plan_version,
        invalidated_claim_task_ids,
        invalidated_reservation_task_ids,
    })
}

/// Applies one operation's patch fields directly onto `task`.
fn apply_operation(operation: &PlanOperation, task: &mut crate::model::Task) {
    match operation {
        PlanOperation::ReprioritizeTask { priority, .. } => {
            task.priority = *priority;
        }
        PlanOperation::UpdateTask { patch, .. } => {
            if let Some(title) = &patch.title {
                task.title.clone_from(title);
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            if let Some(work_spec) = &patch.work_spec {
                task.work_spec = work_spec.clone();
            }
            if let Some(task_class) = patch.task_class {
                task.task_class = task_class;
            }
            if let Some(capability_tags) = &patch.capability_tags {
                task.capability_tags = capability_tags.iter().cloned().collect();
            }
            if let Some(expected_touches) = &patch.expected_touches {
                task.expected_touches = expected_touches.iter().cloned().collect();
            }
            if let Some(exclusive_paths) = &patch.exclusive_paths {
                task.exclusive_paths = exclusive_paths.iter().cloned().collect();
            }
            if let Some(shared_paths) = &patch.shared_paths {
                task.shared_paths = shared_paths.iter().cloned().collect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskPatch;

    #[test]
    fn reprioritize_classifies_as_cosmetic() {
        let op = PlanOperation::ReprioritizeTask { task_id: TaskId::new("t1"), priority: 2 };
        assert_eq!(op.classify(), ChangeKind::Cosmetic);
    }

    #[test]
    fn update_task_with_work_spec_classifies_as_material() {
        let op = PlanOperation::UpdateTask {
            task_id: TaskId::new("t1"),
            patch: TaskPatch { work_spec: Some(serde_json::json!({"objective": "y"})), ..Default::default() },
        };
        assert_eq!(op.classify(), ChangeKind::Material);
    }

    #[test]
    fn update_task_with_only_title_classifies_as_cosmetic() {
        let op = PlanOperation::UpdateTask {
            task_id: TaskId::new("t1"),
            patch: TaskPatch { title: Some("renamed".to_string()), ..Default::default() },
        };
        assert_eq!(op.classify(), ChangeKind::Cosmetic);
    }
}
