// crates/fleetgraph-core/src/runtime/lease.rs
// ============================================================================
// Module: Lease & Reservation Manager
// Description: Claim, heartbeat, assign/reserve, release, and the background
//              expiration sweep, with fencing and plan-freshness checks.
// ============================================================================

//! ## Overview
//! Every function here assumes its caller already holds the task's row lock
//! ([`crate::interfaces::StoreTransaction::lock_task`]); that is what
//! serializes concurrent claims on the same task (`spec` §5).

use rand::Rng;
use rand::rngs::OsRng;
use serde_json::json;
use time::Duration;

use crate::clock::Clock;
use crate::clock::Timestamp;
use crate::errors::ErrorCode;
use crate::errors::OperationError;
use crate::hashing;
use crate::ids::AgentId;
use crate::ids::LeaseId;
use crate::ids::ProjectId;
use crate::ids::ReservationId;
use crate::ids::TaskExecutionSnapshotId;
use crate::ids::TaskId;
use crate::interfaces::NewEvent;
use crate::interfaces::StoreTransaction;
use crate::model::EventType;
use crate::model::Lease;
use crate::model::LeaseStatus;
use crate::model::Reservation;
use crate::model::ReservationStatus;
use crate::model::Task;
use crate::model::TaskExecutionSnapshot;
use crate::model::TaskState;

/// Default lease duration (`spec` §6: default 5 minutes).
pub const DEFAULT_LEASE_DURATION: Duration = Duration::seconds(300);

/// Generates a high-entropy opaque lease token (32 random bytes, hex-encoded).
fn generate_token() -> String {
    let mut bytes = [0_u8; 32];
    OsRng.fill(&mut bytes);
    hashing::hash_bytes(&bytes)
}

/// The result of a successful claim: the task in its new state, the fresh
/// lease, and the work-spec snapshot captured alongside it.
#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    /// The claimed task.
    pub task: Task,
    /// The newly created lease.
    pub lease: Lease,
    /// The snapshot captured atomically with the lease.
    pub snapshot: TaskExecutionSnapshot,
}

/// Claims a task for `agent_id`, creating a lease and a work-spec snapshot.
///
/// # Errors
///
/// - [`ErrorCode::TaskNotFound`] if the task is absent or project-mismatched.
/// - [`ErrorCode::TaskNotClaimable`] unless the task is `ready` or `reserved`.
/// - [`ErrorCode::LeaseExists`] if an active lease already exists.
/// - [`ErrorCode::ReservationConflict`] if an active reservation names a
///   different agent.
/// - [`ErrorCode::DbError`] on store failure.
#[allow(clippy::too_many_arguments)]
pub fn claim_task(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    lease_duration: Duration,
    project_id: &ProjectId,
    task_id: &TaskId,
    agent_id: &AgentId,
    lease_id: LeaseId,
    snapshot_id: TaskExecutionSnapshotId,
) -> Result<ClaimOutcome, OperationError> {
    let mut task = txn
        .lock_task(task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "task does not exist"))?;
    if &task.project_id != project_id {
        return Err(OperationError::new(ErrorCode::TaskNotFound, "task does not exist"));
    }
    if !matches!(task.state, TaskState::Ready | TaskState::Reserved) {
        return Err(OperationError::new(
            ErrorCode::TaskNotClaimable,
            "task is not in a claimable state",
        ));
    }
    if txn
        .get_active_lease_for_task(task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .is_some()
    {
        return Err(OperationError::new(ErrorCode::LeaseExists, "an active lease already exists"));
    }

    let mut consumed_reservation = None;
    if let Some(mut reservation) = txn
        .get_active_reservation_for_task(task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
    {
        if &reservation.assignee_agent_id != agent_id {
            return Err(OperationError::new(
                ErrorCode::ReservationConflict,
                "task is reserved for a different agent",
            ));
        }
        reservation.status = ReservationStatus::Consumed;
        reservation.released_at = Some(clock.now());
        consumed_reservation = Some(reservation);
    }

    let now = clock.now();
    let fencing_counter = txn
        .max_fencing_counter(task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        + 1;

    let lease = Lease {
        id: lease_id,
        project_id: project_id.clone(),
        task_id: task_id.clone(),
        agent_id: agent_id.clone(),
        token: generate_token(),
        status: LeaseStatus::Active,
        expires_at: now + lease_duration,
        heartbeat_at: now,
        fencing_counter,
        created_at: now,
        released_at: None,
    };

    let current_plan_version = txn
        .current_plan_version(project_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
    let work_spec_hash = hashing::hash_canonical_json(&task.work_spec)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    let snapshot = TaskExecutionSnapshot {
        id: snapshot_id,
        project_id: project_id.clone(),
        task_id: task_id.clone(),
        lease_id: lease.id.clone(),
        captured_plan_version: current_plan_version,
        work_spec_hash,
        work_spec_payload: task.work_spec.clone(),
        captured_by: agent_id.to_string(),
        captured_at: now,
    };

    task.state = TaskState::Claimed;
    task.updated_at = now;
    task.version += 1;

    txn.insert_lease(&lease)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
    txn.insert_snapshot(&snapshot)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
    if let Some(reservation) = &consumed_reservation {
        txn.update_reservation(reservation)
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
    }
    txn.update_task(&task)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    txn.append_event(NewEvent {
        project_id: project_id.clone(),
        entity_type: "task".to_string(),
        entity_id: Some(task.id.to_string()),
        event_type: EventType::TaskStateTransitioned,
        payload: json!({
            "from_state": if consumed_reservation.is_some() { "reserved" } else { "ready" },
            "to_state": "claimed",
            "actor": agent_id.to_string(),
        }),
        caused_by: Some(agent_id.to_string()),
    })
    .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    Ok(ClaimOutcome { task, lease, snapshot })
}

/// The result of a successful heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    /// The lease with its extended expiry.
    pub lease: Lease,
    /// The project's current plan version at heartbeat time.
    pub current_plan_version: i64,
}

/// Extends an active lease's expiry. Idempotent across repeated calls with
/// the same token: it never mutates `fencing_counter`.
///
/// # Errors
///
/// - [`ErrorCode::PlanStale`] if `seen_plan_version` is behind the current version.
/// - [`ErrorCode::LeaseInvalid`] if no matching active lease exists.
/// - [`ErrorCode::DbError`] on store failure.
pub fn heartbeat_task(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    lease_duration: Duration,
    project_id: &ProjectId,
    task_id: &TaskId,
    agent_id: &AgentId,
    token: &str,
    seen_plan_version: Option<i64>,
) -> Result<HeartbeatOutcome, OperationError> {
    let current_plan_version = txn
        .current_plan_version(project_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    if let Some(seen) = seen_plan_version {
        if seen < current_plan_version {
            return Err(OperationError::with_details(
                ErrorCode::PlanStale,
                "caller's plan version is behind the current version",
                json!({ "current_plan_version": current_plan_version }),
            ));
        }
    }

    txn.lock_task(task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "task does not exist"))?;

    let mut lease = txn
        .get_active_lease_by_token(task_id, agent_id.as_str(), token)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .ok_or_else(|| OperationError::new(ErrorCode::LeaseInvalid, "no matching active lease"))?;

    let now = clock.now();
    if lease.expires_at.is_before(now) {
        return Err(OperationError::new(ErrorCode::LeaseInvalid, "lease has already expired"));
    }

    lease.heartbeat_at = now;
    lease.expires_at = now + lease_duration;
    txn.update_lease(&lease)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    Ok(HeartbeatOutcome { lease, current_plan_version })
}

/// Creates a hard reservation naming `assignee_agent_id` as the only agent
/// permitted to claim the task.
///
/// # Errors
///
/// - [`ErrorCode::TaskNotFound`] if the task is absent or project-mismatched.
/// - [`ErrorCode::TaskNotAssignable`] unless the task is `ready` or `reserved`.
/// - [`ErrorCode::LeaseExists`] / [`ErrorCode::ReservationExists`] if either
///   already holds the task.
/// - [`ErrorCode::DbError`] on store failure.
pub fn assign_task(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    ttl: Duration,
    project_id: &ProjectId,
    task_id: &TaskId,
    assignee_agent_id: &AgentId,
    created_by: &AgentId,
    reservation_id: ReservationId,
) -> Result<(Task, Reservation), OperationError> {
    let mut task = txn
        .lock_task(task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "task does not exist"))?;
    if &task.project_id != project_id {
        return Err(OperationError::new(ErrorCode::TaskNotFound, "task does not exist"));
    }
    if !matches!(task.state, TaskState::Ready | TaskState::Reserved) {
        return Err(OperationError::new(
            ErrorCode::TaskNotAssignable,
            "task is not in an assignable state",
        ));
    }
    if txn
        .get_active_lease_for_task(task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .is_some()
    {
        return Err(OperationError::new(ErrorCode::LeaseExists, "an active lease already exists"));
    }
    if txn
        .get_active_reservation_for_task(task_id)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        .is_some()
    {
        return Err(OperationError::new(
            ErrorCode::ReservationExists,
            "an active reservation already exists",
        ));
    }

    let now = clock.now();
    let reservation = Reservation {
        id: reservation_id,
        project_id: project_id.clone(),
        task_id: task_id.clone(),
        assignee_agent_id: assignee_agent_id.clone(),
        status: ReservationStatus::Active,
        ttl_seconds: ttl.whole_seconds(),
        expires_at: now + ttl,
        created_by: created_by.clone(),
        created_at: now,
        released_at: None,
    };

    task.state = TaskState::Reserved;
    task.updated_at = now;
    task.version += 1;

    txn.insert_reservation(&reservation)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
    txn.update_task(&task)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

    Ok((task, reservation))
}

/// Sweeps every expired lease/reservation, releasing the task (`claimed`/
/// `in_progress -> ready` on lease expiry) and emitting the corresponding
/// event. Intended to run on a single-writer periodic schedule (cadence
/// <= 30 s), guarded by an advisory lock at the caller level.
///
/// # Errors
///
/// Returns [`ErrorCode::DbError`] on store failure.
pub fn sweep_expired(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
) -> Result<SweepReport, OperationError> {
    let now = clock.now();
    let mut report = SweepReport::default();

    for mut lease in txn
        .list_expired_leases(now)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
    {
        lease.status = LeaseStatus::Expired;
        lease.released_at = Some(now);
        txn.update_lease(&lease)
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;

        if let Some(mut task) = txn
            .lock_task(&lease.task_id)
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
        {
            if matches!(task.state, TaskState::Claimed | TaskState::InProgress) {
                let from = task.state;
                task.state = TaskState::Ready;
                task.updated_at = now;
                task.version += 1;
                txn.update_task(&task)
                    .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
                txn.append_event(NewEvent {
                    project_id: lease.project_id.clone(),
                    entity_type: "lease".to_string(),
                    entity_id: Some(lease.id.to_string()),
                    event_type: EventType::LeaseExpired,
                    payload: json!({ "task_id": task.id.to_string(), "from_state": from }),
                    caused_by: Some("system".to_string()),
                })
                .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
            }
        }
        report.leases_expired += 1;
    }

    for mut reservation in txn
        .list_expired_reservations(now)
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?
    {
        reservation.status = ReservationStatus::Expired;
        reservation.released_at = Some(now);
        txn.update_reservation(&reservation)
            .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
        txn.append_event(NewEvent {
            project_id: reservation.project_id.clone(),
            entity_type: "reservation".to_string(),
            entity_id: Some(reservation.id.to_string()),
            event_type: EventType::ReservationExpired,
            payload: json!({ "task_id": reservation.task_id.to_string() }),
            caused_by: Some("system".to_string()),
        })
        .map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))?;
        report.reservations_expired += 1;
    }

    Ok(report)
}

/// A summary of one expiration sweep pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    /// Count of leases marked `expired` this pass.
    pub leases_expired: u64,
    /// Count of reservations marked `expired` this pass.
    pub reservations_expired: u64,
}

#[cfg(test)]
mod tests {
    use super::generate_token;

    #[test]
    fn tokens_are_high_entropy_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
