//! Claim/heartbeat/dependency/cycle/reservation behavior (`spec` §8 seed
//! scenarios 1 and 2, plus their surrounding invariants and boundary
//! behaviors).

use std::collections::BTreeSet;

use fleetgraph_core::errors::ErrorCode;
use fleetgraph_core::ids::AgentId;
use fleetgraph_core::model::TaskState;
use fleetgraph_core::model::UnlockOn;
use fleetgraph_core::runtime::state_machine::TransitionRequest;

use crate::helpers::fixtures::create_task;
use crate::helpers::fixtures::seeded_project;

#[test]
fn claim_then_heartbeat_extends_lease() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    let agent = AgentId::new("a");

    let ready = seeded
        .orchestrator
        .get_ready_tasks(&seeded.project_id, &agent, &BTreeSet::new())
        .expect("ready tasks");
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, task.id);

    let (claimed, lease, snapshot) =
        seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &agent).expect("claim");
    assert_eq!(claimed.state, TaskState::Claimed);
    assert_eq!(snapshot.captured_plan_version, 1);
    let first_expiry = lease.expires_at;

    seeded.clock.advance(120);
    let (heartbeat_lease, current_plan_version) = seeded
        .orchestrator
        .heartbeat_task(&seeded.project_id, &task.id, &agent, &lease.token, Some(1))
        .expect("heartbeat");
    assert_eq!(current_plan_version, 1);
    assert!(heartbeat_lease.expires_at.as_offset_date_time() > first_expiry.as_offset_date_time());
    assert_eq!(heartbeat_lease.fencing_counter, lease.fencing_counter);
}

#[test]
fn heartbeat_rejects_stale_plan_version() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    let agent = AgentId::new("a");
    let (_, lease, _) = seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &agent).expect("claim");

    let request = fleetgraph_core::runtime::service::CreatePlanChangesetRequest {
        base_plan_version: 1,
        target_plan_version: 2,
        operations: vec![fleetgraph_core::model::PlanOperation::ReprioritizeTask { task_id: task.id.clone(), priority: 1 }],
        impact_preview: None,
        created_by: "planner".to_string(),
    };
    let change_set = seeded.orchestrator.create_plan_changeset(&seeded.project_id, request).expect("create changeset");
    seeded.orchestrator.apply_plan_changeset(&change_set.id, false, "planner").expect("apply changeset");

    let err = seeded
        .orchestrator
        .heartbeat_task(&seeded.project_id, &task.id, &agent, &lease.token, Some(1))
        .expect_err("stale plan version must be rejected");
    assert_eq!(err.code, ErrorCode::PlanStale);
    assert!(err.retryable);
}

#[test]
fn dependency_promotes_backlog_successor_once_unlocked() {
    let seeded = seeded_project();
    let predecessor = create_task(&seeded, "T1");
    let successor = create_task(&seeded, "T2");

    seeded
        .orchestrator
        .create_dependency(&seeded.project_id, predecessor.id.clone(), successor.id.clone(), UnlockOn::Implemented)
        .expect("create dependency");

    let successor_after_edge = seeded.orchestrator.get_task(&successor.id).expect("get task");
    assert_eq!(successor_after_edge.state, TaskState::Backlog);

    let agent = AgentId::new("a");
    seeded.orchestrator.claim_task(&seeded.project_id, &predecessor.id, &agent).expect("claim predecessor");
    seeded
        .orchestrator
        .transition_task_state(TransitionRequest {
            project_id: seeded.project_id.clone(),
            task_id: predecessor.id.clone(),
            to: TaskState::InProgress,
            reason: None,
            actor: "a".to_string(),
            reviewed_by: None,
            review_evidence_refs: Vec::new(),
            force: false,
        })
        .expect("move to in_progress");
    seeded
        .orchestrator
        .transition_task_state(TransitionRequest {
            project_id: seeded.project_id.clone(),
            task_id: predecessor.id.clone(),
            to: TaskState::Implemented,
            reason: None,
            actor: "a".to_string(),
            reviewed_by: None,
            review_evidence_refs: Vec::new(),
            force: false,
        })
        .expect("move to implemented");

    let successor_after_unlock = seeded.orchestrator.get_task(&successor.id).expect("get task");
    assert_eq!(successor_after_unlock.state, TaskState::Ready);
}

#[test]
fn self_dependency_is_rejected_as_a_cycle() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");

    let err = seeded
        .orchestrator
        .create_dependency(&seeded.project_id, task.id.clone(), task.id.clone(), UnlockOn::Implemented)
        .expect_err("self dependency must be rejected");
    assert_eq!(err.code, ErrorCode::CycleDetected);
}

#[test]
fn three_cycle_is_rejected() {
    let seeded = seeded_project();
    let a = create_task(&seeded, "A");
    let b = create_task(&seeded, "B");
    let c = create_task(&seeded, "C");

    seeded
        .orchestrator
        .create_dependency(&seeded.project_id, a.id.clone(), b.id.clone(), UnlockOn::Implemented)
        .expect("a -> b");
    seeded
        .orchestrator
        .create_dependency(&seeded.project_id, b.id.clone(), c.id.clone(), UnlockOn::Implemented)
        .expect("b -> c");

    let err = seeded
        .orchestrator
        .create_dependency(&seeded.project_id, c.id.clone(), a.id.clone(), UnlockOn::Implemented)
        .expect_err("c -> a must close a cycle");
    assert_eq!(err.code, ErrorCode::CycleDetected);
}

#[test]
fn assign_then_claim_consumes_the_reservation() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    let assignee = AgentId::new("b");

    let (reserved_task, reservation) = seeded
        .orchestrator
        .assign_task(&seeded.project_id, &task.id, &assignee, &AgentId::new("r"), None)
        .expect("assign");
    assert_eq!(reserved_task.state, TaskState::Reserved);
    assert_eq!(reservation.ttl_seconds, crate::helpers::fixtures::DEFAULT_RESERVATION_TTL_SECONDS);

    let other_agent = AgentId::new("a");
    let denied = seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &other_agent);
    assert_eq!(denied.expect_err("reservation must block other agents").code, ErrorCode::ReservationConflict);

    let (claimed, _, _) = seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &assignee).expect("claim");
    assert_eq!(claimed.state, TaskState::Claimed);
}

#[test]
fn reservation_ttl_outside_bounds_is_rejected() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");

    let too_short = seeded.orchestrator.assign_task(
        &seeded.project_id,
        &task.id,
        &AgentId::new("b"),
        &AgentId::new("r"),
        Some(59),
    );
    assert_eq!(too_short.expect_err("ttl below minimum").code, ErrorCode::ReservationTtlOutOfRange);

    let too_long = seeded.orchestrator.assign_task(
        &seeded.project_id,
        &task.id,
        &AgentId::new("b"),
        &AgentId::new("r"),
        Some(86_401),
    );
    assert_eq!(too_long.expect_err("ttl above maximum").code, ErrorCode::ReservationTtlOutOfRange);

    let boundary_low = seeded.orchestrator.assign_task(
        &seeded.project_id,
        &task.id,
        &AgentId::new("b"),
        &AgentId::new("r"),
        Some(60),
    );
    assert!(boundary_low.is_ok(), "60 seconds is the inclusive lower bound");
}

#[test]
fn sweeping_after_lease_expiry_demotes_task_to_ready() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    let agent = AgentId::new("a");
    seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &agent).expect("claim");

    seeded.clock.advance(crate::helpers::fixtures::DEFAULT_LEASE_SECONDS + 1);
    let report = seeded.orchestrator.sweep_expired().expect("sweep");
    assert_eq!(report.leases_expired, 1);

    let task_after_sweep = seeded.orchestrator.get_task(&task.id).expect("get task");
    assert_eq!(task_after_sweep.state, TaskState::Ready);
}
