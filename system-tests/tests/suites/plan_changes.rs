//! Plan changeset application (`spec` §8 seed scenarios 3 and 4, and the
//! idempotent-reapplication round-trip law).

use fleetgraph_core::errors::ErrorCode;
use fleetgraph_core::ids::AgentId;
use fleetgraph_core::model::ChangeSetStatus;
use fleetgraph_core::model::PlanOperation;
use fleetgraph_core::model::TaskPatch;
use fleetgraph_core::model::TaskState;
use fleetgraph_core::runtime::service::CreatePlanChangesetRequest;
use serde_json::json;

use crate::helpers::fixtures::create_task;
use crate::helpers::fixtures::seeded_project;

#[test]
fn material_change_invalidates_an_active_claim() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    let agent = AgentId::new("a");
    seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &agent).expect("claim");

    let patch = TaskPatch {
        title: None,
        description: None,
        priority: None,
        work_spec: Some(json!({ "objective": "revised" })),
        task_class: None,
        capability_tags: None,
        expected_touches: None,
        exclusive_paths: None,
        shared_paths: None,
    };
    let request = CreatePlanChangesetRequest {
        base_plan_version: 1,
        target_plan_version: 2,
        operations: vec![PlanOperation::UpdateTask { task_id: task.id.clone(), patch }],
        impact_preview: Some("revise T's work spec".to_string()),
        created_by: "planner".to_string(),
    };
    let change_set = seeded.orchestrator.create_plan_changeset(&seeded.project_id, request).expect("create changeset");
    let outcome = seeded.orchestrator.apply_plan_changeset(&change_set.id, false, "planner").expect("apply changeset");

    assert_eq!(outcome.invalidated_claim_task_ids, vec![task.id.clone()]);
    assert!(outcome.invalidated_reservation_task_ids.is_empty());

    let task_after = seeded.orchestrator.get_task(&task.id).expect("get task");
    assert_eq!(task_after.state, TaskState::Ready);
    assert_eq!(task_after.work_spec, json!({ "objective": "revised" }));
}

#[test]
fn cosmetic_change_preserves_an_active_claim() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    let agent = AgentId::new("a");
    let (_, lease_before, _) =
        seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &agent).expect("claim");

    let request = CreatePlanChangesetRequest {
        base_plan_version: 1,
        target_plan_version: 2,
        operations: vec![PlanOperation::ReprioritizeTask { task_id: task.id.clone(), priority: 1 }],
        impact_preview: None,
        created_by: "planner".to_string(),
    };
    let change_set = seeded.orchestrator.create_plan_changeset(&seeded.project_id, request).expect("create changeset");
    let outcome = seeded.orchestrator.apply_plan_changeset(&change_set.id, false, "planner").expect("apply changeset");

    assert!(outcome.invalidated_claim_task_ids.is_empty());

    let task_after = seeded.orchestrator.get_task(&task.id).expect("get task");
    assert_eq!(task_after.state, TaskState::Claimed);
    assert_eq!(task_after.priority, 1);

    let (heartbeat_lease, _) = seeded
        .orchestrator
        .heartbeat_task(&seeded.project_id, &task.id, &agent, &lease_before.token, Some(2))
        .expect("heartbeat against the new plan version succeeds");
    assert_eq!(heartbeat_lease.fencing_counter, lease_before.fencing_counter);
}

#[test]
fn reapplying_an_applied_changeset_is_a_noop() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");

    let request = CreatePlanChangesetRequest {
        base_plan_version: 1,
        target_plan_version: 2,
        operations: vec![PlanOperation::ReprioritizeTask { task_id: task.id.clone(), priority: 3 }],
        impact_preview: None,
        created_by: "planner".to_string(),
    };
    let change_set = seeded.orchestrator.create_plan_changeset(&seeded.project_id, request).expect("create changeset");
    let first = seeded.orchestrator.apply_plan_changeset(&change_set.id, false, "planner").expect("apply once");
    let second = seeded.orchestrator.apply_plan_changeset(&change_set.id, false, "planner").expect("apply again");

    assert_eq!(first.plan_version.version_number, second.plan_version.version_number);
    assert!(second.invalidated_claim_task_ids.is_empty());
    assert!(second.invalidated_reservation_task_ids.is_empty());

    let task_after = seeded.orchestrator.get_task(&task.id).expect("get task");
    assert_eq!(task_after.priority, 3, "priority must not be reapplied a second time");
}

#[test]
fn stale_base_version_is_rejected_without_allow_rebase() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");

    let bump = CreatePlanChangesetRequest {
        base_plan_version: 1,
        target_plan_version: 2,
        operations: vec![PlanOperation::ReprioritizeTask { task_id: task.id.clone(), priority: 1 }],
        impact_preview: None,
        created_by: "planner".to_string(),
    };
    let bump_set = seeded.orchestrator.create_plan_changeset(&seeded.project_id, bump).expect("create changeset");
    seeded.orchestrator.apply_plan_changeset(&bump_set.id, false, "planner").expect("apply");

    let stale = CreatePlanChangesetRequest {
        base_plan_version: 1,
        target_plan_version: 2,
        operations: vec![PlanOperation::ReprioritizeTask { task_id: task.id.clone(), priority: 2 }],
        impact_preview: None,
        created_by: "planner".to_string(),
    };
    let stale_set = seeded.orchestrator.create_plan_changeset(&seeded.project_id, stale).expect("create changeset");
    assert_eq!(stale_set.status, ChangeSetStatus::Draft);

    let err = seeded
        .orchestrator
        .apply_plan_changeset(&stale_set.id, false, "planner")
        .expect_err("stale base version must be rejected");
    assert_eq!(err.code, ErrorCode::PlanStale);

    let rebased = seeded
        .orchestrator
        .apply_plan_changeset(&stale_set.id, true, "planner")
        .expect("allow_rebase permits applying against a newer base");
    assert_eq!(rebased.plan_version.version_number, 3);
}
