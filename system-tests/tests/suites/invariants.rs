//! Universal invariants and boundary behaviors that don't belong to any one
//! seed scenario (`spec` §8).

use fleetgraph_core::errors::ErrorCode;
use fleetgraph_core::ids::AgentId;
use fleetgraph_core::model::TaskState;
use fleetgraph_core::runtime::state_machine::TransitionRequest;

use crate::helpers::fixtures::create_task;
use crate::helpers::fixtures::seeded_project;

#[test]
fn transition_outside_the_adjacency_table_is_rejected_unless_forced() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");

    let illegal = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Integrated,
        reason: None,
        actor: "operator".to_string(),
        reviewed_by: None,
        review_evidence_refs: Vec::new(),
        force: false,
    });
    assert_eq!(illegal.expect_err("ready -> integrated is not adjacency-legal").code, ErrorCode::InvalidStateTransition);

    let forced = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Cancelled,
        reason: Some("scope cut".to_string()),
        actor: "operator".to_string(),
        reviewed_by: None,
        review_evidence_refs: Vec::new(),
        force: true,
    });
    assert!(forced.is_ok(), "force bypasses the adjacency table");
}

#[test]
fn double_claim_is_rejected() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &AgentId::new("a")).expect("first claim");

    let second = seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &AgentId::new("b"));
    assert_eq!(second.expect_err("a task with an active lease is not claimable").code, ErrorCode::LeaseExists);
}

#[test]
fn double_assign_is_rejected() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    seeded
        .orchestrator
        .assign_task(&seeded.project_id, &task.id, &AgentId::new("b"), &AgentId::new("r"), None)
        .expect("first assignment");

    let second = seeded.orchestrator.assign_task(&seeded.project_id, &task.id, &AgentId::new("c"), &AgentId::new("r"), None);
    assert_eq!(second.expect_err("only one active reservation is allowed per task").code, ErrorCode::ReservationExists);
}

#[test]
fn heartbeat_with_a_stale_token_is_rejected() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    let agent = AgentId::new("a");
    let (_, lease, _) = seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &agent).expect("claim");

    seeded.clock.advance(crate::helpers::fixtures::DEFAULT_LEASE_SECONDS + 1);
    let expired_heartbeat =
        seeded.orchestrator.heartbeat_task(&seeded.project_id, &task.id, &agent, &lease.token, None);
    assert_eq!(expired_heartbeat.expect_err("an expired lease cannot be heartbeat").code, ErrorCode::LeaseInvalid);

    let wrong_token = seeded.orchestrator.heartbeat_task(&seeded.project_id, &task.id, &agent, "not-the-token", None);
    assert_eq!(wrong_token.expect_err("a mismatched token is rejected").code, ErrorCode::LeaseInvalid);
}

#[test]
fn capability_filter_excludes_agents_without_a_matching_tag() {
    let seeded = seeded_project();
    let mut request = crate::helpers::fixtures::task_request(&seeded.phase_id, &seeded.milestone_id, "T");
    request.capability_tags = std::iter::once("gpu".to_string()).collect();
    let task = seeded.orchestrator.create_task(&seeded.project_id, request).expect("create task");

    let without_tag = seeded
        .orchestrator
        .get_ready_tasks(&seeded.project_id, &AgentId::new("a"), &std::collections::BTreeSet::new())
        .expect("ready tasks");
    assert!(!without_tag.iter().any(|t| t.id == task.id));

    let with_tag = seeded
        .orchestrator
        .get_ready_tasks(
            &seeded.project_id,
            &AgentId::new("a"),
            &std::iter::once("gpu".to_string()).collect(),
        )
        .expect("ready tasks");
    assert!(with_tag.iter().any(|t| t.id == task.id));
}

#[test]
fn revoking_an_api_key_twice_is_idempotent() {
    let seeded = seeded_project();
    let issued = seeded
        .orchestrator
        .create_api_key(fleetgraph_core::runtime::service::CreateApiKeyRequest {
            scope: fleetgraph_core::model::ApiKeyScope::Global,
            name: "ci".to_string(),
            role_scopes: std::iter::once(fleetgraph_core::model::Role::Operator).collect(),
            created_by: "root".to_string(),
        })
        .expect("mint api key");

    let first_revoke = seeded.orchestrator.revoke_api_key(&issued.api_key.id).expect("revoke once");
    let second_revoke = seeded.orchestrator.revoke_api_key(&issued.api_key.id).expect("revoke twice");
    assert_eq!(first_revoke.status, second_revoke.status);
    assert_eq!(first_revoke.revoked_at.is_some(), second_revoke.revoked_at.is_some());
}

#[test]
fn sibling_projects_do_not_see_each_others_tasks() {
    let seeded_a = seeded_project();
    let seeded_b = seeded_project();
    let task_a = create_task(&seeded_a, "T");

    let cross_project = seeded_b.orchestrator.get_task(&task_a.id);
    assert_eq!(cross_project.expect_err("a task is only visible within its own project").code, ErrorCode::TaskNotFound);
}
