//! Integration preconditions and gate-class enforcement (`spec` §8 seed
//! scenario 5).

use fleetgraph_core::errors::ErrorCode;
use fleetgraph_core::ids::AgentId;
use fleetgraph_core::model::GateOutcome;
use fleetgraph_core::model::GateScope;
use fleetgraph_core::model::TaskClass;
use fleetgraph_core::model::TaskState;
use fleetgraph_core::runtime::service::CreateGateDecisionRequest;
use fleetgraph_core::runtime::state_machine::TransitionRequest;

use crate::helpers::fixtures::create_task;
use crate::helpers::fixtures::seeded_project;
use crate::helpers::fixtures::task_request;

fn advance_to_implemented(seeded: &crate::helpers::fixtures::SeededProject, task_id: &fleetgraph_core::ids::TaskId, agent: &str) {
    let agent_id = AgentId::new(agent);
    seeded.orchestrator.claim_task(&seeded.project_id, task_id, &agent_id).expect("claim");
    for to in [TaskState::InProgress, TaskState::Implemented] {
        seeded
            .orchestrator
            .transition_task_state(TransitionRequest {
                project_id: seeded.project_id.clone(),
                task_id: task_id.clone(),
                to,
                reason: None,
                actor: agent.to_string(),
                reviewed_by: None,
                review_evidence_refs: Vec::new(),
                force: false,
            })
            .unwrap_or_else(|err| panic!("transition to {to:?} failed: {err}"));
    }
}

#[test]
fn integration_requires_reviewed_by_and_evidence() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    advance_to_implemented(&seeded, &task.id, "a");

    let missing_review = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Integrated,
        reason: None,
        actor: "a".to_string(),
        reviewed_by: None,
        review_evidence_refs: Vec::new(),
        force: false,
    });
    assert_eq!(missing_review.expect_err("review is required").code, ErrorCode::ReviewRequiredForIntegration);

    let missing_evidence = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Integrated,
        reason: None,
        actor: "a".to_string(),
        reviewed_by: Some("reviewer".to_string()),
        review_evidence_refs: Vec::new(),
        force: false,
    });
    assert_eq!(missing_evidence.expect_err("evidence is required").code, ErrorCode::ReviewEvidenceRequired);

    let self_review = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Integrated,
        reason: None,
        actor: "a".to_string(),
        reviewed_by: Some("a".to_string()),
        review_evidence_refs: vec!["artifact://evidence".to_string()],
        force: false,
    });
    assert_eq!(self_review.expect_err("self review is not allowed").code, ErrorCode::SelfReviewNotAllowed);

    let ok = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Integrated,
        reason: None,
        actor: "a".to_string(),
        reviewed_by: Some("reviewer".to_string()),
        review_evidence_refs: vec!["artifact://evidence".to_string()],
        force: false,
    });
    assert!(ok.is_ok());
}

#[test]
fn gate_class_task_requires_an_approving_gate_decision() {
    let seeded = seeded_project();
    let mut request = task_request(&seeded.phase_id, &seeded.milestone_id, "G");
    request.task_class = TaskClass::ReviewGate;
    let task = seeded.orchestrator.create_task(&seeded.project_id, request).expect("create gate task");
    advance_to_implemented(&seeded, &task.id, "a");

    let without_decision = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Integrated,
        reason: None,
        actor: "a".to_string(),
        reviewed_by: Some("reviewer".to_string()),
        review_evidence_refs: vec!["artifact://evidence".to_string()],
        force: false,
    });
    assert_eq!(without_decision.expect_err("gate decision is required").code, ErrorCode::GateDecisionRequired);

    seeded
        .orchestrator
        .create_gate_decision(
            &seeded.project_id,
            CreateGateDecisionRequest {
                gate_rule_id: None,
                scope: GateScope::Task(task.id.clone()),
                outcome: GateOutcome::Approved,
                evidence_refs: vec!["artifact://evidence".to_string()],
                decided_by: "reviewer".to_string(),
            },
        )
        .expect("record gate decision");

    let decisions = seeded
        .orchestrator
        .list_gate_decisions(&seeded.project_id, Some(&GateScope::Task(task.id.clone())))
        .expect("list gate decisions");
    assert_eq!(decisions.len(), 1);

    let with_decision = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Integrated,
        reason: None,
        actor: "a".to_string(),
        reviewed_by: Some("reviewer".to_string()),
        review_evidence_refs: vec!["artifact://evidence".to_string()],
        force: false,
    });
    assert!(with_decision.is_ok(), "an approving gate decision must clear integration");
}

#[test]
fn rejected_gate_decision_does_not_clear_integration() {
    let seeded = seeded_project();
    let mut request = task_request(&seeded.phase_id, &seeded.milestone_id, "G");
    request.task_class = TaskClass::MergeGate;
    let task = seeded.orchestrator.create_task(&seeded.project_id, request).expect("create gate task");
    advance_to_implemented(&seeded, &task.id, "a");

    seeded
        .orchestrator
        .create_gate_decision(
            &seeded.project_id,
            CreateGateDecisionRequest {
                gate_rule_id: None,
                scope: GateScope::Task(task.id.clone()),
                outcome: GateOutcome::Rejected,
                evidence_refs: vec!["artifact://evidence".to_string()],
                decided_by: "reviewer".to_string(),
            },
        )
        .expect("record gate decision");

    let result = seeded.orchestrator.transition_task_state(TransitionRequest {
        project_id: seeded.project_id.clone(),
        task_id: task.id.clone(),
        to: TaskState::Integrated,
        reason: None,
        actor: "a".to_string(),
        reviewed_by: Some("reviewer".to_string()),
        review_evidence_refs: vec!["artifact://evidence".to_string()],
        force: false,
    });
    assert_eq!(result.expect_err("a rejected decision must not clear integration").code, ErrorCode::GateDecisionRequired);
}
