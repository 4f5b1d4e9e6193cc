//! Deterministic metrics replay (`spec` §8 seed scenario 6).

use fleetgraph_core::ids::EventLogId;
use fleetgraph_core::ids::MetricsJobRunId;
use fleetgraph_core::interfaces::NewEvent;
use fleetgraph_core::interfaces::StoreTransaction;
use fleetgraph_core::model::EventType;
use fleetgraph_core::model::MetricsMode;
use fleetgraph_core::model::MetricsRunStatus;
use fleetgraph_core::model::TaskState;
use fleetgraph_core::runtime::state_machine::TransitionRequest;
use fleetgraph_metrics::run;
use serde_json::json;

use crate::helpers::fixtures::create_task;
use crate::helpers::fixtures::seeded_project;

#[test]
fn run_is_idempotent_by_idempotency_key() {
    let seeded = seeded_project();
    let mut txn = seeded.begin();

    let first =
        run(&mut *txn, seeded.clock(), MetricsJobRunId::new("run_1"), &seeded.project_id, MetricsMode::Batch, "key-1", None)
            .expect("first run");
    let second =
        run(&mut *txn, seeded.clock(), MetricsJobRunId::new("run_2"), &seeded.project_id, MetricsMode::Batch, "key-1", None)
            .expect("second run with the same key");
    txn.commit().expect("commit");

    assert_eq!(first.id, second.id);
}

#[test]
fn replay_from_event_id_reproduces_identical_counters() {
    let seeded = seeded_project();
    let task = create_task(&seeded, "T");
    let agent = fleetgraph_core::ids::AgentId::new("a");
    seeded.orchestrator.claim_task(&seeded.project_id, &task.id, &agent).expect("claim");
    seeded
        .orchestrator
        .transition_task_state(TransitionRequest {
            project_id: seeded.project_id.clone(),
            task_id: task.id.clone(),
            to: TaskState::InProgress,
            reason: None,
            actor: "a".to_string(),
            reviewed_by: None,
            review_evidence_refs: Vec::new(),
            force: false,
        })
        .expect("transition");

    let mut txn = seeded.begin();
    let first_run =
        run(&mut *txn, seeded.clock(), MetricsJobRunId::new("run_a"), &seeded.project_id, MetricsMode::Batch, "key-a", None)
            .expect("first run");
    let first_counters = txn.list_transition_counters(&seeded.project_id, MetricsMode::Batch).expect("list counters");
    txn.commit().expect("commit");

    assert_eq!(first_run.processed_events, 2, "claim_task and the transition each log one event");

    let mut txn = seeded.begin();
    let replay_run = run(
        &mut *txn,
        seeded.clock(),
        MetricsJobRunId::new("run_b"),
        &seeded.project_id,
        MetricsMode::Batch,
        "key-b",
        Some(EventLogId::new(1)),
    )
    .expect("replay run");
    let replayed_counters = txn.list_transition_counters(&seeded.project_id, MetricsMode::Batch).expect("list counters");
    txn.commit().expect("commit");

    assert_eq!(replay_run.processed_events, first_run.processed_events);
    assert_eq!(first_counters.len(), replayed_counters.len());
    for before in &first_counters {
        let after = replayed_counters.iter().find(|c| c.to_state == before.to_state).expect("matching counter");
        assert_eq!(before.transition_count, after.transition_count);
    }
}

#[test]
fn run_fails_closed_on_an_unrecognized_payload() {
    let seeded = seeded_project();
    let mut txn = seeded.begin();
    txn.append_event(NewEvent {
        project_id: seeded.project_id.clone(),
        entity_type: "task".to_string(),
        entity_id: None,
        event_type: EventType::TaskStateTransitioned,
        payload: json!({ "to_state": "not_a_real_state" }),
        caused_by: Some("system".to_string()),
    })
    .expect("append malformed event");

    let record = run(&mut *txn, seeded.clock(), MetricsJobRunId::new("run_bad"), &seeded.project_id, MetricsMode::Batch, "key-bad", None)
        .expect("run returns Ok even on a failed record");
    txn.commit().expect("commit");

    assert_eq!(record.status, MetricsRunStatus::Failed);
    assert_eq!(record.processed_events, 0);

    let mut txn = seeded.begin();
    let checkpoint = txn.get_checkpoint(&seeded.project_id, MetricsMode::Batch).expect("get checkpoint");
    txn.commit().expect("commit");
    assert!(checkpoint.is_none(), "the checkpoint must not advance past a failed run");
}
