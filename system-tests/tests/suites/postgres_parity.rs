//! Confirms the seed scenarios behave identically against the Postgres
//! dialect, gated behind `FLEETGRAPH_TEST_POSTGRES_URL` the same way
//! `fleetgraph-store-postgres`'s own test module gates itself, since there
//! is no in-process equivalent of `SQLite`'s `:memory:` mode.

use fleetgraph_core::ids::AgentId;
use fleetgraph_core::model::TaskState;
use fleetgraph_core::runtime::service::Orchestrator;
use fleetgraph_core::runtime::state_machine::TransitionRequest;
use fleetgraph_store_postgres::PostgresStore;
use fleetgraph_store_postgres::PostgresStoreConfig;
use time::Duration;

use crate::helpers::clock::FixedClock;
use crate::helpers::fixtures::task_request;
use crate::helpers::fixtures::DEFAULT_LEASE_SECONDS;
use crate::helpers::fixtures::DEFAULT_RESERVATION_TTL_SECONDS;

fn test_store() -> Option<PostgresStore> {
    let url = std::env::var("FLEETGRAPH_TEST_POSTGRES_URL").ok()?;
    Some(PostgresStore::open(&PostgresStoreConfig::new(url)).expect("open store"))
}

#[test]
fn claim_heartbeat_and_integrate_round_trip_against_postgres() {
    let Some(store) = test_store() else {
        return;
    };
    let clock = FixedClock::new();
    let orchestrator = Orchestrator::new(
        store,
        Box::new(clock),
        Duration::seconds(DEFAULT_LEASE_SECONDS),
        Duration::seconds(DEFAULT_RESERVATION_TTL_SECONDS),
    );

    let project = orchestrator.create_project("pg-parity".to_string()).expect("create project");
    let phase = orchestrator.create_phase(&project.id, "P1".to_string()).expect("create phase");
    let milestone =
        orchestrator.create_milestone(&project.id, &phase.id, "P1.M1".to_string()).expect("create milestone");
    let task = orchestrator
        .create_task(&project.id, task_request(&phase.id, &milestone.id, "T"))
        .expect("create task");

    let agent = AgentId::new("a");
    orchestrator.claim_task(&project.id, &task.id, &agent).expect("claim");
    for to in [TaskState::InProgress, TaskState::Implemented] {
        orchestrator
            .transition_task_state(TransitionRequest {
                project_id: project.id.clone(),
                task_id: task.id.clone(),
                to,
                reason: None,
                actor: "a".to_string(),
                reviewed_by: None,
                review_evidence_refs: Vec::new(),
                force: false,
            })
            .unwrap_or_else(|err| panic!("transition to {to:?} failed: {err}"));
    }
    let integrated = orchestrator
        .transition_task_state(TransitionRequest {
            project_id: project.id.clone(),
            task_id: task.id.clone(),
            to: TaskState::Integrated,
            reason: None,
            actor: "a".to_string(),
            reviewed_by: Some("reviewer".to_string()),
            review_evidence_refs: vec!["artifact://evidence".to_string()],
            force: false,
        })
        .expect("integrate");
    assert_eq!(integrated.task.state, TaskState::Integrated);
}

#[test]
fn reservation_ttl_bounds_are_enforced_against_postgres() {
    let Some(store) = test_store() else {
        return;
    };
    let clock = FixedClock::new();
    let orchestrator = Orchestrator::new(
        store,
        Box::new(clock),
        Duration::seconds(DEFAULT_LEASE_SECONDS),
        Duration::seconds(DEFAULT_RESERVATION_TTL_SECONDS),
    );

    let project = orchestrator.create_project("pg-parity-2".to_string()).expect("create project");
    let phase = orchestrator.create_phase(&project.id, "P1".to_string()).expect("create phase");
    let milestone =
        orchestrator.create_milestone(&project.id, &phase.id, "P1.M1".to_string()).expect("create milestone");
    let task = orchestrator
        .create_task(&project.id, task_request(&phase.id, &milestone.id, "T"))
        .expect("create task");

    let too_short = orchestrator.assign_task(&project.id, &task.id, &AgentId::new("b"), &AgentId::new("r"), Some(1));
    assert!(too_short.is_err(), "a TTL below the configured minimum must be rejected");
}
