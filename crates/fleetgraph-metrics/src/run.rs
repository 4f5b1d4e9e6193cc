// crates/fleetgraph-metrics/src/run.rs
// ============================================================================
// Module: Incremental Materializer Run
// Description: One idempotent invocation of the event-log transition-counter
//              consumer, plus the backfill and recovery orchestrators built
//              on top of it.
// ============================================================================

//! ## Overview
//! [`run`] is the unit of work the backfill and recovery orchestrators
//! repeat. It never partially advances the checkpoint: either every scanned
//! event folds cleanly into the counters and the checkpoint moves to the
//! last event id observed, or the first unrecognized payload stops the run
//! and the checkpoint stays exactly where it was.

use fleetgraph_core::clock::Clock;
use fleetgraph_core::errors::ErrorCode;
use fleetgraph_core::errors::OperationError;
use fleetgraph_core::ids::EventLogId;
use fleetgraph_core::ids::MetricsJobRunId;
use fleetgraph_core::ids::ProjectId;
use fleetgraph_core::interfaces::StoreTransaction;
use fleetgraph_core::model::EventType;
use fleetgraph_core::model::MetricsJobCheckpoint;
use fleetgraph_core::model::MetricsJobRun;
use fleetgraph_core::model::MetricsMode;
use fleetgraph_core::model::MetricsRunStatus;
use fleetgraph_core::model::MetricsStateTransitionCounter;
use fleetgraph_core::model::TaskState;

fn db_err(err: impl std::fmt::Display) -> OperationError {
    OperationError::new(ErrorCode::DbError, err.to_string())
}

/// Runs one incremental pass of the transition-counter materializer over
/// `(project_id, mode)`.
///
/// Re-invoking `run` with an `idempotency_key` that already has a recorded
/// [`MetricsJobRun`] returns that record verbatim without touching the
/// checkpoint or counters a second time (`spec` §9: "this is a contract,
/// not a suggestion"). Passing `replay_from_event_id` deletes every counter
/// for `(project_id, mode)` and rewinds the checkpoint before rescanning,
/// which is what makes replay deterministic: the counters produced the
/// second time are byte-identical to the first (`spec` §8 scenario 6).
///
/// # Errors
///
/// Returns [`ErrorCode::DbError`] on store failure. A bad event payload
/// does not surface as an `Err`: it is recorded as a `failed`
/// [`MetricsJobRun`] and returned as `Ok`.
#[allow(clippy::too_many_arguments)]
pub fn run(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    run_id: MetricsJobRunId,
    project_id: &ProjectId,
    mode: MetricsMode,
    idempotency_key: &str,
    replay_from_event_id: Option<EventLogId>,
) -> Result<MetricsJobRun, OperationError> {
    if let Some(existing) = txn.get_job_run_by_idempotency_key(project_id, idempotency_key).map_err(db_err)? {
        return Ok(existing);
    }

    let mut checkpoint = txn.get_checkpoint(project_id, mode).map_err(db_err)?.unwrap_or(MetricsJobCheckpoint {
        project_id: project_id.clone(),
        mode,
        last_event_id: 0,
        last_success_at: None,
    });

    if let Some(replay_from) = replay_from_event_id {
        txn.delete_transition_counters(project_id, mode).map_err(db_err)?;
        checkpoint.last_event_id = replay_from.value() - 1;
    }

    let start_event_id = checkpoint.last_event_id + 1;
    let limit = mode.default_batch_size();
    let events = txn
        .list_events_from(project_id, EventType::TaskStateTransitioned, EventLogId::new(start_event_id), limit)
        .map_err(db_err)?;

    let mut processed = 0_i64;
    let mut last_processed_id = checkpoint.last_event_id;
    let now = clock.now();

    for event in &events {
        let Some(to_state_raw) = event.payload.get("to_state") else {
            return record_failure(
                txn,
                run_id,
                project_id,
                mode,
                idempotency_key,
                start_event_id,
                last_processed_id,
                processed,
                "event payload is missing \"to_state\"",
                now,
            );
        };
        let to_state: Result<TaskState, _> = serde_json::from_value(to_state_raw.clone());
        let Ok(to_state) = to_state else {
            return record_failure(
                txn,
                run_id,
                project_id,
                mode,
                idempotency_key,
                start_event_id,
                last_processed_id,
                processed,
                "event payload's \"to_state\" is not a known task state",
                now,
            );
        };

        let mut counter = txn.get_transition_counter(project_id, mode, to_state).map_err(db_err)?.unwrap_or(
            MetricsStateTransitionCounter {
                project_id: project_id.clone(),
                mode,
                to_state,
                transition_count: 0,
                last_event_id: event.id,
            },
        );
        counter.transition_count += 1;
        counter.last_event_id = event.id;
        txn.upsert_transition_counter(&counter).map_err(db_err)?;

        last_processed_id = event.id.value();
        processed += 1;
    }

    checkpoint.last_event_id = last_processed_id;
    checkpoint.last_success_at = Some(now);
    txn.upsert_checkpoint(&checkpoint).map_err(db_err)?;

    let run_record = MetricsJobRun {
        id: run_id,
        project_id: project_id.clone(),
        mode,
        idempotency_key: idempotency_key.to_string(),
        status: MetricsRunStatus::Succeeded,
        start_event_id,
        end_event_id: last_processed_id,
        processed_events: processed,
        failure_reason: None,
        completed_at: now,
    };
    txn.insert_job_run(&run_record).map_err(db_err)?;

    Ok(run_record)
}

#[allow(clippy::too_many_arguments)]
fn record_failure(
    txn: &mut dyn StoreTransaction,
    run_id: MetricsJobRunId,
    project_id: &ProjectId,
    mode: MetricsMode,
    idempotency_key: &str,
    start_event_id: i64,
    end_event_id: i64,
    processed_events: i64,
    failure_reason: &str,
    now: fleetgraph_core::clock::Timestamp,
) -> Result<MetricsJobRun, OperationError> {
    let run_record = MetricsJobRun {
        id: run_id,
        project_id: project_id.clone(),
        mode,
        idempotency_key: idempotency_key.to_string(),
        status: MetricsRunStatus::Failed,
        start_event_id,
        end_event_id,
        processed_events,
        failure_reason: Some(failure_reason.to_string()),
        completed_at: now,
    };
    txn.insert_job_run(&run_record).map_err(db_err)?;
    Ok(run_record)
}

/// Outcome of a [`backfill`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Every run processed events until one run observed zero new events.
    Succeeded,
    /// A run was recorded `failed`; backfill stops immediately.
    Failed {
        /// The id of the run that failed.
        failed_run_id: MetricsJobRunId,
    },
    /// `max_runs` was reached before a zero-event run was observed.
    Partial,
}

/// Repeatedly invokes [`run`], deriving each call's idempotency key as
/// `"{prefix}:{mode}:{start_event_id}"` so repeated invocations of
/// `backfill` itself are safe to retry (`spec` §9).
///
/// Each iteration opens nothing of its own: the caller supplies one
/// `run_id` per expected iteration via `run_ids`, consumed in order. If
/// `run_ids` is exhausted before backfill would stop, the result is
/// `Partial`.
///
/// # Errors
///
/// Returns [`ErrorCode::DbError`] on store failure.
pub fn backfill(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    project_id: &ProjectId,
    mode: MetricsMode,
    prefix: &str,
    max_runs: u32,
    run_ids: &[MetricsJobRunId],
) -> Result<BackfillOutcome, OperationError> {
    for run_id in run_ids.iter().take(max_runs as usize) {
        let checkpoint = txn.get_checkpoint(project_id, mode).map_err(db_err)?;
        let start_event_id = checkpoint.map_or(1, |c| c.last_event_id + 1);
        let idempotency_key = format!("{prefix}:{mode_str}:{start_event_id}", mode_str = mode_label(mode));

        let record = run(txn, clock, run_id.clone(), project_id, mode, &idempotency_key, None)?;

        if record.status == MetricsRunStatus::Failed {
            return Ok(BackfillOutcome::Failed { failed_run_id: record.id });
        }
        if record.processed_events == 0 {
            return Ok(BackfillOutcome::Succeeded);
        }
    }
    Ok(BackfillOutcome::Partial)
}

fn mode_label(mode: MetricsMode) -> &'static str {
    match mode {
        MetricsMode::Batch => "batch",
        MetricsMode::NearRealTime => "near_real_time",
    }
}

/// Resumes a previously failed run, restarting the scan at its
/// `start_event_id`.
///
/// # Errors
///
/// - [`ErrorCode::RunNotFound`] if `failed_run_id` does not resolve to a
///   recorded run.
/// - [`ErrorCode::DbError`] on store failure.
pub fn recover(
    txn: &mut dyn StoreTransaction,
    clock: &dyn Clock,
    new_run_id: MetricsJobRunId,
    project_id: &ProjectId,
    failed_run_id: &MetricsJobRunId,
    idempotency_key: &str,
) -> Result<MetricsJobRun, OperationError> {
    let failed_run = txn
        .get_job_run(failed_run_id)
        .map_err(db_err)?
        .ok_or_else(|| OperationError::new(ErrorCode::RunNotFound, "run does not exist"))?;

    run(
        txn,
        clock,
        new_run_id,
        project_id,
        failed_run.mode,
        idempotency_key,
        Some(EventLogId::new(failed_run.start_event_id)),
    )
}

#[cfg(test)]
mod tests {
    use fleetgraph_core::clock::Clock;
    use fleetgraph_core::clock::Timestamp;
    use fleetgraph_core::ids::MetricsJobRunId;
    use fleetgraph_core::ids::ProjectId;
    use fleetgraph_core::interfaces::NewEvent;
    use fleetgraph_core::interfaces::Store;
    use fleetgraph_core::model::EventType;
    use fleetgraph_core::model::MetricsMode;
    use fleetgraph_core::model::MetricsRunStatus;
    use fleetgraph_core::model::Project;
    use fleetgraph_core::model::ProjectStatus;
    use fleetgraph_store_sqlite::SqliteStore;
    use fleetgraph_store_sqlite::SqliteStoreConfig;
    use serde_json::json;
    use time::OffsetDateTime;

    use super::run;

    struct FixedClock(Timestamp);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    fn fixed_clock() -> FixedClock {
        FixedClock(Timestamp::new(OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid unix time")))
    }

    fn seed_project(store: &SqliteStore, clock: &FixedClock, project_id: &ProjectId) {
        let mut txn = store.begin().expect("begin");
        txn.insert_project(&Project {
            id: project_id.clone(),
            name: "p".to_string(),
            status: ProjectStatus::Active,
            created_at: clock.now(),
            updated_at: clock.now(),
        })
        .expect("insert project");
        txn.commit().expect("commit");
    }

    #[test]
    fn run_is_idempotent_by_key() {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open");
        let clock = fixed_clock();
        let project_id = ProjectId::new("proj_1");
        seed_project(&store, &clock, &project_id);

        let mut txn = store.begin().expect("begin");
        let first = run(
            &mut *txn,
            &clock,
            MetricsJobRunId::new("run_1"),
            &project_id,
            MetricsMode::Batch,
            "key-1",
            None,
        )
        .expect("run");
        let second = run(
            &mut *txn,
            &clock,
            MetricsJobRunId::new("run_2"),
            &project_id,
            MetricsMode::Batch,
            "key-1",
            None,
        )
        .expect("run again");
        txn.commit().expect("commit");

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, MetricsRunStatus::Succeeded);
    }

    #[test]
    fn run_folds_transition_events_into_counters() {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open");
        let clock = fixed_clock();
        let project_id = ProjectId::new("proj_2");
        seed_project(&store, &clock, &project_id);

        let mut txn = store.begin().expect("begin");
        for to_state in ["in_progress", "blocked", "in_progress"] {
            txn.append_event(NewEvent {
                project_id: project_id.clone(),
                entity_type: "task".to_string(),
                entity_id: Some("tsk_1".to_string()),
                event_type: EventType::TaskStateTransitioned,
                payload: json!({ "to_state": to_state }),
                caused_by: Some("agent_1".to_string()),
            })
            .expect("append");
        }

        let record = run(
            &mut *txn,
            &clock,
            MetricsJobRunId::new("run_a"),
            &project_id,
            MetricsMode::Batch,
            "key-a",
            None,
        )
        .expect("run");
        txn.commit().expect("commit");

        assert_eq!(record.processed_events, 3);
        assert_eq!(record.status, MetricsRunStatus::Succeeded);

        let mut txn = store.begin().expect("begin");
        let counters = txn.list_transition_counters(&project_id, MetricsMode::Batch).expect("list");
        txn.commit().expect("commit");
        let in_progress = counters.iter().find(|c| format!("{:?}", c.to_state) == "InProgress").expect("counter");
        assert_eq!(in_progress.transition_count, 2);
    }

    #[test]
    fn run_fails_closed_on_unknown_state() {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open");
        let clock = fixed_clock();
        let project_id = ProjectId::new("proj_3");
        seed_project(&store, &clock, &project_id);

        let mut txn = store.begin().expect("begin");
        txn.append_event(NewEvent {
            project_id: project_id.clone(),
            entity_type: "task".to_string(),
            entity_id: Some("tsk_1".to_string()),
            event_type: EventType::TaskStateTransitioned,
            payload: json!({ "to_state": "not_a_real_state" }),
            caused_by: Some("agent_1".to_string()),
        })
        .expect("append");

        let record = run(
            &mut *txn,
            &clock,
            MetricsJobRunId::new("run_bad"),
            &project_id,
            MetricsMode::Batch,
            "key-bad",
            None,
        )
        .expect("run");
        txn.commit().expect("commit");

        assert_eq!(record.status, MetricsRunStatus::Failed);
        assert!(record.failure_reason.is_some());

        let mut txn = store.begin().expect("begin");
        let checkpoint = txn.get_checkpoint(&project_id, MetricsMode::Batch).expect("get checkpoint");
        txn.commit().expect("commit");
        assert!(checkpoint.is_none());
    }

    #[test]
    fn replay_reproduces_identical_counters() {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open");
        let clock = fixed_clock();
        let project_id = ProjectId::new("proj_4");
        seed_project(&store, &clock, &project_id);

        let mut txn = store.begin().expect("begin");
        for to_state in ["in_progress", "blocked", "in_progress"] {
            txn.append_event(NewEvent {
                project_id: project_id.clone(),
                entity_type: "task".to_string(),
                entity_id: Some("tsk_1".to_string()),
                event_type: EventType::TaskStateTransitioned,
                payload: json!({ "to_state": to_state }),
                caused_by: Some("agent_1".to_string()),
            })
            .expect("append");
        }
        run(&mut *txn, &clock, MetricsJobRunId::new("run_first"), &project_id, MetricsMode::Batch, "first", None)
            .expect("run");
        let first_counters =
            txn.list_transition_counters(&project_id, MetricsMode::Batch).expect("list first counters");

        run(
            &mut *txn,
            &clock,
            MetricsJobRunId::new("run_replay"),
            &project_id,
            MetricsMode::Batch,
            "replay",
            Some(fleetgraph_core::ids::EventLogId::new(1)),
        )
        .expect("replay run");
        let replayed_counters =
            txn.list_transition_counters(&project_id, MetricsMode::Batch).expect("list replayed counters");
        txn.commit().expect("commit");

        let mut first_counts: Vec<i64> = first_counters.iter().map(|c| c.transition_count).collect();
        let mut replayed_counts: Vec<i64> = replayed_counters.iter().map(|c| c.transition_count).collect();
        first_counts.sort_unstable();
        replayed_counts.sort_unstable();
        assert_eq!(first_counts, replayed_counts);
    }
}
