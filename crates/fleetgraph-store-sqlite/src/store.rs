// crates/fleetgraph-store-sqlite/src/store.rs
// ============================================================================
// Module: SqliteStore / SqliteTransaction
// Description: The `SQLite` dialect of `fleetgraph_core::interfaces::Store`.
// ============================================================================

use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::ToSql;
use rusqlite::params;
use thiserror::Error;

use fleetgraph_core::clock::Timestamp;
use fleetgraph_core::ids::AlertId;
use fleetgraph_core::ids::ApiKeyId;
use fleetgraph_core::ids::EventLogId;
use fleetgraph_core::ids::GateRuleId;
use fleetgraph_core::ids::IntegrationAttemptId;
use fleetgraph_core::ids::MetricsJobRunId;
use fleetgraph_core::ids::MetricsSnapshotId;
use fleetgraph_core::ids::MilestoneId;
use fleetgraph_core::ids::PhaseId;
use fleetgraph_core::ids::PlanChangeSetId;
use fleetgraph_core::ids::ProjectId;
use fleetgraph_core::ids::TaskId;
use fleetgraph_core::interfaces::NewEvent;
use fleetgraph_core::interfaces::Store;
use fleetgraph_core::interfaces::StoreError;
use fleetgraph_core::interfaces::StoreTransaction;
use fleetgraph_core::interfaces::TaskListFilter;
use fleetgraph_core::model::Alert;
use fleetgraph_core::model::AlertSeverity;
use fleetgraph_core::model::AlertType;
use fleetgraph_core::model::ApiKey;
use fleetgraph_core::model::ApiKeyScope;
use fleetgraph_core::model::Artifact;
use fleetgraph_core::model::DependencyEdge;
use fleetgraph_core::model::EventLog;
use fleetgraph_core::model::EventType;
use fleetgraph_core::model::GateDecision;
use fleetgraph_core::model::GatePolicy;
use fleetgraph_core::model::GateRule;
use fleetgraph_core::model::GateScope;
use fleetgraph_core::model::IntegrationAttempt;
use fleetgraph_core::model::Lease;
use fleetgraph_core::model::Milestone;
use fleetgraph_core::model::MetricsJobCheckpoint;
use fleetgraph_core::model::MetricsJobRun;
use fleetgraph_core::model::MetricsMode;
use fleetgraph_core::model::MetricsSnapshot;
use fleetgraph_core::model::MetricsStateTransitionCounter;
use fleetgraph_core::model::NorthStarMetrics;
use fleetgraph_core::model::OperationalMetrics;
use fleetgraph_core::model::Phase;
use fleetgraph_core::model::PlanChangeSet;
use fleetgraph_core::model::PlanOperation;
use fleetgraph_core::model::PlanVersion;
use fleetgraph_core::model::PolicyTrigger;
use fleetgraph_core::model::Project;
use fleetgraph_core::model::Reservation;
use fleetgraph_core::model::Task;
use fleetgraph_core::model::TaskClass;
use fleetgraph_core::model::TaskExecutionSnapshot;
use fleetgraph_core::model::TaskState;

use crate::config::SqliteStoreConfig;
use crate::convert::from_json;
use crate::convert::opt_timestamp_from_text;
use crate::convert::opt_timestamp_text;
use crate::convert::scalar_from_text;
use crate::convert::scalar_text;
use crate::convert::store_err_to_rusqlite;
use crate::convert::timestamp_from_text;
use crate::convert::timestamp_text;
use crate::convert::to_json;
use crate::schema::initialize_schema;

/// Errors raised while opening a [`SqliteStore`]. Errors raised by an open
/// transaction's methods use [`StoreError`] directly, per the trait contract.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// The underlying driver reported a failure while opening the
    /// connection or initializing the schema.
    #[error("sqlite backend failure: {0}")]
    Db(String),
    /// The database's stored schema version does not match the version
    /// this build of the store understands.
    #[error("schema version mismatch: {0}")]
    VersionMismatch(String),
}

/// Maps a `rusqlite` error onto the backend-agnostic [`StoreError`].
fn rs(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Converts a fallible scalar/JSON encoding step into a `StoreError`,
/// collapsing the `Result<T, StoreError>` the `convert` helpers return.
fn enc<T>(result: Result<T, StoreError>) -> Result<T, rusqlite::Error> {
    result.map_err(store_err_to_rusqlite)
}

/// A `SQLite`-backed dialect of [`Store`]. Holds exactly one connection
/// behind a mutex; every transaction serializes on that mutex for its
/// entire lifetime, matching `BEGIN IMMEDIATE`'s single-writer semantics.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (creating if necessary) a `SQLite` database at `config.path`,
    /// applies the configured pragmas, and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the connection cannot be opened, the
    /// pragmas cannot be applied, or the stored schema version does not
    /// match the version this build understands.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let mut connection = open_connection(&config.path)?;
        apply_pragmas(&connection, config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Mutex::new(connection) })
    }
}

impl Store for SqliteStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let guard = self.connection.lock().map_err(|_| StoreError::Backend("mutex poisoned".to_string()))?;
        guard.execute_batch("BEGIN IMMEDIATE;").map_err(rs)?;
        Ok(Box::new(SqliteTransaction { guard, finished: false }))
    }
}

/// Opens the connection file, creating it if absent. `":memory:"` opens a
/// private, in-process database.
fn open_connection(path: &Path) -> Result<Connection, SqliteStoreError> {
    use rusqlite::OpenFlags;
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    Connection::open_with_flags(path, flags).map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Applies the configured journal mode, synchronous mode, busy timeout, and
/// enables foreign-key enforcement.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// One open transaction. Holds the connection's mutex guard for its entire
/// lifetime; dropping without [`StoreTransaction::commit`] rolls back.
struct SqliteTransaction<'a> {
    guard: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.guard.execute_batch("ROLLBACK;");
        }
    }
}

// ---------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        status: enc(scalar_from_text(&row.get::<_, String>(2)?))?,
        created_at: enc(timestamp_from_text(&row.get::<_, String>(3)?))?,
        updated_at: enc(timestamp_from_text(&row.get::<_, String>(4)?))?,
    })
}

fn row_to_phase(row: &rusqlite::Row<'_>) -> rusqlite::Result<Phase> {
    Ok(Phase {
        id: PhaseId::new(row.get::<_, String>(0)?),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        sequence: row.get(3)?,
    })
}

fn row_to_milestone(row: &rusqlite::Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: MilestoneId::new(row.get::<_, String>(0)?),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        phase_id: PhaseId::new(row.get::<_, String>(2)?),
        name: row.get(3)?,
        sequence: row.get(4)?,
    })
}

const TASK_COLUMNS: &str = "id, project_id, phase_id, milestone_id, title, state, priority, \
    work_spec, task_class, capability_tags, expected_touches, exclusive_paths, shared_paths, \
    introduced_in_plan_version, deprecated_in_plan_version, version, created_at, \
    updated_at, reviewed_by, review_evidence_refs";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: TaskId::new(row.get::<_, String>(0)?),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        phase_id: PhaseId::new(row.get::<_, String>(2)?),
        milestone_id: MilestoneId::new(row.get::<_, String>(3)?),
        title: row.get(4)?,
        state: enc(scalar_from_text(&row.get::<_, String>(5)?))?,
        priority: row.get(6)?,
        work_spec: enc(from_json(&row.get::<_, String>(7)?))?,
        task_class: enc(scalar_from_text(&row.get::<_, String>(8)?))?,
        capability_tags: enc(from_json(&row.get::<_, String>(9)?))?,
        expected_touches: enc(from_json(&row.get::<_, String>(10)?))?,
        exclusive_paths: enc(from_json(&row.get::<_, String>(11)?))?,
        shared_paths: enc(from_json(&row.get::<_, String>(12)?))?,
        introduced_in_plan_version: row.get(13)?,
        deprecated_in_plan_version: row.get(14)?,
        version: row.get(15)?,
        created_at: enc(timestamp_from_text(&row.get::<_, String>(16)?))?,
        updated_at: enc(timestamp_from_text(&row.get::<_, String>(17)?))?,
        reviewed_by: row.get(18)?,
        review_evidence_refs: enc(from_json(&row.get::<_, String>(19)?))?,
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<DependencyEdge> {
    Ok(DependencyEdge {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        from_task_id: TaskId::new(row.get::<_, String>(2)?),
        to_task_id: TaskId::new(row.get::<_, String>(3)?),
        unlock_on: enc(scalar_from_text(&row.get::<_, String>(4)?))?,
    })
}

fn row_to_lease(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lease> {
    Ok(Lease {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        task_id: TaskId::new(row.get::<_, String>(2)?),
        agent_id: row.get::<_, String>(3)?.into(),
        token: row.get(4)?,
        status: enc(scalar_from_text(&row.get::<_, String>(5)?))?,
        expires_at: enc(timestamp_from_text(&row.get::<_, String>(6)?))?,
        heartbeat_at: enc(timestamp_from_text(&row.get::<_, String>(7)?))?,
        fencing_counter: row.get(8)?,
        created_at: enc(timestamp_from_text(&row.get::<_, String>(9)?))?,
        released_at: enc(opt_timestamp_from_text(row.get(10)?))?,
    })
}

fn row_to_reservation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reservation> {
    Ok(Reservation {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        task_id: TaskId::new(row.get::<_, String>(2)?),
        assignee_agent_id: row.get::<_, String>(3)?.into(),
        status: enc(scalar_from_text(&row.get::<_, String>(4)?))?,
        ttl_seconds: row.get(5)?,
        expires_at: enc(timestamp_from_text(&row.get::<_, String>(6)?))?,
        created_by: row.get::<_, String>(7)?.into(),
        created_at: enc(timestamp_from_text(&row.get::<_, String>(8)?))?,
        released_at: enc(opt_timestamp_from_text(row.get(9)?))?,
    })
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskExecutionSnapshot> {
    Ok(TaskExecutionSnapshot {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        task_id: TaskId::new(row.get::<_, String>(2)?),
        lease_id: row.get::<_, String>(3)?.into(),
        captured_plan_version: row.get(4)?,
        work_spec_hash: row.get(5)?,
        work_spec_payload: enc(from_json(&row.get::<_, String>(6)?))?,
        captured_by: row.get(7)?,
        captured_at: enc(timestamp_from_text(&row.get::<_, String>(8)?))?,
    })
}

fn row_to_plan_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlanVersion> {
    Ok(PlanVersion {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        version_number: row.get(2)?,
        change_set_id: row.get::<_, Option<String>>(3)?.map(PlanChangeSetId::from),
        summary: row.get(4)?,
        created_by: row.get(5)?,
        created_at: enc(timestamp_from_text(&row.get::<_, String>(6)?))?,
    })
}

fn row_to_changeset(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlanChangeSet> {
    Ok(PlanChangeSet {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        base_plan_version: row.get(2)?,
        target_plan_version: row.get(3)?,
        status: enc(scalar_from_text(&row.get::<_, String>(4)?))?,
        operations: enc(from_json::<Vec<PlanOperation>>(&row.get::<_, String>(5)?))?,
        impact_preview: row.get(6)?,
        created_by: row.get(7)?,
        applied_at: enc(opt_timestamp_from_text(row.get(8)?))?,
    })
}

fn row_to_gate_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<GateRule> {
    Ok(GateRule {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        applies_to_task_classes: enc(from_json(&row.get::<_, String>(3)?))?,
        required_evidence_kinds: enc(from_json(&row.get::<_, String>(4)?))?,
        required_reviewer_roles: enc(from_json(&row.get::<_, String>(5)?))?,
    })
}

fn row_to_gate_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<GateDecision> {
    let scope_kind: String = row.get(3)?;
    let scope_task_id: Option<String> = row.get(4)?;
    let scope_phase_id: Option<String> = row.get(5)?;
    let scope = match scope_kind.as_str() {
        "task" => GateScope::Task(TaskId::new(scope_task_id.ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(4, "scope_task_id".to_string(), rusqlite::types::Type::Null)
        })?)),
        "phase" => GateScope::Phase(PhaseId::new(scope_phase_id.ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(5, "scope_phase_id".to_string(), rusqlite::types::Type::Null)
        })?)),
        other => {
            return Err(store_err_to_rusqlite(StoreError::Backend(format!(
                "unrecognized gate scope kind: {other}"
            ))));
        }
    };
    Ok(GateDecision {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        gate_rule_id: row.get::<_, Option<String>>(2)?.map(GateRuleId::from),
        scope,
        outcome: enc(scalar_from_text(&row.get::<_, String>(6)?))?,
        evidence_refs: enc(from_json(&row.get::<_, String>(7)?))?,
        decided_by: row.get(8)?,
        decided_at: enc(timestamp_from_text(&row.get::<_, String>(9)?))?,
    })
}

fn row_to_gate_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<GatePolicy> {
    Ok(GatePolicy {
        project_id: ProjectId::new(row.get::<_, String>(0)?),
        implemented_backlog_threshold: row.get(1)?,
        risk_threshold: row.get(2)?,
        implemented_age_hours: row.get(3)?,
        risk_task_classes: enc(from_json(&row.get::<_, String>(4)?))?,
    })
}

fn row_to_artifact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artifact> {
    Ok(Artifact {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        task_id: TaskId::new(row.get::<_, String>(2)?),
        kind: row.get(3)?,
        uri: row.get(4)?,
        content_hash: row.get(5)?,
        created_by: row.get(6)?,
        created_at: enc(timestamp_from_text(&row.get::<_, String>(7)?))?,
    })
}

fn row_to_integration_attempt(row: &rusqlite::Row<'_>) -> rusqlite::Result<IntegrationAttempt> {
    Ok(IntegrationAttempt {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        task_id: TaskId::new(row.get::<_, String>(2)?),
        status: enc(scalar_from_text(&row.get::<_, String>(3)?))?,
        result: row.get::<_, Option<String>>(4)?.map(|text| scalar_from_text(&text)).transpose().map_err(store_err_to_rusqlite)?,
        detail: row.get(5)?,
        enqueued_at: enc(timestamp_from_text(&row.get::<_, String>(6)?))?,
        started_at: enc(opt_timestamp_from_text(row.get(7)?))?,
        completed_at: enc(opt_timestamp_from_text(row.get(8)?))?,
    })
}

fn row_to_api_key(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApiKey> {
    let scope_kind: String = row.get(1)?;
    let scope_project_id: Option<String> = row.get(2)?;
    let scope = match scope_kind.as_str() {
        "project" => ApiKeyScope::Project(ProjectId::new(scope_project_id.ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(2, "scope_project_id".to_string(), rusqlite::types::Type::Null)
        })?)),
        "global" => ApiKeyScope::Global,
        other => {
            return Err(store_err_to_rusqlite(StoreError::Backend(format!(
                "unrecognized api key scope kind: {other}"
            ))));
        }
    };
    Ok(ApiKey {
        id: row.get::<_, String>(0)?.into(),
        scope,
        name: row.get(3)?,
        hash: row.get(4)?,
        status: enc(scalar_from_text(&row.get::<_, String>(5)?))?,
        role_scopes: enc(from_json(&row.get::<_, String>(6)?))?,
        created_by: row.get(7)?,
        created_at: enc(timestamp_from_text(&row.get::<_, String>(8)?))?,
        last_used_at: enc(opt_timestamp_from_text(row.get(9)?))?,
        revoked_at: enc(opt_timestamp_from_text(row.get(10)?))?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventLog> {
    Ok(EventLog {
        id: EventLogId::new(row.get(0)?),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        entity_type: row.get(2)?,
        entity_id: row.get(3)?,
        event_type: enc(scalar_from_text(&row.get::<_, String>(4)?))?,
        payload: enc(from_json(&row.get::<_, String>(5)?))?,
        caused_by: row.get(6)?,
        created_at: enc(timestamp_from_text(&row.get::<_, String>(7)?))?,
    })
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricsJobCheckpoint> {
    Ok(MetricsJobCheckpoint {
        project_id: ProjectId::new(row.get::<_, String>(0)?),
        mode: enc(scalar_from_text(&row.get::<_, String>(1)?))?,
        last_event_id: row.get(2)?,
        last_success_at: enc(opt_timestamp_from_text(row.get(3)?))?,
    })
}

fn row_to_job_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricsJobRun> {
    Ok(MetricsJobRun {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        mode: enc(scalar_from_text(&row.get::<_, String>(2)?))?,
        idempotency_key: row.get(3)?,
        status: enc(scalar_from_text(&row.get::<_, String>(4)?))?,
        start_event_id: row.get(5)?,
        end_event_id: row.get(6)?,
        processed_events: row.get(7)?,
        failure_reason: row.get(8)?,
        completed_at: enc(timestamp_from_text(&row.get::<_, String>(9)?))?,
    })
}

fn row_to_transition_counter(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricsStateTransitionCounter> {
    Ok(MetricsStateTransitionCounter {
        project_id: ProjectId::new(row.get::<_, String>(0)?),
        mode: enc(scalar_from_text(&row.get::<_, String>(1)?))?,
        to_state: enc(scalar_from_text(&row.get::<_, String>(2)?))?,
        transition_count: row.get(3)?,
        last_event_id: EventLogId::new(row.get(4)?),
    })
}

fn row_to_metrics_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricsSnapshot> {
    Ok(MetricsSnapshot {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        north_star: enc(from_json::<NorthStarMetrics>(&row.get::<_, String>(2)?))?,
        operational: enc(from_json::<OperationalMetrics>(&row.get::<_, String>(3)?))?,
        captured_at: enc(timestamp_from_text(&row.get::<_, String>(4)?))?,
    })
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get::<_, String>(0)?.into(),
        project_id: ProjectId::new(row.get::<_, String>(1)?),
        metric_key: row.get(2)?,
        alert_type: enc(scalar_from_text::<AlertType>(&row.get::<_, String>(3)?))?,
        severity: row
            .get::<_, Option<String>>(4)?
            .map(|text| scalar_from_text::<AlertSeverity>(&text))
            .transpose()
            .map_err(store_err_to_rusqlite)?,
        value: row.get(5)?,
        threshold: row.get(6)?,
        context: enc(from_json(&row.get::<_, String>(7)?))?,
        created_at: enc(timestamp_from_text(&row.get::<_, String>(8)?))?,
    })
}

impl StoreTransaction for SqliteTransaction<'_> {
    // -- projects ------------------------------------------------------
    fn insert_project(&mut self, project: &Project) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO projects (id, name, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    project.id.as_str(),
                    project.name,
                    scalar_text(&project.status)?,
                    timestamp_text(project.created_at)?,
                    timestamp_text(project.updated_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_project(&mut self, id: &ProjectId) -> Result<Option<Project>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, name, status, created_at, updated_at FROM projects WHERE id = ?1",
                params![id.as_str()],
                row_to_project,
            )
            .optional()
            .map_err(rs)
    }

    fn list_projects(&mut self) -> Result<Vec<Project>, StoreError> {
        let mut stmt = self
            .guard
            .prepare("SELECT id, name, status, created_at, updated_at FROM projects ORDER BY created_at ASC")
            .map_err(rs)?;
        let rows = stmt.query_map(params![], row_to_project).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    fn update_project(&mut self, project: &Project) -> Result<(), StoreError> {
        self.guard
            .execute(
                "UPDATE projects SET name = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    project.id.as_str(),
                    project.name,
                    scalar_text(&project.status)?,
                    timestamp_text(project.updated_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    // -- phases / milestones --------------------------------------------
    fn insert_phase(&mut self, phase: &Phase) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO phases (id, project_id, name, sequence) VALUES (?1, ?2, ?3, ?4)",
                params![phase.id.as_str(), phase.project_id.as_str(), phase.name, phase.sequence],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_phase(&mut self, id: &PhaseId) -> Result<Option<Phase>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, name, sequence FROM phases WHERE id = ?1",
                params![id.as_str()],
                row_to_phase,
            )
            .optional()
            .map_err(rs)
    }

    fn max_phase_sequence(&mut self, project_id: &ProjectId) -> Result<Option<i64>, StoreError> {
        self.guard
            .query_row(
                "SELECT MAX(sequence) FROM phases WHERE project_id = ?1",
                params![project_id.as_str()],
                |row| row.get(0),
            )
            .map_err(rs)
    }

    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO milestones (id, project_id, phase_id, name, sequence) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    milestone.id.as_str(),
                    milestone.project_id.as_str(),
                    milestone.phase_id.as_str(),
                    milestone.name,
                    milestone.sequence,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_milestone(&mut self, id: &MilestoneId) -> Result<Option<Milestone>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, phase_id, name, sequence FROM milestones WHERE id = ?1",
                params![id.as_str()],
                row_to_milestone,
            )
            .optional()
            .map_err(rs)
    }

    fn max_milestone_sequence(&mut self, phase_id: &PhaseId) -> Result<Option<i64>, StoreError> {
        self.guard
            .query_row(
                "SELECT MAX(sequence) FROM milestones WHERE phase_id = ?1",
                params![phase_id.as_str()],
                |row| row.get(0),
            )
            .map_err(rs)
    }

    // -- tasks -----------------------------------------------------------
    fn insert_task(&mut self, task: &Task) -> Result<(), StoreError> {
        self.guard
            .execute(
                &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)"),
                params![
                    task.id.as_str(),
                    task.project_id.as_str(),
                    task.phase_id.as_str(),
                    task.milestone_id.as_str(),
                    task.title,
                    scalar_text(&task.state)?,
                    task.priority,
                    to_json(&task.work_spec)?,
                    scalar_text(&task.task_class)?,
                    to_json(&task.capability_tags)?,
                    to_json(&task.expected_touches)?,
                    to_json(&task.exclusive_paths)?,
                    to_json(&task.shared_paths)?,
                    task.introduced_in_plan_version,
                    task.deprecated_in_plan_version,
                    task.version,
                    timestamp_text(task.created_at)?,
                    timestamp_text(task.updated_at)?,
                    task.reviewed_by,
                    to_json(&task.review_evidence_refs)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_task(&mut self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        self.guard
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.as_str()],
                row_to_task,
            )
            .optional()
            .map_err(rs)
    }

    fn lock_task(&mut self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        // SQLite has no row-level locking; the `BEGIN IMMEDIATE` transaction
        // this store opens already holds the database-wide write lock for
        // its entire duration, so a plain read gives the same mutual
        // exclusion the trait's `lock_task` doc requires.
        self.get_task(id)
    }

    fn update_task(&mut self, task: &Task) -> Result<(), StoreError> {
        self.guard
            .execute(
                "UPDATE tasks SET title = ?2, state = ?3, priority = ?4, work_spec = ?5, \
                 task_class = ?6, capability_tags = ?7, expected_touches = ?8, exclusive_paths = ?9, \
                 shared_paths = ?10, introduced_in_plan_version = ?11, deprecated_in_plan_version = ?12, \
                 version = ?13, updated_at = ?14, reviewed_by = ?15, review_evidence_refs = ?16 WHERE id = ?1",
                params![
                    task.id.as_str(),
                    task.title,
                    scalar_text(&task.state)?,
                    task.priority,
                    to_json(&task.work_spec)?,
                    scalar_text(&task.task_class)?,
                    to_json(&task.capability_tags)?,
                    to_json(&task.expected_touches)?,
                    to_json(&task.exclusive_paths)?,
                    to_json(&task.shared_paths)?,
                    task.introduced_in_plan_version,
                    task.deprecated_in_plan_version,
                    task.version,
                    timestamp_text(task.updated_at)?,
                    task.reviewed_by,
                    to_json(&task.review_evidence_refs)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn list_tasks(&mut self, project_id: &ProjectId, filter: &TaskListFilter) -> Result<Vec<Task>, StoreError> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1");
        let mut owned_params: Vec<Box<dyn ToSql>> = vec![Box::new(project_id.as_str().to_string())];
        if let Some(phase_id) = &filter.phase_id {
            owned_params.push(Box::new(phase_id.as_str().to_string()));
            sql.push_str(&format!(" AND phase_id = ?{}", owned_params.len()));
        }
        if let Some(milestone_id) = &filter.milestone_id {
            owned_params.push(Box::new(milestone_id.as_str().to_string()));
            sql.push_str(&format!(" AND milestone_id = ?{}", owned_params.len()));
        }
        if let Some(state) = filter.state {
            owned_params.push(Box::new(scalar_text(&state)?));
            sql.push_str(&format!(" AND state = ?{}", owned_params.len()));
        }
        sql.push_str(" ORDER BY priority ASC, created_at ASC");
        let refs: Vec<&dyn ToSql> = owned_params.iter().map(std::convert::AsRef::as_ref).collect();
        let mut stmt = self.guard.prepare(&sql).map_err(rs)?;
        let rows = stmt.query_map(refs.as_slice(), row_to_task).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    // -- dependency graph -------------------------------------------------
    fn insert_dependency_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO dependency_edges (id, project_id, from_task_id, to_task_id, unlock_on) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    edge.id.as_str(),
                    edge.project_id.as_str(),
                    edge.from_task_id.as_str(),
                    edge.to_task_id.as_str(),
                    scalar_text(&edge.unlock_on)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn list_project_edges(&mut self, project_id: &ProjectId) -> Result<Vec<DependencyEdge>, StoreError> {
        let mut stmt = self
            .guard
            .prepare("SELECT id, project_id, from_task_id, to_task_id, unlock_on FROM dependency_edges WHERE project_id = ?1")
            .map_err(rs)?;
        let rows = stmt.query_map(params![project_id.as_str()], row_to_edge).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    fn list_outgoing_edges(&mut self, project_id: &ProjectId, from_task_id: &TaskId) -> Result<Vec<DependencyEdge>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, from_task_id, to_task_id, unlock_on FROM dependency_edges \
                 WHERE project_id = ?1 AND from_task_id = ?2",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![project_id.as_str(), from_task_id.as_str()], row_to_edge).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    fn list_incoming_edges(&mut self, project_id: &ProjectId, to_task_id: &TaskId) -> Result<Vec<DependencyEdge>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, from_task_id, to_task_id, unlock_on FROM dependency_edges \
                 WHERE project_id = ?1 AND to_task_id = ?2",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![project_id.as_str(), to_task_id.as_str()], row_to_edge).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    // -- leases ------------------------------------------------------------
    fn insert_lease(&mut self, lease: &Lease) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO leases (id, project_id, task_id, agent_id, token, status, expires_at, \
                 heartbeat_at, fencing_counter, created_at, released_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    lease.id.as_str(),
                    lease.project_id.as_str(),
                    lease.task_id.as_str(),
                    lease.agent_id.as_str(),
                    lease.token,
                    scalar_text(&lease.status)?,
                    timestamp_text(lease.expires_at)?,
                    timestamp_text(lease.heartbeat_at)?,
                    lease.fencing_counter,
                    timestamp_text(lease.created_at)?,
                    opt_timestamp_text(lease.released_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_active_lease_for_task(&mut self, task_id: &TaskId) -> Result<Option<Lease>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, task_id, agent_id, token, status, expires_at, heartbeat_at, \
                 fencing_counter, created_at, released_at FROM leases WHERE task_id = ?1 AND status = 'active'",
                params![task_id.as_str()],
                row_to_lease,
            )
            .optional()
            .map_err(rs)
    }

    fn get_active_lease_by_token(&mut self, task_id: &TaskId, agent_id: &str, token: &str) -> Result<Option<Lease>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, task_id, agent_id, token, status, expires_at, heartbeat_at, \
                 fencing_counter, created_at, released_at FROM leases \
                 WHERE task_id = ?1 AND agent_id = ?2 AND token = ?3 AND status = 'active'",
                params![task_id.as_str(), agent_id, token],
                row_to_lease,
            )
            .optional()
            .map_err(rs)
    }

    fn update_lease(&mut self, lease: &Lease) -> Result<(), StoreError> {
        self.guard
            .execute(
                "UPDATE leases SET status = ?2, expires_at = ?3, heartbeat_at = ?4, released_at = ?5 WHERE id = ?1",
                params![
                    lease.id.as_str(),
                    scalar_text(&lease.status)?,
                    timestamp_text(lease.expires_at)?,
                    timestamp_text(lease.heartbeat_at)?,
                    opt_timestamp_text(lease.released_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn max_fencing_counter(&mut self, task_id: &TaskId) -> Result<i64, StoreError> {
        self.guard
            .query_row(
                "SELECT COALESCE(MAX(fencing_counter), 0) FROM leases WHERE task_id = ?1",
                params![task_id.as_str()],
                |row| row.get(0),
            )
            .map_err(rs)
    }

    fn list_expired_leases(&mut self, now: Timestamp) -> Result<Vec<Lease>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, task_id, agent_id, token, status, expires_at, heartbeat_at, \
                 fencing_counter, created_at, released_at FROM leases WHERE status = 'active' AND expires_at < ?1",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![timestamp_text(now)?], row_to_lease).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    // -- reservations --------------------------------------------------
    fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO reservations (id, project_id, task_id, assignee_agent_id, status, \
                 ttl_seconds, expires_at, created_by, created_at, released_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    reservation.id.as_str(),
                    reservation.project_id.as_str(),
                    reservation.task_id.as_str(),
                    reservation.assignee_agent_id.as_str(),
                    scalar_text(&reservation.status)?,
                    reservation.ttl_seconds,
                    timestamp_text(reservation.expires_at)?,
                    reservation.created_by.as_str(),
                    timestamp_text(reservation.created_at)?,
                    opt_timestamp_text(reservation.released_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_active_reservation_for_task(&mut self, task_id: &TaskId) -> Result<Option<Reservation>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, task_id, assignee_agent_id, status, ttl_seconds, expires_at, \
                 created_by, created_at, released_at FROM reservations WHERE task_id = ?1 AND status = 'active'",
                params![task_id.as_str()],
                row_to_reservation,
            )
            .optional()
            .map_err(rs)
    }

    fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        self.guard
            .execute(
                "UPDATE reservations SET status = ?2, expires_at = ?3, released_at = ?4 WHERE id = ?1",
                params![
                    reservation.id.as_str(),
                    scalar_text(&reservation.status)?,
                    timestamp_text(reservation.expires_at)?,
                    opt_timestamp_text(reservation.released_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn list_expired_reservations(&mut self, now: Timestamp) -> Result<Vec<Reservation>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, task_id, assignee_agent_id, status, ttl_seconds, expires_at, \
                 created_by, created_at, released_at FROM reservations WHERE status = 'active' AND expires_at < ?1",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![timestamp_text(now)?], row_to_reservation).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    // -- snapshots -----------------------------------------------------
    fn insert_snapshot(&mut self, snapshot: &TaskExecutionSnapshot) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO task_execution_snapshots (id, project_id, task_id, lease_id, \
                 captured_plan_version, work_spec_hash, work_spec_payload, captured_by, captured_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    snapshot.id.as_str(),
                    snapshot.project_id.as_str(),
                    snapshot.task_id.as_str(),
                    snapshot.lease_id.as_str(),
                    snapshot.captured_plan_version,
                    snapshot.work_spec_hash,
                    to_json(&snapshot.work_spec_payload)?,
                    snapshot.captured_by,
                    timestamp_text(snapshot.captured_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    // -- plan versioning -------------------------------------------------
    fn current_plan_version(&mut self, project_id: &ProjectId) -> Result<i64, StoreError> {
        self.guard
            .query_row(
                "SELECT COALESCE(MAX(version_number), 0) FROM plan_versions WHERE project_id = ?1",
                params![project_id.as_str()],
                |row| row.get(0),
            )
            .map_err(rs)
    }

    fn insert_plan_version(&mut self, version: &PlanVersion) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO plan_versions (id, project_id, version_number, change_set_id, summary, \
                 created_by, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    version.id.as_str(),
                    version.project_id.as_str(),
                    version.version_number,
                    version.change_set_id.as_ref().map(fleetgraph_core::ids::PlanChangeSetId::as_str),
                    version.summary,
                    version.created_by,
                    timestamp_text(version.created_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn insert_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO plan_changesets (id, project_id, base_plan_version, target_plan_version, \
                 status, operations, impact_preview, created_by, applied_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    changeset.id.as_str(),
                    changeset.project_id.as_str(),
                    changeset.base_plan_version,
                    changeset.target_plan_version,
                    scalar_text(&changeset.status)?,
                    to_json(&changeset.operations)?,
                    changeset.impact_preview,
                    changeset.created_by,
                    opt_timestamp_text(changeset.applied_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_changeset(&mut self, id: &PlanChangeSetId) -> Result<Option<PlanChangeSet>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, base_plan_version, target_plan_version, status, operations, \
                 impact_preview, created_by, applied_at FROM plan_changesets WHERE id = ?1",
                params![id.as_str()],
                row_to_changeset,
            )
            .optional()
            .map_err(rs)
    }

    fn update_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError> {
        self.guard
            .execute(
                "UPDATE plan_changesets SET status = ?2, applied_at = ?3 WHERE id = ?1",
                params![
                    changeset.id.as_str(),
                    scalar_text(&changeset.status)?,
                    opt_timestamp_text(changeset.applied_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    // -- gates -----------------------------------------------------------
    fn insert_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO gate_rules (id, project_id, name, applies_to_task_classes, \
                 required_evidence_kinds, required_reviewer_roles) VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    rule.id.as_str(),
                    rule.project_id.as_str(),
                    rule.name,
                    to_json(&rule.applies_to_task_classes)?,
                    to_json(&rule.required_evidence_kinds)?,
                    to_json(&rule.required_reviewer_roles)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_gate_rule(&mut self, id: &GateRuleId) -> Result<Option<GateRule>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, name, applies_to_task_classes, required_evidence_kinds, \
                 required_reviewer_roles FROM gate_rules WHERE id = ?1",
                params![id.as_str()],
                row_to_gate_rule,
            )
            .optional()
            .map_err(rs)
    }

    fn insert_gate_decision(&mut self, decision: &GateDecision) -> Result<(), StoreError> {
        let (scope_kind, scope_task_id, scope_phase_id) = match &decision.scope {
            GateScope::Task(task_id) => ("task", Some(task_id.as_str().to_string()), None),
            GateScope::Phase(phase_id) => ("phase", None, Some(phase_id.as_str().to_string())),
        };
        self.guard
            .execute(
                "INSERT INTO gate_decisions (id, project_id, gate_rule_id, scope_kind, scope_task_id, \
                 scope_phase_id, outcome, evidence_refs, decided_by, decided_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    decision.id.as_str(),
                    decision.project_id.as_str(),
                    decision.gate_rule_id.as_ref().map(fleetgraph_core::ids::GateRuleId::as_str),
                    scope_kind,
                    scope_task_id,
                    scope_phase_id,
                    scalar_text(&decision.outcome)?,
                    to_json(&decision.evidence_refs)?,
                    decision.decided_by,
                    timestamp_text(decision.decided_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn list_gate_decisions(&mut self, project_id: &ProjectId, scope: Option<&GateScope>) -> Result<Vec<GateDecision>, StoreError> {
        let columns = "id, project_id, gate_rule_id, scope_kind, scope_task_id, scope_phase_id, \
            outcome, evidence_refs, decided_by, decided_at";
        match scope {
            None => {
                let mut stmt = self.guard.prepare(&format!("SELECT {columns} FROM gate_decisions WHERE project_id = ?1")).map_err(rs)?;
                let rows = stmt.query_map(params![project_id.as_str()], row_to_gate_decision).map_err(rs)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(rs)
            }
            Some(GateScope::Task(task_id)) => {
                let mut stmt = self
                    .guard
                    .prepare(&format!(
                        "SELECT {columns} FROM gate_decisions WHERE project_id = ?1 AND scope_kind = 'task' AND scope_task_id = ?2"
                    ))
                    .map_err(rs)?;
                let rows = stmt.query_map(params![project_id.as_str(), task_id.as_str()], row_to_gate_decision).map_err(rs)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(rs)
            }
            Some(GateScope::Phase(phase_id)) => {
                let mut stmt = self
                    .guard
                    .prepare(&format!(
                        "SELECT {columns} FROM gate_decisions WHERE project_id = ?1 AND scope_kind = 'phase' AND scope_phase_id = ?2"
                    ))
                    .map_err(rs)?;
                let rows = stmt.query_map(params![project_id.as_str(), phase_id.as_str()], row_to_gate_decision).map_err(rs)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(rs)
            }
        }
    }

    fn get_gate_policy(&mut self, project_id: &ProjectId) -> Result<Option<GatePolicy>, StoreError> {
        self.guard
            .query_row(
                "SELECT project_id, implemented_backlog_threshold, risk_threshold, \
                 implemented_age_hours, risk_task_classes FROM gate_policies WHERE project_id = ?1",
                params![project_id.as_str()],
                row_to_gate_policy,
            )
            .optional()
            .map_err(rs)
    }

    fn find_open_policy_gate_task(
        &mut self,
        project_id: &ProjectId,
        trigger: PolicyTrigger,
        candidate_task_ids: &[TaskId],
    ) -> Result<Option<Task>, StoreError> {
        let mut wanted: Vec<&str> = candidate_task_ids.iter().map(TaskId::as_str).collect();
        wanted.sort_unstable();
        let mut stmt = self
            .guard
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 AND task_class = 'review_gate' \
                 AND state NOT IN ('integrated', 'abandoned', 'cancelled')"
            ))
            .map_err(rs)?;
        let rows = stmt.query_map(params![project_id.as_str()], row_to_task).map_err(rs)?;
        let wanted_trigger = scalar_text(&trigger)?;
        for task in rows.collect::<Result<Vec<_>, _>>().map_err(rs)? {
            let Some(recorded_trigger) = task.work_spec.get("policy_trigger").and_then(|value| value.as_str()) else {
                continue;
            };
            if recorded_trigger != wanted_trigger {
                continue;
            }
            let Some(recorded_candidates) = task.work_spec.get("candidate_task_ids").and_then(|value| value.as_array()) else {
                continue;
            };
            let mut recorded: Vec<&str> = recorded_candidates.iter().filter_map(|value| value.as_str()).collect();
            recorded.sort_unstable();
            if recorded == wanted {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    // -- artifacts / integration attempts ---------------------------------
    fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO artifacts (id, project_id, task_id, kind, uri, content_hash, created_by, \
                 created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    artifact.id.as_str(),
                    artifact.project_id.as_str(),
                    artifact.task_id.as_str(),
                    artifact.kind,
                    artifact.uri,
                    artifact.content_hash,
                    artifact.created_by,
                    timestamp_text(artifact.created_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn list_task_artifacts(&mut self, task_id: &TaskId) -> Result<Vec<Artifact>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, task_id, kind, uri, content_hash, created_by, created_at \
                 FROM artifacts WHERE task_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![task_id.as_str()], row_to_artifact).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    fn insert_integration_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO integration_attempts (id, project_id, task_id, status, result, detail, \
                 enqueued_at, started_at, completed_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    attempt.id.as_str(),
                    attempt.project_id.as_str(),
                    attempt.task_id.as_str(),
                    scalar_text(&attempt.status)?,
                    attempt.result.map(|result| scalar_text(&result)).transpose()?,
                    attempt.detail,
                    timestamp_text(attempt.enqueued_at)?,
                    opt_timestamp_text(attempt.started_at)?,
                    opt_timestamp_text(attempt.completed_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_integration_attempt(&mut self, id: &IntegrationAttemptId) -> Result<Option<IntegrationAttempt>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, task_id, status, result, detail, enqueued_at, started_at, \
                 completed_at FROM integration_attempts WHERE id = ?1",
                params![id.as_str()],
                row_to_integration_attempt,
            )
            .optional()
            .map_err(rs)
    }

    fn update_integration_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError> {
        self.guard
            .execute(
                "UPDATE integration_attempts SET status = ?2, result = ?3, detail = ?4, started_at = ?5, \
                 completed_at = ?6 WHERE id = ?1",
                params![
                    attempt.id.as_str(),
                    scalar_text(&attempt.status)?,
                    attempt.result.map(|result| scalar_text(&result)).transpose()?,
                    attempt.detail,
                    opt_timestamp_text(attempt.started_at)?,
                    opt_timestamp_text(attempt.completed_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn list_integration_attempts(&mut self, task_id: &TaskId) -> Result<Vec<IntegrationAttempt>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, task_id, status, result, detail, enqueued_at, started_at, \
                 completed_at FROM integration_attempts WHERE task_id = ?1 ORDER BY enqueued_at ASC",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![task_id.as_str()], row_to_integration_attempt).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    fn list_project_integration_attempts(&mut self, project_id: &ProjectId) -> Result<Vec<IntegrationAttempt>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, task_id, status, result, detail, enqueued_at, started_at, \
                 completed_at FROM integration_attempts WHERE project_id = ?1 ORDER BY enqueued_at ASC",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![project_id.as_str()], row_to_integration_attempt).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    // -- api keys --------------------------------------------------------
    fn insert_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        let (scope_kind, scope_project_id) = match &key.scope {
            ApiKeyScope::Project(project_id) => ("project", Some(project_id.as_str().to_string())),
            ApiKeyScope::Global => ("global", None),
        };
        self.guard
            .execute(
                "INSERT INTO api_keys (id, scope_kind, scope_project_id, name, hash, status, \
                 role_scopes, created_by, created_at, last_used_at, revoked_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    key.id.as_str(),
                    scope_kind,
                    scope_project_id,
                    key.name,
                    key.hash,
                    scalar_text(&key.status)?,
                    to_json(&key.role_scopes)?,
                    key.created_by,
                    timestamp_text(key.created_at)?,
                    opt_timestamp_text(key.last_used_at)?,
                    opt_timestamp_text(key.revoked_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_api_key_by_hash(&mut self, hash: &str) -> Result<Option<ApiKey>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, scope_kind, scope_project_id, name, hash, status, role_scopes, created_by, \
                 created_at, last_used_at, revoked_at FROM api_keys WHERE hash = ?1",
                params![hash],
                row_to_api_key,
            )
            .optional()
            .map_err(rs)
    }

    fn list_api_keys(&mut self, project_id: Option<&ProjectId>) -> Result<Vec<ApiKey>, StoreError> {
        let columns = "id, scope_kind, scope_project_id, name, hash, status, role_scopes, created_by, \
            created_at, last_used_at, revoked_at";
        match project_id {
            None => {
                let mut stmt = self.guard.prepare(&format!("SELECT {columns} FROM api_keys ORDER BY created_at ASC")).map_err(rs)?;
                let rows = stmt.query_map(params![], row_to_api_key).map_err(rs)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(rs)
            }
            Some(project_id) => {
                let mut stmt = self
                    .guard
                    .prepare(&format!(
                        "SELECT {columns} FROM api_keys WHERE scope_kind = 'project' AND scope_project_id = ?1 ORDER BY created_at ASC"
                    ))
                    .map_err(rs)?;
                let rows = stmt.query_map(params![project_id.as_str()], row_to_api_key).map_err(rs)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(rs)
            }
        }
    }

    fn update_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        self.guard
            .execute(
                "UPDATE api_keys SET status = ?2, last_used_at = ?3, revoked_at = ?4 WHERE id = ?1",
                params![
                    key.id.as_str(),
                    scalar_text(&key.status)?,
                    opt_timestamp_text(key.last_used_at)?,
                    opt_timestamp_text(key.revoked_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_api_key(&mut self, id: &ApiKeyId) -> Result<Option<ApiKey>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, scope_kind, scope_project_id, name, hash, status, role_scopes, created_by, \
                 created_at, last_used_at, revoked_at FROM api_keys WHERE id = ?1",
                params![id.as_str()],
                row_to_api_key,
            )
            .optional()
            .map_err(rs)
    }

    // -- event log ---------------------------------------------------------
    fn append_event(&mut self, event: NewEvent) -> Result<EventLogId, StoreError> {
        self.guard
            .execute(
                "INSERT INTO event_log (project_id, entity_type, entity_id, event_type, payload, \
                 caused_by, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    event.project_id.as_str(),
                    event.entity_type,
                    event.entity_id,
                    scalar_text(&event.event_type)?,
                    to_json(&event.payload)?,
                    event.caused_by,
                    timestamp_text(Timestamp::new(time::OffsetDateTime::now_utc()))?,
                ],
            )
            .map_err(rs)?;
        Ok(EventLogId::new(self.guard.last_insert_rowid()))
    }

    fn list_events_from(
        &mut self,
        project_id: &ProjectId,
        event_type: EventType,
        from_id: EventLogId,
        limit: i64,
    ) -> Result<Vec<EventLog>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, entity_type, entity_id, event_type, payload, caused_by, created_at \
                 FROM event_log WHERE project_id = ?1 AND event_type = ?2 AND id >= ?3 ORDER BY id ASC LIMIT ?4",
            )
            .map_err(rs)?;
        let rows = stmt
            .query_map(params![project_id.as_str(), scalar_text(&event_type)?, from_id.value(), limit], row_to_event)
            .map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    // -- metrics -------------------------------------------------------
    fn get_checkpoint(&mut self, project_id: &ProjectId, mode: MetricsMode) -> Result<Option<MetricsJobCheckpoint>, StoreError> {
        self.guard
            .query_row(
                "SELECT project_id, mode, last_event_id, last_success_at FROM metrics_job_checkpoints \
                 WHERE project_id = ?1 AND mode = ?2",
                params![project_id.as_str(), scalar_text(&mode)?],
                row_to_checkpoint,
            )
            .optional()
            .map_err(rs)
    }

    fn upsert_checkpoint(&mut self, checkpoint: &MetricsJobCheckpoint) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO metrics_job_checkpoints (project_id, mode, last_event_id, last_success_at) \
                 VALUES (?1,?2,?3,?4) \
                 ON CONFLICT (project_id, mode) DO UPDATE SET last_event_id = excluded.last_event_id, \
                 last_success_at = excluded.last_success_at",
                params![
                    checkpoint.project_id.as_str(),
                    scalar_text(&checkpoint.mode)?,
                    checkpoint.last_event_id,
                    opt_timestamp_text(checkpoint.last_success_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_job_run_by_idempotency_key(&mut self, project_id: &ProjectId, idempotency_key: &str) -> Result<Option<MetricsJobRun>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, mode, idempotency_key, status, start_event_id, end_event_id, \
                 processed_events, failure_reason, completed_at FROM metrics_job_runs \
                 WHERE project_id = ?1 AND idempotency_key = ?2",
                params![project_id.as_str(), idempotency_key],
                row_to_job_run,
            )
            .optional()
            .map_err(rs)
    }

    fn insert_job_run(&mut self, run: &MetricsJobRun) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO metrics_job_runs (id, project_id, mode, idempotency_key, status, \
                 start_event_id, end_event_id, processed_events, failure_reason, completed_at) \
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                params![
                    run.id.as_str(),
                    run.project_id.as_str(),
                    scalar_text(&run.mode)?,
                    run.idempotency_key,
                    scalar_text(&run.status)?,
                    run.start_event_id,
                    run.end_event_id,
                    run.processed_events,
                    run.failure_reason,
                    timestamp_text(run.completed_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_job_run(&mut self, id: &MetricsJobRunId) -> Result<Option<MetricsJobRun>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, mode, idempotency_key, status, start_event_id, end_event_id, \
                 processed_events, failure_reason, completed_at FROM metrics_job_runs WHERE id = ?1",
                params![id.as_str()],
                row_to_job_run,
            )
            .optional()
            .map_err(rs)
    }

    fn upsert_transition_counter(&mut self, counter: &MetricsStateTransitionCounter) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO metrics_state_transition_counters (project_id, mode, to_state, \
                 transition_count, last_event_id) VALUES (?1,?2,?3,?4,?5) \
                 ON CONFLICT (project_id, mode, to_state) DO UPDATE SET \
                 transition_count = excluded.transition_count, last_event_id = excluded.last_event_id",
                params![
                    counter.project_id.as_str(),
                    scalar_text(&counter.mode)?,
                    scalar_text(&counter.to_state)?,
                    counter.transition_count,
                    counter.last_event_id.value(),
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_transition_counter(
        &mut self,
        project_id: &ProjectId,
        mode: MetricsMode,
        to_state: TaskState,
    ) -> Result<Option<MetricsStateTransitionCounter>, StoreError> {
        self.guard
            .query_row(
                "SELECT project_id, mode, to_state, transition_count, last_event_id \
                 FROM metrics_state_transition_counters WHERE project_id = ?1 AND mode = ?2 AND to_state = ?3",
                params![project_id.as_str(), scalar_text(&mode)?, scalar_text(&to_state)?],
                row_to_transition_counter,
            )
            .optional()
            .map_err(rs)
    }

    fn delete_transition_counters(&mut self, project_id: &ProjectId, mode: MetricsMode) -> Result<(), StoreError> {
        self.guard
            .execute(
                "DELETE FROM metrics_state_transition_counters WHERE project_id = ?1 AND mode = ?2",
                params![project_id.as_str(), scalar_text(&mode)?],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn list_transition_counters(&mut self, project_id: &ProjectId, mode: MetricsMode) -> Result<Vec<MetricsStateTransitionCounter>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT project_id, mode, to_state, transition_count, last_event_id \
                 FROM metrics_state_transition_counters WHERE project_id = ?1 AND mode = ?2",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![project_id.as_str(), scalar_text(&mode)?], row_to_transition_counter).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    fn insert_metrics_snapshot(&mut self, snapshot: &MetricsSnapshot) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO metrics_snapshots (id, project_id, north_star, operational, captured_at) \
                 VALUES (?1,?2,?3,?4,?5)",
                params![
                    snapshot.id.as_str(),
                    snapshot.project_id.as_str(),
                    to_json(&snapshot.north_star)?,
                    to_json(&snapshot.operational)?,
                    timestamp_text(snapshot.captured_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_metrics_snapshot(&mut self, id: &MetricsSnapshotId) -> Result<Option<MetricsSnapshot>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, north_star, operational, captured_at FROM metrics_snapshots WHERE id = ?1",
                params![id.as_str()],
                row_to_metrics_snapshot,
            )
            .optional()
            .map_err(rs)
    }

    fn get_latest_metrics_snapshot(&mut self, project_id: &ProjectId) -> Result<Option<MetricsSnapshot>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, north_star, operational, captured_at FROM metrics_snapshots \
                 WHERE project_id = ?1 ORDER BY captured_at DESC LIMIT 1",
                params![project_id.as_str()],
                row_to_metrics_snapshot,
            )
            .optional()
            .map_err(rs)
    }

    // -- alerts ----------------------------------------------------------
    fn insert_alert(&mut self, alert: &Alert) -> Result<(), StoreError> {
        self.guard
            .execute(
                "INSERT INTO alerts (id, project_id, metric_key, alert_type, severity, value, \
                 threshold, context, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    alert.id.as_str(),
                    alert.project_id.as_str(),
                    alert.metric_key,
                    scalar_text(&alert.alert_type)?,
                    alert.severity.map(|severity| scalar_text(&severity)).transpose()?,
                    alert.value,
                    alert.threshold,
                    to_json(&alert.context)?,
                    timestamp_text(alert.created_at)?,
                ],
            )
            .map_err(rs)?;
        Ok(())
    }

    fn get_alert(&mut self, id: &AlertId) -> Result<Option<Alert>, StoreError> {
        self.guard
            .query_row(
                "SELECT id, project_id, metric_key, alert_type, severity, value, threshold, \
                 context, created_at FROM alerts WHERE id = ?1",
                params![id.as_str()],
                row_to_alert,
            )
            .optional()
            .map_err(rs)
    }

    fn list_alerts(&mut self, project_id: &ProjectId) -> Result<Vec<Alert>, StoreError> {
        let mut stmt = self
            .guard
            .prepare(
                "SELECT id, project_id, metric_key, alert_type, severity, value, threshold, \
                 context, created_at FROM alerts WHERE project_id = ?1 ORDER BY created_at DESC",
            )
            .map_err(rs)?;
        let rows = stmt.query_map(params![project_id.as_str()], row_to_alert).map_err(rs)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(rs)
    }

    // -- lifecycle -----------------------------------------------------
    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.guard.execute_batch("COMMIT;").map_err(rs)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.guard.execute_batch("ROLLBACK;").map_err(rs)?;
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fleetgraph_core::clock::Timestamp;
    use fleetgraph_core::ids::ProjectId;
    use fleetgraph_core::interfaces::Store;
    use fleetgraph_core::model::Project;
    use fleetgraph_core::model::ProjectStatus;
    use time::OffsetDateTime;

    use super::SqliteStore;
    use crate::config::SqliteStoreConfig;

    fn sample_project() -> Project {
        let now = Timestamp::new(OffsetDateTime::now_utc());
        Project {
            id: ProjectId::new("prj_test"),
            name: "Test Project".to_string(),
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn commit_persists_across_transactions() {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open store");
        let project = sample_project();

        let mut txn = store.begin().expect("begin");
        txn.insert_project(&project).expect("insert");
        txn.commit().expect("commit");

        let mut txn = store.begin().expect("begin");
        let loaded = txn.get_project(&project.id).expect("get").expect("present");
        assert_eq!(loaded.name, project.name);
        txn.commit().expect("commit");
    }

    #[test]
    fn dropping_without_commit_rolls_back() {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open store");
        let project = sample_project();

        {
            let mut txn = store.begin().expect("begin");
            txn.insert_project(&project).expect("insert");
        }

        let mut txn = store.begin().expect("begin");
        let loaded = txn.get_project(&project.id).expect("get");
        assert!(loaded.is_none());
        txn.commit().expect("commit");
    }

    #[test]
    fn explicit_rollback_discards_changes() {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open store");
        let project = sample_project();

        let mut txn = store.begin().expect("begin");
        txn.insert_project(&project).expect("insert");
        txn.rollback().expect("rollback");

        let mut txn = store.begin().expect("begin");
        let loaded = txn.get_project(&project.id).expect("get");
        assert!(loaded.is_none());
        txn.commit().expect("commit");
    }

    #[test]
    fn max_fencing_counter_defaults_to_zero() {
        let store = SqliteStore::open(&SqliteStoreConfig::in_memory()).expect("open store");
        let mut txn = store.begin().expect("begin");
        let counter = txn.max_fencing_counter(&fleetgraph_core::ids::TaskId::new("tsk_missing")).expect("query");
        assert_eq!(counter, 0);
        txn.commit().expect("commit");
    }
}
