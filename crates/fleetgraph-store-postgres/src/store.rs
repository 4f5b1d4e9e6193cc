// crates/fleetgraph-store-postgres/src/store.rs
// ============================================================================
// Module: PostgresStore / PostgresTransaction
// Description: The `Postgres` dialect of `fleetgraph_core::interfaces::Store`.
// ============================================================================

use std::time::Duration;

use postgres::NoTls;
use postgres::Row;
use postgres::types::ToSql;
use r2d2::Pool;
use r2d2::PooledConnection;
use r2d2_postgres::PostgresConnectionManager;
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
use fleetgraph_core::model::TaskExecutionSnapshot;
use fleetgraph_core::model::TaskState;

use crate::config::PostgresStoreConfig;
use crate::convert::from_json;
use crate::convert::opt_timestamp_from_text;
use crate::convert::opt_timestamp_text;
use crate::convert::scalar_from_text;
use crate::convert::scalar_text;
use crate::convert::timestamp_from_text;
use crate::convert::timestamp_text;
use crate::convert::to_json;
use crate::schema::initialize_schema;

/// Errors raised while opening a [`PostgresStore`]. Errors raised by an open
/// transaction's methods use [`StoreError`] directly, per the trait contract.
#[derive(Debug, Error)]
pub enum PostgresStoreError {
    /// The underlying driver or pool reported a failure while connecting or
    /// running a statement.
    #[error("postgres backend failure: {0}")]
    Postgres(String),
    /// The database's stored schema version does not match the version
    /// this build of the store understands.
    #[error("schema version mismatch: {0}")]
    VersionMismatch(String),
}

/// Maps a `postgres` driver error onto the backend-agnostic [`StoreError`].
fn pg(err: postgres::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// A `Postgres`-backed dialect of [`Store`]. Holds a connection pool rather
/// than a single exclusive connection: `Postgres` natively supports many
/// concurrent writers, so each [`Store::begin`] pulls its own connection
/// instead of serializing every transaction on one mutex the way the
/// `SQLite` dialect does.
pub struct PostgresStore {
    pool: Option<Pool<PostgresConnectionManager<NoTls>>>,
}

impl Drop for PostgresStore {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            let _ = std::thread::spawn(move || drop(pool));
        }
    }
}

impl PostgresStore {
    /// Builds the connection pool from `config`, applies the configured
    /// statement timeout to every pooled connection, and brings the schema
    /// up to date.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresStoreError`] if the connection string is invalid,
    /// the pool cannot be built, or the stored schema version does not
    /// match the version this build understands.
    pub fn open(config: &PostgresStoreConfig) -> Result<Self, PostgresStoreError> {
        let mut pg_config =
            config.connection.parse::<postgres::Config>().map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        pg_config.options(&format!("-c statement_timeout={}", config.statement_timeout_ms));
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(manager)
            .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
        let mut connection = pool.get().map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
        initialize_schema(&mut connection)?;
        drop(connection);
        Ok(Self { pool: Some(pool) })
    }
}

impl Store for PostgresStore {
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let pool = self.pool.as_ref().ok_or_else(|| StoreError::Backend("postgres store closed".to_string()))?;
        let mut conn = pool.get().map_err(|err| StoreError::Backend(err.to_string()))?;
        conn.batch_execute("BEGIN;").map_err(pg)?;
        Ok(Box::new(PostgresTransaction { conn, finished: false }))
    }
}

/// One open transaction. Owns a pooled connection for its entire lifetime;
/// dropping without [`StoreTransaction::commit`] rolls back.
struct PostgresTransaction {
    conn: PooledConnection<PostgresConnectionManager<NoTls>>,
    finished: bool,
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.batch_execute("ROLLBACK;");
        }
    }
}

// ---------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------

fn row_to_project(row: &Row) -> Result<Project, StoreError> {
    Ok(Project {
        id: ProjectId::new(row.get::<_, String>(0)),
        name: row.get(1),
        status: scalar_from_text(&row.get::<_, String>(2))?,
        created_at: timestamp_from_text(&row.get::<_, String>(3))?,
        updated_at: timestamp_from_text(&row.get::<_, String>(4))?,
    })
}

fn row_to_phase(row: &Row) -> Result<Phase, StoreError> {
    Ok(Phase {
        id: PhaseId::new(row.get::<_, String>(0)),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        name: row.get(2),
        sequence: row.get(3),
    })
}

fn row_to_milestone(row: &Row) -> Result<Milestone, StoreError> {
    Ok(Milestone {
        id: MilestoneId::new(row.get::<_, String>(0)),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        phase_id: PhaseId::new(row.get::<_, String>(2)),
        name: row.get(3),
        sequence: row.get(4),
    })
}

const TASK_COLUMNS: &str = "id, project_id, phase_id, milestone_id, title, state, priority, \
    work_spec, task_class, capability_tags, expected_touches, exclusive_paths, shared_paths, \
    introduced_in_plan_version, deprecated_in_plan_version, version, created_at, \
    updated_at, reviewed_by, review_evidence_refs";

fn row_to_task(row: &Row) -> Result<Task, StoreError> {
    Ok(Task {
        id: TaskId::new(row.get::<_, String>(0)),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        phase_id: PhaseId::new(row.get::<_, String>(2)),
        milestone_id: MilestoneId::new(row.get::<_, String>(3)),
        title: row.get(4),
        state: scalar_from_text(&row.get::<_, String>(5))?,
        priority: row.get(6),
        work_spec: from_json(&row.get::<_, String>(7))?,
        task_class: scalar_from_text(&row.get::<_, String>(8))?,
        capability_tags: from_json(&row.get::<_, String>(9))?,
        expected_touches: from_json(&row.get::<_, String>(10))?,
        exclusive_paths: from_json(&row.get::<_, String>(11))?,
        shared_paths: from_json(&row.get::<_, String>(12))?,
        introduced_in_plan_version: row.get(13),
        deprecated_in_plan_version: row.get(14),
        version: row.get(15),
        created_at: timestamp_from_text(&row.get::<_, String>(16))?,
        updated_at: timestamp_from_text(&row.get::<_, String>(17))?,
        reviewed_by: row.get(18),
        review_evidence_refs: from_json(&row.get::<_, String>(19))?,
    })
}

fn row_to_edge(row: &Row) -> Result<DependencyEdge, StoreError> {
    Ok(DependencyEdge {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        from_task_id: TaskId::new(row.get::<_, String>(2)),
        to_task_id: TaskId::new(row.get::<_, String>(3)),
        unlock_on: scalar_from_text(&row.get::<_, String>(4))?,
    })
}

fn row_to_lease(row: &Row) -> Result<Lease, StoreError> {
    Ok(Lease {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        task_id: TaskId::new(row.get::<_, String>(2)),
        agent_id: row.get::<_, String>(3).into(),
        token: row.get(4),
        status: scalar_from_text(&row.get::<_, String>(5))?,
        expires_at: timestamp_from_text(&row.get::<_, String>(6))?,
        heartbeat_at: timestamp_from_text(&row.get::<_, String>(7))?,
        fencing_counter: row.get(8),
        created_at: timestamp_from_text(&row.get::<_, String>(9))?,
        released_at: opt_timestamp_from_text(row.get(10))?,
    })
}

fn row_to_reservation(row: &Row) -> Result<Reservation, StoreError> {
    Ok(Reservation {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        task_id: TaskId::new(row.get::<_, String>(2)),
        assignee_agent_id: row.get::<_, String>(3).into(),
        status: scalar_from_text(&row.get::<_, String>(4))?,
        ttl_seconds: row.get(5),
        expires_at: timestamp_from_text(&row.get::<_, String>(6))?,
        created_by: row.get::<_, String>(7).into(),
        created_at: timestamp_from_text(&row.get::<_, String>(8))?,
        released_at: opt_timestamp_from_text(row.get(9))?,
    })
}

fn row_to_snapshot(row: &Row) -> Result<TaskExecutionSnapshot, StoreError> {
    Ok(TaskExecutionSnapshot {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        task_id: TaskId::new(row.get::<_, String>(2)),
        lease_id: row.get::<_, String>(3).into(),
        captured_plan_version: row.get(4),
        work_spec_hash: row.get(5),
        work_spec_payload: from_json(&row.get::<_, String>(6))?,
        captured_by: row.get(7),
        captured_at: timestamp_from_text(&row.get::<_, String>(8))?,
    })
}

fn row_to_changeset(row: &Row) -> Result<PlanChangeSet, StoreError> {
    Ok(PlanChangeSet {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        base_plan_version: row.get(2),
        target_plan_version: row.get(3),
        status: scalar_from_text(&row.get::<_, String>(4))?,
        operations: from_json::<Vec<PlanOperation>>(&row.get::<_, String>(5))?,
        impact_preview: row.get(6),
        created_by: row.get(7),
        applied_at: opt_timestamp_from_text(row.get(8))?,
    })
}

fn row_to_gate_rule(row: &Row) -> Result<GateRule, StoreError> {
    Ok(GateRule {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        name: row.get(2),
        applies_to_task_classes: from_json(&row.get::<_, String>(3))?,
        required_evidence_kinds: from_json(&row.get::<_, String>(4))?,
        required_reviewer_roles: from_json(&row.get::<_, String>(5))?,
    })
}

fn row_to_gate_decision(row: &Row) -> Result<GateDecision, StoreError> {
    let scope_kind: String = row.get(3);
    let scope_task_id: Option<String> = row.get(4);
    let scope_phase_id: Option<String> = row.get(5);
    let scope = match scope_kind.as_str() {
        "task" => GateScope::Task(TaskId::new(
            scope_task_id.ok_or_else(|| StoreError::Backend("gate decision missing scope_task_id".to_string()))?,
        )),
        "phase" => GateScope::Phase(PhaseId::new(
            scope_phase_id.ok_or_else(|| StoreError::Backend("gate decision missing scope_phase_id".to_string()))?,
        )),
        other => return Err(StoreError::Backend(format!("unrecognized gate scope kind: {other}"))),
    };
    Ok(GateDecision {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        gate_rule_id: row.get::<_, Option<String>>(2).map(GateRuleId::from),
        scope,
        outcome: scalar_from_text(&row.get::<_, String>(6))?,
        evidence_refs: from_json(&row.get::<_, String>(7))?,
        decided_by: row.get(8),
        decided_at: timestamp_from_text(&row.get::<_, String>(9))?,
    })
}

fn row_to_gate_policy(row: &Row) -> Result<GatePolicy, StoreError> {
    Ok(GatePolicy {
        project_id: ProjectId::new(row.get::<_, String>(0)),
        implemented_backlog_threshold: row.get(1),
        risk_threshold: row.get(2),
        implemented_age_hours: row.get(3),
        risk_task_classes: from_json(&row.get::<_, String>(4))?,
    })
}

fn row_to_artifact(row: &Row) -> Result<Artifact, StoreError> {
    Ok(Artifact {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        task_id: TaskId::new(row.get::<_, String>(2)),
        kind: row.get(3),
        uri: row.get(4),
        content_hash: row.get(5),
        created_by: row.get(6),
        created_at: timestamp_from_text(&row.get::<_, String>(7))?,
    })
}

fn row_to_integration_attempt(row: &Row) -> Result<IntegrationAttempt, StoreError> {
    Ok(IntegrationAttempt {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        task_id: TaskId::new(row.get::<_, String>(2)),
        status: scalar_from_text(&row.get::<_, String>(3))?,
        result: row.get::<_, Option<String>>(4).map(|text| scalar_from_text(&text)).transpose()?,
        detail: row.get(5),
        enqueued_at: timestamp_from_text(&row.get::<_, String>(6))?,
        started_at: opt_timestamp_from_text(row.get(7))?,
        completed_at: opt_timestamp_from_text(row.get(8))?,
    })
}

fn row_to_api_key(row: &Row) -> Result<ApiKey, StoreError> {
    let scope_kind: String = row.get(1);
    let scope_project_id: Option<String> = row.get(2);
    let scope = match scope_kind.as_str() {
        "project" => ApiKeyScope::Project(ProjectId::new(
            scope_project_id.ok_or_else(|| StoreError::Backend("api key missing scope_project_id".to_string()))?,
        )),
        "global" => ApiKeyScope::Global,
        other => return Err(StoreError::Backend(format!("unrecognized api key scope kind: {other}"))),
    };
    Ok(ApiKey {
        id: row.get::<_, String>(0).into(),
        scope,
        name: row.get(3),
        hash: row.get(4),
        status: scalar_from_text(&row.get::<_, String>(5))?,
        role_scopes: from_json(&row.get::<_, String>(6))?,
        created_by: row.get(7),
        created_at: timestamp_from_text(&row.get::<_, String>(8))?,
        last_used_at: opt_timestamp_from_text(row.get(9))?,
        revoked_at: opt_timestamp_from_text(row.get(10))?,
    })
}

fn row_to_event(row: &Row) -> Result<EventLog, StoreError> {
    Ok(EventLog {
        id: EventLogId::new(row.get(0)),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        entity_type: row.get(2),
        entity_id: row.get(3),
        event_type: scalar_from_text(&row.get::<_, String>(4))?,
        payload: from_json(&row.get::<_, String>(5))?,
        caused_by: row.get(6),
        created_at: timestamp_from_text(&row.get::<_, String>(7))?,
    })
}

fn row_to_checkpoint(row: &Row) -> Result<MetricsJobCheckpoint, StoreError> {
    Ok(MetricsJobCheckpoint {
        project_id: ProjectId::new(row.get::<_, String>(0)),
        mode: scalar_from_text(&row.get::<_, String>(1))?,
        last_event_id: row.get(2),
        last_success_at: opt_timestamp_from_text(row.get(3))?,
    })
}

fn row_to_job_run(row: &Row) -> Result<MetricsJobRun, StoreError> {
    Ok(MetricsJobRun {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        mode: scalar_from_text(&row.get::<_, String>(2))?,
        idempotency_key: row.get(3),
        status: scalar_from_text(&row.get::<_, String>(4))?,
        start_event_id: row.get(5),
        end_event_id: row.get(6),
        processed_events: row.get(7),
        failure_reason: row.get(8),
        completed_at: timestamp_from_text(&row.get::<_, String>(9))?,
    })
}

fn row_to_transition_counter(row: &Row) -> Result<MetricsStateTransitionCounter, StoreError> {
    Ok(MetricsStateTransitionCounter {
        project_id: ProjectId::new(row.get::<_, String>(0)),
        mode: scalar_from_text(&row.get::<_, String>(1))?,
        to_state: scalar_from_text(&row.get::<_, String>(2))?,
        transition_count: row.get(3),
        last_event_id: EventLogId::new(row.get(4)),
    })
}

fn row_to_metrics_snapshot(row: &Row) -> Result<MetricsSnapshot, StoreError> {
    Ok(MetricsSnapshot {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        north_star: from_json::<NorthStarMetrics>(&row.get::<_, String>(2))?,
        operational: from_json::<OperationalMetrics>(&row.get::<_, String>(3))?,
        captured_at: timestamp_from_text(&row.get::<_, String>(4))?,
    })
}

fn row_to_alert(row: &Row) -> Result<Alert, StoreError> {
    Ok(Alert {
        id: row.get::<_, String>(0).into(),
        project_id: ProjectId::new(row.get::<_, String>(1)),
        metric_key: row.get(2),
        alert_type: scalar_from_text::<AlertType>(&row.get::<_, String>(3))?,
        severity: row.get::<_, Option<String>>(4).map(|text| scalar_from_text::<AlertSeverity>(&text)).transpose()?,
        value: row.get(5),
        threshold: row.get(6),
        context: from_json(&row.get::<_, String>(7))?,
        created_at: timestamp_from_text(&row.get::<_, String>(8))?,
    })
}

impl StoreTransaction for PostgresTransaction {
    // -- projects ------------------------------------------------------
    fn insert_project(&mut self, project: &Project) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO projects (id, name, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)",
                &[
                    &project.id.as_str(),
                    &project.name,
                    &scalar_text(&project.status)?,
                    &timestamp_text(project.created_at)?,
                    &timestamp_text(project.updated_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_project(&mut self, id: &ProjectId) -> Result<Option<Project>, StoreError> {
        self.conn
            .query_opt("SELECT id, name, status, created_at, updated_at FROM projects WHERE id = $1", &[&id.as_str()])
            .map_err(pg)?
            .as_ref()
            .map(row_to_project)
            .transpose()
    }

    fn list_projects(&mut self) -> Result<Vec<Project>, StoreError> {
        let rows = self
            .conn
            .query("SELECT id, name, status, created_at, updated_at FROM projects ORDER BY created_at ASC", &[])
            .map_err(pg)?;
        rows.iter().map(row_to_project).collect()
    }

    fn update_project(&mut self, project: &Project) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE projects SET name = $2, status = $3, updated_at = $4 WHERE id = $1",
                &[&project.id.as_str(), &project.name, &scalar_text(&project.status)?, &timestamp_text(project.updated_at)?],
            )
            .map_err(pg)?;
        Ok(())
    }

    // -- phases / milestones --------------------------------------------
    fn insert_phase(&mut self, phase: &Phase) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO phases (id, project_id, name, sequence) VALUES ($1, $2, $3, $4)",
                &[&phase.id.as_str(), &phase.project_id.as_str(), &phase.name, &phase.sequence],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_phase(&mut self, id: &PhaseId) -> Result<Option<Phase>, StoreError> {
        self.conn
            .query_opt("SELECT id, project_id, name, sequence FROM phases WHERE id = $1", &[&id.as_str()])
            .map_err(pg)?
            .as_ref()
            .map(row_to_phase)
            .transpose()
    }

    fn max_phase_sequence(&mut self, project_id: &ProjectId) -> Result<Option<i64>, StoreError> {
        let row = self.conn.query_one("SELECT MAX(sequence) FROM phases WHERE project_id = $1", &[&project_id.as_str()]).map_err(pg)?;
        Ok(row.get(0))
    }

    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO milestones (id, project_id, phase_id, name, sequence) VALUES ($1, $2, $3, $4, $5)",
                &[
                    &milestone.id.as_str(),
                    &milestone.project_id.as_str(),
                    &milestone.phase_id.as_str(),
                    &milestone.name,
                    &milestone.sequence,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_milestone(&mut self, id: &MilestoneId) -> Result<Option<Milestone>, StoreError> {
        self.conn
            .query_opt("SELECT id, project_id, phase_id, name, sequence FROM milestones WHERE id = $1", &[&id.as_str()])
            .map_err(pg)?
            .as_ref()
            .map(row_to_milestone)
            .transpose()
    }

    fn max_milestone_sequence(&mut self, phase_id: &PhaseId) -> Result<Option<i64>, StoreError> {
        let row =
            self.conn.query_one("SELECT MAX(sequence) FROM milestones WHERE phase_id = $1", &[&phase_id.as_str()]).map_err(pg)?;
        Ok(row.get(0))
    }

    // -- tasks -----------------------------------------------------------
    fn insert_task(&mut self, task: &Task) -> Result<(), StoreError> {
        let state = scalar_text(&task.state)?;
        let work_spec = to_json(&task.work_spec)?;
        let task_class = scalar_text(&task.task_class)?;
        let capability_tags = to_json(&task.capability_tags)?;
        let expected_touches = to_json(&task.expected_touches)?;
        let exclusive_paths = to_json(&task.exclusive_paths)?;
        let shared_paths = to_json(&task.shared_paths)?;
        let created_at = timestamp_text(task.created_at)?;
        let updated_at = timestamp_text(task.updated_at)?;
        let review_evidence_refs = to_json(&task.review_evidence_refs)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)"
                ),
                &[
                    &task.id.as_str(),
                    &task.project_id.as_str(),
                    &task.phase_id.as_str(),
                    &task.milestone_id.as_str(),
                    &task.title,
                    &state,
                    &task.priority,
                    &work_spec,
                    &task_class,
                    &capability_tags,
                    &expected_touches,
                    &exclusive_paths,
                    &shared_paths,
                    &task.introduced_in_plan_version,
                    &task.deprecated_in_plan_version,
                    &task.version,
                    &created_at,
                    &updated_at,
                    &task.reviewed_by,
                    &review_evidence_refs,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_task(&mut self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        self.conn
            .query_opt(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"), &[&id.as_str()])
            .map_err(pg)?
            .as_ref()
            .map(row_to_task)
            .transpose()
    }

    fn lock_task(&mut self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        // `SELECT ... FOR UPDATE` takes the row lock `StoreTransaction::lock_task`
        // promises, scoped to this transaction until commit/rollback.
        self.conn
            .query_opt(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"), &[&id.as_str()])
            .map_err(pg)?
            .as_ref()
            .map(row_to_task)
            .transpose()
    }

    fn update_task(&mut self, task: &Task) -> Result<(), StoreError> {
        let state = scalar_text(&task.state)?;
        let work_spec = to_json(&task.work_spec)?;
        let task_class = scalar_text(&task.task_class)?;
        let capability_tags = to_json(&task.capability_tags)?;
        let expected_touches = to_json(&task.expected_touches)?;
        let exclusive_paths = to_json(&task.exclusive_paths)?;
        let shared_paths = to_json(&task.shared_paths)?;
        let updated_at = timestamp_text(task.updated_at)?;
        let review_evidence_refs = to_json(&task.review_evidence_refs)?;
        self.conn
            .execute(
                "UPDATE tasks SET title = $2, state = $3, priority = $4, work_spec = $5, \
                 task_class = $6, capability_tags = $7, expected_touches = $8, exclusive_paths = $9, \
                 shared_paths = $10, introduced_in_plan_version = $11, deprecated_in_plan_version = $12, \
                 version = $13, updated_at = $14, reviewed_by = $15, review_evidence_refs = $16 WHERE id = $1",
                &[
                    &task.id.as_str(),
                    &task.title,
                    &state,
                    &task.priority,
                    &work_spec,
                    &task_class,
                    &capability_tags,
                    &expected_touches,
                    &exclusive_paths,
                    &shared_paths,
                    &task.introduced_in_plan_version,
                    &task.deprecated_in_plan_version,
                    &task.version,
                    &updated_at,
                    &task.reviewed_by,
                    &review_evidence_refs,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn list_tasks(&mut self, project_id: &ProjectId, filter: &TaskListFilter) -> Result<Vec<Task>, StoreError> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = $1");
        let mut owned_params: Vec<Box<dyn ToSql + Sync>> = vec![Box::new(project_id.as_str().to_string())];
        if let Some(phase_id) = &filter.phase_id {
            owned_params.push(Box::new(phase_id.as_str().to_string()));
            sql.push_str(&format!(" AND phase_id = ${}", owned_params.len()));
        }
        if let Some(milestone_id) = &filter.milestone_id {
            owned_params.push(Box::new(milestone_id.as_str().to_string()));
            sql.push_str(&format!(" AND milestone_id = ${}", owned_params.len()));
        }
        if let Some(state) = filter.state {
            owned_params.push(Box::new(scalar_text(&state)?));
            sql.push_str(&format!(" AND state = ${}", owned_params.len()));
        }
        sql.push_str(" ORDER BY priority ASC, created_at ASC");
        let refs: Vec<&(dyn ToSql + Sync)> = owned_params.iter().map(std::convert::AsRef::as_ref).collect();
        let rows = self.conn.query(&sql, refs.as_slice()).map_err(pg)?;
        rows.iter().map(row_to_task).collect()
    }

    // -- dependency graph -------------------------------------------------
    fn insert_dependency_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO dependency_edges (id, project_id, from_task_id, to_task_id, unlock_on) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &edge.id.as_str(),
                    &edge.project_id.as_str(),
                    &edge.from_task_id.as_str(),
                    &edge.to_task_id.as_str(),
                    &scalar_text(&edge.unlock_on)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn list_project_edges(&mut self, project_id: &ProjectId) -> Result<Vec<DependencyEdge>, StoreError> {
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, from_task_id, to_task_id, unlock_on FROM dependency_edges WHERE project_id = $1",
                &[&project_id.as_str()],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_edge).collect()
    }

    fn list_outgoing_edges(&mut self, project_id: &ProjectId, from_task_id: &TaskId) -> Result<Vec<DependencyEdge>, StoreError> {
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, from_task_id, to_task_id, unlock_on FROM dependency_edges \
                 WHERE project_id = $1 AND from_task_id = $2",
                &[&project_id.as_str(), &from_task_id.as_str()],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_edge).collect()
    }

    fn list_incoming_edges(&mut self, project_id: &ProjectId, to_task_id: &TaskId) -> Result<Vec<DependencyEdge>, StoreError> {
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, from_task_id, to_task_id, unlock_on FROM dependency_edges \
                 WHERE project_id = $1 AND to_task_id = $2",
                &[&project_id.as_str(), &to_task_id.as_str()],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_edge).collect()
    }

    // -- leases ------------------------------------------------------------
    fn insert_lease(&mut self, lease: &Lease) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO leases (id, project_id, task_id, agent_id, token, status, expires_at, \
                 heartbeat_at, fencing_counter, created_at, released_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
                &[
                    &lease.id.as_str(),
                    &lease.project_id.as_str(),
                    &lease.task_id.as_str(),
                    &lease.agent_id.as_str(),
                    &lease.token,
                    &scalar_text(&lease.status)?,
                    &timestamp_text(lease.expires_at)?,
                    &timestamp_text(lease.heartbeat_at)?,
                    &lease.fencing_counter,
                    &timestamp_text(lease.created_at)?,
                    &opt_timestamp_text(lease.released_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_active_lease_for_task(&mut self, task_id: &TaskId) -> Result<Option<Lease>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, task_id, agent_id, token, status, expires_at, heartbeat_at, \
                 fencing_counter, created_at, released_at FROM leases WHERE task_id = $1 AND status = 'active'",
                &[&task_id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_lease)
            .transpose()
    }

    fn get_active_lease_by_token(&mut self, task_id: &TaskId, agent_id: &str, token: &str) -> Result<Option<Lease>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, task_id, agent_id, token, status, expires_at, heartbeat_at, \
                 fencing_counter, created_at, released_at FROM leases \
                 WHERE task_id = $1 AND agent_id = $2 AND token = $3 AND status = 'active'",
                &[&task_id.as_str(), &agent_id, &token],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_lease)
            .transpose()
    }

    fn update_lease(&mut self, lease: &Lease) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE leases SET status = $2, expires_at = $3, heartbeat_at = $4, released_at = $5 WHERE id = $1",
                &[
                    &lease.id.as_str(),
                    &scalar_text(&lease.status)?,
                    &timestamp_text(lease.expires_at)?,
                    &timestamp_text(lease.heartbeat_at)?,
                    &opt_timestamp_text(lease.released_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn max_fencing_counter(&mut self, task_id: &TaskId) -> Result<i64, StoreError> {
        let row = self
            .conn
            .query_one("SELECT COALESCE(MAX(fencing_counter), 0) FROM leases WHERE task_id = $1", &[&task_id.as_str()])
            .map_err(pg)?;
        Ok(row.get(0))
    }

    fn list_expired_leases(&mut self, now: Timestamp) -> Result<Vec<Lease>, StoreError> {
        let now_text = timestamp_text(now)?;
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, task_id, agent_id, token, status, expires_at, heartbeat_at, \
                 fencing_counter, created_at, released_at FROM leases WHERE status = 'active' AND expires_at < $1",
                &[&now_text],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_lease).collect()
    }

    // -- reservations --------------------------------------------------
    fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO reservations (id, project_id, task_id, assignee_agent_id, status, \
                 ttl_seconds, expires_at, created_by, created_at, released_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
                &[
                    &reservation.id.as_str(),
                    &reservation.project_id.as_str(),
                    &reservation.task_id.as_str(),
                    &reservation.assignee_agent_id.as_str(),
                    &scalar_text(&reservation.status)?,
                    &reservation.ttl_seconds,
                    &timestamp_text(reservation.expires_at)?,
                    &reservation.created_by.as_str(),
                    &timestamp_text(reservation.created_at)?,
                    &opt_timestamp_text(reservation.released_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_active_reservation_for_task(&mut self, task_id: &TaskId) -> Result<Option<Reservation>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, task_id, assignee_agent_id, status, ttl_seconds, expires_at, \
                 created_by, created_at, released_at FROM reservations WHERE task_id = $1 AND status = 'active'",
                &[&task_id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_reservation)
            .transpose()
    }

    fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE reservations SET status = $2, expires_at = $3, released_at = $4 WHERE id = $1",
                &[
                    &reservation.id.as_str(),
                    &scalar_text(&reservation.status)?,
                    &timestamp_text(reservation.expires_at)?,
                    &opt_timestamp_text(reservation.released_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn list_expired_reservations(&mut self, now: Timestamp) -> Result<Vec<Reservation>, StoreError> {
        let now_text = timestamp_text(now)?;
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, task_id, assignee_agent_id, status, ttl_seconds, expires_at, \
                 created_by, created_at, released_at FROM reservations WHERE status = 'active' AND expires_at < $1",
                &[&now_text],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_reservation).collect()
    }

    // -- snapshots -----------------------------------------------------
    fn insert_snapshot(&mut self, snapshot: &TaskExecutionSnapshot) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO task_execution_snapshots (id, project_id, task_id, lease_id, \
                 captured_plan_version, work_spec_hash, work_spec_payload, captured_by, captured_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
                &[
                    &snapshot.id.as_str(),
                    &snapshot.project_id.as_str(),
                    &snapshot.task_id.as_str(),
                    &snapshot.lease_id.as_str(),
                    &snapshot.captured_plan_version,
                    &snapshot.work_spec_hash,
                    &to_json(&snapshot.work_spec_payload)?,
                    &snapshot.captured_by,
                    &timestamp_text(snapshot.captured_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    // -- plan versioning -------------------------------------------------
    fn current_plan_version(&mut self, project_id: &ProjectId) -> Result<i64, StoreError> {
        let row = self
            .conn
            .query_one("SELECT COALESCE(MAX(version_number), 0) FROM plan_versions WHERE project_id = $1", &[&project_id.as_str()])
            .map_err(pg)?;
        Ok(row.get(0))
    }

    fn insert_plan_version(&mut self, version: &PlanVersion) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO plan_versions (id, project_id, version_number, change_set_id, summary, \
                 created_by, created_at) VALUES ($1,$2,$3,$4,$5,$6,$7)",
                &[
                    &version.id.as_str(),
                    &version.project_id.as_str(),
                    &version.version_number,
                    &version.change_set_id.as_ref().map(fleetgraph_core::ids::PlanChangeSetId::as_str),
                    &version.summary,
                    &version.created_by,
                    &timestamp_text(version.created_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn insert_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO plan_changesets (id, project_id, base_plan_version, target_plan_version, \
                 status, operations, impact_preview, created_by, applied_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
                &[
                    &changeset.id.as_str(),
                    &changeset.project_id.as_str(),
                    &changeset.base_plan_version,
                    &changeset.target_plan_version,
                    &scalar_text(&changeset.status)?,
                    &to_json(&changeset.operations)?,
                    &changeset.impact_preview,
                    &changeset.created_by,
                    &opt_timestamp_text(changeset.applied_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_changeset(&mut self, id: &PlanChangeSetId) -> Result<Option<PlanChangeSet>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, base_plan_version, target_plan_version, status, operations, \
                 impact_preview, created_by, applied_at FROM plan_changesets WHERE id = $1",
                &[&id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_changeset)
            .transpose()
    }

    fn update_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE plan_changesets SET status = $2, applied_at = $3 WHERE id = $1",
                &[&changeset.id.as_str(), &scalar_text(&changeset.status)?, &opt_timestamp_text(changeset.applied_at)?],
            )
            .map_err(pg)?;
        Ok(())
    }

    // -- gates -----------------------------------------------------------
    fn insert_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO gate_rules (id, project_id, name, applies_to_task_classes, \
                 required_evidence_kinds, required_reviewer_roles) VALUES ($1,$2,$3,$4,$5,$6)",
                &[
                    &rule.id.as_str(),
                    &rule.project_id.as_str(),
                    &rule.name,
                    &to_json(&rule.applies_to_task_classes)?,
                    &to_json(&rule.required_evidence_kinds)?,
                    &to_json(&rule.required_reviewer_roles)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_gate_rule(&mut self, id: &GateRuleId) -> Result<Option<GateRule>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, name, applies_to_task_classes, required_evidence_kinds, \
                 required_reviewer_roles FROM gate_rules WHERE id = $1",
                &[&id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_gate_rule)
            .transpose()
    }

    fn insert_gate_decision(&mut self, decision: &GateDecision) -> Result<(), StoreError> {
        let (scope_kind, scope_task_id, scope_phase_id) = match &decision.scope {
            GateScope::Task(task_id) => ("task", Some(task_id.as_str().to_string()), None),
            GateScope::Phase(phase_id) => ("phase", None, Some(phase_id.as_str().to_string())),
        };
        self.conn
            .execute(
                "INSERT INTO gate_decisions (id, project_id, gate_rule_id, scope_kind, scope_task_id, \
                 scope_phase_id, outcome, evidence_refs, decided_by, decided_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
                &[
                    &decision.id.as_str(),
                    &decision.project_id.as_str(),
                    &decision.gate_rule_id.as_ref().map(fleetgraph_core::ids::GateRuleId::as_str),
                    &scope_kind,
                    &scope_task_id,
                    &scope_phase_id,
                    &scalar_text(&decision.outcome)?,
                    &to_json(&decision.evidence_refs)?,
                    &decision.decided_by,
                    &timestamp_text(decision.decided_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn list_gate_decisions(&mut self, project_id: &ProjectId, scope: Option<&GateScope>) -> Result<Vec<GateDecision>, StoreError> {
        let columns = "id, project_id, gate_rule_id, scope_kind, scope_task_id, scope_phase_id, \
            outcome, evidence_refs, decided_by, decided_at";
        let rows = match scope {
            None => self.conn.query(&format!("SELECT {columns} FROM gate_decisions WHERE project_id = $1"), &[&project_id.as_str()]),
            Some(GateScope::Task(task_id)) => self.conn.query(
                &format!("SELECT {columns} FROM gate_decisions WHERE project_id = $1 AND scope_kind = 'task' AND scope_task_id = $2"),
                &[&project_id.as_str(), &task_id.as_str()],
            ),
            Some(GateScope::Phase(phase_id)) => self.conn.query(
                &format!("SELECT {columns} FROM gate_decisions WHERE project_id = $1 AND scope_kind = 'phase' AND scope_phase_id = $2"),
                &[&project_id.as_str(), &phase_id.as_str()],
            ),
        }
        .map_err(pg)?;
        rows.iter().map(row_to_gate_decision).collect()
    }

    fn get_gate_policy(&mut self, project_id: &ProjectId) -> Result<Option<GatePolicy>, StoreError> {
        self.conn
            .query_opt(
                "SELECT project_id, implemented_backlog_threshold, risk_threshold, \
                 implemented_age_hours, risk_task_classes FROM gate_policies WHERE project_id = $1",
                &[&project_id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_gate_policy)
            .transpose()
    }

    fn find_open_policy_gate_task(
        &mut self,
        project_id: &ProjectId,
        trigger: PolicyTrigger,
        candidate_task_ids: &[TaskId],
    ) -> Result<Option<Task>, StoreError> {
        let mut wanted: Vec<&str> = candidate_task_ids.iter().map(TaskId::as_str).collect();
        wanted.sort_unstable();
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = $1 AND task_class = 'review_gate' \
                     AND state NOT IN ('integrated', 'abandoned', 'cancelled')"
                ),
                &[&project_id.as_str()],
            )
            .map_err(pg)?;
        let wanted_trigger = scalar_text(&trigger)?;
        for row in &rows {
            let task = row_to_task(row)?;
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
        self.conn
            .execute(
                "INSERT INTO artifacts (id, project_id, task_id, kind, uri, content_hash, created_by, \
                 created_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
                &[
                    &artifact.id.as_str(),
                    &artifact.project_id.as_str(),
                    &artifact.task_id.as_str(),
                    &artifact.kind,
                    &artifact.uri,
                    &artifact.content_hash,
                    &artifact.created_by,
                    &timestamp_text(artifact.created_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn list_task_artifacts(&mut self, task_id: &TaskId) -> Result<Vec<Artifact>, StoreError> {
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, task_id, kind, uri, content_hash, created_by, created_at \
                 FROM artifacts WHERE task_id = $1 ORDER BY created_at ASC",
                &[&task_id.as_str()],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_artifact).collect()
    }

    fn insert_integration_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO integration_attempts (id, project_id, task_id, status, result, detail, \
                 enqueued_at, started_at, completed_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
                &[
                    &attempt.id.as_str(),
                    &attempt.project_id.as_str(),
                    &attempt.task_id.as_str(),
                    &scalar_text(&attempt.status)?,
                    &attempt.result.map(|result| scalar_text(&result)).transpose()?,
                    &attempt.detail,
                    &timestamp_text(attempt.enqueued_at)?,
                    &opt_timestamp_text(attempt.started_at)?,
                    &opt_timestamp_text(attempt.completed_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_integration_attempt(&mut self, id: &IntegrationAttemptId) -> Result<Option<IntegrationAttempt>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, task_id, status, result, detail, enqueued_at, started_at, \
                 completed_at FROM integration_attempts WHERE id = $1",
                &[&id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_integration_attempt)
            .transpose()
    }

    fn update_integration_attempt(&mut self, attempt: &IntegrationAttempt) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE integration_attempts SET status = $2, result = $3, detail = $4, started_at = $5, \
                 completed_at = $6 WHERE id = $1",
                &[
                    &attempt.id.as_str(),
                    &scalar_text(&attempt.status)?,
                    &attempt.result.map(|result| scalar_text(&result)).transpose()?,
                    &attempt.detail,
                    &opt_timestamp_text(attempt.started_at)?,
                    &opt_timestamp_text(attempt.completed_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn list_integration_attempts(&mut self, task_id: &TaskId) -> Result<Vec<IntegrationAttempt>, StoreError> {
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, task_id, status, result, detail, enqueued_at, started_at, \
                 completed_at FROM integration_attempts WHERE task_id = $1 ORDER BY enqueued_at ASC",
                &[&task_id.as_str()],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_integration_attempt).collect()
    }

    fn list_project_integration_attempts(&mut self, project_id: &ProjectId) -> Result<Vec<IntegrationAttempt>, StoreError> {
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, task_id, status, result, detail, enqueued_at, started_at, \
                 completed_at FROM integration_attempts WHERE project_id = $1 ORDER BY enqueued_at ASC",
                &[&project_id.as_str()],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_integration_attempt).collect()
    }

    // -- api keys --------------------------------------------------------
    fn insert_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        let (scope_kind, scope_project_id) = match &key.scope {
            ApiKeyScope::Project(project_id) => ("project", Some(project_id.as_str().to_string())),
            ApiKeyScope::Global => ("global", None),
        };
        self.conn
            .execute(
                "INSERT INTO api_keys (id, scope_kind, scope_project_id, name, hash, status, \
                 role_scopes, created_by, created_at, last_used_at, revoked_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)",
                &[
                    &key.id.as_str(),
                    &scope_kind,
                    &scope_project_id,
                    &key.name,
                    &key.hash,
                    &scalar_text(&key.status)?,
                    &to_json(&key.role_scopes)?,
                    &key.created_by,
                    &timestamp_text(key.created_at)?,
                    &opt_timestamp_text(key.last_used_at)?,
                    &opt_timestamp_text(key.revoked_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_api_key_by_hash(&mut self, hash: &str) -> Result<Option<ApiKey>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, scope_kind, scope_project_id, name, hash, status, role_scopes, created_by, \
                 created_at, last_used_at, revoked_at FROM api_keys WHERE hash = $1",
                &[&hash],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_api_key)
            .transpose()
    }

    fn list_api_keys(&mut self, project_id: Option<&ProjectId>) -> Result<Vec<ApiKey>, StoreError> {
        let columns = "id, scope_kind, scope_project_id, name, hash, status, role_scopes, created_by, \
            created_at, last_used_at, revoked_at";
        let rows = match project_id {
            None => self.conn.query(&format!("SELECT {columns} FROM api_keys ORDER BY created_at ASC"), &[]),
            Some(project_id) => self.conn.query(
                &format!(
                    "SELECT {columns} FROM api_keys WHERE scope_kind = 'project' AND scope_project_id = $1 ORDER BY created_at ASC"
                ),
                &[&project_id.as_str()],
            ),
        }
        .map_err(pg)?;
        rows.iter().map(row_to_api_key).collect()
    }

    fn update_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE api_keys SET status = $2, last_used_at = $3, revoked_at = $4 WHERE id = $1",
                &[&key.id.as_str(), &scalar_text(&key.status)?, &opt_timestamp_text(key.last_used_at)?, &opt_timestamp_text(key.revoked_at)?],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_api_key(&mut self, id: &ApiKeyId) -> Result<Option<ApiKey>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, scope_kind, scope_project_id, name, hash, status, role_scopes, created_by, \
                 created_at, last_used_at, revoked_at FROM api_keys WHERE id = $1",
                &[&id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_api_key)
            .transpose()
    }

    // -- event log ---------------------------------------------------------
    fn append_event(&mut self, event: NewEvent) -> Result<EventLogId, StoreError> {
        let row = self
            .conn
            .query_one(
                "INSERT INTO event_log (project_id, entity_type, entity_id, event_type, payload, \
                 caused_by, created_at) VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING id",
                &[
                    &event.project_id.as_str(),
                    &event.entity_type,
                    &event.entity_id,
                    &scalar_text(&event.event_type)?,
                    &to_json(&event.payload)?,
                    &event.caused_by,
                    &timestamp_text(Timestamp::new(time::OffsetDateTime::now_utc()))?,
                ],
            )
            .map_err(pg)?;
        Ok(EventLogId::new(row.get(0)))
    }

    fn list_events_from(
        &mut self,
        project_id: &ProjectId,
        event_type: EventType,
        from_id: EventLogId,
        limit: i64,
    ) -> Result<Vec<EventLog>, StoreError> {
        let event_type_text = scalar_text(&event_type)?;
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, entity_type, entity_id, event_type, payload, caused_by, created_at \
                 FROM event_log WHERE project_id = $1 AND event_type = $2 AND id >= $3 ORDER BY id ASC LIMIT $4",
                &[&project_id.as_str(), &event_type_text, &from_id.value(), &limit],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_event).collect()
    }

    // -- metrics -------------------------------------------------------
    fn get_checkpoint(&mut self, project_id: &ProjectId, mode: MetricsMode) -> Result<Option<MetricsJobCheckpoint>, StoreError> {
        self.conn
            .query_opt(
                "SELECT project_id, mode, last_event_id, last_success_at FROM metrics_job_checkpoints \
                 WHERE project_id = $1 AND mode = $2",
                &[&project_id.as_str(), &scalar_text(&mode)?],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_checkpoint)
            .transpose()
    }

    fn upsert_checkpoint(&mut self, checkpoint: &MetricsJobCheckpoint) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO metrics_job_checkpoints (project_id, mode, last_event_id, last_success_at) \
                 VALUES ($1,$2,$3,$4) \
                 ON CONFLICT (project_id, mode) DO UPDATE SET last_event_id = excluded.last_event_id, \
                 last_success_at = excluded.last_success_at",
                &[
                    &checkpoint.project_id.as_str(),
                    &scalar_text(&checkpoint.mode)?,
                    &checkpoint.last_event_id,
                    &opt_timestamp_text(checkpoint.last_success_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_job_run_by_idempotency_key(&mut self, project_id: &ProjectId, idempotency_key: &str) -> Result<Option<MetricsJobRun>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, mode, idempotency_key, status, start_event_id, end_event_id, \
                 processed_events, failure_reason, completed_at FROM metrics_job_runs \
                 WHERE project_id = $1 AND idempotency_key = $2",
                &[&project_id.as_str(), &idempotency_key],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_job_run)
            .transpose()
    }

    fn insert_job_run(&mut self, run: &MetricsJobRun) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO metrics_job_runs (id, project_id, mode, idempotency_key, status, \
                 start_event_id, end_event_id, processed_events, failure_reason, completed_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
                &[
                    &run.id.as_str(),
                    &run.project_id.as_str(),
                    &scalar_text(&run.mode)?,
                    &run.idempotency_key,
                    &scalar_text(&run.status)?,
                    &run.start_event_id,
                    &run.end_event_id,
                    &run.processed_events,
                    &run.failure_reason,
                    &timestamp_text(run.completed_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_job_run(&mut self, id: &MetricsJobRunId) -> Result<Option<MetricsJobRun>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, mode, idempotency_key, status, start_event_id, end_event_id, \
                 processed_events, failure_reason, completed_at FROM metrics_job_runs WHERE id = $1",
                &[&id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_job_run)
            .transpose()
    }

    fn upsert_transition_counter(&mut self, counter: &MetricsStateTransitionCounter) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO metrics_state_transition_counters (project_id, mode, to_state, \
                 transition_count, last_event_id) VALUES ($1,$2,$3,$4,$5) \
                 ON CONFLICT (project_id, mode, to_state) DO UPDATE SET \
                 transition_count = excluded.transition_count, last_event_id = excluded.last_event_id",
                &[
                    &counter.project_id.as_str(),
                    &scalar_text(&counter.mode)?,
                    &scalar_text(&counter.to_state)?,
                    &counter.transition_count,
                    &counter.last_event_id.value(),
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_transition_counter(
        &mut self,
        project_id: &ProjectId,
        mode: MetricsMode,
        to_state: TaskState,
    ) -> Result<Option<MetricsStateTransitionCounter>, StoreError> {
        self.conn
            .query_opt(
                "SELECT project_id, mode, to_state, transition_count, last_event_id \
                 FROM metrics_state_transition_counters WHERE project_id = $1 AND mode = $2 AND to_state = $3",
                &[&project_id.as_str(), &scalar_text(&mode)?, &scalar_text(&to_state)?],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_transition_counter)
            .transpose()
    }

    fn delete_transition_counters(&mut self, project_id: &ProjectId, mode: MetricsMode) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM metrics_state_transition_counters WHERE project_id = $1 AND mode = $2",
                &[&project_id.as_str(), &scalar_text(&mode)?],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn list_transition_counters(&mut self, project_id: &ProjectId, mode: MetricsMode) -> Result<Vec<MetricsStateTransitionCounter>, StoreError> {
        let mode_text = scalar_text(&mode)?;
        let rows = self
            .conn
            .query(
                "SELECT project_id, mode, to_state, transition_count, last_event_id \
                 FROM metrics_state_transition_counters WHERE project_id = $1 AND mode = $2",
                &[&project_id.as_str(), &mode_text],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_transition_counter).collect()
    }

    fn insert_metrics_snapshot(&mut self, snapshot: &MetricsSnapshot) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO metrics_snapshots (id, project_id, north_star, operational, captured_at) \
                 VALUES ($1,$2,$3,$4,$5)",
                &[
                    &snapshot.id.as_str(),
                    &snapshot.project_id.as_str(),
                    &to_json(&snapshot.north_star)?,
                    &to_json(&snapshot.operational)?,
                    &timestamp_text(snapshot.captured_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_metrics_snapshot(&mut self, id: &MetricsSnapshotId) -> Result<Option<MetricsSnapshot>, StoreError> {
        self.conn
            .query_opt("SELECT id, project_id, north_star, operational, captured_at FROM metrics_snapshots WHERE id = $1", &[&id.as_str()])
            .map_err(pg)?
            .as_ref()
            .map(row_to_metrics_snapshot)
            .transpose()
    }

    fn get_latest_metrics_snapshot(&mut self, project_id: &ProjectId) -> Result<Option<MetricsSnapshot>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, north_star, operational, captured_at FROM metrics_snapshots \
                 WHERE project_id = $1 ORDER BY captured_at DESC LIMIT 1",
                &[&project_id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_metrics_snapshot)
            .transpose()
    }

    // -- alerts ----------------------------------------------------------
    fn insert_alert(&mut self, alert: &Alert) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO alerts (id, project_id, metric_key, alert_type, severity, value, \
                 threshold, context, created_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
                &[
                    &alert.id.as_str(),
                    &alert.project_id.as_str(),
                    &alert.metric_key,
                    &scalar_text(&alert.alert_type)?,
                    &alert.severity.map(|severity| scalar_text(&severity)).transpose()?,
                    &alert.value,
                    &alert.threshold,
                    &to_json(&alert.context)?,
                    &timestamp_text(alert.created_at)?,
                ],
            )
            .map_err(pg)?;
        Ok(())
    }

    fn get_alert(&mut self, id: &AlertId) -> Result<Option<Alert>, StoreError> {
        self.conn
            .query_opt(
                "SELECT id, project_id, metric_key, alert_type, severity, value, threshold, \
                 context, created_at FROM alerts WHERE id = $1",
                &[&id.as_str()],
            )
            .map_err(pg)?
            .as_ref()
            .map(row_to_alert)
            .transpose()
    }

    fn list_alerts(&mut self, project_id: &ProjectId) -> Result<Vec<Alert>, StoreError> {
        let rows = self
            .conn
            .query(
                "SELECT id, project_id, metric_key, alert_type, severity, value, threshold, \
                 context, created_at FROM alerts WHERE project_id = $1 ORDER BY created_at DESC",
                &[&project_id.as_str()],
            )
            .map_err(pg)?;
        rows.iter().map(row_to_alert).collect()
    }

    // -- lifecycle -----------------------------------------------------
    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.batch_execute("COMMIT;").map_err(pg)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.batch_execute("ROLLBACK;").map_err(pg)?;
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

    use super::PostgresStore;
    use crate::config::PostgresStoreConfig;

    /// These tests need a reachable `Postgres` server and are gated behind
    /// `FLEETGRAPH_TEST_POSTGRES_URL` rather than run unconditionally, since
    /// there is no in-process equivalent of `SQLite`'s `:memory:` mode.
    fn test_store() -> Option<PostgresStore> {
        let url = std::env::var("FLEETGRAPH_TEST_POSTGRES_URL").ok()?;
        Some(PostgresStore::open(&PostgresStoreConfig::new(url)).expect("open store"))
    }

    fn sample_project() -> Project {
        let now = Timestamp::new(OffsetDateTime::now_utc());
        Project { id: ProjectId::new("prj_test"), name: "Test Project".to_string(), status: ProjectStatus::Active, created_at: now, updated_at: now }
    }

    #[test]
    fn commit_persists_across_transactions() {
        let Some(store) = test_store() else { return };
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
        let Some(store) = test_store() else { return };
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
    fn max_fencing_counter_defaults_to_zero() {
        let Some(store) = test_store() else { return };
        let mut txn = store.begin().expect("begin");
        let counter = txn.max_fencing_counter(&fleetgraph_core::ids::TaskId::new("tsk_missing")).expect("query");
        assert_eq!(counter, 0);
        txn.commit().expect("commit");
    }
}
