// crates/fleetgraph-store-postgres/src/schema.rs
// ============================================================================
// Module: Schema
// Description: Versioned `CREATE TABLE` DDL for every persisted entity.
// ============================================================================

use postgres::Client;

use crate::store::PostgresStoreError;

/// Current schema version. Bumping this requires a new match arm in
/// [`initialize_schema`] migrating from the prior version.
const SCHEMA_VERSION: i64 = 1;

/// The full `CREATE TABLE IF NOT EXISTS` set for a fresh database, one
/// table per entity in the data model plus the indices the store's query
/// methods rely on. Structured fields are kept as plain-text/JSON columns,
/// matching the sibling `SQLite` dialect's encoding, so the two backends
/// agree on wire shape byte-for-byte.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS phases (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    sequence BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_phases_project ON phases (project_id);

CREATE TABLE IF NOT EXISTS milestones (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    phase_id TEXT NOT NULL,
    name TEXT NOT NULL,
    sequence BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_milestones_phase ON milestones (phase_id);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    phase_id TEXT NOT NULL,
    milestone_id TEXT NOT NULL,
    title TEXT NOT NULL,
    state TEXT NOT NULL,
    priority INTEGER NOT NULL,
    work_spec TEXT NOT NULL,
    task_class TEXT NOT NULL,
    capability_tags TEXT NOT NULL,
    expected_touches TEXT NOT NULL,
    exclusive_paths TEXT NOT NULL,
    shared_paths TEXT NOT NULL,
    introduced_in_plan_version BIGINT,
    deprecated_in_plan_version BIGINT,
    version BIGINT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    reviewed_by TEXT,
    review_evidence_refs TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks (project_id, priority, created_at);
CREATE INDEX IF NOT EXISTS idx_tasks_phase ON tasks (project_id, phase_id);
CREATE INDEX IF NOT EXISTS idx_tasks_milestone ON tasks (project_id, milestone_id);
CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks (project_id, state);

CREATE TABLE IF NOT EXISTS dependency_edges (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    from_task_id TEXT NOT NULL,
    to_task_id TEXT NOT NULL,
    unlock_on TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edges_project ON dependency_edges (project_id);
CREATE INDEX IF NOT EXISTS idx_edges_from ON dependency_edges (project_id, from_task_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON dependency_edges (project_id, to_task_id);

CREATE TABLE IF NOT EXISTS leases (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    token TEXT NOT NULL,
    status TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    fencing_counter BIGINT NOT NULL,
    created_at TEXT NOT NULL,
    released_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_leases_task ON leases (task_id, status);
CREATE INDEX IF NOT EXISTS idx_leases_expiry ON leases (status, expires_at);

CREATE TABLE IF NOT EXISTS reservations (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    assignee_agent_id TEXT NOT NULL,
    status TEXT NOT NULL,
    ttl_seconds BIGINT NOT NULL,
    expires_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    released_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_reservations_task ON reservations (task_id, status);
CREATE INDEX IF NOT EXISTS idx_reservations_expiry ON reservations (status, expires_at);

CREATE TABLE IF NOT EXISTS task_execution_snapshots (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    lease_id TEXT NOT NULL,
    captured_plan_version BIGINT NOT NULL,
    work_spec_hash TEXT NOT NULL,
    work_spec_payload TEXT NOT NULL,
    captured_by TEXT NOT NULL,
    captured_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_lease ON task_execution_snapshots (lease_id);

CREATE TABLE IF NOT EXISTS plan_versions (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    version_number BIGINT NOT NULL,
    change_set_id TEXT,
    summary TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_plan_versions_project
    ON plan_versions (project_id, version_number);

CREATE TABLE IF NOT EXISTS plan_changesets (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    base_plan_version BIGINT NOT NULL,
    target_plan_version BIGINT NOT NULL,
    status TEXT NOT NULL,
    operations TEXT NOT NULL,
    impact_preview TEXT,
    created_by TEXT NOT NULL,
    applied_at TEXT
);

CREATE TABLE IF NOT EXISTS gate_rules (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    applies_to_task_classes TEXT NOT NULL,
    required_evidence_kinds TEXT NOT NULL,
    required_reviewer_roles TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gate_decisions (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    gate_rule_id TEXT,
    scope_kind TEXT NOT NULL,
    scope_task_id TEXT,
    scope_phase_id TEXT,
    outcome TEXT NOT NULL,
    evidence_refs TEXT NOT NULL,
    decided_by TEXT NOT NULL,
    decided_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_gate_decisions_project ON gate_decisions (project_id);
CREATE INDEX IF NOT EXISTS idx_gate_decisions_scope
    ON gate_decisions (project_id, scope_kind, scope_task_id, scope_phase_id);

CREATE TABLE IF NOT EXISTS gate_policies (
    project_id TEXT PRIMARY KEY,
    implemented_backlog_threshold BIGINT NOT NULL,
    risk_threshold DOUBLE PRECISION NOT NULL,
    implemented_age_hours BIGINT NOT NULL,
    risk_task_classes TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS artifacts (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    uri TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artifacts_task ON artifacts (task_id);

CREATE TABLE IF NOT EXISTS integration_attempts (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    task_id TEXT NOT NULL,
    status TEXT NOT NULL,
    result TEXT,
    detail TEXT,
    enqueued_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_integration_attempts_task
    ON integration_attempts (task_id, enqueued_at);
CREATE INDEX IF NOT EXISTS idx_integration_attempts_project
    ON integration_attempts (project_id);

CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY,
    scope_kind TEXT NOT NULL,
    scope_project_id TEXT,
    name TEXT NOT NULL,
    hash TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    role_scopes TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    revoked_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_api_keys_scope ON api_keys (scope_project_id);

CREATE TABLE IF NOT EXISTS event_log (
    id BIGSERIAL PRIMARY KEY,
    project_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    caused_by TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_event_log_scan
    ON event_log (project_id, event_type, id);

CREATE TABLE IF NOT EXISTS metrics_job_checkpoints (
    project_id TEXT NOT NULL,
    mode TEXT NOT NULL,
    last_event_id BIGINT NOT NULL,
    last_success_at TEXT,
    PRIMARY KEY (project_id, mode)
);

CREATE TABLE IF NOT EXISTS metrics_job_runs (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    mode TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    status TEXT NOT NULL,
    start_event_id BIGINT NOT NULL,
    end_event_id BIGINT NOT NULL,
    processed_events BIGINT NOT NULL,
    failure_reason TEXT,
    completed_at TEXT NOT NULL,
    UNIQUE (project_id, idempotency_key)
);

CREATE TABLE IF NOT EXISTS metrics_state_transition_counters (
    project_id TEXT NOT NULL,
    mode TEXT NOT NULL,
    to_state TEXT NOT NULL,
    transition_count BIGINT NOT NULL,
    last_event_id BIGINT NOT NULL,
    PRIMARY KEY (project_id, mode, to_state)
);

CREATE TABLE IF NOT EXISTS metrics_snapshots (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    north_star TEXT NOT NULL,
    operational TEXT NOT NULL,
    captured_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metrics_snapshots_project
    ON metrics_snapshots (project_id, captured_at);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    metric_key TEXT NOT NULL,
    alert_type TEXT NOT NULL,
    severity TEXT,
    value DOUBLE PRECISION NOT NULL,
    threshold DOUBLE PRECISION,
    context TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_project ON alerts (project_id, created_at);
";

/// Creates every table (idempotently) if the database is fresh, or checks
/// the stored version matches [`SCHEMA_VERSION`] otherwise. There is no
/// migration path yet since this is the only schema version ever shipped;
/// a future bump adds a match arm here.
pub(crate) fn initialize_schema(client: &mut Client) -> Result<(), PostgresStoreError> {
    let mut tx = client.transaction().map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
    tx.batch_execute("CREATE TABLE IF NOT EXISTS store_meta (version BIGINT NOT NULL);")
        .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
    let version: Option<i64> = tx
        .query_opt("SELECT version FROM store_meta LIMIT 1", &[])
        .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?
        .map(|row| row.get(0));
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES ($1)", &[&SCHEMA_VERSION])
                .map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
            tx.batch_execute(SCHEMA_SQL).map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(PostgresStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| PostgresStoreError::Postgres(err.to_string()))?;
    Ok(())
}
