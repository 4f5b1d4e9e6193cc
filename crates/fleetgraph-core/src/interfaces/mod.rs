// crates/fleetgraph-core/src/interfaces/mod.rs
// ============================================================================
// Module: Fleetgraph Store Interface
// Description: The persistence seam every backend dialect implements.
// Purpose: Let `runtime` orchestrate domain logic without knowing whether
//          it is talking to SQLite or a server RDBMS.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`Store`] opens a [`StoreTransaction`]; every operation in
//! `runtime::service` runs entirely inside one transaction and either
//! commits or rolls back as a unit (`spec` §5: "no mutation is partially
//! applied"). Row locking is expressed by `lock_task`, which a dialect
//! implements with whatever its driver offers (`SELECT ... FOR UPDATE` on a
//! server RDBMS, a `BEGIN IMMEDIATE` transaction on SQLite).

use thiserror::Error;

use crate::ids::ApiKeyId;
use crate::ids::GateRuleId;
use crate::ids::IntegrationAttemptId;
use crate::ids::MetricsJobRunId;
use crate::ids::MilestoneId;
use crate::ids::PhaseId;
use crate::ids::PlanChangeSetId;
use crate::ids::ProjectId;
use crate::ids::TaskId;
use crate::model::ApiKey;
use crate::model::Artifact;
use crate::model::DependencyEdge;
use crate::model::EventLog;
use crate::model::EventType;
use crate::model::GateDecision;
use crate::model::GatePolicy;
use crate::model::GateRule;
use crate::model::GateScope;
use crate::model::IntegrationAttempt;
use crate::model::Lease;
use crate::model::Milestone;
use crate::model::MetricsJobCheckpoint;
use crate::model::MetricsJobRun;
use crate::model::MetricsMode;
use crate::model::MetricsStateTransitionCounter;
use crate::model::Phase;
use crate::model::PlanChangeSet;
use crate::model::PlanVersion;
use crate::model::Project;
use crate::model::Reservation;
use crate::model::Task;
use crate::model::TaskExecutionSnapshot;
use crate::model::TaskState;
use crate::ids::EventLogId;
use crate::ids::MetricsSnapshotId;
use crate::model::MetricsSnapshot;
use crate::ids::AlertId;
use crate::model::Alert;

/// Errors a store dialect may raise. Every variant collapses to
/// [`crate::errors::ErrorCode::DbError`] at the `runtime::service` boundary;
/// the underlying driver message is logged internally, never surfaced
/// verbatim to a caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying driver reported a failure. The message is for
    /// internal logs only.
    #[error("store backend failure: {0}")]
    Backend(String),
    /// A uniqueness or foreign-key constraint was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// The requested migration directory or file could not be read.
    #[error("migration failure: {0}")]
    Migration(String),
}

/// A filter over [`StoreTransaction::list_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskListFilter {
    /// Restrict to a single phase.
    pub phase_id: Option<PhaseId>,
    /// Restrict to a single milestone.
    pub milestone_id: Option<MilestoneId>,
    /// Restrict to a single state.
    pub state: Option<TaskState>,
}

/// An event to append; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Owning project.
    pub project_id: ProjectId,
    /// The kind of entity this event concerns.
    pub entity_type: String,
    /// The specific entity instance, if applicable.
    pub entity_id: Option<String>,
    /// The event's type tag.
    pub event_type: EventType,
    /// Structured event payload.
    pub payload: serde_json::Value,
    /// The identity that caused this event.
    pub caused_by: Option<String>,
}

/// A backend-agnostic handle that opens transactions against the
/// persisted state described in the data model.
pub trait Store: Send + Sync {
    /// Opens a new transaction. Every mutation made through it is visible
    /// to others only after [`StoreTransaction::commit`] succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend cannot open a transaction.
    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, StoreError>;
}

/// One ACID transaction against the persisted state. Dropping a
/// transaction without calling [`StoreTransaction::commit`] must leave no
/// trace (an implicit rollback), matching `spec` §5's cancellation
/// semantics.
#[allow(
    clippy::missing_errors_doc,
    reason = "every method on this trait returns StoreError for the same backend-failure reason; documented once on the trait, not per method"
)]
pub trait StoreTransaction {
    // -- projects ------------------------------------------------------
    /// Persists a new project.
    fn insert_project(&mut self, project: &Project) -> Result<(), StoreError>;
    /// Loads a project by id.
    fn get_project(&mut self, id: &ProjectId) -> Result<Option<Project>, StoreError>;
    /// Lists every project.
    fn list_projects(&mut self) -> Result<Vec<Project>, StoreError>;
    /// Persists a project's mutated `status`/`updated_at`.
    fn update_project(&mut self, project: &Project) -> Result<(), StoreError>;

    // -- phases / milestones --------------------------------------------
    /// Persists a new phase.
    fn insert_phase(&mut self, phase: &Phase) -> Result<(), StoreError>;
    /// Loads a phase by id.
    fn get_phase(&mut self, id: &PhaseId) -> Result<Option<Phase>, StoreError>;
    /// Returns the highest `sequence` among phases in `project_id`, if any.
    fn max_phase_sequence(&mut self, project_id: &ProjectId) -> Result<Option<i64>, StoreError>;
    /// Persists a new milestone.
    fn insert_milestone(&mut self, milestone: &Milestone) -> Result<(), StoreError>;
    /// Loads a milestone by id.
    fn get_milestone(&mut self, id: &MilestoneId) -> Result<Option<Milestone>, StoreError>;
    /// Returns the highest `sequence` among milestones in `phase_id`, if any.
    fn max_milestone_sequence(&mut self, phase_id: &PhaseId) -> Result<Option<i64>, StoreError>;

    // -- tasks -----------------------------------------------------------
    /// Persists a new task.
    fn insert_task(&mut self, task: &Task) -> Result<(), StoreError>;
    /// Loads a task by id without acquiring a row lock.
    fn get_task(&mut self, id: &TaskId) -> Result<Option<Task>, StoreError>;
    /// Loads a task by id, acquiring a row lock held for the remainder of
    /// the transaction. Every mutating operation in `runtime::service`
    /// locks the task before reading it, per `spec` §5's fixed lock order.
    fn lock_task(&mut self, id: &TaskId) -> Result<Option<Task>, StoreError>;
    /// Persists a task's mutated fields.
    fn update_task(&mut self, task: &Task) -> Result<(), StoreError>;
    /// Lists tasks in a project matching `filter`, ordered
    /// `(priority ASC, created_at ASC)`.
    fn list_tasks(
        &mut self,
        project_id: &ProjectId,
        filter: &TaskListFilter,
    ) -> Result<Vec<Task>, StoreError>;

    // -- dependency graph -------------------------------------------------
    /// Persists a new dependency edge.
    fn insert_dependency_edge(&mut self, edge: &DependencyEdge) -> Result<(), StoreError>;
    /// Lists every edge in a project, for cycle detection and graph export.
    fn list_project_edges(
        &mut self,
        project_id: &ProjectId,
    ) -> Result<Vec<DependencyEdge>, StoreError>;
    /// Lists edges whose predecessor is `task_id`.
    fn list_outgoing_edges(
        &mut self,
        project_id: &ProjectId,
        from_task_id: &TaskId,
    ) -> Result<Vec<DependencyEdge>, StoreError>;
    /// Lists edges whose successor is `task_id`.
    fn list_incoming_edges(
        &mut self,
        project_id: &ProjectId,
        to_task_id: &TaskId,
    ) -> Result<Vec<DependencyEdge>, StoreError>;

    // -- leases ------------------------------------------------------------
    /// Persists a new lease.
    fn insert_lease(&mut self, lease: &Lease) -> Result<(), StoreError>;
    /// Loads the active lease on a task, if any. At most one can exist.
    fn get_active_lease_for_task(&mut self, task_id: &TaskId) -> Result<Option<Lease>, StoreError>;
    /// Loads the active lease matching `(task_id, agent_id, token)`.
    fn get_active_lease_by_token(
        &mut self,
        task_id: &TaskId,
        agent_id: &str,
        token: &str,
    ) -> Result<Option<Lease>, StoreError>;
    /// Persists a lease's mutated fields (status, heartbeat, expiry).
    fn update_lease(&mut self, lease: &Lease) -> Result<(), StoreError>;
    /// Returns the highest fencing counter ever issued for `task_id`,
    /// across every lease the task has ever had, active or not.
    fn max_fencing_counter(&mut self, task_id: &TaskId) -> Result<i64, StoreError>;
    /// Lists every active lease with `expires_at < now`, for the sweeper.
    fn list_expired_leases(&mut self, now: crate::clock::Timestamp) -> Result<Vec<Lease>, StoreError>;

    // -- reservations --------------------------------------------------
    /// Persists a new reservation.
    fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;
    /// Loads the active reservation on a task, if any.
    fn get_active_reservation_for_task(
        &mut self,
        task_id: &TaskId,
    ) -> Result<Option<Reservation>, StoreError>;
    /// Persists a reservation's mutated fields.
    fn update_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;
    /// Lists every active reservation with `expires_at < now`, for the sweeper.
    fn list_expired_reservations(
        &mut self,
        now: crate::clock::Timestamp,
    ) -> Result<Vec<Reservation>, StoreError>;

    // -- snapshots -----------------------------------------------------
    /// Persists a claim-time work-spec snapshot.
    fn insert_snapshot(&mut self, snapshot: &TaskExecutionSnapshot) -> Result<(), StoreError>;

    // -- plan versioning -------------------------------------------------
    /// Returns `max(version_number)` for the project (1 once seeded).
    fn current_plan_version(&mut self, project_id: &ProjectId) -> Result<i64, StoreError>;
    /// Persists a new plan version.
    fn insert_plan_version(&mut self, version: &PlanVersion) -> Result<(), StoreError>;
    /// Persists a new changeset.
    fn insert_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError>;
    /// Loads a changeset by id.
    fn get_changeset(
        &mut self,
        id: &PlanChangeSetId,
    ) -> Result<Option<PlanChangeSet>, StoreError>;
    /// Persists a changeset's mutated status/`applied_at`.
    fn update_changeset(&mut self, changeset: &PlanChangeSet) -> Result<(), StoreError>;

    // -- gates -----------------------------------------------------------
    /// Persists a new gate rule.
    fn insert_gate_rule(&mut self, rule: &GateRule) -> Result<(), StoreError>;
    /// Loads a gate rule by id.
    fn get_gate_rule(&mut self, id: &GateRuleId) -> Result<Option<GateRule>, StoreError>;
    /// Persists a new gate decision.
    fn insert_gate_decision(&mut self, decision: &GateDecision) -> Result<(), StoreError>;
    /// Lists gate decisions in a project, optionally filtered to one scope.
    fn list_gate_decisions(
        &mut self,
        project_id: &ProjectId,
        scope: Option<&GateScope>,
    ) -> Result<Vec<GateDecision>, StoreError>;
    /// Loads the active gate policy for a project, if one is configured.
    fn get_gate_policy(&mut self, project_id: &ProjectId) -> Result<Option<GatePolicy>, StoreError>;
    /// Finds an already-open gate task synthesized for the same
    /// `(trigger, candidate set)`, so policy emission stays idempotent.
    fn find_open_policy_gate_task(
        &mut self,
        project_id: &ProjectId,
        trigger: crate::model::PolicyTrigger,
        candidate_task_ids: &[TaskId],
    ) -> Result<Option<Task>, StoreError>;

    // -- artifacts / integration attempts ---------------------------------
    /// Persists a new artifact.
    fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), StoreError>;
    /// Lists artifacts attached to a task.
    fn list_task_artifacts(&mut self, task_id: &TaskId) -> Result<Vec<Artifact>, StoreError>;
    /// Persists a new integration attempt.
    fn insert_integration_attempt(
        &mut self,
        attempt: &IntegrationAttempt,
    ) -> Result<(), StoreError>;
    /// Loads an integration attempt by id.
    fn get_integration_attempt(
        &mut self,
        id: &IntegrationAttemptId,
    ) -> Result<Option<IntegrationAttempt>, StoreError>;
    /// Persists an integration attempt's mutated status/result.
    fn update_integration_attempt(
        &mut self,
        attempt: &IntegrationAttempt,
    ) -> Result<(), StoreError>;
    /// Lists integration attempts for a task.
    fn list_integration_attempts(
        &mut self,
        task_id: &TaskId,
    ) -> Result<Vec<IntegrationAttempt>, StoreError>;
    /// Lists every integration attempt in a project (for metrics snapshots).
    fn list_project_integration_attempts(
        &mut self,
        project_id: &ProjectId,
    ) -> Result<Vec<IntegrationAttempt>, StoreError>;

    // -- api keys --------------------------------------------------------
    /// Persists a new API key.
    fn insert_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError>;
    /// Loads an API key by the SHA-256 hash of its raw token.
    fn get_api_key_by_hash(&mut self, hash: &str) -> Result<Option<ApiKey>, StoreError>;
    /// Lists API keys, optionally restricted to one project's scope.
    fn list_api_keys(&mut self, project_id: Option<&ProjectId>) -> Result<Vec<ApiKey>, StoreError>;
    /// Persists an API key's mutated status/`last_used_at`/`revoked_at`.
    fn update_api_key(&mut self, key: &ApiKey) -> Result<(), StoreError>;
    /// Loads an API key by id.
    fn get_api_key(&mut self, id: &ApiKeyId) -> Result<Option<ApiKey>, StoreError>;

    // -- event log ---------------------------------------------------------
    /// Appends an event within this transaction, returning the dense
    /// monotonic id the store assigned.
    fn append_event(&mut self, event: NewEvent) -> Result<EventLogId, StoreError>;
    /// Scans events of `event_type` in a project at or after `from_id`,
    /// ordered by `id` ascending, up to `limit` rows.
    fn list_events_from(
        &mut self,
        project_id: &ProjectId,
        event_type: EventType,
        from_id: EventLogId,
        limit: i64,
    ) -> Result<Vec<EventLog>, StoreError>;

    // -- metrics -------------------------------------------------------
    /// Loads the checkpoint for `(project_id, mode)`, if one exists.
    fn get_checkpoint(
        &mut self,
        project_id: &ProjectId,
        mode: MetricsMode,
    ) -> Result<Option<MetricsJobCheckpoint>, StoreError>;
    /// Inserts or updates the checkpoint for `(project_id, mode)`.
    fn upsert_checkpoint(&mut self, checkpoint: &MetricsJobCheckpoint) -> Result<(), StoreError>;
    /// Loads a prior run by its idempotency key, for at-most-once re-fetch.
    fn get_job_run_by_idempotency_key(
        &mut self,
        project_id: &ProjectId,
        idempotency_key: &str,
    ) -> Result<Option<MetricsJobRun>, StoreError>;
    /// Persists a new job run record.
    fn insert_job_run(&mut self, run: &MetricsJobRun) -> Result<(), StoreError>;
    /// Loads a job run by id (used by the recovery orchestrator).
    fn get_job_run(&mut self, id: &MetricsJobRunId) -> Result<Option<MetricsJobRun>, StoreError>;
    /// Inserts or updates a per-state transition counter.
    fn upsert_transition_counter(
        &mut self,
        counter: &MetricsStateTransitionCounter,
    ) -> Result<(), StoreError>;
    /// Loads a single per-state transition counter, if one exists yet.
    fn get_transition_counter(
        &mut self,
        project_id: &ProjectId,
        mode: MetricsMode,
        to_state: TaskState,
    ) -> Result<Option<MetricsStateTransitionCounter>, StoreError>;
    /// Deletes every transition counter for `(project_id, mode)`, used by
    /// `replay_from_event_id`.
    fn delete_transition_counters(
        &mut self,
        project_id: &ProjectId,
        mode: MetricsMode,
    ) -> Result<(), StoreError>;
    /// Lists every transition counter for `(project_id, mode)`, for tests
    /// asserting deterministic replay.
    fn list_transition_counters(
        &mut self,
        project_id: &ProjectId,
        mode: MetricsMode,
    ) -> Result<Vec<MetricsStateTransitionCounter>, StoreError>;

    /// Persists a computed metrics snapshot.
    fn insert_metrics_snapshot(&mut self, snapshot: &MetricsSnapshot) -> Result<(), StoreError>;
    /// Loads a single snapshot by id.
    fn get_metrics_snapshot(
        &mut self,
        id: &MetricsSnapshotId,
    ) -> Result<Option<MetricsSnapshot>, StoreError>;
    /// Loads the most recently captured snapshot for a project, if any.
    fn get_latest_metrics_snapshot(
        &mut self,
        project_id: &ProjectId,
    ) -> Result<Option<MetricsSnapshot>, StoreError>;

    // -- alerts ----------------------------------------------------------
    /// Persists a newly raised alert.
    fn insert_alert(&mut self, alert: &Alert) -> Result<(), StoreError>;
    /// Loads a single alert by id.
    fn get_alert(&mut self, id: &AlertId) -> Result<Option<Alert>, StoreError>;
    /// Lists every alert raised for a project, most recent first.
    fn list_alerts(&mut self, project_id: &ProjectId) -> Result<Vec<Alert>, StoreError>;

    // -- lifecycle -----------------------------------------------------
    /// Commits every change made through this transaction.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
    /// Discards every change made through this transaction.
    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
