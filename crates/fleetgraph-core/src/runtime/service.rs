// crates/fleetgraph-core/src/runtime/service.rs
// ============================================================================
// Module: Orchestrator
// Description: The single entry point composing the graph, state machine,
//              lease/reservation, plan, and gate engines behind one
//              transaction per operation.
// ============================================================================

//! ## Overview
//! `Orchestrator` is the surface a transport shell calls. Every method opens
//! exactly one [`crate::interfaces::Store::begin`] transaction, delegates to
//! the corresponding `runtime` module, and commits or rolls back as a unit
//! (`spec` §5: "no mutation is partially applied"). Opaque identifiers are
//! generated here, the one place every `create_*` operation needs one; it is
//! not large enough to warrant its own module.

use std::collections::BTreeSet;

use rand::Rng;
use rand::rngs::OsRng;
use time::Duration;

use crate::clock::Clock;
use crate::errors::ErrorCode;
use crate::errors::OperationError;
use crate::hashing;
use crate::ids::AgentId;
use crate::ids::AlertId;
use crate::ids::ApiKeyId;
use crate::ids::ArtifactId;
use crate::ids::DependencyEdgeId;
use crate::ids::GateDecisionId;
use crate::ids::GateRuleId;
use crate::ids::IntegrationAttemptId;
use crate::ids::LeaseId;
use crate::ids::MilestoneId;
use crate::ids::PhaseId;
use crate::ids::PlanChangeSetId;
use crate::ids::PlanVersionId;
use crate::ids::ProjectId;
use crate::ids::ReservationId;
use crate::ids::TaskExecutionSnapshotId;
use crate::ids::TaskId;
use crate::interfaces::NewEvent;
use crate::interfaces::Store;
use crate::interfaces::StoreTransaction;
use crate::interfaces::TaskListFilter;
use crate::model::Alert;
use crate::model::ApiKey;
use crate::model::ApiKeyScope;
use crate::model::ApiKeyStatus;
use crate::model::Artifact;
use crate::model::DependencyEdge;
use crate::model::EventType;
use crate::model::GateDecision;
use crate::model::GateOutcome;
use crate::model::GateRule;
use crate::model::GateScope;
use crate::model::IntegrationAttempt;
use crate::model::IntegrationAttemptStatus;
use crate::model::IntegrationResult;
use crate::model::Lease;
use crate::model::Milestone;
use crate::model::PlanChangeSet;
use crate::model::PlanOperation;
use crate::model::PlanVersion;
use crate::model::Phase;
use crate::model::Project;
use crate::model::ProjectStatus;
use crate::model::Reservation;
use crate::model::Role;
use crate::model::Task;
use crate::model::TaskClass;
use crate::model::TaskExecutionSnapshot;
use crate::model::TaskState;
use crate::model::UnlockOn;
use crate::model::WorkSpec;
use crate::runtime::alerts;
use crate::runtime::gate;
use crate::runtime::graph;
use crate::runtime::lease;
use crate::runtime::plan;
use crate::runtime::ready;
use crate::runtime::state_machine;
use crate::runtime::state_machine::TransitionOutcome;
use crate::runtime::state_machine::TransitionRequest;

/// The error every [`Orchestrator`] operation fails with. Identical in shape
/// to [`OperationError`] today; kept as its own name so a transport concern
/// layered on top (request tracing, rate-limit signalling) has somewhere to
/// grow without reaching into `runtime`'s internal error type.
pub type OrchestratorError = OperationError;

/// Accepted bounds for an explicit reservation TTL override (`spec` §8).
const RESERVATION_TTL_SECONDS_RANGE: (i64, i64) = (60, 86_400);

/// Generates a random opaque identifier of the form `<prefix>_<32 hex chars>`.
fn new_id(prefix: &str) -> String {
    let mut bytes = [0_u8; 16];
    OsRng.fill(&mut bytes);
    format!("{prefix}_{}", hashing::hex_encode(&bytes))
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    /// Owning phase.
    pub phase_id: PhaseId,
    /// Owning milestone; must belong to `phase_id`.
    pub milestone_id: MilestoneId,
    /// Short display title.
    pub title: String,
    /// Scheduling priority; lower is more urgent.
    pub priority: i32,
    /// The structured work description.
    pub work_spec: WorkSpec,
    /// Domain classification.
    pub task_class: TaskClass,
    /// Capability tags required to claim this task.
    pub capability_tags: BTreeSet<String>,
    /// Paths this task is expected to touch.
    pub expected_touches: BTreeSet<String>,
    /// Paths this task must hold exclusively while claimed.
    pub exclusive_paths: BTreeSet<String>,
    /// Paths this task may share while claimed.
    pub shared_paths: BTreeSet<String>,
}

/// Fields accepted when creating a plan changeset.
#[derive(Debug, Clone)]
pub struct CreatePlanChangesetRequest {
    /// The plan version this changeset was authored against.
    pub base_plan_version: i64,
    /// The plan version the author intends to produce.
    pub target_plan_version: i64,
    /// Ordered mutations to apply.
    pub operations: Vec<PlanOperation>,
    /// A human-readable preview of expected impact.
    pub impact_preview: Option<String>,
    /// Identity of the caller authoring the changeset.
    pub created_by: String,
}

/// Fields accepted when creating a gate rule.
#[derive(Debug, Clone)]
pub struct CreateGateRuleRequest {
    /// Human-readable name.
    pub name: String,
    /// Task classes this rule applies to.
    pub applies_to_task_classes: BTreeSet<TaskClass>,
    /// Evidence kinds required before a decision may be recorded.
    pub required_evidence_kinds: BTreeSet<String>,
    /// Reviewer roles permitted to record a decision under this rule.
    pub required_reviewer_roles: BTreeSet<String>,
}

/// Fields accepted when recording a gate decision.
#[derive(Debug, Clone)]
pub struct CreateGateDecisionRequest {
    /// The rule this decision is recorded under, if any.
    pub gate_rule_id: Option<GateRuleId>,
    /// Exactly one of task or phase.
    pub scope: GateScope,
    /// The recorded outcome.
    pub outcome: GateOutcome,
    /// References to the evidence the reviewer consulted.
    pub evidence_refs: Vec<String>,
    /// Identity of the reviewer.
    pub decided_by: String,
}

/// Fields accepted when minting an API key.
#[derive(Debug, Clone)]
pub struct CreateApiKeyRequest {
    /// The project this key is scoped to, or `Global`.
    pub scope: ApiKeyScope,
    /// Human-readable label.
    pub name: String,
    /// Roles granted to this key.
    pub role_scopes: BTreeSet<Role>,
    /// Identity of the caller minting the key.
    pub created_by: String,
}

/// A freshly minted API key's raw secret alongside its persisted record. The
/// raw token is returned exactly once; only its hash is ever stored.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    /// The persisted record.
    pub api_key: ApiKey,
    /// The raw bearer token; the caller must capture it now.
    pub raw_token: String,
}

/// Composes the graph, state machine, lease, plan, and gate engines behind
/// one transaction per operation.
pub struct Orchestrator<S: Store> {
    store: S,
    clock: Box<dyn Clock>,
    lease_duration: Duration,
    reservation_default_ttl: Duration,
}

impl<S: Store> Orchestrator<S> {
    /// Builds an orchestrator over `store`, using `clock` for every
    /// timestamp and the two durations for leases/reservations created
    /// without an explicit override.
    #[must_use]
    pub fn new(
        store: S,
        clock: Box<dyn Clock>,
        lease_duration: Duration,
        reservation_default_ttl: Duration,
    ) -> Self {
        Self { store, clock, lease_duration, reservation_default_ttl }
    }

    fn begin(&self) -> Result<Box<dyn StoreTransaction + '_>, OrchestratorError> {
        self.store.begin().map_err(|err| OperationError::new(ErrorCode::DbError, err.to_string()))
    }

    fn db_err(err: impl std::fmt::Display) -> OrchestratorError {
        OperationError::new(ErrorCode::DbError, err.to_string())
    }

    // -- projects ----------------------------------------------------------

    /// Creates a new project, seeding its first plan version (`version_number = 1`).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn create_project(&self, name: String) -> Result<Project, OrchestratorError> {
        let mut txn = self.begin()?;
        let now = self.clock.now();
        let project = Project {
            id: ProjectId::new(new_id("prj")),
            name,
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
        };
        txn.insert_project(&project).map_err(Self::db_err)?;
        txn.insert_plan_version(&PlanVersion {
            id: PlanVersionId::new(new_id("plv")),
            project_id: project.id.clone(),
            version_number: 1,
            change_set_id: None,
            summary: "project created".to_string(),
            created_by: "system".to_string(),
            created_at: now,
        })
        .map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(project)
    }

    /// Lists every project.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn list_projects(&self) -> Result<Vec<Project>, OrchestratorError> {
        let mut txn = self.begin()?;
        let projects = txn.list_projects().map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(projects)
    }

    /// Loads a project by id.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ProjectNotFound`] if absent, [`ErrorCode::DbError`]
    /// on store failure.
    pub fn get_project(&self, id: &ProjectId) -> Result<Project, OrchestratorError> {
        let mut txn = self.begin()?;
        let project = txn
            .get_project(id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::ProjectNotFound, "project does not exist"))?;
        txn.commit().map_err(Self::db_err)?;
        Ok(project)
    }

    // -- phases / milestones ------------------------------------------------

    /// Creates a phase, assigning the next sequence in the project.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ProjectNotFound`] if the project is absent,
    /// [`ErrorCode::DbError`] on store failure.
    pub fn create_phase(
        &self,
        project_id: &ProjectId,
        name: String,
    ) -> Result<Phase, OrchestratorError> {
        let mut txn = self.begin()?;
        txn.get_project(project_id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::ProjectNotFound, "project does not exist"))?;
        let sequence = txn.max_phase_sequence(project_id).map_err(Self::db_err)?.unwrap_or(0) + 1;
        let phase = Phase { id: PhaseId::new(new_id("phs")), project_id: project_id.clone(), name, sequence };
        txn.insert_phase(&phase).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(phase)
    }

    /// Creates a milestone nested under `phase_id`, assigning the next
    /// sequence within that phase.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::IdentifierParentRequired`] if the phase is
    /// absent, [`ErrorCode::DbError`] on store failure.
    pub fn create_milestone(
        &self,
        project_id: &ProjectId,
        phase_id: &PhaseId,
        name: String,
    ) -> Result<Milestone, OrchestratorError> {
        let mut txn = self.begin()?;
        let phase = txn.get_phase(phase_id).map_err(Self::db_err)?.ok_or_else(|| {
            OperationError::new(ErrorCode::IdentifierParentRequired, "phase does not exist")
        })?;
        if &phase.project_id != project_id {
            return Err(OperationError::new(ErrorCode::ProjectMismatch, "phase belongs to another project"));
        }
        let sequence = txn.max_milestone_sequence(phase_id).map_err(Self::db_err)?.unwrap_or(0) + 1;
        let milestone = Milestone {
            id: MilestoneId::new(new_id("mls")),
            project_id: project_id.clone(),
            phase_id: phase_id.clone(),
            name,
            sequence,
        };
        txn.insert_milestone(&milestone).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(milestone)
    }

    // -- tasks ---------------------------------------------------------------

    /// Creates a task. A freshly created task can have no incoming
    /// dependency edges yet (nothing could have named it as a successor
    /// before it existed), so its initial state is always `ready`.
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::IdentifierParentRequired`] if the milestone is absent.
    /// - [`ErrorCode::PhaseMilestoneMismatch`] if the milestone's phase does
    ///   not match `request.phase_id`.
    /// - [`ErrorCode::DbError`] on store failure.
    pub fn create_task(
        &self,
        project_id: &ProjectId,
        request: CreateTaskRequest,
    ) -> Result<Task, OrchestratorError> {
        let mut txn = self.begin()?;
        let milestone = txn.get_milestone(&request.milestone_id).map_err(Self::db_err)?.ok_or_else(
            || OperationError::new(ErrorCode::IdentifierParentRequired, "milestone does not exist"),
        )?;
        if milestone.phase_id != request.phase_id {
            return Err(OperationError::new(
                ErrorCode::PhaseMilestoneMismatch,
                "milestone's phase does not match the task's phase",
            ));
        }
        let now = self.clock.now();
        let task = Task {
            id: TaskId::new(new_id("tsk")),
            project_id: project_id.clone(),
            phase_id: request.phase_id,
            milestone_id: request.milestone_id,
            title: request.title,
            state: TaskState::Ready,
            priority: request.priority,
            work_spec: request.work_spec,
            task_class: request.task_class,
            capability_tags: request.capability_tags,
            expected_touches: request.expected_touches,
            exclusive_paths: request.exclusive_paths,
            shared_paths: request.shared_paths,
            introduced_in_plan_version: None,
            deprecated_in_plan_version: None,
            version: 1,
            created_at: now,
            updated_at: now,
            reviewed_by: None,
            review_evidence_refs: Vec::new(),
        };
        txn.insert_task(&task).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(task)
    }

    /// Loads a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::TaskNotFound`] if absent, [`ErrorCode::DbError`]
    /// on store failure.
    pub fn get_task(&self, id: &TaskId) -> Result<Task, OrchestratorError> {
        let mut txn = self.begin()?;
        let task = txn
            .get_task(id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "task does not exist"))?;
        txn.commit().map_err(Self::db_err)?;
        Ok(task)
    }

    /// Lists tasks in a project matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn list_tasks(
        &self,
        project_id: &ProjectId,
        filter: &TaskListFilter,
    ) -> Result<Vec<Task>, OrchestratorError> {
        let mut txn = self.begin()?;
        let tasks = txn.list_tasks(project_id, filter).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(tasks)
    }

    /// Transitions a task's state, then promotes any `backlog` successor
    /// whose predecessors are now all satisfied (`spec` §4.1, §4.2).
    ///
    /// # Errors
    ///
    /// See [`state_machine::transition_task`].
    pub fn transition_task_state(
        &self,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, OrchestratorError> {
        let mut txn = self.begin()?;
        let outcome = state_machine::transition_task(txn.as_mut(), self.clock.as_ref(), request.clone())?;
        if matches!(outcome.task.state, TaskState::Implemented | TaskState::Integrated) {
            self.promote_ready_successors(txn.as_mut(), &request.project_id, &request.task_id)?;
        }
        txn.commit().map_err(Self::db_err)?;
        Ok(outcome)
    }

    /// Promotes every `backlog` successor of `from_task_id` whose
    /// predecessor edges are now all satisfied to `ready`.
    fn promote_ready_successors(
        &self,
        txn: &mut dyn StoreTransaction,
        project_id: &ProjectId,
        from_task_id: &TaskId,
    ) -> Result<(), OrchestratorError> {
        let outgoing = txn
            .list_outgoing_edges(project_id, from_task_id)
            .map_err(Self::db_err)?;
        for edge in outgoing {
            let successor = txn
                .get_task(&edge.to_task_id)
                .map_err(Self::db_err)?
                .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "successor task does not exist"))?;
            if successor.state != TaskState::Backlog {
                continue;
            }
            if graph::predecessors_satisfied(txn, project_id, &successor.id)? {
                state_machine::transition_task(
                    txn,
                    self.clock.as_ref(),
                    TransitionRequest {
                        project_id: project_id.clone(),
                        task_id: successor.id,
                        to: TaskState::Ready,
                        reason: Some("all predecessors satisfied".to_string()),
                        actor: "system".to_string(),
                        reviewed_by: None,
                        review_evidence_refs: Vec::new(),
                        force: false,
                    },
                )?;
            }
        }
        Ok(())
    }

    // -- dependency graph ------------------------------------------------------

    /// Creates a dependency edge, then demotes the successor back to
    /// `backlog` if it was `ready` and the new edge leaves it unsatisfied.
    ///
    /// # Errors
    ///
    /// See [`graph::create_dependency`].
    pub fn create_dependency(
        &self,
        project_id: &ProjectId,
        from_task_id: TaskId,
        to_task_id: TaskId,
        unlock_on: UnlockOn,
    ) -> Result<DependencyEdge, OrchestratorError> {
        let mut txn = self.begin()?;
        let edge = DependencyEdge {
            id: DependencyEdgeId::new(new_id("dep")),
            project_id: project_id.clone(),
            from_task_id,
            to_task_id: to_task_id.clone(),
            unlock_on,
        };
        let edge = graph::create_dependency(txn.as_mut(), edge)?;

        let successor = txn
            .get_task(&to_task_id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "successor task does not exist"))?;
        if successor.state == TaskState::Ready
            && !graph::predecessors_satisfied(txn.as_mut(), project_id, &to_task_id)?
        {
            self.force_demote_to_backlog(txn.as_mut(), successor)?;
        }

        txn.commit().map_err(Self::db_err)?;
        Ok(edge)
    }

    /// Directly reverts a `ready` task to `backlog` after a newly inserted
    /// dependency edge leaves it unsatisfied. This is the graph engine
    /// correcting its own derived state, not an actor-driven transition, so
    /// it bypasses the adjacency table rather than asking `ready` to accept
    /// `backlog` as a legal destination.
    fn force_demote_to_backlog(
        &self,
        txn: &mut dyn StoreTransaction,
        mut task: Task,
    ) -> Result<(), OrchestratorError> {
        let from = task.state;
        let now = self.clock.now();
        task.state = TaskState::Backlog;
        task.updated_at = now;
        task.version += 1;
        txn.update_task(&task).map_err(Self::db_err)?;
        txn.append_event(NewEvent {
            project_id: task.project_id.clone(),
            entity_type: "task".to_string(),
            entity_id: Some(task.id.to_string()),
            event_type: EventType::TaskStateTransitioned,
            payload: serde_json::json!({
                "from_state": from,
                "to_state": task.state,
                "reason": "new dependency edge left the task unsatisfied",
                "actor": "system",
            }),
            caused_by: Some("system".to_string()),
        })
        .map_err(Self::db_err)?;
        Ok(())
    }

    /// Returns every dependency edge in the project, for graph export.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn get_project_graph(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<DependencyEdge>, OrchestratorError> {
        let mut txn = self.begin()?;
        let edges = txn.list_project_edges(project_id).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(edges)
    }

    /// Returns tasks `agent_id` may claim right now.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn get_ready_tasks(
        &self,
        project_id: &ProjectId,
        agent_id: &AgentId,
        capability_set: &BTreeSet<String>,
    ) -> Result<Vec<Task>, OrchestratorError> {
        let mut txn = self.begin()?;
        let tasks = ready::get_ready_tasks(txn.as_mut(), project_id, agent_id, capability_set)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(tasks)
    }

    // -- lease / reservation ---------------------------------------------------

    /// Claims a task for `agent_id`.
    ///
    /// # Errors
    ///
    /// See [`lease::claim_task`].
    pub fn claim_task(
        &self,
        project_id: &ProjectId,
        task_id: &TaskId,
        agent_id: &AgentId,
    ) -> Result<(Task, Lease, TaskExecutionSnapshot), OrchestratorError> {
        let mut txn = self.begin()?;
        let outcome = lease::claim_task(
            txn.as_mut(),
            self.clock.as_ref(),
            self.lease_duration,
            project_id,
            task_id,
            agent_id,
            LeaseId::new(new_id("lse")),
            TaskExecutionSnapshotId::new(new_id("snp")),
        )?;
        txn.commit().map_err(Self::db_err)?;
        Ok((outcome.task, outcome.lease, outcome.snapshot))
    }

    /// Extends an active lease's expiry.
    ///
    /// # Errors
    ///
    /// See [`lease::heartbeat_task`].
    #[allow(clippy::too_many_arguments, reason = "mirrors the wire-level heartbeat request shape")]
    pub fn heartbeat_task(
        &self,
        project_id: &ProjectId,
        task_id: &TaskId,
        agent_id: &AgentId,
        token: &str,
        seen_plan_version: Option<i64>,
    ) -> Result<(Lease, i64), OrchestratorError> {
        let mut txn = self.begin()?;
        let outcome = lease::heartbeat_task(
            txn.as_mut(),
            self.clock.as_ref(),
            self.lease_duration,
            project_id,
            task_id,
            agent_id,
            token,
            seen_plan_version,
        )?;
        txn.commit().map_err(Self::db_err)?;
        Ok((outcome.lease, outcome.current_plan_version))
    }

    /// Creates a hard reservation naming `assignee_agent_id`.
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::ReservationTtlOutOfRange`] if `ttl_seconds` is supplied
    ///   and falls outside `60..=86400`.
    /// - See [`lease::assign_task`] for the remaining failure modes.
    pub fn assign_task(
        &self,
        project_id: &ProjectId,
        task_id: &TaskId,
        assignee_agent_id: &AgentId,
        created_by: &AgentId,
        ttl_seconds: Option<i64>,
    ) -> Result<(Task, Reservation), OrchestratorError> {
        if let Some(seconds) = ttl_seconds {
            let (min, max) = RESERVATION_TTL_SECONDS_RANGE;
            if seconds < min || seconds > max {
                return Err(OperationError::new(
                    ErrorCode::ReservationTtlOutOfRange,
                    format!("ttl_seconds must fall within {min}..={max}"),
                ));
            }
        }
        let mut txn = self.begin()?;
        let ttl = ttl_seconds.map_or(self.reservation_default_ttl, Duration::seconds);
        let outcome = lease::assign_task(
            txn.as_mut(),
            self.clock.as_ref(),
            ttl,
            project_id,
            task_id,
            assignee_agent_id,
            created_by,
            ReservationId::new(new_id("rsv")),
        )?;
        txn.commit().map_err(Self::db_err)?;
        Ok(outcome)
    }

    /// Runs one expiration sweep pass over every project's leases and
    /// reservations. Intended for a single periodic caller (`spec` §4.3).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn sweep_expired(&self) -> Result<lease::SweepReport, OrchestratorError> {
        let mut txn = self.begin()?;
        let report = lease::sweep_expired(txn.as_mut(), self.clock.as_ref())?;
        txn.commit().map_err(Self::db_err)?;
        Ok(report)
    }

    // -- plan versioning ---------------------------------------------------

    /// Creates a draft plan changeset.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::ProjectNotFound`] if the project is absent,
    /// [`ErrorCode::DbError`] on store failure.
    pub fn create_plan_changeset(
        &self,
        project_id: &ProjectId,
        request: CreatePlanChangesetRequest,
    ) -> Result<PlanChangeSet, OrchestratorError> {
        let mut txn = self.begin()?;
        txn.get_project(project_id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::ProjectNotFound, "project does not exist"))?;
        let changeset = PlanChangeSet {
            id: PlanChangeSetId::new(new_id("chg")),
            project_id: project_id.clone(),
            base_plan_version: request.base_plan_version,
            target_plan_version: request.target_plan_version,
            status: crate::model::ChangeSetStatus::Draft,
            operations: request.operations,
            impact_preview: request.impact_preview,
            created_by: request.created_by,
            applied_at: None,
        };
        txn.insert_changeset(&changeset).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(changeset)
    }

    /// Applies a changeset's operations.
    ///
    /// # Errors
    ///
    /// See [`plan::apply_plan_changeset`].
    pub fn apply_plan_changeset(
        &self,
        change_set_id: &PlanChangeSetId,
        allow_rebase: bool,
        applied_by: &str,
    ) -> Result<plan::ApplyOutcome, OrchestratorError> {
        let mut txn = self.begin()?;
        let outcome = plan::apply_plan_changeset(
            txn.as_mut(),
            self.clock.as_ref(),
            change_set_id,
            allow_rebase,
            PlanVersionId::new(new_id("plv")),
            applied_by,
        )?;
        txn.commit().map_err(Self::db_err)?;
        Ok(outcome)
    }

    // -- gates ---------------------------------------------------------------

    /// Creates a gate rule.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn create_gate_rule(
        &self,
        project_id: &ProjectId,
        request: CreateGateRuleRequest,
    ) -> Result<GateRule, OrchestratorError> {
        let mut txn = self.begin()?;
        let rule = GateRule {
            id: GateRuleId::new(new_id("gtr")),
            project_id: project_id.clone(),
            name: request.name,
            applies_to_task_classes: request.applies_to_task_classes,
            required_evidence_kinds: request.required_evidence_kinds,
            required_reviewer_roles: request.required_reviewer_roles,
        };
        txn.insert_gate_rule(&rule).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(rule)
    }

    /// Records a gate decision.
    ///
    /// # Errors
    ///
    /// See [`gate::create_gate_decision`].
    pub fn create_gate_decision(
        &self,
        project_id: &ProjectId,
        request: CreateGateDecisionRequest,
    ) -> Result<GateDecision, OrchestratorError> {
        let mut txn = self.begin()?;
        let decision = gate::create_gate_decision(
            txn.as_mut(),
            self.clock.as_ref(),
            GateDecisionId::new(new_id("gtd")),
            project_id.clone(),
            request.gate_rule_id,
            request.scope,
            request.outcome,
            request.evidence_refs,
            request.decided_by,
        )?;
        txn.commit().map_err(Self::db_err)?;
        Ok(decision)
    }

    /// Lists gate decisions in a project, optionally filtered to one scope.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn list_gate_decisions(
        &self,
        project_id: &ProjectId,
        scope: Option<&GateScope>,
    ) -> Result<Vec<GateDecision>, OrchestratorError> {
        let mut txn = self.begin()?;
        let decisions = txn.list_gate_decisions(project_id, scope).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(decisions)
    }

    /// Evaluates the project's gate policy, synthesizing any gate tasks
    /// whose trigger has tripped.
    ///
    /// # Errors
    ///
    /// See [`gate::evaluate_gate_policies`].
    pub fn evaluate_gate_policies(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<Task>, OrchestratorError> {
        let mut txn = self.begin()?;
        let emitted = gate::evaluate_gate_policies(txn.as_mut(), self.clock.as_ref(), project_id, || {
            TaskId::new(new_id("tsk"))
        })?;
        txn.commit().map_err(Self::db_err)?;
        Ok(emitted)
    }

    // -- artifacts / integration attempts ---------------------------------

    /// Attaches an artifact to a task.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::TaskNotFound`] if the task is absent,
    /// [`ErrorCode::DbError`] on store failure.
    pub fn create_artifact(
        &self,
        project_id: &ProjectId,
        task_id: &TaskId,
        kind: String,
        uri: String,
        content_hash: String,
        created_by: String,
    ) -> Result<Artifact, OrchestratorError> {
        let mut txn = self.begin()?;
        txn.get_task(task_id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "task does not exist"))?;
        let now = self.clock.now();
        let artifact = Artifact {
            id: ArtifactId::new(new_id("art")),
            project_id: project_id.clone(),
            task_id: task_id.clone(),
            kind,
            uri,
            content_hash,
            created_by: created_by.clone(),
            created_at: now,
        };
        txn.insert_artifact(&artifact).map_err(Self::db_err)?;
        txn.append_event(NewEvent {
            project_id: project_id.clone(),
            entity_type: "artifact".to_string(),
            entity_id: Some(artifact.id.to_string()),
            event_type: EventType::ArtifactCreated,
            payload: serde_json::json!({ "task_id": task_id.to_string(), "kind": artifact.kind }),
            caused_by: Some(created_by),
        })
        .map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(artifact)
    }

    /// Lists artifacts attached to a task.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn list_task_artifacts(&self, task_id: &TaskId) -> Result<Vec<Artifact>, OrchestratorError> {
        let mut txn = self.begin()?;
        let artifacts = txn.list_task_artifacts(task_id).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(artifacts)
    }

    /// Enqueues an integration attempt for a task.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::TaskNotFound`] if the task is absent,
    /// [`ErrorCode::DbError`] on store failure.
    pub fn enqueue_integration_attempt(
        &self,
        project_id: &ProjectId,
        task_id: &TaskId,
    ) -> Result<IntegrationAttempt, OrchestratorError> {
        let mut txn = self.begin()?;
        txn.get_task(task_id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::TaskNotFound, "task does not exist"))?;
        let now = self.clock.now();
        let attempt = IntegrationAttempt {
            id: IntegrationAttemptId::new(new_id("int")),
            project_id: project_id.clone(),
            task_id: task_id.clone(),
            status: IntegrationAttemptStatus::Enqueued,
            result: None,
            detail: None,
            enqueued_at: now,
            started_at: None,
            completed_at: None,
        };
        txn.insert_integration_attempt(&attempt).map_err(Self::db_err)?;
        txn.append_event(NewEvent {
            project_id: project_id.clone(),
            entity_type: "integration_attempt".to_string(),
            entity_id: Some(attempt.id.to_string()),
            event_type: EventType::IntegrationAttemptEnqueued,
            payload: serde_json::json!({ "task_id": task_id.to_string() }),
            caused_by: None,
        })
        .map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(attempt)
    }

    /// Records an integration attempt's terminal result.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::IntegrationAttemptNotFound`] if absent,
    /// [`ErrorCode::InvalidIntegrationResult`] for an already-terminal
    /// attempt, [`ErrorCode::DbError`] on store failure.
    pub fn update_integration_attempt_result(
        &self,
        attempt_id: &IntegrationAttemptId,
        result: IntegrationResult,
        detail: Option<String>,
    ) -> Result<IntegrationAttempt, OrchestratorError> {
        let mut txn = self.begin()?;
        let mut attempt = txn.get_integration_attempt(attempt_id).map_err(Self::db_err)?.ok_or_else(
            || OperationError::new(ErrorCode::IntegrationAttemptNotFound, "integration attempt does not exist"),
        )?;
        if matches!(
            attempt.status,
            IntegrationAttemptStatus::Succeeded | IntegrationAttemptStatus::Failed
        ) {
            return Err(OperationError::new(
                ErrorCode::InvalidIntegrationResult,
                "integration attempt has already reached a terminal status",
            ));
        }
        let now = self.clock.now();
        attempt.status = if matches!(result, IntegrationResult::Success) {
            IntegrationAttemptStatus::Succeeded
        } else {
            IntegrationAttemptStatus::Failed
        };
        attempt.result = Some(result);
        attempt.detail = detail;
        attempt.completed_at = Some(now);
        if attempt.started_at.is_none() {
            attempt.started_at = Some(now);
        }
        txn.update_integration_attempt(&attempt).map_err(Self::db_err)?;
        txn.append_event(NewEvent {
            project_id: attempt.project_id.clone(),
            entity_type: "integration_attempt".to_string(),
            entity_id: Some(attempt.id.to_string()),
            event_type: EventType::IntegrationAttemptCompleted,
            payload: serde_json::json!({
                "task_id": attempt.task_id.to_string(),
                "result": attempt.result,
                "detail": attempt.detail,
            }),
            caused_by: None,
        })
        .map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(attempt)
    }

    /// Lists integration attempts for a task.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn list_integration_attempts(
        &self,
        task_id: &TaskId,
    ) -> Result<Vec<IntegrationAttempt>, OrchestratorError> {
        let mut txn = self.begin()?;
        let attempts = txn.list_integration_attempts(task_id).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(attempts)
    }

    // -- api keys ------------------------------------------------------------

    /// Mints a new API key, returning the raw secret exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn create_api_key(
        &self,
        request: CreateApiKeyRequest,
    ) -> Result<IssuedApiKey, OrchestratorError> {
        let mut txn = self.begin()?;
        let now = self.clock.now();
        let mut raw_bytes = [0_u8; 32];
        OsRng.fill(&mut raw_bytes);
        let raw_token = format!("tsk_{}", hashing::hex_encode(&raw_bytes));
        let api_key = ApiKey {
            id: ApiKeyId::new(new_id("key")),
            scope: request.scope,
            name: request.name,
            hash: hashing::hash_bytes(raw_token.as_bytes()),
            status: ApiKeyStatus::Active,
            role_scopes: request.role_scopes,
            created_by: request.created_by,
            created_at: now,
            last_used_at: None,
            revoked_at: None,
        };
        txn.insert_api_key(&api_key).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(IssuedApiKey { api_key, raw_token })
    }

    /// Lists API keys, optionally restricted to one project's scope.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn list_api_keys(
        &self,
        project_id: Option<&ProjectId>,
    ) -> Result<Vec<ApiKey>, OrchestratorError> {
        let mut txn = self.begin()?;
        let keys = txn.list_api_keys(project_id).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(keys)
    }

    /// Revokes an API key. Idempotent: revoking an already-revoked key
    /// succeeds without error.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::AuthInvalid`] if the key does not exist,
    /// [`ErrorCode::DbError`] on store failure.
    pub fn revoke_api_key(&self, id: &ApiKeyId) -> Result<ApiKey, OrchestratorError> {
        let mut txn = self.begin()?;
        let mut key = txn
            .get_api_key(id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::AuthInvalid, "api key does not exist"))?;
        if key.status == ApiKeyStatus::Active {
            key.status = ApiKeyStatus::Revoked;
            key.revoked_at = Some(self.clock.now());
            txn.update_api_key(&key).map_err(Self::db_err)?;
        }
        txn.commit().map_err(Self::db_err)?;
        Ok(key)
    }

    // -- alerts ------------------------------------------------------------

    /// Evaluates a project's latest metrics snapshot against the fixed
    /// threshold table, persisting and returning one alert per metric that
    /// crossed a severity tier.
    ///
    /// # Errors
    ///
    /// See [`alerts::evaluate_project_alerts`].
    pub fn evaluate_alerts(&self, project_id: &ProjectId) -> Result<Vec<Alert>, OrchestratorError> {
        let mut txn = self.begin()?;
        let raised = alerts::evaluate_project_alerts(txn.as_mut(), self.clock.as_ref(), project_id, || {
            AlertId::new(new_id("alt"))
        })?;
        txn.commit().map_err(Self::db_err)?;
        Ok(raised)
    }

    /// Loads an alert by id.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::AlertNotFound`] if absent, [`ErrorCode::DbError`]
    /// on store failure.
    pub fn get_alert(&self, id: &AlertId) -> Result<Alert, OrchestratorError> {
        let mut txn = self.begin()?;
        let alert = txn
            .get_alert(id)
            .map_err(Self::db_err)?
            .ok_or_else(|| OperationError::new(ErrorCode::AlertNotFound, "alert does not exist"))?;
        txn.commit().map_err(Self::db_err)?;
        Ok(alert)
    }

    /// Lists every alert raised for a project, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::DbError`] on store failure.
    pub fn list_alerts(&self, project_id: &ProjectId) -> Result<Vec<Alert>, OrchestratorError> {
        let mut txn = self.begin()?;
        let alerts = txn.list_alerts(project_id).map_err(Self::db_err)?;
        txn.commit().map_err(Self::db_err)?;
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::new_id;

    #[test]
    fn new_id_carries_its_prefix_and_is_high_entropy() {
        let a = new_id("tsk");
        let b = new_id("tsk");
        assert!(a.starts_with("tsk_"));
        assert_ne!(a, b);
        assert_eq!(a.len(), "tsk_".len() + 32);
    }
}
